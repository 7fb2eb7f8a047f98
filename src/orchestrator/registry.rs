//! Session registry: id → session state, plus every session-level operation
//! the editor can invoke.
//!
//! The registry map is only ever inserted into, looked up, or removed from.
//! Per-session state sits behind its own lock and is mutated by the session's
//! active prompt execution or by the option setters here.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::models::event::EventRole;
use crate::models::prompt::PromptResponse;
use crate::models::session::{title_from_prompt, LogCursor, Session, TurnRole};
use crate::models::update::{
    AvailableCommand, ConfigOption, ConfigOptionValue, ContentBlock, SessionModeState, SessionModelState,
    SessionUpdate,
};
use crate::orchestrator::execution::{CancelSlot, ExecutionContext, SessionRunner};
use crate::orchestrator::scheduler::PromptScheduler;
use crate::relay::UpdateRelay;
use crate::tailer::{IndexEntry, LogTail};
use crate::translate::EventTranslator;
use crate::{AppError, Result};

/// Live handle of one registered session.
pub struct SessionHandle {
    /// Mutable session state.
    pub session: Arc<Mutex<Session>>,
    /// Ordered notification queue.
    pub relay: UpdateRelay,
    cancel: Arc<CancelSlot>,
    scheduler: PromptScheduler,
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("session_id", &self.relay.session_id())
            .finish_non_exhaustive()
    }
}

/// Result of opening a session (`new`, `fork`, `load`, `resume`).
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSetup {
    /// Session id.
    pub session_id: String,
    /// Available modes and the selected one.
    pub modes: SessionModeState,
    /// Available models and the selected one.
    pub models: SessionModelState,
    /// Current option values.
    pub config_options: Vec<ConfigOption>,
}

/// One row of `session/list`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// Session id.
    pub session_id: String,
    /// Working directory.
    pub cwd: PathBuf,
    /// Title, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// RFC 3339 time of the last activity.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// How a recorded session is reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reopen {
    /// Replay the recorded conversation to the editor.
    Load,
    /// Rebuild state silently.
    Resume,
}

/// Owner of every session in the process.
#[derive(Debug)]
pub struct SessionRegistry {
    ctx: Arc<ExecutionContext>,
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new(ctx: Arc<ExecutionContext>) -> Self {
        Self {
            ctx,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Shared execution context.
    #[must_use]
    pub fn context(&self) -> &Arc<ExecutionContext> {
        &self.ctx
    }

    /// Open a new session in `cwd`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidArgument` if `cwd` is not absolute.
    pub async fn create(&self, cwd: PathBuf) -> Result<SessionSetup> {
        ensure_absolute(&cwd)?;
        let config = &self.ctx.config;
        let session = Session::new(
            cwd,
            config.default_mode_id(),
            config.default_model_id(),
            self.default_commands(),
        );
        info!(session_id = %session.id, cwd = %session.cwd.display(), "session created");
        Ok(self.register(session).await)
    }

    /// Fork `parent_id` into a new, independent session in `cwd`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidArgument` for a relative `cwd` and
    /// `AppError::UnknownSession` if the parent does not exist.
    pub async fn fork(&self, parent_id: &str, cwd: PathBuf) -> Result<SessionSetup> {
        ensure_absolute(&cwd)?;
        let parent = self.handle(parent_id).await?;
        let forked = parent.session.lock().await.fork(cwd);
        info!(parent_id, session_id = %forked.id, "session forked");
        Ok(self.register(forked).await)
    }

    /// Reopen a recorded session and replay it to the editor.
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidArgument` for a relative `cwd` and
    /// `AppError::UnknownSession` if neither the registry nor the agent's
    /// index knows `id`.
    pub async fn load(&self, id: &str, cwd: PathBuf) -> Result<SessionSetup> {
        self.reopen(id, cwd, Reopen::Load).await
    }

    /// Reopen a recorded session without replaying it.
    ///
    /// # Errors
    ///
    /// Same as [`SessionRegistry::load`].
    pub async fn resume(&self, id: &str, cwd: PathBuf) -> Result<SessionSetup> {
        self.reopen(id, cwd, Reopen::Resume).await
    }

    async fn reopen(&self, id: &str, cwd: PathBuf, how: Reopen) -> Result<SessionSetup> {
        ensure_absolute(&cwd)?;

        if let Ok(handle) = self.handle(id).await {
            if how == Reopen::Load {
                let history = handle.session.lock().await.history.clone();
                for turn in history {
                    let content = ContentBlock::text(turn.text);
                    handle.relay.send(match turn.role {
                        TurnRole::User => SessionUpdate::UserMessageChunk { content },
                        TurnRole::Assistant => SessionUpdate::AgentMessageChunk { content },
                    });
                }
                handle.relay.flush().await;
            }
            let session = handle.session.lock().await;
            return Ok(self.setup(&session));
        }

        let entry = self
            .ctx
            .index
            .find(id)
            .await
            .ok_or_else(|| AppError::UnknownSession(id.to_owned()))?;
        let (session, replay) = self.rebuild(&entry, cwd).await;
        info!(session_id = id, turns = session.history.len(), ?how, "session reopened from agent log");

        let show = how == Reopen::Load;
        let handle = self.insert(session).await;
        if show {
            for update in replay {
                handle.relay.send(update);
            }
        }
        handle.relay.send(SessionUpdate::AvailableCommandsUpdate {
            available_commands: self.default_commands(),
        });
        handle.relay.flush().await;
        let session = handle.session.lock().await;
        Ok(self.setup(&session))
    }

    /// Rebuild session state from a recorded log; returns the replay updates.
    async fn rebuild(&self, entry: &IndexEntry, cwd: PathBuf) -> (Session, Vec<SessionUpdate>) {
        let config = &self.ctx.config;
        let mut session = Session::with_id(
            entry.id.clone(),
            cwd,
            config.default_mode_id(),
            config.default_model_id(),
            self.default_commands(),
        );
        session.agent_session_id = Some(entry.id.clone());
        session.title.clone_from(&entry.title);

        let mut tail = LogTail::new(
            LogCursor::at(self.ctx.index.log_path(entry), 0),
            config.relay.tail_read_bytes,
        );
        let events = tail.read_available().await;
        let translator = EventTranslator::new(self.ctx.capabilities().terminal_output);
        let mut replay = Vec::new();
        for event in &events {
            match event.role {
                EventRole::User => session.push_turn(TurnRole::User, &event.content),
                EventRole::Assistant => session.push_turn(TurnRole::Assistant, &event.content),
                EventRole::Tool | EventRole::Other => {}
            }
            replay.extend(translator.replay(&mut session, event));
        }
        // Continue from the end of what was just read on the next prompt.
        session.log = tail.into_cursor();
        if session.title.is_none() {
            session.title = session
                .history
                .iter()
                .find(|t| t.role == TurnRole::User)
                .and_then(|t| title_from_prompt(&t.text));
        }
        (session, replay)
    }

    /// Known sessions, newest first, optionally restricted to `cwd`.
    pub async fn list(&self, cwd: Option<&Path>) -> Vec<SessionSummary> {
        let mut rows = Vec::new();
        let handles: Vec<Arc<SessionHandle>> = self.sessions.read().await.values().cloned().collect();
        for handle in handles {
            let session = handle.session.lock().await;
            rows.push(SessionSummary {
                session_id: session.id.clone(),
                cwd: session.cwd.clone(),
                title: session.title.clone(),
                updated_at: Some(session.updated_at.to_rfc3339()),
            });
        }
        for entry in self.ctx.index.entries().await {
            if rows.iter().any(|r| r.session_id == entry.id) {
                continue;
            }
            rows.push(SessionSummary {
                session_id: entry.id,
                cwd: entry.cwd,
                title: entry.title,
                updated_at: entry.created_at,
            });
        }
        if let Some(cwd) = cwd {
            rows.retain(|r| r.cwd == cwd);
        }
        rows.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        rows
    }

    /// Queue a prompt and wait for its stop reason.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` for an unknown id and
    /// `AppError::ChannelClosed` if the session is closed while the prompt is
    /// queued.
    pub async fn prompt(&self, id: &str, prompt: Vec<ContentBlock>) -> Result<PromptResponse> {
        let handle = self.handle(id).await?;
        handle.cancel.enqueue();
        let result = handle.scheduler.submit(prompt).await;
        if result.is_err() {
            handle.cancel.dequeue();
        }
        result
    }

    /// Cancel the session's running prompt, or the next queued one if it has
    /// not started yet. A no-op if nothing is running or queued.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` for an unknown id.
    pub async fn cancel(&self, id: &str) -> Result<()> {
        let handle = self.handle(id).await?;
        if handle.cancel.cancel() {
            info!(session_id = id, "cancel requested");
        } else {
            debug!(session_id = id, "cancel with no prompt running");
        }
        Ok(())
    }

    /// Switch the session's mode.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` for an unknown id and
    /// `AppError::InvalidArgument` for an unknown mode.
    pub async fn set_mode(&self, id: &str, mode_id: &str) -> Result<()> {
        self.ensure_mode(mode_id)?;
        let handle = self.handle(id).await?;
        let options = {
            let mut session = handle.session.lock().await;
            mode_id.clone_into(&mut session.mode_id);
            self.config_options(&session)
        };
        handle.relay.send(SessionUpdate::CurrentModeUpdate {
            current_mode_id: mode_id.to_owned(),
        });
        handle.relay.send(SessionUpdate::ConfigOptionUpdate { config_options: options });
        Ok(())
    }

    /// Switch the session's model.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` for an unknown id and
    /// `AppError::InvalidArgument` for an unknown model.
    pub async fn set_model(&self, id: &str, model_id: &str) -> Result<()> {
        self.ensure_model(model_id)?;
        let handle = self.handle(id).await?;
        let options = {
            let mut session = handle.session.lock().await;
            model_id.clone_into(&mut session.model_id);
            self.config_options(&session)
        };
        handle.relay.send(SessionUpdate::ConfigOptionUpdate { config_options: options });
        Ok(())
    }

    /// Set one config option and return the full option list.
    ///
    /// Supported ids: `mode`, `model`, `temperature`, `dry_run`, `auto_commit`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` for an unknown id and
    /// `AppError::InvalidArgument` for an unknown option or a bad value.
    pub async fn set_config_option(&self, id: &str, option_id: &str, value: &Value) -> Result<Vec<ConfigOption>> {
        match option_id {
            "mode" => {
                let mode = as_string(option_id, value)?;
                self.set_mode(id, &mode).await?;
            }
            "model" => {
                let model = as_string(option_id, value)?;
                self.set_model(id, &model).await?;
            }
            "temperature" | "dry_run" | "auto_commit" => {
                let handle = self.handle(id).await?;
                let options = {
                    let mut session = handle.session.lock().await;
                    match option_id {
                        "temperature" => session.settings.temperature = as_temperature(value)?,
                        "dry_run" => session.settings.dry_run = Some(as_bool(option_id, value)?),
                        _ => session.settings.auto_commit = Some(as_bool(option_id, value)?),
                    }
                    self.config_options(&session)
                };
                handle.relay.send(SessionUpdate::ConfigOptionUpdate { config_options: options });
            }
            other => {
                return Err(AppError::InvalidArgument(format!("unknown config option '{other}'")));
            }
        }
        let handle = self.handle(id).await?;
        let session = handle.session.lock().await;
        Ok(self.config_options(&session))
    }

    /// Close the session: cancel its run, stop its queue, forget it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` for an unknown id.
    pub async fn close(&self, id: &str) -> Result<()> {
        let handle = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| AppError::UnknownSession(id.to_owned()))?;
        handle.scheduler.close();
        if handle.cancel.cancel() {
            debug!(session_id = id, "prompt cancelled by close");
        }
        handle.relay.flush().await;
        info!(session_id = id, "session closed");
        Ok(())
    }

    /// Close every session. Used when the editor disconnects.
    pub async fn shutdown(&self) {
        let handles: Vec<(String, Arc<SessionHandle>)> = self.sessions.write().await.drain().collect();
        let count = handles.len();
        for (id, handle) in handles {
            handle.scheduler.close();
            let cancelled = handle.cancel.cancel();
            handle.relay.flush().await;
            debug!(session_id = %id, cancelled, "session closed on shutdown");
        }
        info!(count, "all sessions closed");
    }

    /// Look up a live session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::UnknownSession` if `id` is not registered.
    pub async fn handle(&self, id: &str) -> Result<Arc<SessionHandle>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| AppError::UnknownSession(id.to_owned()))
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    async fn register(&self, session: Session) -> SessionSetup {
        let setup = self.setup(&session);
        let commands = session.commands.clone();
        let handle = self.insert(session).await;
        handle.relay.send(SessionUpdate::AvailableCommandsUpdate {
            available_commands: commands,
        });
        setup
    }

    async fn insert(&self, session: Session) -> Arc<SessionHandle> {
        let id = session.id.clone();
        let relay = UpdateRelay::spawn(&id, Arc::clone(&self.ctx.client));
        let session = Arc::new(Mutex::new(session));
        let cancel = Arc::new(CancelSlot::default());
        let runner = SessionRunner::new(
            Arc::clone(&self.ctx),
            Arc::clone(&session),
            relay.clone(),
            Arc::clone(&cancel),
        );
        let scheduler = PromptScheduler::spawn(&id, Arc::new(runner));
        let handle = Arc::new(SessionHandle {
            session,
            relay,
            cancel,
            scheduler,
        });
        if let Some(previous) = self.sessions.write().await.insert(id.clone(), Arc::clone(&handle)) {
            warn!(session_id = %id, "replacing an existing session with the same id");
            previous.scheduler.close();
            if previous.cancel.cancel() {
                debug!(session_id = %id, "replaced session's prompt cancelled");
            }
        }
        handle
    }

    fn default_commands(&self) -> Vec<AvailableCommand> {
        self.ctx
            .config
            .commands
            .iter()
            .map(|(name, description)| AvailableCommand {
                name: name.clone(),
                description: description.clone(),
            })
            .collect()
    }

    fn setup(&self, session: &Session) -> SessionSetup {
        let config = &self.ctx.config;
        SessionSetup {
            session_id: session.id.clone(),
            modes: SessionModeState {
                current_mode_id: session.mode_id.clone(),
                available_modes: config.modes.clone(),
            },
            models: SessionModelState {
                current_model_id: session.model_id.clone(),
                available_models: config.models.clone(),
            },
            config_options: self.config_options(session),
        }
    }

    fn config_options(&self, session: &Session) -> Vec<ConfigOption> {
        let config = &self.ctx.config;
        let agent = &config.agent;
        vec![
            ConfigOption {
                id: "mode".into(),
                name: "Mode".into(),
                current_value: Value::String(session.mode_id.clone()),
                options: config
                    .modes
                    .iter()
                    .map(|m| ConfigOptionValue {
                        value: m.id.clone(),
                        name: m.name.clone(),
                    })
                    .collect(),
            },
            ConfigOption {
                id: "model".into(),
                name: "Model".into(),
                current_value: Value::String(session.model_id.clone()),
                options: config
                    .models
                    .iter()
                    .map(|m| ConfigOptionValue {
                        value: m.model_id.clone(),
                        name: m.name.clone(),
                    })
                    .collect(),
            },
            ConfigOption {
                id: "temperature".into(),
                name: "Temperature".into(),
                current_value: session
                    .settings
                    .temperature
                    .or(agent.temperature)
                    .map_or(Value::Null, |t| Value::from(f64::from(t))),
                options: Vec::new(),
            },
            ConfigOption {
                id: "dry_run".into(),
                name: "Dry run".into(),
                current_value: Value::Bool(session.settings.dry_run.unwrap_or(agent.dry_run)),
                options: Vec::new(),
            },
            ConfigOption {
                id: "auto_commit".into(),
                name: "Auto commit".into(),
                current_value: Value::Bool(session.settings.auto_commit.unwrap_or(agent.auto_commit)),
                options: Vec::new(),
            },
        ]
    }

    fn ensure_mode(&self, mode_id: &str) -> Result<()> {
        if self.ctx.config.modes.iter().any(|m| m.id == mode_id) {
            Ok(())
        } else {
            Err(AppError::InvalidArgument(format!("unknown mode '{mode_id}'")))
        }
    }

    fn ensure_model(&self, model_id: &str) -> Result<()> {
        let config = &self.ctx.config;
        let known = config.models.iter().any(|m| m.model_id == model_id)
            || config.agent.model.as_deref() == Some(model_id);
        if known {
            Ok(())
        } else {
            Err(AppError::InvalidArgument(format!("unknown model '{model_id}'")))
        }
    }
}

fn ensure_absolute(cwd: &Path) -> Result<()> {
    if cwd.is_absolute() {
        Ok(())
    } else {
        Err(AppError::InvalidArgument(format!(
            "cwd must be an absolute path, got '{}'",
            cwd.display()
        )))
    }
}

fn as_string(option_id: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_owned)
        .ok_or_else(|| AppError::InvalidArgument(format!("{option_id} expects a string value")))
}

fn as_bool(option_id: &str, value: &Value) -> Result<bool> {
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s.eq_ignore_ascii_case("true") => Ok(true),
        Value::String(s) if s.eq_ignore_ascii_case("false") => Ok(false),
        _ => Err(AppError::InvalidArgument(format!("{option_id} expects a boolean value"))),
    }
}

#[allow(clippy::cast_possible_truncation)]
fn as_temperature(value: &Value) -> Result<Option<f32>> {
    let raw = match value {
        Value::Null => return Ok(None),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match raw {
        Some(t) if (0.0..=2.0).contains(&t) => Ok(Some(t as f32)),
        _ => Err(AppError::InvalidArgument(
            "temperature expects a number within 0.0..=2.0".into(),
        )),
    }
}
