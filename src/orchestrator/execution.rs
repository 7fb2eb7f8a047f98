//! One prompt execution: launch, stream, tail, translate, report.
//!
//! Live stdout and the tailed conversation log feed a single channel that one
//! consumer drains into the session's [`UpdateRelay`], so the editor sees a
//! single ordered stream no matter which source produced an update.

use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, PoisonError, RwLock};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};

use crate::config::{GlobalConfig, PermissionMode};
use crate::models::event::ConversationEvent;
use crate::models::prompt::{prompt_text, StopReason};
use crate::models::session::{title_from_prompt, Session, TurnRole};
use crate::models::update::{ContentBlock, SessionUpdate};
use crate::orchestrator::launch::{LaunchConfig, LaunchRequest};
use crate::orchestrator::scheduler::PromptExecutor;
use crate::orchestrator::supervisor::{self, ExitOutcome, RunOutcome, SupervisorLimits};
use crate::permission::PermissionBridge;
use crate::relay::{BoxFuture, ClientCapabilities, ProtocolClient, UpdateRelay};
use crate::tailer::{self, DiscoveryPolicy, SessionIndex, TailProgress, TailReport, TailSettings, TailTarget};
use crate::translate::{route_stdout, EventTranslator, RegexThoughtClassifier, ThoughtClassifier};
use crate::Result;

// ── Shared context ────────────────────────────────────────────────────────────

/// Everything prompt executions share across sessions.
pub struct ExecutionContext {
    /// Resolved configuration.
    pub config: Arc<GlobalConfig>,
    /// Editor connection.
    pub client: Arc<dyn ProtocolClient>,
    /// Stdout thought classifier.
    pub classifier: Arc<dyn ThoughtClassifier>,
    /// The agent's session index.
    pub index: SessionIndex,
    capabilities: RwLock<ClientCapabilities>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("index", &self.index)
            .field("capabilities", &self.capabilities())
            .finish_non_exhaustive()
    }
}

impl ExecutionContext {
    /// Build the context with the regex thought classifier from `config`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the thought pattern does not compile.
    pub fn new(config: Arc<GlobalConfig>, client: Arc<dyn ProtocolClient>) -> Result<Self> {
        let classifier = Arc::new(RegexThoughtClassifier::new(&config.relay.thought_pattern)?);
        Ok(Self::with_classifier(config, client, classifier))
    }

    /// Build the context with a custom thought classifier.
    #[must_use]
    pub fn with_classifier(
        config: Arc<GlobalConfig>,
        client: Arc<dyn ProtocolClient>,
        classifier: Arc<dyn ThoughtClassifier>,
    ) -> Self {
        let index = SessionIndex::new(config.agent.home_dir());
        Self {
            config,
            client,
            classifier,
            index,
            capabilities: RwLock::new(ClientCapabilities::default()),
        }
    }

    /// Capabilities recorded at `initialize`.
    #[must_use]
    pub fn capabilities(&self) -> ClientCapabilities {
        *self.capabilities.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the editor's capabilities.
    pub fn set_capabilities(&self, capabilities: ClientCapabilities) {
        *self.capabilities.write().unwrap_or_else(PoisonError::into_inner) = capabilities;
    }

    fn limits(&self) -> SupervisorLimits {
        let relay = &self.config.relay;
        SupervisorLimits {
            chunk_chars: relay.chunk_chars,
            stderr_cap_chars: relay.stderr_cap_chars,
            kill_grace: relay.kill_grace(),
        }
    }

    fn tail_settings(&self) -> TailSettings {
        let relay = &self.config.relay;
        TailSettings {
            discovery: DiscoveryPolicy {
                attempts: relay.discovery_attempts,
                interval: relay.discovery_interval(),
            },
            poll: relay.tail_poll(),
            read_limit: relay.tail_read_bytes,
        }
    }
}

// ── Cancellation slot ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct CancelState {
    token: CancellationToken,
    queued: usize,
    active: bool,
    pending: bool,
}

/// Cancellation state shared by a session's registry handle and its runner.
///
/// A cancel that arrives while a prompt is queued but not yet started is held
/// and applied when that prompt begins, so it never launches the agent. A
/// cancel with nothing running or queued is dropped.
#[derive(Debug, Default)]
pub struct CancelSlot(StdMutex<CancelState>);

impl CancelSlot {
    fn state(&self) -> MutexGuard<'_, CancelState> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a prompt entering the session queue.
    pub fn enqueue(&self) {
        self.state().queued += 1;
    }

    /// Undo [`CancelSlot::enqueue`] for a prompt the queue refused.
    pub fn dequeue(&self) {
        let mut state = self.state();
        state.queued = state.queued.saturating_sub(1);
    }

    /// Start an execution with a fresh token.
    ///
    /// The token is already cancelled if a cancel arrived while the prompt
    /// was waiting. The run ends when the returned guard drops.
    #[must_use]
    pub fn begin(self: &Arc<Self>) -> ActiveRun {
        let mut state = self.state();
        state.queued = state.queued.saturating_sub(1);
        state.active = true;
        state.token = CancellationToken::new();
        if std::mem::take(&mut state.pending) {
            state.token.cancel();
        }
        ActiveRun {
            slot: Arc::clone(self),
            token: state.token.clone(),
        }
    }

    /// Cancel the running execution, or the next one if a prompt is queued.
    ///
    /// Returns `false` when there was nothing to cancel.
    #[must_use = "tells whether a prompt was running or queued"]
    pub fn cancel(&self) -> bool {
        let mut state = self.state();
        if state.active {
            state.token.cancel();
            true
        } else if state.queued > 0 {
            state.pending = true;
            true
        } else {
            false
        }
    }
}

/// Marks one execution as running until dropped.
#[derive(Debug)]
pub struct ActiveRun {
    slot: Arc<CancelSlot>,
    token: CancellationToken,
}

impl ActiveRun {
    /// Token fired by [`CancelSlot::cancel`] during this execution.
    #[must_use]
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for ActiveRun {
    fn drop(&mut self) {
        self.slot.state().active = false;
    }
}

// ── Runner ────────────────────────────────────────────────────────────────────

enum RunSignal {
    Stdout(String),
    Event(ConversationEvent),
}

/// Executes prompts for one session.
#[derive(Clone)]
pub struct SessionRunner {
    ctx: Arc<ExecutionContext>,
    session: Arc<Mutex<Session>>,
    relay: UpdateRelay,
    cancel: Arc<CancelSlot>,
}

impl SessionRunner {
    /// Runner over shared session state.
    #[must_use]
    pub fn new(
        ctx: Arc<ExecutionContext>,
        session: Arc<Mutex<Session>>,
        relay: UpdateRelay,
        cancel: Arc<CancelSlot>,
    ) -> Self {
        Self {
            ctx,
            session,
            relay,
            cancel,
        }
    }

    /// Run one prompt to completion.
    pub async fn run(&self, prompt: Vec<ContentBlock>) -> StopReason {
        let span = info_span!("prompt", session_id = %self.relay.session_id());
        self.run_inner(prompt).instrument(span).await
    }

    #[allow(clippy::too_many_lines)]
    async fn run_inner(&self, prompt: Vec<ContentBlock>) -> StopReason {
        let active = self.cancel.begin();
        let cancel = active.token().clone();
        if cancel.is_cancelled() {
            info!("prompt cancelled before launch");
            return StopReason::Cancelled;
        }
        let text = prompt_text(&prompt);
        let relay_cfg = &self.ctx.config.relay;

        // Snapshot what the launch needs, then release the lock for the run.
        let (cwd, request_base, known_log, first_prompt, always_allowed) = {
            let mut session = self.session.lock().await;
            session.prompt_active = true;
            let transcript = if session.agent_session_id.is_none() {
                session.transcript(relay_cfg.history_max_turns, relay_cfg.history_max_chars)
            } else {
                None
            };
            let full_prompt = match transcript {
                Some(history) => format!("Conversation so far:\n\n{history}\n\nCurrent request:\n\n{text}"),
                None => text.clone(),
            };
            session.push_turn(TurnRole::User, &text);
            let request = LaunchRequest {
                cwd: session.cwd.clone(),
                prompt: full_prompt,
                mode_id: session.mode_id.clone(),
                model_id: session.model_id.clone(),
                settings: session.settings.clone(),
                resume_id: session.agent_session_id.clone(),
                callback_url: None,
                permission_mode: self.ctx.config.agent.permission_mode,
            };
            let known_log = session.log.path.is_some().then(|| session.log.clone());
            (
                session.cwd.clone(),
                request,
                known_log,
                session.title.is_none(),
                session.always_allowed.clone(),
            )
        };

        if !workspace_exists(&cwd).await {
            warn!(cwd = %cwd.display(), "workspace not found, not launching agent");
            self.relay.send(SessionUpdate::agent_text(format!(
                "Workspace not found: {}",
                cwd.display()
            )));
            self.finish("", None, always_allowed, first_prompt.then_some(text.as_str()))
                .await;
            return StopReason::EndTurn;
        }

        let bridge = self.start_bridge(&cancel, always_allowed.clone()).await;
        let mut request = request_base;
        match &bridge {
            Some(bridge) => request.callback_url = Some(bridge.url().to_owned()),
            None if request.permission_mode == PermissionMode::External => {
                request.permission_mode = PermissionMode::Deny;
            }
            None => {}
        }
        let launch = LaunchConfig::resolve(&self.ctx.config.agent, &request);

        let target = match known_log {
            Some(cursor) => TailTarget::Known(cursor),
            None => TailTarget::Discover {
                prior: self.ctx.index.snapshot_ids().await,
            },
        };

        let (tx, rx) = mpsc::unbounded_channel::<RunSignal>();
        let tail_cancel = cancel.child_token();
        let tail_tx = tx.clone();
        let progress = TailProgress::default();
        let tail_task = tokio::spawn(tailer::follow(
            self.ctx.index.clone(),
            cwd.clone(),
            target,
            self.ctx.tail_settings(),
            tail_cancel.clone(),
            progress.clone(),
            move |event| {
                let _ = tail_tx.send(RunSignal::Event(event));
            },
        ));

        let out_tx = tx;
        let producer = async {
            let outcome = supervisor::run(&launch, self.ctx.limits(), &cancel, move |chunk| {
                let _ = out_tx.send(RunSignal::Stdout(chunk));
            })
            .await;
            tail_cancel.cancel();
            let mut tail_task = tail_task;
            let report = match tokio::time::timeout(relay_cfg.tail_shutdown(), &mut tail_task).await {
                Ok(Ok(report)) => Some(report),
                Ok(Err(err)) => {
                    warn!(%err, "conversation tailer failed");
                    Some(progress.snapshot())
                }
                Err(_) => {
                    warn!("conversation tailer did not stop in time, aborting");
                    tail_task.abort();
                    Some(progress.snapshot())
                }
            };
            (outcome, report)
        };
        let ((outcome, report), assistant_text) = tokio::join!(producer, self.consume(rx, &cancel));

        let cancelled = outcome.cancelled || cancel.is_cancelled();
        if !cancelled {
            if let Some(message) = outcome_message(&launch.program, &outcome) {
                self.relay.send(SessionUpdate::agent_text(message));
            }
        }

        let always_allowed = match bridge {
            Some(bridge) => bridge.stop().await,
            None => always_allowed,
        };
        self.finish(&assistant_text, report, always_allowed, first_prompt.then_some(text.as_str()))
            .await;

        if cancelled {
            info!("prompt cancelled");
            StopReason::Cancelled
        } else {
            StopReason::EndTurn
        }
    }

    async fn start_bridge(
        &self,
        cancel: &CancellationToken,
        always_allowed: HashSet<String>,
    ) -> Option<PermissionBridge> {
        if self.ctx.config.agent.permission_mode != PermissionMode::External {
            return None;
        }
        match PermissionBridge::start(
            self.relay.session_id(),
            Arc::clone(&self.ctx.client),
            always_allowed,
            cancel,
        )
        .await
        {
            Ok(bridge) => Some(bridge),
            Err(err) => {
                warn!(%err, "permission bridge unavailable, agent prompts will be denied");
                None
            }
        }
    }

    /// Drain run signals into the relay; returns the assistant reply text.
    async fn consume(&self, mut rx: mpsc::UnboundedReceiver<RunSignal>, cancel: &CancellationToken) -> String {
        let translator = EventTranslator::new(self.ctx.capabilities().terminal_output);
        let mut assistant_text = String::new();
        while let Some(signal) = rx.recv().await {
            match signal {
                RunSignal::Stdout(chunk) => {
                    if cancel.is_cancelled() {
                        continue;
                    }
                    let route = route_stdout(self.ctx.classifier.as_ref(), &chunk);
                    if !route.thought {
                        assistant_text.push_str(&chunk);
                    }
                    self.relay.send(route.update);
                }
                RunSignal::Event(event) => {
                    let updates = {
                        let mut session = self.session.lock().await;
                        translator.translate(&mut session, &event)
                    };
                    for update in updates {
                        self.relay.send(update);
                    }
                }
            }
        }
        assistant_text
    }

    async fn finish(
        &self,
        assistant_text: &str,
        report: Option<TailReport>,
        always_allowed: HashSet<String>,
        first_prompt: Option<&str>,
    ) {
        {
            let mut session = self.session.lock().await;
            session.push_turn(TurnRole::Assistant, assistant_text);
            if let Some(report) = report {
                if report.cursor.path.is_some() {
                    session.log = report.cursor;
                }
                if let Some(id) = report.agent_session_id {
                    session.agent_session_id = Some(id);
                }
            }
            session.always_allowed = always_allowed;
            session.prompt_active = false;
            session.updated_at = Utc::now();
            if let Some(title) = first_prompt.and_then(title_from_prompt) {
                session.title = Some(title.clone());
                self.relay.send(SessionUpdate::SessionInfoUpdate {
                    title: Some(title),
                    updated_at: Some(session.updated_at.to_rfc3339()),
                });
            }
        }
        self.relay.flush().await;
    }
}

impl PromptExecutor for SessionRunner {
    fn execute(&self, prompt: Vec<ContentBlock>) -> BoxFuture<'static, StopReason> {
        let runner = self.clone();
        Box::pin(async move { runner.run(prompt).await })
    }
}

async fn workspace_exists(cwd: &Path) -> bool {
    tokio::fs::metadata(cwd).await.is_ok_and(|meta| meta.is_dir())
}

/// Trailing notification for an abnormal run, if any.
fn outcome_message(program: &str, outcome: &RunOutcome) -> Option<String> {
    let headline = match &outcome.exit {
        ExitOutcome::Success => return None,
        ExitOutcome::LaunchFailed(err) => return Some(format!("\n\nFailed to launch agent `{program}`: {err}")),
        ExitOutcome::ExitCode(code) => format!("\n\nAgent exited with code {code}."),
        ExitOutcome::Signal(signal) => format!("\n\nAgent was terminated by signal {signal}."),
    };
    let stderr = outcome.stderr.trim();
    if stderr.is_empty() {
        Some(headline)
    } else {
        Some(format!("{headline}\n\n```\n{stderr}\n```"))
    }
}
