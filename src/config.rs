//! Global configuration parsing, validation, and environment overrides.

use std::collections::{BTreeMap, HashSet};
use std::fmt::{Display, Formatter};
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::models::update::{ModelInfo, SessionModeInfo};
use crate::{AppError, Result};

/// How the external agent's permission prompts are answered.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PermissionMode {
    /// Relay each prompt to the editor through the local permission bridge.
    #[default]
    External,
    /// The agent decides on its own; no bridge is started.
    Auto,
    /// Every prompt is refused by the agent itself.
    Deny,
}

impl PermissionMode {
    /// Value passed to the agent's `--permission-mode` flag.
    #[must_use]
    pub fn as_flag(self) -> &'static str {
        match self {
            Self::External => "external",
            Self::Auto => "auto",
            Self::Deny => "deny",
        }
    }
}

impl Display for PermissionMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_flag())
    }
}

impl FromStr for PermissionMode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "external" => Ok(Self::External),
            "auto" => Ok(Self::Auto),
            "deny" => Ok(Self::Deny),
            other => Err(AppError::Config(format!(
                "unknown permission mode '{other}' (expected external, auto or deny)"
            ))),
        }
    }
}

/// Launch options for the external agent process.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct AgentSettings {
    /// Agent executable (resolved through `PATH` when not absolute).
    pub command: String,
    /// Agent-side configuration file passed through `--config`.
    pub config_path: Option<PathBuf>,
    /// Default model; sessions may override it.
    pub model: Option<String>,
    /// Sampling temperature passed through `--temperature`.
    pub temperature: Option<f32>,
    /// Permission policy.
    pub permission_mode: PermissionMode,
    /// Ask the agent not to modify files.
    pub dry_run: bool,
    /// Let the agent commit its own edits.
    pub auto_commit: bool,
    /// Extra arguments appended verbatim before the prompt.
    pub extra_args: Vec<String>,
    /// Directory holding the agent's `sessions/index.json`; defaults to `~/.agent`.
    pub home: Option<PathBuf>,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            command: "agent".into(),
            config_path: None,
            model: None,
            temperature: None,
            permission_mode: PermissionMode::External,
            dry_run: false,
            auto_commit: false,
            extra_args: Vec::new(),
            home: None,
        }
    }
}

impl AgentSettings {
    /// Resolve the agent home directory.
    ///
    /// Falls back to `$HOME/.agent` (or `%USERPROFILE%\.agent`), and finally
    /// to `.agent` relative to the process directory.
    #[must_use]
    pub fn home_dir(&self) -> PathBuf {
        if let Some(home) = &self.home {
            return home.clone();
        }
        std::env::var_os("HOME")
            .or_else(|| std::env::var_os("USERPROFILE"))
            .map_or_else(|| PathBuf::from(".agent"), |h| PathBuf::from(h).join(".agent"))
    }
}

/// Relay tunables: chunk sizes, caps, and timing windows.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "snake_case")]
pub struct RelaySettings {
    /// Maximum characters carried by a single stdout text notification.
    pub chunk_chars: usize,
    /// Characters of stderr retained for the abnormal-exit report.
    pub stderr_cap_chars: usize,
    /// Grace window between SIGTERM and SIGKILL on cancellation.
    pub kill_grace_ms: u64,
    /// Session index polls before log discovery gives up.
    pub discovery_attempts: u32,
    /// Delay between session index polls.
    pub discovery_interval_ms: u64,
    /// Delay between conversation log reads.
    pub tail_poll_ms: u64,
    /// Maximum bytes consumed from the log per read.
    pub tail_read_bytes: usize,
    /// How long to wait for the tailer after the process exits.
    pub tail_shutdown_ms: u64,
    /// Maximum history turns replayed into a new prompt.
    pub history_max_turns: usize,
    /// Maximum history characters replayed into a new prompt.
    pub history_max_chars: usize,
    /// Regex deciding whether a stdout chunk is agent "thinking".
    pub thought_pattern: String,
}

/// Default pattern for the stdout thought classifier.
pub const DEFAULT_THOUGHT_PATTERN: &str = r"(?i)^\s*(?:\[?(?:thinking|thought|reasoning)\]?\s*[:.…]|💭)";

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            chunk_chars: 4000,
            stderr_cap_chars: 8000,
            kill_grace_ms: 2000,
            discovery_attempts: 40,
            discovery_interval_ms: 200,
            tail_poll_ms: 250,
            tail_read_bytes: 64 * 1024,
            tail_shutdown_ms: 2000,
            history_max_turns: 20,
            history_max_chars: 12_000,
            thought_pattern: DEFAULT_THOUGHT_PATTERN.into(),
        }
    }
}

impl RelaySettings {
    /// Grace window as a [`Duration`].
    #[must_use]
    pub fn kill_grace(&self) -> Duration {
        Duration::from_millis(self.kill_grace_ms)
    }

    /// Discovery poll interval as a [`Duration`].
    #[must_use]
    pub fn discovery_interval(&self) -> Duration {
        Duration::from_millis(self.discovery_interval_ms)
    }

    /// Tail poll interval as a [`Duration`].
    #[must_use]
    pub fn tail_poll(&self) -> Duration {
        Duration::from_millis(self.tail_poll_ms)
    }

    /// Tailer shutdown bound as a [`Duration`].
    #[must_use]
    pub fn tail_shutdown(&self) -> Duration {
        Duration::from_millis(self.tail_shutdown_ms)
    }
}

fn default_modes() -> Vec<SessionModeInfo> {
    vec![
        SessionModeInfo::new("code", "Code", "Edit files and run commands"),
        SessionModeInfo::new("ask", "Ask", "Answer questions without changing files"),
        SessionModeInfo::new("architect", "Architect", "Plan changes before editing"),
    ]
}

fn default_models() -> Vec<ModelInfo> {
    vec![ModelInfo {
        model_id: "default".into(),
        name: "Agent default".into(),
        description: None,
    }]
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default, rename_all = "snake_case")]
pub struct GlobalConfig {
    /// External agent launch options.
    pub agent: AgentSettings,
    /// Relay tunables.
    pub relay: RelaySettings,
    /// Modes advertised to new sessions; the first one is the default.
    pub modes: Vec<SessionModeInfo>,
    /// Models advertised to new sessions; the first one is the default.
    pub models: Vec<ModelInfo>,
    /// Slash commands advertised to the editor (name → description).
    pub commands: BTreeMap<String, String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            agent: AgentSettings::default(),
            relay: RelaySettings::default(),
            modes: default_modes(),
            models: default_models(),
            commands: BTreeMap::new(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `AGENT_RELAY_*` overrides looked up through `lookup`.
    ///
    /// Called once at start-up; nothing else in the crate reads the process
    /// environment for agent settings.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if an override value does not parse or the
    /// resulting configuration fails validation.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(command) = lookup("AGENT_RELAY_COMMAND") {
            self.agent.command = command;
        }
        if let Some(model) = lookup("AGENT_RELAY_MODEL") {
            self.agent.model = Some(model);
        }
        if let Some(path) = lookup("AGENT_RELAY_CONFIG_PATH") {
            self.agent.config_path = Some(PathBuf::from(path));
        }
        if let Some(mode) = lookup("AGENT_RELAY_PERMISSION_MODE") {
            self.agent.permission_mode = mode.parse()?;
        }
        if let Some(raw) = lookup("AGENT_RELAY_TEMPERATURE") {
            let value = raw.trim().parse::<f32>().map_err(|err| {
                AppError::Config(format!("AGENT_RELAY_TEMPERATURE '{raw}' invalid: {err}"))
            })?;
            self.agent.temperature = Some(value);
        }
        self.validate()
    }

    /// Model selected for new sessions.
    #[must_use]
    pub fn default_model_id(&self) -> String {
        self.agent
            .model
            .clone()
            .or_else(|| self.models.first().map(|m| m.model_id.clone()))
            .unwrap_or_else(|| "default".into())
    }

    /// Mode selected for new sessions.
    #[must_use]
    pub fn default_mode_id(&self) -> String {
        self.modes
            .first()
            .map_or_else(|| "code".into(), |m| m.id.clone())
    }

    fn validate(&self) -> Result<()> {
        if self.agent.command.trim().is_empty() {
            return Err(AppError::Config("agent.command must not be empty".into()));
        }
        if let Some(t) = self.agent.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(AppError::Config(format!(
                    "agent.temperature must be within 0.0..=2.0, got {t}"
                )));
            }
        }

        let relay = &self.relay;
        for (name, value) in [
            ("relay.chunk_chars", relay.chunk_chars),
            ("relay.stderr_cap_chars", relay.stderr_cap_chars),
            ("relay.tail_read_bytes", relay.tail_read_bytes),
        ] {
            if value == 0 {
                return Err(AppError::Config(format!("{name} must be greater than zero")));
            }
        }
        if relay.discovery_attempts == 0 {
            return Err(AppError::Config(
                "relay.discovery_attempts must be greater than zero".into(),
            ));
        }
        regex::Regex::new(&relay.thought_pattern).map_err(|err| {
            AppError::Config(format!("relay.thought_pattern is not a valid regex: {err}"))
        })?;

        if self.modes.is_empty() {
            return Err(AppError::Config("at least one mode must be configured".into()));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.modes.iter().find(|m| !seen.insert(m.id.as_str())) {
            return Err(AppError::Config(format!("duplicate mode id '{}'", dup.id)));
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.models.iter().find(|m| !seen.insert(m.model_id.as_str())) {
            return Err(AppError::Config(format!(
                "duplicate model id '{}'",
                dup.model_id
            )));
        }

        Ok(())
    }
}
