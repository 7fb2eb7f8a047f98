//! Per-launch resolution of the agent command line and environment.
//!
//! The supervisor never looks at global configuration or the process
//! environment; everything it needs is captured here in a [`LaunchConfig`].

use std::path::PathBuf;

use crate::config::{AgentSettings, PermissionMode};
use crate::models::session::SessionSettings;

/// Environment variable carrying the permission callback URL.
pub const CALLBACK_URL_ENV: &str = "AGENT_PERMISSION_CALLBACK_URL";

/// Variables that keep the agent's output free of colour and banners.
const QUIET_ENV: &[(&str, &str)] = &[
    ("NO_COLOR", "1"),
    ("FORCE_COLOR", "0"),
    ("TERM", "dumb"),
    ("AGENT_NO_BANNER", "1"),
];

/// Session values that shape one launch.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    /// Working directory.
    pub cwd: PathBuf,
    /// Full prompt text (history transcript included).
    pub prompt: String,
    /// Selected mode id.
    pub mode_id: String,
    /// Selected model id; `default` leaves the agent's choice alone.
    pub model_id: String,
    /// Per-session overrides.
    pub settings: SessionSettings,
    /// Agent session to continue, if any.
    pub resume_id: Option<String>,
    /// Permission callback URL when a bridge is running.
    pub callback_url: Option<String>,
    /// Effective permission policy for this launch.
    pub permission_mode: PermissionMode,
}

/// Fully resolved process invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchConfig {
    /// Executable.
    pub program: String,
    /// Arguments, prompt last.
    pub args: Vec<String>,
    /// Variables added on top of the inherited environment.
    pub env: Vec<(String, String)>,
    /// Working directory.
    pub cwd: PathBuf,
}

impl LaunchConfig {
    /// Build the invocation for `request` from the agent settings.
    #[must_use]
    pub fn resolve(agent: &AgentSettings, request: &LaunchRequest) -> Self {
        let mut args = Vec::new();
        if let Some(path) = &agent.config_path {
            args.push("--config".to_owned());
            args.push(path.display().to_string());
        }
        if request.model_id != "default" && !request.model_id.is_empty() {
            args.push("--model".to_owned());
            args.push(request.model_id.clone());
        }
        if let Some(t) = request.settings.temperature.or(agent.temperature) {
            args.push("--temperature".to_owned());
            args.push(t.to_string());
        }
        args.push("--permission-mode".to_owned());
        args.push(request.permission_mode.as_flag().to_owned());
        if request.settings.dry_run.unwrap_or(agent.dry_run) {
            args.push("--dry-run".to_owned());
        }
        args.push(if request.settings.auto_commit.unwrap_or(agent.auto_commit) {
            "--auto-commit".to_owned()
        } else {
            "--no-auto-commit".to_owned()
        });
        args.extend(agent.extra_args.iter().cloned());
        if let Some(id) = &request.resume_id {
            args.push("--resume".to_owned());
            args.push(id.clone());
        }
        args.push(request.prompt.clone());

        let mut env: Vec<(String, String)> = QUIET_ENV
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        if let Some(url) = &request.callback_url {
            env.push((CALLBACK_URL_ENV.to_owned(), url.clone()));
        }
        env.push(("AGENT_MODEL".to_owned(), request.model_id.clone()));
        env.push(("AGENT_MODE".to_owned(), request.mode_id.clone()));

        Self {
            program: agent.command.clone(),
            args,
            env,
            cwd: request.cwd.clone(),
        }
    }
}
