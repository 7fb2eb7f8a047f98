//! Session model and history helpers.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::tool_call::ToolCallRecord;
use crate::models::update::AvailableCommand;

/// Author of a history turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    /// The editor user.
    User,
    /// The agent.
    Assistant,
}

impl TurnRole {
    fn label(self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Assistant => "Assistant",
        }
    }
}

/// One role-tagged text turn of the conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HistoryTurn {
    /// Author.
    pub role: TurnRole,
    /// Text.
    pub text: String,
}

/// Read position inside the agent's conversation log.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogCursor {
    /// Log file, once discovered.
    pub path: Option<PathBuf>,
    /// Bytes already consumed; never decreases for a given path.
    pub offset: u64,
    /// Bytes of an unterminated line left over from the last read.
    pub remainder: Vec<u8>,
}

impl LogCursor {
    /// Cursor positioned at `offset` of `path`.
    #[must_use]
    pub fn at(path: PathBuf, offset: u64) -> Self {
        Self {
            path: Some(path),
            offset,
            remainder: Vec::new(),
        }
    }
}

/// Per-session values of the free-form config options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionSettings {
    /// Temperature override.
    pub temperature: Option<f32>,
    /// Dry-run override.
    pub dry_run: Option<bool>,
    /// Auto-commit override.
    pub auto_commit: Option<bool>,
}

/// One logical conversation bound to a fixed working directory.
#[derive(Debug, Clone)]
pub struct Session {
    /// Opaque id.
    pub id: String,
    /// Absolute working directory; immutable.
    pub cwd: PathBuf,
    /// Selected mode id.
    pub mode_id: String,
    /// Selected model id.
    pub model_id: String,
    /// Per-session option overrides.
    pub settings: SessionSettings,
    /// Advertised slash commands.
    pub commands: Vec<AvailableCommand>,
    /// Conversation turns in insertion order.
    pub history: Vec<HistoryTurn>,
    /// Tool calls keyed by id.
    pub tool_calls: HashMap<String, ToolCallRecord>,
    /// Tool calls currently streaming output.
    pub streaming: HashSet<String>,
    /// Conversation log position.
    pub log: LogCursor,
    /// Agent-side session id (from its index), once known.
    pub agent_session_id: Option<String>,
    /// Tools the user chose to always allow.
    pub always_allowed: HashSet<String>,
    /// Display title.
    pub title: Option<String>,
    /// A prompt execution currently owns the session's run state.
    pub prompt_active: bool,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last activity timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Construct a new session with a generated identifier.
    #[must_use]
    pub fn new(cwd: PathBuf, mode_id: String, model_id: String, commands: Vec<AvailableCommand>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), cwd, mode_id, model_id, commands)
    }

    /// Construct a new session with a known identifier.
    #[must_use]
    pub fn with_id(
        id: String,
        cwd: PathBuf,
        mode_id: String,
        model_id: String,
        commands: Vec<AvailableCommand>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            cwd,
            mode_id,
            model_id,
            settings: SessionSettings::default(),
            commands,
            history: Vec::new(),
            tool_calls: HashMap::new(),
            streaming: HashSet::new(),
            log: LogCursor::default(),
            agent_session_id: None,
            always_allowed: HashSet::new(),
            title: None,
            prompt_active: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Fork into an independent session in `cwd`.
    ///
    /// History, mode, model, settings, and commands are copied by value; run
    /// state (tool calls, log cursor, agent session) starts fresh.
    #[must_use]
    pub fn fork(&self, cwd: PathBuf) -> Self {
        let mut forked = Self::new(
            cwd,
            self.mode_id.clone(),
            self.model_id.clone(),
            self.commands.clone(),
        );
        forked.history = self.history.clone();
        forked.settings = self.settings.clone();
        forked.title = self.title.clone();
        forked
    }

    /// Append a turn, skipping empty text.
    pub fn push_turn(&mut self, role: TurnRole, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }
        self.history.push(HistoryTurn {
            role,
            text: text.to_owned(),
        });
        self.updated_at = Utc::now();
    }

    /// Render the most recent turns that fit both bounds as a transcript.
    ///
    /// Turns are chosen newest-first and rendered oldest-first. Returns `None`
    /// when nothing fits.
    #[must_use]
    pub fn transcript(&self, max_turns: usize, max_chars: usize) -> Option<String> {
        let mut picked: Vec<String> = Vec::new();
        let mut used = 0usize;
        for turn in self.history.iter().rev().take(max_turns) {
            let line = format!("{}: {}", turn.role.label(), turn.text);
            let len = line.chars().count();
            if used + len > max_chars {
                break;
            }
            used += len;
            picked.push(line);
        }
        if picked.is_empty() {
            return None;
        }
        picked.reverse();
        Some(picked.join("\n\n"))
    }
}

/// Derive a session title from the first prompt: first non-empty line, at
/// most 80 characters.
#[must_use]
pub fn title_from_prompt(prompt: &str) -> Option<String> {
    let line = prompt.lines().map(str::trim).find(|l| !l.is_empty())?;
    if line.chars().count() <= 80 {
        return Some(line.to_owned());
    }
    let mut title: String = line.chars().take(79).collect();
    title.push('…');
    Some(title)
}
