//! Tool-call display state tracked per session.

use serde::{Deserialize, Serialize};

/// Capability kind shown next to a tool call in the editor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// Reads files or directory listings.
    Read,
    /// Searches file contents, names, or the web.
    Search,
    /// Creates or modifies files.
    Edit,
    /// Moves or renames files.
    Move,
    /// Removes files.
    Delete,
    /// Runs a shell command.
    Execute,
    /// Internal reasoning, plans, or todo bookkeeping.
    Think,
    /// Anything not covered above.
    Other,
}

impl ToolKind {
    /// Whether tools of this kind produce incremental output worth streaming.
    #[must_use]
    pub fn streams_output(self) -> bool {
        matches!(self, Self::Execute)
    }

    /// Verb used when building a display title.
    #[must_use]
    pub fn verb(self) -> Option<&'static str> {
        match self {
            Self::Read => Some("Read"),
            Self::Search => Some("Search"),
            Self::Edit => Some("Edit"),
            Self::Move => Some("Move"),
            Self::Delete => Some("Delete"),
            Self::Execute => Some("Run"),
            Self::Think | Self::Other => None,
        }
    }
}

/// Lifecycle status of a tool call.
///
/// Transitions are monotonic: `pending → in_progress → completed | failed`.
/// A call may skip `in_progress`, but never moves backwards.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallStatus {
    /// Announced but not started.
    Pending,
    /// Running; output may still arrive.
    InProgress,
    /// Finished successfully.
    Completed,
    /// Finished with an error.
    Failed,
}

impl ToolCallStatus {
    /// Whether the call has finished.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress | Self::Completed | Self::Failed)
                | (Self::InProgress, Self::Completed | Self::Failed)
        )
    }
}

/// One tool call the agent reported, keyed by its id within a session.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    /// Tool-call id (upstream or generated).
    pub id: String,
    /// Upstream tool name, if known.
    pub name: Option<String>,
    /// Display title.
    pub title: String,
    /// Capability kind.
    pub kind: ToolKind,
    /// Current status.
    pub status: ToolCallStatus,
    /// Accumulated streaming output; emptied when the call finishes.
    pub output: String,
    /// Order of first sighting within the session.
    pub seq: u64,
}

impl ToolCallRecord {
    /// Construct a new record in `status`.
    #[must_use]
    pub fn new(
        id: String,
        name: Option<String>,
        title: String,
        kind: ToolKind,
        status: ToolCallStatus,
    ) -> Self {
        Self {
            id,
            name,
            title,
            kind,
            status,
            output: String::new(),
            seq: 0,
        }
    }

    /// Move to `next` if the transition is allowed; returns whether it moved.
    pub fn advance(&mut self, next: ToolCallStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}
