//! Outbound `session/update` notification shapes.
//!
//! Serialised exactly as the editor protocol expects them on the wire:
//! camelCase field names, a `sessionUpdate` discriminator on updates, and a
//! `type` discriminator on content blocks.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::tool_call::{ToolCallStatus, ToolKind};

/// A piece of prompt or message content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text itself.
        text: String,
    },
    /// Reference to a resource the agent can read itself.
    ResourceLink {
        /// Resource URI (usually `file://…`).
        uri: String,
        /// Display name.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
    /// Resource whose contents are embedded in the prompt.
    Resource {
        /// The embedded resource.
        resource: EmbeddedResource,
    },
    /// Any content type the relay does not interpret (images, audio, …).
    #[serde(other)]
    Unsupported,
}

impl ContentBlock {
    /// Build a text block.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Embedded resource contents.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EmbeddedResource {
    /// Resource URI.
    pub uri: String,
    /// Text contents; binary resources carry none.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// MIME type, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
}

/// Content attached to a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolCallContent {
    /// Regular content block.
    Content {
        /// The block.
        content: ContentBlock,
    },
}

impl ToolCallContent {
    /// Wrap text as tool-call content.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self::Content {
            content: ContentBlock::text(text),
        }
    }
}

/// First announcement of a tool call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    /// Tool-call id.
    pub tool_call_id: String,
    /// Display title.
    pub title: String,
    /// Capability kind.
    pub kind: ToolKind,
    /// Initial status.
    pub status: ToolCallStatus,
    /// Content known at announcement time.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub content: Vec<ToolCallContent>,
    /// Raw tool arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
}

/// Partial update to a previously announced tool call.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallUpdate {
    /// Tool-call id.
    pub tool_call_id: String,
    /// New title.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New kind.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ToolKind>,
    /// New status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ToolCallStatus>,
    /// Replacement content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ToolCallContent>>,
    /// Raw tool arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_input: Option<Value>,
    /// Extension data (live terminal output deltas).
    #[serde(rename = "_meta", default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

impl ToolCallUpdate {
    /// Empty update for `tool_call_id`.
    #[must_use]
    pub fn new(tool_call_id: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            ..Self::default()
        }
    }
}

/// Status of a plan entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanEntryStatus {
    /// Not started.
    Pending,
    /// Being worked on.
    InProgress,
    /// Done.
    Completed,
}

/// Priority of a plan entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PlanEntryPriority {
    /// High priority.
    High,
    /// Medium priority.
    Medium,
    /// Low priority.
    Low,
}

/// One entry of the agent's plan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlanEntry {
    /// Human-readable description.
    pub content: String,
    /// Priority.
    pub priority: PlanEntryPriority,
    /// Status.
    pub status: PlanEntryStatus,
}

/// Slash command advertised to the editor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AvailableCommand {
    /// Command name without the leading slash.
    pub name: String,
    /// Description shown in the picker.
    pub description: String,
}

/// A selectable session mode.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionModeInfo {
    /// Mode id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl SessionModeInfo {
    /// Construct a mode descriptor.
    #[must_use]
    pub fn new(id: &str, name: &str, description: &str) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: Some(description.into()),
        }
    }
}

/// Modes available to a session and the one selected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionModeState {
    /// Selected mode id.
    pub current_mode_id: String,
    /// Available modes.
    pub available_modes: Vec<SessionModeInfo>,
}

/// A selectable model.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ModelInfo {
    /// Model id passed to the agent.
    #[serde(alias = "model_id")]
    pub model_id: String,
    /// Display name.
    pub name: String,
    /// Description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Models available to a session and the one selected.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionModelState {
    /// Selected model id.
    pub current_model_id: String,
    /// Available models.
    pub available_models: Vec<ModelInfo>,
}

/// One allowed value of a select-style config option.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOptionValue {
    /// Wire value.
    pub value: String,
    /// Display name.
    pub name: String,
}

/// A per-session configuration option surfaced to the editor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConfigOption {
    /// Option id (`mode`, `model`, `temperature`, `dry_run`, `auto_commit`).
    pub id: String,
    /// Display name.
    pub name: String,
    /// Current value.
    pub current_value: Value,
    /// Allowed values for select options; empty for free-form values.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<ConfigOptionValue>,
}

/// Body of a `session/update` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(
    tag = "sessionUpdate",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum SessionUpdate {
    /// Replayed user text.
    UserMessageChunk {
        /// Content.
        content: ContentBlock,
    },
    /// Agent response text.
    AgentMessageChunk {
        /// Content.
        content: ContentBlock,
    },
    /// Agent reasoning text.
    AgentThoughtChunk {
        /// Content.
        content: ContentBlock,
    },
    /// New tool call.
    ToolCall(ToolCall),
    /// Update to an existing tool call.
    ToolCallUpdate(ToolCallUpdate),
    /// Full replacement of the agent's plan.
    Plan {
        /// Entries in order.
        entries: Vec<PlanEntry>,
    },
    /// Mode changed.
    CurrentModeUpdate {
        /// New mode id.
        current_mode_id: String,
    },
    /// Slash command list changed.
    AvailableCommandsUpdate {
        /// Commands.
        available_commands: Vec<AvailableCommand>,
    },
    /// Session metadata changed.
    SessionInfoUpdate {
        /// Session title.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        /// RFC 3339 timestamp of the last activity.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        updated_at: Option<String>,
    },
    /// Config options changed.
    ConfigOptionUpdate {
        /// Full option list.
        config_options: Vec<ConfigOption>,
    },
}

impl SessionUpdate {
    /// Agent message text chunk.
    #[must_use]
    pub fn agent_text(text: impl Into<String>) -> Self {
        Self::AgentMessageChunk {
            content: ContentBlock::text(text),
        }
    }

    /// Agent thought text chunk.
    #[must_use]
    pub fn thought_text(text: impl Into<String>) -> Self {
        Self::AgentThoughtChunk {
            content: ContentBlock::text(text),
        }
    }
}

/// Parameters of a `session/update` notification.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionNotification {
    /// Session the update belongs to.
    pub session_id: String,
    /// The update.
    pub update: SessionUpdate,
}
