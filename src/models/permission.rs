//! Permission prompts: the agent-facing callback payloads and the
//! editor-facing `session/request_permission` shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::update::ToolCallUpdate;

/// Kind of a permission option offered to the editor.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOptionKind {
    /// Allow this one request.
    AllowOnce,
    /// Allow this and future requests for the same tool.
    AllowAlways,
    /// Reject this one request.
    RejectOnce,
}

/// One choice offered to the editor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PermissionOption {
    /// Id echoed back in the selected outcome.
    pub option_id: String,
    /// Label.
    pub name: String,
    /// Kind.
    pub kind: PermissionOptionKind,
}

impl PermissionOption {
    /// Construct an option.
    #[must_use]
    pub fn new(option_id: impl Into<String>, name: impl Into<String>, kind: PermissionOptionKind) -> Self {
        Self {
            option_id: option_id.into(),
            name: name.into(),
            kind,
        }
    }
}

/// Parameters of `session/request_permission`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RequestPermissionRequest {
    /// Session asking.
    pub session_id: String,
    /// Tool call the question is about.
    pub tool_call: ToolCallUpdate,
    /// Choices.
    pub options: Vec<PermissionOption>,
}

/// Editor's answer to a permission request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "outcome", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum RequestPermissionOutcome {
    /// The prompt was dismissed or the turn was cancelled.
    Cancelled,
    /// The user picked an option.
    Selected {
        /// Picked option id.
        option_id: String,
    },
}

/// Result wrapper of `session/request_permission`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RequestPermissionResponse {
    /// The outcome.
    pub outcome: RequestPermissionOutcome,
}

/// Request body the agent POSTs to the permission callback endpoint.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CallbackRequest {
    /// May the agent run a tool?
    PermissionRequest {
        /// Tool name.
        #[serde(default)]
        tool_name: Option<String>,
        /// Tool-call id, when the agent already assigned one.
        #[serde(default)]
        tool_call_id: Option<String>,
        /// Description of the action.
        #[serde(default, alias = "description")]
        action: Option<String>,
        /// Raw tool arguments.
        #[serde(default)]
        input: Option<Value>,
    },
    /// Yes/no question.
    Confirm {
        /// Question text.
        #[serde(default)]
        message: String,
    },
    /// Pick one of several choices.
    Select {
        /// Question text.
        #[serde(default)]
        message: String,
        /// Choices in display order.
        #[serde(default)]
        choices: Vec<String>,
    },
    /// Free-text answer (unsupported; always denied).
    Input {
        /// Question text.
        #[serde(default)]
        message: String,
    },
}

/// Response body returned to the agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallbackResponse {
    /// Whether the action is allowed.
    pub allowed: bool,
    /// Short explanation.
    pub reason: String,
    /// Chosen value for `select` prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choice: Option<String>,
    /// Entered value for `input` prompts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl CallbackResponse {
    /// Allowed, with `reason`.
    #[must_use]
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reason: reason.into(),
            choice: None,
            value: None,
        }
    }

    /// Denied, with `reason`.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: reason.into(),
            choice: None,
            value: None,
        }
    }
}
