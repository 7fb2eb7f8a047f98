//! Conversation log events written by the external agent.
//!
//! Each line of the log is one JSON object:
//!
//! ```json
//! {"role":"user","content":"add a test"}
//! {"role":"assistant","content":"","tool_calls":[{"id":"c1","name":"read_file","arguments":{"path":"src/lib.rs"}}]}
//! {"role":"tool","tool_call_id":"c1","name":"run_shell_command","stream":"stdout","content":"partial…"}
//! {"role":"tool","tool_call_id":"c1","name":"read_file","content":"fn main() {}"}
//! ```
//!
//! A `tool` event carrying a `stream` tag is an output delta; without one it
//! is the call's final result.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// Author of a conversation event.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EventRole {
    /// The user's prompt.
    User,
    /// The agent's response, possibly announcing tool calls.
    Assistant,
    /// Tool output or result.
    Tool,
    /// Anything else (system notes, metadata records, untagged objects).
    #[default]
    #[serde(other)]
    Other,
}

/// Output stream of a partial tool result.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StreamTag {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

/// Tool call announced by an assistant event.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ToolCallDescriptor {
    /// Upstream id; may be missing.
    #[serde(default)]
    pub id: Option<String>,
    /// Tool name.
    #[serde(default)]
    pub name: String,
    /// Tool arguments; a JSON-encoded string is accepted too.
    #[serde(default, alias = "args", alias = "input")]
    pub arguments: Value,
}

impl ToolCallDescriptor {
    /// Arguments as a JSON value, decoding string-encoded arguments.
    #[must_use]
    pub fn arguments_value(&self) -> Value {
        match &self.arguments {
            Value::String(raw) => serde_json::from_str(raw).unwrap_or_else(|_| self.arguments.clone()),
            other => other.clone(),
        }
    }
}

/// One parsed line of the conversation log.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ConversationEvent {
    /// Author; records without a role read as [`EventRole::Other`].
    #[serde(default)]
    pub role: EventRole,
    /// Text content, normalised from string / parts-array forms.
    #[serde(default, deserialize_with = "deserialize_content")]
    pub content: String,
    /// Tool calls announced by an assistant event.
    #[serde(default, deserialize_with = "deserialize_null_vec")]
    pub tool_calls: Vec<ToolCallDescriptor>,
    /// Tool-call id a tool event refers to.
    #[serde(default)]
    pub tool_call_id: Option<String>,
    /// Tool name on tool events.
    #[serde(default)]
    pub name: Option<String>,
    /// Stream tag on partial output events.
    #[serde(default)]
    pub stream: Option<StreamTag>,
}

impl ConversationEvent {
    /// Parse one log line; `None` for blank or malformed lines.
    #[must_use]
    pub fn parse_line(line: &str) -> Option<Self> {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return None;
        }
        serde_json::from_str(trimmed).ok()
    }
}

fn deserialize_null_vec<'de, D>(deserializer: D) -> std::result::Result<Vec<ToolCallDescriptor>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<ToolCallDescriptor>>::deserialize(deserializer)?.unwrap_or_default())
}

fn deserialize_content<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(flatten_content(&value))
}

/// Collapse the content shapes agents emit into plain text.
fn flatten_content(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .map(flatten_content)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(map) => map
            .get("text")
            .or_else(|| map.get("content"))
            .map(flatten_content)
            .unwrap_or_default(),
        other => other.to_string(),
    }
}
