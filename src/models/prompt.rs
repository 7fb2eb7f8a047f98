//! Prompt request content and stop reasons.

use serde::{Deserialize, Serialize};

use crate::models::update::ContentBlock;

/// Terminal classification of one prompt execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The agent finished its turn (successfully or not).
    EndTurn,
    /// The editor cancelled the turn.
    Cancelled,
}

/// Response to `session/prompt`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    /// Why the turn ended.
    pub stop_reason: StopReason,
}

/// Flatten prompt content into the text handed to the agent.
///
/// Text blocks are joined with blank lines; resource links become `@uri`
/// mentions; embedded text resources are inlined in a fenced block.
/// Content the relay cannot express as text is dropped.
#[must_use]
pub fn prompt_text(blocks: &[ContentBlock]) -> String {
    let mut parts: Vec<String> = Vec::with_capacity(blocks.len());
    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                if !text.is_empty() {
                    parts.push(text.clone());
                }
            }
            ContentBlock::ResourceLink { uri, .. } => {
                parts.push(format!("@{}", display_uri(uri)));
            }
            ContentBlock::Resource { resource } => {
                if let Some(text) = &resource.text {
                    parts.push(format!(
                        "{}:\n```\n{}\n```",
                        display_uri(&resource.uri),
                        text.trim_end()
                    ));
                } else {
                    parts.push(format!("@{}", display_uri(&resource.uri)));
                }
            }
            ContentBlock::Unsupported => {}
        }
    }
    parts.join("\n\n")
}

/// Strip the `file://` scheme so the agent sees a plain path.
fn display_uri(uri: &str) -> &str {
    uri.strip_prefix("file://").unwrap_or(uri)
}
