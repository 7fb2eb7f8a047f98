//! Event translator: turns agent output into `session/update` notifications.

pub mod thought;
pub mod tools;
pub mod translator;

pub use thought::{NoThoughts, RegexThoughtClassifier, ThoughtClassifier};
pub use translator::EventTranslator;

use crate::models::update::SessionUpdate;

/// A stdout chunk routed to the right message channel.
#[derive(Debug, Clone, PartialEq)]
pub struct StdoutRoute {
    /// Notification to send.
    pub update: SessionUpdate,
    /// Whether the chunk was classified as reasoning; thoughts are kept out of
    /// the recorded assistant turn.
    pub thought: bool,
}

/// Route a raw stdout chunk to `agent_message_chunk` or `agent_thought_chunk`.
#[must_use]
pub fn route_stdout(classifier: &dyn ThoughtClassifier, chunk: &str) -> StdoutRoute {
    if classifier.is_thought(chunk) {
        StdoutRoute {
            update: SessionUpdate::thought_text(chunk),
            thought: true,
        }
    } else {
        StdoutRoute {
            update: SessionUpdate::agent_text(chunk),
            thought: false,
        }
    }
}
