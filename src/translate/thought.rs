//! Stdout "thinking" detection.

use regex::Regex;

use crate::{AppError, Result};

/// Decides whether a stdout chunk is agent reasoning rather than reply text.
///
/// Detection on free-form stdout is heuristic; implementations may be wrong
/// in either direction and callers must tolerate that.
pub trait ThoughtClassifier: Send + Sync {
    /// `true` if `chunk` should be shown as an `agent_thought_chunk`.
    fn is_thought(&self, chunk: &str) -> bool;
}

/// Classifies a chunk by matching its first non-empty line against a regex.
#[derive(Debug, Clone)]
pub struct RegexThoughtClassifier {
    pattern: Regex,
}

impl RegexThoughtClassifier {
    /// Compile `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the pattern is not a valid regex.
    pub fn new(pattern: &str) -> Result<Self> {
        let pattern = Regex::new(pattern)
            .map_err(|err| AppError::Config(format!("invalid thought pattern: {err}")))?;
        Ok(Self { pattern })
    }
}

impl ThoughtClassifier for RegexThoughtClassifier {
    fn is_thought(&self, chunk: &str) -> bool {
        chunk
            .lines()
            .find(|line| !line.trim().is_empty())
            .is_some_and(|line| self.pattern.is_match(line))
    }
}

/// Never classifies anything as a thought.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoThoughts;

impl ThoughtClassifier for NoThoughts {
    fn is_thought(&self, _chunk: &str) -> bool {
        false
    }
}
