//! Conversation tailer: finds the agent's per-run log and streams new events.

pub mod discovery;
pub mod log_tail;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info_span, Instrument};

pub use discovery::{discover, DiscoveryPolicy, IndexEntry, SessionIndex};
pub use log_tail::{run_tail, LogTail};

use crate::models::event::ConversationEvent;
use crate::models::session::LogCursor;

/// Where the log of the current run is.
#[derive(Debug, Clone)]
pub enum TailTarget {
    /// Log already known from an earlier run; continue from the cursor.
    Known(LogCursor),
    /// First run of the session: look for a new index entry.
    Discover {
        /// Index ids present just before launch.
        prior: HashSet<String>,
    },
}

/// Timing knobs for [`follow`].
#[derive(Debug, Clone, Copy)]
pub struct TailSettings {
    /// Discovery retry budget.
    pub discovery: DiscoveryPolicy,
    /// Delay between log reads.
    pub poll: Duration,
    /// Maximum bytes per read.
    pub read_limit: usize,
}

/// What a finished [`follow`] learned.
#[derive(Debug, Clone, Default)]
pub struct TailReport {
    /// Cursor to persist on the session.
    pub cursor: LogCursor,
    /// Agent-side session id, when discovery found one.
    pub agent_session_id: Option<String>,
}

/// Shared view of how far a tail has got.
///
/// Updated after every delivered batch, so a caller that has to abort the
/// tail task still knows which bytes were already turned into events.
#[derive(Debug, Clone, Default)]
pub struct TailProgress(Arc<Mutex<TailReport>>);

impl TailProgress {
    /// The report as of the last delivered batch.
    #[must_use]
    pub fn snapshot(&self) -> TailReport {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Record the cursor just past the last delivered event.
    pub fn set_cursor(&self, cursor: &LogCursor) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).cursor = cursor.clone();
    }

    fn set_agent_session_id(&self, id: &str) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).agent_session_id = Some(id.to_owned());
    }
}

/// Locate the log (if needed) and tail it until `cancel` fires.
///
/// `progress` mirrors the report while the tail runs. When discovery gives
/// up the report carries an empty cursor and no agent session id; the run
/// simply produces no structured events.
pub async fn follow<F>(
    index: SessionIndex,
    cwd: PathBuf,
    target: TailTarget,
    settings: TailSettings,
    cancel: CancellationToken,
    progress: TailProgress,
    on_event: F,
) -> TailReport
where
    F: FnMut(ConversationEvent) + Send,
{
    let span = info_span!("conversation_tail", cwd = %cwd.display());
    async move {
        let (cursor, agent_session_id) = match target {
            TailTarget::Known(cursor) => (cursor, None),
            TailTarget::Discover { prior } => {
                match discover(&index, &cwd, &prior, settings.discovery, &cancel).await {
                    Some(entry) => (LogCursor::at(index.log_path(&entry), 0), Some(entry.id)),
                    None => return TailReport::default(),
                }
            }
        };
        progress.set_cursor(&cursor);
        if let Some(id) = &agent_session_id {
            progress.set_agent_session_id(id);
        }
        let tail = LogTail::new(cursor, settings.read_limit);
        let cursor = run_tail(tail, settings.poll, cancel, progress, on_event).await;
        TailReport {
            cursor,
            agent_session_id,
        }
    }
    .instrument(span)
    .await
}
