//! Incremental byte-offset reader for the conversation log.

use std::io::SeekFrom;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::models::event::ConversationEvent;
use crate::models::session::LogCursor;
use crate::tailer::TailProgress;

/// Reads newly appended log lines from a saved [`LogCursor`].
///
/// Bytes before `cursor.offset` are never read again. An unterminated trailing
/// line is kept in `cursor.remainder` until its newline arrives.
#[derive(Debug)]
pub struct LogTail {
    cursor: LogCursor,
    read_limit: usize,
}

impl LogTail {
    /// Resume tailing from `cursor`, reading at most `read_limit` bytes per
    /// chunk.
    #[must_use]
    pub fn new(cursor: LogCursor, read_limit: usize) -> Self {
        Self {
            cursor,
            read_limit: read_limit.max(1),
        }
    }

    /// Current position.
    #[must_use]
    pub fn cursor(&self) -> &LogCursor {
        &self.cursor
    }

    /// Give back the cursor for the next run.
    #[must_use]
    pub fn into_cursor(self) -> LogCursor {
        self.cursor
    }

    /// Read everything appended since the last call and return the complete
    /// lines as parsed events, in file order.
    ///
    /// A missing file yields nothing. Malformed lines are skipped. A file that
    /// shrank below the saved offset is left alone: the cursor never moves
    /// backwards, so already-consumed bytes are never replayed.
    pub async fn read_available(&mut self) -> Vec<ConversationEvent> {
        let Some(path) = self.cursor.path.clone() else {
            return Vec::new();
        };
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(err) => {
                debug!(path = %path.display(), %err, "conversation log not readable yet");
                return Vec::new();
            }
        };
        let len = match file.metadata().await {
            Ok(meta) => meta.len(),
            Err(err) => {
                warn!(path = %path.display(), %err, "conversation log metadata failed");
                return Vec::new();
            }
        };
        if len < self.cursor.offset {
            warn!(
                path = %path.display(),
                len,
                offset = self.cursor.offset,
                "conversation log shrank, waiting for new data"
            );
            return Vec::new();
        }
        if len == self.cursor.offset {
            return Vec::new();
        }
        if let Err(err) = file.seek(SeekFrom::Start(self.cursor.offset)).await {
            warn!(path = %path.display(), %err, "conversation log seek failed");
            return Vec::new();
        }

        let mut events = Vec::new();
        let mut buf = vec![0u8; self.read_limit];
        loop {
            let n = match file.read(&mut buf).await {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) => {
                    warn!(path = %path.display(), %err, "conversation log read failed");
                    break;
                }
            };
            self.cursor.offset += n as u64;
            self.ingest(&buf[..n], &mut events);
        }
        events
    }

    fn ingest(&mut self, bytes: &[u8], events: &mut Vec<ConversationEvent>) {
        let mut rest = bytes;
        while let Some(pos) = rest.iter().position(|b| *b == b'\n') {
            let (head, tail) = rest.split_at(pos);
            rest = &tail[1..];
            let line = if self.cursor.remainder.is_empty() {
                String::from_utf8_lossy(head).into_owned()
            } else {
                let mut joined = std::mem::take(&mut self.cursor.remainder);
                joined.extend_from_slice(head);
                String::from_utf8_lossy(&joined).into_owned()
            };
            match ConversationEvent::parse_line(&line) {
                Some(event) => events.push(event),
                None if line.trim().is_empty() => {}
                None => debug!(bytes = line.len(), "skipping malformed conversation log line"),
            }
        }
        self.cursor.remainder.extend_from_slice(rest);
    }
}

/// Tail until `cancel` fires, then drain exactly once more.
///
/// `on_event` sees every event in file order, and `progress` is moved past
/// each batch once it has been delivered. Returns the cursor so the next run
/// can continue where this one stopped.
pub async fn run_tail<F>(
    mut tail: LogTail,
    poll: Duration,
    cancel: CancellationToken,
    progress: TailProgress,
    mut on_event: F,
) -> LogCursor
where
    F: FnMut(ConversationEvent) + Send,
{
    loop {
        deliver(&mut tail, &progress, &mut on_event).await;
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(poll) => {}
        }
    }

    deliver(&mut tail, &progress, &mut on_event).await;
    debug!(offset = tail.cursor().offset, "conversation tail stopped");
    tail.into_cursor()
}

async fn deliver<F>(tail: &mut LogTail, progress: &TailProgress, on_event: &mut F)
where
    F: FnMut(ConversationEvent) + Send,
{
    let before = tail.cursor().offset;
    for event in tail.read_available().await {
        on_event(event);
    }
    if tail.cursor().offset != before {
        progress.set_cursor(tail.cursor());
    }
}
