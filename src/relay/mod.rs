//! Outbound delivery to the editor.
//!
//! The [`ProtocolClient`] trait decouples the session core from the wire
//! transport. Every session owns one [`UpdateRelay`]: an append-only queue
//! drained by a single task, so notifications reach the client strictly in
//! enqueue order no matter how many producers (live stdout, the log tailer,
//! the registry) feed it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info_span, warn, Instrument};

use crate::models::permission::{RequestPermissionOutcome, RequestPermissionRequest};
use crate::models::update::{SessionNotification, SessionUpdate};
use crate::Result;

/// Boxed, sendable future returned by [`ProtocolClient`] methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Capabilities the editor advertised during `initialize`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientCapabilities {
    /// Editor renders raw terminal output deltas for execute tools.
    pub terminal_output: bool,
}

/// Calls the relay makes into the editor.
pub trait ProtocolClient: Send + Sync {
    /// Deliver one `session/update` notification.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::ChannelClosed`](crate::AppError::ChannelClosed) when
    /// the transport is gone.
    fn session_update(&self, notification: SessionNotification) -> BoxFuture<'_, Result<()>>;

    /// Ask the editor to approve an action.
    ///
    /// # Errors
    ///
    /// Returns an error if the round-trip fails; callers treat any error as a
    /// denial.
    fn request_permission(
        &self,
        request: RequestPermissionRequest,
    ) -> BoxFuture<'_, Result<RequestPermissionOutcome>>;
}

enum RelayItem {
    Update(SessionUpdate),
    Flush(oneshot::Sender<()>),
}

/// Per-session ordered notification queue.
///
/// Cheap to clone; all clones feed the same queue. The drain task exits once
/// every clone has been dropped and the queue is empty.
#[derive(Clone)]
pub struct UpdateRelay {
    session_id: Arc<str>,
    tx: mpsc::UnboundedSender<RelayItem>,
}

impl std::fmt::Debug for UpdateRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpdateRelay")
            .field("session_id", &self.session_id)
            .finish_non_exhaustive()
    }
}

impl UpdateRelay {
    /// Create the queue and spawn its drain task.
    #[must_use]
    pub fn spawn(session_id: &str, client: Arc<dyn ProtocolClient>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<RelayItem>();
        let session_id: Arc<str> = Arc::from(session_id);
        let task_session = Arc::clone(&session_id);

        tokio::spawn(
            async move {
                while let Some(item) = rx.recv().await {
                    match item {
                        RelayItem::Update(update) => {
                            let notification = SessionNotification {
                                session_id: task_session.to_string(),
                                update,
                            };
                            if let Err(err) = client.session_update(notification).await {
                                warn!(session_id = %task_session, %err, "session update not delivered");
                            }
                        }
                        RelayItem::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
                debug!(session_id = %task_session, "update relay drained");
            }
            .instrument(info_span!("update_relay")),
        );

        Self { session_id, tx }
    }

    /// Session this relay delivers for.
    #[must_use]
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Enqueue an update behind everything enqueued before it.
    pub fn send(&self, update: SessionUpdate) {
        if self.tx.send(RelayItem::Update(update)).is_err() {
            warn!(session_id = %self.session_id, "update relay closed, dropping update");
        }
    }

    /// Wait until everything enqueued so far has been handed to the client.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.tx.send(RelayItem::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }
}
