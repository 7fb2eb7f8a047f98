//! Outbound calls into the editor over the stdio transport.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::acp::RpcError;
use crate::models::permission::{RequestPermissionOutcome, RequestPermissionRequest, RequestPermissionResponse};
use crate::models::update::SessionNotification;
use crate::relay::{BoxFuture, ProtocolClient};
use crate::{AppError, Result};

type Pending = HashMap<u64, oneshot::Sender<std::result::Result<Value, RpcError>>>;

/// [`ProtocolClient`] that writes JSON-RPC frames to the shared writer task.
///
/// Requests are correlated with their responses through a pending map keyed
/// by our own numeric ids; the server loop hands responses back through
/// [`StdioClient::complete`].
#[derive(Debug)]
pub struct StdioClient {
    out: mpsc::UnboundedSender<Value>,
    pending: Mutex<Pending>,
    next_id: AtomicU64,
}

impl StdioClient {
    /// Client writing into `out`.
    #[must_use]
    pub fn new(out: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            out,
            pending: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Route the editor's response for request `id`.
    ///
    /// Returns `false` when no request with that id is outstanding.
    pub fn complete(&self, id: &Value, outcome: std::result::Result<Value, RpcError>) -> bool {
        let Some(id) = id.as_u64() else {
            warn!(%id, "response with a non-numeric id");
            return false;
        };
        let sender = self.lock_pending().remove(&id);
        match sender {
            Some(tx) => {
                let _ = tx.send(outcome);
                true
            }
            None => {
                debug!(id, "response for an unknown request");
                false
            }
        }
    }

    /// Fail every outstanding request; used when the editor disconnects.
    pub fn fail_all(&self) {
        let drained: Vec<_> = self.lock_pending().drain().collect();
        for (id, tx) in drained {
            debug!(id, "failing outstanding request");
            drop(tx);
        }
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Pending> {
        self.pending
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn send_frame(&self, frame: Value) -> Result<()> {
        self.out
            .send(frame)
            .map_err(|_| AppError::ChannelClosed("stdout writer stopped".into()))
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(id, tx);

        let frame = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        if let Err(err) = self.send_frame(frame) {
            self.lock_pending().remove(&id);
            return Err(err);
        }

        match rx.await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(error)) => Err(AppError::Protocol(format!(
                "{method} failed ({}): {}",
                error.code, error.message
            ))),
            Err(_) => Err(AppError::ChannelClosed(format!("{method}: editor disconnected"))),
        }
    }
}

impl ProtocolClient for StdioClient {
    fn session_update(&self, notification: SessionNotification) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let params = serde_json::to_value(&notification)?;
            self.send_frame(json!({ "jsonrpc": "2.0", "method": "session/update", "params": params }))
        })
    }

    fn request_permission(
        &self,
        request: RequestPermissionRequest,
    ) -> BoxFuture<'_, Result<RequestPermissionOutcome>> {
        Box::pin(async move {
            let params = serde_json::to_value(&request)?;
            let result = self.call("session/request_permission", params).await?;
            let response: RequestPermissionResponse = serde_json::from_value(result)?;
            Ok(response.outcome)
        })
    }
}
