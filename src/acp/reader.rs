//! Inbound frame reader.
//!
//! Decodes NDJSON frames from the editor and classifies each as a request,
//! a notification, or a response to one of our own requests.

use futures_util::StreamExt;
use serde::Deserialize;
use serde_json::Value;
use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::acp::codec::NdjsonCodec;
use crate::acp::RpcError;
use crate::{AppError, Result};

/// One classified inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// Call expecting a response.
    Request {
        /// Correlation id, echoed in the response.
        id: Value,
        /// Method name.
        method: String,
        /// Parameters (`null` when absent).
        params: Value,
    },
    /// Fire-and-forget call.
    Notification {
        /// Method name.
        method: String,
        /// Parameters (`null` when absent).
        params: Value,
    },
    /// Answer to a request the relay sent.
    Response {
        /// Id of our request.
        id: Value,
        /// Success payload or error.
        outcome: std::result::Result<Value, RpcError>,
    },
    /// A frame that could not be parsed; answered with a parse error.
    Malformed(String),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Value,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

/// Classify one frame. `Ok(None)` for blank lines.
///
/// # Errors
///
/// Returns `AppError::Protocol` if the line is not a JSON-RPC object.
pub fn parse_inbound_line(line: &str) -> Result<Option<Inbound>> {
    if line.trim().is_empty() {
        return Ok(None);
    }
    let envelope: Envelope =
        serde_json::from_str(line).map_err(|e| AppError::Protocol(format!("malformed json: {e}")))?;

    let inbound = match (envelope.method, envelope.id) {
        (Some(method), Some(id)) if !id.is_null() => Inbound::Request {
            id,
            method,
            params: envelope.params,
        },
        (Some(method), _) => Inbound::Notification {
            method,
            params: envelope.params,
        },
        (None, Some(id)) => Inbound::Response {
            id,
            outcome: match envelope.error {
                Some(error) => Err(error),
                None => Ok(envelope.result.unwrap_or(Value::Null)),
            },
        },
        (None, None) => {
            return Err(AppError::Protocol("frame has neither method nor id".into()));
        }
    };
    Ok(Some(inbound))
}

/// Read frames from `input` until EOF or `cancel`, forwarding them to `tx`.
///
/// Oversized or malformed frames are forwarded as [`Inbound::Malformed`] and
/// do not stop the reader.
///
/// # Errors
///
/// Returns `Ok(())` on EOF or cancellation; I/O errors end the loop and are
/// logged.
pub async fn run_reader<R>(input: R, tx: mpsc::Sender<Inbound>, cancel: CancellationToken) -> Result<()>
where
    R: AsyncRead + Unpin + Send,
{
    let mut framed = FramedRead::new(input, NdjsonCodec::new());

    loop {
        let item = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("rpc reader: cancellation received, stopping");
                break;
            }
            item = framed.next() => item,
        };

        let inbound = match item {
            None => {
                debug!("rpc reader: EOF");
                break;
            }
            Some(Err(AppError::Protocol(msg))) => {
                warn!(error = msg.as_str(), "rpc reader: framing error");
                Inbound::Malformed(msg)
            }
            Some(Err(e)) => {
                warn!(error = %e, "rpc reader: I/O error, stopping");
                break;
            }
            Some(Ok(line)) => match parse_inbound_line(&line) {
                Ok(Some(inbound)) => inbound,
                Ok(None) => continue,
                Err(e) => {
                    warn!(error = %e, "rpc reader: unparseable frame");
                    Inbound::Malformed(e.to_string())
                }
            },
        };

        if tx.send(inbound).await.is_err() {
            debug!("rpc reader: dispatcher gone, stopping");
            break;
        }
    }

    Ok(())
}
