//! Outbound frame writer.
//!
//! A single task owns the output stream, so frames from concurrent request
//! handlers and session relays are never interleaved mid-line.
//!
//! Every [`serde_json::Value`] received on the channel is serialised to one
//! compact line and terminated with `\n`, which is the NDJSON framing the
//! editor reads with the same convention as [`crate::acp::codec::NdjsonCodec`].

use serde_json::Value;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Serialise each queued value as one NDJSON line on `output`.
///
/// Each line is flushed as soon as it is written so the editor sees
/// notifications without waiting for the next frame.
///
/// The task exits cleanly when:
/// - `cancel` fires, after writing everything already queued, or
/// - `rx` is closed (all senders dropped).
///
/// # Errors
///
/// - [`AppError::Protocol`]`("failed to serialise outbound frame: …")` if
///   [`serde_json::to_vec`] fails.
/// - [`AppError::Protocol`]`("write failed: …")` or `("flush failed: …")` if
///   the output stream rejects the bytes, e.g. because the editor closed the
///   pipe.
///
/// # Examples
///
/// ```rust,ignore
/// let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
/// let writer = tokio::spawn(run_writer(tokio::io::stdout(), rx, cancel.clone()));
/// tx.send(serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}}))?;
/// ```
pub async fn run_writer<W>(
    output: W,
    mut rx: mpsc::UnboundedReceiver<Value>,
    cancel: CancellationToken,
) -> Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    let mut output = output;

    loop {
        let value = tokio::select! {
            biased;
            value = rx.recv() => match value {
                Some(value) => value,
                None => {
                    debug!("rpc writer: channel closed, stopping");
                    break;
                }
            },
            () = cancel.cancelled() => {
                debug!("rpc writer: cancellation received, stopping");
                break;
            }
        };

        let mut bytes = serde_json::to_vec(&value)
            .map_err(|e| AppError::Protocol(format!("failed to serialise outbound frame: {e}")))?;
        // NDJSON: one frame per line.
        bytes.push(b'\n');

        output.write_all(&bytes).await.map_err(|e| {
            warn!(error = %e, "rpc writer: write failed");
            AppError::Protocol(format!("write failed: {e}"))
        })?;
        output
            .flush()
            .await
            .map_err(|e| AppError::Protocol(format!("flush failed: {e}")))?;
    }

    Ok(())
}
