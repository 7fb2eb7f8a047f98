//! Agent Client Protocol transport over stdio.
//!
//! The editor talks JSON-RPC 2.0, one JSON object per line, on our stdin and
//! stdout. Submodules:
//! - `codec`: [`LinesCodec`](tokio_util::codec::LinesCodec)-based framing with a line cap.
//! - `reader`: classifies inbound frames as requests, notifications, or responses.
//! - `writer`: the single task that owns stdout.
//! - `client`: [`StdioClient`], the outbound half ([`ProtocolClient`](crate::relay::ProtocolClient)).
//! - `server`: method dispatch onto the session registry.

pub mod client;
pub mod codec;
pub mod reader;
pub mod server;
pub mod writer;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::AppError;

pub use client::StdioClient;
pub use server::serve;

/// JSON-RPC parse error.
pub const PARSE_ERROR: i64 = -32_700;
/// JSON-RPC method not found.
pub const METHOD_NOT_FOUND: i64 = -32_601;
/// JSON-RPC invalid params.
pub const INVALID_PARAMS: i64 = -32_602;
/// JSON-RPC internal error.
pub const INTERNAL_ERROR: i64 = -32_603;

/// JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RpcError {
    /// Numeric code.
    pub code: i64,
    /// Human-readable message.
    pub message: String,
}

impl RpcError {
    /// Construct an error object.
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<AppError> for RpcError {
    fn from(err: AppError) -> Self {
        let code = if err.is_usage_error() {
            INVALID_PARAMS
        } else {
            INTERNAL_ERROR
        };
        Self::new(code, err.to_string())
    }
}

/// Build a success response frame.
#[must_use]
pub fn response(id: Value, result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "result": result })
}

/// Build an error response frame.
#[must_use]
pub fn error_response(id: Value, error: &RpcError) -> Value {
    json!({ "jsonrpc": "2.0", "id": id, "error": error })
}
