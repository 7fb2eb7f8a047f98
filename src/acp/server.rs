//! JSON-RPC method dispatch.
//!
//! Inbound requests are answered on their own tasks so that a long
//! `session/prompt` never holds up `session/cancel` or any other call.

use std::path::PathBuf;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::acp::client::StdioClient;
use crate::acp::reader::{run_reader, Inbound};
use crate::acp::writer::run_writer;
use crate::acp::{error_response, response, RpcError, INVALID_PARAMS, METHOD_NOT_FOUND, PARSE_ERROR};
use crate::config::GlobalConfig;
use crate::models::update::ContentBlock;
use crate::orchestrator::{ExecutionContext, SessionRegistry};
use crate::relay::{ClientCapabilities, ProtocolClient};
use crate::{AppError, Result};

/// Protocol version this relay speaks.
pub const PROTOCOL_VERSION: u64 = 1;

/// Inbound frames buffered between the reader and the dispatcher.
const INBOUND_BUFFER: usize = 64;

// ── Parameters ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    #[serde(default)]
    client_capabilities: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewSessionParams {
    cwd: PathBuf,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionCwdParams {
    session_id: String,
    cwd: PathBuf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListParams {
    #[serde(default)]
    cwd: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptParams {
    session_id: String,
    prompt: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionParams {
    session_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetModeParams {
    session_id: String,
    mode_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetModelParams {
    session_id: String,
    model_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SetConfigOptionParams {
    session_id: String,
    config_id: String,
    #[serde(default)]
    value: Value,
}

fn decode<T: DeserializeOwned>(params: Value) -> std::result::Result<T, RpcError> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| RpcError::new(INVALID_PARAMS, format!("invalid params: {e}")))
}

fn to_result<T: serde::Serialize>(value: Result<T>) -> std::result::Result<Value, RpcError> {
    let value = value.map_err(RpcError::from)?;
    serde_json::to_value(value).map_err(|e| RpcError::from(AppError::from(e)))
}

// ── Dispatcher ──────────────────────────────────────────────────────────────

/// Routes inbound frames to the registry and writes the replies.
#[derive(Clone)]
pub struct Dispatcher {
    registry: Arc<SessionRegistry>,
    client: Arc<StdioClient>,
    out: mpsc::UnboundedSender<Value>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher").finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Dispatcher over an existing registry.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, client: Arc<StdioClient>, out: mpsc::UnboundedSender<Value>) -> Self {
        Self { registry, client, out }
    }

    /// Session registry behind this dispatcher.
    #[must_use]
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Handle one inbound frame. Requests and notifications run on spawned
    /// tasks; responses and malformed frames are handled inline.
    pub fn dispatch(&self, inbound: Inbound) {
        match inbound {
            Inbound::Request { id, method, params } => {
                let this = self.clone();
                let span = info_span!("rpc_request", method = %method);
                tokio::spawn(
                    async move {
                        let frame = match this.call(&method, params).await {
                            Ok(result) => response(id, result),
                            Err(error) => {
                                debug!(code = error.code, message = %error.message, "request failed");
                                error_response(id, &error)
                            }
                        };
                        if this.out.send(frame).is_err() {
                            debug!("reply dropped, writer stopped");
                        }
                    }
                    .instrument(span),
                );
            }
            Inbound::Notification { method, params } => {
                let this = self.clone();
                tokio::spawn(async move { this.notify(&method, params).await });
            }
            Inbound::Response { id, outcome } => {
                self.client.complete(&id, outcome);
            }
            Inbound::Malformed(message) => {
                let error = RpcError::new(PARSE_ERROR, message);
                if self.out.send(error_response(Value::Null, &error)).is_err() {
                    debug!("parse error reply dropped, writer stopped");
                }
            }
        }
    }

    /// Execute one request method.
    ///
    /// # Errors
    ///
    /// Returns `-32601` for unknown methods, `-32602` for bad parameters or
    /// unknown sessions, and `-32603` for everything else.
    pub async fn call(&self, method: &str, params: Value) -> std::result::Result<Value, RpcError> {
        let registry = &self.registry;
        match method {
            "initialize" => {
                let p: InitializeParams = decode(params)?;
                Ok(self.initialize(&p))
            }
            "authenticate" => Ok(json!({})),
            "session/new" => {
                let p: NewSessionParams = decode(params)?;
                to_result(registry.create(p.cwd).await)
            }
            "session/load" => {
                let p: SessionCwdParams = decode(params)?;
                to_result(registry.load(&p.session_id, p.cwd).await)
            }
            "session/resume" => {
                let p: SessionCwdParams = decode(params)?;
                to_result(registry.resume(&p.session_id, p.cwd).await)
            }
            "session/fork" => {
                let p: SessionCwdParams = decode(params)?;
                to_result(registry.fork(&p.session_id, p.cwd).await)
            }
            "session/list" => {
                let p: ListParams = decode(params)?;
                let sessions = registry.list(p.cwd.as_deref()).await;
                Ok(json!({ "sessions": sessions }))
            }
            "session/prompt" => {
                let p: PromptParams = decode(params)?;
                to_result(registry.prompt(&p.session_id, p.prompt).await)
            }
            "session/cancel" => {
                let p: SessionParams = decode(params)?;
                registry.cancel(&p.session_id).await.map_err(RpcError::from)?;
                Ok(Value::Null)
            }
            "session/set_mode" => {
                let p: SetModeParams = decode(params)?;
                registry.set_mode(&p.session_id, &p.mode_id).await.map_err(RpcError::from)?;
                Ok(json!({}))
            }
            "session/set_model" => {
                let p: SetModelParams = decode(params)?;
                registry.set_model(&p.session_id, &p.model_id).await.map_err(RpcError::from)?;
                Ok(json!({}))
            }
            "session/set_config_option" => {
                let p: SetConfigOptionParams = decode(params)?;
                let options = registry
                    .set_config_option(&p.session_id, &p.config_id, &p.value)
                    .await
                    .map_err(RpcError::from)?;
                Ok(json!({ "configOptions": options }))
            }
            "session/close" => {
                let p: SessionParams = decode(params)?;
                registry.close(&p.session_id).await.map_err(RpcError::from)?;
                Ok(json!({}))
            }
            other => Err(RpcError::new(METHOD_NOT_FOUND, format!("method not found: {other}"))),
        }
    }

    async fn notify(&self, method: &str, params: Value) {
        match method {
            "session/cancel" => match decode::<SessionParams>(params) {
                Ok(p) => {
                    if let Err(err) = self.registry.cancel(&p.session_id).await {
                        warn!(%err, "cancel notification ignored");
                    }
                }
                Err(error) => warn!(message = %error.message, "malformed cancel notification"),
            },
            other => debug!(method = other, "ignoring notification"),
        }
    }

    fn initialize(&self, params: &InitializeParams) -> Value {
        let terminal_output = params
            .client_capabilities
            .pointer("/_meta/terminal_output")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        self.registry
            .context()
            .set_capabilities(ClientCapabilities { terminal_output });
        info!(terminal_output, "client initialized");

        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "agentCapabilities": {
                "loadSession": true,
                "promptCapabilities": {
                    "image": false,
                    "audio": false,
                    "embeddedContext": true,
                },
                "sessionCapabilities": {
                    "fork": {},
                    "resume": {},
                    "list": {},
                    "close": {},
                },
            },
            "authMethods": [],
            "agentInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
        })
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

/// Serve the protocol on `input`/`output` until EOF or `cancel`.
///
/// On exit every outstanding permission request is failed, every session is
/// closed, and queued output is written before the writer stops.
///
/// # Errors
///
/// Returns `AppError::Config` if the execution context cannot be built (for
/// instance an invalid thought pattern) and `AppError::Protocol` if stdout
/// fails.
pub async fn serve<R, W>(config: Arc<GlobalConfig>, input: R, output: W, cancel: CancellationToken) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Value>();
    let (in_tx, mut in_rx) = mpsc::channel::<Inbound>(INBOUND_BUFFER);

    let client = Arc::new(StdioClient::new(out_tx.clone()));
    let ctx = ExecutionContext::new(config, Arc::clone(&client) as Arc<dyn ProtocolClient>)?;
    let registry = Arc::new(SessionRegistry::new(Arc::new(ctx)));
    let dispatcher = Dispatcher::new(registry, Arc::clone(&client), out_tx);

    let writer_stop = CancellationToken::new();
    let writer = tokio::spawn(run_writer(output, out_rx, writer_stop.clone()).instrument(info_span!("rpc_writer")));
    let reader = tokio::spawn(run_reader(input, in_tx, cancel.clone()).instrument(info_span!("rpc_reader")));

    info!("serving agent client protocol on stdio");
    while let Some(inbound) = in_rx.recv().await {
        dispatcher.dispatch(inbound);
    }

    info!("editor disconnected, shutting down");
    client.fail_all();
    dispatcher.registry().shutdown().await;

    // The writer drains everything already queued before it honours the stop.
    writer_stop.cancel();
    if let Err(err) = reader.await {
        warn!(%err, "rpc reader task failed");
    }
    match writer.await {
        Ok(result) => result,
        Err(err) => Err(AppError::Protocol(format!("writer task failed: {err}"))),
    }
}
