//! Local HTTP endpoint the agent calls to ask for approval mid-run.
//!
//! One bridge lives for exactly one prompt execution. It listens on an
//! ephemeral loopback port; the URL is handed to the agent through its
//! environment. Every request is turned into a `session/request_permission`
//! round-trip, serialised so the editor sees one question at a time.

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::models::permission::{
    CallbackRequest, CallbackResponse, PermissionOption, PermissionOptionKind, RequestPermissionOutcome,
    RequestPermissionRequest,
};
use crate::models::tool_call::ToolKind;
use crate::models::update::ToolCallUpdate;
use crate::relay::ProtocolClient;
use crate::translate::tools;
use crate::{AppError, Result};

/// Path the agent POSTs to.
pub const CALLBACK_PATH: &str = "/permission";

const ALLOW_ONCE: &str = "allow_once";
const ALLOW_ALWAYS: &str = "allow_always";
const REJECT_ONCE: &str = "reject_once";
const CONFIRM_ALLOW: &str = "allow";
const CONFIRM_REJECT: &str = "reject";
const CHOICE_PREFIX: &str = "choice_";

const STOP_TIMEOUT: Duration = Duration::from_secs(1);

struct BridgeState {
    session_id: String,
    client: Arc<dyn ProtocolClient>,
    always_allowed: Mutex<HashSet<String>>,
    round_trip: tokio::sync::Mutex<()>,
    cancel: CancellationToken,
}

/// Running permission bridge.
pub struct PermissionBridge {
    url: String,
    state: Arc<BridgeState>,
    task: JoinHandle<()>,
}

impl std::fmt::Debug for PermissionBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionBridge")
            .field("url", &self.url)
            .field("session_id", &self.state.session_id)
            .finish_non_exhaustive()
    }
}

impl PermissionBridge {
    /// Bind an ephemeral loopback port and start serving.
    ///
    /// `always_allowed` seeds the tools the user already approved for good in
    /// this session. Pending questions are answered with a denial as soon as
    /// `cancel` fires.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Permission` if the listener cannot be bound.
    pub async fn start(
        session_id: &str,
        client: Arc<dyn ProtocolClient>,
        always_allowed: HashSet<String>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .map_err(|err| AppError::Permission(format!("failed to bind permission bridge: {err}")))?;
        let addr = listener
            .local_addr()
            .map_err(|err| AppError::Permission(format!("permission bridge address: {err}")))?;

        let state = Arc::new(BridgeState {
            session_id: session_id.to_owned(),
            client,
            always_allowed: Mutex::new(always_allowed),
            round_trip: tokio::sync::Mutex::new(()),
            cancel: cancel.child_token(),
        });
        let router = Router::new()
            .route(CALLBACK_PATH, post(handle_callback))
            .with_state(Arc::clone(&state));

        let shutdown = state.cancel.clone();
        let span = info_span!("permission_bridge", session_id = %session_id, %addr);
        let task = tokio::spawn(
            async move {
                info!("permission bridge listening");
                if let Err(err) = axum::serve(listener, router)
                    .with_graceful_shutdown(async move { shutdown.cancelled().await })
                    .await
                {
                    warn!(%err, "permission bridge server error");
                }
                info!("permission bridge stopped");
            }
            .instrument(span),
        );

        Ok(Self {
            url: format!("http://{addr}{CALLBACK_PATH}"),
            state,
            task,
        })
    }

    /// Callback URL handed to the agent.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Shut the endpoint down, denying anything still pending, and return the
    /// updated always-allow set.
    pub async fn stop(self) -> HashSet<String> {
        self.state.cancel.cancel();
        let mut task = self.task;
        if tokio::time::timeout(STOP_TIMEOUT, &mut task).await.is_err() {
            warn!(session_id = %self.state.session_id, "permission bridge did not stop in time, aborting");
            task.abort();
        }
        std::mem::take(
            &mut *self
                .state
                .always_allowed
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        )
    }
}

async fn handle_callback(
    State(state): State<Arc<BridgeState>>,
    body: Bytes,
) -> (StatusCode, Json<CallbackResponse>) {
    let request = match serde_json::from_slice::<CallbackRequest>(&body) {
        Ok(request) => request,
        Err(err) => {
            warn!(session_id = %state.session_id, %err, "malformed permission callback");
            return (
                StatusCode::BAD_REQUEST,
                Json(CallbackResponse::deny(format!("malformed request: {err}"))),
            );
        }
    };
    (StatusCode::OK, Json(decide(&state, request).await))
}

async fn decide(state: &BridgeState, request: CallbackRequest) -> CallbackResponse {
    match request {
        CallbackRequest::PermissionRequest {
            tool_name,
            tool_call_id,
            action,
            input,
        } => tool_permission(state, tool_name, tool_call_id, action, input).await,
        CallbackRequest::Confirm { message } => {
            let options = vec![
                PermissionOption::new(CONFIRM_ALLOW, "Allow", PermissionOptionKind::AllowOnce),
                PermissionOption::new(CONFIRM_REJECT, "Reject", PermissionOptionKind::RejectOnce),
            ];
            match ask(state, question(None, &message, ToolKind::Other, None), options).await {
                Some(id) if id == CONFIRM_ALLOW => CallbackResponse::allow("confirmed by user"),
                Some(_) => CallbackResponse::deny("rejected by user"),
                None => CallbackResponse::deny("cancelled"),
            }
        }
        CallbackRequest::Select { message, choices } => {
            if choices.is_empty() {
                return CallbackResponse::deny("no choices offered");
            }
            let options = choices
                .iter()
                .enumerate()
                .map(|(i, choice)| {
                    PermissionOption::new(format!("{CHOICE_PREFIX}{i}"), choice, PermissionOptionKind::AllowOnce)
                })
                .collect();
            let picked = ask(state, question(None, &message, ToolKind::Other, None), options)
                .await
                .and_then(|id| id.strip_prefix(CHOICE_PREFIX)?.parse::<usize>().ok())
                .and_then(|i| choices.get(i).cloned());
            match picked {
                Some(choice) => CallbackResponse {
                    choice: Some(choice),
                    ..CallbackResponse::allow("selected by user")
                },
                None => CallbackResponse::deny("cancelled"),
            }
        }
        CallbackRequest::Input { .. } => CallbackResponse::deny("free-text input is not supported"),
    }
}

async fn tool_permission(
    state: &BridgeState,
    tool_name: Option<String>,
    tool_call_id: Option<String>,
    action: Option<String>,
    input: Option<Value>,
) -> CallbackResponse {
    if let Some(tool) = &tool_name {
        let remembered = state
            .always_allowed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(tool);
        if remembered {
            info!(session_id = %state.session_id, tool, "tool always allowed");
            return CallbackResponse::allow("always allowed for this session");
        }
    }

    let name = tool_name.as_deref().unwrap_or_default();
    let kind = tools::kind_for(name);
    let title = match (&action, input.as_ref()) {
        (Some(action), _) if !action.trim().is_empty() => action.clone(),
        (_, Some(args)) => tools::title_for(name, kind, args),
        _ => tools::title_for(name, kind, &Value::Null),
    };
    let options = vec![
        PermissionOption::new(ALLOW_ONCE, "Allow once", PermissionOptionKind::AllowOnce),
        PermissionOption::new(ALLOW_ALWAYS, "Always allow", PermissionOptionKind::AllowAlways),
        PermissionOption::new(REJECT_ONCE, "Reject", PermissionOptionKind::RejectOnce),
    ];
    match ask(state, question(tool_call_id, &title, kind, input), options).await.as_deref() {
        Some(ALLOW_ONCE) => CallbackResponse::allow("allowed once by user"),
        Some(ALLOW_ALWAYS) => {
            if let Some(tool) = tool_name {
                state
                    .always_allowed
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(tool);
            }
            CallbackResponse::allow("always allowed by user")
        }
        Some(_) => CallbackResponse::deny("rejected by user"),
        None => CallbackResponse::deny("cancelled"),
    }
}

fn question(tool_call_id: Option<String>, title: &str, kind: ToolKind, raw_input: Option<Value>) -> ToolCallUpdate {
    let id = tool_call_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("permission_{}", Uuid::new_v4().simple()));
    let mut update = ToolCallUpdate::new(id);
    update.title = Some(title.to_owned());
    update.kind = Some(kind);
    update.raw_input = raw_input;
    update
}

/// One serialised client round-trip. `None` means the question was cancelled,
/// the client failed, or the run ended first; all of them read as a denial.
async fn ask(state: &BridgeState, tool_call: ToolCallUpdate, options: Vec<PermissionOption>) -> Option<String> {
    let _turn = tokio::select! {
        biased;
        () = state.cancel.cancelled() => return None,
        guard = state.round_trip.lock() => guard,
    };
    let request = RequestPermissionRequest {
        session_id: state.session_id.clone(),
        tool_call,
        options,
    };
    let outcome = tokio::select! {
        biased;
        () = state.cancel.cancelled() => {
            info!(session_id = %state.session_id, "permission request abandoned by cancellation");
            return None;
        }
        outcome = state.client.request_permission(request) => outcome,
    };
    match outcome {
        Ok(RequestPermissionOutcome::Selected { option_id }) => Some(option_id),
        Ok(RequestPermissionOutcome::Cancelled) => None,
        Err(err) => {
            warn!(session_id = %state.session_id, %err, "permission round-trip failed, denying");
            None
        }
    }
}
