//! Per-session prompt scheduler.
//!
//! Each session owns one worker task fed by an unbounded channel. Prompts are
//! executed strictly one at a time in submission order. Every execution runs
//! on its own spawned task, so a panic inside one prompt is caught as a join
//! error and the worker moves on to the next prompt.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info_span, Instrument};

use crate::models::prompt::{PromptResponse, StopReason};
use crate::models::update::ContentBlock;
use crate::relay::BoxFuture;
use crate::{AppError, Result};

/// Runs one prompt to completion.
pub trait PromptExecutor: Send + Sync + 'static {
    /// Execute `prompt`; always resolves to a stop reason.
    fn execute(&self, prompt: Vec<ContentBlock>) -> BoxFuture<'static, StopReason>;
}

/// A queued prompt and the channel its result goes back on.
struct PendingPrompt {
    prompt: Vec<ContentBlock>,
    reply: oneshot::Sender<PromptResponse>,
}

/// FIFO prompt queue with a single worker.
#[derive(Debug)]
pub struct PromptScheduler {
    tx: mpsc::UnboundedSender<PendingPrompt>,
    closed: CancellationToken,
}

impl PromptScheduler {
    /// Start the worker for `session_id`.
    #[must_use]
    pub fn spawn(session_id: &str, executor: Arc<dyn PromptExecutor>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PendingPrompt>();
        let closed = CancellationToken::new();
        let worker_closed = closed.clone();

        tokio::spawn(
            async move {
                loop {
                    let job = tokio::select! {
                        biased;
                        () = worker_closed.cancelled() => break,
                        job = rx.recv() => match job {
                            Some(job) => job,
                            None => break,
                        },
                    };
                    let stop_reason = match tokio::spawn(executor.execute(job.prompt)).await {
                        Ok(stop_reason) => stop_reason,
                        Err(err) => {
                            error!(%err, "prompt execution aborted");
                            StopReason::EndTurn
                        }
                    };
                    if job.reply.send(PromptResponse { stop_reason }).is_err() {
                        debug!("prompt caller went away before the result");
                    }
                }
                debug!("prompt scheduler stopped");
            }
            .instrument(info_span!("prompt_scheduler", session_id = %session_id)),
        );

        Self { tx, closed }
    }

    /// Queue `prompt` behind every earlier submission and wait for its result.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ChannelClosed` if the session was closed before the
    /// prompt ran.
    pub async fn submit(&self, prompt: Vec<ContentBlock>) -> Result<PromptResponse> {
        let (reply, result) = oneshot::channel();
        self.tx
            .send(PendingPrompt { prompt, reply })
            .map_err(|_| AppError::ChannelClosed("session closed".into()))?;
        result
            .await
            .map_err(|_| AppError::ChannelClosed("session closed before the prompt ran".into()))
    }

    /// Stop accepting work. The prompt currently running finishes; queued
    /// prompts are dropped and their callers get `ChannelClosed`.
    pub fn close(&self) {
        self.closed.cancel();
    }
}
