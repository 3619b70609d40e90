//! Stream relay task
//!
//! Drives one request from the backend to one panel. Every fragment is
//! appended to a [`ResponseAccumulator`] and forwarded according to the
//! configured [`UpdateMode`]; the task always finishes with a `streamEnd`.

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::ResponseAccumulator;
use crate::backend::{LlmBackend, LlmRequest, StreamingToken};
use crate::messages::{PanelId, PanelMessage, RequestId, StreamOutcome};
use crate::relay::UpdateMode;

/// Everything one stream task needs besides the backend and request
#[derive(Debug)]
pub struct StreamJob {
    /// Panel receiving the response
    pub panel_id: PanelId,
    /// Request being answered
    pub request_id: RequestId,
    /// Channel to the panel
    pub tx: mpsc::Sender<PanelMessage>,
    /// Stops the task
    pub cancel: CancellationToken,
    /// Cumulative text or deltas
    pub mode: UpdateMode,
}

/// Relay one backend response to a panel
///
/// Returns how the stream ended. Cancellation is checked before every
/// forward, so nothing but the final `streamEnd` reaches the panel after the
/// token fires.
pub async fn run_stream<B>(backend: &B, request: LlmRequest, job: StreamJob) -> StreamOutcome
where
    B: LlmBackend + ?Sized,
{
    let StreamJob {
        panel_id,
        request_id,
        tx,
        cancel,
        mode,
    } = job;

    tracing::debug!(
        panel_id = %panel_id,
        request_id = %request_id,
        backend = backend.name(),
        model = %request.model,
        "Starting stream"
    );

    let started = tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        result = backend.send_streaming(&request) => Some(result),
    };

    let outcome = match started {
        None => StreamOutcome::Cancelled,
        Some(Err(e)) => {
            tracing::warn!(request_id = %request_id, error = %e, "Backend request failed");
            let error = PanelMessage::error(request_id.clone(), format!("{e:#}"));
            if forward(&tx, &cancel, error).await {
                StreamOutcome::Failed
            } else {
                StreamOutcome::Cancelled
            }
        }
        Some(Ok(rx)) => relay_tokens(rx, &tx, &cancel, &request_id, mode).await,
    };

    let end = PanelMessage::StreamEnd {
        outcome,
        request_id: request_id.clone(),
    };
    if cancel.is_cancelled() {
        // The panel may be gone or not reading; never wait on it here
        let _ = tx.try_send(end);
    } else if tx.send(end).await.is_err() {
        tracing::debug!(request_id = %request_id, "Panel closed before stream end");
    }

    tracing::info!(
        panel_id = %panel_id,
        request_id = %request_id,
        outcome = %outcome,
        "Stream finished"
    );
    outcome
}

async fn relay_tokens(
    mut rx: mpsc::Receiver<StreamingToken>,
    tx: &mpsc::Sender<PanelMessage>,
    cancel: &CancellationToken,
    request_id: &RequestId,
    mode: UpdateMode,
) -> StreamOutcome {
    let mut accumulator = ResponseAccumulator::new();

    loop {
        let token = tokio::select! {
            biased;
            () = cancel.cancelled() => return StreamOutcome::Cancelled,
            token = rx.recv() => token,
        };

        match token {
            Some(StreamingToken::Token(fragment)) => {
                accumulator.push(&fragment);
                if fragment.is_empty() {
                    continue;
                }
                let update = match mode {
                    UpdateMode::Cumulative => PanelMessage::ChatResponse {
                        text: accumulator.text().to_string(),
                        request_id: request_id.clone(),
                    },
                    UpdateMode::Delta => PanelMessage::ChatDelta {
                        text: fragment,
                        request_id: request_id.clone(),
                    },
                };
                if !forward(tx, cancel, update).await {
                    return StreamOutcome::Cancelled;
                }
            }
            Some(StreamingToken::Complete) => {
                tracing::trace!(
                    request_id = %request_id,
                    fragments = accumulator.fragment_count(),
                    bytes = accumulator.byte_len(),
                    "Backend completed"
                );
                return StreamOutcome::Completed;
            }
            Some(StreamingToken::Error(e)) => {
                tracing::warn!(request_id = %request_id, error = %e, "Stream error");
                let error = PanelMessage::error(request_id.clone(), e);
                return if forward(tx, cancel, error).await {
                    StreamOutcome::Failed
                } else {
                    StreamOutcome::Cancelled
                };
            }
            // Backend dropped the channel without a terminal token
            None => return StreamOutcome::Completed,
        }
    }
}

/// Send to the panel unless cancelled; false means the stream must stop
async fn forward(
    tx: &mpsc::Sender<PanelMessage>,
    cancel: &CancellationToken,
    message: PanelMessage,
) -> bool {
    if cancel.is_cancelled() {
        return false;
    }
    tokio::select! {
        biased;
        () = cancel.cancelled() => false,
        sent = tx.send(message) => sent.is_ok(),
    }
}
