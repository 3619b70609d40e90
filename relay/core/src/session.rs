//! Panel Sessions
//!
//! One session per open panel. A session owns the panel's outbound channel
//! and at most one active stream. It keeps no conversation history: the
//! response text lives in the stream task's accumulator and is dropped when
//! the request ends.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::messages::{PanelId, PanelMessage, RequestId, StreamOutcome};

/// Session state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    /// Waiting for a prompt
    Idle,
    /// A response is streaming
    Streaming,
    /// The panel went away
    Closed,
}

/// Session metadata
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// When the panel opened
    pub created_at: DateTime<Utc>,
    /// When the panel last sent a prompt or finished a stream
    pub last_active_at: DateTime<Utc>,
    /// Streams started
    pub requests_started: u32,
    /// Streams that ran to completion
    pub requests_completed: u32,
    /// Streams that ended with a backend failure
    pub requests_failed: u32,
    /// Streams stopped, replaced or abandoned
    pub requests_cancelled: u32,
}

impl SessionMetadata {
    /// Create new metadata
    #[must_use]
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            created_at: now,
            last_active_at: now,
            requests_started: 0,
            requests_completed: 0,
            requests_failed: 0,
            requests_cancelled: 0,
        }
    }

    fn touch(&mut self) {
        self.last_active_at = Utc::now();
    }

    /// Count an outcome
    pub fn record(&mut self, outcome: StreamOutcome) {
        match outcome {
            StreamOutcome::Completed => self.requests_completed += 1,
            StreamOutcome::Failed => self.requests_failed += 1,
            StreamOutcome::Cancelled => self.requests_cancelled += 1,
        }
        self.touch();
    }
}

impl Default for SessionMetadata {
    fn default() -> Self {
        Self::new()
    }
}

/// The stream currently running for a panel
#[derive(Debug)]
pub struct ActiveStream {
    /// Request being streamed
    pub request_id: RequestId,
    /// Cancels the stream task
    cancel: CancellationToken,
}

impl ActiveStream {
    /// Create a new active stream record
    #[must_use]
    pub fn new(request_id: RequestId, cancel: CancellationToken) -> Self {
        Self { request_id, cancel }
    }

    /// Ask the stream task to stop
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

}

/// A panel's session
#[derive(Debug)]
pub struct PanelSession {
    /// Panel identifier
    pub id: PanelId,
    /// Channel to the panel
    tx: mpsc::Sender<PanelMessage>,
    /// Session state
    state: SessionState,
    /// Stream in flight, if any
    active: Option<ActiveStream>,
    /// Session metadata
    pub metadata: SessionMetadata,
}

impl PanelSession {
    /// Create a session for a newly opened panel
    #[must_use]
    pub fn new(id: PanelId, tx: mpsc::Sender<PanelMessage>) -> Self {
        Self {
            id,
            tx,
            state: SessionState::Idle,
            active: None,
            metadata: SessionMetadata::new(),
        }
    }

    /// Channel to the panel
    #[must_use]
    pub fn sender(&self) -> &mpsc::Sender<PanelMessage> {
        &self.tx
    }

    /// The active stream, if any
    #[must_use]
    pub fn active(&self) -> Option<&ActiveStream> {
        self.active.as_ref()
    }

    /// Check if currently streaming
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.active.is_some()
    }

    /// Start tracking a new stream, returning the one it replaces
    pub fn start_stream(&mut self, stream: ActiveStream) -> Option<ActiveStream> {
        let previous = self.active.replace(stream);
        self.state = SessionState::Streaming;
        self.metadata.requests_started += 1;
        self.metadata.touch();
        previous
    }

    /// Cancel the active stream and free the slot
    ///
    /// The slot is free as soon as this returns, so a prompt right after a
    /// stop is admitted even under [`OverlapPolicy::Reject`]. The task still
    /// reports its outcome through [`PanelSession::finish_stream`].
    ///
    /// [`OverlapPolicy::Reject`]: crate::relay::OverlapPolicy::Reject
    pub fn cancel_stream(&mut self) -> Option<RequestId> {
        let active = self.active.take()?;
        active.cancel();
        if self.state == SessionState::Streaming {
            self.state = SessionState::Idle;
        }
        Some(active.request_id)
    }

    /// Record a finished stream
    ///
    /// The active slot is only cleared if it still belongs to `request_id`;
    /// a replaced stream finishing late must not clear its successor.
    pub fn finish_stream(&mut self, request_id: &RequestId, outcome: StreamOutcome) -> bool {
        self.metadata.record(outcome);

        let owns_slot = self
            .active
            .as_ref()
            .is_some_and(|a| &a.request_id == request_id);
        if owns_slot {
            self.active = None;
            if self.state == SessionState::Streaming {
                self.state = SessionState::Idle;
            }
        }
        owns_slot
    }

    /// Close the session, cancelling any stream
    pub fn close(&mut self) {
        if let Some(active) = self.active.take() {
            active.cancel();
        }
        self.state = SessionState::Closed;
    }

    /// Copy of the observable session state
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            state: self.state,
            active_request: self.active.as_ref().map(|a| a.request_id.clone()),
            metadata: self.metadata.clone(),
        }
    }
}

/// Observable state of a session
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionSnapshot {
    /// Panel identifier
    pub id: PanelId,
    /// Session state
    pub state: SessionState,
    /// Request currently streaming
    pub active_request: Option<RequestId>,
    /// Counters and timestamps
    pub metadata: SessionMetadata,
}
