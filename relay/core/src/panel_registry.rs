//! Panel Registry
//!
//! Tracks every open panel and its session, keyed by [`PanelId`]. Each panel
//! gets its own session so two panels never share a stream or a response
//! buffer.
//!
//! # Cancellation
//!
//! The registry owns a root [`CancellationToken`]. Every stream token is a
//! child of it, so [`PanelRegistry::close_all`] stops every stream at once.
//!
//! ```text
//!                  root token
//!            ┌─────────┼─────────┐
//!      panel-a/req_1  panel-b/req_2  panel-c/req_4
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::messages::{PanelId, PanelMessage, RequestId, StreamOutcome};
use crate::relay::{OverlapPolicy, RelayError};
use crate::session::{ActiveStream, PanelSession, SessionSnapshot};

/// What a caller needs to run a newly admitted stream
#[derive(Debug)]
pub struct StreamTicket {
    /// Channel to the panel
    pub tx: mpsc::Sender<PanelMessage>,
    /// Cancelled by stop, replacement, panel close or shutdown
    pub cancel: CancellationToken,
}

/// Registry of open panels
#[derive(Clone)]
pub struct PanelRegistry {
    sessions: Arc<DashMap<PanelId, PanelSession>>,
    root: CancellationToken,
}

impl Default for PanelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PanelRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            root: CancellationToken::new(),
        }
    }

    /// Register a panel, returning its new identifier
    pub fn register(&self, tx: mpsc::Sender<PanelMessage>) -> PanelId {
        let id = PanelId::new();
        self.sessions.insert(id, PanelSession::new(id, tx));
        tracing::info!(panel_id = %id, "Panel registered");
        id
    }

    /// Remove a panel, cancelling its stream
    pub fn unregister(&self, id: &PanelId) -> Option<SessionSnapshot> {
        let (_, mut session) = self.sessions.remove(id)?;
        session.close();
        tracing::debug!(panel_id = %id, "Panel unregistered");
        Some(session.snapshot())
    }

    /// Channel to a panel
    #[must_use]
    pub fn sender(&self, id: &PanelId) -> Option<mpsc::Sender<PanelMessage>> {
        self.sessions.get(id).map(|s| s.sender().clone())
    }

    /// Admit a new stream for a panel under the given overlap policy
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownPanel`] if the panel is not registered,
    /// or [`RelayError::Busy`] if a stream is running and the policy rejects
    /// overlap.
    pub fn begin_stream(
        &self,
        id: &PanelId,
        request_id: &RequestId,
        policy: OverlapPolicy,
    ) -> Result<StreamTicket, RelayError> {
        let mut session = self
            .sessions
            .get_mut(id)
            .ok_or(RelayError::UnknownPanel(*id))?;

        if let Some(active) = session.active() {
            if policy == OverlapPolicy::Reject {
                return Err(RelayError::Busy {
                    active: active.request_id.clone(),
                });
            }
        }

        let cancel = self.root.child_token();
        if let Some(previous) =
            session.start_stream(ActiveStream::new(request_id.clone(), cancel.clone()))
        {
            previous.cancel();
            tracing::debug!(
                panel_id = %id,
                replaced = %previous.request_id,
                request_id = %request_id,
                "Cancelled previous stream"
            );
        }

        Ok(StreamTicket {
            tx: session.sender().clone(),
            cancel,
        })
    }

    /// Record that a stream ended
    ///
    /// Returns false if the panel is gone or a newer stream owns the slot.
    pub fn finish_stream(
        &self,
        id: &PanelId,
        request_id: &RequestId,
        outcome: StreamOutcome,
    ) -> bool {
        match self.sessions.get_mut(id) {
            Some(mut session) => session.finish_stream(request_id, outcome),
            None => false,
        }
    }

    /// Cancel a panel's running stream, freeing its slot
    ///
    /// Returns the request that was cancelled, if any.
    pub fn cancel_stream(&self, id: &PanelId) -> Option<RequestId> {
        self.sessions.get_mut(id)?.cancel_stream()
    }

    /// Number of open panels
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no panels are open
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Snapshots of every open panel, oldest first
    #[must_use]
    pub fn snapshots(&self) -> Vec<SessionSnapshot> {
        let mut all: Vec<_> = self.sessions.iter().map(|s| s.snapshot()).collect();
        all.sort_by_key(|s| s.metadata.created_at);
        all
    }

    /// Number of panels with a stream in flight
    #[must_use]
    pub fn streaming_count(&self) -> usize {
        self.sessions.iter().filter(|s| s.is_streaming()).count()
    }

    /// Cancel every stream and drop every panel
    pub fn close_all(&self) {
        self.root.cancel();
        let count = self.sessions.len();
        self.sessions.retain(|_, session| {
            session.close();
            false
        });
        tracing::info!(panels = count, "Closed all panels");
    }
}
