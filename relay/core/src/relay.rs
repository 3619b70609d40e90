//! Relay Handler
//!
//! The headless core of the chat panel: receives [`PanelEvent`]s, turns
//! prompts into backend requests and streams the answer back to the panel
//! that asked.
//!
//! # Flow
//!
//! ```text
//!  panel ──chat──▶ RelayHandler::chat
//!                    │ validate (blank → ignored, oversize → chatError)
//!                    │ append disclaimer
//!                    │ overlap policy (cancel previous | reject)
//!                    ▼
//!              tokio::spawn(run_stream) ──chatResponse*──▶ panel
//!                    │                  ──chatError?────▶ panel
//!                    │                  ──streamEnd─────▶ panel
//!                    ▼
//!           PanelRegistry::finish_stream
//! ```

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::backend::{LlmBackend, LlmRequest};
use crate::messages::{PanelEvent, PanelId, PanelMessage, RequestId};
use crate::panel_registry::PanelRegistry;
use crate::prompt::{PromptBuilder, DEFAULT_DISCLAIMER};
use crate::security::{InputValidator, ValidationResult};
use crate::session::SessionSnapshot;
use crate::streaming::{run_stream, StreamJob};

/// Default model
pub const DEFAULT_MODEL: &str = "deepseek-r1:8b";

/// Default prompt size limit in bytes
pub const DEFAULT_MAX_PROMPT_BYTES: usize = 32 * 1024;

/// How response updates are delivered to the panel
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    /// Resend the whole response after every fragment
    #[default]
    Cumulative,
    /// Send only the new fragment
    Delta,
}

impl fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cumulative => write!(f, "cumulative"),
            Self::Delta => write!(f, "delta"),
        }
    }
}

impl FromStr for UpdateMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cumulative" | "full" => Ok(Self::Cumulative),
            "delta" => Ok(Self::Delta),
            other => Err(format!(
                "unknown update mode '{other}' (expected cumulative or delta)"
            )),
        }
    }
}

/// What happens when a panel asks while a response is still streaming
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverlapPolicy {
    /// Cancel the running stream and start the new one
    #[default]
    CancelPrevious,
    /// Refuse the new prompt; the running stream continues
    Reject,
}

impl fmt::Display for OverlapPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CancelPrevious => write!(f, "cancel-previous"),
            Self::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for OverlapPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "cancel-previous" | "cancel" => Ok(Self::CancelPrevious),
            "reject" => Ok(Self::Reject),
            other => Err(format!(
                "unknown overlap policy '{other}' (expected cancel-previous or reject)"
            )),
        }
    }
}

/// Relay behaviour
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RelayConfig {
    /// Model every prompt is sent to
    pub model: String,
    /// Text appended to every prompt
    pub disclaimer: String,
    /// Cumulative or delta updates
    pub update_mode: UpdateMode,
    /// Behaviour on a prompt during a running stream
    pub overlap_policy: OverlapPolicy,
    /// Largest accepted prompt
    pub max_prompt_bytes: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            disclaimer: DEFAULT_DISCLAIMER.to_string(),
            update_mode: UpdateMode::default(),
            overlap_policy: OverlapPolicy::default(),
            max_prompt_bytes: DEFAULT_MAX_PROMPT_BYTES,
        }
    }
}

/// Errors from relay operations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    /// No panel with this id is open
    #[error("unknown panel: {0}")]
    UnknownPanel(PanelId),
    /// Prompt exceeds the configured limit
    #[error("prompt too large: {size} bytes (max: {max})")]
    PromptTooLarge {
        /// Prompt size
        size: usize,
        /// Limit
        max: usize,
    },
    /// A response is already streaming and overlap is rejected
    #[error("a response is already streaming")]
    Busy {
        /// The request still streaming
        active: RequestId,
    },
}

/// Relays panel prompts to an LLM backend
///
/// Cheap to clone; clones share the backend and the panel registry.
pub struct RelayHandler<B: LlmBackend> {
    backend: Arc<B>,
    config: RelayConfig,
    prompt: PromptBuilder,
    validator: InputValidator,
    registry: PanelRegistry,
}

impl<B: LlmBackend> Clone for RelayHandler<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: self.config.clone(),
            prompt: self.prompt.clone(),
            validator: self.validator.clone(),
            registry: self.registry.clone(),
        }
    }
}

impl<B: LlmBackend + 'static> RelayHandler<B> {
    /// Create a handler
    pub fn new(backend: B, config: RelayConfig) -> Self {
        let prompt = PromptBuilder::new(config.disclaimer.clone());
        let validator = InputValidator::new(config.max_prompt_bytes);
        Self {
            backend: Arc::new(backend),
            config,
            prompt,
            validator,
            registry: PanelRegistry::new(),
        }
    }

    /// Open panels
    #[must_use]
    pub fn registry(&self) -> &PanelRegistry {
        &self.registry
    }

    /// Relay configuration
    #[must_use]
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// The backend
    #[must_use]
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Register a newly opened panel
    pub fn open_panel(&self, tx: mpsc::Sender<PanelMessage>) -> PanelId {
        self.registry.register(tx)
    }

    /// Dispose of a panel, cancelling its stream
    ///
    /// Returns the final state of the panel's session, if it was open.
    pub fn close_panel(&self, panel_id: &PanelId) -> Option<SessionSnapshot> {
        let snapshot = self.registry.unregister(panel_id)?;
        let counts = &snapshot.metadata;
        tracing::info!(
            panel_id = %panel_id,
            started = counts.requests_started,
            completed = counts.requests_completed,
            failed = counts.requests_failed,
            cancelled = counts.requests_cancelled,
            "Panel closed"
        );
        Some(snapshot)
    }

    /// Dispatch an event from a panel
    ///
    /// # Errors
    ///
    /// See [`RelayHandler::chat`]; `Stop` never fails.
    pub async fn handle_event(
        &self,
        panel_id: &PanelId,
        event: PanelEvent,
    ) -> Result<(), RelayError> {
        match event {
            PanelEvent::Chat { prompt } => self.chat(panel_id, &prompt).await.map(|_| ()),
            PanelEvent::Stop => {
                self.stop(panel_id);
                Ok(())
            }
        }
    }

    /// Start streaming an answer to `prompt`
    ///
    /// Returns `Ok(None)` for a blank prompt, which is ignored without
    /// contacting the backend. Refusals are also reported to the panel as
    /// `chatError` followed by `streamEnd{failed}`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownPanel`], [`RelayError::PromptTooLarge`]
    /// or [`RelayError::Busy`].
    pub async fn chat(
        &self,
        panel_id: &PanelId,
        prompt: &str,
    ) -> Result<Option<RequestId>, RelayError> {
        let tx = self
            .registry
            .sender(panel_id)
            .ok_or(RelayError::UnknownPanel(*panel_id))?;

        match self.validator.validate_prompt(prompt) {
            ValidationResult::Valid => {}
            ValidationResult::Empty => {
                tracing::debug!(panel_id = %panel_id, "Ignoring blank prompt");
                return Ok(None);
            }
            ValidationResult::TooLarge { size, max } => {
                let err = RelayError::PromptTooLarge { size, max };
                refuse(&tx, RequestId::new(), &err);
                return Err(err);
            }
        }

        let request_id = RequestId::new();
        let ticket = match self.registry.begin_stream(
            panel_id,
            &request_id,
            self.config.overlap_policy,
        ) {
            Ok(ticket) => ticket,
            Err(err) => {
                if matches!(err, RelayError::Busy { .. }) {
                    refuse(&tx, request_id, &err);
                }
                return Err(err);
            }
        };

        let request = LlmRequest::user_prompt(self.prompt.augment(prompt), &self.config.model);
        let job = StreamJob {
            panel_id: *panel_id,
            request_id: request_id.clone(),
            tx: ticket.tx,
            cancel: ticket.cancel,
            mode: self.config.update_mode,
        };

        tracing::info!(
            panel_id = %panel_id,
            request_id = %request_id,
            prompt_bytes = prompt.len(),
            "Chat request"
        );

        let backend = Arc::clone(&self.backend);
        let registry = self.registry.clone();
        let panel_id = *panel_id;
        let task_request_id = request_id.clone();
        tokio::spawn(async move {
            let outcome = run_stream(backend.as_ref(), request, job).await;
            registry.finish_stream(&panel_id, &task_request_id, outcome);
        });

        Ok(Some(request_id))
    }

    /// Cancel the panel's running stream
    ///
    /// Returns true if a stream was cancelled.
    pub fn stop(&self, panel_id: &PanelId) -> bool {
        match self.registry.cancel_stream(panel_id) {
            Some(request_id) => {
                tracing::info!(panel_id = %panel_id, request_id = %request_id, "Stop requested");
                true
            }
            None => {
                tracing::debug!(panel_id = %panel_id, "Stop with nothing streaming");
                false
            }
        }
    }

    /// Cancel every stream and close every panel
    pub fn shutdown(&self) {
        tracing::info!(panels = self.registry.len(), "Relay shutting down");
        self.registry.close_all();
    }
}

/// Tell the panel a prompt was refused
///
/// Sent from its own task: the caller may be the loop draining this channel.
fn refuse(tx: &mpsc::Sender<PanelMessage>, request_id: RequestId, err: &RelayError) {
    tracing::warn!(request_id = %request_id, error = %err, "Prompt refused");
    let messages = PanelMessage::refusal(request_id, err);
    let tx = tx.clone();
    tokio::spawn(async move {
        for message in messages {
            if tx.send(message).await.is_err() {
                break;
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_update_mode_parse() {
        assert_eq!("cumulative".parse::<UpdateMode>(), Ok(UpdateMode::Cumulative));
        assert_eq!("Delta".parse::<UpdateMode>(), Ok(UpdateMode::Delta));
        assert!("sideways".parse::<UpdateMode>().is_err());
    }

    #[test]
    fn test_overlap_policy_parse() {
        assert_eq!(
            "cancel_previous".parse::<OverlapPolicy>(),
            Ok(OverlapPolicy::CancelPrevious)
        );
        assert_eq!("reject".parse::<OverlapPolicy>(), Ok(OverlapPolicy::Reject));
        assert!("queue".parse::<OverlapPolicy>().is_err());
    }

    #[test]
    fn test_policy_display_round_trips() {
        for policy in [OverlapPolicy::CancelPrevious, OverlapPolicy::Reject] {
            assert_eq!(policy.to_string().parse::<OverlapPolicy>(), Ok(policy));
        }
    }

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.model, "deepseek-r1:8b");
        assert_eq!(config.update_mode, UpdateMode::Cumulative);
        assert_eq!(config.overlap_policy, OverlapPolicy::CancelPrevious);
        assert_eq!(config.max_prompt_bytes, 32 * 1024);
    }

    #[test]
    fn test_busy_display() {
        let err = RelayError::Busy {
            active: RequestId::new(),
        };
        assert_eq!(err.to_string(), "a response is already streaming");
    }
}
