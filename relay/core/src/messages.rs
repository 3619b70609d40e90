//! Panel Messages
//!
//! The closed set of messages crossing the panel boundary. A panel is a
//! "dumb" renderer: it forwards what the user did as a [`PanelEvent`] and
//! renders whatever [`PanelMessage`] the relay sends back.
//!
//! # Wire Format
//!
//! Both directions are JSON objects tagged by a `command` field, matching the
//! `postMessage` payloads the panel script speaks:
//!
//! ```text
//! panel -> relay   { "command": "chat", "promptByUser": "..." }
//!                  { "command": "stop" }
//! relay -> panel   { "command": "chatResponse", "text": "...", "requestId": "req_3" }
//!                  { "command": "chatDelta",    "text": "...", "requestId": "req_3" }
//!                  { "command": "chatError",    "message": "Error: ...", "requestId": "req_3" }
//!                  { "command": "streamEnd",    "outcome": "completed", "requestId": "req_3" }
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Events from a panel to the relay
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum PanelEvent {
    /// The user pressed Ask
    Chat {
        /// Prompt text exactly as typed
        #[serde(rename = "promptByUser")]
        prompt: String,
    },
    /// The user pressed Stop
    Stop,
}

impl PanelEvent {
    /// Decode and validate an event received from a panel
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if the payload is too large, is not JSON,
    /// or is not one of the known commands.
    pub fn from_json(payload: &str, max_size: usize) -> Result<Self, ProtocolError> {
        if payload.len() > max_size {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: max_size,
            });
        }

        let value: serde_json::Value = serde_json::from_str(payload)
            .map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        let command = value
            .get("command")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
            .ok_or(ProtocolError::MissingCommand)?;

        if !matches!(command.as_str(), "chat" | "stop") {
            return Err(ProtocolError::UnknownCommand(command));
        }

        serde_json::from_value(value).map_err(|e| ProtocolError::InvalidPayload {
            command,
            reason: e.to_string(),
        })
    }
}

/// Messages from the relay to a panel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "camelCase")]
pub enum PanelMessage {
    /// The whole response accumulated so far
    #[serde(rename_all = "camelCase")]
    ChatResponse {
        /// Accumulated text
        text: String,
        /// Request this update belongs to
        request_id: RequestId,
    },

    /// Only the newest fragment; the panel appends it
    #[serde(rename_all = "camelCase")]
    ChatDelta {
        /// Fragment text
        text: String,
        /// Request this update belongs to
        request_id: RequestId,
    },

    /// The request failed; replaces whatever was displayed
    #[serde(rename_all = "camelCase")]
    ChatError {
        /// Human-readable text, always starting with `Error: `
        message: String,
        /// Request that failed
        request_id: RequestId,
    },

    /// The request is over, whatever the reason
    #[serde(rename_all = "camelCase")]
    StreamEnd {
        /// How it ended
        outcome: StreamOutcome,
        /// Request that ended
        request_id: RequestId,
    },
}

impl PanelMessage {
    /// Build the error message shown to the user for a failure
    pub fn error(request_id: RequestId, error: impl fmt::Display) -> Self {
        Self::ChatError {
            message: format!("Error: {error}"),
            request_id,
        }
    }

    /// The pair sent for a request refused before it could stream
    ///
    /// A `chatError` followed by `streamEnd{failed}`, so the panel stops
    /// waiting either way.
    pub fn refusal(request_id: RequestId, error: impl fmt::Display) -> [Self; 2] {
        [
            Self::error(request_id.clone(), error),
            Self::StreamEnd {
                outcome: StreamOutcome::Failed,
                request_id,
            },
        ]
    }

    /// Request this message belongs to
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        match self {
            Self::ChatResponse { request_id, .. }
            | Self::ChatDelta { request_id, .. }
            | Self::ChatError { request_id, .. }
            | Self::StreamEnd { request_id, .. } => request_id,
        }
    }

    /// Encode for the wire
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::InvalidJson(e.to_string()))
    }
}

/// How a streaming request ended
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamOutcome {
    /// The backend finished the response
    Completed,
    /// The backend failed
    Failed,
    /// The panel stopped it, replaced it, or went away
    Cancelled,
}

impl fmt::Display for StreamOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Request identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    /// Generate a new unique request ID
    pub fn new() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        Self(format!("req_{id}"))
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Panel identifier
///
/// Assigned when a panel connects and stable until it disconnects.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PanelId(uuid::Uuid);

impl PanelId {
    /// Create a new random panel ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for PanelId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PanelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panel-{}", self.0)
    }
}

/// Errors decoding or encoding panel messages
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// Payload exceeds the configured limit
    #[error("payload of {size} bytes exceeds limit of {max} bytes")]
    PayloadTooLarge {
        /// Actual size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },
    /// Not valid JSON
    #[error("invalid JSON: {0}")]
    InvalidJson(String),
    /// JSON object without a `command` string
    #[error("message has no command")]
    MissingCommand,
    /// A command this relay does not handle
    #[error("unknown command: {0}")]
    UnknownCommand(String),
    /// A known command with missing or mistyped fields
    #[error("invalid {command} message: {reason}")]
    InvalidPayload {
        /// The command that was sent
        command: String,
        /// What was wrong with it
        reason: String,
    },
    /// Binary or otherwise non-text frame
    #[error("unsupported frame type: {0}")]
    UnsupportedFrame(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: usize = 64 * 1024;

    #[test]
    fn test_decode_chat() {
        let event =
            PanelEvent::from_json(r#"{"command":"chat","promptByUser":"hello"}"#, MAX).unwrap();
        assert_eq!(
            event,
            PanelEvent::Chat {
                prompt: "hello".to_string()
            }
        );
    }

    #[test]
    fn test_decode_stop() {
        let event = PanelEvent::from_json(r#"{"command":"stop"}"#, MAX).unwrap();
        assert_eq!(event, PanelEvent::Stop);
    }

    #[test]
    fn test_decode_rejects_unknown_command() {
        let err = PanelEvent::from_json(r#"{"command":"explode"}"#, MAX).unwrap_err();
        assert_eq!(err, ProtocolError::UnknownCommand("explode".to_string()));
    }

    #[test]
    fn test_decode_rejects_missing_prompt() {
        let err = PanelEvent::from_json(r#"{"command":"chat"}"#, MAX).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { ref command, .. } if command == "chat"));
    }

    #[test]
    fn test_decode_rejects_non_string_prompt() {
        let err = PanelEvent::from_json(r#"{"command":"chat","promptByUser":42}"#, MAX).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidPayload { .. }));
    }

    #[test]
    fn test_decode_rejects_missing_command() {
        let err = PanelEvent::from_json(r#"{"promptByUser":"hi"}"#, MAX).unwrap_err();
        assert_eq!(err, ProtocolError::MissingCommand);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = PanelEvent::from_json("{not json", MAX).unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidJson(_)));
    }

    #[test]
    fn test_decode_rejects_oversize() {
        let payload = format!(r#"{{"command":"chat","promptByUser":"{}"}}"#, "a".repeat(100));
        let err = PanelEvent::from_json(&payload, 50).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge { max: 50, .. }));
    }

    #[test]
    fn test_encode_chat_response_shape() {
        let msg = PanelMessage::ChatResponse {
            text: "Hi there".to_string(),
            request_id: RequestId("req_7".to_string()),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "command": "chatResponse",
                "text": "Hi there",
                "requestId": "req_7",
            })
        );
    }

    #[test]
    fn test_encode_stream_end_shape() {
        let msg = PanelMessage::StreamEnd {
            outcome: StreamOutcome::Cancelled,
            request_id: RequestId("req_1".to_string()),
        };
        let value: serde_json::Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(value["command"], "streamEnd");
        assert_eq!(value["outcome"], "cancelled");
    }

    #[test]
    fn test_error_message_prefix() {
        let msg = PanelMessage::error(RequestId::new(), "connection refused");
        match msg {
            PanelMessage::ChatError { message, .. } => {
                assert_eq!(message, "Error: connection refused");
            }
            other => panic!("expected ChatError, got {other:?}"),
        }
    }

    #[test]
    fn test_refusal_ends_the_request() {
        let id = RequestId("req_9".to_string());
        let [error, end] = PanelMessage::refusal(id.clone(), "prompt too large");
        assert_eq!(
            error,
            PanelMessage::ChatError {
                message: "Error: prompt too large".to_string(),
                request_id: id.clone(),
            }
        );
        assert_eq!(
            end,
            PanelMessage::StreamEnd {
                outcome: StreamOutcome::Failed,
                request_id: id,
            }
        );
    }

    #[test]
    fn test_request_ids_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_panel_id_display() {
        let id = PanelId::new();
        let formatted = id.to_string();
        assert!(formatted.starts_with("panel-"));
        // panel- (6 chars) + UUID (36 chars)
        assert_eq!(formatted.len(), 42);
    }
}
