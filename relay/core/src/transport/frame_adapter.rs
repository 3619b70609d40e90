//! WebSocket frame adapter
//!
//! Panels speak JSON text frames. Binary frames are refused; control frames
//! are answered or end the connection.

use crate::messages::{PanelEvent, PanelMessage, ProtocolError};

/// A WebSocket frame, independent of the WebSocket library
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PanelFrame {
    /// UTF-8 text
    Text(String),
    /// Raw bytes
    Binary(Vec<u8>),
    /// Ping with payload
    Ping(Vec<u8>),
    /// Pong with payload
    Pong(Vec<u8>),
    /// Close handshake
    Close,
}

/// What the connection handler should do with an inbound frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FrameAction {
    /// Hand the event to the relay
    Event(PanelEvent),
    /// Reply with a pong carrying this payload
    Pong(Vec<u8>),
    /// Nothing to do
    Ignore,
    /// The panel closed the connection
    Close,
}

/// Converts between frames and panel messages
#[derive(Clone, Copy, Debug)]
pub struct PanelFrameAdapter {
    max_message_size: usize,
}

impl PanelFrameAdapter {
    /// Create an adapter refusing text frames above `max_message_size` bytes
    #[must_use]
    pub fn new(max_message_size: usize) -> Self {
        Self { max_message_size }
    }

    /// Interpret an inbound frame
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] for binary frames and for text that is not
    /// a valid [`PanelEvent`]. The connection stays open either way.
    pub fn decode(&self, frame: PanelFrame) -> Result<FrameAction, ProtocolError> {
        match frame {
            PanelFrame::Text(text) => {
                PanelEvent::from_json(&text, self.max_message_size).map(FrameAction::Event)
            }
            PanelFrame::Binary(data) => Err(ProtocolError::UnsupportedFrame(format!(
                "binary ({} bytes)",
                data.len()
            ))),
            PanelFrame::Ping(payload) => Ok(FrameAction::Pong(payload)),
            PanelFrame::Pong(_) => Ok(FrameAction::Ignore),
            PanelFrame::Close => Ok(FrameAction::Close),
        }
    }

    /// Encode an outbound message as a text frame
    ///
    /// # Errors
    ///
    /// Returns a [`ProtocolError`] if serialization fails.
    pub fn encode(&self, message: &PanelMessage) -> Result<PanelFrame, ProtocolError> {
        message.to_json().map(PanelFrame::Text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::RequestId;

    fn adapter() -> PanelFrameAdapter {
        PanelFrameAdapter::new(1024)
    }

    #[test]
    fn test_decode_text_event() {
        let action = adapter()
            .decode(PanelFrame::Text(r#"{"command":"stop"}"#.to_string()))
            .unwrap();
        assert_eq!(action, FrameAction::Event(PanelEvent::Stop));
    }

    #[test]
    fn test_binary_is_refused() {
        let err = adapter().decode(PanelFrame::Binary(vec![1, 2, 3])).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedFrame(_)));
    }

    #[test]
    fn test_control_frames() {
        let adapter = adapter();
        assert_eq!(
            adapter.decode(PanelFrame::Ping(b"hb".to_vec())).unwrap(),
            FrameAction::Pong(b"hb".to_vec())
        );
        assert_eq!(
            adapter.decode(PanelFrame::Pong(Vec::new())).unwrap(),
            FrameAction::Ignore
        );
        assert_eq!(adapter.decode(PanelFrame::Close).unwrap(), FrameAction::Close);
    }

    #[test]
    fn test_oversize_text_is_refused() {
        let adapter = PanelFrameAdapter::new(16);
        let frame = PanelFrame::Text(r#"{"command":"chat","promptByUser":"long"}"#.to_string());
        assert!(matches!(
            adapter.decode(frame),
            Err(ProtocolError::PayloadTooLarge { max: 16, .. })
        ));
    }

    #[test]
    fn test_encode_is_text() {
        let frame = adapter()
            .encode(&PanelMessage::error(RequestId::new(), "boom"))
            .unwrap();
        match frame {
            PanelFrame::Text(text) => assert!(text.contains("\"Error: boom\"")),
            other => panic!("expected text frame, got {other:?}"),
        }
    }
}
