//! Panel Transport
//!
//! The relay core never touches sockets. The daemon's WebSocket handler maps
//! each library frame onto a [`PanelFrame`] and lets the
//! [`PanelFrameAdapter`] decide what it means; outbound [`PanelMessage`]s
//! come back as text frames.
//!
//! [`PanelMessage`]: crate::messages::PanelMessage

mod frame_adapter;

pub use frame_adapter::{FrameAction, PanelFrame, PanelFrameAdapter};
