//! Relay Core - Chat Panel to Local LLM Relay
//!
//! Headless core of the deep-chat panel. A panel sends a prompt; the relay
//! appends a fixed disclaimer, streams the answer from a local Ollama model
//! and pushes the growing response back to that panel. It has no knowledge
//! of sockets or HTTP; the `relay-daemon` binary provides those.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    Panels (browser pages)                     │
//! │        ┌─────────┐      ┌─────────┐      ┌─────────┐          │
//! │        │ panel-a │      │ panel-b │      │ panel-c │          │
//! │        └────┬────┘      └────┬────┘      └────┬────┘          │
//! │             └─────── PanelEvent (up) ─────────┘               │
//! │                     PanelMessage (down)                       │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┼───────────────────────────────┐
//! │                         RELAY CORE                            │
//! │  ┌───────────────┐  ┌────────┴──────┐  ┌──────────────────┐   │
//! │  │ PanelRegistry │◀─│ RelayHandler  │─▶│ run_stream task  │   │
//! │  │  (sessions)   │  │               │  │  (per request)   │   │
//! │  └───────────────┘  └───────────────┘  └────────┬─────────┘   │
//! └─────────────────────────────────────────────────┼────────────┘
//!                                                   │
//!                                       LlmBackend (Ollama /api/chat)
//! ```
//!
//! # Key Types
//!
//! - [`RelayHandler`]: entry point; opens panels and relays their prompts
//! - [`PanelEvent`] / [`PanelMessage`]: the closed panel protocol
//! - [`PanelRegistry`]: one [`PanelSession`] per open panel
//! - [`LlmBackend`]: streaming backend trait, implemented by [`OllamaBackend`]
//! - [`Settings`]: layered configuration
//!
//! # Module Overview
//!
//! - [`backend`]: LLM backend abstraction and the Ollama client
//! - [`config`]: TOML + environment configuration
//! - [`messages`]: panel protocol types
//! - [`panel_registry`]: open panels and their streams
//! - [`prompt`]: disclaimer augmentation
//! - [`relay`]: the relay handler
//! - [`security`]: prompt validation
//! - [`session`]: per-panel session state
//! - [`streaming`]: per-request stream task
//! - [`transport`]: WebSocket frame adapter
//! - [`ui`]: the embedded panel page

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
pub mod messages;
pub mod panel_registry;
pub mod prompt;
pub mod relay;
pub mod security;
pub mod session;
pub mod streaming;
pub mod transport;
pub mod ui;

// Re-exports for convenience
pub use backend::{
    BackendConfig, ChatMessage, ChatRole, LlmBackend, LlmRequest, ModelInfo, OllamaBackend,
    StreamingToken,
};
pub use config::{ConfigError, ConfigSource, ServerSettings, Settings};
pub use messages::{PanelEvent, PanelId, PanelMessage, ProtocolError, RequestId, StreamOutcome};
pub use panel_registry::{PanelRegistry, StreamTicket};
pub use prompt::{PromptBuilder, DEFAULT_DISCLAIMER};
pub use relay::{OverlapPolicy, RelayConfig, RelayError, RelayHandler, UpdateMode};
pub use security::{InputValidator, ValidationResult};
pub use session::{PanelSession, SessionMetadata, SessionSnapshot, SessionState};
pub use streaming::{run_stream, ResponseAccumulator, StreamJob};
pub use transport::{FrameAction, PanelFrame, PanelFrameAdapter};
pub use ui::render_panel;
