//! LLM Backend Integration
//!
//! This module provides abstracted access to chat-completion backends through
//! a common trait interface.
//!
//! # Available Backends
//!
//! - **Ollama**: Local LLM server (default)
//!
//! # Usage
//!
//! ```ignore
//! use relay_core::backend::{BackendConfig, LlmBackend, LlmRequest, OllamaBackend};
//!
//! let backend = OllamaBackend::from_config(&BackendConfig::default());
//! let request = LlmRequest::user_prompt("Hello!", "deepseek-r1:8b");
//! let rx = backend.send_streaming(&request).await?;
//! ```

mod ollama;
mod traits;

pub use ollama::OllamaBackend;
pub use traits::{
    BackendConfig, ChatMessage, ChatRole, LlmBackend, LlmRequest, ModelInfo, StreamingToken,
};
