//! LLM Backend Traits
//!
//! Trait definitions for chat-completion backends. The relay only needs three
//! things from a backend: start a streaming completion for one prompt, iterate
//! the fragments it emits, and surface transport/model failures as errors.
//! Everything provider-specific (API format, endpoints) lives in the
//! implementation.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Token stream events from LLM backends
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamingToken {
    /// A content fragment from the response
    Token(String),
    /// Response completed successfully
    Complete,
    /// Error occurred during streaming
    Error(String),
}

/// Role of a chat message sent to the backend
///
/// The relay keeps no history, so every request is a single user turn.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// The person typing into the panel
    User,
}

/// A single message in a chat completion request
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who authored the message
    pub role: ChatRole,
    /// Message text
    pub content: String,
}

impl ChatMessage {
    /// Create a user-role message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }
}

/// A chat completion request
#[derive(Clone, Debug, PartialEq)]
pub struct LlmRequest {
    /// Model to use (backend-specific identifier)
    pub model: String,
    /// Messages, oldest first
    pub messages: Vec<ChatMessage>,
    /// Whether to stream the response
    pub stream: bool,
}

impl LlmRequest {
    /// Create a streaming request holding a single user message
    pub fn user_prompt(prompt: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            messages: vec![ChatMessage::user(prompt)],
            stream: true,
        }
    }
}

/// Information about an available model
#[derive(Clone, Debug)]
pub struct ModelInfo {
    /// Model identifier
    pub name: String,
    /// Model size in bytes (if known)
    pub size: Option<u64>,
    /// Parameter count (if known)
    pub parameters: Option<String>,
}

/// LLM Backend trait
///
/// Implement this trait to relay panels to a different provider.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Get the backend name (e.g., "Ollama")
    fn name(&self) -> &str;

    /// Check if the backend is healthy and reachable
    async fn health_check(&self) -> bool;

    /// Send a request and get a streaming response
    ///
    /// Returns a channel receiver that yields fragments as they arrive. The
    /// channel closes after `Complete` or `Error`. Dropping the receiver stops
    /// the backend from reading any further.
    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>>;

    /// List available models
    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>>;
}

/// Backend connection configuration
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendConfig {
    /// Ollama host address
    pub host: String,
    /// Ollama port number
    pub port: u16,
    /// Connect timeout in milliseconds (the stream itself has no timeout)
    pub connect_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 11434,
            connect_timeout_ms: 5_000,
        }
    }
}

impl BackendConfig {
    /// Base URL of the server
    ///
    /// `host` may carry a scheme and a port of its own, as in Ollama's
    /// `OLLAMA_HOST=http://127.0.0.1:11434`; `port` only fills in a missing one.
    #[must_use]
    pub fn base_url(&self) -> String {
        let host = self.host.trim_end_matches('/');
        let (scheme, authority) = host.split_once("://").unwrap_or(("http", host));
        if has_port(authority) {
            format!("{scheme}://{authority}")
        } else {
            format!("{scheme}://{authority}:{}", self.port)
        }
    }
}

/// Whether `host[:port]` names a port; bracketed IPv6 colons do not count
fn has_port(authority: &str) -> bool {
    authority
        .rsplit(']')
        .next()
        .is_some_and(|tail| tail.contains(':'))
}
