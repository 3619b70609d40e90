//! Ollama Backend Implementation
//!
//! LLM backend for Ollama (local LLM server).
//!
//! # Ollama API
//!
//! - `/api/chat` - Chat completions, streamed as newline-delimited JSON
//! - `/api/tags` - List available models
//!
//! Each streamed line looks like
//! `{"message":{"role":"assistant","content":"..."},"done":false}`; the last
//! one carries `"done":true`. Failures arrive either as an HTTP error status or
//! as a `{"error":"..."}` line in the middle of the stream.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;

use super::traits::{BackendConfig, LlmBackend, LlmRequest, ModelInfo, StreamingToken};

/// One decoded line of the chat stream
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ChatChunk {
    /// Content fragment
    Fragment(String),
    /// The server signalled the end of the response
    Done,
    /// The server reported an error, or the line could not be decoded
    Error(String),
}

#[derive(Deserialize)]
struct WireLine {
    #[serde(default)]
    message: Option<WireMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: String,
}

/// Incremental decoder for the NDJSON chat stream
///
/// Bytes are buffered until a full line is available, so fragments split
/// across HTTP chunks (including inside a multi-byte character) decode
/// correctly.
#[derive(Debug, Default)]
pub(crate) struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes, returning every chunk completed by them
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<ChatChunk> {
        self.buffer.extend_from_slice(bytes);

        let mut chunks = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            chunks.extend(Self::decode_line(&line[..line.len() - 1]));
        }
        chunks
    }

    /// Decode whatever is left once the body ends without a trailing newline
    pub(crate) fn finish(&mut self) -> Vec<ChatChunk> {
        let rest = std::mem::take(&mut self.buffer);
        Self::decode_line(&rest)
    }

    fn decode_line(raw: &[u8]) -> Vec<ChatChunk> {
        let line = String::from_utf8_lossy(raw);
        let line = line.trim();
        if line.is_empty() {
            return Vec::new();
        }

        let wire: WireLine = match serde_json::from_str(line) {
            Ok(wire) => wire,
            Err(e) => return vec![ChatChunk::Error(format!("malformed response line: {e}"))],
        };

        if let Some(error) = wire.error {
            return vec![ChatChunk::Error(error)];
        }

        let mut chunks = Vec::with_capacity(2);
        if let Some(message) = wire.message {
            chunks.push(ChatChunk::Fragment(message.content));
        }
        if wire.done {
            chunks.push(ChatChunk::Done);
        }
        chunks
    }
}

/// Ollama backend client
#[derive(Clone)]
pub struct OllamaBackend {
    /// Connection settings
    config: BackendConfig,
    /// HTTP client
    http_client: reqwest::Client,
}

impl OllamaBackend {
    /// Create from `BackendConfig`
    #[must_use]
    pub fn from_config(config: &BackendConfig) -> Self {
        // No overall timeout: a long answer from a slow local model is normal.
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default HTTP client");
                reqwest::Client::new()
            });

        Self {
            config: config.clone(),
            http_client,
        }
    }

    /// Get the base URL
    #[must_use]
    pub fn base_url(&self) -> String {
        self.config.base_url()
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url())
    }

    fn tags_url(&self) -> String {
        format!("{}/api/tags", self.base_url())
    }

    /// Build the JSON body for `/api/chat`
    fn build_body(request: &LlmRequest) -> serde_json::Value {
        json!({
            "model": request.model,
            "messages": request.messages,
            "stream": request.stream,
        })
    }

    /// Turn a non-success response into an error, preferring Ollama's own message
    async fn error_from_response(response: reqwest::Response) -> anyhow::Error {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<serde_json::Value>(&body)
            .ok()
            .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(String::from))
            .unwrap_or(body);
        anyhow::anyhow!("Ollama returned {status}: {message}")
    }
}

#[async_trait]
impl LlmBackend for OllamaBackend {
    fn name(&self) -> &'static str {
        "Ollama"
    }

    async fn health_check(&self) -> bool {
        self.http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(5))
            .send()
            .await
            .is_ok_and(|r| r.status().is_success())
    }

    async fn send_streaming(
        &self,
        request: &LlmRequest,
    ) -> anyhow::Result<mpsc::Receiver<StreamingToken>> {
        let (tx, rx) = mpsc::channel(100);

        let response = self
            .http_client
            .post(self.chat_url())
            .json(&Self::build_body(request))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let mut stream = response.bytes_stream();

        tokio::spawn(async move {
            let mut decoder = NdjsonDecoder::new();

            loop {
                let chunk = tokio::select! {
                    // Receiver dropped: stop reading and let the body drop
                    () = tx.closed() => return,
                    chunk = stream.next() => chunk,
                };

                let (chunks, body_ended) = match chunk {
                    Some(Ok(bytes)) => (decoder.push(&bytes), false),
                    Some(Err(e)) => {
                        let _ = tx.send(StreamingToken::Error(e.to_string())).await;
                        return;
                    }
                    None => (decoder.finish(), true),
                };

                for chunk in chunks {
                    match chunk {
                        ChatChunk::Fragment(text) => {
                            if tx.send(StreamingToken::Token(text)).await.is_err() {
                                return;
                            }
                        }
                        ChatChunk::Done => {
                            let _ = tx.send(StreamingToken::Complete).await;
                            return;
                        }
                        ChatChunk::Error(error) => {
                            let _ = tx.send(StreamingToken::Error(error)).await;
                            return;
                        }
                    }
                }

                if body_ended {
                    break;
                }
            }

            // Body ended without a done line
            let _ = tx
                .send(StreamingToken::Error(
                    "stream ended before the response was complete".to_string(),
                ))
                .await;
        });

        Ok(rx)
    }

    async fn list_models(&self) -> anyhow::Result<Vec<ModelInfo>> {
        let response = self
            .http_client
            .get(self.tags_url())
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_from_response(response).await);
        }

        let data: serde_json::Value = response.json().await?;

        let models = data
            .get("models")
            .and_then(|m| m.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|m| {
                        let name = m.get("name")?.as_str()?.to_string();
                        let size = m.get("size").and_then(serde_json::Value::as_u64);
                        let parameters = m
                            .get("details")
                            .and_then(|d| d.get("parameter_size"))
                            .and_then(|p| p.as_str())
                            .map(String::from);

                        Some(ModelInfo {
                            name,
                            size,
                            parameters,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        Ok(models)
    }
}
