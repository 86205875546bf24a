//! Completions/chat text provider over HTTP.
//!
//! Works with Together AI and any endpoint exposing the OpenAI-style
//! `/completions` and `/chat/completions` routes.
//!
//! Supports:
//! - Flat prompts via `/completions`, role-tagged messages via `/chat/completions`
//! - Streaming SSE with tolerant chunk parsing
//! - Heterogeneous response shapes (see [`crate::extract`])

use async_trait::async_trait;
use futures::StreamExt;
use matilda_core::error::ProviderError;
use matilda_core::provider::*;
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::extract::{extract_fragment, extract_text_or_placeholder};

/// A text provider speaking the completions/chat-completions HTTP dialect.
pub struct CompletionsProvider {
    name: String,
    base_url: String,
    api_key: Option<String>,
    model: Option<String>,
    streaming: bool,
    chat_only: bool,
    client: reqwest::Client,
}

impl CompletionsProvider {
    /// Create a new provider. A missing key makes every call `NotConfigured`.
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Self {
        let client = match reqwest::Client::builder().timeout(timeout).build() {
            Ok(client) => client,
            Err(e) => {
                warn!(error = %e, "HTTP client setup failed, requests run without a timeout");
                reqwest::Client::new()
            }
        };

        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: None,
            streaming: true,
            chat_only: false,
            client,
        }
    }

    /// Create a Together AI provider (convenience constructor).
    pub fn together(api_key: Option<String>) -> Self {
        Self::new(
            "together",
            matilda_config::TOGETHER_API_URL,
            api_key,
            Duration::from_secs(120),
        )
    }

    /// Use this model instead of the one carried by each request.
    pub fn with_model(mut self, model: Option<String>) -> Self {
        self.model = model;
        self
    }

    /// Declare whether the endpoint streams incrementally.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Send flat prompts as a single user message to `/chat/completions`.
    pub fn chat_only(mut self, chat_only: bool) -> Self {
        self.chat_only = chat_only;
        self
    }

    fn api_key(&self) -> Result<&str, ProviderError> {
        self.api_key.as_deref().ok_or_else(|| {
            ProviderError::NotConfigured(format!("No API key configured for '{}'", self.name))
        })
    }

    /// Endpoint URL and JSON body for a request.
    fn build_body(&self, request: &GenerationRequest, stream: bool) -> (String, Value) {
        let model = self.model.as_deref().unwrap_or(request.model());
        let sampling = request.sampling();

        let (path, mut body) = match (request.input(), self.chat_only) {
            (GenerationInput::Prompt(prompt), false) => (
                "completions",
                serde_json::json!({ "model": model, "prompt": prompt }),
            ),
            (input, _) => (
                "chat/completions",
                serde_json::json!({
                    "model": model,
                    "messages": to_api_messages(&input.to_messages()),
                }),
            ),
        };

        body["max_tokens"] = serde_json::json!(sampling.max_tokens);
        body["temperature"] = serde_json::json!(sampling.temperature);
        body["top_p"] = serde_json::json!(sampling.top_p);
        body["top_k"] = serde_json::json!(sampling.top_k);
        body["stream"] = serde_json::json!(stream);

        (format!("{}/{path}", self.base_url), body)
    }

    async fn send(
        &self,
        url: &str,
        body: &Value,
        stream: bool,
    ) -> Result<reqwest::Response, ProviderError> {
        let api_key = self.api_key()?;
        let mut builder = self
            .client
            .post(url)
            .header("Authorization", format!("Bearer {api_key}"))
            .header("Content-Type", "application/json");
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = builder
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;

        let status = response.status().as_u16();

        if status == 429 {
            return Err(ProviderError::RateLimited {
                retry_after_secs: 5,
            });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthenticationFailed(
                "Invalid API key or insufficient permissions".into(),
            ));
        }

        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(provider = %self.name, status, body = %error_body, "Provider returned error");
            return Err(ProviderError::ApiError {
                status_code: status,
                message: error_body,
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl TextProvider for CompletionsProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn complete(&self, request: GenerationRequest) -> Result<TextResponse, ProviderError> {
        let (url, body) = self.build_body(&request, false);
        debug!(provider = %self.name, url = %url, "Sending completion request");

        let response = self.send(&url, &body, false).await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(format!("Failed to parse response: {e}")))?;

        Ok(TextResponse {
            text: extract_text_or_placeholder(&payload),
            model: payload
                .get("model")
                .and_then(Value::as_str)
                .unwrap_or(request.model())
                .to_string(),
            usage: extract_usage(&payload),
        })
    }

    async fn stream(&self, request: GenerationRequest) -> Result<ChunkReceiver, ProviderError> {
        if !self.streaming {
            let response = self.complete(request).await?;
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            let _ = tx
                .send(Ok(StreamChunk {
                    content: Some(response.text),
                    done: true,
                }))
                .await;
            return Ok(rx);
        }

        let (url, body) = self.build_body(&request, true);
        debug!(provider = %self.name, url = %url, "Sending streaming request");

        let response = self.send(&url, &body, true).await?;

        let (tx, rx) = tokio::sync::mpsc::channel(64);
        let provider_name = self.name.clone();

        // Spawn task to read the SSE byte stream and parse chunks
        tokio::spawn(async move {
            let mut byte_stream = response.bytes_stream();
            let mut lines = SseLines::default();

            while let Some(chunk_result) = byte_stream.next().await {
                let bytes = match chunk_result {
                    Ok(b) => b,
                    Err(e) => {
                        let _ = tx
                            .send(Err(ProviderError::StreamInterrupted(e.to_string())))
                            .await;
                        return;
                    }
                };

                for line in lines.push(&bytes) {
                    match parse_sse_line(&line) {
                        SseLine::Skip => {}
                        SseLine::Done => {
                            let _ = tx
                                .send(Ok(StreamChunk {
                                    content: None,
                                    done: true,
                                }))
                                .await;
                            return;
                        }
                        SseLine::Fragment(text) => {
                            let chunk = StreamChunk {
                                content: Some(text),
                                done: false,
                            };
                            if tx.send(Ok(chunk)).await.is_err() {
                                return; // receiver dropped
                            }
                        }
                        SseLine::Unparseable(data) => {
                            trace!(
                                provider = %provider_name,
                                data = %data,
                                "Ignoring unparseable SSE chunk"
                            );
                        }
                    }
                }
            }

            // Stream ended without [DONE]
            let _ = tx
                .send(Ok(StreamChunk {
                    content: None,
                    done: true,
                }))
                .await;
        });

        Ok(rx)
    }
}

/// Splits an SSE byte stream into lines.
///
/// Bytes are held until their line is complete, so a character split across
/// network chunks decodes intact.
#[derive(Debug, Default)]
struct SseLines {
    pending: Vec<u8>,
}

impl SseLines {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=end).collect();
            let line = String::from_utf8_lossy(&raw[..end]);
            lines.push(line.trim_end_matches('\r').to_string());
        }
        lines
    }
}

/// One classified line of an SSE body.
#[derive(Debug, PartialEq)]
enum SseLine {
    Skip,
    Done,
    Fragment(String),
    Unparseable(String),
}

fn parse_sse_line(line: &str) -> SseLine {
    // Skip empty lines and SSE comments
    if line.is_empty() || line.starts_with(':') {
        return SseLine::Skip;
    }
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<Value>(data) {
        Ok(chunk) => match extract_fragment(&chunk) {
            Some(text) if !text.is_empty() => SseLine::Fragment(text),
            _ => SseLine::Skip,
        },
        Err(_) => SseLine::Unparseable(data.to_string()),
    }
}

fn extract_usage(payload: &Value) -> Option<Usage> {
    let usage = payload.get("usage")?;
    let field = |k: &str| usage.get(k).and_then(Value::as_u64).unwrap_or(0) as u32;
    Some(Usage {
        prompt_tokens: field("prompt_tokens"),
        completion_tokens: field("completion_tokens"),
        total_tokens: field("total_tokens"),
    })
}

// --- API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}

fn to_api_messages(messages: &[matilda_core::ChatMessage]) -> Vec<ApiMessage<'_>> {
    messages
        .iter()
        .map(|m| ApiMessage {
            role: m.role.as_str(),
            content: &m.content,
        })
        .collect()
}
