//! Provider traits: the abstraction over text and image backends.
//!
//! A [`TextProvider`] knows how to turn a [`GenerationRequest`] into text,
//! either all at once or as a stream of chunks. An [`ImageProvider`] turns a
//! prompt into raw image bytes.
//!
//! Implementations: completions/chat HTTP endpoints, OpenAI, Together.ai and
//! Stability AI image APIs, test mocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ProviderError;
use crate::message::ChatMessage;

/// Sampling parameters sent with every text request.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplingParams {
    pub max_tokens: u32,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self {
            max_tokens: 2048,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 40,
        }
    }
}

/// What the model is asked to continue: a flat prompt or role-tagged messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationInput {
    Prompt(String),
    Messages(Vec<ChatMessage>),
}

impl GenerationInput {
    /// Role-tagged view. A flat prompt becomes one user message.
    pub fn to_messages(&self) -> Vec<ChatMessage> {
        match self {
            Self::Prompt(p) => vec![ChatMessage::new(crate::message::Role::User, p.clone())],
            Self::Messages(m) => m.clone(),
        }
    }
}

/// A text generation request. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    model: String,
    input: GenerationInput,
    sampling: SamplingParams,
    stream: bool,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, input: GenerationInput, sampling: SamplingParams) -> Self {
        Self {
            model: model.into(),
            input,
            sampling,
            stream: false,
        }
    }

    /// Same request, flagged for incremental delivery.
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn input(&self) -> &GenerationInput {
        &self.input
    }

    pub fn sampling(&self) -> &SamplingParams {
        &self.sampling
    }

    pub fn stream(&self) -> bool {
        self.stream
    }
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A complete (non-streaming) response from a text provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextResponse {
    pub text: String,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    pub usage: Option<Usage>,
}

/// A single chunk in a streaming response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,
}

/// Receiving half of a provider stream.
pub type ChunkReceiver = tokio::sync::mpsc::Receiver<Result<StreamChunk, ProviderError>>;

/// The core text provider trait.
///
/// The generation adapter calls `complete()` or `stream()` without knowing
/// which backend is behind it.
#[async_trait]
pub trait TextProvider: Send + Sync {
    /// A human-readable name for this provider (e.g., "together").
    fn name(&self) -> &str;

    /// Declared capability: does `stream()` deliver incrementally?
    ///
    /// Resolved at configuration time. When `false`, callers get the default
    /// one-chunk stream synthesized from `complete()`.
    fn supports_streaming(&self) -> bool {
        false
    }

    /// Send a request and get a complete response.
    async fn complete(&self, request: GenerationRequest) -> Result<TextResponse, ProviderError>;

    /// Send a request and get a stream of response chunks.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(&self, request: GenerationRequest) -> Result<ChunkReceiver, ProviderError> {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        let _ = tx
            .send(Ok(StreamChunk {
                content: Some(response.text),
                done: true,
            }))
            .await;
        Ok(rx)
    }
}

/// Pixel dimensions for a generated image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl Default for ImageSize {
    fn default() -> Self {
        Self {
            width: 512,
            height: 512,
        }
    }
}

impl FromStr for ImageSize {
    type Err = String;

    /// Parses `"{width}x{height}"`, e.g. `"1024x768"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{s}'"))?;
        let width: u32 = w.trim().parse().map_err(|_| format!("invalid width in '{s}'"))?;
        let height: u32 = h.trim().parse().map_err(|_| format!("invalid height in '{s}'"))?;
        if width == 0 || height == 0 {
            return Err(format!("image dimensions must be non-zero, got '{s}'"));
        }
        Ok(Self { width, height })
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// An image generation backend.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Short identifier used in logs (e.g., "openai").
    fn name(&self) -> &str;

    /// Product name shown to the user in success messages (e.g., "DALL-E").
    fn display_name(&self) -> &str;

    /// Generate one image and return its raw encoded bytes.
    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<Vec<u8>, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Role;

    struct EchoProvider;

    #[async_trait]
    impl TextProvider for EchoProvider {
        fn name(&self) -> &str {
            "echo"
        }

        async fn complete(&self, request: GenerationRequest) -> Result<TextResponse, ProviderError> {
            let text = match request.input() {
                GenerationInput::Prompt(p) => p.clone(),
                GenerationInput::Messages(m) => m.len().to_string(),
            };
            Ok(TextResponse {
                text,
                model: request.model().to_string(),
                usage: None,
            })
        }
    }

    #[tokio::test]
    async fn default_stream_wraps_complete_response() {
        let provider = EchoProvider;
        assert!(!provider.supports_streaming());

        let request = GenerationRequest::new(
            "m",
            GenerationInput::Prompt("hello".into()),
            SamplingParams::default(),
        )
        .streaming(true);
        let mut rx = provider.stream(request).await.unwrap();
        let chunk = rx.recv().await.unwrap().unwrap();
        assert_eq!(chunk.content.as_deref(), Some("hello"));
        assert!(chunk.done);
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn prompt_input_as_messages() {
        let input = GenerationInput::Prompt("User: hi".into());
        let messages = input.to_messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[test]
    fn image_size_parsing() {
        let size: ImageSize = "1024x768".parse().unwrap();
        assert_eq!(size, ImageSize { width: 1024, height: 768 });
        assert_eq!(size.to_string(), "1024x768");
        assert!("512".parse::<ImageSize>().is_err());
        assert!("0x512".parse::<ImageSize>().is_err());
        assert!("axb".parse::<ImageSize>().is_err());
    }
}
