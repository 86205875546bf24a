//! Generation adapter: the one seam the assistant talks to.
//!
//! Wraps the text provider chain and the image chain behind three calls:
//! [`GenerationAdapter::generate`], [`GenerationAdapter::generate_stream`]
//! and [`GenerationAdapter::generate_image`]. Provider failures come back as
//! [`GenerationError`] values, never as text pretending to be model output.

use matilda_core::{
    ChunkReceiver, GenerationError, GenerationRequest, ProviderError, StreamChunk, TextProvider,
};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::image::{ImageChain, ImageOutcome};

const NOT_INITIALIZED: &str = "no text provider is configured";

pub struct GenerationAdapter {
    text: Option<Arc<dyn TextProvider>>,
    images: Option<ImageChain>,
}

impl GenerationAdapter {
    pub fn new(text: Arc<dyn TextProvider>) -> Self {
        Self {
            text: Some(text),
            images: None,
        }
    }

    /// An adapter with nothing behind it. Every text call is `Unavailable`.
    pub fn unconfigured() -> Self {
        Self {
            text: None,
            images: None,
        }
    }

    pub fn with_images(mut self, images: ImageChain) -> Self {
        self.images = Some(images);
        self
    }

    pub fn has_images(&self) -> bool {
        self.images.as_ref().is_some_and(|c| !c.is_empty())
    }

    fn provider(&self) -> Result<&Arc<dyn TextProvider>, GenerationError> {
        self.text
            .as_ref()
            .ok_or_else(|| GenerationError::Unavailable(NOT_INITIALIZED.into()))
    }

    /// Single-shot generation.
    pub async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError> {
        let provider = self.provider()?;
        let response = provider
            .complete(request.streaming(false))
            .await
            .map_err(GenerationError::from_chain)?;
        debug!(provider = %provider.name(), model = %response.model, "Generation complete");
        Ok(response.text)
    }

    /// Incremental generation.
    ///
    /// A provider that does not declare streaming gets a synthesized
    /// one-fragment stream holding its complete response.
    pub async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<FragmentStream, GenerationError> {
        let provider = self.provider()?;

        if !provider.supports_streaming() {
            let response = provider
                .complete(request.streaming(false))
                .await
                .map_err(GenerationError::from_chain)?;
            return Ok(FragmentStream::single(response.text));
        }

        let rx = provider
            .stream(request.streaming(true))
            .await
            .map_err(GenerationError::from_chain)?;
        Ok(FragmentStream::new(rx))
    }

    /// Image generation through the ordered image chain. Never fails.
    pub async fn generate_image(&self, prompt: &str) -> ImageOutcome {
        match &self.images {
            Some(chain) => chain.generate(prompt).await,
            None => ImageOutcome::failed("Image generation is not available."),
        }
    }
}

/// A finite, non-restartable sequence of non-empty text fragments.
///
/// The first provider error ends the stream; it is kept in
/// [`FragmentStream::interruption`].
pub struct FragmentStream {
    rx: ChunkReceiver,
    finished: bool,
    interrupted: Option<ProviderError>,
}

impl FragmentStream {
    pub fn new(rx: ChunkReceiver) -> Self {
        Self {
            rx,
            finished: false,
            interrupted: None,
        }
    }

    /// A stream that yields `text` once.
    pub fn single(text: String) -> Self {
        let (tx, rx) = tokio::sync::mpsc::channel(1);
        // capacity 1, nothing else sends
        let _ = tx.try_send(Ok(StreamChunk {
            content: Some(text),
            done: true,
        }));
        Self::new(rx)
    }

    /// Next non-empty fragment, or `None` once finished.
    ///
    /// Cancel-safe: dropping the future loses no fragment.
    pub async fn next(&mut self) -> Option<String> {
        while !self.finished {
            match self.rx.recv().await {
                Some(Ok(chunk)) => {
                    if chunk.done {
                        self.finished = true;
                    }
                    match chunk.content {
                        Some(text) if !text.is_empty() => return Some(text),
                        _ => continue,
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Stream interrupted");
                    self.finished = true;
                    self.interrupted = Some(e);
                }
                None => self.finished = true,
            }
        }
        None
    }

    /// The error that cut the stream short, if any.
    pub fn interruption(&self) -> Option<&ProviderError> {
        self.interrupted.as_ref()
    }
}
