//! Text provider chain: ordered fallback with per-provider timeouts.
//!
//! Each configured provider is tried in order. A failure or timeout moves on
//! to the next entry; the last error is returned once the chain is exhausted.

use async_trait::async_trait;
use matilda_core::error::ProviderError;
use matilda_core::provider::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Timeout applied by [`ProviderChain::add_default`].
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// A text provider that wraps an ordered list of providers.
pub struct ProviderChain {
    name: String,
    entries: Vec<ChainEntry>,
}

struct ChainEntry {
    provider: Arc<dyn TextProvider>,
    timeout: Duration,
}

impl ProviderChain {
    /// Create a new chain with no entries.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: Vec::new(),
        }
    }

    /// Append a provider with its own timeout.
    pub fn add(mut self, provider: Arc<dyn TextProvider>, timeout: Duration) -> Self {
        self.entries.push(ChainEntry { provider, timeout });
        self
    }

    pub fn add_default(self, provider: Arc<dyn TextProvider>) -> Self {
        self.add(provider, DEFAULT_TIMEOUT)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Provider names in attempt order.
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.provider.name()).collect()
    }

    async fn attempt<T, F, Fut>(&self, mode: &'static str, call: F) -> Result<T, ProviderError>
    where
        F: Fn(Arc<dyn TextProvider>) -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut last_error = ProviderError::NotConfigured("No text providers configured".into());

        for (i, entry) in self.entries.iter().enumerate() {
            let provider_name = entry.provider.name().to_string();
            info!(
                chain = %self.name,
                provider = %provider_name,
                attempt = i + 1,
                total = self.entries.len(),
                mode,
                "Trying text provider"
            );

            match tokio::time::timeout(entry.timeout, call(entry.provider.clone())).await {
                Ok(Ok(value)) => return Ok(value),
                Ok(Err(e)) => {
                    warn!(
                        provider = %provider_name,
                        mode,
                        error = %e,
                        "Text provider failed, trying next"
                    );
                    last_error = e;
                }
                Err(_) => {
                    warn!(
                        provider = %provider_name,
                        mode,
                        timeout_secs = entry.timeout.as_secs(),
                        "Text provider timed out, trying next"
                    );
                    last_error = ProviderError::Timeout(format!(
                        "Provider '{}' timed out after {}s",
                        provider_name,
                        entry.timeout.as_secs()
                    ));
                }
            }
        }

        Err(last_error)
    }
}

#[async_trait]
impl TextProvider for ProviderChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn supports_streaming(&self) -> bool {
        self.entries.iter().any(|e| e.provider.supports_streaming())
    }

    async fn complete(&self, request: GenerationRequest) -> Result<TextResponse, ProviderError> {
        self.attempt("complete", |provider| {
            let request = request.clone();
            async move { provider.complete(request).await }
        })
        .await
    }

    /// Only opening the stream is covered by the fallback; a stream that
    /// fails midway is reported through its receiver.
    async fn stream(&self, request: GenerationRequest) -> Result<ChunkReceiver, ProviderError> {
        self.attempt("stream", |provider| {
            let request = request.clone();
            async move { provider.stream(request).await }
        })
        .await
    }
}
