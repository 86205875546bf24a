//! Image generation: provider implementations and the ordered image chain.
//!
//! Providers return raw bytes; [`ImageChain`] tries them in order, persists
//! the first success under `{output_dir}/matilda_img_{unix_ts}.png` (with a
//! numeric suffix when that name is taken), and reports a status line either way.

pub mod openai;
pub mod stability;
pub mod together;

pub use openai::OpenAiImageProvider;
pub use stability::StabilityImageProvider;
pub use together::TogetherImageProvider;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use matilda_core::{ImageProvider, ImageRef, ImageSize, ProviderError};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Suffixed names tried for one timestamp before giving up.
const MAX_NAME_ATTEMPTS: usize = 100;

/// What an image request produced: text for the user, plus the saved file.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageOutcome {
    pub status: String,
    pub artifact: Option<ImageRef>,
}

impl ImageOutcome {
    pub fn failed(reason: impl std::fmt::Display) -> Self {
        Self {
            status: format!("Image generation failed. {reason}"),
            artifact: None,
        }
    }
}

/// Ordered image providers plus where their output lands.
pub struct ImageChain {
    providers: Vec<Arc<dyn ImageProvider>>,
    output_dir: PathBuf,
    size: ImageSize,
}

impl ImageChain {
    pub fn new(output_dir: impl Into<PathBuf>, size: ImageSize) -> Self {
        Self {
            providers: Vec::new(),
            output_dir: output_dir.into(),
            size,
        }
    }

    pub fn add(mut self, provider: Arc<dyn ImageProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Try each provider in order until one returns an image.
    ///
    /// Never fails: total failure is a status text with no artifact.
    pub async fn generate(&self, prompt: &str) -> ImageOutcome {
        let mut last_reason = String::from("No image providers configured.");

        for provider in &self.providers {
            match provider.generate(prompt, self.size).await {
                Ok(bytes) => {
                    return match self.persist(&bytes).await {
                        Ok(path) => {
                            info!(
                                provider = %provider.name(),
                                path = %path.display(),
                                "Image generated"
                            );
                            ImageOutcome {
                                status: format!(
                                    "I've generated the image you requested using {}.",
                                    provider.display_name()
                                ),
                                artifact: Some(ImageRef::new(path.to_string_lossy())),
                            }
                        }
                        Err(e) => {
                            warn!(path = %self.output_dir.display(), error = %e, "Failed to save image");
                            ImageOutcome::failed(format!("Could not save the image: {e}"))
                        }
                    };
                }
                Err(e) => {
                    warn!(provider = %provider.name(), error = %e, "Image provider failed, trying next");
                    last_reason = e.to_string();
                }
            }
        }

        ImageOutcome::failed(last_reason)
    }

    async fn persist(&self, bytes: &[u8]) -> std::io::Result<PathBuf> {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.persist_at(bytes, ts).await
    }

    /// Write under `matilda_img_{ts}.png`, or `matilda_img_{ts}_{n}.png` when
    /// an image from the same second already exists.
    async fn persist_at(&self, bytes: &[u8], ts: u64) -> std::io::Result<PathBuf> {
        tokio::fs::create_dir_all(&self.output_dir).await?;
        for n in 0..MAX_NAME_ATTEMPTS {
            let name = match n {
                0 => format!("matilda_img_{ts}.png"),
                n => format!("matilda_img_{ts}_{n}.png"),
            };
            let path = self.output_dir.join(name);
            let opened = tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await;
            match opened {
                Ok(mut file) => {
                    file.write_all(bytes).await?;
                    file.flush().await?;
                    return Ok(path);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e),
            }
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("no free image name for timestamp {ts}"),
        ))
    }
}

/// Map a non-success HTTP status to a provider error.
pub(crate) async fn check_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, ProviderError> {
    let status = response.status().as_u16();
    match status {
        200 => Ok(response),
        429 => Err(ProviderError::RateLimited {
            retry_after_secs: 5,
        }),
        401 | 403 => Err(ProviderError::AuthenticationFailed(format!(
            "{provider} rejected the API key"
        ))),
        _ => {
            let message = response.text().await.unwrap_or_default();
            Err(ProviderError::ApiError {
                status_code: status,
                message,
            })
        }
    }
}

pub(crate) fn decode_base64(provider: &str, data: &str) -> Result<Vec<u8>, ProviderError> {
    BASE64_STANDARD
        .decode(data.trim())
        .map_err(|e| ProviderError::InvalidResponse(format!("{provider} returned bad base64: {e}")))
}

pub(crate) fn require_key(provider: &str, key: &Option<String>) -> Result<String, ProviderError> {
    key.as_ref()
        .filter(|k| !k.trim().is_empty())
        .cloned()
        .ok_or_else(|| ProviderError::NotConfigured(format!("No {provider} API key found.")))
}

pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(120))
        .build()
        .unwrap_or_default()
}
