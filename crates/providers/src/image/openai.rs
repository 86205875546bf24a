//! OpenAI DALL-E 3: generation returns a URL, which is then downloaded.

use async_trait::async_trait;
use matilda_core::{ImageProvider, ImageSize, ProviderError};
use serde::Deserialize;
use tracing::debug;

use super::{check_status, http_client, require_key};

pub struct OpenAiImageProvider {
    api_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAiImageProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: "https://api.openai.com/v1".into(),
            client: http_client(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }
}

#[derive(Debug, Deserialize)]
struct GenerationsResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    url: Option<String>,
}

#[async_trait]
impl ImageProvider for OpenAiImageProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn display_name(&self) -> &str {
        "DALL-E"
    }

    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<Vec<u8>, ProviderError> {
        let api_key = require_key("OpenAI", &self.api_key)?;
        let body = serde_json::json!({
            "model": "dall-e-3",
            "prompt": prompt,
            "size": size.to_string(),
            "quality": "standard",
            "n": 1,
        });

        debug!(size = %size, "Requesting DALL-E image");
        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let parsed: GenerationsResponse = check_status("OpenAI", response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let url = parsed
            .data
            .into_iter()
            .find_map(|d| d.url)
            .ok_or_else(|| ProviderError::InvalidResponse("No image URL in response".into()))?;

        let download = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        if !download.status().is_success() {
            return Err(ProviderError::ApiError {
                status_code: download.status().as_u16(),
                message: "Failed to download image".into(),
            });
        }
        let bytes = download
            .bytes()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }
}
