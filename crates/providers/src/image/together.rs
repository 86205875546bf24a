//! Together.ai image generation (base64 payload).

use async_trait::async_trait;
use matilda_core::{ImageProvider, ImageSize, ProviderError};
use serde::Deserialize;

use super::{check_status, decode_base64, http_client, require_key};

pub struct TogetherImageProvider {
    api_key: Option<String>,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl TogetherImageProvider {
    pub fn new(api_key: Option<String>, model: impl Into<String>) -> Self {
        Self {
            api_key,
            model: model.into(),
            base_url: matilda_config::TOGETHER_API_URL.into(),
            client: http_client(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ImagesResponse {
    #[serde(default)]
    data: Vec<ImageData>,
}

#[derive(Debug, Deserialize)]
struct ImageData {
    b64_json: Option<String>,
}

#[async_trait]
impl ImageProvider for TogetherImageProvider {
    fn name(&self) -> &str {
        "together"
    }

    fn display_name(&self) -> &str {
        "Together.ai"
    }

    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<Vec<u8>, ProviderError> {
        let api_key = require_key("Together", &self.api_key)?;
        let body = serde_json::json!({
            "model": self.model,
            "prompt": prompt,
            "width": size.width,
            "height": size.height,
            "n": 1,
            "response_format": "b64_json",
        });

        let response = self
            .client
            .post(format!("{}/images/generations", self.base_url))
            .bearer_auth(&api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let parsed: ImagesResponse = check_status("Together.ai", response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let encoded = parsed.data.into_iter().find_map(|d| d.b64_json).ok_or_else(|| {
            ProviderError::InvalidResponse("Invalid response format from Together.ai image API".into())
        })?;
        decode_base64("Together.ai", &encoded)
    }
}
