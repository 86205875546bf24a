//! Stability AI SDXL text-to-image.

use async_trait::async_trait;
use matilda_core::{ImageProvider, ImageSize, ProviderError};
use serde::Deserialize;

use super::{check_status, decode_base64, http_client, require_key};

const STABILITY_URL: &str =
    "https://api.stability.ai/v1/generation/stable-diffusion-xl-1024-v1-0/text-to-image";

pub struct StabilityImageProvider {
    api_key: Option<String>,
    url: String,
    client: reqwest::Client,
}

impl StabilityImageProvider {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            url: STABILITY_URL.into(),
            client: http_client(),
        }
    }

    fn payload(prompt: &str, size: ImageSize) -> serde_json::Value {
        serde_json::json!({
            "text_prompts": [{ "text": prompt }],
            "cfg_scale": 7,
            "height": size.height,
            "width": size.width,
            "samples": 1,
            "steps": 30,
        })
    }
}

#[derive(Debug, Deserialize)]
struct TextToImageResponse {
    #[serde(default)]
    artifacts: Vec<Artifact>,
}

#[derive(Debug, Deserialize)]
struct Artifact {
    base64: String,
}

#[async_trait]
impl ImageProvider for StabilityImageProvider {
    fn name(&self) -> &str {
        "stability"
    }

    fn display_name(&self) -> &str {
        "Stability AI"
    }

    async fn generate(&self, prompt: &str, size: ImageSize) -> Result<Vec<u8>, ProviderError> {
        let api_key = require_key("Stability", &self.api_key)?;

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&api_key)
            .header("Accept", "application/json")
            .json(&Self::payload(prompt, size))
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.to_string()))?;
        let parsed: TextToImageResponse = check_status("Stability AI", response)
            .await?
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;

        let artifact = parsed
            .artifacts
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::InvalidResponse("No image data in response".into()))?;
        decode_base64("Stability AI", &artifact.base64)
    }
}
