//! Build the generation adapter from configuration.

use matilda_config::{AppConfig, ProviderEntry};
use matilda_core::TextProvider;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::adapter::GenerationAdapter;
use crate::completions::CompletionsProvider;
use crate::fallback::ProviderChain;
use crate::image::{ImageChain, OpenAiImageProvider, StabilityImageProvider, TogetherImageProvider};

/// Build the text chain and (when enabled) the image chain.
pub fn build_from_config(config: &AppConfig) -> GenerationAdapter {
    let timeout = Duration::from_secs(config.generation.request_timeout_secs.max(1));
    let mut chain = ProviderChain::new("text");

    for entry in config.text_providers() {
        chain = chain.add(Arc::new(build_text_provider(config, &entry, timeout)), timeout);
    }
    info!(providers = ?chain.names(), "Text provider chain ready");

    let adapter = GenerationAdapter::new(Arc::new(chain) as Arc<dyn TextProvider>);
    if !config.images.enabled {
        return adapter;
    }

    let images = &config.images;
    let together_key = images
        .together_api_key
        .clone()
        .or_else(|| together_entry_key(config));
    let chain = ImageChain::new(images.output_dir.clone(), images.size())
        .add(Arc::new(OpenAiImageProvider::new(images.openai_api_key.clone())))
        .add(Arc::new(TogetherImageProvider::new(together_key, images.model.clone())))
        .add(Arc::new(StabilityImageProvider::new(
            images.stability_api_key.clone(),
        )));
    adapter.with_images(chain)
}

fn build_text_provider(
    config: &AppConfig,
    entry: &ProviderEntry,
    timeout: Duration,
) -> CompletionsProvider {
    let base_url = entry
        .api_url
        .clone()
        .unwrap_or_else(|| default_base_url(&entry.name));
    CompletionsProvider::new(&entry.name, base_url, text_key(config, entry), timeout)
        .with_model(entry.model.clone())
        .with_streaming(entry.streaming)
        .chat_only(is_chat_only(&entry.name))
}

/// The entry's own key; a `together` entry may borrow the image key.
fn text_key(config: &AppConfig, entry: &ProviderEntry) -> Option<String> {
    entry.api_key.clone().or_else(|| {
        (entry.name == "together")
            .then(|| config.images.together_api_key.clone())
            .flatten()
    })
}

fn together_entry_key(config: &AppConfig) -> Option<String> {
    config
        .providers
        .iter()
        .find(|p| p.name == "together")
        .and_then(|p| p.api_key.clone())
}

/// Hosted APIs that only expose `/chat/completions`.
fn is_chat_only(provider_name: &str) -> bool {
    matches!(provider_name, "openai" | "openrouter" | "groq" | "deepseek")
}

/// Get the default base URL for well-known providers.
fn default_base_url(provider_name: &str) -> String {
    match provider_name {
        "together" => matilda_config::TOGETHER_API_URL.into(),
        "openai" => "https://api.openai.com/v1".into(),
        "openrouter" => "https://openrouter.ai/api/v1".into(),
        "groq" => "https://api.groq.com/openai/v1".into(),
        "deepseek" => "https://api.deepseek.com/v1".into(),
        "fireworks" => "https://api.fireworks.ai/inference/v1".into(),
        "ollama" => "http://localhost:11434/v1".into(),
        "vllm" => "http://localhost:8000/v1".into(),
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1".into(),
        _ => format!("https://{provider_name}.api.example.com/v1"),
    }
}
