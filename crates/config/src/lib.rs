//! Configuration loading, validation, and management for Matilda.
//!
//! Loads configuration from `~/.matilda/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use matilda_core::ImageSize;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Base URL used for the synthesized default text provider.
pub const TOGETHER_API_URL: &str = "https://api.together.xyz/v1";

/// The root configuration structure.
///
/// Maps directly to `~/.matilda/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Name the assistant answers to
    #[serde(default = "default_assistant_name")]
    pub assistant_name: String,

    /// How the user is addressed
    #[serde(default = "default_username")]
    pub username: String,

    /// Initial conversation style
    #[serde(default = "default_style")]
    pub conversation_style: String,

    /// Max retained non-system messages per conversation
    #[serde(default = "default_memory_limit")]
    pub memory_limit: usize,

    /// Stream replies when the provider supports it
    #[serde(default = "default_true")]
    pub streaming: bool,

    /// Text generation settings
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Ordered text provider chain
    #[serde(default)]
    pub providers: Vec<ProviderEntry>,

    /// Image generation settings
    #[serde(default)]
    pub images: ImageConfig,

    /// Conversation log settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Gateway configuration
    #[serde(default)]
    pub gateway: GatewayConfig,
}

fn default_assistant_name() -> String {
    "Matilda".into()
}
fn default_username() -> String {
    "User".into()
}
fn default_style() -> String {
    "balanced".into()
}
fn default_memory_limit() -> usize {
    20
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("assistant_name", &self.assistant_name)
            .field("username", &self.username)
            .field("conversation_style", &self.conversation_style)
            .field("memory_limit", &self.memory_limit)
            .field("streaming", &self.streaming)
            .field("generation", &self.generation)
            .field("providers", &self.providers)
            .field("images", &self.images)
            .field("logging", &self.logging)
            .field("gateway", &self.gateway)
            .finish()
    }
}

/// How conversation context is handed to the text provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptFormat {
    /// One flat `"{name}: {content}"` transcript
    #[default]
    Transcript,
    /// Role-tagged messages including the system prompt
    Messages,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Explicit override; the active style decides when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,

    /// Explicit override; the active style decides when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,

    #[serde(default = "default_top_k")]
    pub top_k: u32,

    #[serde(default)]
    pub prompt_format: PromptFormat,

    /// Upper bound on a single provider call
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_model() -> String {
    "mistralai/Mixtral-8x7B-Instruct-v0.1".into()
}
fn default_max_tokens() -> u32 {
    2048
}
fn default_top_k() -> u32 {
    40
}
fn default_request_timeout() -> u64 {
    120
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            max_tokens: default_max_tokens(),
            temperature: None,
            top_p: None,
            top_k: default_top_k(),
            prompt_format: PromptFormat::default(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

/// One entry in the text provider chain.
#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderEntry {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Overrides `generation.model` for this entry
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Declared capability: the endpoint delivers incremental chunks
    #[serde(default = "default_true")]
    pub streaming: bool,
}

impl ProviderEntry {
    /// The entry synthesized when no providers are configured.
    pub fn together() -> Self {
        Self {
            name: "together".into(),
            api_url: Some(TOGETHER_API_URL.into()),
            api_key: None,
            model: None,
            streaming: true,
        }
    }
}

impl std::fmt::Debug for ProviderEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderEntry")
            .field("name", &self.name)
            .field("api_url", &self.api_url)
            .field("api_key", &redact(&self.api_key))
            .field("model", &self.model)
            .field("streaming", &self.streaming)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ImageConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// `"{width}x{height}"`
    #[serde(default = "default_image_size")]
    pub default_size: String,

    #[serde(default = "default_image_dir")]
    pub output_dir: PathBuf,

    /// Model used by the Together.ai image provider
    #[serde(default = "default_image_model")]
    pub model: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub openai_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub together_api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stability_api_key: Option<String>,
}

fn default_image_size() -> String {
    "512x512".into()
}
fn default_image_dir() -> PathBuf {
    PathBuf::from("generated_images")
}
fn default_image_model() -> String {
    "stabilityai/stable-diffusion-xl-base-1.0".into()
}

impl ImageConfig {
    /// Parsed `default_size`. Falls back to 512x512; `validate()` rejects bad values.
    pub fn size(&self) -> ImageSize {
        self.default_size.parse().unwrap_or_default()
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_size: default_image_size(),
            output_dir: default_image_dir(),
            model: default_image_model(),
            openai_api_key: None,
            together_api_key: None,
            stability_api_key: None,
        }
    }
}

impl std::fmt::Debug for ImageConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageConfig")
            .field("enabled", &self.enabled)
            .field("default_size", &self.default_size)
            .field("output_dir", &self.output_dir)
            .field("model", &self.model)
            .field("openai_api_key", &redact(&self.openai_api_key))
            .field("together_api_key", &redact(&self.together_api_key))
            .field("stability_api_key", &redact(&self.stability_api_key))
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Append every message to a per-session JSONL file
    #[serde(default)]
    pub log_conversations: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_conversations: false,
            log_dir: default_log_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_host")]
    pub host: String,

    /// Sessions untouched for this long are evicted
    #[serde(default = "default_session_idle")]
    pub session_idle_secs: u64,

    /// Least-recently-used sessions are evicted beyond this count
    #[serde(default = "default_max_sessions")]
    pub max_sessions: usize,
}

fn default_port() -> u16 {
    5000
}
fn default_host() -> String {
    "127.0.0.1".into()
}
fn default_session_idle() -> u64 {
    3600
}
fn default_max_sessions() -> usize {
    1000
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            host: default_host(),
            session_idle_secs: default_session_idle(),
            max_sessions: default_max_sessions(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.matilda/config.toml),
    /// then apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides (highest priority).
    ///
    /// `lookup` is `std::env::var` in production and a map in tests.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("TOGETHER_API_KEY") {
            if self.providers.is_empty() {
                self.providers.push(ProviderEntry::together());
            }
            for entry in self.providers.iter_mut().filter(|p| p.name == "together") {
                entry.api_key = Some(key.clone());
            }
            self.images.together_api_key = Some(key);
        }
        if let Some(key) = lookup("OPENAI_API_KEY") {
            self.images.openai_api_key = Some(key);
        }
        if let Some(key) = lookup("STABILITY_API_KEY") {
            self.images.stability_api_key = Some(key);
        }

        if let Some(v) = lookup("TOGETHER_MODEL") {
            self.generation.model = v;
        }
        if let Some(v) = lookup("IMAGE_MODEL") {
            self.images.model = v;
        }
        if let Some(v) = lookup("MAX_TOKENS") {
            self.generation.max_tokens = parse_env("MAX_TOKENS", &v)?;
        }
        if let Some(v) = lookup("TEMPERATURE") {
            self.generation.temperature = Some(parse_env("TEMPERATURE", &v)?);
        }
        if let Some(v) = lookup("TOP_P") {
            self.generation.top_p = Some(parse_env("TOP_P", &v)?);
        }
        if let Some(v) = lookup("TOP_K") {
            self.generation.top_k = parse_env("TOP_K", &v)?;
        }
        if let Some(v) = lookup("USERNAME") {
            self.username = v;
        }
        if let Some(v) = lookup("CONVERSATION_STYLE") {
            self.conversation_style = v;
        }
        if let Some(v) = lookup("MEMORY_LIMIT") {
            self.memory_limit = parse_env("MEMORY_LIMIT", &v)?;
        }
        if let Some(v) = lookup("STREAMING") {
            self.streaming = parse_flag(&v);
        }
        if let Some(v) = lookup("IMAGE_GENERATION_ENABLED") {
            self.images.enabled = parse_flag(&v);
        }
        if let Some(v) = lookup("DEFAULT_IMAGE_SIZE") {
            self.images.default_size = v;
        }
        if let Some(v) = lookup("IMAGE_OUTPUT_DIR") {
            self.images.output_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("LOG_CONVERSATIONS") {
            self.logging.log_conversations = parse_flag(&v);
        }
        if let Some(v) = lookup("LOG_DIR") {
            self.logging.log_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("PORT") {
            self.gateway.port = parse_env("PORT", &v)?;
        }
        Ok(())
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".matilda")
    }

    /// The text provider chain, with a default Together.ai entry when empty.
    pub fn text_providers(&self) -> Vec<ProviderEntry> {
        if self.providers.is_empty() {
            vec![ProviderEntry::together()]
        } else {
            self.providers.clone()
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(t) = self.generation.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(ConfigError::ValidationError(
                    "generation.temperature must be between 0.0 and 2.0".into(),
                ));
            }
        }

        if let Some(p) = self.generation.top_p {
            if p <= 0.0 || p > 1.0 {
                return Err(ConfigError::ValidationError(
                    "generation.top_p must be in (0.0, 1.0]".into(),
                ));
            }
        }

        if self.memory_limit == 0 {
            return Err(ConfigError::ValidationError(
                "memory_limit must be at least 1".into(),
            ));
        }

        if self.generation.max_tokens == 0 {
            return Err(ConfigError::ValidationError(
                "generation.max_tokens must be at least 1".into(),
            ));
        }

        if let Err(reason) = self.images.default_size.parse::<ImageSize>() {
            return Err(ConfigError::ValidationError(format!(
                "images.default_size: {reason}"
            )));
        }

        if self.providers.iter().any(|p| p.name.trim().is_empty()) {
            return Err(ConfigError::ValidationError(
                "every [[providers]] entry needs a name".into(),
            ));
        }

        Ok(())
    }

    /// Generate a default config TOML string (for `config init`).
    pub fn default_toml() -> String {
        let mut config = Self::default();
        config.providers = vec![ProviderEntry::together()];
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            assistant_name: default_assistant_name(),
            username: default_username(),
            conversation_style: default_style(),
            memory_limit: default_memory_limit(),
            streaming: true,
            generation: GenerationConfig::default(),
            providers: vec![],
            images: ImageConfig::default(),
            logging: LoggingConfig::default(),
            gateway: GatewayConfig::default(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::ValidationError(format!("{key} has invalid value '{value}'")))
}

/// `true`/`1`/`yes`/`on` (any case) are truthy; anything else is false.
fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}

impl From<ConfigError> for matilda_core::Error {
    fn from(e: ConfigError) -> Self {
        matilda_core::Error::Config {
            message: e.to_string(),
        }
    }
}
