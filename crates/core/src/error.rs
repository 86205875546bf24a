//! Error types for the Matilda domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error type; [`Error`] unifies them for
//! the outer layers (CLI, gateway).

use thiserror::Error;

/// The top-level error type for the outer layers.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

/// A single provider call failed.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    /// Whether the failure means "nothing is set up", as opposed to a live
    /// backend that answered badly.
    pub fn is_not_configured(&self) -> bool {
        matches!(self, Self::NotConfigured(_))
    }
}

/// The outcome of asking the generation layer for text when it could not
/// produce any.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// No configured or working text backend exists.
    #[error("No text provider available: {0}")]
    Unavailable(String),

    /// Every configured provider was tried and the last one failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl GenerationError {
    /// Classify a provider failure coming out of the chain.
    pub fn from_chain(err: ProviderError) -> Self {
        match err {
            ProviderError::NotConfigured(reason) => Self::Unavailable(reason),
            other => Self::Provider(other),
        }
    }
}

/// A provider payload whose shape is not one of the recognized layouts.
///
/// Never surfaced to callers as an error value; [`ParseError::placeholder`]
/// is what they receive instead.
#[derive(Debug, Clone, Error)]
#[error("Unrecognized response shape (keys: {keys:?})")]
pub struct ParseError {
    pub keys: Vec<String>,
}

impl ParseError {
    pub fn new(keys: Vec<String>) -> Self {
        Self { keys }
    }

    /// Descriptive text handed back in place of model output.
    pub fn placeholder(&self) -> String {
        format!(
            "Received response but couldn't extract text. Response keys: {:?}",
            self.keys
        )
    }
}

/// A conversation log observer failed to record a message.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("Failed to write journal at {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("Failed to encode journal entry: {0}")]
    Encode(String),
}
