//! # Matilda Core
//!
//! Domain types, traits, and error definitions for the Matilda assistant.
//! This crate has **no HTTP dependencies**: it defines the conversation
//! model and the provider seams that every other crate implements against.
//!
//! ## Layout
//!
//! - [`style`]: named conversation styles and their sampling parameters
//! - [`conversation`]: bounded per-session history with a rolling summary
//! - [`provider`]: text and image provider traits plus request values
//! - [`observer`]: fire-and-forget conversation log hook
//! - [`error`]: error taxonomy shared by all crates

pub mod conversation;
pub mod error;
pub mod message;
pub mod observer;
pub mod provider;
pub mod style;

// Re-export key types at crate root for ergonomics
pub use conversation::ConversationState;
pub use error::{Error, GenerationError, JournalError, ParseError, ProviderError, Result};
pub use message::{ChatMessage, ConversationId, DisplayNames, ImageRef, Message, Role};
pub use observer::ConversationObserver;
pub use provider::{
    ChunkReceiver, GenerationInput, GenerationRequest, ImageProvider, ImageSize, SamplingParams,
    StreamChunk, TextProvider, TextResponse, Usage,
};
pub use style::{FALLBACK_PROFILE, StyleProfile};
