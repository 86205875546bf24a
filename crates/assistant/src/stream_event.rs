//! Assistant-level streaming events.
//!
//! `AssistantEvent` is what the gateway forwards to clients over SSE while a
//! reply streams.

use serde::{Deserialize, Serialize};

/// Events emitted while a reply is produced.
///
/// - `chunk`     partial reply text
/// - `image`     a generated image was stored
/// - `done`      the turn finished, with the full cleaned reply
/// - `cancelled` the turn was cancelled; nothing was stored
/// - `error`     generation failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AssistantEvent {
    Chunk { content: String },

    Image { path: String },

    Done { session_id: String, text: String },

    Cancelled,

    Error { message: String },
}

impl AssistantEvent {
    /// SSE event name for this event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Chunk { .. } => "chunk",
            Self::Image { .. } => "image",
            Self::Done { .. } => "done",
            Self::Cancelled => "cancelled",
            Self::Error { .. } => "error",
        }
    }
}
