//! Conversation observer: a side channel notified after every append.

use crate::error::JournalError;
use crate::message::{ConversationId, Message};

/// Receives every message stored in a conversation.
///
/// Called synchronously after memory management completes. Failures are
/// reported back but never affect the conversation.
pub trait ConversationObserver: Send + Sync {
    fn name(&self) -> &str;

    fn record(&self, session: &ConversationId, message: &Message) -> Result<(), JournalError>;
}
