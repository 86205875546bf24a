//! No-op journal: conversation logging disabled.

use matilda_core::{ConversationId, ConversationObserver, JournalError, Message};

/// A journal that records nothing.
pub struct NoopJournal;

impl ConversationObserver for NoopJournal {
    fn name(&self) -> &str {
        "none"
    }

    fn record(&self, _session: &ConversationId, _message: &Message) -> Result<(), JournalError> {
        Ok(())
    }
}
