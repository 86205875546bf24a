//! In-memory journal: keeps entries for inspection in tests and diagnostics.

use matilda_core::{ConversationId, ConversationObserver, JournalError, Message};
use std::sync::Mutex;

#[derive(Default)]
pub struct InMemoryJournal {
    entries: Mutex<Vec<(ConversationId, Message)>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Messages recorded for one session, in order.
    pub fn for_session(&self, session: &ConversationId) -> Vec<Message> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|(id, _)| id == session)
            .map(|(_, m)| m.clone())
            .collect()
    }
}

impl ConversationObserver for InMemoryJournal {
    fn name(&self) -> &str {
        "in_memory"
    }

    fn record(&self, session: &ConversationId, message: &Message) -> Result<(), JournalError> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((session.clone(), message.clone()));
        Ok(())
    }
}
