//! Conversation journals for Matilda.
//!
//! Every journal implements `matilda_core::ConversationObserver` and is
//! attached to a conversation as a best-effort side channel.

pub mod file_journal;
pub mod in_memory;
pub mod noop;

pub use file_journal::JsonlJournal;
pub use in_memory::InMemoryJournal;
pub use noop::NoopJournal;

use matilda_core::ConversationObserver;
use std::path::PathBuf;
use std::sync::Arc;

/// The journal selected by the logging settings.
pub fn from_settings(log_conversations: bool, log_dir: PathBuf) -> Arc<dyn ConversationObserver> {
    if log_conversations {
        Arc::new(JsonlJournal::new(log_dir))
    } else {
        Arc::new(NoopJournal)
    }
}
