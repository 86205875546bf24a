//! File journal: append-only JSON-lines, one file per session.
//!
//! Each stored message becomes one line in
//! `{log_dir}/conversation_{session_id}.jsonl`. Files are never rewritten.

use matilda_core::{ConversationId, ConversationObserver, JournalError, Message};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::trace;

pub struct JsonlJournal {
    dir: PathBuf,
}

impl JsonlJournal {
    /// The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, session: &ConversationId) -> PathBuf {
        self.dir.join(format!("conversation_{session}.jsonl"))
    }
}

impl ConversationObserver for JsonlJournal {
    fn name(&self) -> &str {
        "jsonl"
    }

    fn record(&self, session: &ConversationId, message: &Message) -> Result<(), JournalError> {
        let path = self.path_for(session);
        let write_err = |e: std::io::Error| JournalError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        };

        let mut line =
            serde_json::to_string(message).map_err(|e| JournalError::Encode(e.to_string()))?;
        line.push('\n');

        std::fs::create_dir_all(&self.dir).map_err(write_err)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(write_err)?;
        file.write_all(line.as_bytes()).map_err(write_err)?;

        trace!(path = %path.display(), role = message.role.as_str(), "Journal entry written");
        Ok(())
    }
}
