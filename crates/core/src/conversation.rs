//! Conversation store: bounded history with a rolling summary.
//!
//! Every append runs memory management before returning: once more than
//! `memory_limit` non-system messages are stored, the oldest are folded into
//! a lossy summary line and dropped. System messages are never evicted.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::message::{ChatMessage, ConversationId, DisplayNames, ImageRef, Message, Role};
use crate::observer::ConversationObserver;

/// Most candidates folded in one pass once a summary already exists.
const MAX_FOLD_WITH_SUMMARY: usize = 5;

/// Characters of a message kept when it is quoted in the summary.
const SUMMARY_QUOTE_CHARS: usize = 100;

const SUMMARY_PREFIX: &str = "Key points from earlier: ";
const CONTEXT_HEADER: &str = "Context from earlier in the conversation: ";

/// Per-session conversation history.
pub struct ConversationState {
    messages: Vec<Message>,
    memory_limit: usize,
    summary_lines: Vec<String>,
    /// Non-system messages dropped since the last clear.
    evicted: usize,
    session_id: ConversationId,
    created_at: DateTime<Utc>,
    names: DisplayNames,
    observer: Option<Arc<dyn ConversationObserver>>,
}

impl std::fmt::Debug for ConversationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationState")
            .field("session_id", &self.session_id)
            .field("messages", &self.messages.len())
            .field("memory_limit", &self.memory_limit)
            .field("summary_lines", &self.summary_lines.len())
            .field("evicted", &self.evicted)
            .field("observer", &self.observer.as_ref().map(|o| o.name().to_string()))
            .finish()
    }
}

impl ConversationState {
    /// A limit of zero is raised to one.
    pub fn new(memory_limit: usize, names: DisplayNames) -> Self {
        Self {
            messages: Vec::new(),
            memory_limit: memory_limit.max(1),
            summary_lines: Vec::new(),
            evicted: 0,
            session_id: ConversationId::new(),
            created_at: Utc::now(),
            names,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ConversationObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn append_user(&mut self, text: impl Into<String>) {
        self.append(Message::user(text));
    }

    pub fn append_assistant(&mut self, text: impl Into<String>, image: Option<ImageRef>) {
        self.append(Message::assistant(text).with_image(image));
    }

    pub fn append_system(&mut self, text: impl Into<String>) {
        self.append(Message::system(text));
    }

    /// Append, compact, then notify the observer.
    pub fn append(&mut self, mut message: Message) {
        if let Some(last) = self.messages.last() {
            if message.timestamp < last.timestamp {
                message.timestamp = last.timestamp;
            }
        }
        self.messages.push(message);
        self.manage_memory();

        if let (Some(observer), Some(stored)) = (&self.observer, self.messages.last()) {
            if let Err(e) = observer.record(&self.session_id, stored) {
                warn!(
                    observer = %observer.name(),
                    session_id = %self.session_id,
                    error = %e,
                    "Failed to record conversation message"
                );
            }
        }
    }

    fn manage_memory(&mut self) {
        let non_system = self.non_system_len();
        if non_system <= self.memory_limit {
            return;
        }
        let overflow = non_system - self.memory_limit;

        let candidates: Vec<&Message> = self
            .messages
            .iter()
            .filter(|m| !m.is_system())
            .take(overflow)
            .collect();

        let batch = if self.summary_lines.is_empty() {
            &candidates[..]
        } else {
            &candidates[candidates.len().saturating_sub(MAX_FOLD_WITH_SUMMARY)..]
        };

        if !batch.is_empty() {
            let points: Vec<String> = batch
                .iter()
                .map(|m| {
                    format!(
                        "{}: {}",
                        self.names.for_role(m.role),
                        quote(&m.content, SUMMARY_QUOTE_CHARS)
                    )
                })
                .collect();
            self.summary_lines
                .push(format!("{SUMMARY_PREFIX}{}", points.join("; ")));
        }

        let mut to_drop = overflow;
        self.messages.retain(|m| {
            if to_drop > 0 && !m.is_system() {
                to_drop -= 1;
                false
            } else {
                true
            }
        });
        self.evicted += overflow;

        debug!(
            session_id = %self.session_id,
            evicted = overflow,
            summary_lines = self.summary_lines.len(),
            "Compacted conversation history"
        );
    }

    /// Render recent history as `"{name}: {content}"` lines.
    ///
    /// `max_messages` defaults to the memory limit. System messages are never
    /// rendered.
    pub fn formatted_transcript(&self, max_messages: Option<usize>) -> String {
        let max = max_messages.unwrap_or(self.memory_limit);
        let visible: Vec<&Message> = self.messages.iter().filter(|m| !m.is_system()).collect();
        let recent = &visible[visible.len().saturating_sub(max)..];

        let mut lines = Vec::with_capacity(recent.len() + 1);
        if !self.summary_lines.is_empty() && visible.len() + self.evicted > max {
            lines.push(format!("{CONTEXT_HEADER}{}", self.summary()));
        }

        let assistant_prefix = format!("{}:", self.names.assistant);
        for m in recent {
            let mut content = m.content.as_str();
            if m.role == Role::Assistant {
                if let Some(rest) = content.strip_prefix(&assistant_prefix) {
                    content = rest.trim();
                }
            }
            let mut line = format!("{}: {}", self.names.for_role(m.role), content);
            if let Some(image) = &m.image {
                line.push_str(&format!(" [Image: {}]", image.file_name()));
            }
            lines.push(line);
        }
        lines.join("\n")
    }

    /// Role-tagged history for chat-style providers.
    ///
    /// With `include_system`, the summary (if any) leads as a synthetic
    /// system entry and stored system messages are kept in place.
    pub fn messages_for_generation(&self, include_system: bool) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(self.messages.len() + 1);
        if include_system && !self.summary_lines.is_empty() {
            out.push(ChatMessage::new(
                Role::System,
                format!("{CONTEXT_HEADER}{}", self.summary()),
            ));
        }
        out.extend(
            self.messages
                .iter()
                .filter(|m| include_system || !m.is_system())
                .map(ChatMessage::from),
        );
        out
    }

    /// Empty everything and start a new session identity.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.summary_lines.clear();
        self.evicted = 0;
        self.session_id = ConversationId::new();
        self.created_at = Utc::now();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn non_system_len(&self) -> usize {
        self.messages.iter().filter(|m| !m.is_system()).count()
    }

    /// The rolling summary, one accumulated line per fold.
    pub fn summary(&self) -> String {
        self.summary_lines.join("\n")
    }

    pub fn summary_lines(&self) -> &[String] {
        &self.summary_lines
    }

    pub fn memory_limit(&self) -> usize {
        self.memory_limit
    }

    pub fn session_id(&self) -> &ConversationId {
        &self.session_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn names(&self) -> &DisplayNames {
        &self.names
    }
}

fn quote(content: &str, max_chars: usize) -> String {
    match content.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &content[..cut]),
        None => content.to_string(),
    }
}
