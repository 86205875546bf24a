//! Session store: one [`Assistant`] per opaque session key.
//!
//! Sessions are created on first use, touched on every lookup, swept when
//! idle, and capped in number. At capacity the least-recently-used session
//! is dropped to make room.

use matilda_assistant::{Assistant, Phase};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Builds the assistant for a new session.
pub type AssistantFactory = Arc<dyn Fn() -> Assistant + Send + Sync>;

struct Entry {
    assistant: Arc<Assistant>,
    last_used: Instant,
}

pub struct SessionStore {
    factory: AssistantFactory,
    sessions: Mutex<HashMap<String, Entry>>,
    idle_timeout: Duration,
    capacity: usize,
}

impl SessionStore {
    /// A capacity of zero is raised to one.
    pub fn new(factory: AssistantFactory, idle_timeout: Duration, capacity: usize) -> Self {
        Self {
            factory,
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
            capacity: capacity.max(1),
        }
    }

    /// Look up `key`, creating the session if it is absent.
    ///
    /// With no key a fresh one is issued. Returns the key actually used.
    pub fn get_or_create(&self, key: Option<&str>) -> (String, Arc<Assistant>) {
        let key = match key {
            Some(k) if !k.trim().is_empty() => k.to_string(),
            _ => uuid::Uuid::new_v4().to_string(),
        };

        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let now = Instant::now();
        if let Some(entry) = sessions.get_mut(&key) {
            entry.last_used = now;
            return (key, entry.assistant.clone());
        }

        if sessions.len() >= self.capacity {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, e)| e.last_used)
                .map(|(k, _)| k.clone());
            if let Some(oldest) = oldest {
                sessions.remove(&oldest);
                info!(session = %oldest, capacity = self.capacity, "Session store full, evicted least recently used");
            }
        }

        let assistant = Arc::new((self.factory)());
        sessions.insert(
            key.clone(),
            Entry {
                assistant: assistant.clone(),
                last_used: now,
            },
        );
        debug!(session = %key, active = sessions.len(), "Session created");
        (key, assistant)
    }

    /// Look up an existing session without creating one.
    pub fn get(&self, key: &str) -> Option<Arc<Assistant>> {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        sessions.get_mut(key).map(|entry| {
            entry.last_used = Instant::now();
            entry.assistant.clone()
        })
    }

    /// Drop sessions idle longer than the timeout. Busy sessions are kept.
    pub fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
        let before = sessions.len();
        let timeout = self.idle_timeout;
        sessions.retain(|_, entry| {
            entry.last_used.elapsed() <= timeout || entry.assistant.phase() != Phase::Idle
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            info!(evicted, remaining = sessions.len(), "Evicted idle sessions");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
