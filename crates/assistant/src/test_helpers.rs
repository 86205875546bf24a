//! Shared test providers for orchestrator tests.

use async_trait::async_trait;
use matilda_core::{
    ChunkReceiver, GenerationRequest, ImageProvider, ImageSize, ProviderError, StreamChunk,
    TextProvider, TextResponse,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

fn response(text: &str) -> TextResponse {
    TextResponse {
        text: text.into(),
        model: "test-model".into(),
        usage: None,
    }
}

fn fragment(text: &str) -> Result<StreamChunk, ProviderError> {
    Ok(StreamChunk {
        content: Some(text.into()),
        done: false,
    })
}

/// Non-streaming provider with a fixed reply that remembers its last request.
pub struct ScriptedProvider {
    reply: String,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedProvider {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn last_request(&self) -> Option<GenerationRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl TextProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: GenerationRequest) -> Result<TextResponse, ProviderError> {
        self.requests.lock().unwrap().push(request);
        Ok(response(&self.reply))
    }
}

/// Streams a fixed list of fragments; `complete` answers with `full`.
pub struct StreamingProvider {
    fragments: Vec<String>,
    full: String,
    fail_open: bool,
    interrupt: bool,
    pub complete_calls: AtomicUsize,
}

impl StreamingProvider {
    pub fn new(fragments: &[&str], full: &str) -> Self {
        Self {
            fragments: fragments.iter().map(|f| f.to_string()).collect(),
            full: full.into(),
            fail_open: false,
            interrupt: false,
            complete_calls: AtomicUsize::new(0),
        }
    }

    /// `stream` itself returns an error.
    pub fn fail_open(mut self) -> Self {
        self.fail_open = true;
        self
    }

    /// An error follows the last fragment.
    pub fn interrupt_after(mut self) -> Self {
        self.interrupt = true;
        self
    }
}

#[async_trait]
impl TextProvider for StreamingProvider {
    fn name(&self) -> &str {
        "streaming"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn complete(&self, _request: GenerationRequest) -> Result<TextResponse, ProviderError> {
        self.complete_calls.fetch_add(1, Ordering::SeqCst);
        Ok(response(&self.full))
    }

    async fn stream(&self, _request: GenerationRequest) -> Result<ChunkReceiver, ProviderError> {
        if self.fail_open {
            return Err(ProviderError::Network("connection refused".into()));
        }
        let (tx, rx) = tokio::sync::mpsc::channel(self.fragments.len() + 2);
        for f in &self.fragments {
            let _ = tx.send(fragment(f)).await;
        }
        let last = if self.interrupt {
            Err(ProviderError::StreamInterrupted("reset by peer".into()))
        } else {
            Ok(StreamChunk {
                content: None,
                done: true,
            })
        };
        let _ = tx.send(last).await;
        Ok(rx)
    }
}

#[derive(Default)]
pub struct Gate {
    /// Signalled once the first fragment is queued.
    pub started: Notify,
    /// Lets the rest of the stream through.
    pub release: Notify,
}

/// Streams "first", then waits on the gate before "second".
pub struct GatedProvider {
    pub gate: Arc<Gate>,
}

impl GatedProvider {
    pub fn new() -> Self {
        Self {
            gate: Arc::new(Gate::default()),
        }
    }
}

#[async_trait]
impl TextProvider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn complete(&self, _request: GenerationRequest) -> Result<TextResponse, ProviderError> {
        Ok(response("done"))
    }

    async fn stream(&self, _request: GenerationRequest) -> Result<ChunkReceiver, ProviderError> {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let gate = self.gate.clone();
        tokio::spawn(async move {
            let _ = tx.send(fragment("first")).await;
            gate.started.notify_one();
            gate.release.notified().await;
            let _ = tx.send(fragment("second")).await;
            let _ = tx
                .send(Ok(StreamChunk {
                    content: None,
                    done: true,
                }))
                .await;
        });
        Ok(rx)
    }
}

/// Always fails with the given error.
pub struct FailingProvider {
    error: ProviderError,
}

impl FailingProvider {
    pub fn new(error: ProviderError) -> Self {
        Self { error }
    }
}

#[async_trait]
impl TextProvider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: GenerationRequest) -> Result<TextResponse, ProviderError> {
        Err(self.error.clone())
    }
}

/// Image provider that records prompts and returns a tiny payload.
#[derive(Default)]
pub struct RecordingImageProvider {
    pub prompts: Mutex<Vec<String>>,
}

#[async_trait]
impl ImageProvider for RecordingImageProvider {
    fn name(&self) -> &str {
        "recorder"
    }

    fn display_name(&self) -> &str {
        "Recorder"
    }

    async fn generate(&self, prompt: &str, _size: ImageSize) -> Result<Vec<u8>, ProviderError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}
