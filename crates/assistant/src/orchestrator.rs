//! The per-session orchestrator.
//!
//! One [`Assistant`] owns one conversation. A turn moves it from
//! [`Phase::Idle`] to [`Phase::Generating`] and back; [`Assistant::cancel`]
//! moves a running turn to [`Phase::Cancelling`], which the turn observes at
//! its next fragment boundary. Turns on the same assistant are serialized.

use chrono::Local;
use matilda_config::{AppConfig, PromptFormat};
use matilda_core::{
    ConversationId, ConversationObserver, ConversationState, DisplayNames, GenerationError,
    GenerationInput, GenerationRequest, ImageRef, Message, Role, SamplingParams, StyleProfile,
};
use matilda_providers::GenerationAdapter;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clean::clean_response;
use crate::image_intent::{is_image_request, refine_prompt};
use crate::prompt::{greeting, system_prompt};
use crate::stream_event::AssistantEvent;

/// Delivered to the sink once when a streamed reply is cancelled.
pub const CANCEL_NOTICE: &str = "\n[Response generation cancelled]";

const UNAVAILABLE_TEXT: &str =
    "I'm not fully initialized yet. Please configure an API key for a text provider.";
const PROVIDER_FAILURE_TEXT: &str =
    "I'm sorry, I encountered an issue generating a response. Please try again.";

/// Everything an assistant needs from configuration.
#[derive(Debug, Clone)]
pub struct AssistantSettings {
    pub names: DisplayNames,
    pub style: String,
    pub memory_limit: usize,
    pub streaming: bool,
    pub images_enabled: bool,
    pub model: String,
    pub max_tokens: u32,
    /// Overrides the style's temperature when set
    pub temperature: Option<f32>,
    /// Overrides the style's top_p when set
    pub top_p: Option<f32>,
    pub top_k: u32,
    pub prompt_format: PromptFormat,
}

impl AssistantSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            names: DisplayNames::new(config.username.clone(), config.assistant_name.clone()),
            style: config.conversation_style.clone(),
            memory_limit: config.memory_limit,
            streaming: config.streaming,
            images_enabled: config.images.enabled,
            model: config.generation.model.clone(),
            max_tokens: config.generation.max_tokens,
            temperature: config.generation.temperature,
            top_p: config.generation.top_p,
            top_k: config.generation.top_k,
            prompt_format: config.generation.prompt_format,
        }
    }
}

impl Default for AssistantSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Generating,
    Cancelling,
}

/// The result of one turn.
#[derive(Debug, Clone)]
pub struct Reply {
    /// What the user sees. For failures this is the rendered error text.
    pub text: String,
    pub image: Option<ImageRef>,
    pub failure: Option<GenerationError>,
    pub cancelled: bool,
}

impl Reply {
    fn answered(text: String) -> Self {
        Self {
            text,
            image: None,
            failure: None,
            cancelled: false,
        }
    }

    fn failed(error: GenerationError) -> Self {
        let text = match &error {
            GenerationError::Unavailable(_) => UNAVAILABLE_TEXT,
            GenerationError::Provider(_) => PROVIDER_FAILURE_TEXT,
        };
        Self {
            text: text.to_string(),
            image: None,
            failure: Some(error),
            cancelled: false,
        }
    }

    fn cancelled() -> Self {
        Self {
            text: CANCEL_NOTICE.trim().to_string(),
            image: None,
            failure: None,
            cancelled: true,
        }
    }

    pub fn is_failure(&self) -> bool {
        self.failure.is_some()
    }

    /// The event that ends a streamed turn.
    pub fn closing_event(&self, session_id: &ConversationId) -> AssistantEvent {
        if self.cancelled {
            AssistantEvent::Cancelled
        } else if self.is_failure() {
            AssistantEvent::Error {
                message: self.text.clone(),
            }
        } else {
            AssistantEvent::Done {
                session_id: session_id.to_string(),
                text: self.text.clone(),
            }
        }
    }
}

struct Session {
    conversation: ConversationState,
    style: String,
    streaming: bool,
}

struct Inflight {
    phase: Phase,
    token: Option<CancellationToken>,
}

/// Resets the in-flight slot when a turn ends, however it ends.
struct TurnGuard<'a> {
    inflight: &'a Mutex<Inflight>,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        let mut inflight = self.inflight.lock().unwrap_or_else(|e| e.into_inner());
        inflight.phase = Phase::Idle;
        inflight.token = None;
    }
}

/// A conversational assistant bound to one session.
pub struct Assistant {
    settings: AssistantSettings,
    adapter: Arc<GenerationAdapter>,
    session: Mutex<Session>,
    inflight: Mutex<Inflight>,
    turn: tokio::sync::Mutex<()>,
}

impl Assistant {
    pub fn new(settings: AssistantSettings, adapter: Arc<GenerationAdapter>) -> Self {
        let conversation = ConversationState::new(settings.memory_limit, settings.names.clone());
        Self::with_conversation(settings, adapter, conversation)
    }

    /// Every stored message is also handed to `observer`.
    pub fn with_observer(
        settings: AssistantSettings,
        adapter: Arc<GenerationAdapter>,
        observer: Arc<dyn ConversationObserver>,
    ) -> Self {
        let conversation = ConversationState::new(settings.memory_limit, settings.names.clone())
            .with_observer(observer);
        Self::with_conversation(settings, adapter, conversation)
    }

    fn with_conversation(
        settings: AssistantSettings,
        adapter: Arc<GenerationAdapter>,
        mut conversation: ConversationState,
    ) -> Self {
        let style = settings.style.clone();
        conversation.append_system(system_prompt(
            StyleProfile::resolve(&style),
            &settings.names,
            Local::now(),
        ));
        info!(
            session_id = %conversation.session_id(),
            style = %style,
            memory_limit = conversation.memory_limit(),
            "Assistant ready"
        );

        Self {
            session: Mutex::new(Session {
                conversation,
                style,
                streaming: settings.streaming,
            }),
            settings,
            adapter,
            inflight: Mutex::new(Inflight {
                phase: Phase::Idle,
                token: None,
            }),
            turn: tokio::sync::Mutex::new(()),
        }
    }

    fn session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn inflight(&self) -> MutexGuard<'_, Inflight> {
        self.inflight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn begin_turn(&self) -> (TurnGuard<'_>, CancellationToken) {
        let token = CancellationToken::new();
        let mut inflight = self.inflight();
        inflight.phase = Phase::Generating;
        inflight.token = Some(token.clone());
        (
            TurnGuard {
                inflight: &self.inflight,
            },
            token,
        )
    }

    /// Answer one input without streaming.
    pub async fn process(&self, input: &str) -> String {
        self.respond(input).await.text
    }

    /// Answer one input without streaming, keeping failure detail.
    pub async fn respond(&self, input: &str) -> Reply {
        let _turn = self.turn.lock().await;
        let (_guard, token) = self.begin_turn();

        if self.is_image_turn(input) {
            return self.image_turn(input, &token).await;
        }

        let (session_id, request) = self.open_text_turn(input);
        self.single_shot(&session_id, request, &token).await
    }

    /// Answer one input, pushing reply text to `sink` as it arrives.
    ///
    /// Image requests and non-streaming mode deliver the whole reply in one
    /// call. A stream that yields nothing or breaks off is replaced by one
    /// single-shot reply, delivered in one more call. A cancelled turn ends
    /// with one [`CANCEL_NOTICE`] call and stores nothing.
    pub async fn process_stream<F>(&self, input: &str, mut sink: F) -> Reply
    where
        F: FnMut(&str) + Send,
    {
        let _turn = self.turn.lock().await;
        let (_guard, token) = self.begin_turn();

        if self.is_image_turn(input) {
            let reply = self.image_turn(input, &token).await;
            sink(if reply.cancelled { CANCEL_NOTICE } else { reply.text.as_str() });
            return reply;
        }

        let (session_id, request) = self.open_text_turn(input);

        if !self.streaming() {
            let reply = self.single_shot(&session_id, request, &token).await;
            sink(if reply.cancelled { CANCEL_NOTICE } else { reply.text.as_str() });
            return reply;
        }

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => {
                sink(CANCEL_NOTICE);
                return Reply::cancelled();
            }
            opened = self.adapter.generate_stream(request.clone()) => opened,
        };

        let mut stream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Could not open stream, using single-shot");
                return self.fallback(&session_id, request, &token, &mut sink).await;
            }
        };

        let mut full = String::new();
        let mut delivered = 0usize;
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    info!(session_id = %session_id, delivered, "Streamed reply cancelled");
                    sink(CANCEL_NOTICE);
                    return Reply::cancelled();
                }
                next = stream.next() => match next {
                    Some(fragment) => {
                        sink(&fragment);
                        full.push_str(&fragment);
                        delivered += 1;
                    }
                    None => break,
                },
            }
        }

        if delivered == 0 {
            debug!(session_id = %session_id, "Stream produced no text, using single-shot");
            return self.fallback(&session_id, request, &token, &mut sink).await;
        }
        if let Some(e) = stream.interruption() {
            warn!(session_id = %session_id, delivered, error = %e, "Stream cut short, using single-shot");
            return self.fallback(&session_id, request, &token, &mut sink).await;
        }

        let cleaned = clean_response(&full, &self.settings.names);
        self.store_reply(&session_id, &cleaned, None);
        Reply::answered(cleaned)
    }

    /// Exactly one single-shot attempt, delivered to the sink in one call.
    async fn fallback<F>(
        &self,
        session_id: &ConversationId,
        request: GenerationRequest,
        token: &CancellationToken,
        sink: &mut F,
    ) -> Reply
    where
        F: FnMut(&str) + Send,
    {
        let reply = self.single_shot(session_id, request, token).await;
        sink(if reply.cancelled { CANCEL_NOTICE } else { reply.text.as_str() });
        reply
    }

    async fn single_shot(
        &self,
        session_id: &ConversationId,
        request: GenerationRequest,
        token: &CancellationToken,
    ) -> Reply {
        let result = tokio::select! {
            biased;
            _ = token.cancelled() => return Reply::cancelled(),
            result = self.adapter.generate(request) => result,
        };

        match result {
            Ok(text) => {
                let cleaned = clean_response(&text, &self.settings.names);
                self.store_reply(session_id, &cleaned, None);
                Reply::answered(cleaned)
            }
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Generation failed");
                Reply::failed(e)
            }
        }
    }

    async fn image_turn(&self, input: &str, token: &CancellationToken) -> Reply {
        let session_id = {
            let mut session = self.session();
            if session.conversation.last().map(|m| m.role) != Some(Role::User) {
                session.conversation.append_user(input);
            }
            session.conversation.session_id().clone()
        };

        let prompt = refine_prompt(input);
        info!(session_id = %session_id, prompt = %prompt, "Generating image");

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => return Reply::cancelled(),
            outcome = self.adapter.generate_image(&prompt) => outcome,
        };

        self.store_reply(&session_id, &outcome.status, outcome.artifact.clone());
        let text = match &outcome.artifact {
            Some(path) => format!("{} [Image saved to: {path}]", outcome.status),
            None => outcome.status,
        };
        Reply {
            text,
            image: outcome.artifact,
            failure: None,
            cancelled: false,
        }
    }

    fn is_image_turn(&self, input: &str) -> bool {
        self.settings.images_enabled && is_image_request(input)
    }

    /// Store the user input and build the request for it.
    fn open_text_turn(&self, input: &str) -> (ConversationId, GenerationRequest) {
        let mut session = self.session();
        session.conversation.append_user(input);

        let profile = StyleProfile::resolve(&session.style);
        let sampling = SamplingParams {
            max_tokens: self.settings.max_tokens,
            temperature: self.settings.temperature.unwrap_or(profile.temperature),
            top_p: self.settings.top_p.unwrap_or(profile.top_p),
            top_k: self.settings.top_k,
        };
        let generation_input = match self.settings.prompt_format {
            PromptFormat::Transcript => {
                GenerationInput::Prompt(session.conversation.formatted_transcript(None))
            }
            PromptFormat::Messages => {
                GenerationInput::Messages(session.conversation.messages_for_generation(true))
            }
        };

        (
            session.conversation.session_id().clone(),
            GenerationRequest::new(&self.settings.model, generation_input, sampling),
        )
    }

    /// Append the assistant reply unless the session was cleared meanwhile.
    fn store_reply(&self, turn_session: &ConversationId, text: &str, image: Option<ImageRef>) {
        let mut session = self.session();
        if session.conversation.session_id() != turn_session {
            debug!(session_id = %turn_session, "Conversation cleared during turn, reply not stored");
            return;
        }
        session.conversation.append_assistant(text, image);
    }

    /// Ask the running turn to stop. Returns false when nothing is running.
    pub fn cancel(&self) -> bool {
        let mut inflight = self.inflight();
        if inflight.phase != Phase::Generating {
            return false;
        }
        inflight.phase = Phase::Cancelling;
        if let Some(token) = &inflight.token {
            token.cancel();
        }
        true
    }

    pub fn phase(&self) -> Phase {
        self.inflight().phase
    }

    /// Switch style. A fresh system prompt is appended; older ones stay.
    pub fn set_style(&self, name: &str) -> String {
        let mut session = self.session();
        session.style = name.to_string();
        if !StyleProfile::is_known(name) {
            debug!(style = %name, "Unknown style, using default profile");
        }
        let prompt = system_prompt(StyleProfile::resolve(name), &self.settings.names, Local::now());
        session.conversation.append_system(prompt);
        info!(session_id = %session.conversation.session_id(), style = %name, "Conversation style changed");
        format!("Conversation style updated to: {name}")
    }

    pub fn style(&self) -> String {
        self.session().style.clone()
    }

    pub fn set_streaming(&self, enabled: bool) {
        self.session().streaming = enabled;
    }

    pub fn streaming(&self) -> bool {
        self.session().streaming
    }

    /// Forget the conversation and start a new session with a fresh system prompt.
    pub fn clear(&self) {
        let mut session = self.session();
        let previous = session.conversation.session_id().clone();
        session.conversation.clear();
        let prompt = system_prompt(
            StyleProfile::resolve(&session.style),
            &self.settings.names,
            Local::now(),
        );
        session.conversation.append_system(prompt);
        info!(
            previous = %previous,
            session_id = %session.conversation.session_id(),
            "Conversation cleared"
        );
    }

    /// Greet by time of day and store the greeting as an assistant message.
    pub fn startup_greeting(&self) -> String {
        let text = greeting(&self.settings.names, Local::now());
        self.session().conversation.append_assistant(text.clone(), None);
        text
    }

    pub fn session_id(&self) -> ConversationId {
        self.session().conversation.session_id().clone()
    }

    pub fn history(&self) -> Vec<Message> {
        self.session().conversation.messages().to_vec()
    }

    /// Read access to the conversation.
    pub fn inspect<R>(&self, f: impl FnOnce(&ConversationState) -> R) -> R {
        f(&self.session().conversation)
    }

    pub fn names(&self) -> &DisplayNames {
        &self.settings.names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::*;
    use matilda_core::ProviderError;
    use matilda_providers::ImageChain;
    use std::sync::atomic::Ordering;

    fn settings() -> AssistantSettings {
        AssistantSettings {
            names: DisplayNames::new("Tony", "Matilda"),
            style: "balanced".into(),
            memory_limit: 20,
            streaming: true,
            images_enabled: true,
            model: "test-model".into(),
            max_tokens: 256,
            temperature: None,
            top_p: None,
            top_k: 40,
            prompt_format: PromptFormat::Transcript,
        }
    }

    fn assistant_with(provider: Arc<dyn matilda_core::TextProvider>) -> Assistant {
        Assistant::new(settings(), Arc::new(GenerationAdapter::new(provider)))
    }

    fn assistant_messages(assistant: &Assistant) -> Vec<Message> {
        assistant
            .history()
            .into_iter()
            .filter(|m| m.role == Role::Assistant)
            .collect()
    }

    #[tokio::test]
    async fn construction_seeds_system_prompt() {
        let assistant = assistant_with(Arc::new(ScriptedProvider::replying("hi")));
        let history = assistant.history();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_system());
        assert!(history[0].content.starts_with("You are Matilda,"));
        assert_eq!(assistant.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn process_cleans_and_stores_reply() {
        let provider = Arc::new(ScriptedProvider::replying("Matilda: Hello Tony: there"));
        let assistant = assistant_with(provider.clone());

        let reply = assistant.process("Hi").await;
        assert_eq!(reply, "Hello  there");

        let history = assistant.history();
        assert_eq!(history[1].role, Role::User);
        assert_eq!(history[1].content, "Hi");
        assert_eq!(history[2].content, "Hello  there");

        let request = provider.last_request().unwrap();
        assert_eq!(request.model(), "test-model");
        assert_eq!(
            request.input(),
            &GenerationInput::Prompt("Tony: Hi".into())
        );
        assert_eq!(assistant.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn sampling_follows_style_unless_overridden() {
        let provider = Arc::new(ScriptedProvider::replying("ok"));
        let assistant = assistant_with(provider.clone());
        assistant.set_style("creative");
        assistant.process("Hi").await;
        let sampling = provider.last_request().unwrap().sampling().clone();
        assert_eq!(sampling.temperature, 0.9);
        assert_eq!(sampling.top_p, 0.98);
        assert_eq!(sampling.max_tokens, 256);

        let provider = Arc::new(ScriptedProvider::replying("ok"));
        let mut overridden = settings();
        overridden.temperature = Some(0.1);
        let assistant = Assistant::new(
            overridden,
            Arc::new(GenerationAdapter::new(provider.clone())),
        );
        assistant.process("Hi").await;
        let sampling = provider.last_request().unwrap().sampling().clone();
        assert_eq!(sampling.temperature, 0.1);
        assert_eq!(sampling.top_p, 0.9);
    }

    #[tokio::test]
    async fn messages_format_sends_role_tagged_history() {
        let provider = Arc::new(ScriptedProvider::replying("ok"));
        let mut s = settings();
        s.prompt_format = PromptFormat::Messages;
        let assistant = Assistant::new(s, Arc::new(GenerationAdapter::new(provider.clone())));
        assistant.process("Hi").await;

        let request = provider.last_request().unwrap();
        let GenerationInput::Messages(messages) = request.input() else {
            panic!("expected role-tagged input");
        };
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert_eq!(messages[1].content, "Hi");
    }

    #[tokio::test]
    async fn unconfigured_adapter_renders_init_message() {
        let assistant = Assistant::new(settings(), Arc::new(GenerationAdapter::unconfigured()));
        let reply = assistant.respond("Hello").await;
        assert!(reply.is_failure());
        assert_eq!(reply.text, UNAVAILABLE_TEXT);
        assert!(assistant_messages(&assistant).is_empty());
    }

    #[tokio::test]
    async fn provider_failure_is_not_stored() {
        let assistant = assistant_with(Arc::new(FailingProvider::new(ProviderError::Timeout(
            "slow".into(),
        ))));
        let reply = assistant.respond("Hello").await;
        assert!(matches!(reply.failure, Some(GenerationError::Provider(_))));
        assert_eq!(reply.text, PROVIDER_FAILURE_TEXT);
        assert!(assistant_messages(&assistant).is_empty());
    }

    #[tokio::test]
    async fn stream_delivers_fragments_in_order() {
        let provider = Arc::new(StreamingProvider::new(&["Hel", "lo", " Tony"], "unused"));
        let assistant = assistant_with(provider.clone());

        let mut seen = Vec::new();
        let reply = assistant
            .process_stream("Hi", |f| seen.push(f.to_string()))
            .await;

        assert_eq!(seen, vec!["Hel", "lo", " Tony"]);
        assert_eq!(reply.text, "Hello Tony");
        assert_eq!(assistant_messages(&assistant)[0].content, "Hello Tony");
        assert_eq!(provider.complete_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_stream_falls_back_to_single_shot_once() {
        let provider = Arc::new(StreamingProvider::new(&["", ""], "Matilda: full answer"));
        let assistant = assistant_with(provider.clone());

        let mut seen = Vec::new();
        let reply = assistant
            .process_stream("Hi", |f| seen.push(f.to_string()))
            .await;

        assert_eq!(provider.complete_calls.load(Ordering::SeqCst), 1);
        assert_eq!(seen, vec!["full answer"]);
        assert_eq!(reply.text, "full answer");
        assert_eq!(assistant_messages(&assistant).len(), 1);
    }

    #[tokio::test]
    async fn failed_stream_open_falls_back_once() {
        let provider = Arc::new(StreamingProvider::new(&[], "recovered").fail_open());
        let assistant = assistant_with(provider.clone());

        let mut calls = 0;
        let reply = assistant.process_stream("Hi", |_| calls += 1).await;
        assert_eq!(calls, 1);
        assert_eq!(reply.text, "recovered");
        assert_eq!(provider.complete_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn interrupted_stream_falls_back_once() {
        let provider = Arc::new(
            StreamingProvider::new(&["The answer is"], "The answer is 42.").interrupt_after(),
        );
        let assistant = assistant_with(provider.clone());

        let mut seen: Vec<String> = Vec::new();
        let reply = assistant
            .process_stream("Hi", |f| seen.push(f.to_string()))
            .await;

        assert_eq!(provider.complete_calls.load(Ordering::SeqCst), 1);
        assert_eq!(reply.text, "The answer is 42.");
        assert!(!reply.is_failure());
        assert_eq!(seen, vec!["The answer is", "The answer is 42."]);
        let stored = assistant_messages(&assistant);
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "The answer is 42.");
    }

    #[tokio::test]
    async fn cancel_after_two_fragments() {
        let provider = Arc::new(StreamingProvider::new(&["one ", "two ", "three ", "four"], "unused"));
        let assistant = assistant_with(provider);

        let mut seen: Vec<String> = Vec::new();
        let reply = assistant
            .process_stream("Hi", |f| {
                seen.push(f.to_string());
                if seen.len() == 2 {
                    assert!(assistant.cancel());
                }
            })
            .await;

        assert!(reply.cancelled);
        assert_eq!(seen, vec!["one ", "two ", CANCEL_NOTICE]);
        assert!(assistant_messages(&assistant).is_empty());
        assert_eq!(assistant.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn cancel_from_another_task_while_waiting() {
        let assistant = Arc::new(assistant_with(Arc::new(GatedProvider::new())));
        let first_seen = Arc::new(tokio::sync::Notify::new());

        let runner = {
            let assistant = assistant.clone();
            let first_seen = first_seen.clone();
            tokio::spawn(async move {
                let mut seen = Vec::new();
                let reply = assistant
                    .process_stream("Hi", |f| {
                        seen.push(f.to_string());
                        first_seen.notify_one();
                    })
                    .await;
                (reply, seen)
            })
        };

        first_seen.notified().await;
        assert_eq!(assistant.phase(), Phase::Generating);
        assert!(assistant.cancel());

        let (reply, seen) = runner.await.unwrap();
        assert!(reply.cancelled);
        assert_eq!(seen, vec!["first", CANCEL_NOTICE]);
        assert!(assistant_messages(&assistant).is_empty());
        assert!(!assistant.cancel());
    }

    #[tokio::test]
    async fn cancel_when_idle_is_a_no_op() {
        let assistant = assistant_with(Arc::new(ScriptedProvider::replying("hi")));
        assert!(!assistant.cancel());
        assert_eq!(assistant.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn streaming_disabled_uses_one_callback() {
        let provider = Arc::new(StreamingProvider::new(&["a", "b"], "whole"));
        let assistant = assistant_with(provider.clone());
        assistant.set_streaming(false);
        assert!(!assistant.streaming());

        let mut seen = Vec::new();
        assistant
            .process_stream("Hi", |f| seen.push(f.to_string()))
            .await;
        assert_eq!(seen, vec!["whole"]);
        assert_eq!(provider.complete_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn image_request_refines_prompt_and_stores_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let image = Arc::new(RecordingImageProvider::default());
        let adapter = GenerationAdapter::new(Arc::new(ScriptedProvider::replying("unused")))
            .with_images(ImageChain::new(dir.path(), Default::default()).add(image.clone()));
        let assistant = Assistant::new(settings(), Arc::new(adapter));

        let mut seen = Vec::new();
        let reply = assistant
            .process_stream("generate an image of a red fox", |f| seen.push(f.to_string()))
            .await;

        assert_eq!(
            image.prompts.lock().unwrap().as_slice(),
            ["red fox, high quality, detailed, realistic, 4k"]
        );
        let artifact = reply.image.clone().unwrap();
        assert!(reply.text.contains("using Recorder"));
        assert!(reply.text.ends_with(&format!("[Image saved to: {artifact}]")));
        assert_eq!(seen, vec![reply.text.clone()]);

        let stored = assistant_messages(&assistant);
        assert_eq!(stored[0].image.as_ref(), Some(&artifact));
        assert!(!stored[0].content.contains("[Image saved to:"));
    }

    #[tokio::test]
    async fn image_request_skips_user_append_after_user_message() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = GenerationAdapter::unconfigured().with_images(
            ImageChain::new(dir.path(), Default::default())
                .add(Arc::new(RecordingImageProvider::default())),
        );
        let assistant = Assistant::new(settings(), Arc::new(adapter));

        // a failed text turn leaves the user message as the last entry
        assistant.process("hello").await;
        assistant.process("draw a picture of a cat").await;

        let users: Vec<String> = assistant
            .history()
            .into_iter()
            .filter(|m| m.role == Role::User)
            .map(|m| m.content)
            .collect();
        assert_eq!(users, vec!["hello"]);
    }

    #[tokio::test]
    async fn images_disabled_treats_request_as_text() {
        let provider = Arc::new(ScriptedProvider::replying("I can't draw"));
        let mut s = settings();
        s.images_enabled = false;
        let assistant = Assistant::new(s, Arc::new(GenerationAdapter::new(provider.clone())));
        let reply = assistant.process("draw a picture of a boat").await;
        assert_eq!(reply, "I can't draw");
        assert!(provider.last_request().is_some());
    }

    #[tokio::test]
    async fn image_without_chain_reports_failure_status() {
        let assistant = assistant_with(Arc::new(ScriptedProvider::replying("unused")));
        let reply = assistant.respond("picture of a lighthouse").await;
        assert_eq!(reply.text, "Image generation failed. Image generation is not available.");
        assert!(reply.image.is_none());
    }

    #[tokio::test]
    async fn unknown_style_falls_back_to_default_profile() {
        let provider = Arc::new(ScriptedProvider::replying("ok"));
        let assistant = assistant_with(provider.clone());

        assert_eq!(assistant.set_style("xyz"), "Conversation style updated to: xyz");
        assert_eq!(assistant.style(), "xyz");

        let systems: Vec<Message> = assistant.history().into_iter().filter(|m| m.is_system()).collect();
        assert_eq!(systems.len(), 2);
        assert!(systems[1].content.contains("You are helpful, friendly, and knowledgeable."));

        assistant.process("Hi").await;
        let sampling = provider.last_request().unwrap().sampling().clone();
        assert_eq!(sampling.temperature, 0.7);
        assert_eq!(sampling.top_p, 0.9);
    }

    #[tokio::test]
    async fn clear_starts_new_session_with_fresh_prompt() {
        let assistant = assistant_with(Arc::new(ScriptedProvider::replying("ok")));
        assistant.process("Hi").await;
        let before = assistant.session_id();

        assistant.clear();

        assert_ne!(assistant.session_id(), before);
        let history = assistant.history();
        assert_eq!(history.len(), 1);
        assert!(history[0].is_system());
        assert!(assistant.inspect(|c| c.summary().is_empty()));
    }

    #[tokio::test]
    async fn clear_during_turn_drops_the_late_reply() {
        let provider = Arc::new(GatedProvider::new());
        let gate = provider.gate.clone();
        let assistant = Arc::new(assistant_with(provider));

        let runner = {
            let assistant = assistant.clone();
            tokio::spawn(async move { assistant.process_stream("Hi", |_| {}).await })
        };

        gate.started.notified().await;
        assistant.clear();
        gate.release.notify_one();

        let reply = runner.await.unwrap();
        assert!(!reply.cancelled);
        assert_eq!(assistant.history().len(), 1);
    }

    #[tokio::test]
    async fn greeting_is_stored_as_assistant_message() {
        let assistant = assistant_with(Arc::new(ScriptedProvider::replying("ok")));
        let text = assistant.startup_greeting();
        assert!(text.contains("I am Matilda, your personal AI assistant."));
        assert!(text.ends_with("Tony?"));
        assert_eq!(assistant_messages(&assistant)[0].content, text);
    }

    #[tokio::test]
    async fn observer_sees_every_stored_message() {
        let journal = Arc::new(collect::Collect::default());
        let assistant = Assistant::with_observer(
            settings(),
            Arc::new(GenerationAdapter::new(Arc::new(ScriptedProvider::replying("ok")))),
            journal.clone(),
        );
        assistant.process("Hi").await;
        let roles: Vec<Role> = journal.roles.lock().unwrap().clone();
        assert_eq!(roles, vec![Role::System, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn turns_are_serialized() {
        let provider = Arc::new(GatedProvider::new());
        let gate = provider.gate.clone();
        let assistant = Arc::new(assistant_with(provider));

        let first = {
            let assistant = assistant.clone();
            tokio::spawn(async move { assistant.process_stream("one", |_| {}).await })
        };
        gate.started.notified().await;

        let second = {
            let assistant = assistant.clone();
            tokio::spawn(async move { assistant.respond("two").await })
        };
        tokio::task::yield_now().await;

        // the second turn has not stored its user message yet
        let users = assistant
            .history()
            .iter()
            .filter(|m| m.role == Role::User)
            .count();
        assert_eq!(users, 1);

        gate.release.notify_one();
        first.await.unwrap();
        second.await.unwrap();
        let users = assistant
            .history()
            .iter()
            .filter(|m| m.role == Role::User)
            .count();
        assert_eq!(users, 2);
    }

    #[test]
    fn closing_events() {
        let id = ConversationId::from("s1");
        assert_eq!(
            Reply::answered("hi".into()).closing_event(&id),
            AssistantEvent::Done {
                session_id: "s1".into(),
                text: "hi".into()
            }
        );
        assert_eq!(Reply::cancelled().closing_event(&id), AssistantEvent::Cancelled);
        assert_eq!(
            Reply::failed(GenerationError::Unavailable("x".into())).closing_event(&id),
            AssistantEvent::Error {
                message: UNAVAILABLE_TEXT.into()
            }
        );
    }

    mod collect {
        use matilda_core::{ConversationId, ConversationObserver, JournalError, Message, Role};
        use std::sync::Mutex;

        #[derive(Default)]
        pub struct Collect {
            pub roles: Mutex<Vec<Role>>,
        }

        impl ConversationObserver for Collect {
            fn name(&self) -> &str {
                "collect"
            }

            fn record(&self, _: &ConversationId, message: &Message) -> Result<(), JournalError> {
                self.roles.lock().unwrap().push(message.role);
                Ok(())
            }
        }
    }
}
