//! Chat API.
//!
//! Endpoints:
//!
//! - `POST /api/chat`          send a message, get the full reply
//! - `POST /api/chat/stream`   send a message, get an SSE stream of events
//! - `GET  /api/greeting`      time-of-day greeting for a session
//! - `POST /api/clear`         forget a session's conversation
//! - `POST /api/style`         change a session's conversation style
//! - `POST /api/cancel`        cancel a session's running reply

use axum::{
    Router,
    extract::{Query, State},
    http::StatusCode,
    response::Json,
    response::sse::{Event as SseEvent, Sse},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use matilda_assistant::{Assistant, AssistantEvent, CANCEL_NOTICE};
use matilda_core::{ConversationId, Message};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, info};

use crate::SharedState;

pub fn api_router(state: SharedState) -> Router {
    Router::new()
        .route("/chat", post(chat_handler))
        .route("/chat/stream", post(chat_stream_handler))
        .route("/greeting", get(greeting_handler))
        .route("/clear", post(clear_handler))
        .route("/style", post(style_handler))
        .route("/cancel", post(cancel_handler))
        .with_state(state)
}

// ── Request / Response types ──────────────────────────────────────────────

#[derive(Deserialize)]
struct ChatRequest {
    message: String,
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct ChatResponse {
    pub session_id: String,
    pub response: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub failed: bool,
    pub history: Vec<Message>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct SessionQuery {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct GreetingResponse {
    pub session_id: String,
    pub greeting: String,
    pub history: Vec<Message>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct SessionRequest {
    #[serde(default)]
    session_id: Option<String>,
}

#[derive(Serialize, Deserialize)]
pub struct ClearResponse {
    pub status: String,
    pub message: String,
}

#[derive(Deserialize)]
struct StyleRequest {
    #[serde(default)]
    session_id: Option<String>,
    style: String,
}

#[derive(Serialize, Deserialize)]
pub struct StyleResponse {
    pub session_id: String,
    pub message: String,
}

#[derive(Serialize, Deserialize)]
pub struct CancelResponse {
    pub session_id: String,
    pub cancelled: bool,
}

#[derive(Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// Sessions named by clear/style/cancel must already exist.
fn existing_session(
    state: &SharedState,
    session_id: Option<String>,
) -> Result<(String, Arc<Assistant>), ApiError> {
    let key = session_id
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| api_error(StatusCode::BAD_REQUEST, "session_id is required"))?;
    let assistant = state
        .sessions
        .get(&key)
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, format!("Unknown session: {key}")))?;
    Ok((key, assistant))
}

fn require_message(message: &str) -> Result<(), ApiError> {
    if message.trim().is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "message must not be empty"));
    }
    Ok(())
}

/// Stored history without system prompts.
fn visible_history(assistant: &Assistant) -> Vec<Message> {
    assistant
        .history()
        .into_iter()
        .filter(|m| !m.is_system())
        .collect()
}

// ── Handlers ──────────────────────────────────────────────────────────────

async fn chat_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    require_message(&payload.message)?;
    let (session_id, assistant) = state.sessions.get_or_create(payload.session_id.as_deref());
    info!(session = %session_id, message_len = payload.message.len(), "api/chat request");

    let reply = assistant.respond(&payload.message).await;

    Ok(Json(ChatResponse {
        session_id,
        response: reply.text.clone(),
        image: reply.image.as_ref().map(|i| i.to_string()),
        failed: reply.is_failure(),
        history: visible_history(&assistant),
        timestamp: Utc::now(),
    }))
}

/// `POST /api/chat/stream`: reply fragments as SSE `chunk` events, then
/// `image` (when one was stored) and one closing `done`, `cancelled` or
/// `error` event.
async fn chat_stream_handler(
    State(state): State<SharedState>,
    Json(payload): Json<ChatRequest>,
) -> Result<Sse<impl futures::Stream<Item = Result<SseEvent, Infallible>>>, ApiError> {
    require_message(&payload.message)?;
    let (session_id, assistant) = state.sessions.get_or_create(payload.session_id.as_deref());
    info!(session = %session_id, "api/chat/stream SSE request");

    let (tx, rx) = tokio::sync::mpsc::unbounded_channel::<AssistantEvent>();
    tokio::spawn(async move {
        let reply = assistant
            .process_stream(&payload.message, |fragment| {
                if fragment == CANCEL_NOTICE {
                    return;
                }
                let event = AssistantEvent::Chunk {
                    content: fragment.to_string(),
                };
                if tx.send(event).is_err() && assistant.cancel() {
                    debug!("SSE client went away, cancelling reply");
                }
            })
            .await;

        if let Some(image) = &reply.image {
            let _ = tx.send(AssistantEvent::Image {
                path: image.to_string(),
            });
        }
        let _ = tx.send(reply.closing_event(&ConversationId::from(session_id.as_str())));
    });

    let stream = UnboundedReceiverStream::new(rx).map(|event| {
        let event_type = event.event_type().to_string();
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(SseEvent::default().event(event_type).data(data))
    });

    Ok(Sse::new(stream))
}

async fn greeting_handler(
    State(state): State<SharedState>,
    Query(query): Query<SessionQuery>,
) -> Json<GreetingResponse> {
    let (session_id, assistant) = state.sessions.get_or_create(query.session_id.as_deref());
    let greeting = assistant.startup_greeting();
    Json(GreetingResponse {
        session_id,
        greeting,
        history: visible_history(&assistant),
        timestamp: Utc::now(),
    })
}

async fn clear_handler(
    State(state): State<SharedState>,
    Json(payload): Json<SessionRequest>,
) -> Result<Json<ClearResponse>, ApiError> {
    let (session_id, assistant) = existing_session(&state, payload.session_id)?;
    assistant.clear();
    info!(session = %session_id, "api/clear");
    Ok(Json(ClearResponse {
        status: "success".into(),
        message: "Conversation cleared".into(),
    }))
}

async fn style_handler(
    State(state): State<SharedState>,
    Json(payload): Json<StyleRequest>,
) -> Result<Json<StyleResponse>, ApiError> {
    let (session_id, assistant) = existing_session(&state, payload.session_id)?;
    let message = assistant.set_style(&payload.style);
    Ok(Json(StyleResponse {
        session_id,
        message,
    }))
}

async fn cancel_handler(
    State(state): State<SharedState>,
    Json(payload): Json<SessionRequest>,
) -> Result<Json<CancelResponse>, ApiError> {
    let (session_id, assistant) = existing_session(&state, payload.session_id)?;
    let cancelled = assistant.cancel();
    info!(session = %session_id, cancelled, "api/cancel");
    Ok(Json(CancelResponse {
        session_id,
        cancelled,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::GatewayState;
    use crate::sessions::{AssistantFactory, SessionStore};
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use matilda_assistant::AssistantSettings;
    use matilda_core::{
        ChunkReceiver, GenerationRequest, ProviderError, StreamChunk, TextProvider, TextResponse,
    };
    use matilda_providers::GenerationAdapter;
    use std::time::Duration;
    use tower::ServiceExt;

    /// Streams the reply word by word.
    struct MockProvider {
        reply: String,
    }

    #[async_trait]
    impl TextProvider for MockProvider {
        fn name(&self) -> &str {
            "gateway_mock"
        }

        fn supports_streaming(&self) -> bool {
            true
        }

        async fn complete(&self, _request: GenerationRequest) -> Result<TextResponse, ProviderError> {
            Ok(TextResponse {
                text: self.reply.clone(),
                model: "mock-model".into(),
                usage: None,
            })
        }

        async fn stream(&self, _request: GenerationRequest) -> Result<ChunkReceiver, ProviderError> {
            let (tx, rx) = tokio::sync::mpsc::channel(16);
            for word in self.reply.split_inclusive(' ') {
                let _ = tx
                    .send(Ok(StreamChunk {
                        content: Some(word.to_string()),
                        done: false,
                    }))
                    .await;
            }
            let _ = tx
                .send(Ok(StreamChunk {
                    content: None,
                    done: true,
                }))
                .await;
            Ok(rx)
        }
    }

    fn state_with(adapter: GenerationAdapter) -> SharedState {
        let adapter = Arc::new(adapter);
        let mut settings = AssistantSettings::default();
        settings.images_enabled = false;
        let factory: AssistantFactory =
            Arc::new(move || Assistant::new(settings.clone(), adapter.clone()));
        Arc::new(GatewayState {
            sessions: SessionStore::new(factory, Duration::from_secs(3600), 100),
        })
    }

    fn test_state() -> SharedState {
        state_with(GenerationAdapter::new(Arc::new(MockProvider {
            reply: "Mock response from Matilda".into(),
        })))
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn chat_creates_session_and_replies() {
        let state = test_state();
        let app = api_router(state.clone());

        let response = app
            .oneshot(post_json("/chat", serde_json::json!({"message": "Hello"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: ChatResponse = body_json(response).await;
        assert_eq!(json.response, "Mock response from Matilda");
        assert!(!json.failed);
        assert!(json.image.is_none());
        assert_eq!(json.history.len(), 2);
        assert_eq!(json.history[0].content, "Hello");
        assert!(state.sessions.get(&json.session_id).is_some());
    }

    #[tokio::test]
    async fn chat_reuses_given_session() {
        let state = test_state();
        let body = serde_json::json!({"message": "one", "session_id": "s1"});
        api_router(state.clone()).oneshot(post_json("/chat", body)).await.unwrap();
        let body = serde_json::json!({"message": "two", "session_id": "s1"});
        let response = api_router(state.clone())
            .oneshot(post_json("/chat", body))
            .await
            .unwrap();

        let json: ChatResponse = body_json(response).await;
        assert_eq!(json.session_id, "s1");
        assert_eq!(json.history.len(), 4);
        assert_eq!(state.sessions.len(), 1);
    }

    #[tokio::test]
    async fn chat_without_provider_reports_failure() {
        let state = state_with(GenerationAdapter::unconfigured());
        let response = api_router(state)
            .oneshot(post_json("/chat", serde_json::json!({"message": "Hello"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let json: ChatResponse = body_json(response).await;
        assert!(json.failed);
        assert!(json.response.contains("configure an API key"));
        assert_eq!(json.history.len(), 1);
    }

    #[tokio::test]
    async fn empty_message_is_rejected() {
        let response = api_router(test_state())
            .oneshot(post_json("/chat", serde_json::json!({"message": "  "})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn stream_emits_chunks_then_done() {
        let response = api_router(test_state())
            .oneshot(post_json(
                "/chat/stream",
                serde_json::json!({"message": "Hi", "session_id": "s"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert_eq!(text.matches("event: chunk").count(), 4);
        assert!(text.contains("event: done"));
        assert!(text.contains(r#""text":"Mock response from Matilda""#));
        assert!(text.contains(r#""session_id":"s""#));
        assert!(text.find("event: chunk").unwrap() < text.find("event: done").unwrap());
    }

    #[tokio::test]
    async fn greeting_creates_session() {
        let state = test_state();
        let request = Request::builder()
            .uri("/greeting")
            .body(Body::empty())
            .unwrap();
        let response = api_router(state.clone()).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let json: GreetingResponse = body_json(response).await;
        assert!(json.greeting.contains("your personal AI assistant"));
        assert_eq!(json.history.len(), 1);
        assert!(state.sessions.get(&json.session_id).is_some());
    }

    #[tokio::test]
    async fn clear_style_cancel_require_session_id() {
        for uri in ["/clear", "/cancel"] {
            let response = api_router(test_state())
                .oneshot(post_json(uri, serde_json::json!({})))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{uri}");
        }
        let response = api_router(test_state())
            .oneshot(post_json("/style", serde_json::json!({"style": "casual"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let response = api_router(test_state())
            .oneshot(post_json("/clear", serde_json::json!({"session_id": "nope"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn style_clear_and_cancel_on_existing_session() {
        let state = test_state();
        let (key, assistant) = state.sessions.get_or_create(Some("s"));
        assistant.process("Hello").await;

        let response = api_router(state.clone())
            .oneshot(post_json(
                "/style",
                serde_json::json!({"session_id": key, "style": "casual"}),
            ))
            .await
            .unwrap();
        let json: StyleResponse = body_json(response).await;
        assert_eq!(json.message, "Conversation style updated to: casual");
        assert_eq!(assistant.style(), "casual");

        let response = api_router(state.clone())
            .oneshot(post_json("/cancel", serde_json::json!({"session_id": key})))
            .await
            .unwrap();
        let json: CancelResponse = body_json(response).await;
        assert!(!json.cancelled);

        let before = assistant.session_id();
        let response = api_router(state.clone())
            .oneshot(post_json("/clear", serde_json::json!({"session_id": key})))
            .await
            .unwrap();
        let json: ClearResponse = body_json(response).await;
        assert_eq!(json.status, "success");
        assert_ne!(assistant.session_id(), before);
        assert!(visible_history(&assistant).is_empty());
    }
}
