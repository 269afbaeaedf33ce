//! Streaming chat.
//!
//! The reply is relayed as server-sent events:
//!
//! - `session`: the conversation id, sent first
//! - unnamed `data` events: reply tokens, in order
//! - `done` or `error`: exactly one terminal event
//!
//! Every completed turn is saved in the background. Dropping the connection drops the upstream
//! stream and the turn is not saved.

use std::convert::Infallible;

use axum::{
    Json,
    extract::State,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
};
use futures::{Stream, StreamExt, stream};
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::api::models::chat::ChatRequest;
use crate::db::{Database, handlers::Conversations, models::conversations::ConversationCreateDBRequest};
use crate::errors::{Error, Result, rate_limit_headers};
use crate::forwarder::{Caller, ChatStream};
use crate::providers::MessageRole;
use crate::session::controller::{ConversationSession, InFlightGuard, SessionAction, SessionEffect, SessionSnapshot};
use crate::types::{ConversationId, Feature, RequestId, abbrev_uuid};
use crate::AppState;

#[utoipa::path(
    post,
    path = "/chat",
    tag = "chat",
    summary = "Stream a chat reply",
    description = "Relays the provider's reply as server-sent events. The last message must come from the user.",
    request_body = ChatRequest,
    responses(
        (status = 200, description = "Event stream of reply tokens", content_type = "text/event-stream"),
        (status = 400, description = "Missing userId, username or user message"),
        (status = 409, description = "A reply for this conversation is already streaming"),
        (status = 429, description = "Daily chat allowance used up"),
        (status = 502, description = "Chat provider failed before the first token")
    )
)]
#[instrument(skip_all, fields(conversation_id))]
pub async fn chat(State(state): State<AppState>, Json(request): Json<ChatRequest>) -> Result<Response> {
    let caller = Caller::new(request.user_id.clone(), request.username.clone())?;
    let params = request.params(state.forwarder.chat_defaults());

    let mut history = request.messages;
    let content = match history.pop() {
        Some(last) if last.role == MessageRole::User && !last.content.trim().is_empty() => last.content,
        _ => {
            return Err(Error::BadRequest {
                message: "the last message must be a non-empty user message".to_string(),
            });
        }
    };

    let conversation_id = request.conversation_id.unwrap_or_else(Uuid::new_v4);
    tracing::Span::current().record("conversation_id", tracing::field::display(abbrev_uuid(&conversation_id)));
    let request_id = Uuid::new_v4();
    let guard = state.in_flight.begin(conversation_id, request_id)?;

    let mut session = ConversationSession::new(conversation_id, caller.user_id.clone(), caller.username.clone(), params)
        .with_history(history);
    let SessionEffect::Forward { messages, params, .. } = session.apply(SessionAction::SendMessage { request_id, content })?
    else {
        return Err(Error::Internal {
            operation: "start chat turn".to_string(),
        });
    };

    let decision = state.rate_limiter.enforce(&caller.user_id, &caller.username, Feature::Chat).await?;
    let tokens = state.forwarder.forward_chat(messages, &params).await?;

    let relay = Relay {
        tokens,
        session,
        request_id,
        db: state.db.clone(),
        _guard: guard,
    };
    let events = stream::once(async move { Ok(Event::default().event("session").data(conversation_id.to_string())) })
        .chain(relay.into_events());

    Ok((
        rate_limit_headers(decision.limit, decision.remaining, decision.reset_at),
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
        .into_response())
}

/// One in-flight turn: the upstream tokens and the session they belong to
struct Relay {
    tokens: ChatStream,
    session: ConversationSession,
    request_id: RequestId,
    db: Database,
    _guard: InFlightGuard,
}

impl Relay {
    fn into_events(self) -> impl Stream<Item = std::result::Result<Event, Infallible>> + Send {
        stream::unfold(Some(self), |relay| async move {
            let mut relay = relay?;
            let session_id = relay.session.id();
            let request_id = relay.request_id;

            match relay.tokens.next().await {
                Some(Ok(chunk)) => {
                    let event = Event::default().data(&chunk);
                    let _ = relay.session.apply(SessionAction::ReceiveChunk {
                        session_id,
                        request_id,
                        chunk,
                    });
                    Some((Ok(event), Some(relay)))
                }
                Some(Err(e)) => {
                    warn!(error = %e, "Chat stream failed");
                    let _ = relay.session.apply(SessionAction::Fail {
                        session_id,
                        request_id,
                        message: e.to_string(),
                    });
                    Some((Ok(Event::default().event("error").data(e.user_message())), None))
                }
                None => {
                    if let Ok(SessionEffect::Persist(snapshot)) =
                        relay.session.apply(SessionAction::Complete { session_id, request_id })
                    {
                        persist_in_background(relay.db.clone(), snapshot);
                    }
                    debug!("Chat turn complete");
                    Some((Ok(Event::default().event("done").data(session_id.to_string())), None))
                }
            }
        })
    }
}

/// Save a completed turn without holding up the response. Failures are logged only.
fn persist_in_background(db: Database, snapshot: SessionSnapshot) {
    tokio::spawn(async move {
        let id: ConversationId = snapshot.id;
        let request = ConversationCreateDBRequest::from(snapshot);
        if let Err(e) = Conversations::new(&db).upsert(id, &request).await {
            warn!(error = %e, conversation_id = %abbrev_uuid(&id), "Failed to save conversation");
        }
    });
}

#[cfg(test)]
mod tests {
    use crate::AppState;
    use crate::db::{Database, handlers::Conversations, handlers::repository::Repository};
    use crate::errors::{RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER, RATE_LIMIT_RESET_HEADER};
    use crate::providers::dummy::{DummyVoiceProvider, DummyWorkflowProvider};
    use crate::providers::{ChatMessage, ChatProvider, GenerationParams, TokenStream};
    use crate::test_utils::{create_test_app, create_test_config};
    use async_trait::async_trait;
    use axum::http::StatusCode;
    use futures::{StreamExt, stream};
    use serde_json::json;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;

    /// Sends one token, then never finishes
    struct StallingChat;

    #[async_trait]
    impl ChatProvider for StallingChat {
        async fn stream_chat(&self, _: &[ChatMessage], _: &GenerationParams) -> crate::providers::Result<TokenStream> {
            let first = Ok::<_, crate::providers::ProviderError>("thinking".to_string());
            Ok(Box::pin(stream::iter(vec![first]).chain(stream::pending())))
        }
    }

    /// Serve the router on a real socket so responses can be read incrementally and dropped
    async fn serve_with_chat(chat: Arc<dyn ChatProvider>) -> (SocketAddr, AppState) {
        let state = AppState::new(
            create_test_config(),
            Database::in_memory(),
            chat,
            Arc::new(DummyWorkflowProvider::default()),
            Arc::new(DummyVoiceProvider::default()),
        );
        let router = crate::build_router(&state).unwrap();
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        (addr, state)
    }

    fn chat_body(content: &str) -> serde_json::Value {
        json!({
            "messages": [{"role": "user", "content": content}],
            "userId": "user_1",
            "username": "ada"
        })
    }

    #[tokio::test]
    #[test_log::test]
    async fn test_chat_streams_tokens_then_done() {
        let server = create_test_app(create_test_config()).await;

        let response = server.post("/chat").json(&chat_body("hello there")).await;

        response.assert_status_ok();
        assert_eq!(response.header(RATE_LIMIT_REMAINING_HEADER), "49");
        let body = response.text();
        let session = body.find("event: session").unwrap();
        let first_token = body.find("Hello").unwrap();
        let done = body.find("event: done").unwrap();
        assert!(session < first_token && first_token < done);
        assert!(body.contains("event: done"));
        assert!(!body.contains("event: error"));
    }

    #[tokio::test]
    async fn test_chat_requires_identity() {
        let server = create_test_app(create_test_config()).await;

        let response = server
            .post("/chat")
            .json(&json!({"messages": [{"role": "user", "content": "hi"}], "username": "ada"}))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
        assert_eq!(response.text(), "userId is required");
    }

    #[tokio::test]
    async fn test_chat_requires_trailing_user_message() {
        let server = create_test_app(create_test_config()).await;

        let response = server
            .post("/chat")
            .json(&json!({
                "messages": [{"role": "user", "content": "hi"}, {"role": "assistant", "content": "hello"}],
                "userId": "user_1",
                "username": "ada"
            }))
            .await;
        response.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    #[test_log::test]
    async fn test_fifty_first_chat_is_rate_limited_once_per_day() {
        let server = create_test_app(create_test_config()).await;

        for _ in 0..50 {
            server.post("/chat").json(&chat_body("again")).await.assert_status_ok();
        }

        let denied = server.post("/chat").json(&chat_body("one more")).await;
        denied.assert_status(StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(denied.header(RATE_LIMIT_LIMIT_HEADER), "50");
        assert_eq!(denied.header(RATE_LIMIT_REMAINING_HEADER), "0");
        let reset: i64 = denied.header(RATE_LIMIT_RESET_HEADER).to_str().unwrap().parse().unwrap();
        assert!(reset > chrono::Utc::now().timestamp());

        // A second rejection on the same day is not recorded again
        server
            .post("/chat")
            .json(&chat_body("and another"))
            .await
            .assert_status(StatusCode::TOO_MANY_REQUESTS);

        let events = server.get("/rate-limits/events").add_query_param("username", "ada").await;
        events.assert_status_ok();
        let events: serde_json::Value = events.json();
        let events = events.as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["feature"], "chat");
    }

    #[tokio::test]
    async fn test_completed_turn_is_saved() {
        let server = create_test_app(create_test_config()).await;
        let conversation_id = uuid::Uuid::new_v4();

        let mut body = chat_body("What is the capital of France, and why is it Paris?");
        body["conversationId"] = json!(conversation_id);
        server.post("/chat").json(&body).await.assert_status_ok();

        // Saving happens in the background
        let mut saved = None;
        for _ in 0..50 {
            let response = server.get(&format!("/conversations/{conversation_id}")).await;
            if response.status_code() == StatusCode::OK {
                saved = Some(response.json::<serde_json::Value>());
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let saved = saved.expect("conversation was saved");
        assert_eq!(saved["title"], "What is the capital of France,");
        let messages = saved["messages"].as_array().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1]["role"], "assistant");
        assert_eq!(messages[1]["content"], "Hello from the dummy chat provider.");
    }

    #[tokio::test]
    #[test_log::test]
    async fn test_concurrent_send_conflicts_until_stream_is_dropped() {
        let (addr, state) = serve_with_chat(Arc::new(StallingChat)).await;
        crate::install_crypto_provider();
        let client = reqwest::Client::new();
        let url = format!("http://{addr}/chat");
        let conversation_id = uuid::Uuid::new_v4();
        let mut body = chat_body("Tell me a long story");
        body["conversationId"] = json!(conversation_id);

        let mut first = client.post(&url).json(&body).send().await.unwrap();
        assert_eq!(first.status(), reqwest::StatusCode::OK);
        let mut received = String::new();
        while !received.contains("thinking") {
            let chunk = first.chunk().await.unwrap().expect("stream ended early");
            received.push_str(&String::from_utf8_lossy(&chunk));
        }
        assert!(state.in_flight.is_busy(conversation_id));

        let second = client.post(&url).json(&body).send().await.unwrap();
        assert_eq!(second.status(), reqwest::StatusCode::CONFLICT);

        // Hanging up releases the conversation
        drop(first);
        let mut released = false;
        for _ in 0..250 {
            if !state.in_flight.is_busy(conversation_id) {
                released = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(released, "conversation still marked busy after disconnect");

        let third = client.post(&url).json(&body).send().await.unwrap();
        assert_eq!(third.status(), reqwest::StatusCode::OK);
        drop(third);

        // An abandoned turn is never saved
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(
            Conversations::new(&state.db)
                .get_by_id(conversation_id)
                .await
                .unwrap()
                .is_none()
        );
    }
}
