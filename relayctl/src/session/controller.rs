//! Conversation state machine.
//!
//! A session is either idle or awaiting the reply to exactly one request. Every change goes
//! through [`ConversationSession::apply`] with a typed [`SessionAction`]; the returned
//! [`SessionEffect`] tells the driver what to do next (forward a request, persist a snapshot).
//!
//! Chunks and completions carry the session id and request id they belong to. Anything addressed
//! to another request, or to a session that has since been reset or replaced, is discarded.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::db::models::conversations::{Conversation, ConversationCreateDBRequest};
use crate::errors::{Error, Result};
use crate::providers::{ChatMessage, GenerationParams, MessageRole};
use crate::types::{ConversationId, RequestId, UserId, abbrev_uuid};

/// Maximum title length, in characters, taken from the first message
pub const TITLE_LENGTH: usize = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    Idle,
    AwaitingResponse { request_id: RequestId },
}

#[derive(Debug, Clone)]
pub enum SessionAction {
    SendMessage {
        request_id: RequestId,
        content: String,
    },
    ReceiveChunk {
        session_id: ConversationId,
        request_id: RequestId,
        chunk: String,
    },
    Complete {
        session_id: ConversationId,
        request_id: RequestId,
    },
    Fail {
        session_id: ConversationId,
        request_id: RequestId,
        message: String,
    },
    /// Start over as a new, empty conversation
    Reset { session_id: ConversationId },
    /// Replace the session with a saved conversation
    Load(Box<Conversation>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEffect {
    /// Forward these messages to the chat provider
    Forward {
        request_id: RequestId,
        messages: Vec<ChatMessage>,
        params: GenerationParams,
    },
    /// Save this snapshot
    Persist(SessionSnapshot),
    /// State changed, nothing else to do
    Updated,
    /// The action belonged to a stale request or session and was ignored
    Discarded,
}

/// What gets saved after a completed assistant turn
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub id: ConversationId,
    pub user_id: UserId,
    pub username: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
}

impl From<SessionSnapshot> for ConversationCreateDBRequest {
    fn from(snapshot: SessionSnapshot) -> Self {
        Self {
            id: Some(snapshot.id),
            user_id: snapshot.user_id,
            username: snapshot.username,
            title: snapshot.title,
            messages: snapshot.messages,
            params: snapshot.params,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConversationSession {
    id: ConversationId,
    user_id: UserId,
    username: String,
    title: Option<String>,
    messages: Vec<ChatMessage>,
    params: GenerationParams,
    status: SessionStatus,
    pending: String,
}

impl ConversationSession {
    pub fn new(id: ConversationId, user_id: impl Into<UserId>, username: impl Into<String>, params: GenerationParams) -> Self {
        Self {
            id,
            user_id: user_id.into(),
            username: username.into(),
            title: None,
            messages: Vec::new(),
            params,
            status: SessionStatus::Idle,
            pending: String::new(),
        }
    }

    pub fn id(&self) -> ConversationId {
        self.id
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Reply text received so far for the in-flight request
    pub fn pending_reply(&self) -> &str {
        &self.pending
    }

    pub fn set_params(&mut self, params: GenerationParams) {
        self.params = params;
    }

    /// Seed prior turns without going through a send, e.g. history supplied by the client.
    /// Only allowed while idle.
    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        if self.status == SessionStatus::Idle {
            self.messages = history;
        }
        self
    }

    pub fn apply(&mut self, action: SessionAction) -> Result<SessionEffect> {
        match action {
            SessionAction::SendMessage { request_id, content } => {
                if let SessionStatus::AwaitingResponse { request_id: in_flight } = self.status {
                    return Err(Error::Conflict {
                        message: format!(
                            "conversation {} is still waiting for reply {}",
                            abbrev_uuid(&self.id),
                            abbrev_uuid(&in_flight)
                        ),
                    });
                }
                if content.trim().is_empty() {
                    return Err(Error::BadRequest {
                        message: "message must not be empty".to_string(),
                    });
                }
                self.messages.push(ChatMessage::user(content));
                self.status = SessionStatus::AwaitingResponse { request_id };
                self.pending.clear();
                Ok(SessionEffect::Forward {
                    request_id,
                    messages: self.messages.clone(),
                    params: self.params.clone(),
                })
            }
            SessionAction::ReceiveChunk {
                session_id,
                request_id,
                chunk,
            } => {
                if !self.is_current(session_id, request_id) {
                    return Ok(SessionEffect::Discarded);
                }
                self.pending.push_str(&chunk);
                Ok(SessionEffect::Updated)
            }
            SessionAction::Complete { session_id, request_id } => {
                if !self.is_current(session_id, request_id) {
                    return Ok(SessionEffect::Discarded);
                }
                let reply = std::mem::take(&mut self.pending);
                self.messages.push(ChatMessage::assistant(reply));
                self.status = SessionStatus::Idle;
                Ok(SessionEffect::Persist(self.snapshot()))
            }
            SessionAction::Fail {
                session_id,
                request_id,
                message: _,
            } => {
                if !self.is_current(session_id, request_id) {
                    return Ok(SessionEffect::Discarded);
                }
                // Tokens already shown to the user stay in the transcript
                let partial = std::mem::take(&mut self.pending);
                if !partial.is_empty() {
                    self.messages.push(ChatMessage::assistant(partial));
                }
                self.status = SessionStatus::Idle;
                Ok(SessionEffect::Updated)
            }
            SessionAction::Reset { session_id } => {
                self.id = session_id;
                self.title = None;
                self.messages.clear();
                self.pending.clear();
                self.status = SessionStatus::Idle;
                Ok(SessionEffect::Updated)
            }
            SessionAction::Load(conversation) => {
                let conversation = *conversation;
                self.id = conversation.id;
                self.user_id = conversation.user_id;
                self.username = conversation.username;
                self.title = Some(conversation.title);
                self.messages = conversation.messages.0;
                self.params = conversation.params.0;
                self.pending.clear();
                self.status = SessionStatus::Idle;
                Ok(SessionEffect::Updated)
            }
        }
    }

    fn is_current(&self, session_id: ConversationId, request_id: RequestId) -> bool {
        session_id == self.id && self.status == SessionStatus::AwaitingResponse { request_id }
    }

    /// Title derived from the first user message
    fn derived_title(&self) -> String {
        self.messages
            .iter()
            .find(|m| m.role == MessageRole::User)
            .map(|m| m.content.trim().chars().take(TITLE_LENGTH).collect())
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id,
            user_id: self.user_id.clone(),
            username: self.username.clone(),
            title: self.title.clone().unwrap_or_else(|| self.derived_title()),
            messages: self.messages.clone(),
            params: self.params.clone(),
        }
    }
}

/// Conversations with a reply in flight, across all request handlers.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    inner: Arc<DashMap<ConversationId, RequestId>>,
}

impl InFlightRegistry {
    /// Mark `conversation` busy with `request_id`. Fails with a conflict if another reply is in
    /// flight; the returned guard frees the conversation when dropped.
    pub fn begin(&self, conversation: ConversationId, request_id: RequestId) -> Result<InFlightGuard> {
        match self.inner.entry(conversation) {
            Entry::Occupied(existing) => Err(Error::Conflict {
                message: format!(
                    "conversation {} is still waiting for reply {}",
                    abbrev_uuid(&conversation),
                    abbrev_uuid(existing.get())
                ),
            }),
            Entry::Vacant(slot) => {
                slot.insert(request_id);
                Ok(InFlightGuard {
                    registry: self.inner.clone(),
                    conversation,
                    request_id,
                })
            }
        }
    }

    pub fn is_busy(&self, conversation: ConversationId) -> bool {
        self.inner.contains_key(&conversation)
    }
}

#[must_use]
#[derive(Debug)]
pub struct InFlightGuard {
    registry: Arc<DashMap<ConversationId, RequestId>>,
    conversation: ConversationId,
    request_id: RequestId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry
            .remove_if(&self.conversation, |_, in_flight| *in_flight == self.request_id);
    }
}
