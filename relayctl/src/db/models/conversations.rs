//! Database models for persisted chat conversations.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::types::Json;

use crate::providers::{ChatMessage, GenerationParams};
use crate::types::{ConversationId, UserId};

#[derive(Debug, Clone, FromRow)]
pub struct Conversation {
    pub id: ConversationId,
    pub user_id: UserId,
    pub username: String,
    pub title: String,
    pub messages: Json<Vec<ChatMessage>>,
    pub params: Json<GenerationParams>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ConversationCreateDBRequest {
    /// Caller-chosen id, so an in-progress session keeps its identity once saved
    pub id: Option<ConversationId>,
    pub user_id: UserId,
    pub username: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationUpdateDBRequest {
    pub title: Option<String>,
    pub messages: Option<Vec<ChatMessage>>,
    pub params: Option<GenerationParams>,
}

#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub username: Option<String>,
    pub skip: i64,
    pub limit: i64,
}
