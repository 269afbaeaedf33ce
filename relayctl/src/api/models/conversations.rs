//! API request/response models for saved conversations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::db::models::conversations::Conversation;
use crate::providers::{ChatMessage, GenerationParams};
use crate::types::ConversationId;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListConversationsQuery {
    pub username: Option<String>,
    /// Number of items to skip
    pub skip: Option<i64>,
    /// Maximum number of items to return
    pub limit: Option<i64>,
}

/// Saving with an existing id replaces that conversation's messages.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationCreate {
    #[schema(value_type = Option<String>, format = "uuid")]
    pub id: Option<ConversationId>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    /// Defaults to the start of the first user message
    pub title: Option<String>,
    pub messages: Vec<ChatMessage>,
    pub params: Option<GenerationParams>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct ConversationUpdate {
    pub title: Option<String>,
    pub messages: Option<Vec<ChatMessage>>,
    pub params: Option<GenerationParams>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConversationResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: ConversationId,
    pub user_id: String,
    pub username: String,
    pub title: String,
    pub messages: Vec<ChatMessage>,
    pub params: GenerationParams,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Conversation> for ConversationResponse {
    fn from(conversation: Conversation) -> Self {
        Self {
            id: conversation.id,
            user_id: conversation.user_id,
            username: conversation.username,
            title: conversation.title,
            messages: conversation.messages.0,
            params: conversation.params.0,
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}
