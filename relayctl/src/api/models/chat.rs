//! API request models for streaming chat.

use serde::Deserialize;
use utoipa::ToSchema;

use crate::config::ChatDefaults;
use crate::providers::{ChatMessage, GenerationParams};
use crate::types::ConversationId;

/// Body of `POST /chat`. Unset generation parameters fall back to the server defaults.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Conversation so far, ending with the new user message
    pub messages: Vec<ChatMessage>,
    #[schema(example = "gpt-3.5-turbo")]
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Custom system prompt. A prompt describing the current time and parameters is used when
    /// absent.
    pub prompt: Option<String>,
    pub user_id: Option<String>,
    pub username: Option<String>,
    /// Conversation to continue. A new id is assigned and announced in the first event when absent.
    #[schema(value_type = Option<String>, format = "uuid")]
    pub conversation_id: Option<ConversationId>,
}

impl ChatRequest {
    pub fn params(&self, defaults: &ChatDefaults) -> GenerationParams {
        GenerationParams {
            model: self
                .model
                .clone()
                .filter(|m| !m.trim().is_empty())
                .unwrap_or_else(|| defaults.model.clone()),
            temperature: self.temperature.unwrap_or(defaults.temperature),
            top_p: self.top_p.unwrap_or(defaults.top_p),
            presence_penalty: self.presence_penalty.unwrap_or(defaults.presence_penalty),
            frequency_penalty: self.frequency_penalty.unwrap_or(defaults.frequency_penalty),
            max_tokens: self.max_tokens.unwrap_or(defaults.max_tokens),
            system_prompt: self.prompt.clone().filter(|p| !p.trim().is_empty()),
        }
    }
}
