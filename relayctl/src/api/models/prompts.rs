//! API request/response models for prompt presets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::db::models::prompts::PromptPreset;
use crate::types::PromptId;

#[derive(Debug, Deserialize, IntoParams)]
pub struct ListPromptsQuery {
    pub username: Option<String>,
}

/// A saved system prompt with its generation parameters. Unset parameters take the server's chat
/// defaults.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PromptCreate {
    pub username: Option<String>,
    #[schema(example = "Terse reviewer")]
    pub title: String,
    pub prompt: String,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PromptUpdate {
    pub title: Option<String>,
    pub prompt: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct PromptResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: PromptId,
    pub username: String,
    pub title: String,
    pub prompt: String,
    pub model: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub max_tokens: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<PromptPreset> for PromptResponse {
    fn from(preset: PromptPreset) -> Self {
        Self {
            id: preset.id,
            username: preset.username,
            title: preset.title,
            prompt: preset.prompt,
            model: preset.model,
            temperature: preset.temperature,
            top_p: preset.top_p,
            presence_penalty: preset.presence_penalty,
            frequency_penalty: preset.frequency_penalty,
            max_tokens: preset.max_tokens.max(0) as u32,
            created_at: preset.created_at,
            updated_at: preset.updated_at,
        }
    }
}
