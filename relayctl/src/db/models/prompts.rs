//! Database models for saved prompt presets.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

use crate::types::PromptId;

#[derive(Debug, Clone, FromRow)]
pub struct PromptPreset {
    pub id: PromptId,
    pub username: String,
    pub title: String,
    pub prompt: String,
    pub model: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub max_tokens: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PromptCreateDBRequest {
    pub username: String,
    pub title: String,
    pub prompt: String,
    pub model: Option<String>,
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub max_tokens: i32,
}

#[derive(Debug, Clone, Default)]
pub struct PromptUpdateDBRequest {
    pub title: Option<String>,
    pub prompt: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub max_tokens: Option<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct PromptFilter {
    pub username: Option<String>,
}
