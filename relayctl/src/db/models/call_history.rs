//! Database models for the best-effort provider call history.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::types::Json;
use uuid::Uuid;

use crate::types::UserId;

#[derive(Debug, Clone, FromRow)]
pub struct CallHistoryRecord {
    pub id: Uuid,
    pub user_id: UserId,
    pub username: String,
    pub feature: String,
    /// Provider-side identifier, e.g. the voice provider's call id
    pub provider_reference: Option<String>,
    pub destination: Option<String>,
    pub detail: Json<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct CallHistoryCreateDBRequest {
    pub user_id: UserId,
    pub username: String,
    pub feature: String,
    pub provider_reference: Option<String>,
    pub destination: Option<String>,
    pub detail: serde_json::Value,
}
