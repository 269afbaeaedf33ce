//! API request/response models for voice calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::models::call_history::CallHistoryRecord;
use crate::providers::CallConfiguration;

/// Body of `POST /calls`. Telephony credentials are server configuration and are rejected here.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct StartCallRequest {
    pub user_id: Option<String>,
    pub username: Option<String>,
    pub call: CallConfiguration,
}

/// Status update delivered by the voice provider
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallEventRequest {
    /// Provider status, e.g. `ringing`, `in-progress`, `ended`
    #[schema(example = "in-progress")]
    pub status: String,
    pub ended_reason: Option<String>,
}

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct CallHistoryQuery {
    pub user_id: Option<String>,
    /// Maximum number of entries, newest first
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallHistoryResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub user_id: String,
    pub username: String,
    pub feature: String,
    pub provider_reference: Option<String>,
    pub destination: Option<String>,
    #[schema(value_type = Object)]
    pub detail: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<CallHistoryRecord> for CallHistoryResponse {
    fn from(record: CallHistoryRecord) -> Self {
        Self {
            id: record.id,
            user_id: record.user_id,
            username: record.username,
            feature: record.feature,
            provider_reference: record.provider_reference,
            destination: record.destination,
            detail: record.detail.0,
            created_at: record.created_at,
        }
    }
}
