//! API response models for rate-limit rejections.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::db::models::rate_limits::RateLimitedEvent;

#[derive(Debug, Deserialize, IntoParams)]
pub struct RateLimitEventsQuery {
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitedEventResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: Uuid,
    pub user_id: String,
    pub username: String,
    #[schema(example = "chat")]
    pub feature: String,
    /// UTC day the rejection counts against
    pub day: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl From<RateLimitedEvent> for RateLimitedEventResponse {
    fn from(event: RateLimitedEvent) -> Self {
        Self {
            id: event.id,
            user_id: event.user_id,
            username: event.username,
            feature: event.feature,
            day: event.day,
            created_at: event.created_at,
        }
    }
}
