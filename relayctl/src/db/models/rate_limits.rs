//! Database models for rate-limit counters and rejection events.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::types::UserId;

/// Counter state for one (user, feature) pair.
#[derive(Debug, Clone, FromRow)]
pub struct CounterRecord {
    pub user_id: UserId,
    pub feature: String,
    pub window_start: DateTime<Utc>,
    pub count: i32,
}

/// Result of a conditional increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterOutcome {
    /// Whether a slot was taken
    pub admitted: bool,
    pub window_start: DateTime<Utc>,
    /// Count after the operation
    pub count: u32,
}

/// One recorded rejection. At most one per (username, feature, UTC day).
#[derive(Debug, Clone, FromRow)]
pub struct RateLimitedEvent {
    pub id: Uuid,
    pub user_id: UserId,
    pub username: String,
    pub feature: String,
    pub day: NaiveDate,
    pub created_at: DateTime<Utc>,
}
