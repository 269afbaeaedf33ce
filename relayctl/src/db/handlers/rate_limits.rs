//! Rate-limit counters and rejection events.

use chrono::{DateTime, Duration, Utc};
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    Database,
    errors::{DbError, Result},
    models::rate_limits::{CounterOutcome, CounterRecord, RateLimitedEvent},
};

/// Whether a window that opened at `window_start` has closed by `now`. A window whose end is not
/// representable never closes.
fn window_expired(window_start: DateTime<Utc>, window: Duration, now: DateTime<Utc>) -> bool {
    window_start.checked_add_signed(window).is_some_and(|end| end <= now)
}

/// The `count` column is an INTEGER; limits beyond it are unreachable anyway.
fn count_limit(limit: u32) -> i32 {
    i32::try_from(limit).unwrap_or(i32::MAX)
}

/// Repository for per-(user, feature) request counters.
pub struct Counters<'c> {
    db: &'c Database,
}

impl<'c> Counters<'c> {
    pub fn new(db: &'c Database) -> Self {
        Self { db }
    }

    /// Take one slot if the window has room, as a single atomic operation.
    ///
    /// An expired window (`window_start + window <= now`) restarts at `now` with a count of one.
    /// Otherwise the count is incremented only while it is below `limit`. `limit` must be
    /// positive; callers handle zero-limit features without touching the store.
    #[instrument(skip(self), err)]
    pub async fn try_increment(
        &mut self,
        user_id: &str,
        feature: &str,
        limit: u32,
        window: Duration,
        now: DateTime<Utc>,
    ) -> Result<CounterOutcome> {
        match self.db {
            Database::Postgres(pool) => {
                let window_secs = window.num_milliseconds() as f64 / 1000.0;
                let admitted = sqlx::query_as::<_, CounterRecord>(
                    r#"
                    INSERT INTO rate_limit_counters (user_id, feature, window_start, count)
                    VALUES ($1, $2, $3, 1)
                    ON CONFLICT (user_id, feature) DO UPDATE SET
                        window_start = CASE
                            WHEN rate_limit_counters.window_start + make_interval(secs => $4) <= $3 THEN $3
                            ELSE rate_limit_counters.window_start
                        END,
                        count = CASE
                            WHEN rate_limit_counters.window_start + make_interval(secs => $4) <= $3 THEN 1
                            ELSE rate_limit_counters.count + 1
                        END
                    WHERE rate_limit_counters.window_start + make_interval(secs => $4) <= $3
                       OR rate_limit_counters.count < $5
                    RETURNING *
                    "#,
                )
                .bind(user_id)
                .bind(feature)
                .bind(now)
                .bind(window_secs)
                .bind(count_limit(limit))
                .fetch_optional(pool)
                .await?;

                if let Some(record) = admitted {
                    return Ok(CounterOutcome {
                        admitted: true,
                        window_start: record.window_start,
                        count: record.count.max(0) as u32,
                    });
                }

                // Denied: the row exists and is full, report its window
                let record = self.get(user_id, feature).await?.ok_or(DbError::NotFound)?;
                Ok(CounterOutcome {
                    admitted: false,
                    window_start: record.window_start,
                    count: record.count.max(0) as u32,
                })
            }
            Database::Memory(store) => {
                let mut record = store
                    .counters
                    .entry((user_id.to_string(), feature.to_string()))
                    .or_insert_with(|| CounterRecord {
                        user_id: user_id.to_string(),
                        feature: feature.to_string(),
                        window_start: now,
                        count: 0,
                    });

                if window_expired(record.window_start, window, now) {
                    record.window_start = now;
                    record.count = 0;
                }

                let admitted = record.count < count_limit(limit);
                if admitted {
                    record.count += 1;
                }

                Ok(CounterOutcome {
                    admitted,
                    window_start: record.window_start,
                    count: record.count.max(0) as u32,
                })
            }
        }
    }

    #[instrument(skip(self), err)]
    pub async fn get(&mut self, user_id: &str, feature: &str) -> Result<Option<CounterRecord>> {
        match self.db {
            Database::Postgres(pool) => {
                let record =
                    sqlx::query_as::<_, CounterRecord>("SELECT * FROM rate_limit_counters WHERE user_id = $1 AND feature = $2")
                        .bind(user_id)
                        .bind(feature)
                        .fetch_optional(pool)
                        .await?;
                Ok(record)
            }
            Database::Memory(store) => Ok(store
                .counters
                .get(&(user_id.to_string(), feature.to_string()))
                .map(|r| r.clone())),
        }
    }
}

/// Repository for recorded rate-limit rejections.
pub struct RateLimitEvents<'c> {
    db: &'c Database,
}

impl<'c> RateLimitEvents<'c> {
    pub fn new(db: &'c Database) -> Self {
        Self { db }
    }

    /// Record a rejection unless one already exists for this username, feature and UTC day.
    ///
    /// Returns whether a new event was written.
    #[instrument(skip(self), err)]
    pub async fn record_once(&mut self, user_id: &str, username: &str, feature: &str, now: DateTime<Utc>) -> Result<bool> {
        let day = now.date_naive();
        match self.db {
            Database::Postgres(pool) => {
                let result = sqlx::query(
                    r#"
                    INSERT INTO rate_limit_events (user_id, username, feature, day, created_at)
                    VALUES ($1, $2, $3, $4, $5)
                    ON CONFLICT ON CONSTRAINT rate_limit_events_once_per_day DO NOTHING
                    "#,
                )
                .bind(user_id)
                .bind(username)
                .bind(feature)
                .bind(day)
                .bind(now)
                .execute(pool)
                .await?;
                Ok(result.rows_affected() > 0)
            }
            Database::Memory(store) => {
                let key = (username.to_string(), feature.to_string(), day);
                match store.rate_limit_events.entry(key) {
                    dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
                    dashmap::mapref::entry::Entry::Vacant(slot) => {
                        slot.insert(RateLimitedEvent {
                            id: Uuid::new_v4(),
                            user_id: user_id.to_string(),
                            username: username.to_string(),
                            feature: feature.to_string(),
                            day,
                            created_at: now,
                        });
                        Ok(true)
                    }
                }
            }
        }
    }

    /// Events for a username recorded after `since`, newest first.
    #[instrument(skip(self), err)]
    pub async fn list_since(&mut self, username: &str, since: DateTime<Utc>) -> Result<Vec<RateLimitedEvent>> {
        match self.db {
            Database::Postgres(pool) => {
                let events = sqlx::query_as::<_, RateLimitedEvent>(
                    r#"
                    SELECT * FROM rate_limit_events
                    WHERE username = $1 AND created_at > $2
                    ORDER BY created_at DESC
                    "#,
                )
                .bind(username)
                .bind(since)
                .fetch_all(pool)
                .await?;
                Ok(events)
            }
            Database::Memory(store) => {
                let mut events: Vec<RateLimitedEvent> = store
                    .rate_limit_events
                    .iter()
                    .filter(|e| e.username == username && e.created_at > since)
                    .map(|e| e.clone())
                    .collect();
                events.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                Ok(events)
            }
        }
    }

    /// Drop events recorded before `cutoff`. Returns the number removed.
    #[instrument(skip(self), err)]
    pub async fn purge_before(&mut self, cutoff: DateTime<Utc>) -> Result<u64> {
        match self.db {
            Database::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM rate_limit_events WHERE created_at < $1")
                    .bind(cutoff)
                    .execute(pool)
                    .await?;
                Ok(result.rows_affected())
            }
            Database::Memory(store) => {
                let before = store.rate_limit_events.len();
                store.rate_limit_events.retain(|_, e| e.created_at >= cutoff);
                Ok(before.saturating_sub(store.rate_limit_events.len()) as u64)
            }
        }
    }
}
