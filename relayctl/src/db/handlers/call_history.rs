//! Best-effort record of provider calls made on behalf of users.

use chrono::Utc;
use sqlx::types::Json;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    Database,
    errors::Result,
    models::call_history::{CallHistoryCreateDBRequest, CallHistoryRecord},
};

pub struct CallHistory<'c> {
    db: &'c Database,
}

impl<'c> CallHistory<'c> {
    pub fn new(db: &'c Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, request), fields(feature = %request.feature), err)]
    pub async fn create(&mut self, request: &CallHistoryCreateDBRequest) -> Result<CallHistoryRecord> {
        match self.db {
            Database::Postgres(pool) => {
                let record = sqlx::query_as::<_, CallHistoryRecord>(
                    r#"
                    INSERT INTO call_history (user_id, username, feature, provider_reference, destination, detail)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    RETURNING *
                    "#,
                )
                .bind(&request.user_id)
                .bind(&request.username)
                .bind(&request.feature)
                .bind(&request.provider_reference)
                .bind(&request.destination)
                .bind(Json(&request.detail))
                .fetch_one(pool)
                .await?;
                Ok(record)
            }
            Database::Memory(store) => {
                let record = CallHistoryRecord {
                    id: Uuid::new_v4(),
                    user_id: request.user_id.clone(),
                    username: request.username.clone(),
                    feature: request.feature.clone(),
                    provider_reference: request.provider_reference.clone(),
                    destination: request.destination.clone(),
                    detail: Json(request.detail.clone()),
                    created_at: Utc::now(),
                };
                store.call_history.insert(record.id, record.clone());
                Ok(record)
            }
        }
    }

    /// Records for a user, newest first.
    #[instrument(skip(self), err)]
    pub async fn list_by_user(&mut self, user_id: &str, limit: i64) -> Result<Vec<CallHistoryRecord>> {
        let limit = if limit > 0 { limit } else { 100 };
        match self.db {
            Database::Postgres(pool) => {
                let records = sqlx::query_as::<_, CallHistoryRecord>(
                    r#"
                    SELECT * FROM call_history
                    WHERE user_id = $1
                    ORDER BY created_at DESC
                    LIMIT $2
                    "#,
                )
                .bind(user_id)
                .bind(limit)
                .fetch_all(pool)
                .await?;
                Ok(records)
            }
            Database::Memory(store) => {
                let mut records: Vec<CallHistoryRecord> = store
                    .call_history
                    .iter()
                    .filter(|r| r.user_id == user_id)
                    .map(|r| r.clone())
                    .collect();
                records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                records.truncate(limit as usize);
                Ok(records)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_history_scoped_to_user() {
        let db = Database::in_memory();
        for (user, destination) in [("u1", "+15550001"), ("u2", "+15550002"), ("u1", "+15550003")] {
            CallHistory::new(&db)
                .create(&CallHistoryCreateDBRequest {
                    user_id: user.to_string(),
                    username: format!("{user}-name"),
                    feature: "voice_call".to_string(),
                    provider_reference: Some("call_1".to_string()),
                    destination: Some(destination.to_string()),
                    detail: serde_json::json!({ "status": "queued" }),
                })
                .await
                .unwrap();
        }

        let records = CallHistory::new(&db).list_by_user("u1", 0).await.unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.user_id == "u1"));
    }
}
