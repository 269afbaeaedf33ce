//! Repository for persisted chat conversations.

use chrono::Utc;
use sqlx::types::Json;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    Database,
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::conversations::{Conversation, ConversationCreateDBRequest, ConversationFilter, ConversationUpdateDBRequest},
};
use crate::types::{ConversationId, abbrev_uuid};

pub struct Conversations<'c> {
    db: &'c Database,
}

impl<'c> Conversations<'c> {
    pub fn new(db: &'c Database) -> Self {
        Self { db }
    }

    /// Insert the conversation, or replace the stored snapshot.
    ///
    /// Messages are append-only, so a snapshot holding fewer messages than the stored one is
    /// stale and leaves the row untouched. Re-saving an identical snapshot does not bump
    /// `updated_at`. A conversation stored under a different `user_id` is reported as
    /// [`DbError::NotFound`] and left untouched.
    #[instrument(skip(self, request), fields(conversation_id = %abbrev_uuid(&id)), err)]
    pub async fn upsert(&mut self, id: ConversationId, request: &ConversationCreateDBRequest) -> Result<Conversation> {
        match self.db {
            Database::Postgres(pool) => {
                let saved = sqlx::query_as::<_, Conversation>(
                    r#"
                    INSERT INTO conversations (id, user_id, username, title, messages, params)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    ON CONFLICT (id) DO UPDATE SET
                        messages = EXCLUDED.messages,
                        params = EXCLUDED.params,
                        updated_at = CASE
                            WHEN (conversations.messages, conversations.params) IS DISTINCT FROM (EXCLUDED.messages, EXCLUDED.params)
                            THEN NOW()
                            ELSE conversations.updated_at
                        END
                    WHERE conversations.user_id = EXCLUDED.user_id
                      AND jsonb_array_length(conversations.messages) <= jsonb_array_length(EXCLUDED.messages)
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(&request.user_id)
                .bind(&request.username)
                .bind(&request.title)
                .bind(Json(&request.messages))
                .bind(Json(&request.params))
                .fetch_optional(pool)
                .await?;

                match saved {
                    Some(conversation) => Ok(conversation),
                    // Stale snapshot: report what is stored
                    None => self
                        .get_by_id(id)
                        .await?
                        .filter(|stored| stored.user_id == request.user_id)
                        .ok_or(DbError::NotFound),
                }
            }
            Database::Memory(store) => {
                let now = Utc::now();
                let mut entry = store.conversations.entry(id).or_insert_with(|| Conversation {
                    id,
                    user_id: request.user_id.clone(),
                    username: request.username.clone(),
                    title: request.title.clone(),
                    messages: Json(request.messages.clone()),
                    params: Json(request.params.clone()),
                    created_at: now,
                    updated_at: now,
                });
                if entry.user_id != request.user_id {
                    return Err(DbError::NotFound);
                }

                let stale = entry.messages.0.len() > request.messages.len();
                let changed = entry.messages.0 != request.messages || entry.params.0 != request.params;
                if !stale && changed {
                    entry.messages = Json(request.messages.clone());
                    entry.params = Json(request.params.clone());
                    entry.updated_at = now;
                }
                Ok(entry.clone())
            }
        }
    }
}

#[async_trait::async_trait]
impl Repository for Conversations<'_> {
    type CreateRequest = ConversationCreateDBRequest;
    type UpdateRequest = ConversationUpdateDBRequest;
    type Response = Conversation;
    type Id = ConversationId;
    type Filter = ConversationFilter;

    #[instrument(skip(self, request), fields(username = %request.username), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        let id = request.id.unwrap_or_else(Uuid::new_v4);
        match self.db {
            Database::Postgres(pool) => {
                let conversation = sqlx::query_as::<_, Conversation>(
                    r#"
                    INSERT INTO conversations (id, user_id, username, title, messages, params)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(&request.user_id)
                .bind(&request.username)
                .bind(&request.title)
                .bind(Json(&request.messages))
                .bind(Json(&request.params))
                .fetch_one(pool)
                .await?;
                Ok(conversation)
            }
            Database::Memory(store) => {
                let now = Utc::now();
                let conversation = Conversation {
                    id,
                    user_id: request.user_id.clone(),
                    username: request.username.clone(),
                    title: request.title.clone(),
                    messages: Json(request.messages.clone()),
                    params: Json(request.params.clone()),
                    created_at: now,
                    updated_at: now,
                };
                match store.conversations.entry(id) {
                    dashmap::mapref::entry::Entry::Occupied(_) => Err(DbError::UniqueViolation {
                        constraint: Some("conversations_pkey".to_string()),
                        table: Some("conversations".to_string()),
                        message: format!("conversation {id} already exists"),
                    }),
                    dashmap::mapref::entry::Entry::Vacant(slot) => {
                        slot.insert(conversation.clone());
                        Ok(conversation)
                    }
                }
            }
        }
    }

    #[instrument(skip(self), fields(conversation_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        match self.db {
            Database::Postgres(pool) => {
                let conversation = sqlx::query_as::<_, Conversation>("SELECT * FROM conversations WHERE id = $1")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?;
                Ok(conversation)
            }
            Database::Memory(store) => Ok(store.conversations.get(&id).map(|c| c.clone())),
        }
    }

    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let limit = if filter.limit > 0 { filter.limit } else { i64::MAX };
        match self.db {
            Database::Postgres(pool) => {
                let conversations = sqlx::query_as::<_, Conversation>(
                    r#"
                    SELECT * FROM conversations
                    WHERE ($1::text IS NULL OR username = $1)
                    ORDER BY updated_at DESC
                    OFFSET $2 LIMIT $3
                    "#,
                )
                .bind(&filter.username)
                .bind(filter.skip)
                .bind(limit)
                .fetch_all(pool)
                .await?;
                Ok(conversations)
            }
            Database::Memory(store) => {
                let mut conversations: Vec<Conversation> = store
                    .conversations
                    .iter()
                    .filter(|c| filter.username.as_deref().is_none_or(|u| c.username == u))
                    .map(|c| c.clone())
                    .collect();
                conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
                Ok(conversations
                    .into_iter()
                    .skip(filter.skip.max(0) as usize)
                    .take(limit as usize)
                    .collect())
            }
        }
    }

    #[instrument(skip(self), fields(conversation_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        match self.db {
            Database::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM conversations WHERE id = $1")
                    .bind(id)
                    .execute(pool)
                    .await?;
                Ok(result.rows_affected() > 0)
            }
            Database::Memory(store) => Ok(store.conversations.remove(&id).is_some()),
        }
    }

    #[instrument(skip(self, request), fields(conversation_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        match self.db {
            Database::Postgres(pool) => {
                let conversation = sqlx::query_as::<_, Conversation>(
                    r#"
                    UPDATE conversations
                    SET
                        title = COALESCE($2, title),
                        messages = COALESCE($3, messages),
                        params = COALESCE($4, params),
                        updated_at = CASE
                            WHEN (COALESCE($2, title), COALESCE($3, messages), COALESCE($4, params))
                                IS DISTINCT FROM (title, messages, params)
                            THEN NOW()
                            ELSE updated_at
                        END
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(&request.title)
                .bind(request.messages.as_ref().map(Json))
                .bind(request.params.as_ref().map(Json))
                .fetch_optional(pool)
                .await?;
                conversation.ok_or(DbError::NotFound)
            }
            Database::Memory(store) => {
                let mut conversation = store.conversations.get_mut(&id).ok_or(DbError::NotFound)?;
                let mut changed = false;
                if let Some(title) = &request.title
                    && *title != conversation.title
                {
                    conversation.title = title.clone();
                    changed = true;
                }
                if let Some(messages) = &request.messages
                    && *messages != conversation.messages.0
                {
                    conversation.messages = Json(messages.clone());
                    changed = true;
                }
                if let Some(params) = &request.params
                    && *params != conversation.params.0
                {
                    conversation.params = Json(params.clone());
                    changed = true;
                }
                if changed {
                    conversation.updated_at = Utc::now();
                }
                Ok(conversation.clone())
            }
        }
    }
}
