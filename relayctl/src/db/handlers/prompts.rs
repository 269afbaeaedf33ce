//! Repository for saved prompt presets.

use chrono::Utc;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    Database,
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::prompts::{PromptCreateDBRequest, PromptFilter, PromptPreset, PromptUpdateDBRequest},
};
use crate::types::{PromptId, abbrev_uuid};

pub struct Prompts<'c> {
    db: &'c Database,
}

impl<'c> Prompts<'c> {
    pub fn new(db: &'c Database) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl Repository for Prompts<'_> {
    type CreateRequest = PromptCreateDBRequest;
    type UpdateRequest = PromptUpdateDBRequest;
    type Response = PromptPreset;
    type Id = PromptId;
    type Filter = PromptFilter;

    #[instrument(skip(self, request), fields(username = %request.username), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        match self.db {
            Database::Postgres(pool) => {
                let preset = sqlx::query_as::<_, PromptPreset>(
                    r#"
                    INSERT INTO prompt_presets
                        (username, title, prompt, model, temperature, top_p, presence_penalty, frequency_penalty, max_tokens)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                    RETURNING *
                    "#,
                )
                .bind(&request.username)
                .bind(&request.title)
                .bind(&request.prompt)
                .bind(&request.model)
                .bind(request.temperature)
                .bind(request.top_p)
                .bind(request.presence_penalty)
                .bind(request.frequency_penalty)
                .bind(request.max_tokens)
                .fetch_one(pool)
                .await?;
                Ok(preset)
            }
            Database::Memory(store) => {
                let now = Utc::now();
                let preset = PromptPreset {
                    id: Uuid::new_v4(),
                    username: request.username.clone(),
                    title: request.title.clone(),
                    prompt: request.prompt.clone(),
                    model: request.model.clone(),
                    temperature: request.temperature,
                    top_p: request.top_p,
                    presence_penalty: request.presence_penalty,
                    frequency_penalty: request.frequency_penalty,
                    max_tokens: request.max_tokens,
                    created_at: now,
                    updated_at: now,
                };
                store.prompts.insert(preset.id, preset.clone());
                Ok(preset)
            }
        }
    }

    #[instrument(skip(self), fields(prompt_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        match self.db {
            Database::Postgres(pool) => {
                let preset = sqlx::query_as::<_, PromptPreset>("SELECT * FROM prompt_presets WHERE id = $1")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?;
                Ok(preset)
            }
            Database::Memory(store) => Ok(store.prompts.get(&id).map(|p| p.clone())),
        }
    }

    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        match self.db {
            Database::Postgres(pool) => {
                let presets = sqlx::query_as::<_, PromptPreset>(
                    r#"
                    SELECT * FROM prompt_presets
                    WHERE ($1::text IS NULL OR username = $1)
                    ORDER BY created_at ASC
                    "#,
                )
                .bind(&filter.username)
                .fetch_all(pool)
                .await?;
                Ok(presets)
            }
            Database::Memory(store) => {
                let mut presets: Vec<PromptPreset> = store
                    .prompts
                    .iter()
                    .filter(|p| filter.username.as_deref().is_none_or(|u| p.username == u))
                    .map(|p| p.clone())
                    .collect();
                presets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
                Ok(presets)
            }
        }
    }

    #[instrument(skip(self), fields(prompt_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        match self.db {
            Database::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM prompt_presets WHERE id = $1")
                    .bind(id)
                    .execute(pool)
                    .await?;
                Ok(result.rows_affected() > 0)
            }
            Database::Memory(store) => Ok(store.prompts.remove(&id).is_some()),
        }
    }

    #[instrument(skip(self, request), fields(prompt_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        match self.db {
            Database::Postgres(pool) => {
                let preset = sqlx::query_as::<_, PromptPreset>(
                    r#"
                    UPDATE prompt_presets
                    SET
                        title = COALESCE($2, title),
                        prompt = COALESCE($3, prompt),
                        model = COALESCE($4, model),
                        temperature = COALESCE($5, temperature),
                        top_p = COALESCE($6, top_p),
                        presence_penalty = COALESCE($7, presence_penalty),
                        frequency_penalty = COALESCE($8, frequency_penalty),
                        max_tokens = COALESCE($9, max_tokens),
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(&request.title)
                .bind(&request.prompt)
                .bind(&request.model)
                .bind(request.temperature)
                .bind(request.top_p)
                .bind(request.presence_penalty)
                .bind(request.frequency_penalty)
                .bind(request.max_tokens)
                .fetch_optional(pool)
                .await?;
                preset.ok_or(DbError::NotFound)
            }
            Database::Memory(store) => {
                let mut preset = store.prompts.get_mut(&id).ok_or(DbError::NotFound)?;
                if let Some(title) = &request.title {
                    preset.title = title.clone();
                }
                if let Some(prompt) = &request.prompt {
                    preset.prompt = prompt.clone();
                }
                if let Some(model) = &request.model {
                    preset.model = Some(model.clone());
                }
                if let Some(temperature) = request.temperature {
                    preset.temperature = temperature;
                }
                if let Some(top_p) = request.top_p {
                    preset.top_p = top_p;
                }
                if let Some(presence_penalty) = request.presence_penalty {
                    preset.presence_penalty = presence_penalty;
                }
                if let Some(frequency_penalty) = request.frequency_penalty {
                    preset.frequency_penalty = frequency_penalty;
                }
                if let Some(max_tokens) = request.max_tokens {
                    preset.max_tokens = max_tokens;
                }
                preset.updated_at = Utc::now();
                Ok(preset.clone())
            }
        }
    }
}
