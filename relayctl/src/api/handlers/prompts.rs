use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};

use super::required_username;
use crate::api::models::prompts::{ListPromptsQuery, PromptCreate, PromptResponse, PromptUpdate};
use crate::db::errors::DbError;
use crate::db::handlers::{Prompts, Repository};
use crate::db::models::prompts::{PromptCreateDBRequest, PromptFilter, PromptUpdateDBRequest};
use crate::errors::{Error, Result};
use crate::types::PromptId;
use crate::AppState;

fn not_found(id: PromptId) -> Error {
    Error::NotFound {
        resource: "Prompt".to_string(),
        id: id.to_string(),
    }
}

fn max_tokens(value: u32) -> Result<i32> {
    i32::try_from(value).map_err(|_| Error::BadRequest {
        message: "maxTokens is too large".to_string(),
    })
}

#[utoipa::path(
    post,
    path = "/prompts",
    tag = "prompts",
    summary = "Save a prompt preset",
    request_body = PromptCreate,
    responses(
        (status = 201, description = "Preset saved", body = PromptResponse),
        (status = 400, description = "Missing username, title or prompt")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_prompt(State(state): State<AppState>, Json(create): Json<PromptCreate>) -> Result<(StatusCode, Json<PromptResponse>)> {
    let username = required_username(create.username)?;
    if create.title.trim().is_empty() || create.prompt.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "title and prompt are required".to_string(),
        });
    }

    let defaults = state.forwarder.chat_defaults();
    let preset = Prompts::new(&state.db)
        .create(&PromptCreateDBRequest {
            username,
            title: create.title,
            prompt: create.prompt,
            model: create.model,
            temperature: create.temperature.unwrap_or(defaults.temperature),
            top_p: create.top_p.unwrap_or(defaults.top_p),
            presence_penalty: create.presence_penalty.unwrap_or(defaults.presence_penalty),
            frequency_penalty: create.frequency_penalty.unwrap_or(defaults.frequency_penalty),
            max_tokens: max_tokens(create.max_tokens.unwrap_or(defaults.max_tokens))?,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(preset.into())))
}

#[utoipa::path(
    get,
    path = "/prompts",
    tag = "prompts",
    summary = "List a user's prompt presets",
    params(ListPromptsQuery),
    responses(
        (status = 200, description = "Presets, oldest first", body = Vec<PromptResponse>),
        (status = 400, description = "Missing username")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_prompts(State(state): State<AppState>, Query(query): Query<ListPromptsQuery>) -> Result<Json<Vec<PromptResponse>>> {
    let username = required_username(query.username)?;
    let presets = Prompts::new(&state.db)
        .list(&PromptFilter {
            username: Some(username),
        })
        .await?;
    Ok(Json(presets.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    put,
    path = "/prompts/{id}",
    tag = "prompts",
    summary = "Update a prompt preset",
    params(("id" = String, Path, description = "Prompt ID")),
    request_body = PromptUpdate,
    responses(
        (status = 200, description = "Updated preset", body = PromptResponse),
        (status = 404, description = "Preset not found")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_prompt(
    State(state): State<AppState>,
    Path(id): Path<PromptId>,
    Json(update): Json<PromptUpdate>,
) -> Result<Json<PromptResponse>> {
    let preset = Prompts::new(&state.db)
        .update(
            id,
            &PromptUpdateDBRequest {
                title: update.title,
                prompt: update.prompt,
                model: update.model,
                temperature: update.temperature,
                top_p: update.top_p,
                presence_penalty: update.presence_penalty,
                frequency_penalty: update.frequency_penalty,
                max_tokens: update.max_tokens.map(max_tokens).transpose()?,
            },
        )
        .await
        .map_err(|e| match e {
            DbError::NotFound => not_found(id),
            other => other.into(),
        })?;
    Ok(Json(preset.into()))
}

#[utoipa::path(
    delete,
    path = "/prompts/{id}",
    tag = "prompts",
    summary = "Delete a prompt preset",
    params(("id" = String, Path, description = "Prompt ID")),
    responses(
        (status = 204, description = "Preset deleted"),
        (status = 404, description = "Preset not found")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn delete_prompt(State(state): State<AppState>, Path(id): Path<PromptId>) -> Result<StatusCode> {
    if Prompts::new(&state.db).delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(id))
    }
}
