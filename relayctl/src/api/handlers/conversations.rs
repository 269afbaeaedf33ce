use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use uuid::Uuid;

use super::required_username;
use crate::api::models::{
    conversations::{ConversationCreate, ConversationResponse, ConversationUpdate, ListConversationsQuery},
    page_bounds,
};
use crate::db::errors::DbError;
use crate::db::handlers::{Conversations, Repository};
use crate::db::models::conversations::{ConversationCreateDBRequest, ConversationFilter, ConversationUpdateDBRequest};
use crate::errors::{Error, Result};
use crate::forwarder::Caller;
use crate::providers::GenerationParams;
use crate::session::controller::ConversationSession;
use crate::types::ConversationId;
use crate::AppState;

fn not_found(id: ConversationId) -> Error {
    Error::NotFound {
        resource: "Conversation".to_string(),
        id: id.to_string(),
    }
}

#[utoipa::path(
    post,
    path = "/conversations",
    tag = "conversations",
    summary = "Save a conversation",
    description = "Without an `id` a new conversation is created. With an `id` the stored messages are replaced; \
                   saving the same conversation again changes nothing.",
    request_body = ConversationCreate,
    responses(
        (status = 200, description = "Existing conversation saved", body = ConversationResponse),
        (status = 201, description = "Conversation created", body = ConversationResponse),
        (status = 400, description = "Missing userId or username"),
        (status = 404, description = "The id belongs to another user's conversation")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn save_conversation(
    State(state): State<AppState>,
    Json(create): Json<ConversationCreate>,
) -> Result<(StatusCode, Json<ConversationResponse>)> {
    let caller = Caller::new(create.user_id, create.username)?;
    let params = create
        .params
        .unwrap_or_else(|| GenerationParams::from(state.forwarder.chat_defaults()));
    let id = create.id.unwrap_or_else(Uuid::new_v4);

    // Same title rule as conversations saved after a chat turn
    let mut snapshot = ConversationSession::new(id, caller.user_id, caller.username, params)
        .with_history(create.messages)
        .snapshot();
    if let Some(title) = create.title.filter(|t| !t.trim().is_empty()) {
        snapshot.title = title;
    }
    let request = ConversationCreateDBRequest::from(snapshot);

    let mut repo = Conversations::new(&state.db);
    if create.id.is_some() {
        let conversation = repo.upsert(id, &request).await?;
        Ok((StatusCode::OK, Json(conversation.into())))
    } else {
        let conversation = repo.create(&request).await?;
        Ok((StatusCode::CREATED, Json(conversation.into())))
    }
}

#[utoipa::path(
    get,
    path = "/conversations",
    tag = "conversations",
    summary = "List a user's conversations",
    params(ListConversationsQuery),
    responses(
        (status = 200, description = "Conversations, most recently updated first", body = Vec<ConversationResponse>),
        (status = 400, description = "Missing username")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListConversationsQuery>,
) -> Result<Json<Vec<ConversationResponse>>> {
    let username = required_username(query.username)?;
    let (skip, limit) = page_bounds(query.skip, query.limit);
    let conversations = Conversations::new(&state.db)
        .list(&ConversationFilter {
            username: Some(username),
            skip,
            limit,
        })
        .await?;
    Ok(Json(conversations.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/conversations/{id}",
    tag = "conversations",
    summary = "Get a conversation",
    params(("id" = String, Path, description = "Conversation ID")),
    responses(
        (status = 200, description = "The conversation", body = ConversationResponse),
        (status = 404, description = "Conversation not found")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_conversation(State(state): State<AppState>, Path(id): Path<ConversationId>) -> Result<Json<ConversationResponse>> {
    let conversation = Conversations::new(&state.db)
        .get_by_id(id)
        .await?
        .ok_or_else(|| not_found(id))?;
    Ok(Json(conversation.into()))
}

#[utoipa::path(
    put,
    path = "/conversations/{id}",
    tag = "conversations",
    summary = "Update a conversation",
    params(("id" = String, Path, description = "Conversation ID")),
    request_body = ConversationUpdate,
    responses(
        (status = 200, description = "Updated conversation", body = ConversationResponse),
        (status = 404, description = "Conversation not found")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_conversation(
    State(state): State<AppState>,
    Path(id): Path<ConversationId>,
    Json(update): Json<ConversationUpdate>,
) -> Result<Json<ConversationResponse>> {
    let conversation = Conversations::new(&state.db)
        .update(
            id,
            &ConversationUpdateDBRequest {
                title: update.title,
                messages: update.messages,
                params: update.params,
            },
        )
        .await
        .map_err(|e| match e {
            DbError::NotFound => not_found(id),
            other => other.into(),
        })?;
    Ok(Json(conversation.into()))
}

#[utoipa::path(
    delete,
    path = "/conversations/{id}",
    tag = "conversations",
    summary = "Delete a conversation",
    params(("id" = String, Path, description = "Conversation ID")),
    responses(
        (status = 204, description = "Conversation deleted"),
        (status = 404, description = "Conversation not found")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn delete_conversation(State(state): State<AppState>, Path(id): Path<ConversationId>) -> Result<StatusCode> {
    if Conversations::new(&state.db).delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(id))
    }
}
