//! Outbound voice calls.
//!
//! Calls are tracked in memory from the moment they are placed. The voice provider reports
//! progress through `POST /calls/{id}/events`.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
};
use tracing::info;

use crate::api::models::calls::{CallEventRequest, CallHistoryQuery, CallHistoryResponse, StartCallRequest};
use crate::db::handlers::CallHistory;
use crate::errors::{Error, Result, rate_limit_headers};
use crate::forwarder::Caller;
use crate::session::call::{CallEvent, CallHandle};
use crate::types::{CallId, Feature, abbrev_uuid};
use crate::AppState;

fn not_found(id: CallId) -> Error {
    Error::NotFound {
        resource: "Call".to_string(),
        id: id.to_string(),
    }
}

#[utoipa::path(
    post,
    path = "/calls",
    tag = "calls",
    summary = "Start a voice call",
    description = "Registers the configured caller number with the voice provider, then dials `destinationNumber`. \
                   Telephony credentials are server configuration and cannot be sent here.",
    request_body = StartCallRequest,
    responses(
        (status = 201, description = "Call placed", body = CallHandle),
        (status = 400, description = "Invalid call configuration"),
        (status = 429, description = "Daily voice call allowance used up"),
        (status = 502, description = "Voice provider or telephony unavailable")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn start_call(
    State(state): State<AppState>,
    Json(request): Json<StartCallRequest>,
) -> Result<(StatusCode, HeaderMap, Json<CallHandle>)> {
    let caller = Caller::new(request.user_id, request.username)?;
    state.forwarder.validate_voice_call(&request.call)?;

    let decision = state
        .rate_limiter
        .enforce(&caller.user_id, &caller.username, Feature::VoiceCall)
        .await?;
    let handle = state.forwarder.forward_voice_call_start(&caller, request.call).await?;

    Ok((
        StatusCode::CREATED,
        rate_limit_headers(decision.limit, decision.remaining, decision.reset_at),
        Json(handle),
    ))
}

#[utoipa::path(
    get,
    path = "/calls/{id}",
    tag = "calls",
    summary = "Get a call's state",
    params(("id" = String, Path, description = "Call ID")),
    responses(
        (status = 200, description = "The call", body = CallHandle),
        (status = 404, description = "Unknown call")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_call(State(state): State<AppState>, Path(id): Path<CallId>) -> Result<Json<CallHandle>> {
    state.forwarder.calls().get(id).map(Json).ok_or_else(|| not_found(id))
}

#[utoipa::path(
    post,
    path = "/calls/{id}/events",
    tag = "calls",
    summary = "Report call progress",
    description = "Callback for the voice provider. Repeated events for the current state are accepted and ignored.",
    params(("id" = String, Path, description = "Call ID")),
    request_body = CallEventRequest,
    responses(
        (status = 200, description = "Updated call", body = CallHandle),
        (status = 400, description = "Unknown status"),
        (status = 404, description = "Unknown call"),
        (status = 409, description = "The call cannot move to that state")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn call_event(
    State(state): State<AppState>,
    Path(id): Path<CallId>,
    Json(event): Json<CallEventRequest>,
) -> Result<Json<CallHandle>> {
    let transition = CallEvent::from_provider_status(&event.status, event.ended_reason).ok_or_else(|| Error::BadRequest {
        message: format!("Unknown call status '{}'", event.status),
    })?;

    match state.forwarder.calls().apply(id, transition) {
        None => Err(not_found(id)),
        Some(Err(e)) => Err(Error::Conflict { message: e.to_string() }),
        Some(Ok(handle)) => {
            info!(call_id = %abbrev_uuid(&id), state = handle.state.as_str(), "Call progressed");
            Ok(Json(handle))
        }
    }
}

#[utoipa::path(
    get,
    path = "/call-history",
    tag = "calls",
    summary = "List a user's forwarded requests",
    description = "Voice calls and knowledge queries recorded for the user, newest first.",
    params(CallHistoryQuery),
    responses(
        (status = 200, description = "History entries", body = Vec<CallHistoryResponse>),
        (status = 400, description = "Missing userId")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_call_history(
    State(state): State<AppState>,
    Query(query): Query<CallHistoryQuery>,
) -> Result<Json<Vec<CallHistoryResponse>>> {
    let user_id = query
        .user_id
        .map(|u| u.trim().to_string())
        .filter(|u| !u.is_empty())
        .ok_or_else(|| Error::BadRequest {
            message: "userId is required".to_string(),
        })?;
    let records = CallHistory::new(&state.db)
        .list_by_user(&user_id, query.limit.unwrap_or(100).clamp(1, 1000))
        .await?;
    Ok(Json(records.into_iter().map(Into::into).collect()))
}
