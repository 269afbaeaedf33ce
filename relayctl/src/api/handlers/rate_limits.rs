use axum::{
    Json,
    extract::{Query, State},
};

use super::required_username;
use crate::api::models::rate_limits::{RateLimitEventsQuery, RateLimitedEventResponse};
use crate::errors::Result;
use crate::AppState;

#[utoipa::path(
    get,
    path = "/rate-limits/events",
    tag = "rate-limits",
    summary = "List recent rate-limit rejections",
    description = "Rejections recorded for the user in the last day. At most one is recorded per feature and UTC day.",
    params(RateLimitEventsQuery),
    responses(
        (status = 200, description = "Rejections, newest first", body = Vec<RateLimitedEventResponse>),
        (status = 400, description = "Missing username")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_rate_limit_events(
    State(state): State<AppState>,
    Query(query): Query<RateLimitEventsQuery>,
) -> Result<Json<Vec<RateLimitedEventResponse>>> {
    let username = required_username(query.username)?;
    let events = state.rate_limiter.rate_limited_events(&username).await?;
    Ok(Json(events.into_iter().map(Into::into).collect()))
}
