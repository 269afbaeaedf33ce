use axum::{
    Json,
    extract::{Request, State},
    http::HeaderMap,
};

use super::{is_multipart, read_json, read_upload_form};
use crate::api::models::knowledge::{AnswerResponse, KnowledgeQueryRequest};
use crate::errors::{Result, rate_limit_headers};
use crate::forwarder::{Caller, KnowledgeQueryInput};
use crate::types::Feature;
use crate::AppState;

#[utoipa::path(
    post,
    path = "/knowledge-query",
    tag = "knowledge",
    summary = "Ask a question about a document or web page",
    description = "Send `multipart/form-data` with a `file` to ask about a document, or JSON with a `url` to ask about a web page. \
                   Exactly one source is required. The request is validated before it counts against the daily allowance.",
    request_body(content = KnowledgeQueryRequest, content_type = "application/json"),
    responses(
        (status = 200, description = "Answer from the provider", body = AnswerResponse),
        (status = 400, description = "Missing question, missing or invalid source, unsupported document type"),
        (status = 429, description = "Daily knowledge query allowance used up"),
        (status = 502, description = "Provider failed; the request may be retried")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn knowledge_query(State(state): State<AppState>, request: Request) -> Result<(HeaderMap, Json<AnswerResponse>)> {
    let (user_id, username, input) = if is_multipart(&request) {
        let form = read_upload_form(request, &state).await?;
        let input = KnowledgeQueryInput {
            question: form.text("question"),
            document: form.file.clone(),
            url: form.text("url"),
            chunk_size: form.number("chunkSize")?,
            chunk_overlap: form.number("chunkOverlap")?,
            top_k: form.number("topK")?,
        };
        (form.text("userId"), form.text("username"), input)
    } else {
        let body: KnowledgeQueryRequest = read_json(request, &state).await?;
        let input = KnowledgeQueryInput {
            question: body.question,
            url: body.url,
            ..Default::default()
        };
        (body.user_id, body.username, input)
    };

    let caller = Caller::new(user_id, username)?;
    let query = state.forwarder.validate_knowledge_query(input)?;

    let decision = state
        .rate_limiter
        .enforce(&caller.user_id, &caller.username, Feature::KnowledgeQuery)
        .await?;
    let answer = state.forwarder.forward_knowledge_query(&caller, query).await?;

    Ok((
        rate_limit_headers(decision.limit, decision.remaining, decision.reset_at),
        Json(AnswerResponse { answer }),
    ))
}
