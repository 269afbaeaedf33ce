//! API request/response models for knowledge queries.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// JSON body of `POST /knowledge-query`, used to ask about a web page. Documents are uploaded as
/// `multipart/form-data` with the same field names plus `file`, `chunkSize`, `chunkOverlap` and
/// `topK`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct KnowledgeQueryRequest {
    pub question: Option<String>,
    #[schema(example = "https://example.com/docs")]
    pub url: Option<String>,
    pub user_id: Option<String>,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AnswerResponse {
    pub answer: String,
}
