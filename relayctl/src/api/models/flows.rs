//! API request/response models for flow graphs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::db::models::flows::Flow;
use crate::session::graph::{FlowEdge, FlowNode};
use crate::types::FlowId;

#[derive(Debug, Deserialize, IntoParams)]
#[serde(rename_all = "camelCase")]
pub struct ListFlowsQuery {
    /// Only flows owned by this user
    pub user_id: Option<String>,
    /// Number of items to skip
    pub skip: Option<i64>,
    /// Maximum number of items to return
    pub limit: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlowCreate {
    #[schema(example = "French poet")]
    pub name: String,
    pub user_id: Option<String>,
    #[serde(default)]
    pub nodes: Vec<FlowNode>,
    #[serde(default)]
    pub edges: Vec<FlowEdge>,
}

/// Replaces the parts that are present
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlowUpdate {
    pub name: Option<String>,
    pub nodes: Option<Vec<FlowNode>>,
    pub edges: Option<Vec<FlowEdge>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlowResponse {
    #[schema(value_type = String, format = "uuid")]
    pub id: FlowId,
    pub name: String,
    pub user_id: Option<String>,
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Flow> for FlowResponse {
    fn from(flow: Flow) -> Self {
        Self {
            id: flow.id,
            name: flow.name,
            user_id: flow.user_id,
            nodes: flow.nodes.0,
            edges: flow.edges.0,
            created_at: flow.created_at,
            updated_at: flow.updated_at,
        }
    }
}

/// JSON body of `POST /flows/{id}/run`. Flows with a document node take `multipart/form-data`
/// with the same fields plus `file`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct FlowRunRequest {
    pub question: Option<String>,
    pub user_id: Option<String>,
    pub username: Option<String>,
}
