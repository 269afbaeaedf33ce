//! Database models for saved flow graphs.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use sqlx::types::Json;

use crate::session::graph::{FlowEdge, FlowNode};
use crate::types::{FlowId, UserId};

/// A stored flow graph snapshot. Nodes and edges are encoded independently.
#[derive(Debug, Clone, FromRow)]
pub struct Flow {
    pub id: FlowId,
    pub name: String,
    pub user_id: Option<UserId>,
    pub nodes: Json<Vec<FlowNode>>,
    pub edges: Json<Vec<FlowEdge>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct FlowCreateDBRequest {
    pub name: String,
    pub user_id: Option<UserId>,
    pub nodes: Vec<FlowNode>,
    pub edges: Vec<FlowEdge>,
}

/// Replaces whichever parts are present.
#[derive(Debug, Clone, Default)]
pub struct FlowUpdateDBRequest {
    pub name: Option<String>,
    pub nodes: Option<Vec<FlowNode>>,
    pub edges: Option<Vec<FlowEdge>>,
}

#[derive(Debug, Clone, Default)]
pub struct FlowFilter {
    pub user_id: Option<UserId>,
    pub skip: i64,
    pub limit: i64,
}
