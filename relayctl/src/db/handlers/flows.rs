//! Repository for saved flow graphs.

use chrono::Utc;
use sqlx::types::Json;
use tracing::instrument;
use uuid::Uuid;

use crate::db::{
    Database,
    errors::{DbError, Result},
    handlers::repository::Repository,
    models::flows::{Flow, FlowCreateDBRequest, FlowFilter, FlowUpdateDBRequest},
};
use crate::types::{FlowId, abbrev_uuid};

pub struct Flows<'c> {
    db: &'c Database,
}

impl<'c> Flows<'c> {
    pub fn new(db: &'c Database) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl Repository for Flows<'_> {
    type CreateRequest = FlowCreateDBRequest;
    type UpdateRequest = FlowUpdateDBRequest;
    type Response = Flow;
    type Id = FlowId;
    type Filter = FlowFilter;

    #[instrument(skip(self, request), fields(name = %request.name), err)]
    async fn create(&mut self, request: &Self::CreateRequest) -> Result<Self::Response> {
        match self.db {
            Database::Postgres(pool) => {
                let flow = sqlx::query_as::<_, Flow>(
                    r#"
                    INSERT INTO flows (name, user_id, nodes, edges)
                    VALUES ($1, $2, $3, $4)
                    RETURNING *
                    "#,
                )
                .bind(&request.name)
                .bind(&request.user_id)
                .bind(Json(&request.nodes))
                .bind(Json(&request.edges))
                .fetch_one(pool)
                .await?;
                Ok(flow)
            }
            Database::Memory(store) => {
                let now = Utc::now();
                let flow = Flow {
                    id: Uuid::new_v4(),
                    name: request.name.clone(),
                    user_id: request.user_id.clone(),
                    nodes: Json(request.nodes.clone()),
                    edges: Json(request.edges.clone()),
                    created_at: now,
                    updated_at: now,
                };
                store.flows.insert(flow.id, flow.clone());
                Ok(flow)
            }
        }
    }

    #[instrument(skip(self), fields(flow_id = %abbrev_uuid(&id)), err)]
    async fn get_by_id(&mut self, id: Self::Id) -> Result<Option<Self::Response>> {
        match self.db {
            Database::Postgres(pool) => {
                let flow = sqlx::query_as::<_, Flow>("SELECT * FROM flows WHERE id = $1")
                    .bind(id)
                    .fetch_optional(pool)
                    .await?;
                Ok(flow)
            }
            Database::Memory(store) => Ok(store.flows.get(&id).map(|f| f.clone())),
        }
    }

    #[instrument(skip(self, filter), err)]
    async fn list(&mut self, filter: &Self::Filter) -> Result<Vec<Self::Response>> {
        let limit = if filter.limit > 0 { filter.limit } else { i64::MAX };
        match self.db {
            Database::Postgres(pool) => {
                let flows = sqlx::query_as::<_, Flow>(
                    r#"
                    SELECT * FROM flows
                    WHERE ($1::text IS NULL OR user_id = $1)
                    ORDER BY created_at DESC
                    OFFSET $2 LIMIT $3
                    "#,
                )
                .bind(&filter.user_id)
                .bind(filter.skip)
                .bind(limit)
                .fetch_all(pool)
                .await?;
                Ok(flows)
            }
            Database::Memory(store) => {
                let mut flows: Vec<Flow> = store
                    .flows
                    .iter()
                    .filter(|f| filter.user_id.is_none() || f.user_id == filter.user_id)
                    .map(|f| f.clone())
                    .collect();
                flows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
                Ok(flows
                    .into_iter()
                    .skip(filter.skip.max(0) as usize)
                    .take(limit.min(usize::MAX as i64) as usize)
                    .collect())
            }
        }
    }

    #[instrument(skip(self), fields(flow_id = %abbrev_uuid(&id)), err)]
    async fn delete(&mut self, id: Self::Id) -> Result<bool> {
        match self.db {
            Database::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM flows WHERE id = $1").bind(id).execute(pool).await?;
                Ok(result.rows_affected() > 0)
            }
            Database::Memory(store) => Ok(store.flows.remove(&id).is_some()),
        }
    }

    #[instrument(skip(self, request), fields(flow_id = %abbrev_uuid(&id)), err)]
    async fn update(&mut self, id: Self::Id, request: &Self::UpdateRequest) -> Result<Self::Response> {
        match self.db {
            Database::Postgres(pool) => {
                let flow = sqlx::query_as::<_, Flow>(
                    r#"
                    UPDATE flows
                    SET
                        name = COALESCE($2, name),
                        nodes = COALESCE($3, nodes),
                        edges = COALESCE($4, edges),
                        updated_at = NOW()
                    WHERE id = $1
                    RETURNING *
                    "#,
                )
                .bind(id)
                .bind(&request.name)
                .bind(request.nodes.as_ref().map(Json))
                .bind(request.edges.as_ref().map(Json))
                .fetch_optional(pool)
                .await?;
                flow.ok_or(DbError::NotFound)
            }
            Database::Memory(store) => {
                let mut flow = store.flows.get_mut(&id).ok_or(DbError::NotFound)?;
                if let Some(name) = &request.name {
                    flow.name = name.clone();
                }
                if let Some(nodes) = &request.nodes {
                    flow.nodes = Json(nodes.clone());
                }
                if let Some(edges) = &request.edges {
                    flow.edges = Json(edges.clone());
                }
                flow.updated_at = Utc::now();
                Ok(flow.clone())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::graph::{FlowEdge, FlowNode, NodePosition};

    fn node(id: &str, node_type: &str, prompt: &str) -> FlowNode {
        FlowNode {
            id: id.to_string(),
            node_type: node_type.to_string(),
            position: NodePosition { x: 10.0, y: 20.5 },
            data: serde_json::json!({ "prompt": prompt, "label": node_type }),
        }
    }

    fn edge(source: &str, target: &str) -> FlowEdge {
        FlowEdge {
            id: Some(format!("{source}-{target}")),
            source: source.to_string(),
            target: target.to_string(),
            edge_type: Some("smoothstep".to_string()),
        }
    }

    #[tokio::test]
    async fn test_flow_snapshot_round_trips() {
        let db = Database::in_memory();
        let request = FlowCreateDBRequest {
            name: "translator".to_string(),
            user_id: Some("user_1".to_string()),
            nodes: vec![node("1", "LLM Chat", "Translate to French"), node("2", "LLM Chat", "Make it rhyme")],
            edges: vec![edge("1", "2")],
        };

        let created = Flows::new(&db).create(&request).await.unwrap();
        let loaded = Flows::new(&db).get_by_id(created.id).await.unwrap().expect("flow exists");

        assert_eq!(loaded.name, "translator");
        assert_eq!(loaded.nodes.0, request.nodes);
        assert_eq!(loaded.edges.0, request.edges);
    }

    #[tokio::test]
    async fn test_update_replaces_only_present_parts() {
        let db = Database::in_memory();
        let created = Flows::new(&db)
            .create(&FlowCreateDBRequest {
                name: "draft".to_string(),
                user_id: None,
                nodes: vec![node("1", "LLM Chat", "a")],
                edges: vec![],
            })
            .await
            .unwrap();

        let updated = Flows::new(&db)
            .update(
                created.id,
                &FlowUpdateDBRequest {
                    name: Some("final".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "final");
        assert_eq!(updated.nodes.0, created.nodes.0);
    }

    #[tokio::test]
    async fn test_update_missing_flow_is_not_found() {
        let db = Database::in_memory();
        let err = Flows::new(&db)
            .update(Uuid::new_v4(), &FlowUpdateDBRequest::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound));
    }

    #[tokio::test]
    async fn test_list_filters_by_user_and_delete() {
        let db = Database::in_memory();
        for user in ["a", "a", "b"] {
            Flows::new(&db)
                .create(&FlowCreateDBRequest {
                    name: format!("flow of {user}"),
                    user_id: Some(user.to_string()),
                    nodes: vec![],
                    edges: vec![],
                })
                .await
                .unwrap();
        }

        let filter = FlowFilter {
            user_id: Some("a".to_string()),
            ..Default::default()
        };
        let flows = Flows::new(&db).list(&filter).await.unwrap();
        assert_eq!(flows.len(), 2);

        assert!(Flows::new(&db).delete(flows[0].id).await.unwrap());
        assert!(!Flows::new(&db).delete(flows[0].id).await.unwrap());
        assert_eq!(Flows::new(&db).list(&filter).await.unwrap().len(), 1);
    }
}
