use axum::{
    Json,
    extract::{Path, Query, Request, State},
    http::{HeaderMap, StatusCode},
};

use super::{is_multipart, read_json, read_upload_form};
use crate::api::models::{
    flows::{FlowCreate, FlowResponse, FlowRunRequest, FlowUpdate, ListFlowsQuery},
    knowledge::AnswerResponse,
    page_bounds,
};
use crate::db::handlers::{Flows, Repository};
use crate::db::models::flows::{FlowCreateDBRequest, FlowFilter, FlowUpdateDBRequest};
use crate::errors::{Error, Result, rate_limit_headers};
use crate::forwarder::Caller;
use crate::session::flow_runner::FlowRunner;
use crate::session::graph::FlowGraph;
use crate::types::{Feature, FlowId};
use crate::AppState;

fn validate_graph(nodes: &[crate::session::graph::FlowNode], edges: &[crate::session::graph::FlowEdge]) -> Result<()> {
    FlowGraph::new(nodes, edges)
        .validate()
        .map_err(|e| Error::BadRequest { message: e.to_string() })
}

fn not_found(id: FlowId) -> Error {
    Error::NotFound {
        resource: "Flow".to_string(),
        id: id.to_string(),
    }
}

#[utoipa::path(
    post,
    path = "/flows",
    tag = "flows",
    summary = "Save a flow",
    request_body = FlowCreate,
    responses(
        (status = 201, description = "Flow saved", body = FlowResponse),
        (status = 400, description = "Invalid graph")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn create_flow(State(state): State<AppState>, Json(create): Json<FlowCreate>) -> Result<(StatusCode, Json<FlowResponse>)> {
    if create.name.trim().is_empty() {
        return Err(Error::BadRequest {
            message: "name is required".to_string(),
        });
    }
    validate_graph(&create.nodes, &create.edges)?;

    let flow = Flows::new(&state.db)
        .create(&FlowCreateDBRequest {
            name: create.name,
            user_id: create.user_id,
            nodes: create.nodes,
            edges: create.edges,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(flow.into())))
}

#[utoipa::path(
    get,
    path = "/flows",
    tag = "flows",
    summary = "List flows",
    params(ListFlowsQuery),
    responses(
        (status = 200, description = "Flows, newest first", body = Vec<FlowResponse>)
    )
)]
#[tracing::instrument(skip_all)]
pub async fn list_flows(State(state): State<AppState>, Query(query): Query<ListFlowsQuery>) -> Result<Json<Vec<FlowResponse>>> {
    let (skip, limit) = page_bounds(query.skip, query.limit);
    let flows = Flows::new(&state.db)
        .list(&FlowFilter {
            user_id: query.user_id,
            skip,
            limit,
        })
        .await?;
    Ok(Json(flows.into_iter().map(Into::into).collect()))
}

#[utoipa::path(
    get,
    path = "/flows/{id}",
    tag = "flows",
    summary = "Get a flow",
    params(("id" = String, Path, description = "Flow ID")),
    responses(
        (status = 200, description = "The flow", body = FlowResponse),
        (status = 404, description = "Flow not found")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn get_flow(State(state): State<AppState>, Path(id): Path<FlowId>) -> Result<Json<FlowResponse>> {
    let flow = Flows::new(&state.db).get_by_id(id).await?.ok_or_else(|| not_found(id))?;
    Ok(Json(flow.into()))
}

#[utoipa::path(
    put,
    path = "/flows/{id}",
    tag = "flows",
    summary = "Update a flow",
    params(("id" = String, Path, description = "Flow ID")),
    request_body = FlowUpdate,
    responses(
        (status = 200, description = "Updated flow", body = FlowResponse),
        (status = 400, description = "Invalid graph"),
        (status = 404, description = "Flow not found")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn update_flow(
    State(state): State<AppState>,
    Path(id): Path<FlowId>,
    Json(update): Json<FlowUpdate>,
) -> Result<Json<FlowResponse>> {
    let mut repo = Flows::new(&state.db);

    // The stored graph fills in whichever half is not being replaced
    if update.nodes.is_some() || update.edges.is_some() {
        let current = repo.get_by_id(id).await?.ok_or_else(|| not_found(id))?;
        let nodes = update.nodes.as_deref().unwrap_or(&current.nodes.0);
        let edges = update.edges.as_deref().unwrap_or(&current.edges.0);
        validate_graph(nodes, edges)?;
    }

    let flow = repo
        .update(
            id,
            &FlowUpdateDBRequest {
                name: update.name,
                nodes: update.nodes,
                edges: update.edges,
            },
        )
        .await
        .map_err(|e| match e {
            crate::db::errors::DbError::NotFound => not_found(id),
            other => other.into(),
        })?;
    Ok(Json(flow.into()))
}

#[utoipa::path(
    delete,
    path = "/flows/{id}",
    tag = "flows",
    summary = "Delete a flow",
    params(("id" = String, Path, description = "Flow ID")),
    responses(
        (status = 204, description = "Flow deleted"),
        (status = 404, description = "Flow not found")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn delete_flow(State(state): State<AppState>, Path(id): Path<FlowId>) -> Result<StatusCode> {
    if Flows::new(&state.db).delete(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(not_found(id))
    }
}

#[utoipa::path(
    post,
    path = "/flows/{id}/run",
    tag = "flows",
    summary = "Chat with a flow",
    description = "Answers a question with the flow's nodes. Chat nodes run in order, each answering the previous one's output. \
                   Flows with a document node need a `multipart/form-data` body carrying the `file`.",
    params(("id" = String, Path, description = "Flow ID")),
    request_body(content = FlowRunRequest, content_type = "application/json"),
    responses(
        (status = 200, description = "Final answer", body = AnswerResponse),
        (status = 400, description = "Missing question or upload"),
        (status = 404, description = "Flow not found"),
        (status = 429, description = "Daily flow chat allowance used up"),
        (status = 502, description = "Provider failed")
    )
)]
#[tracing::instrument(skip_all)]
pub async fn run_flow(
    State(state): State<AppState>,
    Path(id): Path<FlowId>,
    request: Request,
) -> Result<(HeaderMap, Json<AnswerResponse>)> {
    let (run, document) = if is_multipart(&request) {
        let form = read_upload_form(request, &state).await?;
        let run = FlowRunRequest {
            question: form.text("question"),
            user_id: form.text("userId"),
            username: form.text("username"),
        };
        (run, form.file)
    } else {
        (read_json::<FlowRunRequest>(request, &state).await?, None)
    };

    let caller = Caller::new(run.user_id, run.username)?;
    let flow = Flows::new(&state.db).get_by_id(id).await?.ok_or_else(|| not_found(id))?;

    let runner = FlowRunner::new(&state.forwarder);
    let plan = runner.plan(
        FlowGraph::new(&flow.nodes.0, &flow.edges.0),
        run.question.as_deref().unwrap_or_default(),
        document,
    )?;

    let headers = if plan.needs_provider() {
        let decision = state
            .rate_limiter
            .enforce(&caller.user_id, &caller.username, Feature::FlowChat)
            .await?;
        rate_limit_headers(decision.limit, decision.remaining, decision.reset_at)
    } else {
        HeaderMap::new()
    };

    let answer = runner.execute(&caller, plan).await?;
    Ok((headers, Json(AnswerResponse { answer })))
}

#[cfg(test)]
mod tests {
    use crate::test_utils::{create_test_app, create_test_config};
    use axum::http::StatusCode;
    use serde_json::{Value, json};

    fn two_node_flow() -> Value {
        json!({
            "name": "French poet",
            "userId": "user_1",
            "nodes": [
                {"id": "1", "type": "custom", "position": {"x": 0.0, "y": 0.0},
                 "data": {"nodeType": "LLM Chat", "prompt": "Translate to French"}},
                {"id": "2", "type": "custom", "position": {"x": 250.0, "y": 0.0},
                 "data": {"nodeType": "LLM Chat", "prompt": "Make it rhyme"}}
            ],
            "edges": [{"id": "e1-2", "source": "1", "target": "2"}]
        })
    }

    #[tokio::test]
    #[test_log::test]
    async fn test_flow_round_trip() {
        let server = create_test_app(create_test_config()).await;
        let flow = two_node_flow();

        let created = server.post("/flows").json(&flow).await;
        created.assert_status(StatusCode::CREATED);
        let created: Value = created.json();
        let id = created["id"].as_str().unwrap().to_string();

        let fetched: Value = server.get(&format!("/flows/{id}")).await.json();
        assert_eq!(fetched["name"], flow["name"]);
        assert_eq!(fetched["nodes"], flow["nodes"]);
        assert_eq!(fetched["edges"], flow["edges"]);

        let renamed: Value = server
            .put(&format!("/flows/{id}"))
            .json(&json!({"name": "Rhyming translator"}))
            .await
            .json();
        assert_eq!(renamed["name"], "Rhyming translator");
        assert_eq!(renamed["nodes"], flow["nodes"]);

        let listed: Value = server.get("/flows").add_query_param("userId", "user_1").await.json();
        assert_eq!(listed.as_array().unwrap().len(), 1);

        server.delete(&format!("/flows/{id}")).await.assert_status(StatusCode::NO_CONTENT);
        server.get(&format!("/flows/{id}")).await.assert_status(StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_invalid_graph_is_rejected() {
        let server = create_test_app(create_test_config()).await;
        let mut flow = two_node_flow();
        flow["edges"] = json!([{"source": "1", "target": "3"}]);

        server.post("/flows").json(&flow).await.assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    #[test_log::test]
    async fn test_two_node_flow_chains_answers() {
        let server = create_test_app(create_test_config()).await;
        let created: Value = server.post("/flows").json(&two_node_flow()).await.json();
        let id = created["id"].as_str().unwrap();

        let response = server
            .post(&format!("/flows/{id}/run"))
            .json(&json!({"question": "good morning", "userId": "user_1", "username": "ada"}))
            .await;

        response.assert_status_ok();
        response.assert_json(&json!({"answer": "Make it rhyme: Translate to French: good morning"}));
    }

    #[tokio::test]
    async fn test_unsupported_flow_replies_without_using_allowance() {
        let mut config = create_test_config();
        config.rate_limits.default_per_day = 0;
        let server = create_test_app(config).await;

        let created: Value = server
            .post("/flows")
            .json(&json!({
                "name": "Empty",
                "nodes": [{"id": "start", "data": {"nodeType": "Start"}}],
                "edges": []
            }))
            .await
            .json();
        let id = created["id"].as_str().unwrap();

        let response = server
            .post(&format!("/flows/{id}/run"))
            .json(&json!({"question": "hello", "userId": "user_1", "username": "ada"}))
            .await;
        response.assert_status_ok();
        response.assert_json(&json!({"answer": "This node type doesn't support chat functionality."}));
    }

    #[tokio::test]
    async fn test_run_unknown_flow() {
        let server = create_test_app(create_test_config()).await;
        server
            .post(&format!("/flows/{}/run", uuid::Uuid::new_v4()))
            .json(&json!({"question": "hello", "userId": "user_1", "username": "ada"}))
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }
}
