//! OpenAPI documentation for the gateway, served at `/openapi.json`.

use utoipa::{
    Modify, OpenApi,
    openapi::{
        RefOr,
        header::HeaderBuilder,
        schema::{ObjectBuilder, Type},
    },
};

use crate::api;
use crate::errors::{RATE_LIMIT_LIMIT_HEADER, RATE_LIMIT_REMAINING_HEADER, RATE_LIMIT_RESET_HEADER};

/// Documents the allowance headers on every 429 response.
struct RateLimitHeadersAddon;

impl Modify for RateLimitHeadersAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let headers = [
            (RATE_LIMIT_LIMIT_HEADER, "Requests allowed per window"),
            (RATE_LIMIT_REMAINING_HEADER, "Requests left in the current window"),
            (RATE_LIMIT_RESET_HEADER, "Unix time at which the window resets"),
        ];

        for item in openapi.paths.paths.values_mut() {
            for operation in [&mut item.get, &mut item.post, &mut item.put, &mut item.delete]
                .into_iter()
                .flatten()
            {
                if let Some(RefOr::T(response)) = operation.responses.responses.get_mut("429") {
                    for (name, description) in headers {
                        response.headers.insert(
                            name.to_string(),
                            HeaderBuilder::new()
                                .schema(ObjectBuilder::new().schema_type(Type::Integer))
                                .description(Some(description))
                                .build(),
                        );
                    }
                }
            }
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "relayctl",
        description = "Rate-limited gateway in front of chat, document question answering and voice call providers. \
                       Every forwarded request counts against a per-user, per-feature daily allowance."
    ),
    paths(
        api::handlers::chat::chat,
        api::handlers::knowledge::knowledge_query,
        api::handlers::flows::create_flow,
        api::handlers::flows::list_flows,
        api::handlers::flows::get_flow,
        api::handlers::flows::update_flow,
        api::handlers::flows::delete_flow,
        api::handlers::flows::run_flow,
        api::handlers::calls::start_call,
        api::handlers::calls::get_call,
        api::handlers::calls::call_event,
        api::handlers::calls::list_call_history,
        api::handlers::conversations::save_conversation,
        api::handlers::conversations::list_conversations,
        api::handlers::conversations::get_conversation,
        api::handlers::conversations::update_conversation,
        api::handlers::conversations::delete_conversation,
        api::handlers::prompts::create_prompt,
        api::handlers::prompts::list_prompts,
        api::handlers::prompts::update_prompt,
        api::handlers::prompts::delete_prompt,
        api::handlers::rate_limits::list_rate_limit_events,
        api::handlers::health::healthz,
    ),
    components(schemas(
        crate::types::Feature,
        crate::limits::RateLimitDecision,
        crate::providers::ChatMessage,
        crate::providers::MessageRole,
        crate::providers::GenerationParams,
        crate::providers::CallConfiguration,
        crate::session::graph::FlowNode,
        crate::session::graph::FlowEdge,
        crate::session::graph::NodePosition,
        crate::session::call::CallHandle,
        crate::session::call::CallState,
        api::models::chat::ChatRequest,
        api::models::knowledge::KnowledgeQueryRequest,
        api::models::knowledge::AnswerResponse,
        api::models::flows::FlowCreate,
        api::models::flows::FlowUpdate,
        api::models::flows::FlowResponse,
        api::models::flows::FlowRunRequest,
        api::models::calls::StartCallRequest,
        api::models::calls::CallEventRequest,
        api::models::calls::CallHistoryResponse,
        api::models::conversations::ConversationCreate,
        api::models::conversations::ConversationUpdate,
        api::models::conversations::ConversationResponse,
        api::models::prompts::PromptCreate,
        api::models::prompts::PromptUpdate,
        api::models::prompts::PromptResponse,
        api::models::rate_limits::RateLimitedEventResponse,
        api::handlers::health::HealthResponse,
    )),
    modifiers(&RateLimitHeadersAddon),
    tags(
        (name = "chat", description = "Streaming chat completions"),
        (name = "knowledge", description = "Question answering over documents and web pages"),
        (name = "flows", description = "Saved flow graphs and flow chat"),
        (name = "calls", description = "Outbound voice calls"),
        (name = "conversations", description = "Saved conversations"),
        (name = "prompts", description = "Saved prompt presets"),
        (name = "rate-limits", description = "Recorded rate-limit rejections"),
        (name = "health", description = "Service health"),
    )
)]
pub struct ApiDoc;
