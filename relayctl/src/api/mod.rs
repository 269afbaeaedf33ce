//! API layer for HTTP request handling and data models.
//!
//! - **[`handlers`]**: Axum route handlers for all API endpoints
//! - **[`models`]**: Request/response data structures for API communication
//!
//! # API Structure
//!
//! - **Chat** (`/chat`): streaming chat completions relayed as server-sent events
//! - **Knowledge** (`/knowledge-query`): question answering over an uploaded document or a URL
//! - **Flows** (`/flows/*`): saved flow graphs and chatting with them
//! - **Calls** (`/calls/*`, `/call-history`): outbound voice calls and their lifecycle
//! - **Conversations** (`/conversations/*`) and **Prompts** (`/prompts/*`): saved chat state
//! - **Rate limits** (`/rate-limits/events`): rejections recorded in the last day
//!
//! Callers identify themselves with `userId` and `username`; authentication happens upstream of
//! the gateway. Every forwarded request is rate limited per user and feature.
//!
//! # OpenAPI Documentation
//!
//! All endpoints are documented with `utoipa`. The document is served at `/openapi.json`.

pub mod handlers;
pub mod models;
