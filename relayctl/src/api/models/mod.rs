//! API request and response data models.
//!
//! API models are distinct from database models so the wire format can evolve independently of
//! storage. Field names are camelCase on the wire.
//!
//! - [`chat`]: chat request body
//! - [`knowledge`]: knowledge query bodies and answers
//! - [`flows`]: flow graphs and flow runs
//! - [`conversations`]: saved conversations
//! - [`prompts`]: saved prompt presets
//! - [`calls`]: voice calls, provider callbacks and call history
//! - [`rate_limits`]: recorded rate-limit rejections

pub mod calls;
pub mod chat;
pub mod conversations;
pub mod flows;
pub mod knowledge;
pub mod prompts;
pub mod rate_limits;

/// Resolve `skip`/`limit` query parameters: skip from 0, at most 1000 items, 100 by default
pub fn page_bounds(skip: Option<i64>, limit: Option<i64>) -> (i64, i64) {
    (skip.unwrap_or(0).max(0), limit.unwrap_or(100).clamp(1, 1000))
}
