//! Database record structures matching table schemas.

pub mod call_history;
pub mod conversations;
pub mod flows;
pub mod prompts;
pub mod rate_limits;
