//! Process-local storage backend.

use chrono::NaiveDate;
use dashmap::DashMap;
use uuid::Uuid;

use crate::db::models::{
    call_history::CallHistoryRecord,
    conversations::Conversation,
    flows::Flow,
    prompts::PromptPreset,
    rate_limits::{CounterRecord, RateLimitedEvent},
};
use crate::types::{ConversationId, FlowId, PromptId, UserId};

/// Tables of the in-memory backend. Each map stands in for one PostgreSQL table.
#[derive(Debug, Default)]
pub struct MemoryStore {
    pub(crate) flows: DashMap<FlowId, Flow>,
    pub(crate) conversations: DashMap<ConversationId, Conversation>,
    pub(crate) prompts: DashMap<PromptId, PromptPreset>,
    pub(crate) counters: DashMap<(UserId, String), CounterRecord>,
    pub(crate) rate_limit_events: DashMap<(String, String, NaiveDate), RateLimitedEvent>,
    pub(crate) call_history: DashMap<Uuid, CallHistoryRecord>,
}
