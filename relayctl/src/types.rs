//! Common type definitions shared across the gateway.
//!
//! # ID Types
//!
//! - [`UserId`]: opaque identifier issued by the external identity provider
//! - [`FlowId`], [`ConversationId`], [`PromptId`], [`CallId`]: locally generated UUIDs
//!
//! # Features
//!
//! [`Feature`] names a rate-limited capability. Each feature has its own per-day counter, so a user
//! exhausting their chat allowance can still start a voice call.
//!
//! # Utility Functions
//!
//! - [`abbrev_uuid`]: Abbreviate UUIDs to first 8 chars for logging

use serde::{Deserialize, Serialize};
use std::fmt;
use utoipa::ToSchema;
use uuid::Uuid;

// Type aliases for IDs
pub type UserId = String;
pub type FlowId = Uuid;
pub type ConversationId = Uuid;
pub type PromptId = Uuid;
pub type CallId = Uuid;
pub type RequestId = Uuid;

/// Abbreviate a UUID to its first 8 characters for more readable logs and traces
/// Example: "550e8400-e29b-41d4-a716-446655440000" -> "550e8400"
pub fn abbrev_uuid(uuid: &Uuid) -> String {
    uuid.to_string().chars().take(8).collect()
}

/// A rate-limited capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Streaming chat completions
    Chat,
    /// Question answering over an uploaded document or a URL
    KnowledgeQuery,
    /// Outbound voice calls
    VoiceCall,
    /// Chat against a saved flow graph
    FlowChat,
}

impl Feature {
    pub const ALL: [Feature; 4] = [Feature::Chat, Feature::KnowledgeQuery, Feature::VoiceCall, Feature::FlowChat];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::KnowledgeQuery => "knowledge_query",
            Self::VoiceCall => "voice_call",
            Self::FlowChat => "flow_chat",
        }
    }

    /// Human readable name used in user-facing error messages
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::KnowledgeQuery => "document question answering",
            Self::VoiceCall => "voice calling",
            Self::FlowChat => "flow chat",
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chat" => Ok(Self::Chat),
            "knowledge_query" => Ok(Self::KnowledgeQuery),
            "voice_call" => Ok(Self::VoiceCall),
            "flow_chat" => Ok(Self::FlowChat),
            _ => Err(format!("Unknown feature: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_round_trips_through_str() {
        for feature in Feature::ALL {
            assert_eq!(feature.as_str().parse::<Feature>().unwrap(), feature);
        }
        assert!("voice".parse::<Feature>().is_err());
    }

    #[test]
    fn test_abbrev_uuid() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(abbrev_uuid(&id), "550e8400");
    }
}
