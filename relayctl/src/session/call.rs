//! Voice call lifecycle.
//!
//! `idle -> dialing -> connected -> ended`, with `ended` reachable straight from `dialing` (no
//! answer, busy) and from `idle` (the provider refused the call). `ended` is terminal. Repeated
//! events for the current state are accepted as no-ops, since providers may deliver callbacks more
//! than once.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::types::{CallId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Idle,
    Dialing,
    Connected,
    Ended,
}

impl CallState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Idle => "idle",
            CallState::Dialing => "dialing",
            CallState::Connected => "connected",
            CallState::Ended => "ended",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent {
    Dialing,
    Connected,
    Ended { reason: Option<String> },
}

impl CallEvent {
    /// Map a provider status string onto a lifecycle event. Unknown statuses yield `None`.
    pub fn from_provider_status(status: &str, reason: Option<String>) -> Option<Self> {
        match status {
            "queued" | "ringing" | "dialing" => Some(CallEvent::Dialing),
            "in-progress" | "in_progress" | "connected" | "forwarding" => Some(CallEvent::Connected),
            "ended" | "completed" | "failed" | "busy" | "no-answer" => Some(CallEvent::Ended {
                reason: reason.or_else(|| (status != "ended").then(|| status.to_string())),
            }),
            _ => None,
        }
    }

    fn target(&self) -> CallState {
        match self {
            CallEvent::Dialing => CallState::Dialing,
            CallEvent::Connected => CallState::Connected,
            CallEvent::Ended { .. } => CallState::Ended,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("call cannot move from {from} to {to}")]
pub struct InvalidTransition {
    pub from: &'static str,
    pub to: &'static str,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CallHandle {
    #[schema(value_type = String, format = "uuid")]
    pub id: CallId,
    pub user_id: UserId,
    pub provider_call_id: Option<String>,
    pub destination: String,
    pub state: CallState,
    pub ended_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallHandle {
    pub fn new(id: CallId, user_id: impl Into<UserId>, destination: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            user_id: user_id.into(),
            provider_call_id: None,
            destination: destination.into(),
            state: CallState::Idle,
            ended_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a lifecycle event. Returns whether the state changed.
    pub fn transition(&mut self, event: CallEvent) -> Result<bool, InvalidTransition> {
        let to = event.target();
        if to == self.state {
            return Ok(false);
        }

        let allowed = matches!(
            (self.state, to),
            (CallState::Idle, CallState::Dialing)
                | (CallState::Idle, CallState::Ended)
                | (CallState::Dialing, CallState::Connected)
                | (CallState::Dialing, CallState::Ended)
                | (CallState::Connected, CallState::Ended)
        );
        if !allowed {
            return Err(InvalidTransition {
                from: self.state.as_str(),
                to: to.as_str(),
            });
        }

        if let CallEvent::Ended { reason } = event {
            self.ended_reason = reason;
        }
        self.state = to;
        self.updated_at = Utc::now();
        Ok(true)
    }
}

/// Calls started by this process, by local id.
#[derive(Debug, Clone, Default)]
pub struct CallRegistry {
    calls: Arc<DashMap<CallId, CallHandle>>,
}

impl CallRegistry {
    pub fn insert(&self, handle: CallHandle) {
        self.calls.insert(handle.id, handle);
    }

    pub fn get(&self, id: CallId) -> Option<CallHandle> {
        self.calls.get(&id).map(|h| h.clone())
    }

    /// Apply an event to a registered call. `None` if the call is unknown.
    pub fn apply(&self, id: CallId, event: CallEvent) -> Option<Result<CallHandle, InvalidTransition>> {
        let mut handle = self.calls.get_mut(&id)?;
        Some(handle.transition(event).map(|_| handle.clone()))
    }

    /// Drop calls that ended before `cutoff`. Returns how many were removed.
    pub fn purge_ended_before(&self, cutoff: DateTime<Utc>) -> usize {
        let before = self.calls.len();
        self.calls
            .retain(|_, handle| !(handle.state == CallState::Ended && handle.updated_at < cutoff));
        before.saturating_sub(self.calls.len())
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Record the provider's id for a call
    pub fn set_provider_call_id(&self, id: CallId, provider_call_id: String) {
        if let Some(mut handle) = self.calls.get_mut(&id) {
            handle.provider_call_id = Some(provider_call_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn handle() -> CallHandle {
        CallHandle::new(Uuid::new_v4(), "user_1", "+14155550100")
    }

    #[test]
    fn test_full_lifecycle() {
        let mut call = handle();
        assert!(call.transition(CallEvent::Dialing).unwrap());
        assert!(call.transition(CallEvent::Connected).unwrap());
        assert!(
            call.transition(CallEvent::Ended {
                reason: Some("customer-ended-call".to_string())
            })
            .unwrap()
        );
        assert_eq!(call.state, CallState::Ended);
        assert_eq!(call.ended_reason.as_deref(), Some("customer-ended-call"));
    }

    #[test]
    fn test_ended_directly_from_dialing() {
        let mut call = handle();
        call.transition(CallEvent::Dialing).unwrap();
        call.transition(CallEvent::Ended { reason: None }).unwrap();
        assert_eq!(call.state, CallState::Ended);
    }

    #[test]
    fn test_ended_is_terminal() {
        let mut call = handle();
        call.transition(CallEvent::Dialing).unwrap();
        call.transition(CallEvent::Ended { reason: None }).unwrap();

        let err = call.transition(CallEvent::Connected).unwrap_err();
        assert_eq!(err, InvalidTransition { from: "ended", to: "connected" });
        // Duplicate callbacks are harmless
        assert!(!call.transition(CallEvent::Ended { reason: None }).unwrap());
    }

    #[test]
    fn test_cannot_connect_without_dialing() {
        let mut call = handle();
        assert!(call.transition(CallEvent::Connected).is_err());
    }

    #[test]
    fn test_provider_status_mapping() {
        assert_eq!(CallEvent::from_provider_status("ringing", None), Some(CallEvent::Dialing));
        assert_eq!(CallEvent::from_provider_status("in-progress", None), Some(CallEvent::Connected));
        assert_eq!(
            CallEvent::from_provider_status("no-answer", None),
            Some(CallEvent::Ended {
                reason: Some("no-answer".to_string())
            })
        );
        assert_eq!(CallEvent::from_provider_status("transcript", None), None);
    }

    #[test]
    fn test_registry_apply() {
        let registry = CallRegistry::default();
        let call = handle();
        let id = call.id;
        registry.insert(call);

        let updated = registry.apply(id, CallEvent::Dialing).unwrap().unwrap();
        assert_eq!(updated.state, CallState::Dialing);
        assert!(registry.apply(Uuid::new_v4(), CallEvent::Dialing).is_none());
    }

    #[test]
    fn test_purge_removes_only_old_ended_calls() {
        let registry = CallRegistry::default();

        let ended = handle();
        let ended_id = ended.id;
        registry.insert(ended);
        registry.apply(ended_id, CallEvent::Ended { reason: None }).unwrap().unwrap();

        let live = handle();
        let live_id = live.id;
        registry.insert(live);
        registry.apply(live_id, CallEvent::Dialing).unwrap().unwrap();

        // Recently ended calls survive a cutoff in the past
        assert_eq!(registry.purge_ended_before(Utc::now() - chrono::Duration::hours(1)), 0);
        assert!(registry.get(ended_id).is_some());

        assert_eq!(registry.purge_ended_before(Utc::now() + chrono::Duration::seconds(1)), 1);
        assert!(registry.get(ended_id).is_none());
        assert!(registry.get(live_id).is_some());
        assert_eq!(registry.len(), 1);
    }
}
