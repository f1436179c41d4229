//! Call record model
//!
//! Tracks a single call through its lifecycle states and carries the
//! derived billing figures once the call terminates.

use crate::models::CallDirection;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Call lifecycle state
///
/// The legal edges are:
/// Initiated -> {Ringing, Answered, Failed},
/// Ringing -> {Answered, Failed},
/// Answered -> {Ended, Failed}.
/// Ended and Failed are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    #[default]
    Initiated,
    Ringing,
    Answered,
    Ended,
    Failed,
}

impl fmt::Display for CallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallState::Initiated => write!(f, "initiated"),
            CallState::Ringing => write!(f, "ringing"),
            CallState::Answered => write!(f, "answered"),
            CallState::Ended => write!(f, "ended"),
            CallState::Failed => write!(f, "failed"),
        }
    }
}

impl CallState {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "initiated" => Some(CallState::Initiated),
            "ringing" => Some(CallState::Ringing),
            "answered" => Some(CallState::Answered),
            "ended" => Some(CallState::Ended),
            "failed" => Some(CallState::Failed),
            _ => None,
        }
    }

    /// Check if this state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }

    /// Check whether `next` is reachable from this state along a legal edge
    pub fn can_transition_to(&self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (*self, next),
            (Initiated, Ringing)
                | (Initiated, Answered)
                | (Initiated, Failed)
                | (Ringing, Answered)
                | (Ringing, Failed)
                | (Answered, Ended)
                | (Answered, Failed)
        )
    }
}

/// Normalized lifecycle event vocabulary
///
/// Provider webhooks are mapped into these events by the webhook adapter;
/// each event targets exactly one state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallEvent {
    Ringing,
    Answered,
    Completed,
    Failed,
}

impl fmt::Display for CallEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallEvent::Ringing => write!(f, "ringing"),
            CallEvent::Answered => write!(f, "answered"),
            CallEvent::Completed => write!(f, "completed"),
            CallEvent::Failed => write!(f, "failed"),
        }
    }
}

impl CallEvent {
    /// The state this event drives the call into
    pub fn target_state(&self) -> CallState {
        match self {
            CallEvent::Ringing => CallState::Ringing,
            CallEvent::Answered => CallState::Answered,
            CallEvent::Completed => CallState::Ended,
            CallEvent::Failed => CallState::Failed,
        }
    }

    /// Map a provider webhook event name to the normalized vocabulary
    ///
    /// Covers the Twilio/Telnyx status names the adapters emit; unrecognized
    /// names return None and are dropped before reaching the lifecycle.
    pub fn from_provider_event(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "ringing" | "ring" => Some(CallEvent::Ringing),
            "answered" | "answer" | "in-progress" | "bridged" => Some(CallEvent::Answered),
            "completed" | "ended" | "hangup" => Some(CallEvent::Completed),
            "failed" | "busy" | "no-answer" | "canceled" | "rejected" => Some(CallEvent::Failed),
            _ => None,
        }
    }
}

/// Call record entity
///
/// Owned by a trunk; optionally linked to a conversation. State moves only
/// along the legal edges, and `capacity_released` flips to true exactly once
/// when the record enters a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallRecord {
    /// Unique identifier
    pub id: Uuid,

    /// Owning account
    pub account_id: Uuid,

    /// Trunk that admitted this call
    pub trunk_id: Uuid,

    /// Optional external conversation/session link
    pub conversation_id: Option<Uuid>,

    /// Provider-side call identifier (e.g. Twilio call SID)
    pub provider_call_id: Option<String>,

    /// Call direction
    pub direction: CallDirection,

    /// Calling number
    pub from_number: String,

    /// Called number
    pub to_number: String,

    /// Current lifecycle state
    pub state: CallState,

    /// When the call was initiated
    pub started_at: DateTime<Utc>,

    /// When the call was answered (None if never answered)
    pub answered_at: Option<DateTime<Utc>>,

    /// When the call reached a terminal state
    pub ended_at: Option<DateTime<Utc>>,

    /// Billable duration, valid only once answered and ended
    pub duration_seconds: Option<i32>,

    /// Derived cost (duration x trunk rate)
    pub cost: Option<Decimal>,

    /// Provider hangup cause, when reported
    pub hangup_cause: Option<String>,

    /// Guard flag making capacity release idempotent under duplicate
    /// terminal events
    pub capacity_released: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    /// Create a record for a freshly admitted call in Initiated state
    pub fn new(
        account_id: Uuid,
        trunk_id: Uuid,
        direction: CallDirection,
        from_number: String,
        to_number: String,
        started_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            trunk_id,
            conversation_id: None,
            provider_call_id: None,
            direction,
            from_number,
            to_number,
            state: CallState::Initiated,
            started_at,
            answered_at: None,
            ended_at: None,
            duration_seconds: None,
            cost: None,
            hangup_cause: None,
            capacity_released: false,
            created_at: now,
            updated_at: now,
        }
    }

    /// Check if the call was answered
    #[inline]
    pub fn was_answered(&self) -> bool {
        self.answered_at.is_some()
    }

    /// Check if the call reached a terminal state
    #[inline]
    pub fn is_completed(&self) -> bool {
        self.state.is_terminal()
    }

    /// Billable whole seconds between answer and hangup, floored at zero
    pub fn billable_seconds(answered_at: DateTime<Utc>, ended_at: DateTime<Utc>) -> i32 {
        (ended_at - answered_at).num_seconds().max(0) as i32
    }

    /// Cost of a call: (duration / 60) x rate per minute
    pub fn call_cost(duration_seconds: i32, rate_per_minute: Decimal) -> Decimal {
        if duration_seconds <= 0 {
            return Decimal::ZERO;
        }
        let minutes = Decimal::from(duration_seconds) / Decimal::from(60);
        minutes * rate_per_minute
    }
}
