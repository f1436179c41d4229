//! Trunk model
//!
//! Represents a telephony trunk: its provider binding, capacity limits,
//! health state, and failover chain position.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use validator::Validate;

/// Telephony provider backing a trunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrunkProvider {
    Twilio,
    Telnyx,
    Bandwidth,
    Vonage,
    Custom,
}

impl fmt::Display for TrunkProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrunkProvider::Twilio => write!(f, "twilio"),
            TrunkProvider::Telnyx => write!(f, "telnyx"),
            TrunkProvider::Bandwidth => write!(f, "bandwidth"),
            TrunkProvider::Vonage => write!(f, "vonage"),
            TrunkProvider::Custom => write!(f, "custom"),
        }
    }
}

impl TrunkProvider {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "twilio" => Some(TrunkProvider::Twilio),
            "telnyx" => Some(TrunkProvider::Telnyx),
            "bandwidth" => Some(TrunkProvider::Bandwidth),
            "vonage" => Some(TrunkProvider::Vonage),
            "custom" => Some(TrunkProvider::Custom),
            _ => None,
        }
    }
}

/// Trunk status enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TrunkStatus {
    /// Trunk is initialized and may carry calls
    Active,
    /// Trunk exists but is not initialized with its provider
    #[default]
    Inactive,
    /// Trunk is administratively blocked
    Suspended,
    /// Trunk is under maintenance
    Maintenance,
    /// Trunk was marked failed by the health monitor or provider init
    Error,
}

impl fmt::Display for TrunkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrunkStatus::Active => write!(f, "active"),
            TrunkStatus::Inactive => write!(f, "inactive"),
            TrunkStatus::Suspended => write!(f, "suspended"),
            TrunkStatus::Maintenance => write!(f, "maintenance"),
            TrunkStatus::Error => write!(f, "error"),
        }
    }
}

impl TrunkStatus {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "active" => Some(TrunkStatus::Active),
            "inactive" => Some(TrunkStatus::Inactive),
            "suspended" => Some(TrunkStatus::Suspended),
            "maintenance" => Some(TrunkStatus::Maintenance),
            "error" => Some(TrunkStatus::Error),
            _ => None,
        }
    }

    /// Check if a trunk in this status may accept calls
    pub fn can_carry_calls(&self) -> bool {
        matches!(self, TrunkStatus::Active)
    }
}

/// Call direction capability of a trunk, or direction of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CallDirection {
    Inbound,
    Outbound,
    #[default]
    Bidirectional,
}

impl fmt::Display for CallDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallDirection::Inbound => write!(f, "inbound"),
            CallDirection::Outbound => write!(f, "outbound"),
            CallDirection::Bidirectional => write!(f, "bidirectional"),
        }
    }
}

impl CallDirection {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "inbound" => Some(CallDirection::Inbound),
            "outbound" => Some(CallDirection::Outbound),
            "bidirectional" => Some(CallDirection::Bidirectional),
            _ => None,
        }
    }

    /// Check whether a trunk with this capability can carry a call in the
    /// requested direction
    pub fn supports(&self, requested: CallDirection) -> bool {
        *self == CallDirection::Bidirectional || *self == requested
    }
}

/// Trunk health status as observed by the health monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Not probed yet; eligible for selection
    #[default]
    Unknown,
    Healthy,
    Unhealthy,
    Error,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Unknown => write!(f, "unknown"),
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
            HealthStatus::Error => write!(f, "error"),
        }
    }
}

impl HealthStatus {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "unknown" => Some(HealthStatus::Unknown),
            "healthy" => Some(HealthStatus::Healthy),
            "unhealthy" => Some(HealthStatus::Unhealthy),
            "error" => Some(HealthStatus::Error),
            _ => None,
        }
    }

    /// Whether a trunk with this health status may be offered calls
    ///
    /// Unknown counts as eligible: a freshly created trunk must be usable
    /// before its first probe completes.
    pub fn is_eligible(&self) -> bool {
        matches!(self, HealthStatus::Healthy | HealthStatus::Unknown)
    }
}

/// Trunk entity
///
/// A trunk is owned by an account and carries calls through a single
/// provider. Its admission counter (`current_active_calls`) is mutated only
/// through the capacity manager's atomic admit/release operations; its health
/// fields only through the health monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trunk {
    /// Unique identifier
    pub id: Uuid,

    /// Owning account
    pub account_id: Uuid,

    /// Display name
    pub name: String,

    /// Optional description
    pub description: Option<String>,

    /// Backing telephony provider
    pub provider: TrunkProvider,

    /// Administrative status
    pub status: TrunkStatus,

    /// SIP endpoint domain used by provider probes
    pub sip_domain: String,

    /// SIP endpoint port
    pub sip_port: i32,

    /// Direction capability
    pub call_direction: CallDirection,

    /// Concurrency ceiling (always positive)
    pub max_concurrent_calls: i32,

    /// Currently admitted calls (invariant: 0 <= n <= max_concurrent_calls)
    pub current_active_calls: i32,

    /// Selection priority, lower is preferred
    pub priority: i32,

    /// Health status from the most recent probe cycle
    pub health_status: HealthStatus,

    /// Round-trip latency from the last successful probe
    pub latency_ms: Option<f64>,

    /// Packet loss from the last successful probe
    pub packet_loss_percent: Option<f64>,

    /// When the last probe completed (success or failure)
    pub last_health_check: Option<DateTime<Utc>>,

    /// Next trunk in the failover chain
    pub failover_trunk_id: Option<Uuid>,

    /// Billing rate applied to answered calls
    pub cost_per_minute: Decimal,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last update timestamp
    pub updated_at: DateTime<Utc>,

    /// Tombstone; set instead of hard deletion while calls may still
    /// reference the trunk
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Trunk {
    /// Build a trunk from validated creation input
    ///
    /// New trunks start Inactive with Unknown health and a zero admission
    /// counter; provider initialization promotes them to Active.
    pub fn from_new(account_id: Uuid, input: &NewTrunk) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            account_id,
            name: input.name.clone(),
            description: input.description.clone(),
            provider: input.provider,
            status: TrunkStatus::Inactive,
            sip_domain: input.sip_domain.clone(),
            sip_port: input.sip_port,
            call_direction: input.call_direction,
            max_concurrent_calls: input.max_concurrent_calls,
            current_active_calls: 0,
            priority: input.priority,
            health_status: HealthStatus::Unknown,
            latency_ms: None,
            packet_loss_percent: None,
            last_health_check: None,
            failover_trunk_id: input.failover_trunk_id,
            cost_per_minute: input.cost_per_minute,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Check if the trunk is tombstoned
    #[inline]
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Check if the trunk is active with eligible health
    #[inline]
    pub fn is_operational(&self) -> bool {
        !self.is_deleted() && self.status.can_carry_calls() && self.health_status.is_eligible()
    }

    /// Check if the admission counter has headroom
    #[inline]
    pub fn has_capacity(&self) -> bool {
        self.current_active_calls < self.max_concurrent_calls
    }

    /// Full eligibility predicate used by selection and failover
    pub fn is_selectable(&self, direction: CallDirection) -> bool {
        self.is_operational() && self.call_direction.supports(direction) && self.has_capacity()
    }

    /// Current utilization percentage
    pub fn utilization_percent(&self) -> f64 {
        if self.max_concurrent_calls == 0 {
            return 0.0;
        }
        (self.current_active_calls as f64 / self.max_concurrent_calls as f64) * 100.0
    }
}

/// Validated input for creating a trunk
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewTrunk {
    #[validate(length(min = 1, max = 100))]
    pub name: String,

    pub description: Option<String>,

    pub provider: TrunkProvider,

    #[validate(length(min = 1, max = 255))]
    pub sip_domain: String,

    #[validate(range(min = 1, max = 65535))]
    pub sip_port: i32,

    pub call_direction: CallDirection,

    #[validate(range(min = 1, max = 10000))]
    pub max_concurrent_calls: i32,

    #[validate(range(min = 0))]
    pub priority: i32,

    pub failover_trunk_id: Option<Uuid>,

    pub cost_per_minute: Decimal,
}

impl Default for NewTrunk {
    fn default() -> Self {
        Self {
            name: String::new(),
            description: None,
            provider: TrunkProvider::Custom,
            sip_domain: String::new(),
            sip_port: 5060,
            call_direction: CallDirection::Bidirectional,
            max_concurrent_calls: 10,
            priority: 1,
            failover_trunk_id: None,
            cost_per_minute: Decimal::ZERO,
        }
    }
}
