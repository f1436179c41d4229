//! Common traits for repositories and provider clients
//!
//! Defines the storage abstraction (including the atomic admission
//! primitives) and the narrow provider-client interface the rest of the
//! subsystem is written against.

use crate::error::AppError;
use crate::models::{CallRecord, CallState, HealthStatus, Trunk, TrunkProvider, TrunkStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Trunk repository trait
///
/// `try_admit` and `release` are the only mutation points for the admission
/// counter and must be atomic per trunk: a conditional update, never a
/// read-then-write split across two calls.
#[async_trait]
pub trait TrunkRepository: Send + Sync {
    /// Persist a new trunk
    async fn create(&self, trunk: &Trunk) -> Result<Trunk, AppError>;

    /// Find trunk by ID (tombstoned trunks are returned; callers filter)
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Trunk>, AppError>;

    /// All non-deleted trunks of an account, ordered by
    /// (priority, current_active_calls, id)
    async fn find_by_account(&self, account_id: Uuid) -> Result<Vec<Trunk>, AppError>;

    /// All non-deleted trunks across accounts, for the health monitor sweep
    async fn find_monitorable(&self) -> Result<Vec<Trunk>, AppError>;

    /// Atomic conditional admission: increment the counter only while the
    /// trunk is Active, not tombstoned, health-eligible, and below its
    /// ceiling. Returns the updated trunk, or None when the condition fails.
    async fn try_admit(&self, id: Uuid) -> Result<Option<Trunk>, AppError>;

    /// Atomic conditional release: decrement the counter only while it is
    /// above zero. Returns false when the counter was already zero (the
    /// decrement is clamped, never applied twice).
    async fn release(&self, id: Uuid) -> Result<bool, AppError>;

    /// Update administrative status
    async fn update_status(&self, id: Uuid, status: TrunkStatus) -> Result<Trunk, AppError>;

    /// Record a probe outcome on the trunk's health fields
    async fn record_health(
        &self,
        id: Uuid,
        health: HealthStatus,
        latency_ms: Option<f64>,
        packet_loss_percent: Option<f64>,
        checked_at: DateTime<Utc>,
    ) -> Result<Trunk, AppError>;

    /// Tombstone a trunk; it disappears from selection but stays
    /// referencable by historical call records
    async fn soft_delete(&self, id: Uuid) -> Result<bool, AppError>;
}

/// Call record repository trait
#[async_trait]
pub trait CallRepository: Send + Sync {
    /// Persist a new call record
    async fn create(&self, call: &CallRecord) -> Result<CallRecord, AppError>;

    /// Find call by ID
    async fn find_by_id(&self, id: Uuid) -> Result<Option<CallRecord>, AppError>;

    /// Find call by the provider-side call identifier
    async fn find_by_provider_call_id(
        &self,
        provider_call_id: &str,
    ) -> Result<Option<CallRecord>, AppError>;

    /// Conditionally persist a transition: the write applies only if the
    /// stored record is still in `expected` state. Returns None when another
    /// transition won the race, so the caller can reject the stale event.
    async fn update_transition(
        &self,
        id: Uuid,
        expected: CallState,
        updated: &CallRecord,
    ) -> Result<Option<CallRecord>, AppError>;

    /// Attach the provider-side call identifier once the provider leg exists
    async fn set_provider_call_id(
        &self,
        id: Uuid,
        provider_call_id: &str,
    ) -> Result<CallRecord, AppError>;

    /// Recent calls carried by a trunk
    async fn find_by_trunk(&self, trunk_id: Uuid, limit: i64) -> Result<Vec<CallRecord>, AppError>;
}

/// Outcome of a single provider health probe
#[derive(Debug, Clone, Default)]
pub struct ProbeReport {
    /// Whether the provider considers the trunk usable
    pub healthy: bool,

    /// Measured round-trip latency
    pub latency_ms: Option<f64>,

    /// Measured packet loss
    pub packet_loss_percent: Option<f64>,
}

impl ProbeReport {
    /// A healthy report carrying a latency measurement
    pub fn healthy(latency_ms: f64) -> Self {
        Self {
            healthy: true,
            latency_ms: Some(latency_ms),
            packet_loss_percent: None,
        }
    }

    /// An unhealthy report (provider reachable but trunk unusable)
    pub fn unhealthy(latency_ms: Option<f64>) -> Self {
        Self {
            healthy: false,
            latency_ms,
            packet_loss_percent: None,
        }
    }
}

/// Narrow provider-client interface
///
/// One implementation per provider, translating to that provider's control
/// API. Failures surface as `AppError::ProviderError`; wire protocols never
/// leak past this boundary.
#[async_trait]
pub trait TelephonyProviderClient: Send + Sync {
    /// Which provider this client speaks for
    fn provider(&self) -> TrunkProvider;

    /// Validate credentials/configuration for a trunk with the provider
    async fn initialize(&self, trunk: &Trunk) -> Result<(), AppError>;

    /// Probe the trunk; must complete quickly, the monitor enforces a timeout
    async fn health_check(&self, trunk: &Trunk) -> Result<ProbeReport, AppError>;

    /// Start an outbound call leg; returns the provider call identifier
    async fn make_call(
        &self,
        trunk: &Trunk,
        from_number: &str,
        to_number: &str,
    ) -> Result<String, AppError>;

    /// Tear down a call leg
    async fn hangup_call(&self, trunk: &Trunk, provider_call_id: &str) -> Result<(), AppError>;
}

/// Registry mapping each provider to its client implementation
///
/// Built once at startup from configuration; trunks are dispatched by their
/// `provider` field.
#[derive(Default)]
pub struct ProviderRegistry {
    clients: HashMap<TrunkProvider, Arc<dyn TelephonyProviderClient>>,
}

impl ProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a client under its own provider key
    pub fn register(&mut self, client: Arc<dyn TelephonyProviderClient>) {
        self.clients.insert(client.provider(), client);
    }

    /// Look up the client for a provider
    pub fn get(
        &self,
        provider: TrunkProvider,
    ) -> Result<Arc<dyn TelephonyProviderClient>, AppError> {
        self.clients
            .get(&provider)
            .cloned()
            .ok_or_else(|| AppError::ProviderNotConfigured(provider.to_string()))
    }

    /// Number of configured providers
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether no providers are configured
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
