//! Call orchestration service
//!
//! Glues selection, provider call control, and the lifecycle together:
//! placing a call selects and admits a trunk, originates the provider leg,
//! and creates the call record; provider webhooks come back in through
//! `handle_provider_event` as lifecycle transitions.

use crate::capacity::CapacityManager;
use crate::lifecycle::CallLifecycle;
use crate::selector::TrunkSelector;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use trunkgate_core::{
    models::{CallDirection, CallEvent, CallRecord},
    traits::{CallRepository, ProviderRegistry, TrunkRepository},
    AppError, AppResult,
};
use uuid::Uuid;

/// Call orchestration service
pub struct CallService<T: TrunkRepository, C: CallRepository> {
    trunk_repo: Arc<T>,
    call_repo: Arc<C>,
    selector: Arc<TrunkSelector<T>>,
    lifecycle: Arc<CallLifecycle<T, C>>,
    capacity: Arc<CapacityManager<T>>,
    providers: Arc<ProviderRegistry>,
}

impl<T: TrunkRepository, C: CallRepository> CallService<T, C> {
    /// Create a new call service
    pub fn new(
        trunk_repo: Arc<T>,
        call_repo: Arc<C>,
        selector: Arc<TrunkSelector<T>>,
        lifecycle: Arc<CallLifecycle<T, C>>,
        capacity: Arc<CapacityManager<T>>,
        providers: Arc<ProviderRegistry>,
    ) -> Self {
        Self {
            trunk_repo,
            call_repo,
            selector,
            lifecycle,
            capacity,
            providers,
        }
    }

    /// Place an outbound call for an account
    ///
    /// Selection admits a trunk; the provider leg is originated on it and a
    /// call record created in Initiated. A provider failure after admission
    /// hands the slot straight back.
    #[instrument(skip(self, from_number, to_number))]
    pub async fn place_call(
        &self,
        account_id: Uuid,
        from_number: &str,
        to_number: &str,
    ) -> AppResult<CallRecord> {
        let trunk = self
            .selector
            .select_trunk(account_id, CallDirection::Outbound)
            .await?;

        let client = match self.providers.get(trunk.provider) {
            Ok(client) => client,
            Err(e) => {
                self.return_slot(trunk.id).await;
                return Err(e);
            }
        };

        let provider_call_id = match client.make_call(&trunk, from_number, to_number).await {
            Ok(id) => id,
            Err(e) => {
                error!("Origination failed on trunk {}: {}", trunk.id, e);
                self.return_slot(trunk.id).await;
                return Err(e);
            }
        };

        let record = self
            .lifecycle
            .start_call(
                account_id,
                trunk.id,
                CallDirection::Outbound,
                from_number.to_string(),
                to_number.to_string(),
                Utc::now(),
            )
            .await?;
        let record = self
            .call_repo
            .set_provider_call_id(record.id, &provider_call_id)
            .await?;

        info!(
            "Placed call {} ({} -> {}) via trunk {}",
            record.id, from_number, to_number, trunk.id
        );
        Ok(record)
    }

    /// Register an inbound call delivered by a provider
    #[instrument(skip(self, from_number, to_number))]
    pub async fn handle_inbound_call(
        &self,
        account_id: Uuid,
        from_number: &str,
        to_number: &str,
        provider_call_id: &str,
    ) -> AppResult<CallRecord> {
        let trunk = self
            .selector
            .select_trunk(account_id, CallDirection::Inbound)
            .await?;

        let record = self
            .lifecycle
            .start_call(
                account_id,
                trunk.id,
                CallDirection::Inbound,
                from_number.to_string(),
                to_number.to_string(),
                Utc::now(),
            )
            .await?;
        let record = self
            .call_repo
            .set_provider_call_id(record.id, provider_call_id)
            .await?;

        info!(
            "Accepted inbound call {} ({} -> {}) on trunk {}",
            record.id, from_number, to_number, trunk.id
        );
        Ok(record)
    }

    /// Apply a provider webhook event to its call
    ///
    /// Unrecognized event names, unknown calls, and out-of-order events are
    /// dropped (returning None); they never fail the event-processing path.
    #[instrument(skip(self))]
    pub async fn handle_provider_event(
        &self,
        provider_call_id: &str,
        event_name: &str,
        at: DateTime<Utc>,
    ) -> AppResult<Option<CallRecord>> {
        let event = match CallEvent::from_provider_event(event_name) {
            Some(event) => event,
            None => {
                debug!("Dropping unrecognized provider event '{}'", event_name);
                return Ok(None);
            }
        };

        let call = match self.call_repo.find_by_provider_call_id(provider_call_id).await? {
            Some(call) => call,
            None => {
                debug!(
                    "Dropping event '{}' for unknown provider call {}",
                    event_name, provider_call_id
                );
                return Ok(None);
            }
        };

        match self.lifecycle.transition(call.id, event, at).await {
            Ok(updated) => Ok(Some(updated)),
            Err(AppError::InvalidTransition { from, to }) => {
                warn!(
                    "Dropped out-of-order event '{}' for call {} ({} -> {})",
                    event_name, call.id, from, to
                );
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Ask the provider to tear down a call leg
    ///
    /// The terminal lifecycle transition arrives later through the
    /// provider's own completion event.
    #[instrument(skip(self))]
    pub async fn hangup_call(&self, call_id: Uuid) -> AppResult<()> {
        let call = self
            .call_repo
            .find_by_id(call_id)
            .await?
            .ok_or_else(|| AppError::CallNotFound(call_id.to_string()))?;

        let provider_call_id = call
            .provider_call_id
            .as_deref()
            .ok_or_else(|| AppError::InvalidInput("call has no provider leg".to_string()))?;

        let trunk = self
            .trunk_repo
            .find_by_id(call.trunk_id)
            .await?
            .ok_or_else(|| AppError::TrunkNotFound(call.trunk_id.to_string()))?;

        let client = self.providers.get(trunk.provider)?;
        client.hangup_call(&trunk, provider_call_id).await
    }

    async fn return_slot(&self, trunk_id: Uuid) {
        if let Err(e) = self.capacity.release(trunk_id).await {
            error!(
                "Failed to return admission slot on trunk {}: {}",
                trunk_id, e
            );
        }
    }
}
