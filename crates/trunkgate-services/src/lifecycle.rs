//! Call lifecycle service
//!
//! Drives call records through the state machine
//! Initiated -> Ringing -> Answered -> {Ended, Failed}, rejecting any event
//! that does not match a legal edge. Entering a terminal state releases the
//! trunk's admission slot exactly once, even when terminal events are
//! delivered more than once.

use crate::capacity::CapacityManager;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};
use trunkgate_core::{
    models::{CallDirection, CallEvent, CallRecord, CallState},
    traits::{CallRepository, TrunkRepository},
    AppError, AppResult,
};
use uuid::Uuid;

/// Call lifecycle service
pub struct CallLifecycle<T: TrunkRepository, C: CallRepository> {
    trunk_repo: Arc<T>,
    call_repo: Arc<C>,
    capacity: Arc<CapacityManager<T>>,
}

impl<T: TrunkRepository, C: CallRepository> CallLifecycle<T, C> {
    /// Create a new call lifecycle service
    pub fn new(trunk_repo: Arc<T>, call_repo: Arc<C>, capacity: Arc<CapacityManager<T>>) -> Self {
        Self {
            trunk_repo,
            call_repo,
            capacity,
        }
    }

    /// Create a call record in Initiated state
    ///
    /// The trunk's admission slot was already consumed during selection;
    /// from here on the record owns it until a terminal transition.
    #[instrument(skip(self, from_number, to_number))]
    pub async fn start_call(
        &self,
        account_id: Uuid,
        trunk_id: Uuid,
        direction: CallDirection,
        from_number: String,
        to_number: String,
        started_at: DateTime<Utc>,
    ) -> AppResult<CallRecord> {
        let record = CallRecord::new(
            account_id,
            trunk_id,
            direction,
            from_number,
            to_number,
            started_at,
        );
        let record = self.call_repo.create(&record).await?;

        info!("Call {} initiated on trunk {}", record.id, trunk_id);
        Ok(record)
    }

    /// Apply a lifecycle event to a call
    ///
    /// The transition is validated against the legal edge set, computed
    /// against the record's current state, and persisted with a
    /// state-conditioned write. A duplicate or out-of-order event, or the
    /// loser of a concurrent race for the same record, is rejected as
    /// `InvalidTransition` and the record stays unchanged.
    #[instrument(skip(self))]
    pub async fn transition(
        &self,
        call_id: Uuid,
        event: CallEvent,
        at: DateTime<Utc>,
    ) -> AppResult<CallRecord> {
        let call = self
            .call_repo
            .find_by_id(call_id)
            .await?
            .ok_or_else(|| AppError::CallNotFound(call_id.to_string()))?;

        let target = event.target_state();
        if !call.state.can_transition_to(target) {
            warn!(
                "Rejected transition {} -> {} for call {}",
                call.state, target, call_id
            );
            return Err(AppError::InvalidTransition {
                from: call.state,
                to: target,
            });
        }

        let prior_state = call.state;
        let mut updated = call.clone();
        updated.state = target;

        match event {
            CallEvent::Ringing => {}
            CallEvent::Answered => {
                updated.answered_at = Some(at);
            }
            CallEvent::Completed => {
                updated.ended_at = Some(at);
                if updated.hangup_cause.is_none() {
                    updated.hangup_cause = Some("normal_clearing".to_string());
                }
                // only Answered -> Ended is legal, so answered_at is present
                if let Some(answered_at) = updated.answered_at {
                    let duration = CallRecord::billable_seconds(answered_at, at);
                    updated.duration_seconds = Some(duration);

                    let trunk = self
                        .trunk_repo
                        .find_by_id(call.trunk_id)
                        .await?
                        .ok_or_else(|| AppError::TrunkNotFound(call.trunk_id.to_string()))?;
                    updated.cost = Some(CallRecord::call_cost(duration, trunk.cost_per_minute));
                }
            }
            CallEvent::Failed => {
                updated.ended_at = Some(at);
                if updated.hangup_cause.is_none() {
                    updated.hangup_cause = Some("failed".to_string());
                }
                // failed calls never carry duration or cost
            }
        }

        let release_needed = target.is_terminal() && !updated.capacity_released;
        if release_needed {
            updated.capacity_released = true;
        }

        let persisted = self
            .call_repo
            .update_transition(call_id, prior_state, &updated)
            .await?
            .ok_or_else(|| {
                warn!(
                    "Call {} transition to {} lost a concurrent update race",
                    call_id, target
                );
                AppError::InvalidTransition {
                    from: prior_state,
                    to: target,
                }
            })?;

        // Only the winning terminal write reaches this point, so the slot
        // goes back exactly once. Release failures are anomalies for the
        // operator, not failures of the event path.
        if release_needed {
            if let Err(e) = self.capacity.release(call.trunk_id).await {
                error!(
                    "Failed to release capacity on trunk {} after call {} terminated: {}",
                    call.trunk_id, call_id, e
                );
            }
        }

        debug!(
            "Call {} transitioned {} -> {}",
            call_id, prior_state, target
        );
        Ok(persisted)
    }
}
