//! Trunk selector service
//!
//! Picks the best eligible trunk for a call: candidates are filtered on
//! account, status, health, direction, and headroom, ordered by priority,
//! then load, then id, and admitted through the capacity manager. Admission
//! races fall through to the next candidate; exhausted candidates fall back
//! to the failover chain.

use crate::capacity::CapacityManager;
use crate::failover::FailoverCoordinator;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use trunkgate_core::{
    models::{CallDirection, Trunk},
    traits::TrunkRepository,
    AppError, AppResult,
};
use uuid::Uuid;

/// Trunk selector
pub struct TrunkSelector<R: TrunkRepository> {
    trunk_repo: Arc<R>,
    capacity: Arc<CapacityManager<R>>,
    failover: Arc<FailoverCoordinator<R>>,
}

impl<R: TrunkRepository> TrunkSelector<R> {
    /// Create a new trunk selector
    pub fn new(
        trunk_repo: Arc<R>,
        capacity: Arc<CapacityManager<R>>,
        failover: Arc<FailoverCoordinator<R>>,
    ) -> Self {
        Self {
            trunk_repo,
            capacity,
            failover,
        }
    }

    /// Select and admit a trunk for a call in the given direction
    ///
    /// On success the returned trunk has already consumed one admission
    /// slot; the caller owns releasing it through the call lifecycle.
    ///
    /// # Errors
    ///
    /// `NoTrunkAvailable` when no eligible trunk admits, directly or via
    /// failover. Failover chain anomalies are logged at warn and surface as
    /// `NoTrunkAvailable` as well.
    #[instrument(skip(self))]
    pub async fn select_trunk(
        &self,
        account_id: Uuid,
        direction: CallDirection,
    ) -> AppResult<Trunk> {
        // Repository ordering is (priority, current_active_calls, id):
        // business preference first, load balancing among equals, id as the
        // deterministic tie-break.
        let trunks = self.trunk_repo.find_by_account(account_id).await?;
        let candidates: Vec<&Trunk> = trunks
            .iter()
            .filter(|t| t.is_selectable(direction))
            .collect();

        debug!(
            "Account {} has {} candidate trunk(s) for {} calls",
            account_id,
            candidates.len(),
            direction
        );

        for candidate in &candidates {
            match self.capacity.admit(candidate.id).await {
                Ok(true) => {
                    info!(
                        "Selected trunk {} (priority {}) for account {}",
                        candidate.id, candidate.priority, account_id
                    );
                    return Ok((*candidate).clone());
                }
                Ok(false) => {
                    // another request consumed the last slot between the
                    // filter and the admit; try the next candidate
                    debug!("Lost admission race on trunk {}, trying next", candidate.id);
                }
                Err(AppError::TrunkNotFound(_)) | Err(AppError::TrunkIneligible(_)) => {
                    debug!(
                        "Trunk {} became ineligible during selection, trying next",
                        candidate.id
                    );
                }
                Err(e) => return Err(e),
            }
        }

        // No direct candidate admitted; consult the failover chain of the
        // most preferred candidate, or of the account's most preferred trunk
        // when the filter produced nothing.
        let chain_start = candidates
            .first()
            .and_then(|t| t.failover_trunk_id)
            .or_else(|| trunks.first().and_then(|t| t.failover_trunk_id));

        let start_id = match chain_start {
            Some(id) => id,
            None => return Err(AppError::NoTrunkAvailable),
        };

        match self.failover.resolve(start_id, account_id, direction).await {
            Ok(trunk) => {
                info!(
                    "Failover selected trunk {} for account {}",
                    trunk.id, account_id
                );
                Ok(trunk)
            }
            Err(AppError::CycleDetected(at)) => {
                warn!(
                    "Failover chain for account {} contains a cycle at trunk {}; check trunk configuration",
                    account_id, at
                );
                Err(AppError::NoTrunkAvailable)
            }
            Err(AppError::MaxDepthExceeded(depth)) => {
                warn!(
                    "Failover chain for account {} exceeded depth {}; check trunk configuration",
                    account_id, depth
                );
                Err(AppError::NoTrunkAvailable)
            }
            Err(e) => Err(e),
        }
    }
}
