//! Failover coordinator service
//!
//! Walks a trunk's `failover_trunk_id` chain looking for an alternate trunk
//! that admits. The walk never trusts the chain to be well-formed: an
//! explicit visited set catches cycles and a hard depth bound guarantees
//! termination even on corrupted data.

use crate::capacity::CapacityManager;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use trunkgate_core::{
    models::{CallDirection, Trunk},
    traits::TrunkRepository,
    AppError, AppResult,
};
use uuid::Uuid;

/// Failover coordinator
pub struct FailoverCoordinator<R: TrunkRepository> {
    trunk_repo: Arc<R>,
    capacity: Arc<CapacityManager<R>>,
    max_chain_depth: usize,
}

impl<R: TrunkRepository> FailoverCoordinator<R> {
    /// Create a new failover coordinator
    pub fn new(
        trunk_repo: Arc<R>,
        capacity: Arc<CapacityManager<R>>,
        max_chain_depth: usize,
    ) -> Self {
        Self {
            trunk_repo,
            capacity,
            max_chain_depth,
        }
    }

    /// Follow the failover chain starting at `start_trunk_id` until a trunk
    /// admits
    ///
    /// At each hop the trunk must belong to the account, pass the selection
    /// eligibility predicate, and win an admission; otherwise the walk
    /// continues to its failover target.
    ///
    /// # Errors
    ///
    /// - `NoTrunkAvailable` when the chain ends (or dangles) without an
    ///   admitting trunk
    /// - `CycleDetected` when a hop revisits a trunk
    /// - `MaxDepthExceeded` when the chain outruns the configured bound
    #[instrument(skip(self))]
    pub async fn resolve(
        &self,
        start_trunk_id: Uuid,
        account_id: Uuid,
        direction: CallDirection,
    ) -> AppResult<Trunk> {
        let mut visited: HashSet<Uuid> = HashSet::new();
        let mut next = Some(start_trunk_id);

        for _ in 0..self.max_chain_depth {
            let current_id = match next {
                Some(id) => id,
                None => return Err(AppError::NoTrunkAvailable),
            };

            if !visited.insert(current_id) {
                return Err(AppError::CycleDetected(current_id.to_string()));
            }

            let trunk = match self.trunk_repo.find_by_id(current_id).await? {
                Some(trunk) => trunk,
                None => {
                    warn!("Failover chain references missing trunk {}", current_id);
                    return Err(AppError::NoTrunkAvailable);
                }
            };

            if trunk.account_id == account_id && trunk.is_selectable(direction) {
                match self.capacity.admit(trunk.id).await {
                    Ok(true) => {
                        debug!(
                            "Failover resolved to trunk {} after {} hop(s)",
                            trunk.id,
                            visited.len()
                        );
                        return Ok(trunk);
                    }
                    Ok(false) => {
                        debug!("Failover candidate {} at capacity, continuing", trunk.id);
                    }
                    // eligibility changed between the read and the admit;
                    // keep walking
                    Err(AppError::TrunkNotFound(_)) | Err(AppError::TrunkIneligible(_)) => {}
                    Err(e) => return Err(e),
                }
            } else {
                debug!("Failover candidate {} not eligible, continuing", trunk.id);
            }

            next = trunk.failover_trunk_id;
        }

        Err(AppError::MaxDepthExceeded(self.max_chain_depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trunkgate_core::models::{NewTrunk, TrunkStatus};
    use trunkgate_db::InMemoryTrunkRepository;

    fn chain_trunk(account_id: Uuid, max: i32, failover: Option<Uuid>) -> Trunk {
        let mut trunk = Trunk::from_new(
            account_id,
            &NewTrunk {
                name: "chain".to_string(),
                sip_domain: "sip.example.com".to_string(),
                max_concurrent_calls: max,
                failover_trunk_id: failover,
                cost_per_minute: dec!(0.01),
                ..Default::default()
            },
        );
        trunk.status = TrunkStatus::Active;
        trunk
    }

    fn services(
        repo: Arc<InMemoryTrunkRepository>,
        depth: usize,
    ) -> FailoverCoordinator<InMemoryTrunkRepository> {
        let capacity = Arc::new(CapacityManager::new(repo.clone()));
        FailoverCoordinator::new(repo, capacity, depth)
    }

    #[tokio::test]
    async fn test_resolves_first_admitting_hop() {
        let repo = Arc::new(InMemoryTrunkRepository::new());
        let account_id = Uuid::new_v4();

        let backup = chain_trunk(account_id, 5, None);
        let backup_id = backup.id;
        let mut primary = chain_trunk(account_id, 1, Some(backup_id));
        primary.current_active_calls = 1; // full
        let primary_id = primary.id;
        repo.insert(primary);
        repo.insert(backup);

        let coordinator = services(repo.clone(), 10);
        let resolved = coordinator
            .resolve(primary_id, account_id, CallDirection::Outbound)
            .await
            .unwrap();
        assert_eq!(resolved.id, backup_id);

        let stored = repo.find_by_id(backup_id).await.unwrap().unwrap();
        assert_eq!(stored.current_active_calls, 1);
    }

    #[tokio::test]
    async fn test_cycle_is_detected() {
        let repo = Arc::new(InMemoryTrunkRepository::new());
        let account_id = Uuid::new_v4();

        // a -> b -> a, both full
        let a_id = Uuid::new_v4();
        let mut b = chain_trunk(account_id, 1, Some(a_id));
        b.current_active_calls = 1;
        let b_id = b.id;
        let mut a = chain_trunk(account_id, 1, Some(b_id));
        a.id = a_id;
        a.current_active_calls = 1;
        repo.insert(a);
        repo.insert(b);

        let coordinator = services(repo, 10);
        let result = coordinator
            .resolve(a_id, account_id, CallDirection::Outbound)
            .await;
        assert!(matches!(result, Err(AppError::CycleDetected(_))));
    }

    #[tokio::test]
    async fn test_depth_bound_terminates_walk() {
        let repo = Arc::new(InMemoryTrunkRepository::new());
        let account_id = Uuid::new_v4();

        // chain of 5 full trunks, bound at 3
        let mut next_id: Option<Uuid> = None;
        let mut first_id = Uuid::new_v4();
        for _ in 0..5 {
            let mut trunk = chain_trunk(account_id, 1, next_id);
            trunk.current_active_calls = 1;
            first_id = trunk.id;
            next_id = Some(trunk.id);
            repo.insert(trunk);
        }

        let coordinator = services(repo, 3);
        let result = coordinator
            .resolve(first_id, account_id, CallDirection::Outbound)
            .await;
        assert!(matches!(result, Err(AppError::MaxDepthExceeded(3))));
    }

    #[tokio::test]
    async fn test_dangling_chain_ends_without_trunk() {
        let repo = Arc::new(InMemoryTrunkRepository::new());
        let account_id = Uuid::new_v4();

        let mut primary = chain_trunk(account_id, 1, Some(Uuid::new_v4()));
        primary.current_active_calls = 1;
        let primary_id = primary.id;
        repo.insert(primary);

        let coordinator = services(repo, 10);
        let result = coordinator
            .resolve(primary_id, account_id, CallDirection::Outbound)
            .await;
        assert!(matches!(result, Err(AppError::NoTrunkAvailable)));
    }

    #[tokio::test]
    async fn test_foreign_account_hop_is_skipped() {
        let repo = Arc::new(InMemoryTrunkRepository::new());
        let account_id = Uuid::new_v4();

        let ours = chain_trunk(account_id, 5, None);
        let ours_id = ours.id;
        let foreign = chain_trunk(Uuid::new_v4(), 5, Some(ours_id));
        let foreign_id = foreign.id;
        let mut primary = chain_trunk(account_id, 1, Some(foreign_id));
        primary.current_active_calls = 1;
        let primary_id = primary.id;
        repo.insert(primary);
        repo.insert(foreign);
        repo.insert(ours);

        let coordinator = services(repo, 10);
        let resolved = coordinator
            .resolve(primary_id, account_id, CallDirection::Outbound)
            .await
            .unwrap();
        // the foreign trunk is never admitted, but its link is followed
        assert_eq!(resolved.id, ours_id);
    }
}
