//! Capacity manager service
//!
//! Enforces `current_active_calls <= max_concurrent_calls` per trunk.
//! Admission is a compare-and-increment delegated to the repository's
//! conditional-update primitive, so concurrent requests against the same
//! trunk can never jointly oversubscribe it. Release is a clamped decrement
//! that tolerates duplicate terminal events.

use std::sync::Arc;
use tracing::{debug, instrument, warn};
use trunkgate_core::{traits::TrunkRepository, AppError, AppResult};
use uuid::Uuid;

/// Capacity manager
///
/// The only mutation point for trunk admission counters. All other
/// components go through `admit`/`release`; none touch the counter directly.
pub struct CapacityManager<R: TrunkRepository> {
    trunk_repo: Arc<R>,
}

impl<R: TrunkRepository> CapacityManager<R> {
    /// Create a new capacity manager
    pub fn new(trunk_repo: Arc<R>) -> Self {
        Self { trunk_repo }
    }

    /// Try to admit one call onto a trunk
    ///
    /// Returns `Ok(true)` and increments the counter when the trunk is
    /// Active, health-eligible, and below its ceiling; `Ok(false)` without
    /// side effects when the trunk is at capacity (including losing an
    /// admission race).
    ///
    /// # Errors
    ///
    /// - `TrunkNotFound` when the trunk is missing or tombstoned
    /// - `TrunkIneligible` when the trunk is not Active or its health
    ///   excludes it (the caller should not have offered it)
    #[instrument(skip(self))]
    pub async fn admit(&self, trunk_id: Uuid) -> AppResult<bool> {
        let trunk = self
            .trunk_repo
            .find_by_id(trunk_id)
            .await?
            .filter(|t| !t.is_deleted())
            .ok_or_else(|| AppError::TrunkNotFound(trunk_id.to_string()))?;

        if !trunk.status.can_carry_calls() {
            return Err(AppError::TrunkIneligible(format!(
                "trunk {} is {}",
                trunk_id, trunk.status
            )));
        }

        if !trunk.health_status.is_eligible() {
            return Err(AppError::TrunkIneligible(format!(
                "trunk {} health is {}",
                trunk_id, trunk.health_status
            )));
        }

        // The conditional update re-checks everything under the row lock;
        // the pre-checks above only exist to classify the failure for the
        // caller.
        match self.trunk_repo.try_admit(trunk_id).await? {
            Some(admitted) => {
                debug!(
                    "Admitted call on trunk {} ({}/{})",
                    trunk_id, admitted.current_active_calls, admitted.max_concurrent_calls
                );
                Ok(true)
            }
            None => {
                debug!("Trunk {} at capacity, admission denied", trunk_id);
                Ok(false)
            }
        }
    }

    /// Release one admission slot on a trunk
    ///
    /// The decrement is clamped at zero: a duplicate release (lifecycle bug
    /// or duplicate terminal event) is logged as an anomaly, never applied.
    #[instrument(skip(self))]
    pub async fn release(&self, trunk_id: Uuid) -> AppResult<()> {
        let released = self.trunk_repo.release(trunk_id).await?;

        if !released {
            match self.trunk_repo.find_by_id(trunk_id).await? {
                Some(_) => warn!(
                    "Release on trunk {} found the counter already at zero",
                    trunk_id
                ),
                None => warn!("Release requested for unknown trunk {}", trunk_id),
            }
        } else {
            debug!("Released one slot on trunk {}", trunk_id);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trunkgate_core::models::{HealthStatus, NewTrunk, Trunk, TrunkStatus};
    use trunkgate_db::InMemoryTrunkRepository;

    fn seeded_trunk(max: i32, status: TrunkStatus) -> Trunk {
        let mut trunk = Trunk::from_new(
            Uuid::new_v4(),
            &NewTrunk {
                name: "cap".to_string(),
                sip_domain: "sip.example.com".to_string(),
                max_concurrent_calls: max,
                cost_per_minute: dec!(0.01),
                ..Default::default()
            },
        );
        trunk.status = status;
        trunk
    }

    #[tokio::test]
    async fn test_admit_until_full() {
        let repo = Arc::new(InMemoryTrunkRepository::new());
        let trunk = seeded_trunk(2, TrunkStatus::Active);
        let id = trunk.id;
        repo.insert(trunk);

        let manager = CapacityManager::new(repo.clone());
        assert!(manager.admit(id).await.unwrap());
        assert!(manager.admit(id).await.unwrap());
        assert!(!manager.admit(id).await.unwrap());

        let stored = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.current_active_calls, 2);
    }

    #[tokio::test]
    async fn test_admit_unknown_trunk() {
        let repo = Arc::new(InMemoryTrunkRepository::new());
        let manager = CapacityManager::new(repo);

        let result = manager.admit(Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::TrunkNotFound(_))));
    }

    #[tokio::test]
    async fn test_admit_inactive_trunk() {
        let repo = Arc::new(InMemoryTrunkRepository::new());
        let trunk = seeded_trunk(2, TrunkStatus::Maintenance);
        let id = trunk.id;
        repo.insert(trunk);

        let manager = CapacityManager::new(repo);
        let result = manager.admit(id).await;
        assert!(matches!(result, Err(AppError::TrunkIneligible(_))));
    }

    #[tokio::test]
    async fn test_admit_error_health_trunk() {
        let repo = Arc::new(InMemoryTrunkRepository::new());
        let mut trunk = seeded_trunk(2, TrunkStatus::Active);
        trunk.health_status = HealthStatus::Error;
        let id = trunk.id;
        repo.insert(trunk);

        let manager = CapacityManager::new(repo);
        let result = manager.admit(id).await;
        assert!(matches!(result, Err(AppError::TrunkIneligible(_))));
    }

    #[tokio::test]
    async fn test_release_is_clamped() {
        let repo = Arc::new(InMemoryTrunkRepository::new());
        let trunk = seeded_trunk(2, TrunkStatus::Active);
        let id = trunk.id;
        repo.insert(trunk);

        let manager = CapacityManager::new(repo.clone());
        assert!(manager.admit(id).await.unwrap());

        manager.release(id).await.unwrap();
        // duplicate release must not drive the counter negative
        manager.release(id).await.unwrap();

        let stored = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.current_active_calls, 0);
    }

    #[tokio::test]
    async fn test_release_unknown_trunk_is_logged_not_fatal() {
        let repo = Arc::new(InMemoryTrunkRepository::new());
        let manager = CapacityManager::new(repo);
        assert!(manager.release(Uuid::new_v4()).await.is_ok());
    }
}
