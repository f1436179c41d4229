//! Trunk provisioning service
//!
//! Creates trunks, initializes them with their provider, and tombstones them
//! on deletion. Trunks are created Inactive and only become Active after a
//! successful provider initialization; an initialization failure parks them
//! in Error without failing the creation request.

use crate::health::HealthMonitor;
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use trunkgate_core::{
    models::{NewTrunk, Trunk, TrunkStatus},
    traits::{ProviderRegistry, TrunkRepository},
    AppError, AppResult,
};
use uuid::Uuid;
use validator::Validate;

/// Trunk provisioning service
pub struct TrunkService<R: TrunkRepository> {
    trunk_repo: Arc<R>,
    providers: Arc<ProviderRegistry>,
    health: Arc<HealthMonitor<R>>,
}

impl<R: TrunkRepository> TrunkService<R> {
    /// Create a new trunk service
    pub fn new(
        trunk_repo: Arc<R>,
        providers: Arc<ProviderRegistry>,
        health: Arc<HealthMonitor<R>>,
    ) -> Self {
        Self {
            trunk_repo,
            providers,
            health,
        }
    }

    /// Create a trunk for an account
    ///
    /// The trunk is persisted Inactive, initialized with its provider
    /// (success promotes it to Active, failure marks it Error), and given an
    /// initial health probe.
    #[instrument(skip(self, input))]
    pub async fn create_trunk(&self, account_id: Uuid, input: NewTrunk) -> AppResult<Trunk> {
        input.validate()?;

        let trunk = Trunk::from_new(account_id, &input);
        let trunk = self.trunk_repo.create(&trunk).await?;

        let trunk = match self.providers.get(trunk.provider) {
            Ok(client) => match client.initialize(&trunk).await {
                Ok(()) => {
                    self.trunk_repo
                        .update_status(trunk.id, TrunkStatus::Active)
                        .await?
                }
                Err(e) => {
                    error!("Provider initialization failed for trunk {}: {}", trunk.id, e);
                    self.trunk_repo
                        .update_status(trunk.id, TrunkStatus::Error)
                        .await?
                }
            },
            Err(e) => {
                warn!("Cannot initialize trunk {}: {}", trunk.id, e);
                self.trunk_repo
                    .update_status(trunk.id, TrunkStatus::Error)
                    .await?
            }
        };

        // seed the health fields; outcome is reflected on the trunk row
        if let Err(e) = self.health.run_once(trunk.id).await {
            warn!("Initial health check for trunk {} failed: {}", trunk.id, e);
        }

        info!("Created trunk {} for account {}", trunk.id, account_id);
        self.trunk_repo
            .find_by_id(trunk.id)
            .await?
            .ok_or_else(|| AppError::TrunkNotFound(trunk.id.to_string()))
    }

    /// Fetch one of an account's trunks
    pub async fn get_trunk(&self, account_id: Uuid, trunk_id: Uuid) -> AppResult<Option<Trunk>> {
        let trunk = self
            .trunk_repo
            .find_by_id(trunk_id)
            .await?
            .filter(|t| t.account_id == account_id && !t.is_deleted());
        Ok(trunk)
    }

    /// List an account's trunks in selection order
    pub async fn list_trunks(&self, account_id: Uuid) -> AppResult<Vec<Trunk>> {
        self.trunk_repo.find_by_account(account_id).await
    }

    /// Tombstone a trunk
    ///
    /// Refused while the trunk still carries active calls; historical call
    /// records keep referencing the tombstoned row.
    #[instrument(skip(self))]
    pub async fn delete_trunk(&self, account_id: Uuid, trunk_id: Uuid) -> AppResult<bool> {
        let trunk = self
            .trunk_repo
            .find_by_id(trunk_id)
            .await?
            .filter(|t| t.account_id == account_id && !t.is_deleted())
            .ok_or_else(|| AppError::TrunkNotFound(trunk_id.to_string()))?;

        if trunk.current_active_calls > 0 {
            return Err(AppError::ActiveCallsPresent {
                trunk_id: trunk_id.to_string(),
                active: trunk.current_active_calls,
            });
        }

        let deleted = self.trunk_repo.soft_delete(trunk_id).await?;
        if deleted {
            info!("Deleted trunk {} for account {}", trunk_id, account_id);
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use trunkgate_core::config::HealthConfig;
    use trunkgate_core::models::TrunkProvider;
    use trunkgate_core::traits::{ProbeReport, TelephonyProviderClient};
    use trunkgate_db::InMemoryTrunkRepository;

    struct StubClient {
        init_fails: bool,
    }

    #[async_trait]
    impl TelephonyProviderClient for StubClient {
        fn provider(&self) -> TrunkProvider {
            TrunkProvider::Custom
        }

        async fn initialize(&self, _trunk: &Trunk) -> AppResult<()> {
            if self.init_fails {
                Err(AppError::ProviderError {
                    provider: "custom".to_string(),
                    message: "bad credentials".to_string(),
                })
            } else {
                Ok(())
            }
        }

        async fn health_check(&self, _trunk: &Trunk) -> AppResult<ProbeReport> {
            // the same bad credentials that break initialize break the probe
            if self.init_fails {
                Err(AppError::ProviderError {
                    provider: "custom".to_string(),
                    message: "bad credentials".to_string(),
                })
            } else {
                Ok(ProbeReport::healthy(5.0))
            }
        }

        async fn make_call(
            &self,
            _trunk: &Trunk,
            _from_number: &str,
            _to_number: &str,
        ) -> AppResult<String> {
            Ok("stub".to_string())
        }

        async fn hangup_call(&self, _trunk: &Trunk, _provider_call_id: &str) -> AppResult<()> {
            Ok(())
        }
    }

    fn service(init_fails: bool) -> (Arc<InMemoryTrunkRepository>, TrunkService<InMemoryTrunkRepository>) {
        let repo = Arc::new(InMemoryTrunkRepository::new());
        let mut registry = ProviderRegistry::new();
        registry.register(Arc::new(StubClient { init_fails }));
        let registry = Arc::new(registry);

        let health = Arc::new(HealthMonitor::new(
            repo.clone(),
            registry.clone(),
            HealthConfig::default(),
        ));

        (repo.clone(), TrunkService::new(repo, registry, health))
    }

    fn input() -> NewTrunk {
        NewTrunk {
            name: "primary".to_string(),
            sip_domain: "sip.example.com".to_string(),
            cost_per_minute: dec!(0.01),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_promotes_to_active() {
        let (_repo, service) = service(false);
        let trunk = service.create_trunk(Uuid::new_v4(), input()).await.unwrap();
        assert_eq!(trunk.status, TrunkStatus::Active);
        // initial probe already ran
        assert!(trunk.last_health_check.is_some());
    }

    #[tokio::test]
    async fn test_failed_initialization_parks_in_error() {
        let (_repo, service) = service(true);
        let trunk = service.create_trunk(Uuid::new_v4(), input()).await.unwrap();
        assert_eq!(trunk.status, TrunkStatus::Error);
    }

    #[tokio::test]
    async fn test_create_rejects_invalid_input() {
        let (_repo, service) = service(false);
        let bad = NewTrunk {
            max_concurrent_calls: 0,
            ..input()
        };
        let result = service.create_trunk(Uuid::new_v4(), bad).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
    }

    #[tokio::test]
    async fn test_delete_refused_with_active_calls() {
        let (repo, service) = service(false);
        let account_id = Uuid::new_v4();
        let trunk = service.create_trunk(account_id, input()).await.unwrap();

        assert!(repo.try_admit(trunk.id).await.unwrap().is_some());
        let result = service.delete_trunk(account_id, trunk.id).await;
        assert!(matches!(result, Err(AppError::ActiveCallsPresent { .. })));

        assert!(repo.release(trunk.id).await.unwrap());
        assert!(service.delete_trunk(account_id, trunk.id).await.unwrap());
        assert!(service
            .get_trunk(account_id, trunk.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_foreign_trunk_not_found() {
        let (_repo, service) = service(false);
        let trunk = service.create_trunk(Uuid::new_v4(), input()).await.unwrap();

        let result = service.delete_trunk(Uuid::new_v4(), trunk.id).await;
        assert!(matches!(result, Err(AppError::TrunkNotFound(_))));
    }
}
