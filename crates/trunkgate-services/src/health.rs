//! Health monitor service
//!
//! Periodically probes every trunk through its provider client and drives
//! the Active <-> Error status transitions that feed trunk selection.
//! Probes are time-boxed and run with bounded concurrency; a failing or
//! unreachable provider for one trunk never blocks checks for the others.

use chrono::Utc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument, warn};
use trunkgate_core::{
    config::HealthConfig,
    models::{HealthStatus, Trunk, TrunkStatus},
    traits::{ProbeReport, ProviderRegistry, TrunkRepository},
    AppError, AppResult,
};
use uuid::Uuid;

/// Health monitor
///
/// Consecutive-failure counters live in memory beside the monitor; the
/// trunk row carries only the resulting health fields.
pub struct HealthMonitor<R: TrunkRepository> {
    trunk_repo: Arc<R>,
    providers: Arc<ProviderRegistry>,
    config: HealthConfig,
    consecutive_failures: Mutex<HashMap<Uuid, u32>>,
}

impl<R: TrunkRepository> HealthMonitor<R> {
    /// Create a new health monitor
    pub fn new(trunk_repo: Arc<R>, providers: Arc<ProviderRegistry>, config: HealthConfig) -> Self {
        Self {
            trunk_repo,
            providers,
            config,
            consecutive_failures: Mutex::new(HashMap::new()),
        }
    }

    /// Current consecutive-failure count for a trunk
    pub fn failure_count(&self, trunk_id: Uuid) -> u32 {
        self.consecutive_failures
            .lock()
            .get(&trunk_id)
            .copied()
            .unwrap_or(0)
    }

    /// Probe a single trunk on demand
    ///
    /// Returns the health status recorded by this probe. Probe failures are
    /// absorbed into the trunk's health state; only a missing trunk or a
    /// storage fault surfaces as an error.
    #[instrument(skip(self))]
    pub async fn run_once(&self, trunk_id: Uuid) -> AppResult<HealthStatus> {
        let trunk = self
            .trunk_repo
            .find_by_id(trunk_id)
            .await?
            .filter(|t| !t.is_deleted())
            .ok_or_else(|| AppError::TrunkNotFound(trunk_id.to_string()))?;

        Ok(self.probe(&trunk).await)
    }

    /// Probe every non-deleted trunk once, with bounded concurrency
    ///
    /// Individual probe failures are recorded on their trunk and never fail
    /// the sweep.
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> AppResult<()> {
        let trunks = self.trunk_repo.find_monitorable().await?;
        debug!("Probing {} trunk(s)", trunks.len());

        stream::iter(trunks)
            .for_each_concurrent(self.config.max_concurrent_probes, |trunk| async move {
                self.probe(&trunk).await;
            })
            .await;

        Ok(())
    }

    /// Spawn the periodic probe loop
    pub fn spawn(self: Arc<Self>) -> JoinHandle<()>
    where
        R: 'static,
    {
        let interval_secs = self.config.check_interval_secs;
        info!("Health monitor starting with {}s interval", interval_secs);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(interval_secs));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if let Err(e) = self.run_cycle().await {
                    error!("Health monitor cycle failed: {}", e);
                }
            }
        })
    }

    /// Run one probe against a trunk and fold the outcome into its state
    async fn probe(&self, trunk: &Trunk) -> HealthStatus {
        let timeout = Duration::from_secs(self.config.probe_timeout_secs);

        let report = match self.providers.get(trunk.provider) {
            Ok(client) => match tokio::time::timeout(timeout, client.health_check(trunk)).await {
                Ok(Ok(report)) if report.healthy => Some(report),
                Ok(Ok(_report)) => {
                    debug!(
                        "Trunk {} reported unhealthy by provider {}",
                        trunk.id, trunk.provider
                    );
                    None
                }
                Ok(Err(e)) => {
                    warn!("Probe failed for trunk {}: {}", trunk.id, e);
                    None
                }
                Err(_) => {
                    warn!(
                        "Probe timed out for trunk {} after {}s",
                        trunk.id, self.config.probe_timeout_secs
                    );
                    None
                }
            },
            Err(e) => {
                warn!("No provider client for trunk {}: {}", trunk.id, e);
                None
            }
        };

        match report {
            Some(report) => self.record_success(trunk, report).await,
            None => self.record_failure(trunk).await,
        }
    }

    async fn record_success(&self, trunk: &Trunk, report: ProbeReport) -> HealthStatus {
        self.consecutive_failures.lock().remove(&trunk.id);

        if let Err(e) = self
            .trunk_repo
            .record_health(
                trunk.id,
                HealthStatus::Healthy,
                report.latency_ms,
                report.packet_loss_percent,
                Utc::now(),
            )
            .await
        {
            error!("Failed to record healthy probe for trunk {}: {}", trunk.id, e);
            return trunk.health_status;
        }

        if trunk.status == TrunkStatus::Error {
            info!("Trunk {} recovered, restoring Active status", trunk.id);
            if let Err(e) = self
                .trunk_repo
                .update_status(trunk.id, TrunkStatus::Active)
                .await
            {
                error!("Failed to restore trunk {} to Active: {}", trunk.id, e);
            }
        }

        HealthStatus::Healthy
    }

    async fn record_failure(&self, trunk: &Trunk) -> HealthStatus {
        let failures = {
            let mut map = self.consecutive_failures.lock();
            let counter = map.entry(trunk.id).or_insert(0);
            *counter += 1;
            *counter
        };

        let now = Utc::now();

        if failures >= self.config.failure_threshold {
            warn!(
                "Trunk {} failed {} consecutive probes, marking Error",
                trunk.id, failures
            );

            if let Err(e) = self
                .trunk_repo
                .record_health(trunk.id, HealthStatus::Error, None, None, now)
                .await
            {
                error!("Failed to record error health for trunk {}: {}", trunk.id, e);
            }
            if trunk.status != TrunkStatus::Error {
                if let Err(e) = self
                    .trunk_repo
                    .update_status(trunk.id, TrunkStatus::Error)
                    .await
                {
                    error!("Failed to mark trunk {} as Error: {}", trunk.id, e);
                }
            }
            HealthStatus::Error
        } else {
            debug!(
                "Trunk {} probe failure {}/{}",
                trunk.id, failures, self.config.failure_threshold
            );

            // Stamp the check time but keep the current health status:
            // eligibility flips exactly at the threshold, not before.
            if let Err(e) = self
                .trunk_repo
                .record_health(trunk.id, trunk.health_status, None, None, now)
                .await
            {
                error!("Failed to stamp failed probe for trunk {}: {}", trunk.id, e);
            }
            trunk.health_status
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;
    use rust_decimal_macros::dec;
    use trunkgate_core::models::{NewTrunk, TrunkProvider};
    use trunkgate_core::traits::TelephonyProviderClient;
    use trunkgate_db::InMemoryTrunkRepository;

    /// Provider client whose probe outcome can be flipped per trunk
    struct ScriptedClient {
        failing: PlMutex<std::collections::HashSet<Uuid>>,
    }

    impl ScriptedClient {
        fn new() -> Self {
            Self {
                failing: PlMutex::new(std::collections::HashSet::new()),
            }
        }

        fn set_failing(&self, trunk_id: Uuid, failing: bool) {
            let mut set = self.failing.lock();
            if failing {
                set.insert(trunk_id);
            } else {
                set.remove(&trunk_id);
            }
        }
    }

    #[async_trait]
    impl TelephonyProviderClient for ScriptedClient {
        fn provider(&self) -> TrunkProvider {
            TrunkProvider::Custom
        }

        async fn initialize(&self, _trunk: &Trunk) -> AppResult<()> {
            Ok(())
        }

        async fn health_check(&self, trunk: &Trunk) -> AppResult<ProbeReport> {
            if self.failing.lock().contains(&trunk.id) {
                Err(AppError::ProviderError {
                    provider: "custom".to_string(),
                    message: "endpoint unreachable".to_string(),
                })
            } else {
                Ok(ProbeReport::healthy(12.5))
            }
        }

        async fn make_call(
            &self,
            _trunk: &Trunk,
            _from_number: &str,
            _to_number: &str,
        ) -> AppResult<String> {
            Ok("scripted".to_string())
        }

        async fn hangup_call(&self, _trunk: &Trunk, _provider_call_id: &str) -> AppResult<()> {
            Ok(())
        }
    }

    struct Fixture {
        repo: Arc<InMemoryTrunkRepository>,
        client: Arc<ScriptedClient>,
        monitor: Arc<HealthMonitor<InMemoryTrunkRepository>>,
    }

    fn fixture() -> Fixture {
        let repo = Arc::new(InMemoryTrunkRepository::new());
        let client = Arc::new(ScriptedClient::new());

        let mut registry = ProviderRegistry::new();
        registry.register(client.clone());

        let monitor = Arc::new(HealthMonitor::new(
            repo.clone(),
            Arc::new(registry),
            HealthConfig {
                check_interval_secs: 60,
                failure_threshold: 3,
                probe_timeout_secs: 1,
                max_concurrent_probes: 4,
            },
        ));

        Fixture {
            repo,
            client,
            monitor,
        }
    }

    fn active_trunk() -> Trunk {
        let mut trunk = Trunk::from_new(
            Uuid::new_v4(),
            &NewTrunk {
                name: "probed".to_string(),
                sip_domain: "sip.example.com".to_string(),
                cost_per_minute: dec!(0.01),
                ..Default::default()
            },
        );
        trunk.status = TrunkStatus::Active;
        trunk
    }

    #[tokio::test]
    async fn test_three_failures_mark_trunk_error() {
        let fx = fixture();
        let trunk = active_trunk();
        let id = trunk.id;
        fx.repo.insert(trunk);
        fx.client.set_failing(id, true);

        fx.monitor.run_once(id).await.unwrap();
        fx.monitor.run_once(id).await.unwrap();
        let stored = fx.repo.find_by_id(id).await.unwrap().unwrap();
        // below the threshold nothing is demoted
        assert_eq!(stored.status, TrunkStatus::Active);
        assert_eq!(stored.health_status, HealthStatus::Unknown);
        assert!(stored.last_health_check.is_some());

        fx.monitor.run_once(id).await.unwrap();
        let stored = fx.repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, TrunkStatus::Error);
        assert_eq!(stored.health_status, HealthStatus::Error);
        assert!(!stored.is_selectable(trunkgate_core::models::CallDirection::Outbound));
    }

    #[tokio::test]
    async fn test_single_success_restores_error_trunk() {
        let fx = fixture();
        let trunk = active_trunk();
        let id = trunk.id;
        fx.repo.insert(trunk);

        fx.client.set_failing(id, true);
        for _ in 0..3 {
            fx.monitor.run_once(id).await.unwrap();
        }
        assert_eq!(
            fx.repo.find_by_id(id).await.unwrap().unwrap().status,
            TrunkStatus::Error
        );

        fx.client.set_failing(id, false);
        fx.monitor.run_once(id).await.unwrap();

        let stored = fx.repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, TrunkStatus::Active);
        assert_eq!(stored.health_status, HealthStatus::Healthy);
        assert_eq!(stored.latency_ms, Some(12.5));
        assert_eq!(fx.monitor.failure_count(id), 0);
    }

    #[tokio::test]
    async fn test_success_resets_failure_streak() {
        let fx = fixture();
        let trunk = active_trunk();
        let id = trunk.id;
        fx.repo.insert(trunk);

        fx.client.set_failing(id, true);
        fx.monitor.run_once(id).await.unwrap();
        fx.monitor.run_once(id).await.unwrap();
        assert_eq!(fx.monitor.failure_count(id), 2);

        fx.client.set_failing(id, false);
        fx.monitor.run_once(id).await.unwrap();
        assert_eq!(fx.monitor.failure_count(id), 0);

        // two more failures are again below the threshold
        fx.client.set_failing(id, true);
        fx.monitor.run_once(id).await.unwrap();
        fx.monitor.run_once(id).await.unwrap();
        assert_eq!(
            fx.repo.find_by_id(id).await.unwrap().unwrap().status,
            TrunkStatus::Active
        );
    }

    #[tokio::test]
    async fn test_one_failing_trunk_does_not_block_others() {
        let fx = fixture();
        let bad = active_trunk();
        let bad_id = bad.id;
        let good = active_trunk();
        let good_id = good.id;
        fx.repo.insert(bad);
        fx.repo.insert(good);
        fx.client.set_failing(bad_id, true);

        for _ in 0..3 {
            fx.monitor.run_cycle().await.unwrap();
        }

        let bad_stored = fx.repo.find_by_id(bad_id).await.unwrap().unwrap();
        let good_stored = fx.repo.find_by_id(good_id).await.unwrap().unwrap();
        assert_eq!(bad_stored.status, TrunkStatus::Error);
        assert_eq!(good_stored.status, TrunkStatus::Active);
        assert_eq!(good_stored.health_status, HealthStatus::Healthy);
    }

    #[tokio::test]
    async fn test_missing_provider_counts_as_failure() {
        let repo = Arc::new(InMemoryTrunkRepository::new());
        // empty registry: no client for any provider
        let monitor = Arc::new(HealthMonitor::new(
            repo.clone(),
            Arc::new(ProviderRegistry::new()),
            HealthConfig {
                failure_threshold: 1,
                ..HealthConfig::default()
            },
        ));

        let trunk = active_trunk();
        let id = trunk.id;
        repo.insert(trunk);

        monitor.run_once(id).await.unwrap();
        let stored = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.status, TrunkStatus::Error);
    }

    #[tokio::test]
    async fn test_run_once_unknown_trunk() {
        let fx = fixture();
        let result = fx.monitor.run_once(Uuid::new_v4()).await;
        assert!(matches!(result, Err(AppError::TrunkNotFound(_))));
    }
}
