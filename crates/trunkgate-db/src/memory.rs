//! In-memory storage backend
//!
//! Implements the repository traits over process-local state. Each trunk and
//! call record sits behind its own mutex, so admit/release on one trunk never
//! blocks another trunk and the compare-and-increment stays atomic — the same
//! guarantees the PostgreSQL backend gets from conditional UPDATEs.
//!
//! Used by the test suites and by single-process embedded deployments.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use trunkgate_core::{
    models::{CallRecord, CallState, HealthStatus, Trunk, TrunkStatus},
    traits::{CallRepository, TrunkRepository},
    AppError, AppResult,
};
use uuid::Uuid;

/// In-memory implementation of TrunkRepository
#[derive(Default)]
pub struct InMemoryTrunkRepository {
    trunks: RwLock<HashMap<Uuid, Arc<Mutex<Trunk>>>>,
}

impl InMemoryTrunkRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a trunk directly, bypassing creation defaults (test helper)
    pub fn insert(&self, trunk: Trunk) {
        self.trunks
            .write()
            .insert(trunk.id, Arc::new(Mutex::new(trunk)));
    }

    fn entry(&self, id: Uuid) -> Option<Arc<Mutex<Trunk>>> {
        self.trunks.read().get(&id).cloned()
    }
}

#[async_trait]
impl TrunkRepository for InMemoryTrunkRepository {
    async fn create(&self, trunk: &Trunk) -> AppResult<Trunk> {
        let mut trunks = self.trunks.write();
        if trunks.contains_key(&trunk.id) {
            return Err(AppError::AlreadyExists(trunk.id.to_string()));
        }
        trunks.insert(trunk.id, Arc::new(Mutex::new(trunk.clone())));
        Ok(trunk.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Trunk>> {
        Ok(self.entry(id).map(|t| t.lock().clone()))
    }

    async fn find_by_account(&self, account_id: Uuid) -> AppResult<Vec<Trunk>> {
        let mut trunks: Vec<Trunk> = self
            .trunks
            .read()
            .values()
            .map(|t| t.lock().clone())
            .filter(|t| t.account_id == account_id && !t.is_deleted())
            .collect();

        trunks.sort_by_key(|t| (t.priority, t.current_active_calls, t.id));
        Ok(trunks)
    }

    async fn find_monitorable(&self) -> AppResult<Vec<Trunk>> {
        let mut trunks: Vec<Trunk> = self
            .trunks
            .read()
            .values()
            .map(|t| t.lock().clone())
            .filter(|t| !t.is_deleted())
            .collect();

        trunks.sort_by_key(|t| t.id);
        Ok(trunks)
    }

    async fn try_admit(&self, id: Uuid) -> AppResult<Option<Trunk>> {
        let entry = match self.entry(id) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        // Check and increment under the trunk's own lock; this is the
        // in-process equivalent of the conditional UPDATE.
        let mut trunk = entry.lock();
        if !trunk.is_deleted()
            && trunk.status == TrunkStatus::Active
            && trunk.health_status.is_eligible()
            && trunk.current_active_calls < trunk.max_concurrent_calls
        {
            trunk.current_active_calls += 1;
            trunk.updated_at = Utc::now();
            Ok(Some(trunk.clone()))
        } else {
            Ok(None)
        }
    }

    async fn release(&self, id: Uuid) -> AppResult<bool> {
        let entry = match self.entry(id) {
            Some(entry) => entry,
            None => return Ok(false),
        };

        let mut trunk = entry.lock();
        if trunk.current_active_calls > 0 {
            trunk.current_active_calls -= 1;
            trunk.updated_at = Utc::now();
            Ok(true)
        } else {
            Ok(false)
        }
    }

    async fn update_status(&self, id: Uuid, status: TrunkStatus) -> AppResult<Trunk> {
        let entry = self
            .entry(id)
            .ok_or_else(|| AppError::TrunkNotFound(id.to_string()))?;

        let mut trunk = entry.lock();
        trunk.status = status;
        trunk.updated_at = Utc::now();
        Ok(trunk.clone())
    }

    async fn record_health(
        &self,
        id: Uuid,
        health: HealthStatus,
        latency_ms: Option<f64>,
        packet_loss_percent: Option<f64>,
        checked_at: DateTime<Utc>,
    ) -> AppResult<Trunk> {
        let entry = self
            .entry(id)
            .ok_or_else(|| AppError::TrunkNotFound(id.to_string()))?;

        let mut trunk = entry.lock();
        trunk.health_status = health;
        if latency_ms.is_some() {
            trunk.latency_ms = latency_ms;
        }
        if packet_loss_percent.is_some() {
            trunk.packet_loss_percent = packet_loss_percent;
        }
        trunk.last_health_check = Some(checked_at);
        trunk.updated_at = Utc::now();
        Ok(trunk.clone())
    }

    async fn soft_delete(&self, id: Uuid) -> AppResult<bool> {
        let entry = match self.entry(id) {
            Some(entry) => entry,
            None => return Ok(false),
        };

        let mut trunk = entry.lock();
        if trunk.is_deleted() {
            return Ok(false);
        }
        trunk.deleted_at = Some(Utc::now());
        trunk.status = TrunkStatus::Inactive;
        trunk.updated_at = Utc::now();
        Ok(true)
    }
}

/// In-memory implementation of CallRepository
#[derive(Default)]
pub struct InMemoryCallRepository {
    calls: RwLock<HashMap<Uuid, Arc<Mutex<CallRecord>>>>,
}

impl InMemoryCallRepository {
    /// Create an empty repository
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, id: Uuid) -> Option<Arc<Mutex<CallRecord>>> {
        self.calls.read().get(&id).cloned()
    }
}

#[async_trait]
impl CallRepository for InMemoryCallRepository {
    async fn create(&self, call: &CallRecord) -> AppResult<CallRecord> {
        let mut calls = self.calls.write();
        if calls.contains_key(&call.id) {
            return Err(AppError::AlreadyExists(call.id.to_string()));
        }
        calls.insert(call.id, Arc::new(Mutex::new(call.clone())));
        Ok(call.clone())
    }

    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<CallRecord>> {
        Ok(self.entry(id).map(|c| c.lock().clone()))
    }

    async fn find_by_provider_call_id(
        &self,
        provider_call_id: &str,
    ) -> AppResult<Option<CallRecord>> {
        let calls = self.calls.read();
        let found = calls
            .values()
            .map(|c| c.lock().clone())
            .find(|c| c.provider_call_id.as_deref() == Some(provider_call_id));
        Ok(found)
    }

    async fn update_transition(
        &self,
        id: Uuid,
        expected: CallState,
        updated: &CallRecord,
    ) -> AppResult<Option<CallRecord>> {
        let entry = match self.entry(id) {
            Some(entry) => entry,
            None => return Ok(None),
        };

        // Same-call transitions serialize on the record's own lock; the
        // state check rejects the loser of a duplicate-event race.
        let mut call = entry.lock();
        if call.state != expected {
            return Ok(None);
        }

        let mut applied = updated.clone();
        applied.updated_at = Utc::now();
        *call = applied.clone();
        Ok(Some(applied))
    }

    async fn set_provider_call_id(
        &self,
        id: Uuid,
        provider_call_id: &str,
    ) -> AppResult<CallRecord> {
        let entry = self
            .entry(id)
            .ok_or_else(|| AppError::CallNotFound(id.to_string()))?;

        let mut call = entry.lock();
        call.provider_call_id = Some(provider_call_id.to_string());
        call.updated_at = Utc::now();
        Ok(call.clone())
    }

    async fn find_by_trunk(&self, trunk_id: Uuid, limit: i64) -> AppResult<Vec<CallRecord>> {
        let mut calls: Vec<CallRecord> = self
            .calls
            .read()
            .values()
            .map(|c| c.lock().clone())
            .filter(|c| c.trunk_id == trunk_id)
            .collect();

        calls.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        calls.truncate(limit.max(0) as usize);
        Ok(calls)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use trunkgate_core::models::NewTrunk;

    fn active_trunk(max: i32) -> Trunk {
        let mut trunk = Trunk::from_new(
            Uuid::new_v4(),
            &NewTrunk {
                name: "mem".to_string(),
                sip_domain: "sip.example.com".to_string(),
                max_concurrent_calls: max,
                cost_per_minute: dec!(0.01),
                ..Default::default()
            },
        );
        trunk.status = TrunkStatus::Active;
        trunk
    }

    #[tokio::test]
    async fn test_admit_respects_ceiling() {
        let repo = InMemoryTrunkRepository::new();
        let trunk = active_trunk(2);
        let id = trunk.id;
        repo.insert(trunk);

        assert!(repo.try_admit(id).await.unwrap().is_some());
        assert!(repo.try_admit(id).await.unwrap().is_some());
        assert!(repo.try_admit(id).await.unwrap().is_none());

        let stored = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.current_active_calls, 2);
    }

    #[tokio::test]
    async fn test_release_clamps_at_zero() {
        let repo = InMemoryTrunkRepository::new();
        let trunk = active_trunk(2);
        let id = trunk.id;
        repo.insert(trunk);

        assert!(repo.try_admit(id).await.unwrap().is_some());
        assert!(repo.release(id).await.unwrap());
        assert!(!repo.release(id).await.unwrap());

        let stored = repo.find_by_id(id).await.unwrap().unwrap();
        assert_eq!(stored.current_active_calls, 0);
    }

    #[tokio::test]
    async fn test_admit_rejects_ineligible_health() {
        let repo = InMemoryTrunkRepository::new();
        let mut trunk = active_trunk(2);
        trunk.health_status = HealthStatus::Error;
        let id = trunk.id;
        repo.insert(trunk);

        assert!(repo.try_admit(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_account_ordering() {
        let repo = InMemoryTrunkRepository::new();
        let account_id = Uuid::new_v4();

        let mut a = active_trunk(5);
        a.account_id = account_id;
        a.priority = 1;
        a.current_active_calls = 3;
        let mut b = active_trunk(5);
        b.account_id = account_id;
        b.priority = 1;
        b.current_active_calls = 1;
        let mut c = active_trunk(5);
        c.account_id = account_id;
        c.priority = 2;

        let b_id = b.id;
        repo.insert(a);
        repo.insert(b);
        repo.insert(c);

        let ordered = repo.find_by_account(account_id).await.unwrap();
        assert_eq!(ordered.len(), 3);
        assert_eq!(ordered[0].id, b_id);
    }

    #[tokio::test]
    async fn test_transition_rejects_stale_state() {
        let repo = InMemoryCallRepository::new();
        let call = CallRecord::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            trunkgate_core::models::CallDirection::Outbound,
            "+15550100".to_string(),
            "+15550199".to_string(),
            Utc::now(),
        );
        let id = call.id;
        repo.create(&call).await.unwrap();

        let mut ringing = call.clone();
        ringing.state = CallState::Ringing;
        assert!(repo
            .update_transition(id, CallState::Initiated, &ringing)
            .await
            .unwrap()
            .is_some());

        // same expected-state write again: stale, must not apply
        assert!(repo
            .update_transition(id, CallState::Initiated, &ringing)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_soft_delete_hides_from_account_listing() {
        let repo = InMemoryTrunkRepository::new();
        let trunk = active_trunk(2);
        let account_id = trunk.account_id;
        let id = trunk.id;
        repo.insert(trunk);

        assert!(repo.soft_delete(id).await.unwrap());
        assert!(repo.find_by_account(account_id).await.unwrap().is_empty());
        // but still resolvable by id for historical call records
        assert!(repo.find_by_id(id).await.unwrap().is_some());
        // and not admittable
        assert!(repo.try_admit(id).await.unwrap().is_none());
    }
}
