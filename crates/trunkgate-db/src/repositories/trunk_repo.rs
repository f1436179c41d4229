//! Trunk repository implementation
//!
//! Provides PostgreSQL-backed storage for trunks. The admission counter is
//! mutated exclusively through conditional UPDATEs so that concurrent
//! admit/release requests against the same trunk can never jointly exceed
//! the configured ceiling or drive the counter negative.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, error, instrument, warn};
use trunkgate_core::{
    models::{CallDirection, HealthStatus, Trunk, TrunkProvider, TrunkStatus},
    traits::TrunkRepository,
    AppError, AppResult,
};
use uuid::Uuid;

/// Column list shared by every query returning full trunk rows
const TRUNK_COLUMNS: &str = r#"
    id, account_id, name, description, provider, status,
    sip_domain, sip_port, call_direction,
    max_concurrent_calls, current_active_calls, priority,
    health_status, latency_ms, packet_loss_percent, last_health_check,
    failover_trunk_id, cost_per_minute,
    created_at, updated_at, deleted_at
"#;

/// PostgreSQL implementation of TrunkRepository
pub struct PgTrunkRepository {
    pool: PgPool,
}

impl PgTrunkRepository {
    /// Create a new trunk repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TrunkRepository for PgTrunkRepository {
    #[instrument(skip(self, trunk))]
    async fn create(&self, trunk: &Trunk) -> AppResult<Trunk> {
        debug!("Creating trunk {} for account {}", trunk.name, trunk.account_id);

        let row = sqlx::query_as::<sqlx::Postgres, TrunkRow>(&format!(
            r#"
            INSERT INTO trunks (
                id, account_id, name, description, provider, status,
                sip_domain, sip_port, call_direction,
                max_concurrent_calls, current_active_calls, priority,
                health_status, failover_trunk_id, cost_per_minute
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING {TRUNK_COLUMNS}
            "#
        ))
        .bind(trunk.id)
        .bind(trunk.account_id)
        .bind(&trunk.name)
        .bind(&trunk.description)
        .bind(trunk.provider.to_string())
        .bind(trunk.status.to_string())
        .bind(&trunk.sip_domain)
        .bind(trunk.sip_port)
        .bind(trunk.call_direction.to_string())
        .bind(trunk.max_concurrent_calls)
        .bind(trunk.current_active_calls)
        .bind(trunk.priority)
        .bind(trunk.health_status.to_string())
        .bind(trunk.failover_trunk_id)
        .bind(trunk.cost_per_minute)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error creating trunk: {}", e);
            AppError::Database(format!("Failed to create trunk: {}", e))
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<Trunk>> {
        let result = sqlx::query_as::<sqlx::Postgres, TrunkRow>(&format!(
            r#"
            SELECT {TRUNK_COLUMNS}
            FROM trunks
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding trunk {}: {}", id, e);
            AppError::Database(format!("Failed to find trunk: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_by_account(&self, account_id: Uuid) -> AppResult<Vec<Trunk>> {
        debug!("Finding trunks for account {}", account_id);

        let rows = sqlx::query_as::<sqlx::Postgres, TrunkRow>(&format!(
            r#"
            SELECT {TRUNK_COLUMNS}
            FROM trunks
            WHERE account_id = $1
                AND deleted_at IS NULL
            ORDER BY priority ASC, current_active_calls ASC, id ASC
            "#
        ))
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding account trunks: {}", e);
            AppError::Database(format!("Failed to fetch trunks: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn find_monitorable(&self) -> AppResult<Vec<Trunk>> {
        let rows = sqlx::query_as::<sqlx::Postgres, TrunkRow>(&format!(
            r#"
            SELECT {TRUNK_COLUMNS}
            FROM trunks
            WHERE deleted_at IS NULL
            ORDER BY id ASC
            "#
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing monitorable trunks: {}", e);
            AppError::Database(format!("Failed to fetch trunks: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn try_admit(&self, id: Uuid) -> AppResult<Option<Trunk>> {
        // Compare-and-increment in one statement: the WHERE clause re-checks
        // eligibility and headroom under the row lock, so concurrent admits
        // can never push the counter past the ceiling.
        let row = sqlx::query_as::<sqlx::Postgres, TrunkRow>(&format!(
            r#"
            UPDATE trunks
            SET current_active_calls = current_active_calls + 1,
                updated_at = NOW()
            WHERE id = $1
                AND deleted_at IS NULL
                AND status = 'active'
                AND health_status IN ('healthy', 'unknown')
                AND current_active_calls < max_concurrent_calls
            RETURNING {TRUNK_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error admitting call on trunk {}: {}", id, e);
            AppError::Database(format!("Failed to admit call: {}", e))
        })?;

        if row.is_none() {
            debug!("Admission condition failed for trunk {}", id);
        }

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn release(&self, id: Uuid) -> AppResult<bool> {
        // Guarded decrement: a duplicate release finds the counter already
        // consumed and affects zero rows instead of going negative.
        let result = sqlx::query(
            r#"
            UPDATE trunks
            SET current_active_calls = current_active_calls - 1,
                updated_at = NOW()
            WHERE id = $1
                AND current_active_calls > 0
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error releasing call on trunk {}: {}", id, e);
            AppError::Database(format!("Failed to release call: {}", e))
        })?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn update_status(&self, id: Uuid, status: TrunkStatus) -> AppResult<Trunk> {
        debug!("Updating trunk {} status to {}", id, status);

        let row = sqlx::query_as::<sqlx::Postgres, TrunkRow>(&format!(
            r#"
            UPDATE trunks
            SET status = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TRUNK_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error updating trunk status: {}", e);
            AppError::Database(format!("Failed to update trunk status: {}", e))
        })?;

        row.map(Into::into)
            .ok_or_else(|| AppError::TrunkNotFound(id.to_string()))
    }

    #[instrument(skip(self))]
    async fn record_health(
        &self,
        id: Uuid,
        health: HealthStatus,
        latency_ms: Option<f64>,
        packet_loss_percent: Option<f64>,
        checked_at: DateTime<Utc>,
    ) -> AppResult<Trunk> {
        let row = sqlx::query_as::<sqlx::Postgres, TrunkRow>(&format!(
            r#"
            UPDATE trunks
            SET health_status = $2,
                latency_ms = COALESCE($3, latency_ms),
                packet_loss_percent = COALESCE($4, packet_loss_percent),
                last_health_check = $5,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {TRUNK_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(health.to_string())
        .bind(latency_ms)
        .bind(packet_loss_percent)
        .bind(checked_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error recording trunk health: {}", e);
            AppError::Database(format!("Failed to record health: {}", e))
        })?;

        row.map(Into::into)
            .ok_or_else(|| AppError::TrunkNotFound(id.to_string()))
    }

    #[instrument(skip(self))]
    async fn soft_delete(&self, id: Uuid) -> AppResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE trunks
            SET deleted_at = NOW(),
                status = 'inactive',
                updated_at = NOW()
            WHERE id = $1
                AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error tombstoning trunk {}: {}", id, e);
            AppError::Database(format!("Failed to delete trunk: {}", e))
        })?;

        let deleted = result.rows_affected() > 0;
        if !deleted {
            warn!("Tombstone requested for missing or already deleted trunk {}", id);
        }

        Ok(deleted)
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct TrunkRow {
    id: Uuid,
    account_id: Uuid,
    name: String,
    description: Option<String>,
    provider: String,
    status: String,
    sip_domain: String,
    sip_port: i32,
    call_direction: String,
    max_concurrent_calls: i32,
    current_active_calls: i32,
    priority: i32,
    health_status: String,
    latency_ms: Option<f64>,
    packet_loss_percent: Option<f64>,
    last_health_check: Option<DateTime<Utc>>,
    failover_trunk_id: Option<Uuid>,
    cost_per_minute: Decimal,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    deleted_at: Option<DateTime<Utc>>,
}

impl From<TrunkRow> for Trunk {
    fn from(row: TrunkRow) -> Self {
        Self {
            id: row.id,
            account_id: row.account_id,
            name: row.name,
            description: row.description,
            provider: TrunkProvider::from_str(&row.provider).unwrap_or(TrunkProvider::Custom),
            status: TrunkStatus::from_str(&row.status).unwrap_or(TrunkStatus::Inactive),
            sip_domain: row.sip_domain,
            sip_port: row.sip_port,
            call_direction: CallDirection::from_str(&row.call_direction)
                .unwrap_or(CallDirection::Bidirectional),
            max_concurrent_calls: row.max_concurrent_calls,
            current_active_calls: row.current_active_calls,
            priority: row.priority,
            health_status: HealthStatus::from_str(&row.health_status)
                .unwrap_or(HealthStatus::Unknown),
            latency_ms: row.latency_ms,
            packet_loss_percent: row.packet_loss_percent,
            last_health_check: row.last_health_check,
            failover_trunk_id: row.failover_trunk_id,
            cost_per_minute: row.cost_per_minute,
            created_at: row.created_at,
            updated_at: row.updated_at,
            deleted_at: row.deleted_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // Requires database
    async fn test_admit_release_round_trip() {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/trunkgate".to_string());
        let pool = crate::create_pool(&database_url, Some(5)).await.unwrap();
        let repo = PgTrunkRepository::new(pool);

        let mut trunk = Trunk::from_new(
            Uuid::new_v4(),
            &trunkgate_core::models::NewTrunk {
                name: "it-trunk".to_string(),
                sip_domain: "sip.example.com".to_string(),
                max_concurrent_calls: 1,
                ..Default::default()
            },
        );
        trunk.status = TrunkStatus::Active;
        let trunk = repo.create(&trunk).await.unwrap();

        let admitted = repo.try_admit(trunk.id).await.unwrap();
        assert!(admitted.is_some());
        assert_eq!(admitted.unwrap().current_active_calls, 1);

        // second admit must hit the ceiling
        assert!(repo.try_admit(trunk.id).await.unwrap().is_none());

        assert!(repo.release(trunk.id).await.unwrap());
        assert!(!repo.release(trunk.id).await.unwrap());
    }
}
