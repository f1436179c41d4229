//! Call record repository implementation
//!
//! PostgreSQL-backed storage for call records. Transitions are persisted
//! with a state-conditioned UPDATE so that two racing transitions for the
//! same call cannot both apply; the loser observes zero affected rows.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tracing::{debug, error, instrument};
use trunkgate_core::{
    models::{CallDirection, CallRecord, CallState},
    traits::CallRepository,
    AppError, AppResult,
};
use uuid::Uuid;

/// Column list shared by every query returning full call rows
const CALL_COLUMNS: &str = r#"
    id, account_id, trunk_id, conversation_id, provider_call_id,
    direction, from_number, to_number, state,
    started_at, answered_at, ended_at,
    duration_seconds, cost, hangup_cause, capacity_released,
    created_at, updated_at
"#;

/// PostgreSQL implementation of CallRepository
pub struct PgCallRepository {
    pool: PgPool,
}

impl PgCallRepository {
    /// Create a new call repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallRepository for PgCallRepository {
    #[instrument(skip(self, call))]
    async fn create(&self, call: &CallRecord) -> AppResult<CallRecord> {
        debug!("Creating call record {} on trunk {}", call.id, call.trunk_id);

        let row = sqlx::query_as::<sqlx::Postgres, CallRow>(&format!(
            r#"
            INSERT INTO call_records (
                id, account_id, trunk_id, conversation_id, provider_call_id,
                direction, from_number, to_number, state,
                started_at, answered_at, ended_at,
                duration_seconds, cost, hangup_cause, capacity_released
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            RETURNING {CALL_COLUMNS}
            "#
        ))
        .bind(call.id)
        .bind(call.account_id)
        .bind(call.trunk_id)
        .bind(call.conversation_id)
        .bind(&call.provider_call_id)
        .bind(call.direction.to_string())
        .bind(&call.from_number)
        .bind(&call.to_number)
        .bind(call.state.to_string())
        .bind(call.started_at)
        .bind(call.answered_at)
        .bind(call.ended_at)
        .bind(call.duration_seconds)
        .bind(call.cost)
        .bind(&call.hangup_cause)
        .bind(call.capacity_released)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error creating call record: {}", e);
            AppError::Database(format!("Failed to create call record: {}", e))
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn find_by_id(&self, id: Uuid) -> AppResult<Option<CallRecord>> {
        let result = sqlx::query_as::<sqlx::Postgres, CallRow>(&format!(
            r#"
            SELECT {CALL_COLUMNS}
            FROM call_records
            WHERE id = $1
            "#
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding call {}: {}", id, e);
            AppError::Database(format!("Failed to find call: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_by_provider_call_id(
        &self,
        provider_call_id: &str,
    ) -> AppResult<Option<CallRecord>> {
        let result = sqlx::query_as::<sqlx::Postgres, CallRow>(&format!(
            r#"
            SELECT {CALL_COLUMNS}
            FROM call_records
            WHERE provider_call_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#
        ))
        .bind(provider_call_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error finding call by provider id: {}", e);
            AppError::Database(format!("Failed to find call: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self, updated))]
    async fn update_transition(
        &self,
        id: Uuid,
        expected: CallState,
        updated: &CallRecord,
    ) -> AppResult<Option<CallRecord>> {
        // Optimistic state check: only the transition computed against the
        // current state applies; a concurrent writer's stale update matches
        // zero rows and is rejected upstream as InvalidTransition.
        let row = sqlx::query_as::<sqlx::Postgres, CallRow>(&format!(
            r#"
            UPDATE call_records
            SET state = $3,
                answered_at = $4,
                ended_at = $5,
                duration_seconds = $6,
                cost = $7,
                hangup_cause = $8,
                capacity_released = $9,
                updated_at = NOW()
            WHERE id = $1
                AND state = $2
            RETURNING {CALL_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(expected.to_string())
        .bind(updated.state.to_string())
        .bind(updated.answered_at)
        .bind(updated.ended_at)
        .bind(updated.duration_seconds)
        .bind(updated.cost)
        .bind(&updated.hangup_cause)
        .bind(updated.capacity_released)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error persisting call transition: {}", e);
            AppError::Database(format!("Failed to persist transition: {}", e))
        })?;

        if row.is_none() {
            debug!(
                "Transition for call {} lost the race (expected state {})",
                id, expected
            );
        }

        Ok(row.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn set_provider_call_id(
        &self,
        id: Uuid,
        provider_call_id: &str,
    ) -> AppResult<CallRecord> {
        let row = sqlx::query_as::<sqlx::Postgres, CallRow>(&format!(
            r#"
            UPDATE call_records
            SET provider_call_id = $2,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {CALL_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(provider_call_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error setting provider call id: {}", e);
            AppError::Database(format!("Failed to update call: {}", e))
        })?;

        row.map(Into::into)
            .ok_or_else(|| AppError::CallNotFound(id.to_string()))
    }

    #[instrument(skip(self))]
    async fn find_by_trunk(&self, trunk_id: Uuid, limit: i64) -> AppResult<Vec<CallRecord>> {
        let rows = sqlx::query_as::<sqlx::Postgres, CallRow>(&format!(
            r#"
            SELECT {CALL_COLUMNS}
            FROM call_records
            WHERE trunk_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#
        ))
        .bind(trunk_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Database error listing trunk calls: {}", e);
            AppError::Database(format!("Failed to fetch calls: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct CallRow {
    id: Uuid,
    account_id: Uuid,
    trunk_id: Uuid,
    conversation_id: Option<Uuid>,
    provider_call_id: Option<String>,
    direction: String,
    from_number: String,
    to_number: String,
    state: String,
    started_at: DateTime<Utc>,
    answered_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    duration_seconds: Option<i32>,
    cost: Option<Decimal>,
    hangup_cause: Option<String>,
    capacity_released: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<CallRow> for CallRecord {
    fn from(row: CallRow) -> Self {
        Self {
            id: row.id,
            account_id: row.account_id,
            trunk_id: row.trunk_id,
            conversation_id: row.conversation_id,
            provider_call_id: row.provider_call_id,
            direction: CallDirection::from_str(&row.direction)
                .unwrap_or(CallDirection::Outbound),
            from_number: row.from_number,
            to_number: row.to_number,
            state: CallState::from_str(&row.state).unwrap_or(CallState::Initiated),
            started_at: row.started_at,
            answered_at: row.answered_at,
            ended_at: row.ended_at,
            duration_seconds: row.duration_seconds,
            cost: row.cost,
            hangup_cause: row.hangup_cause,
            capacity_released: row.capacity_released,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
