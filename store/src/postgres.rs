//! PostgreSQL rate store.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::FromRow;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use ratekeeper_common::{
    to_uuids, CurrencyPair, RateError, RateRequest, RateRequestId, RateStatus, Result,
};

use crate::RateStore;

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS currencies_rates (
    id              UUID PRIMARY KEY,
    idempotency_key TEXT NOT NULL UNIQUE,
    base_currency   TEXT NOT NULL,
    result_currency TEXT NOT NULL,
    status          TEXT NOT NULL,
    rate            NUMERIC,
    completed_at    TIMESTAMPTZ,
    created_at      TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL,
    CHECK (base_currency <> result_currency)
)
"#;

const CREATE_PENDING_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS currencies_rates_status_created_at_idx
    ON currencies_rates (status, created_at)
"#;

const CREATE_PAIR_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS currencies_rates_pair_completed_at_idx
    ON currencies_rates (base_currency, result_currency, completed_at DESC)
    WHERE status = 'COMPLETED'
"#;

const COLUMNS: &str = "id, idempotency_key, base_currency, result_currency, status, rate, completed_at, created_at, updated_at";

/// Row shape of `currencies_rates`.
#[derive(Debug, FromRow)]
struct RateRow {
    id: Uuid,
    idempotency_key: String,
    base_currency: String,
    result_currency: String,
    status: String,
    rate: Option<Decimal>,
    completed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<RateRow> for RateRequest {
    type Error = RateError;

    fn try_from(row: RateRow) -> Result<Self> {
        let parse_code = |code: &str| {
            code.parse().map_err(|_| {
                RateError::InconsistentState(format!(
                    "rate request {} has unknown currency {code:?}",
                    row.id
                ))
            })
        };

        Ok(RateRequest {
            id: RateRequestId::from_uuid(row.id),
            base_currency: parse_code(&row.base_currency)?,
            result_currency: parse_code(&row.result_currency)?,
            status: row.status.parse()?,
            idempotency_key: row.idempotency_key,
            rate: row.rate,
            completed_at: row.completed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn db_error(e: sqlx::Error) -> RateError {
    RateError::Database(e.to_string())
}

fn into_requests(rows: Vec<RateRow>) -> Result<Vec<RateRequest>> {
    rows.into_iter().map(RateRequest::try_from).collect()
}

/// Rate store backed by a PostgreSQL connection pool.
///
/// The pool is cloned cheaply and shared by every concurrent refresh task.
#[derive(Clone)]
pub struct PgRateStore {
    pool: PgPool,
}

impl PgRateStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Open a pool against `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(db_error)?;

        info!(max_connections, "Connected to PostgreSQL");
        Ok(Self::new(pool))
    }

    /// Create the table and indexes if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in [CREATE_TABLE, CREATE_PENDING_INDEX, CREATE_PAIR_INDEX] {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        }
        debug!("Schema ensured");
        Ok(())
    }

    /// Get the underlying pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn find_by_key(&self, idempotency_key: &str) -> Result<Option<RateRequest>> {
        let sql = format!("SELECT {COLUMNS} FROM currencies_rates WHERE idempotency_key = $1");
        sqlx::query_as::<_, RateRow>(&sql)
            .bind(idempotency_key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .map(RateRequest::try_from)
            .transpose()
    }
}

#[async_trait]
impl RateStore for PgRateStore {
    #[instrument(skip(self))]
    async fn claim(&self, limit: usize) -> Result<Vec<RateRequest>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let limit = i64::try_from(limit)
            .map_err(|_| RateError::Configuration(format!("claim limit {limit} too large")))?;

        // Single statement: the sub-select row locks are held until the
        // UPDATE commits, and SKIP LOCKED lets a concurrent claim move on to
        // other rows instead of waiting.
        let sql = format!(
            r#"
            UPDATE currencies_rates
            SET status = $1, updated_at = $2
            WHERE id IN (
                SELECT id FROM currencies_rates
                WHERE status = $3
                ORDER BY created_at ASC
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {COLUMNS}
            "#
        );

        let rows = sqlx::query_as::<_, RateRow>(&sql)
            .bind(RateStatus::Processing.as_str())
            .bind(ratekeeper_common::now())
            .bind(RateStatus::Pending.as_str())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        let mut claimed = into_requests(rows)?;
        // RETURNING does not preserve the sub-select order.
        claimed.sort_by_key(|r| (r.created_at, r.id));

        debug!(claimed = claimed.len(), "Claimed pending rate requests");
        Ok(claimed)
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn complete(&self, ids: &[RateRequestId], rate: Decimal) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE currencies_rates
            SET status = $1, rate = $2, completed_at = $3, updated_at = $3
            WHERE id = ANY($4)
            "#,
        )
        .bind(RateStatus::Completed.as_str())
        .bind(rate)
        .bind(ratekeeper_common::now())
        .bind(to_uuids(ids))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    #[instrument(skip(self, ids), fields(count = ids.len()))]
    async fn fail(&self, ids: &[RateRequestId]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        sqlx::query(
            r#"
            UPDATE currencies_rates
            SET status = $1, updated_at = $2
            WHERE id = ANY($3)
            "#,
        )
        .bind(RateStatus::Failed.as_str())
        .bind(ratekeeper_common::now())
        .bind(to_uuids(ids))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(())
    }

    async fn get_latest_completed(&self, pair: CurrencyPair) -> Result<RateRequest> {
        let sql = format!(
            r#"
            SELECT {COLUMNS} FROM currencies_rates
            WHERE base_currency = $1 AND result_currency = $2 AND status = $3
            ORDER BY completed_at DESC
            LIMIT 1
            "#
        );

        sqlx::query_as::<_, RateRow>(&sql)
            .bind(pair.base.code())
            .bind(pair.result.code())
            .bind(RateStatus::Completed.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or_else(|| RateError::NotFound(pair.to_string()))?
            .try_into()
    }

    async fn get_by_id(&self, id: RateRequestId) -> Result<RateRequest> {
        let sql = format!("SELECT {COLUMNS} FROM currencies_rates WHERE id = $1");

        sqlx::query_as::<_, RateRow>(&sql)
            .bind(*id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or_else(|| RateError::NotFound(id.to_string()))?
            .try_into()
    }

    #[instrument(skip(self), fields(pair = %pair))]
    async fn create_if_absent(
        &self,
        pair: CurrencyPair,
        idempotency_key: &str,
    ) -> Result<RateRequest> {
        let request = RateRequest::pending(pair, idempotency_key);

        let sql = format!(
            r#"
            INSERT INTO currencies_rates
                (id, idempotency_key, base_currency, result_currency, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ON CONFLICT (idempotency_key) DO NOTHING
            RETURNING {COLUMNS}
            "#
        );

        let inserted = sqlx::query_as::<_, RateRow>(&sql)
            .bind(*request.id.as_uuid())
            .bind(&request.idempotency_key)
            .bind(pair.base.code())
            .bind(pair.result.code())
            .bind(RateStatus::Pending.as_str())
            .bind(request.created_at)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        if let Some(row) = inserted {
            let created = RateRequest::try_from(row)?;
            info!(id = %created.id, "Rate request created");
            return Ok(created);
        }

        // Lost the race or replayed: the unique key already exists.
        let existing = self.find_by_key(idempotency_key).await?.ok_or_else(|| {
            RateError::InconsistentState(format!(
                "idempotency key {idempotency_key} conflicted but no row was found"
            ))
        })?;

        if existing.pair() != pair {
            return Err(RateError::IdempotencyConflict(idempotency_key.to_string()));
        }

        debug!(id = %existing.id, "Idempotent replay");
        Ok(existing)
    }

    async fn requeue_stale(&self, older_than: Duration) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE currencies_rates
            SET status = $1, updated_at = $2
            WHERE status = $3 AND updated_at < $4
            "#,
        )
        .bind(RateStatus::Pending.as_str())
        .bind(ratekeeper_common::now())
        .bind(RateStatus::Processing.as_str())
        .bind(ratekeeper_common::ago(older_than))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected())
    }
}
