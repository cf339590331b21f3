//! Postgres storage engine.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{AggregateId, EventId, Version};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

use crate::error::{Result, StoreError};
use crate::outbox::{OutboxEntry, OutboxStatus, OutboxStore, StatusCounts};
use crate::storage::{AggregateRow, Storage};

/// Postgres-backed engine.
///
/// Aggregate rows live in `aggregates`, outbox entries in `outbox`; both
/// tables are created by the bundled migrations. The concurrency check
/// is a conditional UPDATE, so it needs no locks beyond the row write
/// itself.
#[derive(Clone)]
pub struct PostgresStorage {
    pool: PgPool,
}

impl PostgresStorage {
    /// Creates a storage from an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to the database with a bounded pool.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Runs the schema migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_from_pg(row: &sqlx::postgres::PgRow) -> Result<AggregateRow> {
    Ok(AggregateRow {
        id: AggregateId::from_uuid(row.try_get::<Uuid, _>("id")?),
        aggregate_type: row.try_get("aggregate_type")?,
        state: row.try_get("state")?,
        version: Version::new(row.try_get::<i64, _>("version")?),
    })
}

fn entry_from_pg(row: &sqlx::postgres::PgRow) -> Result<OutboxEntry> {
    Ok(OutboxEntry {
        id: EventId::from_uuid(row.try_get::<Uuid, _>("id")?),
        aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
        aggregate_type: row.try_get("aggregate_type")?,
        event_type: row.try_get("event_type")?,
        payload: row.try_get("payload")?,
        status: OutboxStatus::parse(&row.try_get::<String, _>("status")?)?,
        retry_count: row.try_get("retry_count")?,
        last_error: row.try_get("last_error")?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
        claimed_at: row.try_get("claimed_at")?,
    })
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

#[async_trait]
impl Storage for PostgresStorage {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self) -> Result<Self::Tx> {
        Ok(self.pool.begin().await?)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<()> {
        Ok(tx.commit().await?)
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<()> {
        Ok(tx.rollback().await?)
    }

    async fn insert_row(&self, tx: &mut Self::Tx, row: &AggregateRow) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO aggregates (id, aggregate_type, state, version, created_at, updated_at)
            VALUES ($1, $2, $3, $4, NOW(), NOW())
            "#,
        )
        .bind(row.id.as_uuid())
        .bind(&row.aggregate_type)
        .bind(&row.state)
        .bind(row.version.as_i64())
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(err) if is_unique_violation(&err) => Err(StoreError::AlreadyExists(row.id)),
            Err(err) => Err(err.into()),
        }
    }

    async fn update_row(
        &self,
        tx: &mut Self::Tx,
        row: &AggregateRow,
        expected: Version,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE aggregates
            SET state = $1, version = $2, updated_at = NOW()
            WHERE id = $3 AND aggregate_type = $4 AND version = $5
            "#,
        )
        .bind(&row.state)
        .bind(row.version.as_i64())
        .bind(row.id.as_uuid())
        .bind(&row.aggregate_type)
        .bind(expected.as_i64())
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_row(
        &self,
        tx: &mut Self::Tx,
        aggregate_type: &str,
        id: AggregateId,
        expected: Version,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM aggregates
            WHERE id = $1 AND aggregate_type = $2 AND version = $3
            "#,
        )
        .bind(id.as_uuid())
        .bind(aggregate_type)
        .bind(expected.as_i64())
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    async fn fetch_row(
        &self,
        aggregate_type: &str,
        id: AggregateId,
    ) -> Result<Option<AggregateRow>> {
        let row = sqlx::query(
            r#"
            SELECT id, aggregate_type, state, version
            FROM aggregates
            WHERE id = $1 AND aggregate_type = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(aggregate_type)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_from_pg).transpose()
    }

    async fn stage_outbox(&self, tx: &mut Self::Tx, entries: &[OutboxEntry]) -> Result<()> {
        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO outbox
                    (id, aggregate_id, aggregate_type, event_type, payload,
                     status, retry_count, last_error, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(entry.id.as_uuid())
            .bind(entry.aggregate_id.as_uuid())
            .bind(&entry.aggregate_type)
            .bind(&entry.event_type)
            .bind(&entry.payload)
            .bind(entry.status.as_str())
            .bind(entry.retry_count)
            .bind(&entry.last_error)
            .bind(entry.created_at)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl OutboxStore for PostgresStorage {
    async fn fetch_pending(&self, limit: i64) -> Result<Vec<OutboxEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, aggregate_id, aggregate_type, event_type, payload,
                   status, retry_count, last_error, created_at, processed_at, claimed_at
            FROM outbox
            WHERE status = 'PENDING'
            ORDER BY created_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(entry_from_pg).collect()
    }

    async fn claim(&self, id: EventId) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'PROCESSING', claimed_at = NOW()
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_processed(&self, id: EventId) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'PROCESSED', processed_at = NOW(), claimed_at = NULL, last_error = NULL
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: EventId, error: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'FAILED', retry_count = retry_count + 1,
                last_error = $2, claimed_at = NULL
            WHERE id = $1 AND status = 'PROCESSING'
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_failed(&self, max_retries: i32) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'PENDING'
            WHERE status = 'FAILED' AND retry_count < $1
            "#,
        )
        .bind(max_retries)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn reclaim_stuck(&self, claim_timeout: Duration) -> Result<u64> {
        let cutoff: DateTime<Utc> = Utc::now() - claim_timeout;
        let result = sqlx::query(
            r#"
            UPDATE outbox
            SET status = 'PENDING', claimed_at = NULL
            WHERE status = 'PROCESSING' AND claimed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn purge_processed(&self, retention: Duration) -> Result<u64> {
        let cutoff: DateTime<Utc> = Utc::now() - retention;
        let result = sqlx::query(
            r#"
            DELETE FROM outbox
            WHERE status = 'PROCESSED' AND processed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get(&self, id: EventId) -> Result<Option<OutboxEntry>> {
        let row = sqlx::query(
            r#"
            SELECT id, aggregate_id, aggregate_type, event_type, payload,
                   status, retry_count, last_error, created_at, processed_at, claimed_at
            FROM outbox
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(entry_from_pg).transpose()
    }

    async fn status_counts(&self) -> Result<StatusCounts> {
        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM outbox
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = StatusCounts::default();
        for row in rows {
            let status = OutboxStatus::parse(&row.try_get::<String, _>("status")?)?;
            let count = row.try_get::<i64, _>("count")? as u64;
            match status {
                OutboxStatus::Pending => counts.pending = count,
                OutboxStatus::Processing => counts.processing = count,
                OutboxStatus::Processed => counts.processed = count,
                OutboxStatus::Failed => counts.failed = count,
            }
        }
        Ok(counts)
    }
}
