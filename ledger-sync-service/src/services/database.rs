//! Local ledger store for ledger-sync-service.
//!
//! Insert-if-absent mirror of normalized records, the append-only sync event
//! log, and the per-company pass lock.

use crate::models::{NormalizedRecord, SyncEvent};
use crate::services::metrics::DB_QUERY_DURATION;
use async_trait::async_trait;
use dashmap::DashMap;
use service_core::error::AppError;
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use sqlx::Postgres;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Insert unless `(company_id, source_id)` already exists. Returns whether a row was written.
    async fn insert_if_absent(&self, record: &NormalizedRecord) -> Result<bool, AppError>;

    async fn append_sync_event(&self, event: &SyncEvent) -> Result<(), AppError>;

    /// Take the company's pass lock without waiting. `false` if someone else holds it.
    async fn try_lock_company(&self, company_id: i64) -> Result<bool, AppError>;

    async fn unlock_company(&self, company_id: i64) -> Result<(), AppError>;
}

fn db_error(context: &str, e: sqlx::Error) -> AppError {
    AppError::DatabaseError(anyhow::anyhow!("{}: {}", context, e))
}

/// Counter columns of `sync_events`, in insert order.
fn event_counts(event: &SyncEvent) -> [i64; 6] {
    [
        event.records_seen,
        event.records_inserted,
        event.documents_created,
        event.documents_existing,
        event.records_skipped,
        event.records_failed,
    ]
    .map(i64::from)
}

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
    /// Connections holding a session advisory lock, keyed by company.
    held_locks: Arc<DashMap<i64, PoolConnection<Postgres>>>,
}

impl Database {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "ledger-sync-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, AppError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(|e| db_error("Failed to connect", e))?;

        info!("PostgreSQL connection pool established");

        Ok(Self {
            pool,
            held_locks: Arc::new(DashMap::new()),
        })
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["health_check"])
            .start_timer();

        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|e| db_error("Health check failed", e))?;

        timer.observe_duration();
        Ok(())
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), AppError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for Database {
    #[instrument(skip(self, record), fields(company_id = record.company_id, source_id = %record.source_id))]
    async fn insert_if_absent(&self, record: &NormalizedRecord) -> Result<bool, AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["insert_if_absent"])
            .start_timer();

        let result = sqlx::query(
            r#"
            INSERT INTO normalized_records (company_id, source_id, account_id, signed_amount, occurred_on, counterparty_label, category_label, is_pending)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (company_id, source_id) DO NOTHING
            "#,
        )
        .bind(record.company_id)
        .bind(&record.source_id)
        .bind(&record.account_id)
        .bind(record.signed_amount)
        .bind(record.occurred_on)
        .bind(&record.counterparty_label)
        .bind(&record.category_label)
        .bind(record.is_pending)
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to insert normalized record", e))?;

        timer.observe_duration();

        Ok(result.rows_affected() == 1)
    }

    #[instrument(skip(self, event), fields(company_id = event.company_id, outcome = %event.outcome))]
    async fn append_sync_event(&self, event: &SyncEvent) -> Result<(), AppError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["append_sync_event"])
            .start_timer();

        let [seen, inserted, created, existing, skipped, failed] = event_counts(event);
        sqlx::query(
            r#"
            INSERT INTO sync_events (company_id, started_at, completed_at, records_seen, records_inserted, documents_created, documents_existing, records_skipped, records_failed, outcome, failures)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(event.company_id)
        .bind(event.started_at)
        .bind(event.completed_at)
        .bind(seen)
        .bind(inserted)
        .bind(created)
        .bind(existing)
        .bind(skipped)
        .bind(failed)
        .bind(event.outcome.as_str())
        .bind(Json(&event.failures))
        .execute(&self.pool)
        .await
        .map_err(|e| db_error("Failed to append sync event", e))?;

        timer.observe_duration();
        info!("Sync event recorded");

        Ok(())
    }

    #[instrument(skip(self))]
    async fn try_lock_company(&self, company_id: i64) -> Result<bool, AppError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| db_error("Failed to acquire lock connection", e))?;

        let (locked,): (bool,) = sqlx::query_as("SELECT pg_try_advisory_lock($1)")
            .bind(company_id)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| db_error("Failed to take advisory lock", e))?;

        if locked {
            self.held_locks.insert(company_id, conn);
        }
        Ok(locked)
    }

    #[instrument(skip(self))]
    async fn unlock_company(&self, company_id: i64) -> Result<(), AppError> {
        let Some((_, mut conn)) = self.held_locks.remove(&company_id) else {
            warn!("No advisory lock held for company");
            return Ok(());
        };

        let released = sqlx::query_as::<_, (bool,)>("SELECT pg_advisory_unlock($1)")
            .bind(company_id)
            .fetch_one(&mut *conn)
            .await;

        match released {
            Ok((true,)) => Ok(()),
            Ok((false,)) => {
                warn!("Advisory lock was not held by this session");
                Ok(())
            }
            Err(e) => {
                // Ending the session drops any advisory lock it still holds
                let _ = conn.close().await;
                Err(db_error("Failed to release advisory lock", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SyncOutcome;
    use chrono::Utc;

    #[test]
    fn event_counts_keep_full_range() {
        let event = SyncEvent {
            company_id: 1,
            started_at: Utc::now(),
            completed_at: Utc::now(),
            records_seen: u32::MAX,
            records_inserted: 1,
            documents_created: 2,
            documents_existing: 3,
            records_skipped: 4,
            records_failed: u32::MAX,
            outcome: SyncOutcome::Partial,
            failures: Vec::new(),
        };

        assert_eq!(
            event_counts(&event),
            [i64::from(u32::MAX), 1, 2, 3, 4, i64::from(u32::MAX)]
        );
    }
}
