//! Postgres connection pool, migrations, and health check.
//!
//! The pool is shared by the lead store (the production [`RemoteGateway`])
//! and the audit log.
//!
//! [`RemoteGateway`]: crate::gateway::RemoteGateway

pub mod audit;
pub mod leads;

pub use audit::PgAuditLog;
pub use leads::{LeadStore, LeadView};

use std::time::Duration;

use crate::config::DEFAULT_MUTATION_BATCH_SIZE;
use crate::error::Result;
use crate::model::LeadFilter;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

/// Database handle. Owns the connection pool shared across all modules.
#[derive(Clone)]
pub struct Db {
    pool: PgPool,
}

impl Db {
    /// Connect to Postgres and create a connection pool.
    ///
    /// Acquire timeouts surface as gateway call failures.
    pub async fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(10))
            .connect(url)
            .await?;
        Ok(Self { pool })
    }

    /// Run all pending migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Simple health check: run a SELECT 1.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Gateway over the `leads` table, deduplicating on `key_field`.
    pub fn lead_store(&self, key_field: impl Into<String>) -> LeadStore {
        LeadStore::new(self.pool.clone(), key_field.into(), DEFAULT_MUTATION_BATCH_SIZE)
    }

    /// Newest-first view of lead ids matching `filter`.
    pub fn lead_view(&self, filter: LeadFilter) -> LeadView {
        LeadView::new(self.pool.clone(), filter)
    }

    pub fn audit_log(&self) -> PgAuditLog {
        PgAuditLog::new(self.pool.clone())
    }
}
