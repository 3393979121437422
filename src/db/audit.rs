//! Postgres-backed [`AuditRecorder`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::audit::{AuditRecorder, provisional_summary};
use crate::error::{Error, Result};
use crate::model::{AuditId, AuditLogEntry, AuditStatus};

pub struct PgAuditLog {
    pool: sqlx::PgPool,
}

impl PgAuditLog {
    pub(crate) fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    /// Move a `started` entry to a terminal status. Entries are updated once.
    async fn finish(&self, id: AuditId, status: AuditStatus, summary: &str) -> Result<()> {
        let rows = sqlx::query(
            "UPDATE audit_log SET status = $1, outcome_summary = $2, completed_at = $3
             WHERE id = $4 AND status = 'started'",
        )
        .bind(status.to_string())
        .bind(summary)
        .bind(Utc::now())
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows == 0 {
            return Err(Error::Audit(format!(
                "audit entry {id} missing or already finalized"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditRecorder for PgAuditLog {
    async fn begin(
        &self,
        operation_kind: &str,
        target_ids: Vec<String>,
        requested_by: &str,
        context: serde_json::Value,
    ) -> Result<AuditId> {
        let id = Uuid::new_v4();
        let summary = provisional_summary(operation_kind, target_ids.len());
        sqlx::query(
            "INSERT INTO audit_log (id, operation_kind, target_ids, requested_by, started_at, status, outcome_summary, context)
             VALUES ($1, $2, $3, $4, $5, 'started', $6, $7)",
        )
        .bind(id)
        .bind(operation_kind)
        .bind(serde_json::json!(target_ids))
        .bind(requested_by)
        .bind(Utc::now())
        .bind(summary)
        .bind(context)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Audit(format!("failed to record audit start: {e}")))?;
        Ok(AuditId(id))
    }

    async fn complete(&self, id: AuditId, outcome_summary: &str) -> Result<()> {
        self.finish(id, AuditStatus::Completed, outcome_summary).await
    }

    async fn fail(&self, id: AuditId, error_summary: &str) -> Result<()> {
        self.finish(id, AuditStatus::Failed, error_summary).await
    }

    async fn list(&self, limit: usize) -> Result<Vec<AuditLogEntry>> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            "SELECT id, operation_kind, target_ids, requested_by, started_at, completed_at, status, outcome_summary, context
             FROM audit_log ORDER BY started_at DESC LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditRow::try_into_entry).collect()
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    operation_kind: String,
    target_ids: serde_json::Value,
    requested_by: String,
    started_at: DateTime<Utc>,
    completed_at: Option<DateTime<Utc>>,
    status: String,
    outcome_summary: String,
    context: serde_json::Value,
}

impl AuditRow {
    fn try_into_entry(self) -> Result<AuditLogEntry> {
        let target_ids: Vec<String> = serde_json::from_value(self.target_ids)
            .map_err(|e| Error::Other(format!("bad target_ids on audit entry {}: {e}", self.id)))?;
        Ok(AuditLogEntry {
            id: AuditId(self.id),
            operation_kind: self.operation_kind,
            target_ids,
            requested_by: self.requested_by,
            started_at: self.started_at,
            completed_at: self.completed_at,
            status: self.status.parse()?,
            outcome_summary: self.outcome_summary,
            context: self.context,
        })
    }
}
