//! Append-only log of destructive bulk operations.
//!
//! An entry is written before the first chunk runs, so an interrupted run
//! leaves a discoverable `started` record. The log is best-effort; the
//! engine's `BatchResult` is the source of truth for what changed.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{AuditId, AuditLogEntry};

#[async_trait]
pub trait AuditRecorder: Send + Sync {
    /// Record intent. Must succeed before any mutation starts.
    async fn begin(
        &self,
        operation_kind: &str,
        target_ids: Vec<String>,
        requested_by: &str,
        context: serde_json::Value,
    ) -> Result<AuditId>;

    /// Mark the entry completed with its final summary.
    async fn complete(&self, id: AuditId, outcome_summary: &str) -> Result<()>;

    /// Mark the entry failed with an error summary.
    async fn fail(&self, id: AuditId, error_summary: &str) -> Result<()>;

    /// Most recent entries first.
    async fn list(&self, limit: usize) -> Result<Vec<AuditLogEntry>>;
}

/// Summary stored at `begin`, replaced on completion.
pub fn provisional_summary(operation_kind: &str, targets: usize) -> String {
    format!("{operation_kind} of {targets} records started")
}
