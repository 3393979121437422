//! In-process audit log.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{AuditRecorder, provisional_summary};
use crate::error::{Error, Result};
use crate::model::{AuditId, AuditLogEntry, AuditStatus};

#[derive(Clone, Default)]
pub struct MemoryAuditLog {
    entries: Arc<Mutex<Vec<AuditLogEntry>>>,
}

impl MemoryAuditLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in insertion order.
    pub fn entries(&self) -> Vec<AuditLogEntry> {
        self.lock().clone()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<AuditLogEntry>> {
        self.entries.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn finish(&self, id: AuditId, status: AuditStatus, summary: &str) -> Result<()> {
        let mut entries = self.lock();
        let entry = entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| Error::NotFound(format!("audit entry {id}")))?;
        if entry.status.is_terminal() {
            return Err(Error::Audit(format!(
                "audit entry {id} already {}",
                entry.status
            )));
        }
        entry.status = status;
        entry.outcome_summary = summary.to_string();
        entry.completed_at = Some(Utc::now());
        Ok(())
    }
}

#[async_trait]
impl AuditRecorder for MemoryAuditLog {
    async fn begin(
        &self,
        operation_kind: &str,
        target_ids: Vec<String>,
        requested_by: &str,
        context: serde_json::Value,
    ) -> Result<AuditId> {
        let id = AuditId::new();
        self.lock().push(AuditLogEntry {
            id,
            operation_kind: operation_kind.to_string(),
            outcome_summary: provisional_summary(operation_kind, target_ids.len()),
            target_ids,
            requested_by: requested_by.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            status: AuditStatus::Started,
            context,
        });
        Ok(id)
    }

    async fn complete(&self, id: AuditId, outcome_summary: &str) -> Result<()> {
        self.finish(id, AuditStatus::Completed, outcome_summary)
    }

    async fn fail(&self, id: AuditId, error_summary: &str) -> Result<()> {
        self.finish(id, AuditStatus::Failed, error_summary)
    }

    async fn list(&self, limit: usize) -> Result<Vec<AuditLogEntry>> {
        Ok(self.lock().iter().rev().take(limit).cloned().collect())
    }
}
