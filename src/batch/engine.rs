//! Sequential, failure-tolerant chunked mutation.
//!
//! One run resolves its working set once, then walks the chunks strictly in
//! order. A chunk whose call errors is recorded as fully failed and the run
//! moves on; nothing a single chunk does can abort the run.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use opentelemetry::KeyValue;
use tracing::{Instrument, debug, info, warn};

use super::mutation::{Applied, Mutation};
use super::planner::ChunkPlanner;
use super::progress::ProgressReporter;
use crate::audit::AuditRecorder;
use crate::config::{BatchSettings, DEFAULT_READ_BATCH_SIZE};
use crate::error::{Error, Result};
use crate::model::{BatchResult, Chunk, ChunkOutcome, Identified, MutationKind, WorkingSet};
use crate::telemetry::{batch as batch_span, metrics};

// ---------------------------------------------------------------------------
// Retry policy
// ---------------------------------------------------------------------------

/// Retries for whole-call failures. Short counts are never retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per chunk, including the first.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles after each further failure.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// One attempt, no retry.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::none()
    }
}

// ---------------------------------------------------------------------------
// Audit request
// ---------------------------------------------------------------------------

/// Who asked for an audited run, and why.
pub struct AuditRequest<'a> {
    pub recorder: &'a dyn AuditRecorder,
    pub requested_by: String,
    pub context: serde_json::Value,
}

impl<'a> AuditRequest<'a> {
    pub fn new(recorder: &'a dyn AuditRecorder, requested_by: impl Into<String>) -> Self {
        Self {
            recorder,
            requested_by: requested_by.into(),
            context: serde_json::Value::Null,
        }
    }

    pub fn context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct BatchMutationEngine {
    planner: ChunkPlanner,
    read_batch_size: usize,
    retry: RetryPolicy,
}

impl BatchMutationEngine {
    pub fn new(chunk_size: usize) -> Result<Self> {
        Ok(Self {
            planner: ChunkPlanner::new(chunk_size)?,
            read_batch_size: DEFAULT_READ_BATCH_SIZE,
            retry: RetryPolicy::none(),
        })
    }

    pub fn from_settings(settings: &BatchSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self::new(settings.mutation_batch_size)?
            .with_read_batch_size(settings.read_batch_size)?
            .with_retry(RetryPolicy::new(
                settings.retry_max_attempts,
                settings.retry_base_delay(),
            )))
    }

    /// Page size used to resolve counted working sets.
    pub fn with_read_batch_size(mut self, read_batch_size: usize) -> Result<Self> {
        if read_batch_size == 0 {
            return Err(Error::InvalidChunkSize(read_batch_size));
        }
        self.read_batch_size = read_batch_size;
        Ok(self)
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.planner.chunk_size()
    }

    /// Run `mutation` over `working_set`.
    ///
    /// Returns `Err` only for failures before the first chunk: a mutation
    /// that cannot run with this chunk size, resolving the working set, or
    /// writing the audit `begin` entry. Every per-chunk failure is folded
    /// into the returned [`BatchResult`].
    pub async fn run<T, M, P>(
        &self,
        working_set: WorkingSet<T>,
        mutation: &M,
        progress: &P,
        audit: Option<AuditRequest<'_>>,
    ) -> Result<BatchResult<T::Id>>
    where
        T: Identified + Send + Sync,
        M: Mutation<T> + ?Sized,
        P: ProgressReporter + ?Sized,
    {
        let kind = mutation.kind();
        mutation.preflight(self.planner.chunk_size())?;
        let mode = working_set.mode();
        let items = working_set.resolve(self.read_batch_size).await?;
        let total = items.len();
        let chunk_size = self.planner.chunk_size();

        let audit_id = match audit {
            Some(ref req) => {
                let targets = items.iter().map(|item| item.id().to_string()).collect();
                let context = serde_json::json!({
                    "mode": mode,
                    "total": total,
                    "chunk_size": chunk_size,
                    "request": req.context,
                });
                let id = req
                    .recorder
                    .begin(kind.audit_label(), targets, &req.requested_by, context)
                    .await?;
                Some(id)
            }
            None => None,
        };

        let span = batch_span::start_batch_span(kind, total, chunk_size);
        let started = Instant::now();

        let result = async {
            info!(
                mode,
                total,
                chunks = self.planner.chunk_count(total),
                "batch run started"
            );

            let mut result = BatchResult::new(kind);
            let mut processed = 0;

            for chunk in self.planner.plan(items) {
                let outcome = self.run_chunk(kind, mutation, chunk).await;
                batch_span::record_chunk_outcome(&outcome);
                processed += outcome.attempted;
                result.absorb(outcome);
                progress.on_progress(processed, total);
            }

            if total == 0 {
                progress.on_progress(0, 0);
            }

            info!(
                succeeded = result.total_succeeded,
                skipped = result.total_skipped,
                failed = result.total_failed,
                chunk_errors = result.chunk_errors,
                "batch run finished"
            );
            result
        }
        .instrument(span.clone())
        .await;

        batch_span::record_batch_result(&span, &result);
        metrics::batch_duration_ms().record(
            started.elapsed().as_millis() as f64,
            &[KeyValue::new("kind", kind.to_string())],
        );

        if let (Some(id), Some(req)) = (audit_id, audit) {
            let summary = result.summary();
            let written = if result.chunk_errors > 0 {
                req.recorder.fail(id, &summary).await
            } else {
                req.recorder.complete(id, &summary).await
            };
            if let Err(e) = written {
                warn!(audit_id = %id, error = %e, "failed to finalize audit entry");
            }
        }

        Ok(result)
    }

    async fn run_chunk<T, M>(
        &self,
        kind: MutationKind,
        mutation: &M,
        chunk: Chunk<T>,
    ) -> ChunkOutcome<T::Id>
    where
        T: Identified + Send + Sync,
        M: Mutation<T> + ?Sized,
    {
        let ids: Vec<T::Id> = chunk.items.iter().map(|item| item.id()).collect();
        let kind_label = KeyValue::new("kind", kind.to_string());

        let outcome = match self.apply_with_retry(mutation, &chunk).await {
            Ok(applied) => outcome_from(chunk.index, ids, applied),
            Err(e) => {
                warn!(chunk = chunk.index, size = chunk.len(), error = %e, "chunk failed");
                ChunkOutcome::errored(chunk.index, ids, e.to_string())
            }
        };

        if outcome.failed > 0 && !outcome.is_hard_failure() {
            warn!(
                chunk = outcome.chunk_index,
                failed = outcome.failed,
                attempted = outcome.attempted,
                "store rejected part of chunk"
            );
        }

        let status = if outcome.is_hard_failure() {
            "error"
        } else if outcome.failed > 0 {
            "partial"
        } else {
            "ok"
        };
        metrics::batch_chunks().add(1, &[kind_label.clone(), KeyValue::new("result", status)]);
        for (class, n) in [
            ("succeeded", outcome.succeeded),
            ("skipped", outcome.skipped),
            ("failed", outcome.failed),
        ] {
            if n > 0 {
                metrics::batch_items()
                    .add(n as u64, &[kind_label.clone(), KeyValue::new("outcome", class)]);
            }
        }

        outcome
    }

    async fn apply_with_retry<T, M>(&self, mutation: &M, chunk: &Chunk<T>) -> Result<Applied<T::Id>>
    where
        T: Identified + Send + Sync,
        M: Mutation<T> + ?Sized,
    {
        let mut attempt = 1;
        loop {
            match mutation.apply(&chunk.items).await {
                Ok(applied) => return Ok(applied),
                Err(e) if attempt < self.retry.max_attempts && e.is_transient() => {
                    let delay = self.retry.delay_after(attempt);
                    debug!(chunk = chunk.index, attempt, ?delay, error = %e, "retrying chunk");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Classify every id in the chunk as succeeded, skipped or failed.
fn outcome_from<Id: Clone + Eq + std::hash::Hash>(
    chunk_index: usize,
    ids: Vec<Id>,
    applied: Applied<Id>,
) -> ChunkOutcome<Id> {
    let attempted = ids.len();
    match applied {
        Applied::Ids { applied, skipped } => {
            let applied: HashSet<Id> = applied.into_iter().collect();
            let skipped: HashSet<Id> = skipped.into_iter().collect();
            let mut succeeded = 0;
            let mut skipped_n = 0;
            let mut failed_ids = Vec::new();
            for id in ids {
                if applied.contains(&id) {
                    succeeded += 1;
                } else if skipped.contains(&id) {
                    skipped_n += 1;
                } else {
                    failed_ids.push(id);
                }
            }
            ChunkOutcome {
                chunk_index,
                attempted,
                succeeded,
                skipped: skipped_n,
                failed: failed_ids.len(),
                failed_ids,
                error: None,
            }
        }
        Applied::Count(n) => {
            let succeeded = n.min(attempted);
            let failed = attempted - succeeded;
            // A count cannot say which rows were refused, unless it was all of them.
            let failed_ids = if succeeded == 0 { ids } else { Vec::new() };
            ChunkOutcome {
                chunk_index,
                attempted,
                succeeded,
                skipped: 0,
                failed,
                failed_ids,
                error: None,
            }
        }
    }
}
