//! Batch run span helpers.

use tracing::Span;

use crate::model::{BatchResult, ChunkOutcome, MutationKind};

/// Start a span for one batch run.
///
/// Result fields are declared empty and filled by [`record_batch_result`].
pub fn start_batch_span(kind: MutationKind, total: usize, chunk_size: usize) -> Span {
    tracing::info_span!(
        "batch.run",
        "batch.kind" = %kind,
        "batch.total" = total,
        "batch.chunk_size" = chunk_size,
        "batch.succeeded" = tracing::field::Empty,
        "batch.failed" = tracing::field::Empty,
        "batch.skipped" = tracing::field::Empty,
    )
}

/// Emit a debug event for a finished chunk in the current span.
pub fn record_chunk_outcome<Id>(outcome: &ChunkOutcome<Id>) {
    tracing::debug!(
        chunk = outcome.chunk_index,
        attempted = outcome.attempted,
        succeeded = outcome.succeeded,
        skipped = outcome.skipped,
        failed = outcome.failed,
        errored = outcome.is_hard_failure(),
        "chunk_outcome"
    );
}

/// Record final totals on the run span.
pub fn record_batch_result<Id>(span: &Span, result: &BatchResult<Id>) {
    span.record("batch.succeeded", result.total_succeeded);
    span.record("batch.failed", result.total_failed);
    span.record("batch.skipped", result.total_skipped);
}
