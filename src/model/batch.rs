//! Chunks, per-chunk outcomes, and the aggregate batch result.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Mutation kind
// ---------------------------------------------------------------------------

/// The operation a batch run performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
}

impl MutationKind {
    /// Operation label written to the audit log.
    pub fn audit_label(self) -> &'static str {
        match self {
            MutationKind::Insert => "bulk-insert",
            MutationKind::Update => "bulk-update",
            MutationKind::Delete => "bulk-delete",
        }
    }
}

impl std::fmt::Display for MutationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MutationKind::Insert => "insert",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Chunk
// ---------------------------------------------------------------------------

/// A bounded slice of a working set, sent to the store in one call.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk<T> {
    /// Zero-based sequence number.
    pub index: usize,
    pub items: Vec<T>,
}

impl<T> Chunk<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What happened to one chunk.
///
/// `succeeded + skipped + failed == attempted` always holds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkOutcome<Id> {
    pub chunk_index: usize,
    pub attempted: usize,
    /// Rows the store confirmed, not rows requested.
    pub succeeded: usize,
    /// Rows the store already lacked (delete pre-check). Not a failure.
    pub skipped: usize,
    pub failed: usize,
    /// Failed rows the store identified. Count-only results may fail rows
    /// without naming them, so this can be shorter than `failed`.
    pub failed_ids: Vec<Id>,
    /// Set when the whole call errored.
    pub error: Option<String>,
}

impl<Id> ChunkOutcome<Id> {
    /// Every row failed because the call itself errored.
    pub fn errored(chunk_index: usize, ids: Vec<Id>, error: String) -> Self {
        Self {
            chunk_index,
            attempted: ids.len(),
            succeeded: 0,
            skipped: 0,
            failed: ids.len(),
            failed_ids: ids,
            error: Some(error),
        }
    }

    pub fn is_hard_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Aggregate over every chunk of a run. The authoritative count of what
/// actually changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchResult<Id> {
    pub kind: MutationKind,
    pub total_attempted: usize,
    pub total_succeeded: usize,
    pub total_skipped: usize,
    pub total_failed: usize,
    pub failed_ids: Vec<Id>,
    /// Chunks whose call errored outright.
    pub chunk_errors: usize,
    pub outcomes: Vec<ChunkOutcome<Id>>,
}

impl<Id: Clone> BatchResult<Id> {
    pub fn new(kind: MutationKind) -> Self {
        Self {
            kind,
            total_attempted: 0,
            total_succeeded: 0,
            total_skipped: 0,
            total_failed: 0,
            failed_ids: Vec::new(),
            chunk_errors: 0,
            outcomes: Vec::new(),
        }
    }

    pub fn absorb(&mut self, outcome: ChunkOutcome<Id>) {
        self.total_attempted += outcome.attempted;
        self.total_succeeded += outcome.succeeded;
        self.total_skipped += outcome.skipped;
        self.total_failed += outcome.failed;
        self.failed_ids.extend(outcome.failed_ids.iter().cloned());
        if outcome.is_hard_failure() {
            self.chunk_errors += 1;
        }
        self.outcomes.push(outcome);
    }
}

impl<Id> BatchResult<Id> {
    pub fn is_complete_success(&self) -> bool {
        self.total_failed == 0
    }

    /// Some rows changed and some failed.
    pub fn is_partial(&self) -> bool {
        self.total_failed > 0 && self.total_succeeded > 0
    }

    /// One-line human summary, used for audit entries and CLI output.
    pub fn summary(&self) -> String {
        let mut s = format!(
            "{}: {} of {} succeeded",
            self.kind, self.total_succeeded, self.total_attempted
        );
        if self.total_skipped > 0 {
            s.push_str(&format!(", {} already absent", self.total_skipped));
        }
        if self.total_failed > 0 {
            s.push_str(&format!(", {} failed", self.total_failed));
        }
        if self.chunk_errors > 0 {
            s.push_str(&format!(" ({} chunk errors)", self.chunk_errors));
        }
        s
    }
}
