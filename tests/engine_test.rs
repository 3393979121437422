//! Integration tests for the batch mutation engine.

use async_trait::async_trait;
use serde_json::json;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crm_batch::audit::AuditRecorder;
use crm_batch::audit::memory::MemoryAuditLog;
use crm_batch::batch::{
    Applied, AuditRequest, BatchMutationEngine, ChunkPlanner, DeleteLeads, FnMutation,
    InsertRecords, NoProgress, RetryPolicy, UpdateLeads,
};
use crm_batch::error::{Error, Result};
use crm_batch::gateway::memory::MemoryGateway;
use crm_batch::model::*;

fn seeded(n: usize) -> (MemoryGateway, Vec<RecordId>) {
    let gw = MemoryGateway::new("phone");
    let ids = gw.seed_keys((0..n).map(|i| format!("010-{i:04}")));
    (gw, ids)
}

fn engine(chunk_size: usize) -> BatchMutationEngine {
    BatchMutationEngine::new(chunk_size).expect("valid chunk size")
}

// ---------------------------------------------------------------------------
// Chunking
// ---------------------------------------------------------------------------

#[test]
fn planner_preserves_order_and_bounds() {
    let planner = ChunkPlanner::new(7).unwrap();
    let items: Vec<u32> = (0..51).collect();

    let chunks: Vec<Chunk<u32>> = planner.plan(items.clone()).collect();

    assert_eq!(chunks.len(), planner.chunk_count(items.len()));
    assert!(chunks.iter().all(|c| c.len() <= 7 && !c.is_empty()));
    let indices: Vec<usize> = chunks.iter().map(|c| c.index).collect();
    assert_eq!(indices, (0..8).collect::<Vec<_>>());
    let flat: Vec<u32> = chunks.into_iter().flat_map(|c| c.items).collect();
    assert_eq!(flat, items);
}

#[test]
fn zero_chunk_size_is_rejected() {
    assert!(matches!(
        BatchMutationEngine::new(0),
        Err(Error::InvalidChunkSize(0))
    ));
}

#[tokio::test]
async fn insert_120_records_runs_three_chunks() {
    let gw = MemoryGateway::new("phone");
    let records = RawRecord::from_rows((0..120).map(|i| {
        json!({"phone": format!("010-{i:04}")})
            .as_object()
            .cloned()
            .unwrap()
    }));

    let result = engine(50)
        .run(
            WorkingSet::selected(records),
            &InsertRecords::new(&gw),
            &NoProgress,
            None,
        )
        .await
        .unwrap();

    assert_eq!(gw.mutation_sizes(), vec![50, 50, 20]);
    assert_eq!(result.total_attempted, 120);
    assert_eq!(result.total_succeeded, 120);
    assert_eq!(result.outcomes.len(), 3);
    assert!(result.is_complete_success());
    assert_eq!(gw.len(), 120);
}

#[tokio::test]
async fn empty_working_set_makes_no_calls() {
    let (gw, _) = seeded(0);
    let calls = Mutex::new(Vec::new());
    let progress = |p: usize, t: usize| calls.lock().unwrap().push((p, t));

    let result = engine(50)
        .run(
            WorkingSet::<RecordId>::selected(Vec::new()),
            &UpdateLeads::new(&gw, LeadPatch::grade("A")),
            &progress,
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.total_attempted, 0);
    assert!(result.outcomes.is_empty());
    assert!(gw.mutation_sizes().is_empty());
    assert_eq!(*calls.lock().unwrap(), vec![(0, 0)]);
}

#[tokio::test]
async fn repeated_selection_is_mutated_once() {
    let (gw, ids) = seeded(3);
    let selection = vec![ids[0], ids[1], ids[0], ids[2], ids[1]];

    let result = engine(50)
        .run(
            WorkingSet::selected(selection),
            &UpdateLeads::new(&gw, LeadPatch::grade("B")),
            &NoProgress,
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.total_attempted, 3);
    assert_eq!(gw.mutation_sizes(), vec![3]);
}

// ---------------------------------------------------------------------------
// Counted mode
// ---------------------------------------------------------------------------

#[tokio::test]
async fn counted_mode_clamps_to_view() {
    let (gw, _) = seeded(37);

    let result = engine(50)
        .run(
            WorkingSet::counted(gw.view(LeadFilter::default()), 500),
            &UpdateLeads::new(&gw, LeadPatch::grade("C")),
            &NoProgress,
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.total_attempted, 37);
    assert_eq!(result.total_succeeded, 37);
    assert_eq!(gw.mutation_sizes(), vec![37]);
}

#[tokio::test]
async fn counted_mode_takes_newest_first_through_small_pages() {
    let (gw, ids) = seeded(30);
    let engine = engine(4).with_read_batch_size(3).unwrap();

    let result = engine
        .run(
            WorkingSet::counted(gw.view(LeadFilter::default()), 10),
            &UpdateLeads::new(&gw, LeadPatch::grade("A")),
            &NoProgress,
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.total_succeeded, 10);
    assert_eq!(gw.mutation_sizes(), vec![4, 4, 2]);
    for id in &ids[20..] {
        assert_eq!(gw.lead(*id).unwrap().grade.as_deref(), Some("A"));
    }
    for id in &ids[..20] {
        assert_eq!(gw.lead(*id).unwrap().grade, None);
    }
}

#[tokio::test]
async fn assign_targets_only_unassigned_leads() {
    let (gw, ids) = seeded(6);
    let e = engine(50);

    // Assign the two newest to c-1.
    e.run(
        WorkingSet::selected(vec![ids[4], ids[5]]),
        &UpdateLeads::new(&gw, LeadPatch::assign("c-1")),
        &NoProgress,
        None,
    )
    .await
    .unwrap();

    let unassigned = LeadFilter {
        unassigned: true,
        ..LeadFilter::default()
    };
    let result = e
        .run(
            WorkingSet::counted(gw.view(unassigned), 3),
            &UpdateLeads::new(&gw, LeadPatch::assign("c-2")),
            &NoProgress,
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.total_succeeded, 3);
    for id in &ids[1..4] {
        assert_eq!(gw.lead(*id).unwrap().counselor_id.as_deref(), Some("c-2"));
    }
    assert_eq!(gw.lead(ids[0]).unwrap().counselor_id, None);
    assert_eq!(gw.lead(ids[5]).unwrap().counselor_id.as_deref(), Some("c-1"));
}

#[tokio::test]
async fn assign_by_id_skips_leads_that_have_a_counselor() {
    let (gw, ids) = seeded(4);
    let e = engine(50);

    e.run(
        WorkingSet::selected(vec![ids[1]]),
        &UpdateLeads::new(&gw, LeadPatch::assign("c-1")),
        &NoProgress,
        None,
    )
    .await
    .unwrap();

    let result = e
        .run(
            WorkingSet::selected(ids.clone()),
            &UpdateLeads::new(&gw, LeadPatch::assign("c-2").if_unassigned()),
            &NoProgress,
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.total_succeeded, 3);
    assert_eq!(result.total_failed, 1);
    assert_eq!(result.chunk_errors, 0);
    assert_eq!(gw.lead(ids[1]).unwrap().counselor_id.as_deref(), Some("c-1"));
    for id in [ids[0], ids[2], ids[3]] {
        assert_eq!(gw.lead(id).unwrap().counselor_id.as_deref(), Some("c-2"));
    }
}

#[tokio::test]
async fn failing_view_aborts_before_any_mutation() {
    struct BrokenView;

    #[async_trait]
    impl FilteredView<RecordId> for BrokenView {
        async fn fetch_page(&self, _offset: usize, _limit: usize) -> Result<Vec<RecordId>> {
            Err(Error::Gateway("view unavailable".into()))
        }
    }

    let (gw, _) = seeded(5);
    let audit = MemoryAuditLog::new();

    let err = engine(50)
        .run(
            WorkingSet::counted(BrokenView, 5),
            &DeleteLeads::new(&gw),
            &NoProgress,
            Some(AuditRequest::new(&audit, "ops")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Gateway(_)));
    assert!(gw.mutation_sizes().is_empty());
    assert!(audit.entries().is_empty());
}

// ---------------------------------------------------------------------------
// Preflight
// ---------------------------------------------------------------------------

#[tokio::test]
async fn chunk_size_above_gateway_limit_fails_before_any_call() {
    let (gw, ids) = seeded(120);
    let audit = MemoryAuditLog::new();

    let err = engine(100)
        .run(
            WorkingSet::selected(ids),
            &DeleteLeads::new(&gw),
            &NoProgress,
            Some(AuditRequest::new(&audit, "ops")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert!(gw.mutation_sizes().is_empty());
    assert_eq!(gw.len(), 120);
    assert!(audit.entries().is_empty());
}

#[tokio::test]
async fn empty_patch_is_rejected_before_any_call() {
    let (gw, ids) = seeded(3);

    let err = engine(50)
        .run(
            WorkingSet::selected(ids),
            &UpdateLeads::new(&gw, LeadPatch::default()),
            &NoProgress,
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Config(_)));
    assert!(gw.mutation_sizes().is_empty());
}

// ---------------------------------------------------------------------------
// Failure absorption
// ---------------------------------------------------------------------------

#[tokio::test]
async fn one_failing_chunk_does_not_stop_the_run() {
    let (gw, ids) = seeded(120);
    gw.fail_mutation_call(2);

    let result = engine(50)
        .run(
            WorkingSet::selected(ids.clone()),
            &UpdateLeads::new(&gw, LeadPatch::grade("A")),
            &NoProgress,
            None,
        )
        .await
        .unwrap();

    assert_eq!(gw.mutation_sizes(), vec![50, 50, 20]);
    assert_eq!(result.total_attempted, 120);
    assert_eq!(result.total_succeeded, 70);
    assert_eq!(result.total_failed, 50);
    assert_eq!(result.chunk_errors, 1);
    assert_eq!(result.failed_ids, ids[50..100].to_vec());
    assert!(result.is_partial());

    let failed = &result.outcomes[1];
    assert!(failed.is_hard_failure());
    assert!(failed.error.as_deref().unwrap().contains("mutation call 2"));
    assert!(!result.outcomes[0].is_hard_failure());
    assert!(!result.outcomes[2].is_hard_failure());

    assert_eq!(gw.lead(ids[49]).unwrap().grade.as_deref(), Some("A"));
    assert_eq!(gw.lead(ids[50]).unwrap().grade, None);
    assert_eq!(gw.lead(ids[100]).unwrap().grade.as_deref(), Some("A"));
}

#[tokio::test]
async fn partial_rejection_counts_short_results_as_failed() {
    let gw = MemoryGateway::new("phone");
    gw.reject_key("010-2");
    let records = RawRecord::from_rows(
        ["010-1", "010-2", "010-3"]
            .iter()
            .map(|k| json!({"phone": k}).as_object().cloned().unwrap()),
    );

    let result = engine(50)
        .run(
            WorkingSet::selected(records),
            &InsertRecords::new(&gw),
            &NoProgress,
            None,
        )
        .await
        .unwrap();

    assert_eq!(result.total_succeeded, 2);
    assert_eq!(result.total_failed, 1);
    assert_eq!(result.chunk_errors, 0);
    // A bare count cannot name the refused row.
    assert!(result.failed_ids.is_empty());
}

#[tokio::test]
async fn totals_always_add_up() {
    let (gw, mut ids) = seeded(40);
    gw.fail_mutation_call(3);
    ids.extend((0..5).map(|_| RecordId::new()));

    let result = engine(10)
        .run(
            WorkingSet::selected(ids),
            &DeleteLeads::new(&gw),
            &NoProgress,
            None,
        )
        .await
        .unwrap();

    assert_eq!(
        result.total_succeeded + result.total_skipped + result.total_failed,
        result.total_attempted
    );
    for outcome in &result.outcomes {
        assert_eq!(
            outcome.succeeded + outcome.skipped + outcome.failed,
            outcome.attempted
        );
    }
    assert_eq!(result.total_succeeded, 30);
    assert_eq!(result.total_failed, 10);
    assert_eq!(result.total_skipped, 5);
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delete_is_idempotent() {
    let (gw, ids) = seeded(8);
    for id in &ids {
        gw.add_note(*id);
    }
    let e = engine(3);

    let first = e
        .run(
            WorkingSet::selected(ids.clone()),
            &DeleteLeads::new(&gw),
            &NoProgress,
            None,
        )
        .await
        .unwrap();
    assert_eq!(first.total_succeeded, 8);
    assert_eq!(first.total_skipped, 0);
    assert!(gw.is_empty());
    assert!(ids.iter().all(|id| gw.note_count(*id) == 0));

    let second = e
        .run(
            WorkingSet::selected(ids.clone()),
            &DeleteLeads::new(&gw),
            &NoProgress,
            None,
        )
        .await
        .unwrap();
    assert_eq!(second.total_succeeded, 0);
    assert_eq!(second.total_skipped, 8);
    assert_eq!(second.total_failed, 0);
    assert_eq!(second.chunk_errors, 0);
    assert_eq!(second.summary(), "delete: 0 of 8 succeeded, 8 already absent");
}

// ---------------------------------------------------------------------------
// Retry
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn transient_chunk_error_is_retried() {
    let (gw, ids) = seeded(120);
    gw.fail_mutation_call(1);
    let e = engine(50).with_retry(RetryPolicy::new(2, Duration::from_millis(200)));

    let result = e
        .run(
            WorkingSet::selected(ids),
            &UpdateLeads::new(&gw, LeadPatch::grade("A")),
            &NoProgress,
            None,
        )
        .await
        .unwrap();

    assert_eq!(gw.mutation_sizes(), vec![50, 50, 50, 20]);
    assert_eq!(result.total_succeeded, 120);
    assert_eq!(result.chunk_errors, 0);
}

#[tokio::test]
async fn default_policy_does_not_retry() {
    let (gw, ids) = seeded(10);
    gw.fail_mutation_call(1);

    let result = engine(50)
        .run(
            WorkingSet::selected(ids),
            &UpdateLeads::new(&gw, LeadPatch::grade("A")),
            &NoProgress,
            None,
        )
        .await
        .unwrap();

    assert_eq!(gw.mutation_sizes(), vec![10]);
    assert_eq!(result.total_failed, 10);
}

#[tokio::test]
async fn permanent_errors_are_not_retried() {
    let calls = AtomicUsize::new(0);
    let mutation = FnMutation::new(MutationKind::Update, |_items: Vec<RecordId>| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<Applied<RecordId>, _>(Error::NotFound("lead table".into())) }
    });
    let e = engine(5).with_retry(RetryPolicy::new(3, Duration::ZERO));
    let ids: Vec<RecordId> = (0..5).map(|_| RecordId::new()).collect();

    let result = e
        .run(WorkingSet::selected(ids), &mutation, &NoProgress, None)
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(result.total_failed, 5);
}

#[tokio::test]
async fn short_results_are_not_retried() {
    let calls = AtomicUsize::new(0);
    let mutation = FnMutation::new(MutationKind::Update, |items: Vec<RecordId>| {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, Error>(Applied::Count(items.len() - 1)) }
    });
    let e = engine(5).with_retry(RetryPolicy::new(3, Duration::ZERO));
    let ids: Vec<RecordId> = (0..5).map(|_| RecordId::new()).collect();

    let result = e
        .run(WorkingSet::selected(ids), &mutation, &NoProgress, None)
        .await
        .unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!((result.total_succeeded, result.total_failed), (4, 1));
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

#[tokio::test]
async fn progress_is_monotonic_and_reaches_total_once() {
    let (gw, ids) = seeded(120);
    gw.fail_mutation_call(2);
    let calls = Mutex::new(Vec::new());
    let progress = |p: usize, t: usize| calls.lock().unwrap().push((p, t));

    engine(50)
        .run(
            WorkingSet::selected(ids),
            &UpdateLeads::new(&gw, LeadPatch::grade("A")),
            &progress,
            None,
        )
        .await
        .unwrap();

    let calls = calls.into_inner().unwrap();
    assert_eq!(calls, vec![(50, 120), (100, 120), (120, 120)]);
    assert!(calls.windows(2).all(|w| w[0].0 <= w[1].0));
    assert_eq!(calls.iter().filter(|(p, t)| p == t).count(), 1);
}

// ---------------------------------------------------------------------------
// Audit
// ---------------------------------------------------------------------------

#[tokio::test]
async fn audited_delete_completes_entry() {
    let (gw, ids) = seeded(5);
    let audit = MemoryAuditLog::new();

    let result = engine(2)
        .run(
            WorkingSet::selected(ids.clone()),
            &DeleteLeads::new(&gw),
            &NoProgress,
            Some(AuditRequest::new(&audit, "manager-7").context(json!({"reason": "cleanup"}))),
        )
        .await
        .unwrap();

    let entries = audit.entries();
    assert_eq!(entries.len(), 1);
    let entry = &entries[0];
    assert_eq!(entry.operation_kind, "bulk-delete");
    assert_eq!(entry.requested_by, "manager-7");
    assert_eq!(entry.status, AuditStatus::Completed);
    assert_eq!(entry.outcome_summary, result.summary());
    assert!(entry.completed_at.is_some());
    let targets: Vec<String> = ids.iter().map(|id| id.to_string()).collect();
    assert_eq!(entry.target_ids, targets);
    assert_eq!(entry.context["mode"], "selected");
    assert_eq!(entry.context["total"], 5);
    assert_eq!(entry.context["request"]["reason"], "cleanup");
}

#[tokio::test]
async fn chunk_error_marks_audit_entry_failed() {
    let (gw, ids) = seeded(5);
    gw.fail_mutation_call(1);
    let audit = MemoryAuditLog::new();

    let result = engine(2)
        .run(
            WorkingSet::selected(ids),
            &DeleteLeads::new(&gw),
            &NoProgress,
            Some(AuditRequest::new(&audit, "ops")),
        )
        .await
        .unwrap();

    assert_eq!(result.chunk_errors, 1);
    let entry = &audit.entries()[0];
    assert_eq!(entry.status, AuditStatus::Failed);
    assert!(entry.outcome_summary.contains("2 failed"));
}

/// Records calls and can refuse to open or close entries.
#[derive(Default)]
struct FlakyAudit {
    fail_begin: bool,
    fail_finish: bool,
    begins: AtomicUsize,
    finishes: AtomicUsize,
}

#[async_trait]
impl AuditRecorder for FlakyAudit {
    async fn begin(
        &self,
        _operation_kind: &str,
        _target_ids: Vec<String>,
        _requested_by: &str,
        _context: serde_json::Value,
    ) -> Result<AuditId> {
        self.begins.fetch_add(1, Ordering::SeqCst);
        if self.fail_begin {
            return Err(Error::Audit("audit store down".into()));
        }
        Ok(AuditId::new())
    }

    async fn complete(&self, _id: AuditId, _summary: &str) -> Result<()> {
        self.finishes.fetch_add(1, Ordering::SeqCst);
        if self.fail_finish {
            return Err(Error::Audit("audit store down".into()));
        }
        Ok(())
    }

    async fn fail(&self, id: AuditId, summary: &str) -> Result<()> {
        self.complete(id, summary).await
    }

    async fn list(&self, _limit: usize) -> Result<Vec<AuditLogEntry>> {
        Ok(Vec::new())
    }
}

#[tokio::test]
async fn failed_audit_begin_prevents_mutation() {
    let (gw, ids) = seeded(5);
    let audit = FlakyAudit {
        fail_begin: true,
        ..FlakyAudit::default()
    };

    let err = engine(50)
        .run(
            WorkingSet::selected(ids),
            &DeleteLeads::new(&gw),
            &NoProgress,
            Some(AuditRequest::new(&audit, "ops")),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Audit(_)));
    assert!(gw.mutation_sizes().is_empty());
    assert_eq!(gw.len(), 5);
    assert_eq!(audit.finishes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn failed_audit_finish_does_not_fail_the_run() {
    let (gw, ids) = seeded(5);
    let audit = FlakyAudit {
        fail_finish: true,
        ..FlakyAudit::default()
    };

    let result = engine(50)
        .run(
            WorkingSet::selected(ids),
            &DeleteLeads::new(&gw),
            &NoProgress,
            Some(AuditRequest::new(&audit, "ops")),
        )
        .await
        .unwrap();

    assert_eq!(result.total_succeeded, 5);
    assert_eq!(audit.begins.load(Ordering::SeqCst), 1);
    assert_eq!(audit.finishes.load(Ordering::SeqCst), 1);
}
