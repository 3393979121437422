//! Integration tests for telemetry initialization and span helpers.

use crm_batch::model::{BatchResult, ChunkOutcome, MutationKind, RecordId};
use crm_batch::telemetry::{TelemetryConfig, batch, init_telemetry};

#[test]
fn telemetry_initializes_without_endpoint() {
    // The global subscriber can only be set once per process; a second
    // init returning Err is acceptable here.
    let config = TelemetryConfig {
        endpoint: None,
        service_name: "crm-batch-test".to_string(),
        log_level: "debug".to_string(),
    };
    let guard = init_telemetry(config);
    if let Ok(guard) = guard {
        guard.force_flush();
    }
}

#[test]
fn batch_span_records_chunks_and_result() {
    let span = batch::start_batch_span(MutationKind::Delete, 3, 2);
    let mut result = BatchResult::<RecordId>::new(MutationKind::Delete);

    let ok = ChunkOutcome {
        chunk_index: 0,
        attempted: 2,
        succeeded: 1,
        skipped: 1,
        failed: 0,
        failed_ids: vec![],
        error: None,
    };
    batch::record_chunk_outcome(&ok);
    result.absorb(ok);

    let failed = ChunkOutcome::errored(1, vec![RecordId::new()], "timeout".into());
    batch::record_chunk_outcome(&failed);
    result.absorb(failed);

    batch::record_batch_result(&span, &result);
    assert_eq!(result.chunk_errors, 1);
}
