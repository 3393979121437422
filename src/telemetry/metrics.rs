//! Metric instrument factories for crm-batch.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"crm-batch"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("crm-batch")
}

/// Counter: chunks processed.
/// Labels: `kind`, `result` ("ok" | "partial" | "error").
pub fn batch_chunks() -> Counter<u64> {
    meter()
        .u64_counter("crm.batch.chunks")
        .with_description("Number of chunks processed by batch runs")
        .build()
}

/// Counter: rows by outcome.
/// Labels: `kind`, `outcome` ("succeeded" | "skipped" | "failed").
pub fn batch_items() -> Counter<u64> {
    meter()
        .u64_counter("crm.batch.items")
        .with_description("Rows handled by batch runs, by outcome")
        .build()
}

/// Histogram: wall time of a whole batch run.
/// Labels: `kind`.
pub fn batch_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("crm.batch.duration_ms")
        .with_description("Batch run duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: upload rows by dedup classification.
/// Labels: `class` ("unique" | "intra_file" | "store" | "discarded").
pub fn dedup_records() -> Counter<u64> {
    meter()
        .u64_counter("crm.dedup.records")
        .with_description("Uploaded rows by dedup classification")
        .build()
}

/// Counter: dedup runs that fell back to intra-file detection only.
pub fn dedup_degraded() -> Counter<u64> {
    meter()
        .u64_counter("crm.dedup.degraded")
        .with_description("Dedup runs whose store lookup failed")
        .build()
}
