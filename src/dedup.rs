//! Two-tier deduplication of uploaded records.
//!
//! Tier one finds keys repeated within the file; tier two asks the store which
//! of the remaining first-occurrence keys it already holds. A lookup failure
//! degrades the run to intra-file detection only and is reported, never
//! swallowed.

use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BatchSettings;
use crate::error::{Error, Result};
use crate::gateway::RemoteGateway;
use crate::model::RawRecord;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Reason attached to every store duplicate.
pub const ALREADY_PRESENT: &str = "already present";

/// A later occurrence of a key already seen in the same file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IntraFileDuplicate {
    pub record: RawRecord,
    pub origin_index: usize,
    /// Origin index of the occurrence that claimed the key.
    pub first_index: usize,
}

/// A record whose key the store already holds.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreDuplicate {
    pub record: RawRecord,
    pub reason: String,
}

/// How the store-duplicate phase went.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LookupStatus {
    Complete { batches: usize },
    /// A lookup batch failed; store duplicates were not detected at all.
    Degraded {
        /// 1-based number of the batch that failed.
        failed_batch: usize,
        total_batches: usize,
        error: String,
    },
}

/// Three-way partition of an upload plus the rows without a usable key.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DedupOutcome {
    pub unique: Vec<RawRecord>,
    pub intra_file_duplicates: Vec<IntraFileDuplicate>,
    pub store_duplicates: Vec<StoreDuplicate>,
    /// Origin indices of rows whose key was missing or blank.
    pub discarded: Vec<usize>,
    pub lookup: LookupStatus,
}

impl DedupOutcome {
    pub fn is_degraded(&self) -> bool {
        matches!(self.lookup, LookupStatus::Degraded { .. })
    }

    /// Caller-facing warning when store detection was skipped.
    pub fn warning(&self) -> Option<String> {
        match &self.lookup {
            LookupStatus::Complete { .. } => None,
            LookupStatus::Degraded {
                failed_batch,
                total_batches,
                error,
            } => Some(format!(
                "store duplicate check skipped: lookup batch {failed_batch}/{total_batches} failed ({error}); \
                 {} records treated as unique",
                self.unique.len()
            )),
        }
    }
}

/// Tuning for the store lookup phase.
#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub lookup_batch_size: usize,
    /// Batch count above which the stage yields between batches.
    pub yield_threshold: usize,
    /// Pause between batches once over the threshold; zero just yields.
    pub yield_delay: Duration,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self::from(&BatchSettings::default())
    }
}

impl From<&BatchSettings> for DedupConfig {
    fn from(settings: &BatchSettings) -> Self {
        Self {
            lookup_batch_size: settings.lookup_batch_size,
            yield_threshold: settings.yield_threshold,
            yield_delay: settings.yield_delay(),
        }
    }
}

pub struct DeduplicationStage<'a, G: ?Sized> {
    gateway: &'a G,
    config: DedupConfig,
}

impl<'a, G: RemoteGateway + ?Sized> DeduplicationStage<'a, G> {
    pub fn new(gateway: &'a G, config: DedupConfig) -> Self {
        Self { gateway, config }
    }

    /// Partition `records` by `key_field`.
    ///
    /// Only configuration problems are errors; lookup failures degrade.
    pub async fn dedup(&self, records: Vec<RawRecord>, key_field: &str) -> Result<DedupOutcome> {
        if key_field.trim().is_empty() {
            return Err(Error::Config("no dedup key field designated".to_string()));
        }
        let batch_size = self.config.lookup_batch_size.min(self.gateway.max_batch());
        if batch_size == 0 {
            return Err(Error::InvalidChunkSize(batch_size));
        }

        let total = records.len();

        // Tier one: first occurrence claims the key.
        let mut first_seen: HashMap<String, usize> = HashMap::new();
        let mut candidates: Vec<(String, RawRecord)> = Vec::new();
        let mut intra_file_duplicates = Vec::new();
        let mut discarded = Vec::new();

        for record in records {
            let Some(key) = record.key(key_field) else {
                discarded.push(record.origin_index);
                continue;
            };
            match first_seen.get(&key) {
                Some(&first_index) => intra_file_duplicates.push(IntraFileDuplicate {
                    origin_index: record.origin_index,
                    first_index,
                    record,
                }),
                None => {
                    first_seen.insert(key.clone(), record.origin_index);
                    candidates.push((key, record));
                }
            }
        }

        // Tier two: ask the store about first occurrences only.
        let keys: Vec<String> = candidates.iter().map(|(k, _)| k.clone()).collect();
        let (known, lookup) = self.lookup_known(&keys, batch_size).await;

        let mut unique = Vec::new();
        let mut store_duplicates = Vec::new();
        for (key, record) in candidates {
            if known.contains(&key) {
                store_duplicates.push(StoreDuplicate {
                    record,
                    reason: ALREADY_PRESENT.to_string(),
                });
            } else {
                unique.push(record);
            }
        }

        let outcome = DedupOutcome {
            unique,
            intra_file_duplicates,
            store_duplicates,
            discarded,
            lookup,
        };

        for (class, n) in [
            ("unique", outcome.unique.len()),
            ("intra_file", outcome.intra_file_duplicates.len()),
            ("store", outcome.store_duplicates.len()),
            ("discarded", outcome.discarded.len()),
        ] {
            metrics::dedup_records().add(n as u64, &[KeyValue::new("class", class)]);
        }
        info!(
            total,
            unique = outcome.unique.len(),
            intra_file = outcome.intra_file_duplicates.len(),
            store = outcome.store_duplicates.len(),
            discarded = outcome.discarded.len(),
            degraded = outcome.is_degraded(),
            "dedup finished"
        );

        Ok(outcome)
    }

    /// Batch `keys` through the gateway. On any failure the partial set is
    /// thrown away.
    async fn lookup_known(
        &self,
        keys: &[String],
        batch_size: usize,
    ) -> (HashSet<String>, LookupStatus) {
        let total_batches = keys.len().div_ceil(batch_size);
        let throttle = total_batches > self.config.yield_threshold;
        let mut known = HashSet::new();

        for (i, batch) in keys.chunks(batch_size).enumerate() {
            if throttle && i > 0 {
                if self.config.yield_delay.is_zero() {
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(self.config.yield_delay).await;
                }
            }

            match self.gateway.exists_by_key(batch).await {
                Ok(found) => {
                    debug!(batch = i + 1, total_batches, found = found.len(), "lookup batch");
                    known.extend(found);
                }
                Err(e) => {
                    warn!(
                        batch = i + 1,
                        total_batches,
                        error = %e,
                        "store lookup failed, skipping store duplicate detection"
                    );
                    metrics::dedup_degraded().add(1, &[]);
                    return (
                        HashSet::new(),
                        LookupStatus::Degraded {
                            failed_batch: i + 1,
                            total_batches,
                            error: e.to_string(),
                        },
                    );
                }
            }
        }

        (
            known,
            LookupStatus::Complete {
                batches: total_batches,
            },
        )
    }
}
