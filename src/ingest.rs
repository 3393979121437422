//! Upload pipeline: dedup, then chunked insert of the unique rows.

use serde::Serialize;
use tracing::warn;

use crate::batch::{BatchMutationEngine, InsertRecords, ProgressReporter};
use crate::config::BatchSettings;
use crate::dedup::{DedupConfig, DedupOutcome, DeduplicationStage};
use crate::error::Result;
use crate::gateway::{RemoteGateway, ensure_chunk_fits};
use crate::model::{BatchResult, RawRecord, WorkingSet};

/// Everything a caller needs to render an upload: the three-way dedup
/// breakdown and the insert result.
#[derive(Debug, Clone, Serialize)]
pub struct ImportReport {
    pub dedup: DedupOutcome,
    /// Failed ids are origin row indices.
    pub insert: BatchResult<usize>,
}

impl ImportReport {
    pub fn warning(&self) -> Option<String> {
        self.dedup.warning()
    }
}

/// Dedup `records` on `key_field` against `gateway`, then insert the unique
/// rows in mutation-sized chunks.
pub async fn import_records<G, P>(
    gateway: &G,
    settings: &BatchSettings,
    records: Vec<RawRecord>,
    key_field: &str,
    progress: &P,
) -> Result<ImportReport>
where
    G: RemoteGateway + ?Sized,
    P: ProgressReporter + ?Sized,
{
    let engine = BatchMutationEngine::from_settings(settings)?;
    ensure_chunk_fits(engine.chunk_size(), gateway.max_batch())?;
    let stage = DeduplicationStage::new(gateway, DedupConfig::from(settings));

    let dedup = stage.dedup(records, key_field).await?;
    if let Some(warning) = dedup.warning() {
        warn!("{warning}");
    }

    let insert = engine
        .run(
            WorkingSet::selected(dedup.unique.clone()),
            &InsertRecords::new(gateway),
            progress,
            None,
        )
        .await?;

    Ok(ImportReport { dedup, insert })
}
