//! The narrow interface to the external lead store.
//!
//! Every call carries at most [`RemoteGateway::max_batch`] items. A call that
//! fails as a whole returns `Err`; a call that succeeds but touches fewer rows
//! than requested returns the smaller count or id set as `Ok`.

pub mod memory;

use async_trait::async_trait;
use std::collections::HashSet;

use crate::error::{Error, Result};
use crate::model::{LeadPatch, RawRecord, RecordId};

#[async_trait]
pub trait RemoteGateway: Send + Sync {
    /// Per-call ceiling on keys, ids or records.
    fn max_batch(&self) -> usize;

    /// Which of `keys` already exist in the store.
    async fn exists_by_key(&self, keys: &[String]) -> Result<HashSet<String>>;

    /// Which of `ids` still exist in the store.
    async fn existing_ids(&self, ids: &[RecordId]) -> Result<HashSet<RecordId>>;

    /// Insert records. Returns how many rows were actually inserted.
    async fn insert(&self, records: &[RawRecord]) -> Result<usize>;

    /// Apply `patch` to `ids`. Returns how many rows were updated.
    async fn update(&self, ids: &[RecordId], patch: &LeadPatch) -> Result<usize>;

    /// Remove dependent rows, then the leads themselves. Returns the ids
    /// actually removed; ids already gone are simply absent from the result.
    async fn delete(&self, ids: &[RecordId]) -> Result<Vec<RecordId>>;
}

/// Reject a planned chunk size the gateway could never accept in one call.
pub fn ensure_chunk_fits(chunk_size: usize, limit: usize) -> Result<()> {
    if chunk_size > limit {
        Err(Error::Config(format!(
            "chunk size {chunk_size} exceeds the gateway's per-call limit of {limit}"
        )))
    } else {
        Ok(())
    }
}

/// Reject a call carrying more than `limit` items.
pub fn ensure_within(len: usize, limit: usize) -> Result<()> {
    if len > limit {
        Err(Error::BatchTooLarge { len, limit })
    } else {
        Ok(())
    }
}
