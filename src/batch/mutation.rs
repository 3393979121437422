//! Per-chunk mutations the engine drives.
//!
//! A [`Mutation`] turns one chunk into one gateway call and reports what the
//! store confirmed. It never decides what counts as failure; the engine does.

use async_trait::async_trait;
use std::future::Future;

use crate::error::{Error, Result};
use crate::gateway::{RemoteGateway, ensure_chunk_fits};
use crate::model::{Identified, LeadPatch, MutationKind, RawRecord, RecordId};

/// What the store confirmed for one chunk.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied<Id> {
    /// The store named the rows it touched. `skipped` rows were already
    /// absent and neither succeeded nor failed.
    Ids { applied: Vec<Id>, skipped: Vec<Id> },
    /// The store only reported a count.
    Count(usize),
}

#[async_trait]
pub trait Mutation<T: Identified + Send + Sync>: Send + Sync {
    fn kind(&self) -> MutationKind;

    /// Checked once before the first chunk. An `Err` aborts the run with
    /// nothing sent.
    fn preflight(&self, _chunk_size: usize) -> Result<()> {
        Ok(())
    }

    /// Perform one gateway call for `items`. `Err` means the whole call failed.
    async fn apply(&self, items: &[T]) -> Result<Applied<T::Id>>;
}

// ---------------------------------------------------------------------------
// Insert
// ---------------------------------------------------------------------------

/// Insert deduplicated upload rows.
pub struct InsertRecords<'a, G: ?Sized> {
    gateway: &'a G,
}

impl<'a, G: RemoteGateway + ?Sized> InsertRecords<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl<G: RemoteGateway + ?Sized> Mutation<RawRecord> for InsertRecords<'_, G> {
    fn kind(&self) -> MutationKind {
        MutationKind::Insert
    }

    fn preflight(&self, chunk_size: usize) -> Result<()> {
        ensure_chunk_fits(chunk_size, self.gateway.max_batch())
    }

    async fn apply(&self, items: &[RawRecord]) -> Result<Applied<usize>> {
        Ok(Applied::Count(self.gateway.insert(items).await?))
    }
}

// ---------------------------------------------------------------------------
// Update
// ---------------------------------------------------------------------------

/// Apply a patch (grade edit, counselor assignment) to stored leads.
pub struct UpdateLeads<'a, G: ?Sized> {
    gateway: &'a G,
    patch: LeadPatch,
}

impl<'a, G: RemoteGateway + ?Sized> UpdateLeads<'a, G> {
    pub fn new(gateway: &'a G, patch: LeadPatch) -> Self {
        Self { gateway, patch }
    }
}

#[async_trait]
impl<G: RemoteGateway + ?Sized> Mutation<RecordId> for UpdateLeads<'_, G> {
    fn kind(&self) -> MutationKind {
        MutationKind::Update
    }

    fn preflight(&self, chunk_size: usize) -> Result<()> {
        if self.patch.is_empty() {
            return Err(Error::Config("update patch sets no fields".to_string()));
        }
        ensure_chunk_fits(chunk_size, self.gateway.max_batch())
    }

    async fn apply(&self, items: &[RecordId]) -> Result<Applied<RecordId>> {
        Ok(Applied::Count(self.gateway.update(items, &self.patch).await?))
    }
}

// ---------------------------------------------------------------------------
// Delete
// ---------------------------------------------------------------------------

/// Cascade-delete stored leads.
///
/// Ids are checked against the store first so that already-absent ids are
/// reported as skipped and a re-run counts zero additional deletions.
pub struct DeleteLeads<'a, G: ?Sized> {
    gateway: &'a G,
}

impl<'a, G: RemoteGateway + ?Sized> DeleteLeads<'a, G> {
    pub fn new(gateway: &'a G) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl<G: RemoteGateway + ?Sized> Mutation<RecordId> for DeleteLeads<'_, G> {
    fn kind(&self) -> MutationKind {
        MutationKind::Delete
    }

    fn preflight(&self, chunk_size: usize) -> Result<()> {
        ensure_chunk_fits(chunk_size, self.gateway.max_batch())
    }

    async fn apply(&self, items: &[RecordId]) -> Result<Applied<RecordId>> {
        let existing = self.gateway.existing_ids(items).await?;
        let (present, skipped): (Vec<RecordId>, Vec<RecordId>) =
            items.iter().partition(|id| existing.contains(*id));

        let applied = if present.is_empty() {
            Vec::new()
        } else {
            self.gateway.delete(&present).await?
        };

        Ok(Applied::Ids { applied, skipped })
    }
}

// ---------------------------------------------------------------------------
// Closure adapter
// ---------------------------------------------------------------------------

/// Wrap an async closure as a [`Mutation`].
pub struct FnMutation<F> {
    kind: MutationKind,
    f: F,
}

impl<F> FnMutation<F> {
    pub fn new(kind: MutationKind, f: F) -> Self {
        Self { kind, f }
    }
}

#[async_trait]
impl<T, F, Fut> Mutation<T> for FnMutation<F>
where
    T: Identified + Clone + Send + Sync + 'static,
    F: Fn(Vec<T>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Applied<T::Id>>> + Send,
{
    fn kind(&self) -> MutationKind {
        self.kind
    }

    async fn apply(&self, items: &[T]) -> Result<Applied<T::Id>> {
        (self.f)(items.to_vec()).await
    }
}
