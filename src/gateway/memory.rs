//! In-process lead store implementing [`RemoteGateway`].
//!
//! Backs tests and dry runs. Enforces the per-call batch ceiling like a real
//! service would, records the size of every call, and can be told to fail
//! specific calls or reject specific keys.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use super::{RemoteGateway, ensure_within};
use crate::config::DEFAULT_MUTATION_BATCH_SIZE;
use crate::error::{Error, Result};
use crate::model::{FilteredView, Lead, LeadFilter, LeadPatch, RawRecord, RecordId};

/// Shared in-memory store. Clones share state.
#[derive(Clone)]
pub struct MemoryGateway {
    key_field: String,
    max_batch: usize,
    state: Arc<Mutex<State>>,
}

#[derive(Default)]
struct State {
    /// Insertion order; views list newest first.
    leads: Vec<Lead>,
    by_key: HashMap<String, RecordId>,
    notes: HashMap<RecordId, usize>,
    lookup_calls: usize,
    mutation_calls: usize,
    fail_lookup_calls: HashSet<usize>,
    fail_mutation_calls: HashSet<usize>,
    rejected_keys: HashSet<String>,
    lookup_sizes: Vec<usize>,
    mutation_sizes: Vec<usize>,
}

impl MemoryGateway {
    /// Empty store keyed on `key_field`.
    pub fn new(key_field: impl Into<String>) -> Self {
        Self {
            key_field: key_field.into(),
            max_batch: DEFAULT_MUTATION_BATCH_SIZE,
            state: Arc::new(Mutex::new(State::default())),
        }
    }

    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // -----------------------------------------------------------------------
    // Seeding and inspection
    // -----------------------------------------------------------------------

    /// Insert leads with the given keys directly, bypassing limits and faults.
    pub fn seed_keys<I, S>(&self, keys: I) -> Vec<RecordId>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut state = self.state();
        keys.into_iter()
            .map(|key| {
                let key = key.into();
                let lead = new_lead(key.clone(), serde_json::json!({}), None, None);
                let id = lead.id;
                state.by_key.insert(key, id);
                state.leads.push(lead);
                id
            })
            .collect()
    }

    /// Attach a dependent note to a lead.
    pub fn add_note(&self, id: RecordId) {
        *self.state().notes.entry(id).or_default() += 1;
    }

    pub fn note_count(&self, id: RecordId) -> usize {
        self.state().notes.get(&id).copied().unwrap_or(0)
    }

    pub fn lead(&self, id: RecordId) -> Option<Lead> {
        self.state().leads.iter().find(|l| l.id == id).cloned()
    }

    pub fn lead_by_key(&self, key: &str) -> Option<Lead> {
        let state = self.state();
        let id = state.by_key.get(key)?;
        state.leads.iter().find(|l| l.id == *id).cloned()
    }

    pub fn len(&self) -> usize {
        self.state().leads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sizes of every `exists_by_key` call, in order.
    pub fn lookup_sizes(&self) -> Vec<usize> {
        self.state().lookup_sizes.clone()
    }

    /// Sizes of every insert, update and delete call, in order.
    pub fn mutation_sizes(&self) -> Vec<usize> {
        self.state().mutation_sizes.clone()
    }

    // -----------------------------------------------------------------------
    // Fault injection
    // -----------------------------------------------------------------------

    /// Fail the `n`th (1-based) `exists_by_key` call.
    pub fn fail_lookup_call(&self, n: usize) {
        self.state().fail_lookup_calls.insert(n);
    }

    /// Fail the `n`th (1-based) insert, update or delete call.
    pub fn fail_mutation_call(&self, n: usize) {
        self.state().fail_mutation_calls.insert(n);
    }

    /// Silently refuse to insert rows with this key (partial rejection).
    pub fn reject_key(&self, key: impl Into<String>) {
        self.state().rejected_keys.insert(key.into());
    }

    /// Counted-mode view over leads matching `filter`, newest first.
    pub fn view(&self, filter: LeadFilter) -> MemoryView {
        MemoryView {
            state: Arc::clone(&self.state),
            filter,
        }
    }

    fn begin_mutation(&self, len: usize) -> Result<MutexGuard<'_, State>> {
        ensure_within(len, self.max_batch)?;
        let mut state = self.state();
        state.mutation_calls += 1;
        state.mutation_sizes.push(len);
        let call = state.mutation_calls;
        if state.fail_mutation_calls.contains(&call) {
            return Err(Error::Gateway(format!("injected failure on mutation call {call}")));
        }
        Ok(state)
    }
}

#[async_trait]
impl RemoteGateway for MemoryGateway {
    fn max_batch(&self) -> usize {
        self.max_batch
    }

    async fn exists_by_key(&self, keys: &[String]) -> Result<HashSet<String>> {
        ensure_within(keys.len(), self.max_batch)?;
        let mut state = self.state();
        state.lookup_calls += 1;
        state.lookup_sizes.push(keys.len());
        let call = state.lookup_calls;
        if state.fail_lookup_calls.contains(&call) {
            return Err(Error::Gateway(format!("injected failure on lookup call {call}")));
        }
        Ok(keys
            .iter()
            .filter(|k| state.by_key.contains_key(k.as_str()))
            .cloned()
            .collect())
    }

    async fn existing_ids(&self, ids: &[RecordId]) -> Result<HashSet<RecordId>> {
        ensure_within(ids.len(), self.max_batch)?;
        let state = self.state();
        Ok(ids
            .iter()
            .filter(|id| state.leads.iter().any(|l| l.id == **id))
            .copied()
            .collect())
    }

    async fn insert(&self, records: &[RawRecord]) -> Result<usize> {
        let mut state = self.begin_mutation(records.len())?;
        let mut inserted = 0;
        for record in records {
            let Some(key) = record.key(&self.key_field) else {
                continue;
            };
            if state.by_key.contains_key(&key) || state.rejected_keys.contains(&key) {
                continue;
            }
            let lead = new_lead(
                key.clone(),
                serde_json::Value::Object(record.fields.clone()),
                record.get_str("grade").map(str::to_string),
                record.get_str("counselor_id").map(str::to_string),
            );
            state.by_key.insert(key, lead.id);
            state.leads.push(lead);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn update(&self, ids: &[RecordId], patch: &LeadPatch) -> Result<usize> {
        let mut state = self.begin_mutation(ids.len())?;
        let wanted: HashSet<&RecordId> = ids.iter().collect();
        Ok(state
            .leads
            .iter_mut()
            .filter(|l| wanted.contains(&l.id))
            .map(|l| patch.apply_to(l))
            .filter(|changed| *changed)
            .count())
    }

    async fn delete(&self, ids: &[RecordId]) -> Result<Vec<RecordId>> {
        let mut state = self.begin_mutation(ids.len())?;
        let mut removed = Vec::new();
        for id in ids {
            let Some(pos) = state.leads.iter().position(|l| l.id == *id) else {
                continue;
            };
            state.notes.remove(id);
            let lead = state.leads.remove(pos);
            state.by_key.remove(&lead.dedup_key);
            removed.push(*id);
        }
        Ok(removed)
    }
}

/// Filtered, newest-first view over a [`MemoryGateway`].
pub struct MemoryView {
    state: Arc<Mutex<State>>,
    filter: LeadFilter,
}

#[async_trait]
impl FilteredView<RecordId> for MemoryView {
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<RecordId>> {
        let state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        Ok(state
            .leads
            .iter()
            .rev()
            .filter(|l| self.filter.matches(l))
            .skip(offset)
            .take(limit)
            .map(|l| l.id)
            .collect())
    }
}

fn new_lead(
    dedup_key: String,
    data: serde_json::Value,
    grade: Option<String>,
    counselor_id: Option<String>,
) -> Lead {
    let now = Utc::now();
    Lead {
        id: RecordId::new(),
        dedup_key,
        data,
        grade,
        counselor_id,
        created_at: now,
        updated_at: now,
    }
}
