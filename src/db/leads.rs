//! Lead store: the Postgres [`RemoteGateway`] and counted-mode view.

use async_trait::async_trait;
use std::collections::HashSet;
use uuid::Uuid;

use crate::error::Result;
use crate::gateway::{RemoteGateway, ensure_within};
use crate::model::{FilteredView, LeadFilter, LeadPatch, RawRecord, RecordId};

/// Gateway over the `leads` and `lead_notes` tables.
pub struct LeadStore {
    pool: sqlx::PgPool,
    key_field: String,
    max_batch: usize,
}

impl LeadStore {
    pub(crate) fn new(pool: sqlx::PgPool, key_field: String, max_batch: usize) -> Self {
        Self {
            pool,
            key_field,
            max_batch,
        }
    }

    /// Attach a note to a lead. Notes are removed by the delete cascade.
    pub async fn add_note(&self, lead_id: RecordId, body: &str) -> Result<()> {
        sqlx::query("INSERT INTO lead_notes (id, lead_id, body) VALUES ($1, $2, $3)")
            .bind(Uuid::new_v4())
            .bind(lead_id.0)
            .bind(body)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteGateway for LeadStore {
    fn max_batch(&self) -> usize {
        self.max_batch
    }

    async fn exists_by_key(&self, keys: &[String]) -> Result<HashSet<String>> {
        ensure_within(keys.len(), self.max_batch)?;
        let found: Vec<String> =
            sqlx::query_scalar("SELECT dedup_key FROM leads WHERE dedup_key = ANY($1)")
                .bind(keys)
                .fetch_all(&self.pool)
                .await?;
        Ok(found.into_iter().collect())
    }

    async fn existing_ids(&self, ids: &[RecordId]) -> Result<HashSet<RecordId>> {
        ensure_within(ids.len(), self.max_batch)?;
        let found: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM leads WHERE id = ANY($1)")
            .bind(to_uuids(ids))
            .fetch_all(&self.pool)
            .await?;
        Ok(found.into_iter().map(RecordId).collect())
    }

    async fn insert(&self, records: &[RawRecord]) -> Result<usize> {
        ensure_within(records.len(), self.max_batch)?;
        let now = chrono::Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for record in records {
            // Rows without a key never reach here after dedup; refuse them anyway.
            let Some(key) = record.key(&self.key_field) else {
                continue;
            };
            // ON CONFLICT keeps retried chunks from double-inserting.
            let rows = sqlx::query(
                "INSERT INTO leads (id, dedup_key, data, grade, counselor_id, created_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $6)
                 ON CONFLICT (dedup_key) DO NOTHING",
            )
            .bind(Uuid::new_v4())
            .bind(&key)
            .bind(serde_json::Value::Object(record.fields.clone()))
            .bind(record.get_str("grade"))
            .bind(record.get_str("counselor_id"))
            .bind(now)
            .execute(&mut *tx)
            .await?
            .rows_affected();
            inserted += rows as usize;
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn update(&self, ids: &[RecordId], patch: &LeadPatch) -> Result<usize> {
        ensure_within(ids.len(), self.max_batch)?;
        if patch.is_empty() || ids.is_empty() {
            return Ok(0);
        }
        let rows = sqlx::query(
            "UPDATE leads
             SET grade = COALESCE($1, grade),
                 counselor_id = COALESCE($2, counselor_id),
                 updated_at = $3
             WHERE id = ANY($4)
             AND (NOT $5 OR counselor_id IS NULL)",
        )
        .bind(patch.grade.as_deref())
        .bind(patch.counselor_id.as_deref())
        .bind(chrono::Utc::now())
        .bind(to_uuids(ids))
        .bind(patch.only_unassigned)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows as usize)
    }

    async fn delete(&self, ids: &[RecordId]) -> Result<Vec<RecordId>> {
        ensure_within(ids.len(), self.max_batch)?;
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let uuids = to_uuids(ids);
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM lead_notes WHERE lead_id = ANY($1)")
            .bind(&uuids)
            .execute(&mut *tx)
            .await?;
        let removed: Vec<Uuid> =
            sqlx::query_scalar("DELETE FROM leads WHERE id = ANY($1) RETURNING id")
                .bind(&uuids)
                .fetch_all(&mut *tx)
                .await?;

        tx.commit().await?;
        Ok(removed.into_iter().map(RecordId).collect())
    }
}

/// Newest-first page source over lead ids matching a filter.
pub struct LeadView {
    pool: sqlx::PgPool,
    filter: LeadFilter,
}

impl LeadView {
    pub(crate) fn new(pool: sqlx::PgPool, filter: LeadFilter) -> Self {
        Self { pool, filter }
    }
}

#[async_trait]
impl FilteredView<RecordId> for LeadView {
    async fn fetch_page(&self, offset: usize, limit: usize) -> Result<Vec<RecordId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM leads
             WHERE ($1::text IS NULL OR grade = $1)
             AND ($2::text IS NULL OR counselor_id = $2)
             AND (NOT $3 OR counselor_id IS NULL)
             AND ($4::text IS NULL OR strpos(dedup_key, $4) > 0)
             ORDER BY created_at DESC, id
             LIMIT $5 OFFSET $6",
        )
        .bind(self.filter.grade.as_deref())
        .bind(self.filter.counselor_id.as_deref())
        .bind(self.filter.unassigned)
        .bind(self.filter.search.as_deref())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(RecordId).collect())
    }
}

fn to_uuids(ids: &[RecordId]) -> Vec<Uuid> {
    ids.iter().map(|id| id.0).collect()
}
