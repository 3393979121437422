//! Stored lead rows, the patch applied by bulk updates, and view filters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::RecordId;

/// A lead as persisted in the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lead {
    pub id: RecordId,
    /// Normalized dedup key (e.g. phone number). Unique across the store.
    pub dedup_key: String,
    /// Remaining uploaded fields. Opaque to the engine.
    pub data: serde_json::Value,
    pub grade: Option<String>,
    pub counselor_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Field changes applied to every lead in an update chunk.
///
/// `None` leaves the column untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadPatch {
    pub grade: Option<String>,
    pub counselor_id: Option<String>,
    /// Leave leads that already have a counselor untouched.
    #[serde(default)]
    pub only_unassigned: bool,
}

impl LeadPatch {
    pub fn grade(grade: impl Into<String>) -> Self {
        Self {
            grade: Some(grade.into()),
            ..Self::default()
        }
    }

    /// Assign (or reassign) leads to a counselor.
    pub fn assign(counselor_id: impl Into<String>) -> Self {
        Self {
            counselor_id: Some(counselor_id.into()),
            ..Self::default()
        }
    }

    /// Restrict the patch to leads with no counselor yet.
    pub fn if_unassigned(mut self) -> Self {
        self.only_unassigned = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.grade.is_none() && self.counselor_id.is_none()
    }

    /// Apply to an in-memory lead. Returns whether anything was set.
    pub fn apply_to(&self, lead: &mut Lead) -> bool {
        if self.is_empty() || (self.only_unassigned && lead.counselor_id.is_some()) {
            return false;
        }
        if let Some(ref grade) = self.grade {
            lead.grade = Some(grade.clone());
        }
        if let Some(ref counselor) = self.counselor_id {
            lead.counselor_id = Some(counselor.clone());
        }
        lead.updated_at = Utc::now();
        true
    }
}

/// Filter behind a counted-mode view. Views sort newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeadFilter {
    pub grade: Option<String>,
    pub counselor_id: Option<String>,
    /// Only leads with no counselor.
    pub unassigned: bool,
    /// Substring match against the dedup key.
    pub search: Option<String>,
}

impl LeadFilter {
    pub fn matches(&self, lead: &Lead) -> bool {
        if let Some(ref grade) = self.grade {
            if lead.grade.as_deref() != Some(grade.as_str()) {
                return false;
            }
        }
        if let Some(ref counselor) = self.counselor_id {
            if lead.counselor_id.as_deref() != Some(counselor.as_str()) {
                return false;
            }
        }
        if self.unassigned && lead.counselor_id.is_some() {
            return false;
        }
        if let Some(ref needle) = self.search {
            if !lead.dedup_key.contains(needle.as_str()) {
                return false;
            }
        }
        true
    }
}
