//! Core data model.
//!
//! Records flow through the engine as either stored leads (identified by
//! [`RecordId`]) or raw, not-yet-validated rows from an upload (identified by
//! their origin index). Everything the engine needs from an item is its
//! identity, captured by [`Identified`].

pub mod audit;
pub mod batch;
pub mod lead;
pub mod record;
pub mod working_set;

pub use audit::{AuditId, AuditLogEntry, AuditStatus};
pub use batch::{BatchResult, Chunk, ChunkOutcome, MutationKind};
pub use lead::{Lead, LeadFilter, LeadPatch};
pub use record::RawRecord;
pub use working_set::{FilteredView, VecView, WorkingSet};

use serde::{Deserialize, Serialize};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// Anything the engine can chunk and report on.
pub trait Identified {
    type Id: Clone + Eq + Hash + Display + Debug + Send + Sync + 'static;

    fn id(&self) -> Self::Id;
}

/// Newtype for stored lead IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

impl Identified for RecordId {
    type Id = RecordId;

    fn id(&self) -> RecordId {
        *self
    }
}
