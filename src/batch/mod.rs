//! Chunked batch mutation: planning, the engine, standard mutations and
//! progress reporting.

pub mod engine;
pub mod mutation;
pub mod planner;
pub mod progress;

pub use engine::{AuditRequest, BatchMutationEngine, RetryPolicy};
pub use mutation::{Applied, DeleteLeads, FnMutation, InsertRecords, Mutation, UpdateLeads};
pub use planner::{ChunkPlanner, Chunks};
pub use progress::{LogProgress, NoProgress, ProgressReporter};
