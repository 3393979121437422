//! # crm-batch
//!
//! Batch mutation and deduplication engine for a lead-management CRM.
//!
//! Takes large working sets of leads, splits them into bounded chunks, and
//! runs one remote mutation per chunk (insert, update, cascade delete),
//! absorbing per-chunk failures into an authoritative [`model::BatchResult`].
//! Uploads pass through a two-tier dedup (within the file, then against the
//! store) first. Destructive runs are written to an audit log.

pub mod audit;
pub mod batch;
pub mod config;
pub mod db;
pub mod dedup;
pub mod error;
pub mod gateway;
pub mod ingest;
pub mod model;
pub mod telemetry;
