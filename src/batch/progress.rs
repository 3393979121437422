//! Passive observers of batch progress.

use tracing::info;

/// Called after every chunk with cumulative `processed` out of `total`.
///
/// `processed` never decreases and reaches `total` exactly once per completed run.
pub trait ProgressReporter: Send + Sync {
    fn on_progress(&self, processed: usize, total: usize);
}

/// Discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn on_progress(&self, _processed: usize, _total: usize) {}
}

impl<F> ProgressReporter for F
where
    F: Fn(usize, usize) + Send + Sync,
{
    fn on_progress(&self, processed: usize, total: usize) {
        self(processed, total)
    }
}

/// Emits an `info` event per chunk.
#[derive(Debug, Clone)]
pub struct LogProgress {
    pub label: String,
}

impl LogProgress {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
        }
    }
}

impl ProgressReporter for LogProgress {
    fn on_progress(&self, processed: usize, total: usize) {
        info!(op = %self.label, processed, total, "{processed}/{total} processed");
    }
}
