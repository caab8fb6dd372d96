//! Progress reporting to an external sink.

/// Accepts an integer percentage after each completed unit of work.
///
/// The orchestrator calls this after every layer; the outer scheduler
/// decides what to do with it (task UI, metrics, nothing).
pub trait ProgressSink: Send + Sync {
    fn set_progress(&self, percent: u8);
}

/// A sink that discards all progress updates.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn set_progress(&self, _percent: u8) {}
}

/// Log progress at info level. Used by the CLI entry point.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn set_progress(&self, percent: u8) {
        tracing::info!(percent, "sync_progress");
    }
}
