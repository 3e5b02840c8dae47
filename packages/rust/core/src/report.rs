//! Progress callbacks for long-running stages.

/// Progress callback implemented by front-ends (CLI spinner, tests).
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Item-level progress within the current phase. `total` may be 0 when
    /// the total is unknown (cursor scans never know the record count).
    fn item_progress(&self, current: usize, total: usize, detail: &str);
    /// A user-visible warning that does not stop the run.
    fn warning(&self, message: &str);
}

/// No-op reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn item_progress(&self, _current: usize, _total: usize, _detail: &str) {}
    fn warning(&self, _message: &str) {}
}
