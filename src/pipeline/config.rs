use std::time::Duration;

/// Upper bound for waiting on a deletion during cleanup
pub const DEFAULT_CLEANUP_TIMEOUT: Duration = Duration::from_secs(15 * 60);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Unwind created resources even when every step succeeded
    pub teardown_on_success: bool,
    pub cleanup_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            teardown_on_success: false,
            cleanup_timeout: DEFAULT_CLEANUP_TIMEOUT,
        }
    }
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_teardown_on_success(mut self, teardown_on_success: bool) -> Self {
        self.teardown_on_success = teardown_on_success;
        self
    }

    pub fn with_cleanup_timeout(mut self, cleanup_timeout: Duration) -> Self {
        self.cleanup_timeout = cleanup_timeout;
        self
    }
}
