//! Engine configuration.

use std::time::Duration;

/// Configuration for sync behavior.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Failed attempts after which an entry is parked. Parked entries are
    /// skipped by push but still counted as failed.
    pub max_retries: u32,
    /// Pass the persisted pull watermark to the remote as `since`. When
    /// off, every pull asks for the full snapshot.
    pub use_watermark: bool,
    /// Period of the background scheduler.
    pub sync_interval: Duration,
    /// Upper bound on every remote call.
    pub remote_timeout: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            use_watermark: false,
            sync_interval: Duration::from_secs(30),
            remote_timeout: Duration::from_secs(10),
        }
    }
}

impl SyncConfig {
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_watermark(mut self, use_watermark: bool) -> Self {
        self.use_watermark = use_watermark;
        self
    }

    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = interval;
        self
    }

    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }
}
