//! Process-wide migration mode.

use std::sync::atomic::{AtomicI32, Ordering};

/// Signal telling workers which strategy the default migration path uses.
///
/// Non-zero means the RRD flusher is running behind (`flushrrd_timeout`), and workers
/// push buffered samples to the new owner instead of fetching the whole RRD file.
/// Reads are relaxed: a worker may act on the previous mode for a moment after a
/// switch.
#[derive(Debug, Default)]
pub struct MigrationMode {
    flushrrd_timeout: AtomicI32,
}

impl MigrationMode {
    /// Starts in fetch mode.
    pub fn new() -> Self {
        Self::default()
    }

    /// True if the default path should Send rather than Fetch.
    pub fn prefer_push(&self) -> bool {
        self.flushrrd_timeout.load(Ordering::Relaxed) != 0
    }

    /// Switches between push (`true`) and fetch (`false`).
    pub fn set_prefer_push(&self, prefer_push: bool) {
        self.store_raw(i32::from(prefer_push));
    }

    /// Raw signal value.
    pub fn load_raw(&self) -> i32 {
        self.flushrrd_timeout.load(Ordering::Relaxed)
    }

    /// Overwrites the raw signal value.
    pub fn store_raw(&self, value: i32) {
        self.flushrrd_timeout.store(value, Ordering::Relaxed);
    }
}
