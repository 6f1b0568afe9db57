use std::sync::atomic::{AtomicU64, Ordering};

/// Activity counters of a command queue.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct QueueStats {
    /// Operations appended to the pending log.
    pub operations: u64,
    /// Non-empty pending logs handed to the submission thread.
    pub flushes: u64,
    /// Planned windows, one command buffer each.
    pub windows: u64,
    pub command_buffers: u64,
    pub render_encoders: u64,
    /// Event records that were given a marker.
    pub events: u64,
}

#[derive(Debug, Default)]
pub(crate) struct StatCounters {
    pub(crate) operations: AtomicU64,
    pub(crate) flushes: AtomicU64,
    pub(crate) windows: AtomicU64,
    pub(crate) command_buffers: AtomicU64,
    pub(crate) render_encoders: AtomicU64,
    pub(crate) events: AtomicU64,
}

impl StatCounters {
    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> QueueStats {
        QueueStats {
            operations: self.operations.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            windows: self.windows.load(Ordering::Relaxed),
            command_buffers: self.command_buffers.load(Ordering::Relaxed),
            render_encoders: self.render_encoders.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
        }
    }
}
