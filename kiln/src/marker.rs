//! Event markers.
//!
//! # About markers
//!
//! Every event record that reaches the submission engine receives a **marker**: a value drawn from a
//! counter shared by the whole queue. The engine registers the record's callback on the queue's
//! shared event at that marker, then encodes a "signal the event at this marker" command in the
//! command buffer. When the device reaches that point of the command buffer, the event's value
//! becomes the marker and every callback registered at a marker lower than or equal to it runs.
//!
//! Marker 0 is the initial value of the shared event and is never handed out: markers start at 1.
//! Markers are strictly increasing in allocation order, so callbacks fire in the order their
//! records were enqueued.
//!
//! Native commands that signal the shared event themselves must reserve their marker with
//! [`CommandQueue::reserve_marker`](crate::CommandQueue::reserve_marker) so that they stay on the
//! same timeline.
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

/// A point on the shared event timeline.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
#[repr(transparent)]
pub struct Marker(pub u64);

impl Marker {
    pub const fn value(&self) -> u64 {
        self.0
    }

    /// Whether this marker was handed out by a counter.
    pub const fn is_valid(&self) -> bool {
        self.0 != 0
    }
}

impl fmt::Debug for Marker {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Source of strictly increasing markers.
#[derive(Debug, Default)]
pub(crate) struct MarkerCounter(AtomicU64);

impl MarkerCounter {
    pub(crate) fn new() -> MarkerCounter {
        MarkerCounter(AtomicU64::new(0))
    }

    pub(crate) fn next(&self) -> Marker {
        Marker(self.0.fetch_add(1, Ordering::Relaxed) + 1)
    }
}
