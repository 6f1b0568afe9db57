use parking_lot::{Condvar, Mutex};

/// A flag that threads can wait on until it is set. Never reset.
#[derive(Debug, Default)]
pub struct Latch {
    set: Mutex<bool>,
    condvar: Condvar,
}

impl Latch {
    pub fn new() -> Latch {
        Latch::default()
    }

    pub fn set(&self) {
        *self.set.lock() = true;
        self.condvar.notify_all();
    }

    pub fn is_set(&self) -> bool {
        *self.set.lock()
    }

    /// Blocks until the latch is set.
    pub fn wait(&self) {
        let mut set = self.set.lock();
        while !*set {
            self.condvar.wait(&mut set);
        }
    }
}

/// Bounds the number of command buffers that have been committed but haven't completed.
#[derive(Debug)]
pub(crate) struct InFlightLimiter {
    count: Mutex<usize>,
    condvar: Condvar,
    max: usize,
}

impl InFlightLimiter {
    pub(crate) fn new(max: usize) -> InFlightLimiter {
        InFlightLimiter {
            count: Mutex::new(0),
            condvar: Condvar::new(),
            max,
        }
    }

    /// Takes a slot, waiting for a command buffer to complete if all slots are taken.
    pub(crate) fn acquire(&self) {
        let mut count = self.count.lock();
        while *count >= self.max {
            self.condvar.wait(&mut count);
        }
        *count += 1;
    }

    pub(crate) fn release(&self) {
        let mut count = self.count.lock();
        assert!(*count > 0, "released an in-flight slot that was never acquired");
        *count -= 1;
        self.condvar.notify_one();
    }

    pub(crate) fn in_flight(&self) -> usize {
        *self.count.lock()
    }
}
