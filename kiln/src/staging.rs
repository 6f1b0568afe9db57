//! Staging memory for host to device copies.
use crate::{
    device::{Device, DeviceCaps},
    resource::{BufferDesc, BufferId},
    Error,
};
use parking_lot::Mutex;
use std::{collections::VecDeque, sync::Arc};
use tracing::{debug, trace};

/// Alignment of staging allocations.
pub const STAGING_ALIGNMENT: u64 = 16;

fn align_up(size: u64) -> u64 {
    (size + STAGING_ALIGNMENT - 1) & !(STAGING_ALIGNMENT - 1)
}

/// A range of staging memory holding the source bytes of one copy.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct StagingAllocation {
    pub buffer: BufferId,
    pub offset: u64,
    pub size: u64,
    /// Whether `buffer` was created for this allocation alone.
    pub dedicated: bool,
}

#[derive(Debug)]
struct Block {
    offset: u64,
    size: u64,
    released: bool,
}

/// Ring allocator over a fixed region of host-visible memory.
///
/// Allocations are made at the head of the ring and reclaimed at the tail, in allocation order:
/// a released block only becomes free once every block allocated before it has been released.
/// An allocation that doesn't fit between the head and the end of the region wraps around to
/// offset 0.
#[derive(Debug)]
pub struct StagingHeap {
    buffer: BufferId,
    capacity: u64,
    head: u64,
    /// Live blocks, oldest first.
    blocks: VecDeque<Block>,
}

impl StagingHeap {
    pub fn new(buffer: BufferId, capacity: u64) -> StagingHeap {
        StagingHeap {
            buffer,
            capacity,
            head: 0,
            blocks: VecDeque::new(),
        }
    }

    pub fn buffer(&self) -> BufferId {
        self.buffer
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes held by blocks that have not been reclaimed yet.
    pub fn used(&self) -> u64 {
        self.blocks.iter().map(|b| b.size).sum()
    }

    pub fn live_allocations(&self) -> usize {
        self.blocks.iter().filter(|b| !b.released).count()
    }

    /// Largest allocation that would currently succeed.
    fn available(&self) -> u64 {
        match self.blocks.front() {
            None => self.capacity,
            Some(tail) if self.head > tail.offset => (self.capacity - self.head).max(tail.offset),
            Some(tail) => tail.offset - self.head,
        }
    }

    pub fn allocate(&mut self, size: u64) -> Result<StagingAllocation, Error> {
        let reserved = align_up(size);
        let offset = match self.blocks.front() {
            None => (reserved <= self.capacity).then(|| 0),
            Some(tail) if self.head > tail.offset => {
                if self.head + reserved <= self.capacity {
                    Some(self.head)
                } else if reserved <= tail.offset {
                    Some(0)
                } else {
                    None
                }
            }
            Some(tail) => (self.head + reserved <= tail.offset).then(|| self.head),
        };

        let offset = offset.ok_or_else(|| Error::StagingExhausted {
            requested: size,
            available: self.available(),
            capacity: self.capacity,
        })?;

        self.blocks.push_back(Block {
            offset,
            size: reserved,
            released: false,
        });
        self.head = offset + reserved;
        trace!(offset, size, "staging_allocate");
        Ok(StagingAllocation {
            buffer: self.buffer,
            offset,
            size,
            dedicated: false,
        })
    }

    /// Returns an allocation to the heap.
    ///
    /// # Panics
    ///
    /// If the allocation is not live.
    pub fn release(&mut self, allocation: &StagingAllocation) {
        let block = self
            .blocks
            .iter_mut()
            .find(|b| b.offset == allocation.offset && !b.released)
            .unwrap_or_else(|| {
                panic!(
                    "released a staging allocation that is not live: {:?}",
                    allocation
                )
            });
        block.released = true;
        while self.blocks.front().map_or(false, |b| b.released) {
            self.blocks.pop_front();
        }
        if self.blocks.is_empty() {
            self.head = 0;
        }
    }
}

/// Staging memory of a command queue.
///
/// Devices with `DeviceCaps::HEAPS` get a single `StagingHeap`; on other devices every write gets
/// its own host-visible buffer, retired once the copy has completed.
pub(crate) struct Staging {
    device: Arc<dyn Device>,
    heap: Option<Mutex<StagingHeap>>,
}

impl Staging {
    pub(crate) fn new(device: Arc<dyn Device>, size: u64) -> Result<Staging, Error> {
        let heap = if device.capabilities().contains(DeviceCaps::HEAPS) {
            let buffer = device
                .create_buffer("staging heap", &BufferDesc::host_visible(size))
                .ok_or(Error::DeviceHeapExhausted { size })?;
            debug!(size, "created staging heap");
            Some(Mutex::new(StagingHeap::new(buffer, size)))
        } else {
            debug!("device has no heaps, staging uses dedicated buffers");
            None
        };
        Ok(Staging { device, heap })
    }

    /// Copies `data` into staging memory.
    pub(crate) fn stage(&self, data: &[u8]) -> Result<StagingAllocation, Error> {
        let size = data.len() as u64;
        let allocation = match &self.heap {
            Some(heap) => heap.lock().allocate(size)?,
            None => {
                let buffer = self
                    .device
                    .create_buffer("staging buffer", &BufferDesc::host_visible(size))
                    .ok_or(Error::DeviceHeapExhausted { size })?;
                StagingAllocation {
                    buffer,
                    offset: 0,
                    size,
                    dedicated: true,
                }
            }
        };
        self.device
            .write_buffer(allocation.buffer, allocation.offset, data);
        Ok(allocation)
    }

    pub(crate) fn release(&self, allocation: &StagingAllocation) {
        if allocation.dedicated {
            self.device.retire(allocation.buffer.into());
        } else if let Some(heap) = &self.heap {
            heap.lock().release(allocation);
        }
    }

    /// Bytes in use in the staging heap, if there is one.
    pub(crate) fn used(&self) -> Option<u64> {
        self.heap.as_ref().map(|heap| heap.lock().used())
    }
}
