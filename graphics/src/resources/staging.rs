//! Staging ring for host-to-device uploads.
//!
//! The ring is a single host-writable buffer that is sub-allocated linearly.
//! Allocations made for one transfer submission are tagged with the transfer
//! timeline value that submission signals ([`StagingRing::track`]); once the
//! timeline reaches that value the space is reclaimed ([`StagingRing::retire`]).
//!
//! Positions are monotonic byte counters. The buffer offset of a position is
//! `position % capacity`, and an allocation that would straddle the end of the
//! buffer skips the tail and starts again at offset zero.
//!
//! # Example
//!
//! ```ignore
//! let mut ring = StagingRing::new(&device, 4 * 1024 * 1024)?;
//!
//! let mark = ring.mark();
//! let alloc = ring.allocate(bytes.len() as u64)?.expect("ring full");
//! ring.write(&alloc, bytes)?;
//! match device.submit(QueueKind::Transfer, &upload) {
//!     Ok(()) => ring.track(transfer_value),
//!     Err(_) => ring.rewind(mark),
//! }
//!
//! // later, after the transfer timeline advanced
//! ring.retire(transfer_semaphore.value()?);
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::Buffer;
use crate::types::BufferDescriptor;

/// A sub-allocation from the staging ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RingAllocation {
    /// Byte offset into the ring buffer.
    pub offset: u64,
    /// Size of the allocation in bytes.
    pub size: u64,
}

impl RingAllocation {
    /// Create a new ring allocation.
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Get the end offset (offset + size).
    pub fn end(&self) -> u64 {
        self.offset + self.size
    }
}

/// Host-visible upload ring retired by transfer timeline values.
///
/// # Thread Safety
///
/// `StagingRing` is NOT thread-safe; it is owned by the submission pipeliner.
pub struct StagingRing {
    buffer: Arc<Buffer>,
    capacity: u64,
    /// Next position to allocate from.
    head: u64,
    /// Oldest position still in use by the device.
    tail: u64,
    /// Allocations already handed to the device: end position and the
    /// transfer timeline value that retires them.
    in_flight: VecDeque<(u64, u64)>,
}

impl StagingRing {
    /// Alignment of every allocation. Satisfies buffer copy offset rules and
    /// keeps shader structs naturally aligned.
    pub const ALIGNMENT: u64 = 16;

    /// Create a staging ring of `capacity` bytes, rounded up to [`Self::ALIGNMENT`].
    ///
    /// # Errors
    ///
    /// Returns an error if the capacity is zero or buffer creation fails.
    pub fn new(device: &Arc<GraphicsDevice>, capacity: u64) -> Result<Self, GraphicsError> {
        if capacity == 0 {
            return Err(GraphicsError::InvalidParameter(
                "staging ring capacity cannot be zero".to_string(),
            ));
        }

        let capacity = align_up(capacity, Self::ALIGNMENT);
        let buffer =
            device.create_buffer(&BufferDescriptor::staging(capacity).with_label("staging_ring"))?;

        Ok(Self {
            buffer,
            capacity,
            head: 0,
            tail: 0,
            in_flight: VecDeque::new(),
        })
    }

    /// Get the underlying GPU buffer.
    pub fn buffer(&self) -> &Arc<Buffer> {
        &self.buffer
    }

    /// Get the total capacity of the ring.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Bytes between the oldest unretired allocation and the head, including
    /// skipped tail space.
    pub fn used(&self) -> u64 {
        self.head - self.tail
    }

    /// Whether nothing is allocated.
    pub fn is_empty(&self) -> bool {
        self.head == self.tail
    }

    /// Timeline value that must be reached before the oldest in-flight space
    /// can be reclaimed.
    pub fn oldest_pending(&self) -> Option<u64> {
        self.in_flight.front().map(|&(_, value)| value)
    }

    /// Allocate `size` bytes.
    ///
    /// Returns `Ok(None)` when the ring has no contiguous room until older
    /// transfers retire.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::InvalidParameter`] if `size` can never fit.
    pub fn allocate(&mut self, size: u64) -> Result<Option<RingAllocation>, GraphicsError> {
        if size > self.capacity {
            return Err(GraphicsError::InvalidParameter(format!(
                "staging allocation of {size} bytes exceeds ring capacity {}",
                self.capacity
            )));
        }

        if self.is_empty() {
            // Restart at offset zero so a large allocation never has to skip.
            let base = self.head.next_multiple_of(self.capacity);
            self.head = base;
            self.tail = base;
        }

        let mut start = align_up(self.head, Self::ALIGNMENT);
        let offset = start % self.capacity;
        if offset + size > self.capacity {
            start += self.capacity - offset;
        }

        let end = start + size;
        if end - self.tail > self.capacity {
            return Ok(None);
        }

        self.head = end;
        Ok(Some(RingAllocation::new(start % self.capacity, size)))
    }

    /// Copy `data` into an allocation.
    pub fn write(&self, allocation: &RingAllocation, data: &[u8]) -> Result<(), GraphicsError> {
        debug_assert!(data.len() as u64 <= allocation.size);
        self.buffer.write(allocation.offset, data)
    }

    /// Current head position, for [`rewind`](Self::rewind).
    pub fn mark(&self) -> u64 {
        self.head
    }

    /// Drop every allocation made since `mark` that was never tracked.
    pub fn rewind(&mut self, mark: u64) {
        let floor = self
            .in_flight
            .back()
            .map_or(self.tail, |&(end, _)| end)
            .max(self.tail);
        self.head = mark.max(floor);
    }

    /// Tag every allocation since the last call with the transfer timeline
    /// `value` whose completion frees them.
    pub fn track(&mut self, value: u64) {
        let tracked = self.in_flight.back().map_or(self.tail, |&(end, _)| end);
        if self.head > tracked {
            self.in_flight.push_back((self.head, value));
        }
    }

    /// Reclaim space of transfers that completed at or before `completed`.
    pub fn retire(&mut self, completed: u64) {
        while let Some(&(end, value)) = self.in_flight.front() {
            if value > completed {
                break;
            }
            self.tail = end;
            self.in_flight.pop_front();
        }
    }
}

impl std::fmt::Debug for StagingRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingRing")
            .field("capacity", &self.capacity)
            .field("head", &self.head)
            .field("tail", &self.tail)
            .field("in_flight", &self.in_flight.len())
            .field("buffer", &self.buffer.label())
            .finish()
    }
}

/// Align a value up to the given alignment.
#[inline]
pub(crate) fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}
