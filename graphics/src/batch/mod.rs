//! Batch allocation.
//!
//! Pending views are grouped into batches of at most `images_per_fb` views,
//! each rendered into one framebuffer atlas. This module provides:
//!
//! - [`BatchId`] - monotonically increasing batch identifier
//! - [`BatchState`] - the per-batch lifecycle state machine
//! - [`BatchAllocator`] - partitions the view stream into batches
//! - [`SlotTable`] - the fixed set of in-flight slots and the device
//!   resources each slot owns

mod allocator;
mod state;
mod table;

use std::fmt;

pub use allocator::{BatchAllocator, ClosedBatch, ViewAssignment};
pub use state::BatchState;
pub use table::SlotTable;

/// Identifier of a batch. Never reused within a renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(u64);

impl BatchId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn raw(&self) -> u64 {
        self.0
    }

    pub(crate) fn next(&self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
