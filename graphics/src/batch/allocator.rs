//! Partitioning of the view stream into batches.

use std::collections::VecDeque;

use crate::types::ViewInfo;

use super::BatchId;

/// Where a submitted view ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewAssignment {
    /// Batch holding the view.
    pub batch: BatchId,
    /// Position of the view inside its batch (its atlas region).
    pub slot: u32,
    /// Position of the view in the overall submission sequence.
    pub view_index: u64,
}

/// A full or flushed batch waiting to be submitted.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedBatch {
    pub id: BatchId,
    pub views: Vec<ViewInfo>,
    /// `view_index` of `views[0]`.
    pub first_view_index: u64,
}

#[derive(Debug)]
struct OpenBatch {
    id: BatchId,
    views: Vec<ViewInfo>,
    first_view_index: u64,
}

/// Groups pending views into batches of at most `images_per_fb`.
///
/// Views keep their submission order within and across batches, so walking
/// the batches in id order and each batch in slot order reproduces the input
/// sequence.
///
/// # Example
///
/// ```
/// use vista_graphics::{BatchAllocator, ViewInfo};
///
/// let mut allocator = BatchAllocator::new(64);
/// let assignments = allocator.allocate(&vec![ViewInfo::default(); 70]);
/// assert_eq!(assignments[63].slot, 63);
/// assert_eq!(assignments[64].slot, 0);
///
/// let batches = allocator.take_closed();
/// assert_eq!(batches.len(), 2);
/// assert_eq!(batches[1].views.len(), 6);
/// ```
#[derive(Debug)]
pub struct BatchAllocator {
    images_per_fb: u32,
    next_batch: BatchId,
    next_view_index: u64,
    open: Option<OpenBatch>,
    closed: VecDeque<ClosedBatch>,
}

impl BatchAllocator {
    /// Create an allocator closing batches at `images_per_fb` views.
    pub fn new(images_per_fb: u32) -> Self {
        Self::starting_at(images_per_fb, BatchId::new(0))
    }

    /// Create an allocator whose first batch is `first`.
    pub fn starting_at(images_per_fb: u32, first: BatchId) -> Self {
        debug_assert!(images_per_fb > 0);
        Self {
            images_per_fb: images_per_fb.max(1),
            next_batch: first,
            next_view_index: 0,
            open: None,
            closed: VecDeque::new(),
        }
    }

    pub fn images_per_fb(&self) -> u32 {
        self.images_per_fb
    }

    /// Id the next opened batch will get.
    pub fn next_batch_id(&self) -> BatchId {
        self.next_batch
    }

    /// Id of the batch currently accepting views.
    pub fn open_batch(&self) -> Option<BatchId> {
        self.open.as_ref().map(|b| b.id)
    }

    /// Views in the open batch.
    pub fn open_views(&self) -> usize {
        self.open.as_ref().map_or(0, |b| b.views.len())
    }

    /// Closed batches not yet taken.
    pub fn closed_count(&self) -> usize {
        self.closed.len()
    }

    /// Append a view to the open batch, opening one if needed.
    ///
    /// The batch closes as soon as it holds `images_per_fb` views.
    pub fn enqueue(&mut self, view: ViewInfo) -> ViewAssignment {
        let view_index = self.next_view_index;
        self.next_view_index += 1;

        let open = self.open.get_or_insert_with(|| {
            let id = self.next_batch;
            self.next_batch = id.next();
            log::trace!("BatchAllocator: opened batch {}", id);
            OpenBatch {
                id,
                views: Vec::with_capacity(self.images_per_fb as usize),
                first_view_index: view_index,
            }
        });

        let assignment = ViewAssignment {
            batch: open.id,
            slot: open.views.len() as u32,
            view_index,
        };
        open.views.push(view);

        if open.views.len() as u32 == self.images_per_fb {
            self.close_open();
        }

        assignment
    }

    /// Close a partially filled open batch. Does nothing if no batch is open.
    pub fn flush(&mut self) -> Option<BatchId> {
        if self.open.is_some() {
            self.close_open()
        } else {
            None
        }
    }

    /// Enqueue every view, then flush.
    pub fn allocate(&mut self, views: &[ViewInfo]) -> Vec<ViewAssignment> {
        let assignments = views.iter().map(|view| self.enqueue(*view)).collect();
        self.flush();
        assignments
    }

    /// Take all closed batches in id order.
    pub fn take_closed(&mut self) -> Vec<ClosedBatch> {
        self.closed.drain(..).collect()
    }

    fn close_open(&mut self) -> Option<BatchId> {
        let open = self.open.take()?;
        log::debug!(
            "BatchAllocator: closed batch {} with {} view(s)",
            open.id,
            open.views.len()
        );
        self.closed.push_back(ClosedBatch {
            id: open.id,
            views: open.views,
            first_view_index: open.first_view_index,
        });
        Some(open.id)
    }
}
