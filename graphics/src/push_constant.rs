//! Per-draw view indexing.
//!
//! Every draw carries a single `u32` push constant, `batch_idx`, that the
//! shader uses to index the view buffer directly:
//!
//! ```text
//! batch_idx = slot * images_per_fb + view_slot
//! ```
//!
//! where `slot` is the batch's in-flight slot and `view_slot` the view's
//! position inside the batch.

use crate::types::{RenderPushConstant, ViewInfo};

/// Encodes and decodes [`RenderPushConstant`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantIndexer {
    images_per_fb: u32,
}

impl PushConstantIndexer {
    pub fn new(images_per_fb: u32) -> Self {
        debug_assert!(images_per_fb > 0);
        Self { images_per_fb }
    }

    pub fn images_per_fb(&self) -> u32 {
        self.images_per_fb
    }

    /// Push constant for view `view_slot` of the batch in `slot`.
    #[inline]
    pub fn encode(&self, slot: u32, view_slot: u32) -> RenderPushConstant {
        debug_assert!(view_slot < self.images_per_fb);
        RenderPushConstant {
            batch_idx: slot * self.images_per_fb + view_slot,
        }
    }

    /// Recover `(slot, view_slot)` from a push constant.
    #[inline]
    pub fn decode(&self, push: RenderPushConstant) -> (u32, u32) {
        (
            push.batch_idx / self.images_per_fb,
            push.batch_idx % self.images_per_fb,
        )
    }

    /// Byte offset in the view buffer that `push` addresses.
    #[inline]
    pub fn view_buffer_offset(&self, push: RenderPushConstant) -> u64 {
        push.batch_idx as u64 * ViewInfo::SIZE
    }
}
