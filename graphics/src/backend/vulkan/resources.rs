//! Buffers and images owned by a [`VulkanDevice`](super::VulkanDevice).

use std::collections::HashMap;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, Allocator};

use crate::backend::{BufferId, ImageId};
use crate::error::GraphicsError;
use crate::types::BufferUsage;

pub(super) struct VulkanBuffer {
    pub(super) buffer: vk::Buffer,
    pub(super) allocation: Option<Allocation>,
    pub(super) usage: BufferUsage,
    pub(super) size: u64,
}

impl VulkanBuffer {
    /// Host-visible bytes of the buffer.
    pub(super) fn mapped(&self) -> Result<&[u8], GraphicsError> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_slice)
            .ok_or_else(|| GraphicsError::InvalidParameter("buffer is not mapped".to_string()))
    }

    pub(super) fn mapped_mut(&mut self) -> Result<&mut [u8], GraphicsError> {
        self.allocation
            .as_mut()
            .and_then(Allocation::mapped_slice_mut)
            .ok_or_else(|| GraphicsError::InvalidParameter("buffer is not mapped".to_string()))
    }

    /// # Safety
    ///
    /// The GPU must no longer use the buffer.
    pub(super) unsafe fn destroy(
        mut self,
        device: &ash::Device,
        allocator: Option<&mut Allocator>,
    ) {
        if let (Some(allocation), Some(allocator)) = (self.allocation.take(), allocator)
            && let Err(e) = allocator.free(allocation)
        {
            log::error!("Failed to free buffer allocation: {}", e);
        }
        unsafe { device.destroy_buffer(self.buffer, None) };
    }
}

pub(super) struct VulkanImage {
    pub(super) image: vk::Image,
    pub(super) view: vk::ImageView,
    pub(super) allocation: Option<Allocation>,
}

impl VulkanImage {
    /// # Safety
    ///
    /// The GPU must no longer use the image.
    pub(super) unsafe fn destroy(
        mut self,
        device: &ash::Device,
        allocator: Option<&mut Allocator>,
    ) {
        if let (Some(allocation), Some(allocator)) = (self.allocation.take(), allocator)
            && let Err(e) = allocator.free(allocation)
        {
            log::error!("Failed to free image allocation: {}", e);
        }
        unsafe {
            device.destroy_image_view(self.view, None);
            device.destroy_image(self.image, None);
        }
    }
}

/// Live resources addressed by id.
#[derive(Default)]
pub(super) struct ResourceTable {
    pub(super) buffers: HashMap<BufferId, VulkanBuffer>,
    pub(super) images: HashMap<ImageId, VulkanImage>,
}

impl ResourceTable {
    pub(super) fn buffer(&self, id: BufferId) -> Result<&VulkanBuffer, GraphicsError> {
        self.buffers
            .get(&id)
            .ok_or_else(|| unknown("buffer", id.raw()))
    }

    pub(super) fn buffer_mut(&mut self, id: BufferId) -> Result<&mut VulkanBuffer, GraphicsError> {
        self.buffers
            .get_mut(&id)
            .ok_or_else(|| unknown("buffer", id.raw()))
    }

    pub(super) fn image(&self, id: ImageId) -> Result<&VulkanImage, GraphicsError> {
        self.images
            .get(&id)
            .ok_or_else(|| unknown("image", id.raw()))
    }
}

fn unknown(kind: &str, raw: u64) -> GraphicsError {
    GraphicsError::InvalidParameter(format!("unknown {kind} {raw}"))
}

/// Byte range `offset..offset + len` of a buffer of `size` bytes.
pub(super) fn host_range(
    size: u64,
    offset: u64,
    len: u64,
) -> Result<std::ops::Range<usize>, GraphicsError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset as usize..end as usize),
        _ => Err(GraphicsError::InvalidParameter(format!(
            "access of {len} bytes at offset {offset} exceeds buffer size {size}"
        ))),
    }
}
