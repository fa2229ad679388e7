//! GPU image resource.

use std::sync::Arc;

use crate::backend::{GpuDevice, ImageId};
use crate::types::{Extent2d, ImageDescriptor};

/// A 2D GPU image.
///
/// Created by [`GraphicsDevice::create_image`]; the backend image is destroyed
/// when the last reference is dropped.
///
/// [`GraphicsDevice::create_image`]: crate::GraphicsDevice::create_image
pub struct Image {
    device: Arc<dyn GpuDevice>,
    id: ImageId,
    descriptor: ImageDescriptor,
}

impl Image {
    pub(crate) fn new(
        device: Arc<dyn GpuDevice>,
        id: ImageId,
        descriptor: ImageDescriptor,
    ) -> Self {
        Self {
            device,
            id,
            descriptor,
        }
    }

    /// Backend handle of the image.
    pub fn id(&self) -> ImageId {
        self.id
    }

    pub fn descriptor(&self) -> &ImageDescriptor {
        &self.descriptor
    }

    pub fn extent(&self) -> Extent2d {
        Extent2d::new(self.descriptor.width, self.descriptor.height)
    }

    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        self.device.destroy_image(self.id);
    }
}

impl std::fmt::Debug for Image {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Image")
            .field("id", &self.id.raw())
            .field("width", &self.descriptor.width)
            .field("height", &self.descriptor.height)
            .field("format", &self.descriptor.format)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

static_assertions::assert_impl_all!(Image: Send, Sync);
