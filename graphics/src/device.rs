//! Graphics device.
//!
//! The [`GraphicsDevice`] owns a backend logical device and the queues it was
//! created with. It is created by [`GraphicsInstance::create_device`].

use std::sync::{Arc, RwLock, Weak};

use crate::backend::GpuDevice;
use crate::command::Submission;
use crate::error::GraphicsError;
use crate::instance::GraphicsInstance;
use crate::queue::{Queue, QueueKind, QueuePlan};
use crate::resources::{Buffer, Image};
use crate::scheduler::{Fence, TimelineSemaphore};
use crate::types::{BufferDescriptor, ImageDescriptor};

/// Capabilities of a graphics device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceCapabilities {
    /// Maximum image dimension.
    pub max_image_dimension: u32,
    /// Maximum buffer size.
    pub max_buffer_size: u64,
    /// Maximum push constant range in bytes.
    pub max_push_constant_size: u32,
    /// Whether compute shaders are supported.
    pub compute_shaders: bool,
    /// Whether timeline semaphores are supported.
    pub timeline_semaphores: bool,
}

impl Default for DeviceCapabilities {
    fn default() -> Self {
        Self {
            max_image_dimension: 16384,
            max_buffer_size: 1 << 30, // 1 GB
            max_push_constant_size: 128,
            compute_shaders: true,
            timeline_semaphores: true,
        }
    }
}

/// A logical device with graphics, compute and transfer queues.
///
/// # Thread Safety
///
/// `GraphicsDevice` is `Send + Sync` and can be safely shared across threads.
///
/// # Example
///
/// ```ignore
/// let instance = GraphicsInstance::new(InstanceParameters::new())?;
/// let device = instance.create_device(0, &QueueConfig::default())?;
///
/// let buffer = device.create_buffer(&BufferDescriptor::storage(1024))?;
/// let fence = device.create_fence()?;
/// device.submit(QueueKind::Transfer, &Submission::new("upload").with_fence(fence.id()))?;
/// ```
pub struct GraphicsDevice {
    instance: Arc<GraphicsInstance>,
    name: String,
    capabilities: DeviceCapabilities,
    raw: Arc<dyn GpuDevice>,
    plan: QueuePlan,
    // Track allocated resources (weak references for cleanup/debugging)
    buffers: RwLock<Vec<Weak<Buffer>>>,
    images: RwLock<Vec<Weak<Image>>>,
}

impl GraphicsDevice {
    /// Create a new graphics device (called by GraphicsInstance).
    pub(crate) fn new(
        instance: Arc<GraphicsInstance>,
        raw: Arc<dyn GpuDevice>,
        plan: QueuePlan,
    ) -> Self {
        Self {
            instance,
            name: raw.name().to_string(),
            capabilities: raw.capabilities(),
            raw,
            plan,
            buffers: RwLock::new(Vec::new()),
            images: RwLock::new(Vec::new()),
        }
    }

    /// Get the parent instance.
    pub fn instance(&self) -> &Arc<GraphicsInstance> {
        &self.instance
    }

    /// Get the device name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the device capabilities.
    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    /// Backend device, for backend-specific inspection.
    pub fn raw(&self) -> &Arc<dyn GpuDevice> {
        &self.raw
    }

    /// The queue work of `kind` is submitted to.
    pub fn queue(&self, kind: QueueKind) -> &Queue {
        // plan_queues guarantees at least one queue per kind
        &self.plan.queues(kind)[0]
    }

    /// All queues created for `kind`.
    pub fn queues(&self, kind: QueueKind) -> &[Queue] {
        self.plan.queues(kind)
    }

    /// Create a GPU buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if the buffer size exceeds device limits or allocation fails.
    pub fn create_buffer(
        self: &Arc<Self>,
        descriptor: &BufferDescriptor,
    ) -> Result<Arc<Buffer>, GraphicsError> {
        if descriptor.size > self.capabilities.max_buffer_size {
            return Err(GraphicsError::InvalidParameter(format!(
                "buffer size {} exceeds maximum {}",
                descriptor.size, self.capabilities.max_buffer_size
            )));
        }

        if descriptor.size == 0 {
            return Err(GraphicsError::InvalidParameter(
                "buffer size cannot be zero".to_string(),
            ));
        }

        let id = self.raw.create_buffer(descriptor)?;
        let buffer = Arc::new(Buffer::new(Arc::clone(&self.raw), id, descriptor.clone()));

        if let Ok(mut buffers) = self.buffers.write() {
            buffers.retain(|b| b.strong_count() > 0);
            buffers.push(Arc::downgrade(&buffer));
        }

        log::trace!(
            "GraphicsDevice: created buffer {:?}, size={}",
            descriptor.label,
            descriptor.size
        );

        Ok(buffer)
    }

    /// Create a 2D image.
    ///
    /// # Errors
    ///
    /// Returns an error if the image is empty, exceeds device limits, or
    /// allocation fails.
    pub fn create_image(
        self: &Arc<Self>,
        descriptor: &ImageDescriptor,
    ) -> Result<Arc<Image>, GraphicsError> {
        let max = self.capabilities.max_image_dimension;
        if descriptor.width == 0 || descriptor.height == 0 {
            return Err(GraphicsError::InvalidParameter(
                "image dimensions cannot be zero".to_string(),
            ));
        }
        if descriptor.width > max || descriptor.height > max {
            return Err(GraphicsError::InvalidParameter(format!(
                "image size {}x{} exceeds maximum dimension {}",
                descriptor.width, descriptor.height, max
            )));
        }

        let id = self.raw.create_image(descriptor)?;
        let image = Arc::new(Image::new(Arc::clone(&self.raw), id, descriptor.clone()));

        if let Ok(mut images) = self.images.write() {
            images.retain(|i| i.strong_count() > 0);
            images.push(Arc::downgrade(&image));
        }

        log::trace!(
            "GraphicsDevice: created image {:?}, {}x{}",
            descriptor.label,
            descriptor.width,
            descriptor.height
        );

        Ok(image)
    }

    /// Create an unsignaled fence.
    pub fn create_fence(&self) -> Result<Fence, GraphicsError> {
        let id = self.raw.create_fence()?;
        Ok(Fence::new(Arc::clone(&self.raw), id))
    }

    /// Create a timeline semaphore starting at `initial_value`.
    pub fn create_timeline_semaphore(
        &self,
        initial_value: u64,
    ) -> Result<TimelineSemaphore, GraphicsError> {
        let id = self.raw.create_timeline_semaphore(initial_value)?;
        Ok(TimelineSemaphore::new(Arc::clone(&self.raw), id))
    }

    /// Submit recorded work to queue 0 of `kind`.
    pub fn submit(&self, kind: QueueKind, submission: &Submission) -> Result<(), GraphicsError> {
        let queue = self.queue(kind);
        log::trace!(
            "GraphicsDevice: submitting '{}' to {} queue {}:{}",
            submission.label,
            kind,
            queue.family_index(),
            queue.queue_index()
        );
        self.raw.submit(queue.address(), submission)
    }

    /// Block until all queues are idle.
    pub fn wait_idle(&self) -> Result<(), GraphicsError> {
        self.raw.wait_idle()
    }

    /// Whether the device has been lost.
    pub fn is_lost(&self) -> bool {
        self.raw.is_lost()
    }

    /// Number of live buffers created through this device.
    pub fn buffer_count(&self) -> usize {
        self.buffers
            .read()
            .map(|b| b.iter().filter(|b| b.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Number of live images created through this device.
    pub fn image_count(&self) -> usize {
        self.images
            .read()
            .map(|i| i.iter().filter(|i| i.strong_count() > 0).count())
            .unwrap_or(0)
    }
}

impl Drop for GraphicsDevice {
    fn drop(&mut self) {
        if !self.raw.is_lost() {
            if let Err(e) = self.raw.wait_idle() {
                log::warn!("GraphicsDevice: wait_idle on drop failed: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for GraphicsDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphicsDevice")
            .field("name", &self.name)
            .field("capabilities", &self.capabilities)
            .field("lost", &self.is_lost())
            .field("buffer_count", &self.buffer_count())
            .field("image_count", &self.image_count())
            .finish()
    }
}

// Ensure GraphicsDevice is Send + Sync
static_assertions::assert_impl_all!(GraphicsDevice: Send, Sync);

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::QueueConfig;
    use crate::instance::{BackendType, InstanceParameters};
    use crate::types::{ImageFormat, ImageUsage};

    fn create_device() -> Arc<GraphicsDevice> {
        let instance =
            GraphicsInstance::new(InstanceParameters::new().with_backend(BackendType::Dummy))
                .unwrap();
        instance.create_device(0, &QueueConfig::default()).unwrap()
    }

    #[test]
    fn test_queues_per_kind() {
        let device = create_device();
        assert_eq!(device.queue(QueueKind::Graphics).family_index(), 0);
        assert_eq!(device.queue(QueueKind::Compute).family_index(), 2);
        assert_eq!(device.queue(QueueKind::Transfer).family_index(), 1);
        for kind in QueueKind::ALL {
            assert_eq!(device.queues(kind).len(), 1);
            assert_eq!(device.queue(kind).kind(), kind);
        }
    }

    #[test]
    fn test_create_buffer() {
        let device = create_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::storage(256).with_label("test"))
            .unwrap();
        assert_eq!(buffer.size(), 256);
        assert_eq!(device.buffer_count(), 1);
        drop(buffer);
        assert_eq!(device.buffer_count(), 0);
    }

    #[test]
    fn test_create_buffer_zero_size_fails() {
        let device = create_device();
        let result = device.create_buffer(&BufferDescriptor::storage(0));
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
    }

    #[test]
    fn test_create_image_too_large_fails() {
        let device = create_device();
        let result = device.create_image(&ImageDescriptor::new_2d(
            20000,
            4,
            ImageFormat::Rgba8Unorm,
            ImageUsage::RENDER_ATTACHMENT,
        ));
        assert!(matches!(result, Err(GraphicsError::InvalidParameter(_))));
    }

    #[test]
    fn test_submit_signals_fence() {
        let device = create_device();
        let fence = device.create_fence().unwrap();
        assert!(!fence.is_signaled());
        device
            .submit(
                QueueKind::Transfer,
                &Submission::new("empty").with_fence(fence.id()),
            )
            .unwrap();
        assert!(fence.wait(Duration::from_millis(10)).unwrap());
    }
}
