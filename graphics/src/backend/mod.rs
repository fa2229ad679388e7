//! GPU backend abstraction layer.
//!
//! A backend is split in two levels:
//!
//! - [`GpuBackend`]: instance level. Enumerates adapters and their queue
//!   families and creates devices.
//! - [`GpuDevice`]: a logical device. Creates buffers, images, fences and
//!   timeline semaphores addressed by opaque ids, and executes recorded
//!   [`Submission`]s on its queues.
//!
//! # Available Backends
//!
//! - `dummy` (default): in-memory backend that interprets command lists in
//!   software, used for testing without GPU hardware
//! - `vulkan-backend`: native Vulkan backend using ash

#[cfg(feature = "vulkan-backend")]
pub mod vulkan;

pub mod dummy;

use std::any::Any;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::command::Submission;
use crate::device::DeviceCapabilities;
use crate::error::GraphicsError;
use crate::instance::{AdapterInfo, BackendType, InstanceParameters};
use crate::queue::{QueueAddress, QueueFamilyInfo, QueueFamilyRequest};
use crate::types::{BufferDescriptor, ImageDescriptor};

/// Handle to a device buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u64);

/// Handle to a device image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ImageId(pub(crate) u64);

/// Handle to a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FenceId(pub(crate) u64);

/// Handle to a timeline semaphore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SemaphoreId(pub(crate) u64);

macro_rules! impl_handle {
    ($($name:ident),*) => {
        $(
            impl $name {
                pub(crate) fn new(raw: u64) -> Self {
                    Self(raw)
                }

                /// Raw backend value of the handle.
                pub fn raw(&self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

impl_handle!(BufferId, ImageId, FenceId, SemaphoreId);

/// Monotonic source of handle values, shared by every resource type of a device.
#[derive(Debug, Default)]
pub(crate) struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    pub(crate) fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Instance-level backend.
pub trait GpuBackend: Send + Sync + 'static {
    /// Get the backend name.
    fn name(&self) -> &'static str;

    /// Adapters available to this backend.
    fn enumerate_adapters(&self) -> Vec<AdapterInfo>;

    /// Queue families of adapter `adapter`.
    fn queue_families(&self, adapter: usize) -> Result<Vec<QueueFamilyInfo>, GraphicsError>;

    /// Create a logical device with exactly the requested queues.
    fn create_device(
        &self,
        adapter: usize,
        requests: &[QueueFamilyRequest],
    ) -> Result<Arc<dyn GpuDevice>, GraphicsError>;
}

/// A logical device.
///
/// Once the device is lost every operation that needs the GPU fails with
/// [`GraphicsError::DeviceLost`]. Host reads of mapped memory keep working,
/// and fences signaled before the loss still report as signaled.
pub trait GpuDevice: Send + Sync + 'static {
    /// Adapter name.
    fn name(&self) -> &str;

    fn capabilities(&self) -> DeviceCapabilities;

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, GraphicsError>;

    fn destroy_buffer(&self, buffer: BufferId);

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<ImageId, GraphicsError>;

    fn destroy_image(&self, image: ImageId);

    /// Write into a host-writable buffer.
    fn write_buffer(&self, buffer: BufferId, offset: u64, data: &[u8])
    -> Result<(), GraphicsError>;

    /// Read from a host-readable buffer.
    fn read_buffer(&self, buffer: BufferId, offset: u64, size: u64)
    -> Result<Vec<u8>, GraphicsError>;

    /// Create an unsignaled fence.
    fn create_fence(&self) -> Result<FenceId, GraphicsError>;

    fn destroy_fence(&self, fence: FenceId);

    /// Non-blocking fence query.
    fn fence_status(&self, fence: FenceId) -> Result<bool, GraphicsError>;

    /// Block until `fence` is signaled or `timeout` elapses.
    ///
    /// Returns `Ok(false)` on timeout.
    fn wait_fence(&self, fence: FenceId, timeout: Duration) -> Result<bool, GraphicsError>;

    fn create_timeline_semaphore(&self, initial_value: u64)
    -> Result<SemaphoreId, GraphicsError>;

    fn destroy_semaphore(&self, semaphore: SemaphoreId);

    /// Current counter value of a timeline semaphore.
    fn semaphore_value(&self, semaphore: SemaphoreId) -> Result<u64, GraphicsError>;

    /// Block until `semaphore` reaches `value` or `timeout` elapses.
    ///
    /// Returns `Ok(false)` on timeout.
    fn wait_semaphore(
        &self,
        semaphore: SemaphoreId,
        value: u64,
        timeout: Duration,
    ) -> Result<bool, GraphicsError>;

    /// Submit recorded work to `queue`.
    fn submit(&self, queue: QueueAddress, submission: &Submission) -> Result<(), GraphicsError>;

    /// Block until every queue is idle.
    fn wait_idle(&self) -> Result<(), GraphicsError>;

    /// Whether the device has been lost.
    fn is_lost(&self) -> bool;

    /// Downcast support for backend-specific inspection.
    fn as_any(&self) -> &dyn Any;
}

/// Create the backend selected by `params`.
///
/// `Auto` tries Vulkan first when the feature is enabled and falls back to
/// the dummy backend.
pub fn create_backend(params: &InstanceParameters) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    match params.backend {
        BackendType::Dummy => {
            log::info!("Using dummy backend");
            Ok(Arc::new(dummy::DummyBackend::new()))
        }
        BackendType::Vulkan => create_vulkan_backend(params),
        BackendType::Auto => {
            if has_gpu_backend() {
                match create_vulkan_backend(params) {
                    Ok(backend) => return Ok(backend),
                    Err(e) => log::warn!("Failed to create Vulkan backend: {}", e),
                }
            }
            log::info!("Using dummy backend");
            Ok(Arc::new(dummy::DummyBackend::new()))
        }
    }
}

#[cfg(feature = "vulkan-backend")]
fn create_vulkan_backend(
    params: &InstanceParameters,
) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    let backend = vulkan::VulkanBackend::new(params.validation)?;
    log::info!("Using Vulkan backend (ash)");
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "vulkan-backend"))]
fn create_vulkan_backend(
    _params: &InstanceParameters,
) -> Result<Arc<dyn GpuBackend>, GraphicsError> {
    Err(GraphicsError::DeviceInit(
        "the vulkan-backend feature is not enabled".to_string(),
    ))
}

/// Check if a real GPU backend is compiled in.
pub fn has_gpu_backend() -> bool {
    cfg!(feature = "vulkan-backend")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_allocator_is_monotonic() {
        let ids = HandleAllocator::default();
        let a = ids.next();
        let b = ids.next();
        assert!(b > a);
        assert_ne!(a, 0);
    }

    #[test]
    fn test_create_dummy_backend() {
        let params = InstanceParameters::new().with_backend(BackendType::Dummy);
        let backend = create_backend(&params).unwrap();
        assert_eq!(backend.name(), "Dummy");
        assert_eq!(backend.enumerate_adapters().len(), 1);
    }

    #[cfg(not(feature = "vulkan-backend"))]
    #[test]
    fn test_vulkan_backend_requires_feature() {
        let params = InstanceParameters::new().with_backend(BackendType::Vulkan);
        assert!(matches!(
            create_backend(&params),
            Err(GraphicsError::DeviceInit(_))
        ));
    }
}
