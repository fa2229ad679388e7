//! GPU synchronization primitives.
//!
//! This module provides synchronization types for coordinating work
//! between the CPU and GPU, and between queues on the GPU.

use std::sync::Arc;
use std::time::Duration;

use crate::backend::{FenceId, GpuDevice, SemaphoreId};
use crate::error::GraphicsError;

/// GPU timeline semaphore for ordering work across queues.
///
/// A timeline semaphore carries a monotonically increasing counter:
/// - A submission signals it by setting the counter to a value when complete
/// - Another submission waits until the counter reaches a value before starting
///
/// The host can read the counter and block on it, but the pipeliner only does
/// so when it runs out of staging space.
pub struct TimelineSemaphore {
    device: Arc<dyn GpuDevice>,
    id: SemaphoreId,
}

impl TimelineSemaphore {
    pub(crate) fn new(device: Arc<dyn GpuDevice>, id: SemaphoreId) -> Self {
        Self { device, id }
    }

    /// Backend handle of the semaphore.
    pub fn id(&self) -> SemaphoreId {
        self.id
    }

    /// Current counter value.
    pub fn value(&self) -> Result<u64, GraphicsError> {
        self.device.semaphore_value(self.id)
    }

    /// Block until the counter reaches `value`.
    ///
    /// Returns `Ok(false)` if `timeout` elapsed first.
    pub fn wait(&self, value: u64, timeout: Duration) -> Result<bool, GraphicsError> {
        self.device.wait_semaphore(self.id, value, timeout)
    }
}

impl Drop for TimelineSemaphore {
    fn drop(&mut self) {
        self.device.destroy_semaphore(self.id);
    }
}

impl std::fmt::Debug for TimelineSemaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimelineSemaphore")
            .field("id", &self.id.raw())
            .finish()
    }
}

/// Status of a fence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceStatus {
    /// The fence has not yet been signaled.
    Unsignaled,
    /// The fence has been signaled (GPU work complete).
    Signaled,
}

struct FenceInner {
    device: Arc<dyn GpuDevice>,
    id: FenceId,
}

impl Drop for FenceInner {
    fn drop(&mut self) {
        self.device.destroy_fence(self.id);
    }
}

/// CPU-GPU synchronization primitive.
///
/// Fences allow the CPU to wait for GPU work to complete. Each batch owns one
/// fence, signaled by its last submission.
///
/// Clones share the same backend fence, which is destroyed when the last
/// clone is dropped.
///
/// # Example
///
/// ```ignore
/// let fence = device.create_fence()?;
/// device.submit(QueueKind::Compute, &readback.with_fence(fence.id()))?;
///
/// // Later, before reading results:
/// if fence.wait(Duration::from_secs(1))? {
///     assert_eq!(fence.status()?, FenceStatus::Signaled);
/// }
/// ```
#[derive(Clone)]
pub struct Fence {
    inner: Arc<FenceInner>,
}

impl Fence {
    pub(crate) fn new(device: Arc<dyn GpuDevice>, id: FenceId) -> Self {
        Self {
            inner: Arc::new(FenceInner { device, id }),
        }
    }

    /// Backend handle of the fence.
    pub fn id(&self) -> FenceId {
        self.inner.id
    }

    /// Check the current status of the fence.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::DeviceLost`] if the device was lost before the
    /// fence signaled.
    pub fn status(&self) -> Result<FenceStatus, GraphicsError> {
        if self.inner.device.fence_status(self.inner.id)? {
            Ok(FenceStatus::Signaled)
        } else {
            Ok(FenceStatus::Unsignaled)
        }
    }

    /// Check if the fence is signaled (non-blocking). Errors read as unsignaled.
    pub fn is_signaled(&self) -> bool {
        matches!(self.status(), Ok(FenceStatus::Signaled))
    }

    /// Wait for the fence with a timeout.
    ///
    /// Returns `Ok(true)` if the fence was signaled, `Ok(false)` if the
    /// timeout elapsed.
    pub fn wait(&self, timeout: Duration) -> Result<bool, GraphicsError> {
        self.inner.device.wait_fence(self.inner.id, timeout)
    }
}

impl std::fmt::Debug for Fence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fence")
            .field("id", &self.inner.id.raw())
            .finish()
    }
}

static_assertions::assert_impl_all!(Fence: Send, Sync);
static_assertions::assert_impl_all!(TimelineSemaphore: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDevice;
    use crate::command::Submission;
    use crate::config::QueueConfig;
    use crate::device::GraphicsDevice;
    use crate::instance::{BackendType, GraphicsInstance, InstanceParameters};
    use crate::queue::QueueKind;

    fn create_device() -> Arc<GraphicsDevice> {
        let instance =
            GraphicsInstance::new(InstanceParameters::new().with_backend(BackendType::Dummy))
                .unwrap();
        instance.create_device(0, &QueueConfig::default()).unwrap()
    }

    fn dummy(device: &GraphicsDevice) -> &DummyDevice {
        device.raw().as_any().downcast_ref::<DummyDevice>().unwrap()
    }

    #[test]
    fn test_fence_unsignaled() {
        let device = create_device();
        let fence = device.create_fence().unwrap();
        assert_eq!(fence.status().unwrap(), FenceStatus::Unsignaled);
        assert!(!fence.is_signaled());
    }

    #[test]
    fn test_fence_signal_and_wait() {
        let device = create_device();
        let fence = device.create_fence().unwrap();
        dummy(&device).set_hold_completions(true);
        device
            .submit(QueueKind::Compute, &Submission::new("work").with_fence(fence.id()))
            .unwrap();

        // Simulate the GPU finishing from another thread
        let signaler = Arc::clone(&device);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            dummy(&signaler).release_completions();
        });

        assert!(fence.wait(Duration::from_secs(5)).unwrap());
        assert!(fence.is_signaled());
        handle.join().unwrap();
    }

    #[test]
    fn test_fence_wait_timeout() {
        let device = create_device();
        let fence = device.create_fence().unwrap();

        // Should timeout since nothing signals it
        assert!(!fence.wait(Duration::from_millis(10)).unwrap());
        assert!(!fence.is_signaled());
    }

    #[test]
    fn test_fence_clone_shares_state() {
        let device = create_device();
        let fence1 = device.create_fence().unwrap();
        let fence2 = fence1.clone();
        device
            .submit(QueueKind::Graphics, &Submission::new("work").with_fence(fence1.id()))
            .unwrap();
        assert!(fence2.is_signaled());
    }

    #[test]
    fn test_timeline_semaphore() {
        let device = create_device();
        let sem = device.create_timeline_semaphore(2).unwrap();
        assert_eq!(sem.value().unwrap(), 2);
        device
            .submit(QueueKind::Transfer, &Submission::new("t").signal(sem.id(), 5))
            .unwrap();
        assert_eq!(sem.value().unwrap(), 5);
        assert!(sem.wait(4, Duration::from_millis(1)).unwrap());
        assert!(!sem.wait(6, Duration::from_millis(1)).unwrap());
    }
}
