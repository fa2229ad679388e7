//! Deferred destruction of resources still referenced by in-flight work.
//!
//! Every submission gets a serial. A resource destroyed by the caller while
//! submissions are in flight is parked with the latest serial handed out and
//! released once every submission up to that serial has retired.
//!
//! ```text
//! destroy_buffer(b)       serial 7 in flight  -> parked as (7, b)
//! retire(..=6)            oldest in flight 7  -> (7, b) kept
//! retire(7)               oldest in flight 9  -> (7, b) released
//! ```

use gpu_allocator::vulkan::Allocator;

use crate::backend::BufferId;

use super::resources::{VulkanBuffer, VulkanImage};

/// A resource pending destruction.
pub(super) enum DeferredResource {
    Buffer(BufferId, VulkanBuffer),
    Image(VulkanImage),
}

impl DeferredResource {
    pub(super) fn buffer_id(&self) -> Option<BufferId> {
        match self {
            Self::Buffer(id, _) => Some(*id),
            Self::Image(_) => None,
        }
    }

    /// Destroy the resource immediately.
    ///
    /// # Safety
    ///
    /// The GPU must no longer use the resource.
    pub(super) unsafe fn destroy(self, device: &ash::Device, allocator: Option<&mut Allocator>) {
        match self {
            Self::Buffer(_, buffer) => unsafe { buffer.destroy(device, allocator) },
            Self::Image(image) => unsafe { image.destroy(device, allocator) },
        }
    }
}

#[derive(Default)]
pub(super) struct DeferredDestructor {
    pending: Vec<(u64, DeferredResource)>,
}

impl DeferredDestructor {
    /// Park `resource` until submission `serial` has retired.
    pub(super) fn queue(&mut self, serial: u64, resource: DeferredResource) {
        self.pending.push((serial, resource));
    }

    /// Take resources whose last submission retired. `oldest_in_flight` is
    /// the serial of the oldest unretired submission, if any.
    pub(super) fn take_ready(&mut self, oldest_in_flight: Option<u64>) -> Vec<DeferredResource> {
        let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|(serial, _)| oldest_in_flight.is_none_or(|oldest| *serial < oldest));
        self.pending = pending;
        ready.into_iter().map(|(_, resource)| resource).collect()
    }

    /// Take everything, for teardown after the device is idle.
    pub(super) fn take_all(&mut self) -> Vec<DeferredResource> {
        self.pending.drain(..).map(|(_, resource)| resource).collect()
    }

    pub(super) fn len(&self) -> usize {
        self.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::*;
    use crate::types::BufferUsage;

    fn parked() -> DeferredResource {
        DeferredResource::Buffer(
            BufferId::new(1),
            VulkanBuffer {
                buffer: vk::Buffer::null(),
                allocation: None,
                usage: BufferUsage::empty(),
                size: 0,
            },
        )
    }

    #[test]
    fn test_resources_wait_for_their_serial() {
        let mut deferred = DeferredDestructor::default();
        deferred.queue(3, parked());
        deferred.queue(7, parked());

        assert!(deferred.take_ready(Some(3)).is_empty());
        let ready = deferred.take_ready(Some(5));
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].buffer_id(), Some(BufferId::new(1)));
        assert_eq!(deferred.len(), 1);
        assert_eq!(deferred.take_ready(None).len(), 1);
        assert_eq!(deferred.len(), 0);
    }

    #[test]
    fn test_take_all() {
        let mut deferred = DeferredDestructor::default();
        deferred.queue(1, parked());
        deferred.queue(2, parked());
        assert_eq!(deferred.take_all().len(), 2);
        assert_eq!(deferred.len(), 0);
    }
}
