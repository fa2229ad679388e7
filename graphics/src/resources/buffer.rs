//! GPU buffer resource.

use std::sync::Arc;

use crate::backend::{BufferId, GpuDevice};
use crate::error::GraphicsError;
use crate::types::BufferDescriptor;

/// A GPU buffer resource.
///
/// Buffers are created by [`GraphicsDevice::create_buffer`] and are reference-counted.
/// The backend buffer is destroyed when the last reference is dropped.
///
/// # Example
///
/// ```ignore
/// let buffer = device.create_buffer(&BufferDescriptor::staging(1024))?;
/// buffer.write(0, bytemuck::bytes_of(&view_info))?;
/// ```
///
/// [`GraphicsDevice::create_buffer`]: crate::GraphicsDevice::create_buffer
pub struct Buffer {
    device: Arc<dyn GpuDevice>,
    id: BufferId,
    descriptor: BufferDescriptor,
}

impl Buffer {
    /// Create a new buffer (called by GraphicsDevice).
    pub(crate) fn new(
        device: Arc<dyn GpuDevice>,
        id: BufferId,
        descriptor: BufferDescriptor,
    ) -> Self {
        Self {
            device,
            id,
            descriptor,
        }
    }

    /// Backend handle of the buffer.
    pub fn id(&self) -> BufferId {
        self.id
    }

    /// Get the buffer descriptor.
    pub fn descriptor(&self) -> &BufferDescriptor {
        &self.descriptor
    }

    /// Get the buffer size in bytes.
    pub fn size(&self) -> u64 {
        self.descriptor.size
    }

    /// Get the buffer label, if set.
    pub fn label(&self) -> Option<&str> {
        self.descriptor.label.as_deref()
    }

    /// Write `data` at `offset` through the host mapping.
    ///
    /// # Errors
    ///
    /// Fails if the buffer is not host-writable or the range is out of bounds.
    pub fn write(&self, offset: u64, data: &[u8]) -> Result<(), GraphicsError> {
        self.check_range(offset, data.len() as u64)?;
        self.device.write_buffer(self.id, offset, data)
    }

    /// Read `size` bytes at `offset` through the host mapping.
    ///
    /// # Errors
    ///
    /// Fails if the buffer is not host-readable or the range is out of bounds.
    pub fn read(&self, offset: u64, size: u64) -> Result<Vec<u8>, GraphicsError> {
        self.check_range(offset, size)?;
        self.device.read_buffer(self.id, offset, size)
    }

    fn check_range(&self, offset: u64, size: u64) -> Result<(), GraphicsError> {
        match offset.checked_add(size) {
            Some(end) if end <= self.descriptor.size => Ok(()),
            _ => Err(GraphicsError::InvalidParameter(format!(
                "range {offset}+{size} exceeds buffer {:?} of size {}",
                self.descriptor.label, self.descriptor.size
            ))),
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        self.device.destroy_buffer(self.id);
    }
}

impl std::fmt::Debug for Buffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Buffer")
            .field("id", &self.id.raw())
            .field("size", &self.descriptor.size)
            .field("usage", &self.descriptor.usage)
            .field("label", &self.descriptor.label)
            .finish()
    }
}

// Ensure Buffer is Send + Sync
static_assertions::assert_impl_all!(Buffer: Send, Sync);

#[cfg(test)]
mod tests {
    use crate::config::QueueConfig;
    use crate::instance::{BackendType, GraphicsInstance, InstanceParameters};
    use crate::types::BufferDescriptor;

    fn create_test_device() -> std::sync::Arc<crate::GraphicsDevice> {
        let instance =
            GraphicsInstance::new(InstanceParameters::new().with_backend(BackendType::Dummy))
                .unwrap();
        instance.create_device(0, &QueueConfig::default()).unwrap()
    }

    #[test]
    fn test_buffer_debug() {
        let device = create_test_device();
        let buffer = device
            .create_buffer(&BufferDescriptor::storage(1024).with_label("views"))
            .unwrap();
        let debug = format!("{:?}", buffer);
        assert!(debug.contains("Buffer"));
        assert!(debug.contains("1024"));
        assert_eq!(buffer.label(), Some("views"));
    }

    #[test]
    fn test_write_out_of_range_fails() {
        let device = create_test_device();
        let buffer = device.create_buffer(&BufferDescriptor::staging(16)).unwrap();
        assert!(buffer.write(8, &[0; 8]).is_ok());
        assert!(buffer.write(12, &[0; 8]).is_err());
        assert!(buffer.write(u64::MAX, &[0; 2]).is_err());
    }

    #[test]
    fn test_drop_destroys_backend_buffer() {
        let device = create_test_device();
        let dummy = device
            .raw()
            .as_any()
            .downcast_ref::<crate::backend::dummy::DummyDevice>()
            .unwrap();
        let before = dummy.buffer_count();
        let buffer = device.create_buffer(&BufferDescriptor::readback(64)).unwrap();
        assert_eq!(dummy.buffer_count(), before + 1);
        drop(buffer);
        assert_eq!(dummy.buffer_count(), before);
    }
}
