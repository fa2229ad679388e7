//! Buffer types and descriptors.

use bitflags::bitflags;

bitflags! {
    /// Usage flags for buffers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct BufferUsage: u32 {
        /// Buffer can be bound as a storage buffer.
        const STORAGE = 1 << 0;
        /// Buffer can be copied from.
        const COPY_SRC = 1 << 1;
        /// Buffer can be copied to.
        const COPY_DST = 1 << 2;
        /// Buffer is mappable for CPU reads.
        const MAP_READ = 1 << 3;
        /// Buffer is mappable for CPU writes.
        const MAP_WRITE = 1 << 4;
    }
}

impl Default for BufferUsage {
    fn default() -> Self {
        Self::empty()
    }
}

impl BufferUsage {
    /// Whether the host can access the buffer's memory directly.
    pub fn is_host_visible(&self) -> bool {
        self.intersects(Self::MAP_READ | Self::MAP_WRITE)
    }
}

/// Descriptor for creating a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BufferDescriptor {
    /// Debug label for the buffer.
    pub label: Option<String>,
    /// Size in bytes.
    pub size: u64,
    /// Usage flags.
    pub usage: BufferUsage,
}

impl BufferDescriptor {
    /// Create a new buffer descriptor.
    pub fn new(size: u64, usage: BufferUsage) -> Self {
        Self {
            label: None,
            size,
            usage,
        }
    }

    /// Host-writable staging buffer that feeds transfer copies.
    pub fn staging(size: u64) -> Self {
        Self::new(size, BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC)
    }

    /// Device storage buffer filled by transfer copies.
    pub fn storage(size: u64) -> Self {
        Self::new(size, BufferUsage::STORAGE | BufferUsage::COPY_DST)
    }

    /// Host-readable buffer that receives image copies.
    pub fn readback(size: u64) -> Self {
        Self::new(size, BufferUsage::MAP_READ | BufferUsage::COPY_DST)
    }

    /// Set the debug label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_usage_flags() {
        let usage = BufferUsage::STORAGE | BufferUsage::COPY_DST;
        assert!(usage.contains(BufferUsage::STORAGE));
        assert!(!usage.is_host_visible());
        assert!(BufferDescriptor::readback(16).usage.is_host_visible());
    }

    #[test]
    fn test_buffer_descriptor_label() {
        let desc = BufferDescriptor::staging(1024).with_label("staging");
        assert_eq!(desc.size, 1024);
        assert_eq!(desc.label.as_deref(), Some("staging"));
        assert!(desc.usage.contains(BufferUsage::MAP_WRITE));
    }
}
