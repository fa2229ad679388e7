//! GPU memory through gpu-allocator.

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};

use crate::error::GraphicsError;
use crate::types::{BufferUsage, ImageUsage};

pub(super) fn create_allocator(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    device: ash::Device,
) -> Result<Allocator, GraphicsError> {
    Allocator::new(&AllocatorCreateDesc {
        instance: instance.clone(),
        device,
        physical_device,
        debug_settings: Default::default(),
        buffer_device_address: false,
        allocation_sizes: gpu_allocator::AllocationSizes::default(),
    })
    .map_err(|e| GraphicsError::DeviceInit(format!("failed to create memory allocator: {e}")))
}

/// Memory location for a buffer: readback and staging buffers live in host
/// memory, everything else on the device.
pub(super) fn buffer_location(usage: BufferUsage) -> MemoryLocation {
    if usage.contains(BufferUsage::MAP_READ) {
        MemoryLocation::GpuToCpu
    } else if usage.contains(BufferUsage::MAP_WRITE) {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

pub(super) fn buffer_usage_flags(usage: BufferUsage) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsage::STORAGE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsage::COPY_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsage::COPY_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

pub(super) fn image_usage_flags(usage: ImageUsage) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(ImageUsage::RENDER_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(ImageUsage::COPY_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(ImageUsage::COPY_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    if usage.contains(ImageUsage::STORAGE) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    flags
}

/// Allocate and bind memory for `buffer`.
pub(super) fn allocate_buffer(
    allocator: &mut Allocator,
    device: &ash::Device,
    buffer: vk::Buffer,
    name: &str,
    location: MemoryLocation,
) -> Result<Allocation, GraphicsError> {
    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
    let allocation = allocator
        .allocate(&AllocationCreateDesc {
            name,
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(map_allocation_error)?;

    unsafe { device.bind_buffer_memory(buffer, allocation.memory(), allocation.offset()) }
        .map_err(|e| GraphicsError::ResourceCreation(format!("failed to bind {name}: {e:?}")))?;
    Ok(allocation)
}

/// Allocate and bind device memory for `image`.
pub(super) fn allocate_image(
    allocator: &mut Allocator,
    device: &ash::Device,
    image: vk::Image,
    name: &str,
) -> Result<Allocation, GraphicsError> {
    let requirements = unsafe { device.get_image_memory_requirements(image) };
    let allocation = allocator
        .allocate(&AllocationCreateDesc {
            name,
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        })
        .map_err(map_allocation_error)?;

    unsafe { device.bind_image_memory(image, allocation.memory(), allocation.offset()) }
        .map_err(|e| GraphicsError::ResourceCreation(format!("failed to bind {name}: {e:?}")))?;
    Ok(allocation)
}

fn map_allocation_error(error: gpu_allocator::AllocationError) -> GraphicsError {
    match error {
        gpu_allocator::AllocationError::OutOfMemory => GraphicsError::OutOfMemory,
        other => GraphicsError::ResourceCreation(format!("memory allocation failed: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_location() {
        let readback = BufferUsage::MAP_READ | BufferUsage::COPY_DST;
        let staging = BufferUsage::MAP_WRITE | BufferUsage::COPY_SRC;
        let storage = BufferUsage::STORAGE | BufferUsage::COPY_DST;
        assert_eq!(buffer_location(readback), MemoryLocation::GpuToCpu);
        assert_eq!(buffer_location(staging), MemoryLocation::CpuToGpu);
        assert_eq!(buffer_location(storage), MemoryLocation::GpuOnly);
    }

    #[test]
    fn test_usage_flags() {
        let flags = buffer_usage_flags(BufferUsage::STORAGE | BufferUsage::COPY_DST);
        assert_eq!(
            flags,
            vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
        );
        let flags = image_usage_flags(ImageUsage::RENDER_ATTACHMENT | ImageUsage::COPY_SRC);
        assert_eq!(
            flags,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_SRC
        );
    }
}
