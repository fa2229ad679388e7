//! Native Vulkan backend implementation using ash.
//!
//! Headless: no surface or swapchain extensions are loaded. Requires Vulkan
//! 1.3 for timeline semaphores and dynamic rendering.
//!
//! Each [`Submission`] is recorded into its own command buffer from the
//! queue family's pool and submitted with a fence. The command buffer is
//! freed once the fence signals. Resources are shared concurrently between
//! the requested queue families, so no ownership transfers are recorded.
//!
//! Pipelines are not built here. Create them against
//! [`VulkanDevice::pipeline_layout`] and install them with
//! [`VulkanDevice::set_graphics_pipeline`] and
//! [`VulkanDevice::set_compute_pipeline`]. Draws recorded while no graphics
//! pipeline is installed are skipped with a warning.

mod allocator;
mod bindings;
mod command;
mod debug;
mod deferred;
mod device;
mod instance;
mod resources;

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use ash::vk;
use gpu_allocator::vulkan::Allocator;
use parking_lot::Mutex;

use crate::command::Submission;
use crate::device::DeviceCapabilities;
use crate::error::GraphicsError;
use crate::instance::AdapterInfo;
use crate::queue::{QueueAddress, QueueFamilyInfo, QueueFamilyRequest};
use crate::types::{BufferDescriptor, ImageDescriptor, ImageFormat};

use self::bindings::ResourceBindings;
use self::command::{CommandEncoder, Pipelines};
use self::deferred::{DeferredDestructor, DeferredResource};
use self::device::Adapter;
use self::instance::InstanceShared;
use self::resources::{ResourceTable, VulkanBuffer, VulkanImage, host_range};

use super::{BufferId, FenceId, GpuBackend, GpuDevice, HandleAllocator, ImageId, SemaphoreId};

/// Map a Vulkan result code to a graphics error.
pub(crate) fn map_vk_error(result: vk::Result) -> GraphicsError {
    match result {
        vk::Result::ERROR_DEVICE_LOST => GraphicsError::DeviceLost,
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            GraphicsError::OutOfMemory
        }
        other => GraphicsError::Internal(format!("Vulkan call failed: {other:?}")),
    }
}

fn timeout_nanos(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX)
}

/// Vulkan backend: the instance and the adapters found on it.
pub struct VulkanBackend {
    shared: Arc<InstanceShared>,
    adapters: Vec<Adapter>,
}

impl VulkanBackend {
    /// Create the instance and enumerate adapters.
    pub fn new(validation: bool) -> Result<Self, GraphicsError> {
        let shared = Arc::new(InstanceShared::new(validation)?);
        let adapters = device::enumerate_adapters(&shared.instance)?;
        if adapters.is_empty() {
            return Err(GraphicsError::DeviceInit(
                "no GPU with Vulkan 1.3 support found".to_string(),
            ));
        }
        Ok(Self { shared, adapters })
    }

    fn adapter(&self, index: usize) -> Result<&Adapter, GraphicsError> {
        self.adapters.get(index).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "adapter index {index} out of range ({})",
                self.adapters.len()
            ))
        })
    }
}

impl std::fmt::Debug for VulkanBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBackend")
            .field("adapters", &self.adapters.len())
            .finish()
    }
}

impl GpuBackend for VulkanBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        self.adapters.iter().map(|a| a.info.clone()).collect()
    }

    fn queue_families(&self, adapter: usize) -> Result<Vec<QueueFamilyInfo>, GraphicsError> {
        Ok(self.adapter(adapter)?.families.clone())
    }

    fn create_device(
        &self,
        adapter: usize,
        requests: &[QueueFamilyRequest],
    ) -> Result<Arc<dyn GpuDevice>, GraphicsError> {
        let adapter = self.adapter(adapter)?;
        for request in requests {
            let family = adapter
                .families
                .iter()
                .find(|f| f.index == request.family_index)
                .ok_or_else(|| {
                    GraphicsError::DeviceInit(format!(
                        "queue family {} does not exist",
                        request.family_index
                    ))
                })?;
            if request.priorities.len() as u32 > family.queue_count {
                return Err(GraphicsError::DeviceInit(format!(
                    "queue family {} provides {} queue(s), {} requested",
                    family.index,
                    family.queue_count,
                    request.priorities.len()
                )));
            }
        }

        let device = VulkanDevice::new(Arc::clone(&self.shared), adapter, requests)?;
        log::info!("Vulkan device created on {}", adapter.info.name);
        Ok(Arc::new(device))
    }
}

/// A recorded command buffer waiting for its fence.
struct InFlight {
    serial: u64,
    fence: vk::Fence,
    /// Whether the fence is destroyed with the entry: internal fences and user
    /// fences destroyed while in flight.
    owns_fence: bool,
    user_fence: Option<FenceId>,
    family_index: u32,
    cmd: vk::CommandBuffer,
}

/// Vulkan logical device.
pub struct VulkanDevice {
    device: ash::Device,
    name: String,
    capabilities: DeviceCapabilities,
    ids: HandleAllocator,
    queues: HashMap<QueueAddress, Mutex<vk::Queue>>,
    command_pools: HashMap<u32, Mutex<vk::CommandPool>>,
    sharing_families: Vec<u32>,
    allocator: Mutex<Option<Allocator>>,
    resources: Mutex<ResourceTable>,
    fences: Mutex<HashMap<FenceId, vk::Fence>>,
    semaphores: Mutex<HashMap<SemaphoreId, vk::Semaphore>>,
    in_flight: Mutex<Vec<InFlight>>,
    deferred: Mutex<DeferredDestructor>,
    bindings: Mutex<ResourceBindings>,
    pipelines: Mutex<Pipelines>,
    next_serial: AtomicU64,
    lost: AtomicBool,
    // Dropped after the device is destroyed in `Drop`.
    _instance: Arc<InstanceShared>,
}

impl VulkanDevice {
    fn new(
        shared: Arc<InstanceShared>,
        adapter: &Adapter,
        requests: &[QueueFamilyRequest],
    ) -> Result<Self, GraphicsError> {
        let device =
            device::create_logical_device(&shared.instance, adapter.physical_device, requests)?;

        let mut queues = HashMap::new();
        let mut command_pools = HashMap::new();
        for request in requests {
            for queue_index in 0..request.priorities.len() as u32 {
                let queue = unsafe { device.get_device_queue(request.family_index, queue_index) };
                queues.insert(
                    QueueAddress {
                        family_index: request.family_index,
                        queue_index,
                    },
                    Mutex::new(queue),
                );
            }
            match command::create_command_pool(&device, request.family_index) {
                Ok(pool) => {
                    command_pools.insert(request.family_index, Mutex::new(pool));
                }
                Err(e) => {
                    unsafe {
                        for pool in command_pools.values() {
                            device.destroy_command_pool(*pool.lock(), None);
                        }
                        device.destroy_device(None);
                    }
                    return Err(e);
                }
            }
        }

        let setup = allocator::create_allocator(
            &shared.instance,
            adapter.physical_device,
            device.clone(),
        )
        .and_then(|allocator| Ok((allocator, ResourceBindings::new(&device)?)));
        let (allocator, bindings) = match setup {
            Ok(parts) => parts,
            Err(e) => {
                unsafe {
                    for pool in command_pools.values() {
                        device.destroy_command_pool(*pool.lock(), None);
                    }
                    device.destroy_device(None);
                }
                return Err(e);
            }
        };

        let mut sharing_families: Vec<u32> = requests.iter().map(|r| r.family_index).collect();
        sharing_families.sort_unstable();
        sharing_families.dedup();

        Ok(Self {
            device,
            name: adapter.info.name.clone(),
            capabilities: adapter.capabilities,
            ids: HandleAllocator::default(),
            queues,
            command_pools,
            sharing_families,
            allocator: Mutex::new(Some(allocator)),
            resources: Mutex::new(ResourceTable::default()),
            fences: Mutex::new(HashMap::new()),
            semaphores: Mutex::new(HashMap::new()),
            in_flight: Mutex::new(Vec::new()),
            deferred: Mutex::new(DeferredDestructor::default()),
            bindings: Mutex::new(bindings),
            pipelines: Mutex::new(Pipelines::default()),
            next_serial: AtomicU64::new(1),
            lost: AtomicBool::new(false),
            _instance: shared,
        })
    }

    /// The ash device, for building pipelines.
    pub fn raw_device(&self) -> &ash::Device {
        &self.device
    }

    /// Layout every pipeline must be created with: set 0 holds the view,
    /// material and light storage buffers, plus a 4-byte push constant.
    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.bindings.lock().pipeline_layout()
    }

    pub fn descriptor_set_layout(&self) -> vk::DescriptorSetLayout {
        self.bindings.lock().set_layout()
    }

    /// Install the pipeline used for draws. The caller keeps ownership and
    /// must keep it alive while work using it is in flight.
    pub fn set_graphics_pipeline(&self, pipeline: Option<vk::Pipeline>) {
        self.pipelines.lock().graphics = pipeline;
    }

    /// Install the pipeline used for dispatches on the readback queue.
    pub fn set_compute_pipeline(&self, pipeline: Option<vk::Pipeline>) {
        self.pipelines.lock().compute = pipeline;
    }

    /// Number of submissions whose fence has not been observed signaled.
    pub fn in_flight_submissions(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn check_lost(&self) -> Result<(), GraphicsError> {
        if self.lost.load(Ordering::Acquire) {
            Err(GraphicsError::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// Map a failed call, latching device loss.
    fn vk_error(&self, result: vk::Result) -> GraphicsError {
        if result == vk::Result::ERROR_DEVICE_LOST && !self.lost.swap(true, Ordering::AcqRel) {
            log::error!("Vulkan device lost on {}", self.name);
        }
        map_vk_error(result)
    }

    fn sharing_mode(&self) -> vk::SharingMode {
        if self.sharing_families.len() > 1 {
            vk::SharingMode::CONCURRENT
        } else {
            vk::SharingMode::EXCLUSIVE
        }
    }

    /// Free command buffers and internal fences of retired submissions, then
    /// release deferred resources nothing references anymore.
    fn retire_completed(&self) {
        let retired: Vec<InFlight> = {
            let mut in_flight = self.in_flight.lock();
            let (done, pending): (Vec<_>, Vec<_>) =
                std::mem::take(&mut *in_flight).into_iter().partition(|entry| {
                    matches!(unsafe { self.device.get_fence_status(entry.fence) }, Ok(true))
                });
            *in_flight = pending;
            done
        };
        for entry in retired {
            self.release(entry);
        }
        self.collect_deferred();
    }

    fn release(&self, entry: InFlight) {
        if let Some(pool) = self.command_pools.get(&entry.family_index) {
            let pool = pool.lock();
            unsafe { self.device.free_command_buffers(*pool, &[entry.cmd]) };
        }
        if entry.owns_fence {
            unsafe { self.device.destroy_fence(entry.fence, None) };
        }
    }

    fn collect_deferred(&self) {
        let oldest = self.in_flight.lock().iter().map(|entry| entry.serial).min();
        let ready = self.deferred.lock().take_ready(oldest);
        if ready.is_empty() {
            return;
        }
        let mut allocator = self.allocator.lock();
        for resource in ready {
            unsafe { self.free(resource, allocator.as_mut()) };
        }
    }

    /// # Safety
    ///
    /// The GPU must no longer use the resource.
    unsafe fn free(&self, resource: DeferredResource, allocator: Option<&mut Allocator>) {
        if let Some(buffer) = resource.buffer_id() {
            self.bindings.lock().forget_buffer(&self.device, buffer);
        }
        unsafe { resource.destroy(&self.device, allocator) };
    }

    /// Destroy `resource` now if nothing is in flight, otherwise park it.
    fn destroy_or_defer(&self, resource: DeferredResource) {
        let in_flight = self.in_flight.lock();
        if in_flight.is_empty() {
            drop(in_flight);
            let mut allocator = self.allocator.lock();
            unsafe { self.free(resource, allocator.as_mut()) };
        } else {
            let serial = self.next_serial.load(Ordering::Acquire) - 1;
            let mut deferred = self.deferred.lock();
            deferred.queue(serial, resource);
            log::trace!("Vulkan: {} resource(s) awaiting destruction", deferred.len());
        }
    }

    /// Record `submission` into a new command buffer of `family_index`.
    fn record(
        &self,
        family_index: u32,
        submission: &Submission,
    ) -> Result<vk::CommandBuffer, GraphicsError> {
        crate::profile_scope!("vulkan_record");
        let pool = self.command_pools.get(&family_index).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "queue family {family_index} was not created on this device"
            ))
        })?;
        let pool = pool.lock();
        let cmd = command::begin_command_buffer(&self.device, *pool)?;

        let resources = self.resources.lock();
        let mut bindings = self.bindings.lock();
        let pipelines = *self.pipelines.lock();
        let encoded = CommandEncoder::new(&self.device, cmd, &resources, &mut bindings, pipelines)
            .encode_all(&submission.label, &submission.commands);
        if let Err(e) = encoded {
            unsafe { self.device.free_command_buffers(*pool, &[cmd]) };
            return Err(e);
        }
        Ok(cmd)
    }

    fn semaphore_handles(
        &self,
        ops: &[crate::command::SemaphoreOp],
    ) -> Result<(Vec<vk::Semaphore>, Vec<u64>), GraphicsError> {
        let semaphores = self.semaphores.lock();
        ops.iter()
            .map(|op| {
                semaphores
                    .get(&op.semaphore)
                    .map(|&handle| (handle, op.value))
                    .ok_or_else(|| {
                        GraphicsError::InvalidParameter(format!(
                            "unknown semaphore {}",
                            op.semaphore.raw()
                        ))
                    })
            })
            .collect::<Result<Vec<_>, _>>()
            .map(|pairs| pairs.into_iter().unzip())
    }

    /// The fence to signal: the user's, reset, or a new internal one.
    fn submission_fence(
        &self,
        fence: Option<FenceId>,
    ) -> Result<(vk::Fence, bool), GraphicsError> {
        match fence {
            Some(id) => {
                let fence = *self.fences.lock().get(&id).ok_or_else(|| {
                    GraphicsError::InvalidParameter(format!("unknown fence {}", id.raw()))
                })?;
                unsafe { self.device.reset_fences(&[fence]) }.map_err(|e| self.vk_error(e))?;
                Ok((fence, false))
            }
            None => {
                let info = vk::FenceCreateInfo::default();
                let fence = unsafe { self.device.create_fence(&info, None) }
                    .map_err(|e| self.vk_error(e))?;
                Ok((fence, true))
            }
        }
    }
}

impl GpuDevice for VulkanDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn capabilities(&self) -> DeviceCapabilities {
        self.capabilities
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, GraphicsError> {
        self.check_lost()?;
        let name = descriptor.label.as_deref().unwrap_or("buffer");
        let buffer_info = vk::BufferCreateInfo::default()
            .size(descriptor.size.max(1))
            .usage(allocator::buffer_usage_flags(descriptor.usage))
            .sharing_mode(self.sharing_mode())
            .queue_family_indices(&self.sharing_families);
        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }
            .map_err(|e| {
                GraphicsError::ResourceCreation(format!("failed to create {name}: {e:?}"))
            })?;

        let location = allocator::buffer_location(descriptor.usage);
        let allocation = {
            let mut allocator = self.allocator.lock();
            let Some(allocator) = allocator.as_mut() else {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(GraphicsError::DeviceLost);
            };
            allocator::allocate_buffer(allocator, &self.device, buffer, name, location)
        };
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let id = BufferId::new(self.ids.next());
        log::trace!("Vulkan: created {} ({} bytes)", name, descriptor.size);
        self.resources.lock().buffers.insert(
            id,
            VulkanBuffer {
                buffer,
                allocation: Some(allocation),
                usage: descriptor.usage,
                size: descriptor.size,
            },
        );
        Ok(id)
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        let Some(removed) = self.resources.lock().buffers.remove(&buffer) else {
            return;
        };
        self.destroy_or_defer(DeferredResource::Buffer(buffer, removed));
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<ImageId, GraphicsError> {
        self.check_lost()?;
        let name = descriptor.label.as_deref().unwrap_or("image");
        let format = match descriptor.format {
            ImageFormat::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        };
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: descriptor.width,
                height: descriptor.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(allocator::image_usage_flags(descriptor.usage))
            .sharing_mode(self.sharing_mode())
            .queue_family_indices(&self.sharing_families)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { self.device.create_image(&image_info, None) }
            .map_err(|e| {
                GraphicsError::ResourceCreation(format!("failed to create {name}: {e:?}"))
            })?;

        let allocation = {
            let mut allocator = self.allocator.lock();
            match allocator.as_mut() {
                Some(allocator) => allocator::allocate_image(allocator, &self.device, image, name),
                None => Err(GraphicsError::DeviceLost),
            }
        };
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });
        let view = match unsafe { self.device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                let vulkan_image = VulkanImage {
                    image,
                    view: vk::ImageView::null(),
                    allocation: Some(allocation),
                };
                unsafe { vulkan_image.destroy(&self.device, self.allocator.lock().as_mut()) };
                return Err(GraphicsError::ResourceCreation(format!(
                    "failed to create view of {name}: {e:?}"
                )));
            }
        };

        let id = ImageId::new(self.ids.next());
        log::trace!(
            "Vulkan: created {} ({}x{})",
            name,
            descriptor.width,
            descriptor.height
        );
        self.resources.lock().images.insert(
            id,
            VulkanImage {
                image,
                view,
                allocation: Some(allocation),
            },
        );
        Ok(id)
    }

    fn destroy_image(&self, image: ImageId) {
        let Some(removed) = self.resources.lock().images.remove(&image) else {
            return;
        };
        self.destroy_or_defer(DeferredResource::Image(removed));
    }

    fn write_buffer(
        &self,
        buffer: BufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let mut resources = self.resources.lock();
        let target = resources.buffer_mut(buffer)?;
        if !target.usage.contains(crate::types::BufferUsage::MAP_WRITE) {
            return Err(GraphicsError::InvalidParameter(
                "buffer is not host-writable".to_string(),
            ));
        }
        let range = host_range(target.size, offset, data.len() as u64)?;
        target.mapped_mut()?[range].copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: BufferId,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError> {
        let resources = self.resources.lock();
        let source = resources.buffer(buffer)?;
        if !source.usage.contains(crate::types::BufferUsage::MAP_READ) {
            return Err(GraphicsError::InvalidParameter(
                "buffer is not host-readable".to_string(),
            ));
        }
        let range = host_range(source.size, offset, size)?;
        Ok(source.mapped()?[range].to_vec())
    }

    fn create_fence(&self) -> Result<FenceId, GraphicsError> {
        self.check_lost()?;
        let info = vk::FenceCreateInfo::default();
        let fence = unsafe { self.device.create_fence(&info, None) }.map_err(|e| self.vk_error(e))?;
        let id = FenceId::new(self.ids.next());
        self.fences.lock().insert(id, fence);
        Ok(id)
    }

    fn destroy_fence(&self, fence: FenceId) {
        let Some(handle) = self.fences.lock().remove(&fence) else {
            return;
        };
        let mut in_flight = self.in_flight.lock();
        if let Some(entry) = in_flight.iter_mut().find(|e| e.user_fence == Some(fence)) {
            entry.owns_fence = true;
            entry.user_fence = None;
        } else {
            unsafe { self.device.destroy_fence(handle, None) };
        }
    }

    fn fence_status(&self, fence: FenceId) -> Result<bool, GraphicsError> {
        let handle = *self.fences.lock().get(&fence).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown fence {}", fence.raw()))
        })?;
        let signaled =
            unsafe { self.device.get_fence_status(handle) }.map_err(|e| self.vk_error(e))?;
        if !signaled {
            self.check_lost()?;
        }
        Ok(signaled)
    }

    fn wait_fence(&self, fence: FenceId, timeout: Duration) -> Result<bool, GraphicsError> {
        crate::profile_scope!("vulkan_wait_fence");
        let handle = *self.fences.lock().get(&fence).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown fence {}", fence.raw()))
        })?;
        match unsafe {
            self.device
                .wait_for_fences(&[handle], true, timeout_nanos(timeout))
        } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => self.check_lost().map(|_| false),
            Err(e) => Err(self.vk_error(e)),
        }
    }

    fn create_timeline_semaphore(&self, initial_value: u64) -> Result<SemaphoreId, GraphicsError> {
        self.check_lost()?;
        let mut type_info = vk::SemaphoreTypeCreateInfo::default()
            .semaphore_type(vk::SemaphoreType::TIMELINE)
            .initial_value(initial_value);
        let info = vk::SemaphoreCreateInfo::default().push_next(&mut type_info);
        let semaphore =
            unsafe { self.device.create_semaphore(&info, None) }.map_err(|e| self.vk_error(e))?;
        let id = SemaphoreId::new(self.ids.next());
        self.semaphores.lock().insert(id, semaphore);
        Ok(id)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreId) {
        let Some(handle) = self.semaphores.lock().remove(&semaphore) else {
            return;
        };
        // Queued work may still wait on it.
        if let Err(e) = self.wait_idle() {
            log::warn!("Vulkan: destroying semaphore without idle device: {}", e);
        }
        unsafe { self.device.destroy_semaphore(handle, None) };
    }

    fn semaphore_value(&self, semaphore: SemaphoreId) -> Result<u64, GraphicsError> {
        self.check_lost()?;
        let handle = *self.semaphores.lock().get(&semaphore).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown semaphore {}", semaphore.raw()))
        })?;
        unsafe { self.device.get_semaphore_counter_value(handle) }.map_err(|e| self.vk_error(e))
    }

    fn wait_semaphore(
        &self,
        semaphore: SemaphoreId,
        value: u64,
        timeout: Duration,
    ) -> Result<bool, GraphicsError> {
        crate::profile_scope!("vulkan_wait_semaphore");
        let handle = *self.semaphores.lock().get(&semaphore).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown semaphore {}", semaphore.raw()))
        })?;
        let semaphores = [handle];
        let values = [value];
        let wait_info = vk::SemaphoreWaitInfo::default()
            .semaphores(&semaphores)
            .values(&values);
        match unsafe { self.device.wait_semaphores(&wait_info, timeout_nanos(timeout)) } {
            Ok(()) => Ok(true),
            Err(vk::Result::TIMEOUT) => self.check_lost().map(|_| false),
            Err(e) => Err(self.vk_error(e)),
        }
    }

    fn submit(&self, queue: QueueAddress, submission: &Submission) -> Result<(), GraphicsError> {
        crate::profile_scope!("vulkan_submit");
        self.check_lost()?;
        let vk_queue = self.queues.get(&queue).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "queue {}:{} was not created on this device",
                queue.family_index, queue.queue_index
            ))
        })?;

        self.retire_completed();

        let (wait_semaphores, wait_values) = self.semaphore_handles(&submission.wait)?;
        let (signal_semaphores, signal_values) = self.semaphore_handles(&submission.signal)?;
        let cmd = self.record(queue.family_index, submission)?;
        let (fence, owns_fence) = match self.submission_fence(submission.fence) {
            Ok(fence) => fence,
            Err(e) => {
                self.release(InFlight {
                    serial: 0,
                    fence: vk::Fence::null(),
                    owns_fence: false,
                    user_fence: None,
                    family_index: queue.family_index,
                    cmd,
                });
                return Err(e);
            }
        };

        let wait_stages = vec![vk::PipelineStageFlags::ALL_COMMANDS; wait_semaphores.len()];
        let command_buffers = [cmd];
        let mut timeline_info = vk::TimelineSemaphoreSubmitInfo::default()
            .wait_semaphore_values(&wait_values)
            .signal_semaphore_values(&signal_values);
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores)
            .push_next(&mut timeline_info);

        // Serial is taken under the in-flight lock so deferred destruction
        // never sees an entry with a serial it has not accounted for.
        let mut in_flight = self.in_flight.lock();
        let result = {
            let vk_queue = vk_queue.lock();
            unsafe {
                self.device
                    .queue_submit(*vk_queue, &[submit_info], fence)
            }
        };
        let entry = InFlight {
            serial: self.next_serial.fetch_add(1, Ordering::AcqRel),
            fence,
            owns_fence,
            user_fence: submission.fence,
            family_index: queue.family_index,
            cmd,
        };
        match result {
            Ok(()) => {
                log::trace!(
                    "Vulkan: submitted '{}' to {}:{}",
                    submission.label,
                    queue.family_index,
                    queue.queue_index
                );
                in_flight.push(entry);
                Ok(())
            }
            Err(e) => {
                drop(in_flight);
                self.release(entry);
                Err(self.vk_error(e))
            }
        }
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        self.check_lost()?;
        unsafe { self.device.device_wait_idle() }.map_err(|e| self.vk_error(e))?;
        self.retire_completed();
        Ok(())
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for VulkanDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanDevice")
            .field("name", &self.name)
            .field("queues", &self.queues.len())
            .field("lost", &self.is_lost())
            .finish()
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                log::warn!("Vulkan: device not idle at teardown: {:?}", e);
            }

            for entry in std::mem::take(&mut *self.in_flight.lock()) {
                self.release(entry);
            }
            for (_, fence) in self.fences.lock().drain() {
                self.device.destroy_fence(fence, None);
            }
            for (_, semaphore) in self.semaphores.lock().drain() {
                self.device.destroy_semaphore(semaphore, None);
            }

            // Memory goes back to the allocator before the allocator drops.
            {
                let mut allocator = self.allocator.lock();
                let mut resources = self.resources.lock();
                for (_, buffer) in resources.buffers.drain() {
                    buffer.destroy(&self.device, allocator.as_mut());
                }
                for (_, image) in resources.images.drain() {
                    image.destroy(&self.device, allocator.as_mut());
                }
                for resource in self.deferred.lock().take_all() {
                    resource.destroy(&self.device, allocator.as_mut());
                }
                allocator.take();
            }

            self.bindings.lock().destroy(&self.device);
            for pool in self.command_pools.values() {
                self.device.destroy_command_pool(*pool.lock(), None);
            }
            self.device.destroy_device(None);
        }
    }
}

static_assertions::assert_impl_all!(VulkanDevice: Send, Sync);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_vk_error() {
        assert_eq!(
            map_vk_error(vk::Result::ERROR_DEVICE_LOST),
            GraphicsError::DeviceLost
        );
        assert_eq!(
            map_vk_error(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY),
            GraphicsError::OutOfMemory
        );
        assert!(matches!(
            map_vk_error(vk::Result::ERROR_INITIALIZATION_FAILED),
            GraphicsError::Internal(_)
        ));
    }

    #[test]
    fn test_timeout_nanos_saturates() {
        assert_eq!(timeout_nanos(Duration::from_millis(2)), 2_000_000);
        assert_eq!(timeout_nanos(Duration::MAX), u64::MAX);
    }
}
