//! Dummy GPU backend for testing and development.
//!
//! This backend doesn't talk to GPU hardware. Buffers and images live in host
//! memory and submitted command lists are interpreted in software, so the
//! whole upload, render and readback path can be tested on any machine:
//!
//! - `Draw` shades every texel of the current view region with a flat color
//!   computed from the bound material and light buffers, and records what it
//!   read in a [`DrawRecord`].
//! - `CopyBuffer` and `CopyImageToBuffer` move real bytes.
//! - Timeline semaphores and fences are counters; a submission runs once all
//!   of its waits are satisfied.
//!
//! Tests can hold completions back, inject submit errors, and simulate a lost
//! device.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use bytemuck::Pod;
use parking_lot::{Condvar, Mutex};

use crate::command::{Command, ImageCopy, Submission};
use crate::device::DeviceCapabilities;
use crate::error::GraphicsError;
use crate::instance::{AdapterInfo, AdapterType};
use crate::queue::{QueueAddress, QueueCapabilities, QueueFamilyInfo, QueueFamilyRequest};
use crate::types::{
    ATLAS_BYTES_PER_TEXEL, BufferDescriptor, BufferUsage, DrawCommand, ImageDescriptor,
    LightProperties, MaterialProperties, Region, RenderPushConstant, ViewInfo,
};

use super::{BufferId, FenceId, GpuBackend, GpuDevice, HandleAllocator, ImageId, SemaphoreId};

const ADAPTER_NAME: &str = "Dummy Adapter";

/// Dummy GPU backend.
#[derive(Debug, Clone)]
pub struct DummyBackend {
    families: Vec<QueueFamilyInfo>,
}

impl DummyBackend {
    /// Create a dummy backend shaped like a typical discrete GPU: one
    /// universal family, one transfer-only family, one async compute family.
    pub fn new() -> Self {
        Self::with_queue_families(vec![
            QueueFamilyInfo::new(0, QueueCapabilities::all(), 16),
            QueueFamilyInfo::new(1, QueueCapabilities::TRANSFER, 2),
            QueueFamilyInfo::new(
                2,
                QueueCapabilities::COMPUTE | QueueCapabilities::TRANSFER,
                8,
            ),
        ])
    }

    /// Create a dummy backend reporting the given queue families.
    pub fn with_queue_families(families: Vec<QueueFamilyInfo>) -> Self {
        Self { families }
    }
}

impl Default for DummyBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuBackend for DummyBackend {
    fn name(&self) -> &'static str {
        "Dummy"
    }

    fn enumerate_adapters(&self) -> Vec<AdapterInfo> {
        vec![AdapterInfo {
            name: ADAPTER_NAME.to_string(),
            vendor: "Vista".to_string(),
            device_type: AdapterType::Software,
        }]
    }

    fn queue_families(&self, adapter: usize) -> Result<Vec<QueueFamilyInfo>, GraphicsError> {
        if adapter != 0 {
            return Err(GraphicsError::InvalidParameter(format!(
                "adapter index {adapter} out of range (1)"
            )));
        }
        Ok(self.families.clone())
    }

    fn create_device(
        &self,
        adapter: usize,
        requests: &[QueueFamilyRequest],
    ) -> Result<Arc<dyn GpuDevice>, GraphicsError> {
        let families = self.queue_families(adapter)?;
        let mut queues = Vec::new();
        for request in requests {
            let family = families
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
            queues.extend((0..request.priorities.len() as u32).map(|queue_index| {
                QueueAddress {
                    family_index: family.index,
                    queue_index,
                }
            }));
        }

        log::trace!("DummyBackend: creating device with {} queue(s)", queues.len());
        Ok(Arc::new(DummyDevice::new(queues)))
    }
}

/// What a software-interpreted draw read from the bound buffers.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawRecord {
    /// Queue the draw executed on.
    pub queue: QueueAddress,
    /// Push constant value of the draw.
    pub batch_idx: u32,
    /// View info read from the view buffer at `batch_idx`.
    pub view: ViewInfo,
    pub material_index: u32,
    /// Material read from the material buffer.
    pub material: MaterialProperties,
    /// Lights `0..light_count` read from the light buffer.
    pub lights: Vec<LightProperties>,
    /// Atlas region the draw covered.
    pub region: Region,
}

/// Summary of an executed submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmissionRecord {
    pub queue: QueueAddress,
    pub label: String,
    pub command_count: usize,
}

struct DummyBuffer {
    usage: BufferUsage,
    data: Vec<u8>,
}

struct DummyImage {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

struct Bindings {
    views: BufferId,
    materials: BufferId,
    lights: BufferId,
    light_count: u32,
}

#[derive(Default)]
struct DummyState {
    buffers: HashMap<BufferId, DummyBuffer>,
    images: HashMap<ImageId, DummyImage>,
    fences: HashMap<FenceId, bool>,
    semaphores: HashMap<SemaphoreId, u64>,
    pending: VecDeque<(QueueAddress, Submission)>,
    draws: Vec<DrawRecord>,
    executed: Vec<SubmissionRecord>,
    dispatches: u64,
    injected_error: Option<GraphicsError>,
}

/// Dummy logical device.
pub struct DummyDevice {
    ids: HandleAllocator,
    queues: Vec<QueueAddress>,
    state: Mutex<DummyState>,
    completed: Condvar,
    lost: AtomicBool,
    hold_completions: AtomicBool,
}

impl DummyDevice {
    fn new(queues: Vec<QueueAddress>) -> Self {
        Self {
            ids: HandleAllocator::default(),
            queues,
            state: Mutex::new(DummyState::default()),
            completed: Condvar::new(),
            lost: AtomicBool::new(false),
            hold_completions: AtomicBool::new(false),
        }
    }

    /// Queues the device was created with.
    pub fn queues(&self) -> &[QueueAddress] {
        &self.queues
    }

    /// Keep submitted work pending instead of executing it on submit.
    ///
    /// Turning holding off executes everything that is ready.
    pub fn set_hold_completions(&self, hold: bool) {
        self.hold_completions.store(hold, Ordering::Release);
        if !hold {
            self.release_completions();
        }
    }

    /// Execute all pending submissions whose waits are satisfied.
    pub fn release_completions(&self) {
        let mut state = self.state.lock();
        if !self.lost.load(Ordering::Acquire) {
            Self::drain(&mut state);
        }
        self.completed.notify_all();
    }

    /// Number of submissions waiting to execute.
    pub fn pending_submissions(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Lose the device: pending work is dropped and every later GPU operation
    /// fails with [`GraphicsError::DeviceLost`].
    pub fn simulate_device_loss(&self) {
        log::error!("DummyDevice: simulating device loss");
        let mut state = self.state.lock();
        self.lost.store(true, Ordering::Release);
        state.pending.clear();
        self.completed.notify_all();
    }

    /// Make the next `submit` fail with `error` without executing anything.
    pub fn inject_submit_error(&self, error: GraphicsError) {
        self.state.lock().injected_error = Some(error);
    }

    /// Draws executed so far.
    pub fn draw_records(&self) -> Vec<DrawRecord> {
        self.state.lock().draws.clone()
    }

    /// Take and clear the executed draws.
    pub fn take_draw_records(&self) -> Vec<DrawRecord> {
        std::mem::take(&mut self.state.lock().draws)
    }

    /// Submissions executed so far, in execution order.
    pub fn executed_submissions(&self) -> Vec<SubmissionRecord> {
        self.state.lock().executed.clone()
    }

    /// Number of compute dispatches executed.
    pub fn dispatch_count(&self) -> u64 {
        self.state.lock().dispatches
    }

    /// Number of live buffers.
    pub fn buffer_count(&self) -> usize {
        self.state.lock().buffers.len()
    }

    /// Number of live images.
    pub fn image_count(&self) -> usize {
        self.state.lock().images.len()
    }

    fn check_lost(&self) -> Result<(), GraphicsError> {
        if self.lost.load(Ordering::Acquire) {
            Err(GraphicsError::DeviceLost)
        } else {
            Ok(())
        }
    }

    /// Block on the completion condvar until `ready` holds or `timeout` elapses.
    fn wait_until(
        &self,
        timeout: Duration,
        mut ready: impl FnMut(&DummyState) -> Result<bool, GraphicsError>,
    ) -> Result<bool, GraphicsError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        loop {
            if ready(&*state)? {
                return Ok(true);
            }
            self.check_lost()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            self.completed.wait_for(&mut state, deadline - now);
        }
    }

    fn drain(state: &mut DummyState) {
        loop {
            let ready = state.pending.iter().position(|(_, submission)| {
                submission.wait.iter().all(|op| {
                    state.semaphores.get(&op.semaphore).copied().unwrap_or(0) >= op.value
                })
            });
            let Some((queue, submission)) = ready.and_then(|i| state.pending.remove(i)) else {
                break;
            };

            Self::execute(state, queue, &submission);

            for op in &submission.signal {
                let value = state.semaphores.entry(op.semaphore).or_insert(0);
                *value = (*value).max(op.value);
            }
            if let Some(fence) = submission.fence {
                state.fences.insert(fence, true);
            }
            state.executed.push(SubmissionRecord {
                queue,
                label: submission.label.clone(),
                command_count: submission.commands.len(),
            });
        }
    }

    fn execute(state: &mut DummyState, queue: QueueAddress, submission: &Submission) {
        log::trace!(
            "DummyDevice: executing '{}' ({} commands)",
            submission.label,
            submission.commands.len()
        );

        let mut bindings: Option<Bindings> = None;
        let mut target: Option<(ImageId, Region)> = None;
        let mut push = RenderPushConstant::default();

        for command in &submission.commands {
            match command {
                Command::CopyBuffer {
                    src,
                    src_offset,
                    dst,
                    dst_offset,
                    size,
                } => {
                    let bytes = read_bytes(state, *src, *src_offset, *size);
                    match bytes {
                        Some(bytes) => write_bytes(state, *dst, *dst_offset, &bytes),
                        None => log::error!("DummyDevice: copy source {:?} out of range", src),
                    }
                }
                Command::BindResources {
                    views,
                    materials,
                    lights,
                    light_count,
                } => {
                    bindings = Some(Bindings {
                        views: *views,
                        materials: *materials,
                        lights: *lights,
                        light_count: *light_count,
                    });
                }
                Command::ClearImage { image, color } => {
                    if let Some(image) = state.images.get_mut(image) {
                        let texel = to_rgba8(*color);
                        for chunk in image.pixels.chunks_exact_mut(ATLAS_BYTES_PER_TEXEL as usize)
                        {
                            chunk.copy_from_slice(&texel);
                        }
                    }
                }
                Command::BeginView { image, region } => target = Some((*image, *region)),
                Command::PushConstants(value) => push = *value,
                Command::Draw(draw) => match (&bindings, target) {
                    (Some(bindings), Some((image, region))) => {
                        Self::shade(state, queue, bindings, image, region, push, draw);
                    }
                    _ => log::warn!("DummyDevice: draw without bound resources or view"),
                },
                Command::EndView => target = None,
                Command::PrepareReadback { .. } => {}
                Command::Dispatch { x, y, z } => {
                    log::trace!("DummyDevice: dispatch {}x{}x{}", x, y, z);
                    state.dispatches += 1;
                }
                Command::CopyImageToBuffer {
                    image,
                    buffer,
                    regions,
                } => {
                    for copy in regions {
                        if let Some(bytes) = read_region(state, *image, copy) {
                            write_bytes(state, *buffer, copy.buffer_offset, &bytes);
                        }
                    }
                }
            }
        }
    }

    fn shade(
        state: &mut DummyState,
        queue: QueueAddress,
        bindings: &Bindings,
        image: ImageId,
        region: Region,
        push: RenderPushConstant,
        draw: &DrawCommand,
    ) {
        if draw.is_empty() {
            return;
        }

        let view = read_pod::<ViewInfo>(
            state,
            bindings.views,
            push.batch_idx as u64 * ViewInfo::SIZE,
        );
        let material = read_pod::<MaterialProperties>(
            state,
            bindings.materials,
            draw.material_index as u64 * MaterialProperties::SIZE,
        );
        let lights: Option<Vec<LightProperties>> = (0..bindings.light_count)
            .map(|i| read_pod(state, bindings.lights, i as u64 * LightProperties::SIZE))
            .collect();
        let (Some(view), Some(material), Some(lights)) = (view, material, lights) else {
            log::error!(
                "DummyDevice: draw read outside bound buffers (batch_idx {}, material {})",
                push.batch_idx,
                draw.material_index
            );
            return;
        };

        let mut irradiance = [0.0f32; 3];
        for light in &lights {
            for (sum, c) in irradiance.iter_mut().zip(&light.color) {
                *sum += c;
            }
        }
        let mut color = material.base_color;
        for (i, c) in color.iter_mut().take(3).enumerate() {
            *c = *c * irradiance[i] + material.emissive[i];
        }
        let texel = to_rgba8(color);

        if let Some(image) = state.images.get_mut(&image) {
            let right = (region.x + region.width).min(image.width);
            let bottom = (region.y + region.height).min(image.height);
            for y in region.y..bottom {
                for x in region.x..right {
                    let at = ((y * image.width + x) * ATLAS_BYTES_PER_TEXEL) as usize;
                    image.pixels[at..at + texel.len()].copy_from_slice(&texel);
                }
            }
        }

        state.draws.push(DrawRecord {
            queue,
            batch_idx: push.batch_idx,
            view,
            material_index: draw.material_index,
            material,
            lights,
            region,
        });
    }
}

fn to_rgba8(color: [f32; 4]) -> [u8; 4] {
    color.map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8)
}

fn read_bytes(state: &DummyState, buffer: BufferId, offset: u64, size: u64) -> Option<Vec<u8>> {
    let data = &state.buffers.get(&buffer)?.data;
    let end = offset.checked_add(size)?;
    data.get(offset as usize..end as usize).map(<[u8]>::to_vec)
}

fn write_bytes(state: &mut DummyState, buffer: BufferId, offset: u64, bytes: &[u8]) {
    let Some(target) = state.buffers.get_mut(&buffer) else {
        log::error!("DummyDevice: write to unknown buffer {:?}", buffer);
        return;
    };
    let start = offset as usize;
    match target.data.get_mut(start..start + bytes.len()) {
        Some(dst) => dst.copy_from_slice(bytes),
        None => log::error!(
            "DummyDevice: write of {} bytes at {} overflows buffer {:?}",
            bytes.len(),
            offset,
            buffer
        ),
    }
}

fn read_pod<T: Pod>(state: &DummyState, buffer: BufferId, offset: u64) -> Option<T> {
    let bytes = read_bytes(state, buffer, offset, std::mem::size_of::<T>() as u64)?;
    Some(bytemuck::pod_read_unaligned(&bytes))
}

fn read_region(state: &DummyState, image: ImageId, copy: &ImageCopy) -> Option<Vec<u8>> {
    let image = state.images.get(&image)?;
    let region = copy.region;
    if region.x + region.width > image.width || region.y + region.height > image.height {
        log::error!("DummyDevice: readback region {:?} outside image", region);
        return None;
    }
    let texel = ATLAS_BYTES_PER_TEXEL as usize;
    let row_bytes = region.width as usize * texel;
    let mut out = Vec::with_capacity(region.byte_size() as usize);
    for y in region.y..region.y + region.height {
        let start = (y as usize * image.width as usize + region.x as usize) * texel;
        out.extend_from_slice(&image.pixels[start..start + row_bytes]);
    }
    Some(out)
}

impl GpuDevice for DummyDevice {
    fn name(&self) -> &str {
        ADAPTER_NAME
    }

    fn capabilities(&self) -> DeviceCapabilities {
        DeviceCapabilities::default()
    }

    fn create_buffer(&self, descriptor: &BufferDescriptor) -> Result<BufferId, GraphicsError> {
        self.check_lost()?;
        let id = BufferId::new(self.ids.next());
        log::trace!(
            "DummyDevice: creating buffer {:?} (size: {})",
            descriptor.label,
            descriptor.size
        );
        self.state.lock().buffers.insert(
            id,
            DummyBuffer {
                usage: descriptor.usage,
                data: vec![0; descriptor.size as usize],
            },
        );
        Ok(id)
    }

    fn destroy_buffer(&self, buffer: BufferId) {
        self.state.lock().buffers.remove(&buffer);
    }

    fn create_image(&self, descriptor: &ImageDescriptor) -> Result<ImageId, GraphicsError> {
        self.check_lost()?;
        let id = ImageId::new(self.ids.next());
        log::trace!(
            "DummyDevice: creating image {:?} ({}x{})",
            descriptor.label,
            descriptor.width,
            descriptor.height
        );
        self.state.lock().images.insert(
            id,
            DummyImage {
                width: descriptor.width,
                height: descriptor.height,
                pixels: vec![0; descriptor.byte_size() as usize],
            },
        );
        Ok(id)
    }

    fn destroy_image(&self, image: ImageId) {
        self.state.lock().images.remove(&image);
    }

    fn write_buffer(
        &self,
        buffer: BufferId,
        offset: u64,
        data: &[u8],
    ) -> Result<(), GraphicsError> {
        let mut state = self.state.lock();
        let target = state.buffers.get_mut(&buffer).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown buffer {}", buffer.raw()))
        })?;
        if !target.usage.contains(BufferUsage::MAP_WRITE) {
            return Err(GraphicsError::InvalidParameter(
                "buffer is not host-writable".to_string(),
            ));
        }
        let start = offset as usize;
        let dst = target
            .data
            .get_mut(start..start + data.len())
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!(
                    "write of {} bytes at offset {} exceeds buffer size",
                    data.len(),
                    offset
                ))
            })?;
        dst.copy_from_slice(data);
        Ok(())
    }

    fn read_buffer(
        &self,
        buffer: BufferId,
        offset: u64,
        size: u64,
    ) -> Result<Vec<u8>, GraphicsError> {
        let state = self.state.lock();
        let source = state.buffers.get(&buffer).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!("unknown buffer {}", buffer.raw()))
        })?;
        if !source.usage.contains(BufferUsage::MAP_READ) {
            return Err(GraphicsError::InvalidParameter(
                "buffer is not host-readable".to_string(),
            ));
        }
        read_bytes(&state, buffer, offset, size).ok_or_else(|| {
            GraphicsError::InvalidParameter(format!(
                "read of {size} bytes at offset {offset} exceeds buffer size"
            ))
        })
    }

    fn create_fence(&self) -> Result<FenceId, GraphicsError> {
        self.check_lost()?;
        let id = FenceId::new(self.ids.next());
        self.state.lock().fences.insert(id, false);
        Ok(id)
    }

    fn destroy_fence(&self, fence: FenceId) {
        self.state.lock().fences.remove(&fence);
    }

    fn fence_status(&self, fence: FenceId) -> Result<bool, GraphicsError> {
        let state = self.state.lock();
        match state.fences.get(&fence) {
            Some(true) => Ok(true),
            Some(false) => self.check_lost().map(|_| false),
            None => Err(GraphicsError::InvalidParameter(format!(
                "unknown fence {}",
                fence.raw()
            ))),
        }
    }

    fn wait_fence(&self, fence: FenceId, timeout: Duration) -> Result<bool, GraphicsError> {
        self.wait_until(timeout, |state| match state.fences.get(&fence) {
            Some(signaled) => Ok(*signaled),
            None => Err(GraphicsError::InvalidParameter(format!(
                "unknown fence {}",
                fence.raw()
            ))),
        })
    }

    fn create_timeline_semaphore(&self, initial_value: u64) -> Result<SemaphoreId, GraphicsError> {
        self.check_lost()?;
        let id = SemaphoreId::new(self.ids.next());
        self.state.lock().semaphores.insert(id, initial_value);
        Ok(id)
    }

    fn destroy_semaphore(&self, semaphore: SemaphoreId) {
        self.state.lock().semaphores.remove(&semaphore);
    }

    fn semaphore_value(&self, semaphore: SemaphoreId) -> Result<u64, GraphicsError> {
        self.check_lost()?;
        self.state
            .lock()
            .semaphores
            .get(&semaphore)
            .copied()
            .ok_or_else(|| {
                GraphicsError::InvalidParameter(format!("unknown semaphore {}", semaphore.raw()))
            })
    }

    fn wait_semaphore(
        &self,
        semaphore: SemaphoreId,
        value: u64,
        timeout: Duration,
    ) -> Result<bool, GraphicsError> {
        self.wait_until(timeout, |state| match state.semaphores.get(&semaphore) {
            Some(current) => Ok(*current >= value),
            None => Err(GraphicsError::InvalidParameter(format!(
                "unknown semaphore {}",
                semaphore.raw()
            ))),
        })
    }

    fn submit(&self, queue: QueueAddress, submission: &Submission) -> Result<(), GraphicsError> {
        self.check_lost()?;
        if !self.queues.contains(&queue) {
            return Err(GraphicsError::InvalidParameter(format!(
                "queue {}:{} was not created on this device",
                queue.family_index, queue.queue_index
            )));
        }

        let mut state = self.state.lock();
        if let Some(error) = state.injected_error.take() {
            log::warn!("DummyDevice: failing submission '{}'", submission.label);
            return Err(error);
        }

        state.pending.push_back((queue, submission.clone()));
        if !self.hold_completions.load(Ordering::Acquire) {
            Self::drain(&mut state);
            self.completed.notify_all();
        }
        Ok(())
    }

    fn wait_idle(&self) -> Result<(), GraphicsError> {
        self.check_lost()?;
        let mut state = self.state.lock();
        if !self.hold_completions.load(Ordering::Acquire) {
            Self::drain(&mut state);
        }
        Ok(())
    }

    fn is_lost(&self) -> bool {
        self.lost.load(Ordering::Acquire)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl std::fmt::Debug for DummyDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DummyDevice")
            .field("queues", &self.queues)
            .field("lost", &self.is_lost())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ImageFormat, ImageUsage};

    fn device() -> Arc<dyn GpuDevice> {
        let backend = DummyBackend::new();
        let requests = vec![QueueFamilyRequest {
            family_index: 0,
            priorities: vec![1.0],
        }];
        backend.create_device(0, &requests).unwrap()
    }

    fn dummy(device: &Arc<dyn GpuDevice>) -> &DummyDevice {
        device.as_any().downcast_ref::<DummyDevice>().unwrap()
    }

    const QUEUE: QueueAddress = QueueAddress {
        family_index: 0,
        queue_index: 0,
    };

    #[test]
    fn test_backend_reports_families() {
        let backend = DummyBackend::new();
        let families = backend.queue_families(0).unwrap();
        assert_eq!(families.len(), 3);
        assert!(backend.queue_families(1).is_err());
    }

    #[test]
    fn test_create_device_rejects_too_many_queues() {
        let backend = DummyBackend::new();
        let requests = vec![QueueFamilyRequest {
            family_index: 1,
            priorities: vec![1.0; 3],
        }];
        assert!(matches!(
            backend.create_device(0, &requests),
            Err(GraphicsError::DeviceInit(_))
        ));
    }

    #[test]
    fn test_buffer_host_access_respects_usage() {
        let device = device();
        let staging = device.create_buffer(&BufferDescriptor::staging(16)).unwrap();
        device.write_buffer(staging, 4, &[1, 2, 3, 4]).unwrap();
        assert!(device.read_buffer(staging, 0, 4).is_err());
        assert!(device.write_buffer(staging, 14, &[0; 4]).is_err());

        let storage = device.create_buffer(&BufferDescriptor::storage(16)).unwrap();
        assert!(device.write_buffer(storage, 0, &[0]).is_err());
    }

    #[test]
    fn test_copy_and_fence() {
        let device = device();
        let src = device.create_buffer(&BufferDescriptor::staging(8)).unwrap();
        let dst = device.create_buffer(&BufferDescriptor::readback(8)).unwrap();
        let fence = device.create_fence().unwrap();
        device.write_buffer(src, 0, &[9; 8]).unwrap();

        let mut submission = Submission::new("copy").with_fence(fence);
        submission.push(Command::CopyBuffer {
            src,
            src_offset: 2,
            dst,
            dst_offset: 0,
            size: 4,
        });
        device.submit(QUEUE, &submission).unwrap();

        assert!(device.fence_status(fence).unwrap());
        assert_eq!(device.read_buffer(dst, 0, 8).unwrap(), vec![9, 9, 9, 9, 0, 0, 0, 0]);
    }

    #[test]
    fn test_submission_waits_for_semaphore() {
        let device = device();
        let sem = device.create_timeline_semaphore(0).unwrap();
        let fence = device.create_fence().unwrap();

        device
            .submit(QUEUE, &Submission::new("second").wait_for(sem, 1).with_fence(fence))
            .unwrap();
        assert!(!device.fence_status(fence).unwrap());
        assert_eq!(dummy(&device).pending_submissions(), 1);

        device.submit(QUEUE, &Submission::new("first").signal(sem, 1)).unwrap();
        assert!(device.fence_status(fence).unwrap());
        assert_eq!(device.semaphore_value(sem).unwrap(), 1);

        let labels: Vec<_> = dummy(&device)
            .executed_submissions()
            .into_iter()
            .map(|r| r.label)
            .collect();
        assert_eq!(labels, vec!["first", "second"]);
    }

    #[test]
    fn test_held_completions_time_out() {
        let device = device();
        let fence = device.create_fence().unwrap();
        dummy(&device).set_hold_completions(true);
        device.submit(QUEUE, &Submission::new("held").with_fence(fence)).unwrap();

        assert!(!device.wait_fence(fence, Duration::from_millis(10)).unwrap());
        dummy(&device).set_hold_completions(false);
        assert!(device.wait_fence(fence, Duration::from_millis(10)).unwrap());
    }

    #[test]
    fn test_draw_shades_region() {
        let device = device();
        let views = device.create_buffer(&BufferDescriptor::staging(256)).unwrap();
        let materials = device.create_buffer(&BufferDescriptor::staging(48)).unwrap();
        let lights = device.create_buffer(&BufferDescriptor::staging(64)).unwrap();
        let image = device
            .create_image(&ImageDescriptor::new_2d(
                4,
                2,
                ImageFormat::Rgba8Unorm,
                ImageUsage::RENDER_ATTACHMENT | ImageUsage::COPY_SRC,
            ))
            .unwrap();
        let readback = device.create_buffer(&BufferDescriptor::readback(16)).unwrap();

        let material = MaterialProperties::new([1.0, 0.5, 0.0, 1.0]);
        let light = LightProperties {
            position: [0.0; 4],
            color: [0.5, 0.5, 0.5, 1.0],
        };
        device
            .write_buffer(materials, 0, bytemuck::bytes_of(&material))
            .unwrap();
        device.write_buffer(lights, 0, bytemuck::bytes_of(&light)).unwrap();
        device.write_buffer(lights, 32, bytemuck::bytes_of(&light)).unwrap();

        let region = Region {
            x: 2,
            y: 0,
            width: 2,
            height: 2,
        };
        let mut submission = Submission::new("draw");
        submission.push(Command::BindResources {
            views,
            materials,
            lights,
            light_count: 2,
        });
        submission.push(Command::ClearImage {
            image,
            color: [0.0; 4],
        });
        submission.push(Command::BeginView { image, region });
        submission.push(Command::PushConstants(RenderPushConstant { batch_idx: 1 }));
        submission.push(Command::Draw(DrawCommand::new(3, 0)));
        submission.push(Command::EndView);
        submission.push(Command::CopyImageToBuffer {
            image,
            buffer: readback,
            regions: vec![ImageCopy {
                region,
                buffer_offset: 0,
            }],
        });
        device.submit(QUEUE, &submission).unwrap();

        let records = dummy(&device).draw_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].batch_idx, 1);
        assert_eq!(records[0].material, material);
        assert_eq!(records[0].lights, vec![light, light]);

        let pixels = device.read_buffer(readback, 0, 16).unwrap();
        assert_eq!(&pixels[0..4], &[255, 128, 0, 255]);
        assert_eq!(&pixels[12..16], &[255, 128, 0, 255]);
    }

    #[test]
    fn test_device_loss() {
        let device = device();
        let done = device.create_fence().unwrap();
        let held = device.create_fence().unwrap();
        device.submit(QUEUE, &Submission::new("done").with_fence(done)).unwrap();

        dummy(&device).set_hold_completions(true);
        device.submit(QUEUE, &Submission::new("held").with_fence(held)).unwrap();
        dummy(&device).simulate_device_loss();

        assert!(device.is_lost());
        assert_eq!(dummy(&device).pending_submissions(), 0);
        assert!(device.fence_status(done).unwrap());
        assert_eq!(
            device.wait_fence(held, Duration::from_millis(10)),
            Err(GraphicsError::DeviceLost)
        );
        assert_eq!(
            device.submit(QUEUE, &Submission::new("late")),
            Err(GraphicsError::DeviceLost)
        );
    }

    #[test]
    fn test_injected_submit_error_is_one_shot() {
        let device = device();
        dummy(&device).inject_submit_error(GraphicsError::OutOfMemory);
        assert_eq!(
            device.submit(QUEUE, &Submission::new("a")),
            Err(GraphicsError::OutOfMemory)
        );
        assert!(device.submit(QUEUE, &Submission::new("b")).is_ok());
    }
}
