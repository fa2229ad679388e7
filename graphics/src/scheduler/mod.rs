//! Batch submission across the transfer, graphics and compute queues.
//!
//! Every batch becomes three submissions chained by timeline semaphores:
//!
//! | Queue | Work | Waits | Signals |
//! |-------|------|-------|---------|
//! | Transfer | pool and view uploads from the staging ring | graphics `g - 1` (only with pool uploads) | transfer `t` |
//! | Graphics | clear, then per view push constant + draws | transfer `t` | graphics `g` |
//! | Compute | optional dispatch, atlas copy to readback | graphics `g` | batch fence |
//!
//! Both timelines only advance when a submission is accepted, so a failed
//! batch never leaves a later batch waiting on a value that will not come.
//!
//! # Module Contents
//!
//! - [`SubmissionPipeliner`] - Owns the in-flight slots and drives submissions
//! - [`BatchFuture`] - Handle to a submitted batch
//! - [`RenderedView`] - Pixels of one view
//! - [`Fence`], [`TimelineSemaphore`] - Synchronization primitives

mod future;
mod sync;

pub use future::{BatchFuture, RenderedView};
pub use sync::{Fence, FenceStatus, TimelineSemaphore};

pub(crate) use future::BatchShared;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::backend::BufferId;
use crate::batch::{BatchId, BatchState, SlotTable};
use crate::binder::{PoolUpload, ResourceBinder};
use crate::command::{Command, ImageCopy, Submission};
use crate::config::RendererConfig;
use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::push_constant::PushConstantIndexer;
use crate::queue::QueueKind;
use crate::resources::StagingRing;
use crate::types::{AtlasLayout, DrawCommand, ViewInfo};

/// Counters of the pipeliner's work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Batches accepted by the device.
    pub batches_submitted: u64,
    /// Batches whose readback completed.
    pub batches_completed: u64,
    /// Batches that failed before or after submission.
    pub batches_failed: u64,
    /// Views of completed batches.
    pub views_rendered: u64,
    /// Bytes copied through the staging ring.
    pub bytes_uploaded: u64,
}

impl PipelineStats {
    /// Add the counters of `other`.
    pub fn merge(&mut self, other: &PipelineStats) {
        self.batches_submitted += other.batches_submitted;
        self.batches_completed += other.batches_completed;
        self.batches_failed += other.batches_failed;
        self.views_rendered += other.views_rendered;
        self.bytes_uploaded += other.bytes_uploaded;
    }
}

/// One upload from host memory into a device buffer.
struct UploadPiece<'a> {
    bytes: &'a [u8],
    dst: BufferId,
    dst_offset: u64,
}

/// Drives batches through the queues.
///
/// Up to `max_batches_in_flight` batches are on the device at once, each in
/// its own [`SlotTable`] slot. Submitting a batch when every slot is busy
/// first reclaims settled batches and then blocks on the oldest one.
pub struct SubmissionPipeliner {
    device: Arc<GraphicsDevice>,
    layout: AtlasLayout,
    indexer: PushConstantIndexer,
    slots: SlotTable,
    staging: StagingRing,
    transfer_timeline: TimelineSemaphore,
    graphics_timeline: TimelineSemaphore,
    /// Last transfer timeline value handed to the device.
    transfer_value: u64,
    /// Last graphics timeline value handed to the device.
    graphics_value: u64,
    in_flight: HashMap<u32, Arc<BatchShared>>,
    clear_color: [f32; 4],
    compute_dispatch: Option<[u32; 3]>,
    timeout: Duration,
    stats: PipelineStats,
}

impl SubmissionPipeliner {
    /// Allocate slots, the staging ring and both timelines on `device`.
    ///
    /// # Errors
    ///
    /// Returns an error if resource creation fails.
    pub fn new(
        device: Arc<GraphicsDevice>,
        config: &RendererConfig,
    ) -> Result<Self, GraphicsError> {
        let layout = config.atlas_layout();
        let slots = SlotTable::new(&device, layout, config.max_batches_in_flight)?;
        let staging = StagingRing::new(&device, config.staging_size)?;
        let transfer_timeline = device.create_timeline_semaphore(0)?;
        let graphics_timeline = device.create_timeline_semaphore(0)?;

        log::info!(
            "SubmissionPipeliner: {} slot(s) of {} view(s), staging {} bytes",
            config.max_batches_in_flight,
            config.images_per_fb,
            config.staging_size
        );

        Ok(Self {
            device,
            layout,
            indexer: PushConstantIndexer::new(config.images_per_fb),
            slots,
            staging,
            transfer_timeline,
            graphics_timeline,
            transfer_value: 0,
            graphics_value: 0,
            in_flight: HashMap::new(),
            clear_color: config.clear_color,
            compute_dispatch: config.compute_dispatch,
            timeout: config.retrieval_timeout(),
            stats: PipelineStats::default(),
        })
    }

    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn layout(&self) -> &AtlasLayout {
        &self.layout
    }

    pub fn indexer(&self) -> &PushConstantIndexer {
        &self.indexer
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    /// Number of batches occupying a slot.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Last values handed to the device as `(transfer, graphics)`.
    pub fn timeline_values(&self) -> (u64, u64) {
        (self.transfer_value, self.graphics_value)
    }

    /// Submit `batch` with its `views`, uploading pending pool changes.
    ///
    /// `draws` are validated against the binder first; an invalid draw list
    /// fails the batch with the validation error. That and failures after a
    /// slot was acquired are delivered through the batch: it moves to
    /// `Failed` and this returns `Ok`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::RetrievalTimeout`] if no slot freed up in
    /// time. The batch stays `Closed` and can be submitted again.
    pub(crate) fn submit_batch(
        &mut self,
        batch: &Arc<BatchShared>,
        views: &[ViewInfo],
        binder: &mut ResourceBinder,
        draws: &[DrawCommand],
    ) -> Result<(), GraphicsError> {
        crate::profile_scope!("submit_batch");

        if let Err(e) = binder.validate_draws(draws) {
            batch.fail(e);
            self.stats.batches_failed += 1;
            return Ok(());
        }

        let slot = self.acquire_slot()?;
        match self.record_and_submit(slot, batch, views, binder, draws) {
            Ok(()) => {
                self.slots.occupy(slot, batch.id());
                self.in_flight.insert(slot, Arc::clone(batch));
                self.stats.batches_submitted += 1;
                log::debug!(
                    "Batch {}: submitted {} view(s) in slot {}",
                    batch.id(),
                    views.len(),
                    slot
                );
            }
            Err(e) => {
                batch.fail(e.into_submission(batch.id()));
                self.stats.batches_failed += 1;
            }
        }
        Ok(())
    }

    /// Free the slots of batches that completed or failed. Non-blocking.
    ///
    /// Returns the ids of the batches that settled.
    pub fn reclaim(&mut self) -> Vec<BatchId> {
        let mut settled: Vec<u32> = Vec::new();
        for (&slot, batch) in &self.in_flight {
            batch.poll();
            if batch.state().is_settled() {
                settled.push(slot);
            }
        }
        settled.sort_unstable();

        settled
            .into_iter()
            .filter_map(|slot| {
                let batch = self.in_flight.remove(&slot)?;
                self.slots.release(slot);
                match batch.state() {
                    BatchState::Failed => self.stats.batches_failed += 1,
                    _ => {
                        self.stats.batches_completed += 1;
                        self.stats.views_rendered += batch.view_count() as u64;
                    }
                }
                log::trace!("Batch {}: released slot {}", batch.id(), slot);
                Some(batch.id())
            })
            .collect()
    }

    /// Fail every batch still on the device with `failure` and free all slots.
    pub fn abandon(&mut self, failure: &GraphicsError) {
        for batch in self.in_flight.values() {
            batch.poll();
            batch.fail(failure.clone().into_submission(batch.id()));
        }
        self.reclaim();
    }

    fn acquire_slot(&mut self) -> Result<u32, GraphicsError> {
        loop {
            self.reclaim();
            if let Some(slot) = self.slots.acquire_free() {
                return Ok(slot);
            }

            let Some((slot, oldest)) = self.slots.oldest_in_flight() else {
                return Err(GraphicsError::Internal(
                    "no free slot and nothing in flight".to_string(),
                ));
            };
            let Some(batch) = self.in_flight.get(&slot).cloned() else {
                return Err(GraphicsError::Internal(format!(
                    "slot {slot} is occupied by untracked batch {oldest}"
                )));
            };

            log::trace!("SubmissionPipeliner: all slots busy, waiting on batch {oldest}");
            match batch.wait(self.timeout) {
                Ok(()) => {}
                Err(e @ GraphicsError::RetrievalTimeout { .. }) => return Err(e),
                // The batch failed; reclaiming frees its slot.
                Err(_) => {}
            }
        }
    }

    fn record_and_submit(
        &mut self,
        slot: u32,
        batch: &Arc<BatchShared>,
        views: &[ViewInfo],
        binder: &mut ResourceBinder,
        draws: &[DrawCommand],
    ) -> Result<(), GraphicsError> {
        let id = batch.id();
        let fence = self.device.create_fence()?;

        let uploads = binder.take_uploads();
        let mark = self.staging.mark();
        let transfer_value = match self.submit_transfer(id, slot, views, binder, &uploads) {
            Ok(value) => value,
            Err(e) => {
                self.staging.rewind(mark);
                if !uploads.is_empty() {
                    // Some pool ranges may never have reached the device.
                    binder.mark_all_dirty();
                }
                return Err(e);
            }
        };

        let graphics_value = self.graphics_value + 1;
        let graphics = self
            .record_graphics(id, slot, views.len() as u32, binder, draws)?
            .wait_for(self.transfer_timeline.id(), transfer_value)
            .signal(self.graphics_timeline.id(), graphics_value);
        self.device.submit(QueueKind::Graphics, &graphics)?;
        self.graphics_value = graphics_value;

        let readback = self
            .record_readback(id, slot, views.len() as u32)
            .wait_for(self.graphics_timeline.id(), graphics_value)
            .with_fence(fence.id());
        self.device.submit(QueueKind::Compute, &readback)?;

        batch.mark_submitted(fence, Arc::clone(self.slots.readback(slot)))
    }

    /// Upload dirty pool ranges and the batch's views. Returns the transfer
    /// timeline value the graphics submission has to wait for.
    fn submit_transfer(
        &mut self,
        id: BatchId,
        slot: u32,
        views: &[ViewInfo],
        binder: &ResourceBinder,
        uploads: &[PoolUpload],
    ) -> Result<u64, GraphicsError> {
        let completed = self.transfer_timeline.value()?;
        self.staging.retire(completed);

        // Pool buffers are shared by every slot; wait until earlier batches
        // stopped reading them.
        let hazard =
            (!uploads.is_empty() && self.graphics_value > 0).then_some(self.graphics_value);

        let mut pieces = Vec::with_capacity(uploads.len() + 1);
        for upload in uploads {
            pieces.push(UploadPiece {
                bytes: binder.upload_bytes(upload),
                dst: binder.upload_target(upload)?.id(),
                dst_offset: upload.byte_offset(),
            });
        }
        pieces.push(UploadPiece {
            bytes: bytemuck::cast_slice(views),
            dst: self.slots.view_buffer().id(),
            dst_offset: self.slots.view_offset(slot),
        });

        let label = format!("transfer {id}");
        let chunk_size = self.staging.capacity() as usize;
        let mut submission = Submission::new(label.clone());
        let mut uploaded = 0u64;

        for piece in &pieces {
            for (i, chunk) in piece.bytes.chunks(chunk_size).enumerate() {
                let size = chunk.len() as u64;
                let allocation = loop {
                    if let Some(allocation) = self.staging.allocate(size)? {
                        break allocation;
                    }
                    // Ring full: push out what we have and wait for space.
                    if !submission.commands.is_empty() {
                        let pending =
                            std::mem::replace(&mut submission, Submission::new(label.clone()));
                        self.flush_transfer(pending, hazard)?;
                    }
                    self.wait_for_staging(id)?;
                };

                self.staging.write(&allocation, chunk)?;
                submission.push(Command::CopyBuffer {
                    src: self.staging.buffer().id(),
                    src_offset: allocation.offset,
                    dst: piece.dst,
                    dst_offset: piece.dst_offset + (i * chunk_size) as u64,
                    size,
                });
                uploaded += size;
            }
        }

        self.flush_transfer(submission, hazard)?;
        self.stats.bytes_uploaded += uploaded;
        log::trace!("Batch {id}: uploaded {uploaded} byte(s)");
        Ok(self.transfer_value)
    }

    fn flush_transfer(
        &mut self,
        submission: Submission,
        hazard: Option<u64>,
    ) -> Result<(), GraphicsError> {
        let value = self.transfer_value + 1;
        let mut submission = submission.signal(self.transfer_timeline.id(), value);
        if let Some(graphics_value) = hazard {
            submission = submission.wait_for(self.graphics_timeline.id(), graphics_value);
        }
        self.device.submit(QueueKind::Transfer, &submission)?;
        self.transfer_value = value;
        self.staging.track(value);
        Ok(())
    }

    fn wait_for_staging(&mut self, id: BatchId) -> Result<(), GraphicsError> {
        let Some(value) = self.staging.oldest_pending() else {
            return Err(GraphicsError::Internal(format!(
                "batch {id}: staging ring exhausted with nothing in flight"
            )));
        };
        if !self.transfer_timeline.wait(value, self.timeout)? {
            return Err(GraphicsError::Internal(format!(
                "batch {id}: timed out waiting for staging space"
            )));
        }
        self.staging.retire(value);
        Ok(())
    }

    fn record_graphics(
        &self,
        id: BatchId,
        slot: u32,
        view_count: u32,
        binder: &ResourceBinder,
        draws: &[DrawCommand],
    ) -> Result<Submission, GraphicsError> {
        let image = self.slots.atlas(slot).id();
        let mut submission = Submission::new(format!("graphics {id}"));

        submission.push(Command::BindResources {
            views: self.slots.view_buffer().id(),
            materials: binder.material_buffer()?.id(),
            lights: binder.light_buffer()?.id(),
            light_count: binder.light_count(),
        });
        submission.push(Command::ClearImage {
            image,
            color: self.clear_color,
        });

        for view_slot in 0..view_count {
            submission.push(Command::BeginView {
                image,
                region: self.layout.region(view_slot),
            });
            let push = self.indexer.encode(slot, view_slot);
            for draw in draws.iter().filter(|d| !d.is_empty()) {
                submission.push(Command::PushConstants(push));
                submission.push(Command::Draw(*draw));
            }
            submission.push(Command::EndView);
        }

        submission.push(Command::PrepareReadback { image });
        Ok(submission)
    }

    fn record_readback(&self, id: BatchId, slot: u32, view_count: u32) -> Submission {
        let mut submission = Submission::new(format!("readback {id}"));
        if let Some([x, y, z]) = self.compute_dispatch {
            submission.push(Command::Dispatch { x, y, z });
        }
        submission.push(Command::CopyImageToBuffer {
            image: self.slots.atlas(slot).id(),
            buffer: self.slots.readback(slot).id(),
            regions: (0..view_count)
                .map(|view_slot| ImageCopy {
                    region: self.layout.region(view_slot),
                    buffer_offset: self.layout.readback_offset(view_slot),
                })
                .collect(),
        });
        submission
    }
}

impl std::fmt::Debug for SubmissionPipeliner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubmissionPipeliner")
            .field("slots", &self.slots)
            .field("staging", &self.staging)
            .field("transfer_value", &self.transfer_value)
            .field("graphics_value", &self.graphics_value)
            .field("in_flight", &self.in_flight.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::dummy::DummyDevice;
    use crate::batch::BatchAllocator;
    use crate::instance::{BackendType, GraphicsInstance, InstanceParameters};
    use crate::types::{LightProperties, MaterialProperties};
    use vista_core::math::Vec3;

    struct Fixture {
        pipeliner: SubmissionPipeliner,
        binder: ResourceBinder,
        allocator: BatchAllocator,
    }

    impl Fixture {
        fn new(config: RendererConfig) -> Self {
            let instance =
                GraphicsInstance::new(InstanceParameters::new().with_backend(BackendType::Dummy))
                    .unwrap();
            let device = instance.create_device(0, &config.queues).unwrap();
            let mut binder = ResourceBinder::new(config.max_materials, config.max_lights);
            binder.bind_device(&device).unwrap();
            binder
                .register_material(0, MaterialProperties::new([1.0, 0.5, 0.0, 1.0]))
                .unwrap();
            binder
                .register_light(0, LightProperties::new(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0)))
                .unwrap();
            Self {
                pipeliner: SubmissionPipeliner::new(device, &config).unwrap(),
                binder,
                allocator: BatchAllocator::new(config.images_per_fb),
            }
        }

        fn dummy(&self) -> &DummyDevice {
            self.pipeliner
                .device()
                .raw()
                .as_any()
                .downcast_ref::<DummyDevice>()
                .unwrap()
        }

        fn submit(&mut self, view_count: usize) -> Vec<Arc<BatchShared>> {
            self.allocator.allocate(&vec![ViewInfo::default(); view_count]);
            let draws = [DrawCommand::new(3, 0)];
            let layout = *self.pipeliner.layout();
            self.allocator
                .take_closed()
                .into_iter()
                .map(|closed| {
                    let shared = BatchShared::new(&closed, layout);
                    self.pipeliner
                        .submit_batch(&shared, &closed.views, &mut self.binder, &draws)
                        .unwrap();
                    shared
                })
                .collect()
        }
    }

    fn config() -> RendererConfig {
        RendererConfig::default()
            .with_backend(BackendType::Dummy)
            .with_images_per_fb(4)
            .with_view_extent(2, 2)
            .with_max_materials(8)
            .with_max_lights(8)
            .with_max_batches_in_flight(2)
            .with_retrieval_timeout(Duration::from_millis(50))
    }

    #[test]
    fn test_batch_completes() {
        let mut fixture = Fixture::new(config());
        let batches = fixture.submit(3);
        assert_eq!(batches.len(), 1);

        let batch = &batches[0];
        batch.wait(Duration::from_secs(1)).unwrap();
        let views = batch.take_results().unwrap();
        assert_eq!(views.len(), 3);
        assert_eq!(views[2].view_index, 2);
        assert_eq!(&views[0].pixels[..4], &[255, 128, 0, 255]);

        assert_eq!(fixture.pipeliner.reclaim(), vec![batch.id()]);
        let stats = fixture.pipeliner.stats();
        assert_eq!(stats.batches_submitted, 1);
        assert_eq!(stats.batches_completed, 1);
        assert_eq!(stats.views_rendered, 3);
    }

    #[test]
    fn test_push_constants_follow_slots() {
        let mut fixture = Fixture::new(config());
        // Hold completions so the second batch cannot reuse slot 0.
        fixture.dummy().set_hold_completions(true);
        fixture.submit(6);
        fixture.dummy().set_hold_completions(false);

        let records = fixture.dummy().draw_records();
        let indices: Vec<u32> = records.iter().map(|r| r.batch_idx).collect();
        assert_eq!(indices, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_timelines_advance_per_batch() {
        let mut fixture = Fixture::new(config());
        fixture.submit(12);
        assert_eq!(fixture.pipeliner.timeline_values(), (3, 3));
    }

    #[test]
    fn test_pool_uploads_happen_once() {
        let mut fixture = Fixture::new(config());
        fixture.submit(4);
        let first = fixture.pipeliner.stats().bytes_uploaded;
        fixture.submit(4);
        let second = fixture.pipeliner.stats().bytes_uploaded - first;

        let views = 4 * ViewInfo::SIZE;
        assert_eq!(first, views + MaterialProperties::SIZE + LightProperties::SIZE);
        assert_eq!(second, views);
    }

    #[test]
    fn test_full_slots_time_out() {
        let mut fixture = Fixture::new(config());
        fixture.dummy().set_hold_completions(true);
        fixture.submit(8);
        assert_eq!(fixture.pipeliner.in_flight_count(), 2);

        fixture.allocator.allocate(&[ViewInfo::default()]);
        let closed = fixture.allocator.take_closed().remove(0);
        let shared = BatchShared::new(&closed, *fixture.pipeliner.layout());
        let err = fixture
            .pipeliner
            .submit_batch(&shared, &closed.views, &mut fixture.binder, &[])
            .unwrap_err();
        assert!(matches!(err, GraphicsError::RetrievalTimeout { .. }));
        assert_eq!(shared.state(), BatchState::Closed);

        fixture.dummy().set_hold_completions(false);
        fixture
            .pipeliner
            .submit_batch(&shared, &closed.views, &mut fixture.binder, &[])
            .unwrap();
        assert_eq!(shared.state(), BatchState::Submitted);
    }

    #[test]
    fn test_submit_error_fails_batch() {
        let mut fixture = Fixture::new(config());
        fixture
            .dummy()
            .inject_submit_error(GraphicsError::Internal("queue rejected work".into()));
        let batches = fixture.submit(2);

        assert_eq!(batches[0].state(), BatchState::Failed);
        let err = batches[0].wait(Duration::ZERO).unwrap_err();
        assert!(matches!(err, GraphicsError::Submission { .. }));
        assert_eq!(fixture.pipeliner.stats().batches_failed, 1);
        assert_eq!(fixture.pipeliner.timeline_values(), (0, 0));

        // The next batch re-uploads the pools and succeeds.
        let batches = fixture.submit(2);
        batches[0].wait(Duration::from_secs(1)).unwrap();
        assert_eq!(fixture.pipeliner.timeline_values(), (1, 1));
    }

    #[test]
    fn test_invalid_draws_fail_batch_before_device() {
        let mut fixture = Fixture::new(config());
        fixture.allocator.allocate(&[ViewInfo::default()]);
        let closed = fixture.allocator.take_closed().remove(0);
        let shared = BatchShared::new(&closed, *fixture.pipeliner.layout());

        let draws = [DrawCommand::new(3, 8)];
        fixture
            .pipeliner
            .submit_batch(&shared, &closed.views, &mut fixture.binder, &draws)
            .unwrap();

        assert_eq!(shared.state(), BatchState::Failed);
        assert!(matches!(
            shared.wait(Duration::ZERO),
            Err(GraphicsError::PoolOverflow { index: 8, .. })
        ));
        assert_eq!(fixture.pipeliner.in_flight_count(), 0);
        assert_eq!(fixture.pipeliner.stats().batches_failed, 1);
        assert!(fixture.dummy().draw_records().is_empty());
    }

    #[test]
    fn test_small_staging_ring_splits_uploads() {
        let config = config().with_max_lights(64).with_staging_size(512);
        let mut fixture = Fixture::new(config);
        for _ in 1..64 {
            fixture.binder.push_light(LightProperties::default()).unwrap();
        }
        let batches = fixture.submit(4);
        batches[0].wait(Duration::from_secs(1)).unwrap();
        // 64 lights at 32 bytes each need more than one ring's worth.
        assert!(fixture.pipeliner.timeline_values().0 > 1);
    }

    #[test]
    fn test_abandon_fails_in_flight() {
        let mut fixture = Fixture::new(config());
        fixture.dummy().set_hold_completions(true);
        let batches = fixture.submit(4);
        fixture.pipeliner.abandon(&GraphicsError::DeviceLost);

        assert_eq!(batches[0].state(), BatchState::Failed);
        assert_eq!(fixture.pipeliner.in_flight_count(), 0);
        assert!(batches[0].wait(Duration::ZERO).unwrap_err().is_device_lost());
    }
}
