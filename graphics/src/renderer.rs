//! The batch renderer facade.
//!
//! [`BatchRenderer`] ties the pieces together: it owns the device, the
//! [`ResourceBinder`], the [`BatchAllocator`] and the
//! [`SubmissionPipeliner`], and exposes the upload, submission and retrieval
//! calls.
//!
//! # Example
//!
//! ```
//! use std::time::Duration;
//! use vista_graphics::{
//!     BackendType, BatchRenderer, DrawCommand, LightProperties, MaterialProperties,
//!     RendererConfig, ViewInfo,
//! };
//! use vista_core::math::Vec3;
//!
//! let config = RendererConfig::default()
//!     .with_backend(BackendType::Dummy)
//!     .with_view_extent(4, 4);
//! let mut renderer = BatchRenderer::new(config).unwrap();
//!
//! renderer.register_material(0, MaterialProperties::new([1.0, 1.0, 1.0, 1.0])).unwrap();
//! renderer.push_light(LightProperties::new(Vec3::zeros(), Vec3::new(1.0, 1.0, 1.0))).unwrap();
//! renderer.set_draws(vec![DrawCommand::new(36, 0)]);
//!
//! let futures = renderer.submit_views(&[ViewInfo::default(); 3]).unwrap();
//! let views = renderer.wait_for_batch(futures[0].id()).unwrap();
//! assert_eq!(views.len(), 3);
//! ```

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use crate::batch::{BatchAllocator, BatchId, BatchState};
use crate::binder::ResourceBinder;
use crate::config::RendererConfig;
use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, SubmissionFailure};
use crate::instance::{GraphicsInstance, InstanceParameters};
use crate::scheduler::{
    BatchFuture, BatchShared, PipelineStats, RenderedView, SubmissionPipeliner,
};
use crate::types::{DrawCommand, LightProperties, MaterialProperties, ViewInfo};

/// Counters across the renderer's lifetime, including earlier sessions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RendererStats {
    pub batches_submitted: u64,
    pub batches_completed: u64,
    pub batches_failed: u64,
    pub views_rendered: u64,
    pub bytes_uploaded: u64,
    /// Frames started with [`BatchRenderer::begin_frame`].
    pub frames: u64,
    /// Device sessions created, including the first.
    pub sessions: u64,
}

/// A closed batch still waiting for a slot.
struct PendingBatch {
    shared: Arc<BatchShared>,
    views: Vec<ViewInfo>,
}

/// Headless renderer of many views per submission.
///
/// All mutation happens on the caller's thread through `&mut self`. The
/// returned [`BatchFuture`]s can be waited on from any thread.
pub struct BatchRenderer {
    config: RendererConfig,
    instance: Arc<GraphicsInstance>,
    device: Arc<GraphicsDevice>,
    binder: ResourceBinder,
    allocator: BatchAllocator,
    pipeliner: SubmissionPipeliner,
    draws: Vec<DrawCommand>,
    /// Batches whose results have not been handed out yet.
    batches: HashMap<BatchId, Arc<BatchShared>>,
    pending: VecDeque<PendingBatch>,
    /// Counters of sessions torn down by `reinitialize`.
    carried: PipelineStats,
    frame_index: u64,
    sessions: u64,
    lost: bool,
}

impl BatchRenderer {
    /// Create an instance and device for `config` and allocate all resources.
    ///
    /// # Errors
    ///
    /// - [`GraphicsError::Config`] if `config` fails validation
    /// - [`GraphicsError::DeviceInit`] if no device with the requested queues
    ///   can be created
    pub fn new(config: RendererConfig) -> Result<Self, GraphicsError> {
        config.validate()?;
        let instance = GraphicsInstance::new(
            InstanceParameters::new()
                .with_backend(config.backend)
                .with_validation(config.validation),
        )?;
        Self::with_instance(instance, config)
    }

    /// Create a renderer on an existing instance.
    ///
    /// # Errors
    ///
    /// Same as [`new`](Self::new).
    pub fn with_instance(
        instance: Arc<GraphicsInstance>,
        config: RendererConfig,
    ) -> Result<Self, GraphicsError> {
        config.validate()?;
        let device = instance.create_device(config.adapter_index, &config.queues)?;

        let mut binder = ResourceBinder::new(config.max_materials, config.max_lights);
        binder.bind_device(&device)?;
        let pipeliner = SubmissionPipeliner::new(Arc::clone(&device), &config)?;

        log::info!(
            "BatchRenderer: created on '{}' ({} view(s) per batch, {}x{} per view)",
            device.name(),
            config.images_per_fb,
            config.view_extent.width,
            config.view_extent.height
        );

        Ok(Self {
            allocator: BatchAllocator::new(config.images_per_fb),
            config,
            instance,
            device,
            binder,
            pipeliner,
            draws: Vec::new(),
            batches: HashMap::new(),
            pending: VecDeque::new(),
            carried: PipelineStats::default(),
            frame_index: 0,
            sessions: 1,
            lost: false,
        })
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn instance(&self) -> &Arc<GraphicsInstance> {
        &self.instance
    }

    /// Device of the current session.
    pub fn device(&self) -> &Arc<GraphicsDevice> {
        &self.device
    }

    pub fn binder(&self) -> &ResourceBinder {
        &self.binder
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    /// Write material `index`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::PoolOverflow`] if `index` is at or beyond the
    /// material ceiling.
    pub fn register_material(
        &mut self,
        index: u32,
        material: MaterialProperties,
    ) -> Result<(), GraphicsError> {
        self.binder.register_material(index, material)
    }

    /// Write light `index`.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::PoolOverflow`] if `index` is at or beyond the
    /// light ceiling.
    pub fn register_light(
        &mut self,
        index: u32,
        light: LightProperties,
    ) -> Result<(), GraphicsError> {
        self.binder.register_light(index, light)
    }

    /// Append a light for this frame and return its index.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::PoolOverflow`] if the light pool is full.
    pub fn push_light(&mut self, light: LightProperties) -> Result<u32, GraphicsError> {
        self.binder.push_light(light)
    }

    /// Replace the draw list rendered into every view.
    pub fn set_draws(&mut self, draws: Vec<DrawCommand>) {
        self.draws = draws;
    }

    pub fn draws(&self) -> &[DrawCommand] {
        &self.draws
    }

    /// Add one view, submitting its batch if the view filled it.
    ///
    /// # Errors
    ///
    /// Returns an error if the draw list references invalid materials.
    pub fn enqueue_view(
        &mut self,
        view: ViewInfo,
    ) -> Result<Option<BatchFuture>, GraphicsError> {
        self.binder.validate_draws(&self.draws)?;
        self.allocator.enqueue(view);
        Ok(self.submit_closed().into_iter().next())
    }

    /// Submit the partially filled open batch, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the draw list references invalid materials.
    pub fn flush(&mut self) -> Result<Option<BatchFuture>, GraphicsError> {
        if self.allocator.open_batch().is_none() {
            return Ok(None);
        }
        self.binder.validate_draws(&self.draws)?;
        self.allocator.flush();
        Ok(self.submit_closed().into_iter().next())
    }

    /// Submit `views` in batches of at most `images_per_fb`.
    ///
    /// Submission failures are reported through the returned futures. An empty
    /// `views` submits nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the draw list references invalid materials. No
    /// views are enqueued in that case.
    pub fn submit_views(
        &mut self,
        views: &[ViewInfo],
    ) -> Result<Vec<BatchFuture>, GraphicsError> {
        crate::profile_scope!("submit_views");
        if views.is_empty() {
            return Ok(Vec::new());
        }
        self.binder.validate_draws(&self.draws)?;
        self.allocator.allocate(views);
        Ok(self.submit_closed())
    }

    /// Wait for `batch` with the configured timeout and take its views.
    ///
    /// # Errors
    ///
    /// See [`wait_for_batch_timeout`](Self::wait_for_batch_timeout).
    pub fn wait_for_batch(
        &mut self,
        batch: BatchId,
    ) -> Result<Vec<RenderedView>, GraphicsError> {
        self.wait_for_batch_timeout(batch, self.config.retrieval_timeout())
    }

    /// Wait up to `timeout` for `batch` and take its views in slot order.
    ///
    /// An open batch is flushed first, and batches still waiting for a slot
    /// are submitted.
    ///
    /// # Errors
    ///
    /// - [`GraphicsError::UnknownBatch`] if `batch` was never issued
    /// - [`GraphicsError::InvalidParameter`] if its results were already taken
    /// - [`GraphicsError::RetrievalTimeout`] if `timeout` elapsed; the batch
    ///   stays pending and can be waited on again
    /// - [`GraphicsError::Submission`] if the batch failed
    /// - [`GraphicsError::PoolOverflow`] or [`GraphicsError::InvalidParameter`]
    ///   if the draw list was invalid when the batch was submitted
    pub fn wait_for_batch_timeout(
        &mut self,
        batch: BatchId,
        timeout: Duration,
    ) -> Result<Vec<RenderedView>, GraphicsError> {
        crate::profile_scope!("wait_for_batch");

        if batch >= self.allocator.next_batch_id() {
            return Err(GraphicsError::UnknownBatch(batch));
        }
        if self.allocator.open_batch() == Some(batch) {
            self.allocator.flush();
            self.submit_closed();
        } else {
            self.submit_pending();
        }

        let Some(shared) = self.batches.get(&batch).cloned() else {
            return Err(GraphicsError::InvalidParameter(format!(
                "results of batch {batch} were already retrieved"
            )));
        };

        let result = shared.wait(timeout).and_then(|()| shared.take_results());
        match &result {
            Err(GraphicsError::RetrievalTimeout { .. }) => {}
            Err(e) => {
                if e.is_device_lost() {
                    self.mark_lost();
                }
                self.batches.remove(&batch);
            }
            Ok(_) => {
                self.batches.remove(&batch);
            }
        }
        self.reclaim();
        result
    }

    /// Start a new frame: per-frame lights are cleared.
    pub fn begin_frame(&mut self) {
        self.binder.begin_frame();
        self.frame_index += 1;
        self.reclaim();
        crate::frame_mark!();
        crate::profile_plot!("batches_in_flight", self.pipeliner.in_flight_count());
        crate::profiling::plot_stats(&self.stats());
        log::trace!("BatchRenderer: frame {}", self.frame_index);
    }

    /// Free slots of settled batches and forget batches whose results or
    /// failure were handed out through futures.
    pub fn reclaim(&mut self) {
        self.pipeliner.reclaim();
        self.batches.retain(|_, shared| !shared.is_consumed());
        if self.device.is_lost() {
            self.mark_lost();
        }
    }

    /// Whether the current session lost its device.
    pub fn is_device_lost(&self) -> bool {
        self.lost || self.device.is_lost()
    }

    /// Tear the device down and create a new one on the same instance.
    ///
    /// Batches still on the old device fail with
    /// [`SubmissionFailure::DeviceLost`]. Registered materials are uploaded
    /// again before the next batch; batch ids keep counting.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::DeviceInit`] if the new device cannot be
    /// created. The renderer stays lost and `reinitialize` can be retried.
    pub fn reinitialize(&mut self) -> Result<(), GraphicsError> {
        log::warn!(
            "BatchRenderer: reinitializing device '{}' (lost: {})",
            self.device.name(),
            self.is_device_lost()
        );

        self.pipeliner.abandon(&GraphicsError::DeviceLost);
        self.fail_pending();

        let device = self
            .instance
            .create_device(self.config.adapter_index, &self.config.queues)?;
        self.binder.bind_device(&device)?;
        let pipeliner = SubmissionPipeliner::new(Arc::clone(&device), &self.config)?;

        let old = std::mem::replace(&mut self.pipeliner, pipeliner);
        self.carried.merge(&old.stats());
        drop(old);
        self.device = device;
        self.sessions += 1;
        self.lost = false;

        log::info!("BatchRenderer: session {} ready", self.sessions);
        Ok(())
    }

    /// Counters across all sessions.
    pub fn stats(&self) -> RendererStats {
        let mut totals = self.carried;
        totals.merge(&self.pipeliner.stats());
        RendererStats {
            batches_submitted: totals.batches_submitted,
            batches_completed: totals.batches_completed,
            batches_failed: totals.batches_failed,
            views_rendered: totals.views_rendered,
            bytes_uploaded: totals.bytes_uploaded,
            frames: self.frame_index,
            sessions: self.sessions,
        }
    }

    /// Batches closed but not yet on the device.
    pub fn pending_batches(&self) -> usize {
        self.pending.len()
    }

    /// Batches occupying an in-flight slot.
    pub fn in_flight_batches(&self) -> usize {
        self.pipeliner.in_flight_count()
    }

    /// Wrap every closed batch in a future and try to submit it.
    fn submit_closed(&mut self) -> Vec<BatchFuture> {
        let layout = *self.pipeliner.layout();
        let futures = self
            .allocator
            .take_closed()
            .into_iter()
            .map(|closed| {
                let shared = BatchShared::new(&closed, layout);
                self.batches.insert(closed.id, Arc::clone(&shared));
                self.pending.push_back(PendingBatch {
                    shared: Arc::clone(&shared),
                    views: closed.views,
                });
                BatchFuture::new(shared)
            })
            .collect();
        self.submit_pending();
        futures
    }

    /// Submit pending batches in order until one has to wait for a slot.
    fn submit_pending(&mut self) {
        while !self.pending.is_empty() {
            if self.is_device_lost() {
                self.mark_lost();
                self.fail_pending();
                return;
            }

            let Some(next) = self.pending.front() else {
                return;
            };
            let shared = Arc::clone(&next.shared);
            let result =
                self.pipeliner
                    .submit_batch(&shared, &next.views, &mut self.binder, &self.draws);
            if let Err(e) = result {
                log::warn!("BatchRenderer: batch {} left pending: {}", shared.id(), e);
                return;
            }

            self.pending.pop_front();
            if shared.state() == BatchState::Failed && self.device.is_lost() {
                self.mark_lost();
            }
        }
    }

    /// Fail every batch still waiting for a slot.
    fn fail_pending(&mut self) {
        for pending in self.pending.drain(..) {
            let id = pending.shared.id();
            pending.shared.fail(GraphicsError::Submission {
                batch: id,
                failure: SubmissionFailure::DeviceLost,
            });
            self.carried.batches_failed += 1;
        }
    }

    fn mark_lost(&mut self) {
        if !self.lost {
            log::error!("BatchRenderer: device '{}' lost", self.device.name());
            self.lost = true;
        }
    }
}

impl std::fmt::Debug for BatchRenderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchRenderer")
            .field("device", &self.device.name())
            .field("frame_index", &self.frame_index)
            .field("pending", &self.pending.len())
            .field("tracked_batches", &self.batches.len())
            .field("pipeliner", &self.pipeliner)
            .field("lost", &self.lost)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instance::BackendType;

    fn renderer() -> BatchRenderer {
        BatchRenderer::new(
            RendererConfig::default()
                .with_backend(BackendType::Dummy)
                .with_view_extent(2, 2)
                .with_retrieval_timeout(Duration::from_millis(100)),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_config_rejected() {
        let result = BatchRenderer::new(RendererConfig::default().with_images_per_fb(0));
        assert!(matches!(result, Err(GraphicsError::Config(_))));
    }

    #[test]
    fn test_empty_submission() {
        let mut renderer = renderer();
        assert!(renderer.submit_views(&[]).unwrap().is_empty());
        assert!(renderer.flush().unwrap().is_none());
        assert_eq!(renderer.stats().batches_submitted, 0);
    }

    #[test]
    fn test_enqueue_closes_full_batch() {
        let mut renderer = renderer();
        for _ in 0..63 {
            assert!(renderer.enqueue_view(ViewInfo::default()).unwrap().is_none());
        }
        let future = renderer.enqueue_view(ViewInfo::default()).unwrap().unwrap();
        assert_eq!(future.view_count(), 64);

        renderer.enqueue_view(ViewInfo::default()).unwrap();
        let partial = renderer.flush().unwrap().unwrap();
        assert_eq!(partial.view_count(), 1);
        assert!(partial.id() > future.id());
    }

    #[test]
    fn test_invalid_draws_rejected_before_enqueue() {
        let mut renderer = renderer();
        renderer.set_draws(vec![DrawCommand::new(3, 7)]);
        let err = renderer.submit_views(&[ViewInfo::default()]).unwrap_err();
        assert!(matches!(err, GraphicsError::InvalidParameter(_)));
        assert_eq!(renderer.allocator.next_batch_id(), BatchId::new(0));
    }

    #[test]
    fn test_wait_for_unknown_and_retrieved() {
        let mut renderer = renderer();
        let err = renderer.wait_for_batch(BatchId::new(0)).unwrap_err();
        assert_eq!(err, GraphicsError::UnknownBatch(BatchId::new(0)));

        let futures = renderer.submit_views(&[ViewInfo::default()]).unwrap();
        let id = futures[0].id();
        assert_eq!(renderer.wait_for_batch(id).unwrap().len(), 1);

        let err = renderer.wait_for_batch(id).unwrap_err();
        assert!(matches!(err, GraphicsError::InvalidParameter(_)));
    }

    #[test]
    fn test_wait_flushes_open_batch() {
        let mut renderer = renderer();
        renderer.enqueue_view(ViewInfo::default()).unwrap();
        let id = renderer.allocator.open_batch().unwrap();
        assert_eq!(renderer.wait_for_batch(id).unwrap().len(), 1);
    }

    #[test]
    fn test_begin_frame_resets_lights() {
        let mut renderer = renderer();
        renderer.push_light(LightProperties::default()).unwrap();
        renderer.push_light(LightProperties::default()).unwrap();
        assert_eq!(renderer.binder().light_count(), 2);

        renderer.begin_frame();
        assert_eq!(renderer.binder().light_count(), 0);
        assert_eq!(renderer.frame_index(), 1);
        assert_eq!(renderer.stats().frames, 1);
    }

    #[test]
    fn test_future_retrieval_is_forgotten() {
        let mut renderer = renderer();
        let futures = renderer.submit_views(&[ViewInfo::default(); 2]).unwrap();
        futures[0].wait(Duration::from_secs(1)).unwrap();
        renderer.reclaim();
        assert!(renderer.batches.is_empty());
        assert_eq!(renderer.stats().views_rendered, 2);
    }

    #[test]
    fn test_failed_future_is_forgotten_once_observed() {
        let mut renderer = renderer();
        let dummy = renderer
            .device()
            .raw()
            .as_any()
            .downcast_ref::<crate::backend::dummy::DummyDevice>()
            .unwrap();
        dummy.inject_submit_error(GraphicsError::OutOfMemory);

        let future = renderer.submit_views(&[ViewInfo::default()]).unwrap().remove(0);
        assert_eq!(future.state(), BatchState::Failed);
        renderer.reclaim();
        assert_eq!(renderer.batches.len(), 1);

        let err = future.wait(Duration::ZERO).unwrap_err();
        assert!(matches!(err, GraphicsError::Submission { .. }));
        renderer.reclaim();
        assert!(renderer.batches.is_empty());
        assert_eq!(renderer.stats().batches_failed, 1);
    }
}
