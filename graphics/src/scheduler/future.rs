//! Batch completion handles.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::batch::{BatchId, BatchState, ClosedBatch};
use crate::error::GraphicsError;
use crate::resources::Buffer;
use crate::types::{AtlasLayout, Region};

use super::Fence;

/// Pixels of one rendered view, tightly packed RGBA8 rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedView {
    /// Position of the view in the submission sequence.
    pub view_index: u64,
    pub batch: BatchId,
    /// Position of the view inside its batch.
    pub slot: u32,
    /// Region of the batch atlas the view was rendered into.
    pub region: Region,
    pub pixels: Vec<u8>,
}

struct BatchInner {
    state: BatchState,
    fence: Option<Fence>,
    readback: Option<Arc<Buffer>>,
    results: Option<Vec<RenderedView>>,
    error: Option<GraphicsError>,
    /// The failure was returned to a [`BatchFuture`] waiter.
    failure_reported: bool,
}

/// Completion state shared between the pipeliner and [`BatchFuture`]s.
pub(crate) struct BatchShared {
    id: BatchId,
    view_count: u32,
    first_view_index: u64,
    layout: AtlasLayout,
    inner: Mutex<BatchInner>,
    changed: Condvar,
}

impl BatchShared {
    pub(crate) fn new(batch: &ClosedBatch, layout: AtlasLayout) -> Arc<Self> {
        Arc::new(Self {
            id: batch.id,
            view_count: batch.views.len() as u32,
            first_view_index: batch.first_view_index,
            layout,
            inner: Mutex::new(BatchInner {
                state: BatchState::Closed,
                fence: None,
                readback: None,
                results: None,
                error: None,
                failure_reported: false,
            }),
            changed: Condvar::new(),
        })
    }

    pub(crate) fn id(&self) -> BatchId {
        self.id
    }

    pub(crate) fn view_count(&self) -> u32 {
        self.view_count
    }

    pub(crate) fn state(&self) -> BatchState {
        self.inner.lock().state
    }

    /// Whether the caller has seen the outcome: the results were taken, or the
    /// failure was returned through a future.
    pub(crate) fn is_consumed(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            BatchState::Retrieved => true,
            BatchState::Failed => inner.failure_reported,
            _ => false,
        }
    }

    fn mark_failure_reported(&self) {
        let mut inner = self.inner.lock();
        if inner.state == BatchState::Failed {
            inner.failure_reported = true;
        }
    }

    /// The batch is on the device; `fence` signals when `readback` holds its pixels.
    pub(crate) fn mark_submitted(
        &self,
        fence: Fence,
        readback: Arc<Buffer>,
    ) -> Result<(), GraphicsError> {
        let mut inner = self.inner.lock();
        inner.state.transition(self.id, BatchState::Submitted)?;
        inner.fence = Some(fence);
        inner.readback = Some(readback);
        self.changed.notify_all();
        Ok(())
    }

    /// Fail the batch with `error` unless it already settled.
    pub(crate) fn fail(&self, error: GraphicsError) {
        let mut inner = self.inner.lock();
        self.fail_locked(&mut inner, error);
    }

    fn fail_locked(&self, inner: &mut BatchInner, error: GraphicsError) {
        if inner.state.transition(self.id, BatchState::Failed).is_ok() {
            log::error!("Batch {} failed: {}", self.id, error);
            inner.error = Some(error);
            inner.fence = None;
            inner.readback = None;
            self.changed.notify_all();
        }
    }

    /// Advance a submitted batch whose fence has signaled. Non-blocking.
    pub(crate) fn poll(&self) {
        let mut inner = self.inner.lock();
        if inner.state != BatchState::Submitted {
            return;
        }
        let status = match &inner.fence {
            Some(fence) => fence.wait(Duration::ZERO),
            None => return,
        };
        self.settle_locked(&mut inner, status);
    }

    /// Apply a fence result to a submitted batch.
    fn settle_locked(&self, inner: &mut BatchInner, status: Result<bool, GraphicsError>) {
        if inner.state != BatchState::Submitted {
            return;
        }
        match status {
            Ok(false) => {}
            Ok(true) => match self.capture(inner) {
                Ok(results) => {
                    inner.results = Some(results);
                    inner.fence = None;
                    inner.readback = None;
                    // Submitted -> Complete is always legal here.
                    let _ = inner.state.transition(self.id, BatchState::Complete);
                    log::debug!("Batch {} complete", self.id);
                    self.changed.notify_all();
                }
                Err(e) => self.fail_locked(inner, e.into_submission(self.id)),
            },
            Err(e) => self.fail_locked(inner, e.into_submission(self.id)),
        }
    }

    /// Copy every view out of the readback buffer.
    fn capture(&self, inner: &BatchInner) -> Result<Vec<RenderedView>, GraphicsError> {
        let readback = inner.readback.as_ref().ok_or_else(|| {
            GraphicsError::Internal(format!("batch {} has no readback buffer", self.id))
        })?;
        let view_bytes = self.layout.view_bytes();
        let bytes = readback.read(0, self.view_count as u64 * view_bytes)?;

        Ok(bytes
            .chunks_exact(view_bytes as usize)
            .enumerate()
            .map(|(slot, pixels)| RenderedView {
                view_index: self.first_view_index + slot as u64,
                batch: self.id,
                slot: slot as u32,
                region: self.layout.region(slot as u32),
                pixels: pixels.to_vec(),
            })
            .collect())
    }

    /// Block until the batch completes or fails.
    ///
    /// # Errors
    ///
    /// Returns the batch's failure, or [`GraphicsError::RetrievalTimeout`] if
    /// `timeout` elapsed first. A timeout leaves the batch untouched.
    pub(crate) fn wait(&self, timeout: Duration) -> Result<(), GraphicsError> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            match inner.state {
                BatchState::Complete | BatchState::Retrieved => return Ok(()),
                BatchState::Failed => {
                    return Err(inner.error.clone().unwrap_or_else(|| {
                        GraphicsError::Internal(format!("batch {} failed", self.id))
                    }));
                }
                BatchState::Submitted => {
                    let Some(fence) = inner.fence.clone() else {
                        return Err(GraphicsError::Internal(format!(
                            "batch {} submitted without a fence",
                            self.id
                        )));
                    };
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    // Wait without holding the lock so other waiters and the
                    // pipeliner can poll.
                    let status = parking_lot::MutexGuard::unlocked(&mut inner, || {
                        fence.wait(remaining)
                    });
                    if matches!(status, Ok(false)) {
                        return Err(self.timeout_error(timeout));
                    }
                    self.settle_locked(&mut inner, status);
                }
                BatchState::Open | BatchState::Closed => {
                    if Instant::now() >= deadline {
                        return Err(self.timeout_error(timeout));
                    }
                    self.changed.wait_until(&mut inner, deadline);
                }
            }
        }
    }

    fn timeout_error(&self, timeout: Duration) -> GraphicsError {
        log::warn!("Batch {}: wait timed out after {:?}", self.id, timeout);
        GraphicsError::RetrievalTimeout {
            batch: self.id,
            timeout,
        }
    }

    /// Hand the results to the caller, moving the batch to `Retrieved`.
    pub(crate) fn take_results(&self) -> Result<Vec<RenderedView>, GraphicsError> {
        let mut inner = self.inner.lock();
        match inner.state {
            BatchState::Failed => Err(inner.error.clone().unwrap_or_else(|| {
                GraphicsError::Internal(format!("batch {} failed", self.id))
            })),
            BatchState::Complete => {
                inner.state.transition(self.id, BatchState::Retrieved)?;
                Ok(inner.results.take().unwrap_or_default())
            }
            BatchState::Retrieved => Err(GraphicsError::InvalidParameter(format!(
                "results of batch {} were already retrieved",
                self.id
            ))),
            other => Err(GraphicsError::InvalidParameter(format!(
                "batch {} is {other}, not complete",
                self.id
            ))),
        }
    }
}

impl std::fmt::Debug for BatchShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchShared")
            .field("id", &self.id)
            .field("view_count", &self.view_count)
            .field("state", &self.state())
            .finish()
    }
}

/// Handle to a submitted batch.
///
/// Futures can be cloned and waited on from any thread. Results can be taken
/// once, either through a future or through
/// [`BatchRenderer::wait_for_batch`](crate::BatchRenderer::wait_for_batch).
///
/// # Example
///
/// ```ignore
/// let futures = renderer.submit_views(&views)?;
/// for future in futures {
///     for view in future.wait(Duration::from_secs(1))? {
///         save(view.view_index, &view.pixels);
///     }
/// }
/// ```
#[derive(Clone)]
pub struct BatchFuture {
    shared: Arc<BatchShared>,
}

impl BatchFuture {
    pub(crate) fn new(shared: Arc<BatchShared>) -> Self {
        Self { shared }
    }

    pub fn id(&self) -> BatchId {
        self.shared.id()
    }

    /// Number of views in the batch.
    pub fn view_count(&self) -> u32 {
        self.shared.view_count()
    }

    pub fn state(&self) -> BatchState {
        self.shared.state()
    }

    /// Whether the batch has completed or failed. Non-blocking.
    pub fn is_ready(&self) -> bool {
        self.shared.poll();
        self.shared.state().is_settled()
    }

    /// Block until the batch completes and take its views in slot order.
    ///
    /// # Errors
    ///
    /// - [`GraphicsError::Submission`] if the batch failed
    /// - [`GraphicsError::RetrievalTimeout`] if `timeout` elapsed; waiting
    ///   again is allowed
    /// - [`GraphicsError::InvalidParameter`] if the results were already taken
    pub fn wait(&self, timeout: Duration) -> Result<Vec<RenderedView>, GraphicsError> {
        if let Err(e) = self.shared.wait(timeout) {
            if !matches!(e, GraphicsError::RetrievalTimeout { .. }) {
                self.shared.mark_failure_reported();
            }
            return Err(e);
        }
        self.shared.take_results()
    }
}

impl std::fmt::Debug for BatchFuture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchFuture")
            .field("id", &self.id())
            .field("view_count", &self.view_count())
            .field("state", &self.state())
            .finish()
    }
}

static_assertions::assert_impl_all!(BatchFuture: Send, Sync);
