//! # Vista Graphics
//!
//! Headless batched GPU rendering core.
//!
//! ## Overview
//!
//! Many independent views are rendered per submission by packing their
//! outputs into shared framebuffer atlases. This crate provides:
//!
//! - [`BatchRenderer`] - The facade: upload, submit views, retrieve pixels
//! - [`GraphicsInstance`] / [`GraphicsDevice`] - Adapter and queue selection
//! - [`ResourceBinder`] - Bounded material and light pools mirrored on the GPU
//! - [`BatchAllocator`] - Partitioning of views into framebuffer-sized batches
//! - [`PushConstantIndexer`] - Per-draw view indexing
//! - [`SubmissionPipeliner`] - Transfer, graphics and compute submissions
//!   chained by timeline semaphores
//! - Multiple backend support: Vulkan and Dummy (for testing)
//!
//! ## Example
//!
//! ```
//! use vista_graphics::{BackendType, BatchRenderer, RendererConfig, ViewInfo};
//!
//! let mut renderer =
//!     BatchRenderer::new(RendererConfig::default().with_backend(BackendType::Dummy)).unwrap();
//! let futures = renderer.submit_views(&vec![ViewInfo::default(); 70]).unwrap();
//! assert_eq!(futures.len(), 2);
//! assert_eq!(futures[0].view_count(), 64);
//! assert_eq!(futures[1].view_count(), 6);
//! ```

pub mod backend;
pub mod batch;
pub mod binder;
pub mod command;
pub mod config;
pub mod device;
pub mod error;
pub mod instance;
pub mod profiling;
pub mod push_constant;
pub mod queue;
pub mod renderer;
pub mod resources;
pub mod scheduler;
pub mod types;

// Re-export main types for convenience
pub use backend::{BufferId, FenceId, GpuBackend, GpuDevice, ImageId, SemaphoreId};
pub use batch::{BatchAllocator, BatchId, BatchState, ClosedBatch, SlotTable, ViewAssignment};
pub use binder::{PoolUpload, ResourceBinder};
pub use command::{Command, Submission};
pub use config::{
    COMPUTE_PRIORITY, GFX_PRIORITY, MAX_LIGHTS, MAX_MATERIALS, NUM_DESIRED_COMPUTE_QUEUES,
    NUM_DESIRED_GFX_QUEUES, NUM_DESIRED_TRANSFER_QUEUES, NUM_IMAGES_PER_FB, QueueConfig,
    QueueSettings, RendererConfig, TRANSFER_PRIORITY,
};
pub use device::{DeviceCapabilities, GraphicsDevice};
pub use error::{GraphicsError, PoolKind, SubmissionFailure};
pub use instance::{AdapterInfo, AdapterType, BackendType, GraphicsInstance, InstanceParameters};
pub use push_constant::PushConstantIndexer;
pub use queue::{Queue, QueueCapabilities, QueueKind};
pub use renderer::{BatchRenderer, RendererStats};
pub use resources::{Buffer, Image, StagingRing};
pub use scheduler::{
    BatchFuture, Fence, FenceStatus, PipelineStats, RenderedView, SubmissionPipeliner,
    TimelineSemaphore,
};
pub use types::{
    AtlasLayout, BufferDescriptor, BufferUsage, DrawCommand, Extent2d, ImageDescriptor,
    ImageFormat, ImageUsage, LightProperties, MaterialProperties, Region, RenderPushConstant,
    ViewInfo,
};

// Profiling macros, usable as `crate::profile_scope!` inside this crate.
pub use vista_core::{frame_mark, profile_function, profile_plot, profile_scope};

/// Graphics library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the graphics subsystem.
///
/// Logs the library version and, with the `profiling` feature, starts the
/// Tracy client.
pub fn init() {
    vista_core::init();
    profiling::start();
    log::info!("Vista Graphics v{} initialized", VERSION);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_shader_contract_sizes() {
        assert_eq!(ViewInfo::SIZE, 128);
        assert_eq!(RenderPushConstant::SIZE, 4);
        assert_eq!(LightProperties::SIZE, 32);
        assert_eq!(MaterialProperties::SIZE, 48);
    }
}
