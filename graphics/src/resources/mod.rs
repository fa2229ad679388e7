//! GPU resources.
//!
//! This module contains the GPU resource types that are created by [`GraphicsDevice`]:
//! - [`Buffer`] - GPU memory buffer
//! - [`Image`] - 2D image used as a framebuffer atlas
//! - [`StagingRing`] - Host-visible upload ring retired by a timeline semaphore
//!
//! Resources are reference-counted with [`Arc`] and can be shared across threads.
//! Each resource holds the backend device it was created on and releases its
//! handle when dropped.
//!
//! [`GraphicsDevice`]: crate::GraphicsDevice
//! [`Arc`]: std::sync::Arc

mod buffer;
mod image;
mod staging;

pub use buffer::Buffer;
pub use image::Image;
pub use staging::{RingAllocation, StagingRing};
