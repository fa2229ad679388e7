//! Common types and descriptors for graphics resources.
//!
//! Descriptors and usage flags for device resources, the shader-visible
//! data layouts, and the framebuffer atlas geometry.

mod atlas;
mod buffer;
mod image;
mod shader;

pub use atlas::{ATLAS_BYTES_PER_TEXEL, AtlasLayout, Extent2d, Region};
pub use buffer::{BufferDescriptor, BufferUsage};
pub use image::{ImageDescriptor, ImageFormat, ImageUsage};
pub use shader::{
    DrawCommand, LightProperties, MaterialProperties, RenderPushConstant, ViewInfo,
};
