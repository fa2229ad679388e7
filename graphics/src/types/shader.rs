//! Shader-visible data layouts.
//!
//! These structs are copied byte-for-byte into device buffers and push
//! constants, so their layout is the contract with the externally built
//! shaders:
//!
//! ```glsl
//! layout(push_constant) uniform PushConstant { uint batchIdx; };
//! struct ViewInfo { mat4 projection; mat4 view; };
//! struct LightProperties { vec4 position; vec4 color; };
//! struct MaterialProperties { vec4 baseColor; vec4 emissive; vec4 params; };
//! ```
//!
//! Matrices are column-major. Sizes are pinned at compile time below.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use vista_core::math::{self, Mat4, Vec3};

/// Camera transforms of a single view.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ViewInfo {
    /// Projection matrix, column-major.
    pub projection: [[f32; 4]; 4],
    /// View matrix, column-major.
    pub view: [[f32; 4]; 4],
}

impl ViewInfo {
    /// Size in bytes of one entry in the view buffer.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Create view info from projection and view matrices.
    pub fn new(projection: &Mat4, view: &Mat4) -> Self {
        Self {
            projection: math::mat4_to_cols_array_2d(projection),
            view: math::mat4_to_cols_array_2d(view),
        }
    }

    /// Perspective camera at `eye` looking at `target`.
    pub fn look_at(eye: Vec3, target: Vec3, yfov: f32, aspect: f32) -> Self {
        let projection = math::perspective_rh(yfov, aspect, 0.1, 1000.0);
        let view = math::look_at_rh(&eye, &target, &Vec3::y());
        Self::new(&projection, &view)
    }

    /// Projection matrix.
    pub fn projection_matrix(&self) -> Mat4 {
        math::mat4_from_cols_array_2d(&self.projection)
    }

    /// View matrix.
    pub fn view_matrix(&self) -> Mat4 {
        math::mat4_from_cols_array_2d(&self.view)
    }
}

impl Default for ViewInfo {
    fn default() -> Self {
        Self::new(&Mat4::identity(), &Mat4::identity())
    }
}

/// Per-draw push constant: index of the view in the view buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct RenderPushConstant {
    /// `slot * images_per_fb + view_slot`.
    pub batch_idx: u32,
}

impl RenderPushConstant {
    /// Size of the push constant range in bytes.
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;
}

/// A point light.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct LightProperties {
    /// World-space position, `w = 1`.
    pub position: [f32; 4],
    /// Linear RGB color, `w` unused.
    pub color: [f32; 4],
}

impl LightProperties {
    /// Size in bytes of one entry in the light buffer.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Create a light at `position` with `color`.
    pub fn new(position: Vec3, color: Vec3) -> Self {
        Self {
            position: [position.x, position.y, position.z, 1.0],
            color: [color.x, color.y, color.z, 1.0],
        }
    }
}

/// Surface parameters of a material.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct MaterialProperties {
    /// Base color, linear RGBA.
    pub base_color: [f32; 4],
    /// Emissive color, `w` unused.
    pub emissive: [f32; 4],
    /// `[metallic, roughness, texture index, reserved]`.
    pub params: [f32; 4],
}

impl MaterialProperties {
    /// Size in bytes of one entry in the material buffer.
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Create an opaque, non-emissive material.
    pub fn new(base_color: [f32; 4]) -> Self {
        Self {
            base_color,
            emissive: [0.0; 4],
            params: [0.0, 1.0, -1.0, 0.0],
        }
    }

    /// Set the emissive color.
    pub fn with_emissive(mut self, emissive: [f32; 3]) -> Self {
        self.emissive = [emissive[0], emissive[1], emissive[2], 0.0];
        self
    }

    /// Set metallic and roughness factors.
    pub fn with_metallic_roughness(mut self, metallic: f32, roughness: f32) -> Self {
        self.params[0] = metallic;
        self.params[1] = roughness;
        self
    }

    /// Set the texture index, `None` for untextured.
    pub fn with_texture_index(mut self, index: Option<u32>) -> Self {
        self.params[2] = index.map_or(-1.0, |i| i as f32);
        self
    }
}

/// One entry of the scene draw list, replayed for every view of a batch.
///
/// The first four fields match `VkDrawIndirectCommand`.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Pod, Zeroable)]
pub struct DrawCommand {
    /// Number of vertices to draw.
    pub vertex_count: u32,
    /// Number of instances to draw.
    pub instance_count: u32,
    /// Index of the first vertex.
    pub first_vertex: u32,
    /// Instance ID of the first instance.
    pub first_instance: u32,
    /// Index into the material pool.
    pub material_index: u32,
}

impl DrawCommand {
    /// Draw `vertex_count` vertices once with the given material.
    pub fn new(vertex_count: u32, material_index: u32) -> Self {
        Self {
            vertex_count,
            instance_count: 1,
            first_vertex: 0,
            first_instance: 0,
            material_index,
        }
    }

    /// Set the instance count.
    pub fn with_instances(mut self, instance_count: u32) -> Self {
        self.instance_count = instance_count;
        self
    }

    /// Set the first vertex.
    pub fn with_first_vertex(mut self, first_vertex: u32) -> Self {
        self.first_vertex = first_vertex;
        self
    }

    /// Whether the draw produces any primitives.
    pub fn is_empty(&self) -> bool {
        self.vertex_count == 0 || self.instance_count == 0
    }
}

const_assert_eq!(std::mem::size_of::<ViewInfo>(), 128);
const_assert_eq!(std::mem::size_of::<RenderPushConstant>(), 4);
const_assert_eq!(std::mem::size_of::<LightProperties>(), 32);
const_assert_eq!(std::mem::size_of::<MaterialProperties>(), 48);
const_assert_eq!(std::mem::size_of::<DrawCommand>(), 20);
const_assert_eq!(std::mem::align_of::<ViewInfo>(), 4);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_view_info_matrices() {
        let projection = math::perspective_rh(1.0, 1.0, 0.1, 10.0);
        let view = math::mat4_from_translation(Vec3::new(1.0, 2.0, 3.0));
        let info = ViewInfo::new(&projection, &view);
        assert_eq!(info.projection_matrix(), projection);
        assert_eq!(info.view_matrix(), view);
        assert_eq!(info.view[3], [1.0, 2.0, 3.0, 1.0]);
    }

    #[test]
    fn test_view_info_bytes_are_column_major() {
        let info = ViewInfo::default();
        let floats: &[f32] = bytemuck::cast_slice(bytemuck::bytes_of(&info));
        assert_eq!(floats.len(), 32);
        assert_eq!(&floats[0..4], &[1.0, 0.0, 0.0, 0.0]);
        assert_eq!(&floats[16..20], &[1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_material_builder() {
        let material = MaterialProperties::new([1.0, 0.5, 0.25, 1.0])
            .with_emissive([0.1, 0.2, 0.3])
            .with_metallic_roughness(0.8, 0.2)
            .with_texture_index(Some(7));
        assert_eq!(material.emissive, [0.1, 0.2, 0.3, 0.0]);
        assert_eq!(material.params, [0.8, 0.2, 7.0, 0.0]);
    }

    #[test]
    fn test_light_new() {
        let light = LightProperties::new(Vec3::new(1.0, 2.0, 3.0), Vec3::new(0.5, 0.5, 0.5));
        assert_eq!(light.position, [1.0, 2.0, 3.0, 1.0]);
        assert_eq!(light.color[..3], [0.5, 0.5, 0.5]);
    }

    #[test]
    fn test_draw_command_empty() {
        assert!(DrawCommand::new(0, 0).is_empty());
        assert!(DrawCommand::new(3, 0).with_instances(0).is_empty());
        assert!(!DrawCommand::new(3, 0).is_empty());
    }
}
