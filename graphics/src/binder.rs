//! Resource binder: bounded material and light pools mirrored on the device.
//!
//! Materials and lights are written by index into host-side [`FixedPool`]s
//! sized once at the configured ceiling. The device holds one storage buffer
//! per pool of the same capacity; the pipeliner copies the dirty range of each
//! pool into it on the transfer queue before the next batch renders.
//!
//! Materials persist across frames. Lights are per-frame and cleared by
//! [`ResourceBinder::begin_frame`].

use std::ops::Range;
use std::sync::Arc;

use vista_core::pool::{FixedPool, PoolLifetime};

use crate::device::GraphicsDevice;
use crate::error::{GraphicsError, PoolKind};
use crate::resources::Buffer;
use crate::types::{BufferDescriptor, DrawCommand, LightProperties, MaterialProperties};

/// A range of pool entries that must be copied to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolUpload {
    pub pool: PoolKind,
    pub range: Range<u32>,
}

impl PoolUpload {
    fn stride(&self) -> u64 {
        match self.pool {
            PoolKind::Materials => MaterialProperties::SIZE,
            PoolKind::Lights => LightProperties::SIZE,
        }
    }

    /// Offset of the first entry in the device buffer.
    pub fn byte_offset(&self) -> u64 {
        self.range.start as u64 * self.stride()
    }

    /// Size of the range in bytes.
    pub fn byte_size(&self) -> u64 {
        self.range.len() as u64 * self.stride()
    }
}

/// Owns the material and light pools and their device buffers.
pub struct ResourceBinder {
    materials: FixedPool<MaterialProperties>,
    lights: FixedPool<LightProperties>,
    material_buffer: Option<Arc<Buffer>>,
    light_buffer: Option<Arc<Buffer>>,
}

impl ResourceBinder {
    /// Create pools with room for `max_materials` and `max_lights` entries.
    pub fn new(max_materials: u32, max_lights: u32) -> Self {
        Self {
            materials: FixedPool::new("materials", max_materials, PoolLifetime::Persistent),
            lights: FixedPool::new("lights", max_lights, PoolLifetime::PerFrame),
            material_buffer: None,
            light_buffer: None,
        }
    }

    /// Create the device buffers on `device` and schedule a full re-upload.
    ///
    /// Called once at startup and again after the device is recreated.
    pub fn bind_device(&mut self, device: &Arc<GraphicsDevice>) -> Result<(), GraphicsError> {
        let material_bytes = self.materials.capacity() as u64 * MaterialProperties::SIZE;
        let light_bytes = self.lights.capacity() as u64 * LightProperties::SIZE;
        let materials = BufferDescriptor::storage(material_bytes).with_label("materials");
        let lights = BufferDescriptor::storage(light_bytes).with_label("lights");
        self.material_buffer = Some(device.create_buffer(&materials)?);
        self.light_buffer = Some(device.create_buffer(&lights)?);
        self.mark_all_dirty();

        log::debug!(
            "ResourceBinder: bound {} material(s), {} light(s) to {}",
            self.materials.len(),
            self.lights.len(),
            device.name()
        );
        Ok(())
    }

    /// Device buffer backing the material pool.
    pub fn material_buffer(&self) -> Result<&Arc<Buffer>, GraphicsError> {
        self.material_buffer
            .as_ref()
            .ok_or_else(|| GraphicsError::Internal("material buffer not bound".to_string()))
    }

    /// Device buffer backing the light pool.
    pub fn light_buffer(&self) -> Result<&Arc<Buffer>, GraphicsError> {
        self.light_buffer
            .as_ref()
            .ok_or_else(|| GraphicsError::Internal("light buffer not bound".to_string()))
    }

    /// Write material `index`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::PoolOverflow`] if `index` is at or beyond the
    /// material ceiling. The pool is left untouched.
    pub fn register_material(
        &mut self,
        index: u32,
        material: MaterialProperties,
    ) -> Result<(), GraphicsError> {
        self.materials
            .insert(index, material)
            .map_err(|e| GraphicsError::pool_overflow(PoolKind::Materials, e))?;
        log::trace!("ResourceBinder: material {} registered", index);
        Ok(())
    }

    /// Write light `index`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::PoolOverflow`] if `index` is at or beyond the
    /// light ceiling. The pool is left untouched.
    pub fn register_light(
        &mut self,
        index: u32,
        light: LightProperties,
    ) -> Result<(), GraphicsError> {
        self.lights
            .insert(index, light)
            .map_err(|e| GraphicsError::pool_overflow(PoolKind::Lights, e))?;
        Ok(())
    }

    /// Append a light after the highest registered one, returning its index.
    pub fn push_light(&mut self, light: LightProperties) -> Result<u32, GraphicsError> {
        self.lights
            .push(light)
            .map_err(|e| GraphicsError::pool_overflow(PoolKind::Lights, e))
    }

    pub fn material(&self, index: u32) -> Option<&MaterialProperties> {
        self.materials.get(index)
    }

    pub fn light(&self, index: u32) -> Option<&LightProperties> {
        self.lights.get(index)
    }

    /// Number of registered materials.
    pub fn material_count(&self) -> u32 {
        self.materials.len()
    }

    /// Number of lights the shader iterates over (the light high-water mark).
    pub fn light_count(&self) -> u32 {
        self.lights.high_water()
    }

    pub fn max_materials(&self) -> u32 {
        self.materials.capacity()
    }

    pub fn max_lights(&self) -> u32 {
        self.lights.capacity()
    }

    /// Reset per-frame pools.
    pub fn begin_frame(&mut self) {
        if self.lights.lifetime() == PoolLifetime::PerFrame {
            self.lights.clear();
        }
        if self.materials.lifetime() == PoolLifetime::PerFrame {
            self.materials.clear();
        }
    }

    /// Schedule every registered entry for upload.
    pub fn mark_all_dirty(&mut self) {
        self.materials.mark_all_dirty();
        self.lights.mark_all_dirty();
    }

    /// Whether any entry changed since the last [`take_uploads`](Self::take_uploads).
    pub fn has_pending_uploads(&self) -> bool {
        self.materials.dirty().is_some() || self.lights.dirty().is_some()
    }

    /// Take the dirty ranges of both pools.
    pub fn take_uploads(&mut self) -> Vec<PoolUpload> {
        let materials = self.materials.take_dirty().map(|range| PoolUpload {
            pool: PoolKind::Materials,
            range,
        });
        let lights = self.lights.take_dirty().map(|range| PoolUpload {
            pool: PoolKind::Lights,
            range,
        });
        materials.into_iter().chain(lights).collect()
    }

    /// Host bytes of an upload range.
    pub fn upload_bytes(&self, upload: &PoolUpload) -> &[u8] {
        let range = upload.range.clone();
        match upload.pool {
            PoolKind::Materials => bytemuck::cast_slice(self.materials.slice(range)),
            PoolKind::Lights => bytemuck::cast_slice(self.lights.slice(range)),
        }
    }

    /// Device buffer an upload is copied into.
    pub fn upload_target(&self, upload: &PoolUpload) -> Result<&Arc<Buffer>, GraphicsError> {
        match upload.pool {
            PoolKind::Materials => self.material_buffer(),
            PoolKind::Lights => self.light_buffer(),
        }
    }

    /// Check that every draw references a registered material.
    ///
    /// # Errors
    ///
    /// Returns [`GraphicsError::PoolOverflow`] for an index beyond the
    /// material ceiling and [`GraphicsError::InvalidParameter`] for an index
    /// that was never registered.
    pub fn validate_draws(&self, draws: &[DrawCommand]) -> Result<(), GraphicsError> {
        for (i, draw) in draws.iter().enumerate() {
            let index = draw.material_index;
            if index >= self.materials.capacity() {
                return Err(GraphicsError::PoolOverflow {
                    pool: PoolKind::Materials,
                    index,
                    capacity: self.materials.capacity(),
                });
            }
            if !self.materials.contains(index) {
                return Err(GraphicsError::InvalidParameter(format!(
                    "draw {i} references unregistered material {index}"
                )));
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ResourceBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceBinder")
            .field("materials", &self.materials)
            .field("lights", &self.lights)
            .field("bound", &self.material_buffer.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vista_core::math::Vec3;

    fn light(x: f32) -> LightProperties {
        LightProperties::new(Vec3::new(x, 0.0, 0.0), Vec3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn test_register_out_of_range_leaves_pool_unchanged() {
        let mut binder = ResourceBinder::new(4, 4);
        binder
            .register_material(1, MaterialProperties::new([1.0; 4]))
            .unwrap();
        binder.take_uploads();

        let err = binder
            .register_material(4, MaterialProperties::new([0.0; 4]))
            .unwrap_err();
        assert_eq!(
            err,
            GraphicsError::PoolOverflow {
                pool: PoolKind::Materials,
                index: 4,
                capacity: 4
            }
        );
        assert_eq!(binder.material_count(), 1);
        assert!(!binder.has_pending_uploads());
    }

    #[test]
    fn test_register_is_idempotent() {
        let mut binder = ResourceBinder::new(4, 4);
        binder.register_light(2, light(1.0)).unwrap();
        binder.register_light(2, light(2.0)).unwrap();
        assert_eq!(binder.light(2), Some(&light(2.0)));
        assert_eq!(binder.light_count(), 3);
    }

    #[test]
    fn test_push_light_overflow() {
        let mut binder = ResourceBinder::new(1, 2);
        assert_eq!(binder.push_light(light(0.0)).unwrap(), 0);
        assert_eq!(binder.push_light(light(1.0)).unwrap(), 1);
        assert!(matches!(
            binder.push_light(light(2.0)),
            Err(GraphicsError::PoolOverflow {
                pool: PoolKind::Lights,
                ..
            })
        ));
    }

    #[test]
    fn test_begin_frame_clears_lights_only() {
        let mut binder = ResourceBinder::new(4, 4);
        binder
            .register_material(0, MaterialProperties::new([1.0; 4]))
            .unwrap();
        binder.push_light(light(0.0)).unwrap();
        binder.begin_frame();
        assert_eq!(binder.light_count(), 0);
        assert_eq!(binder.material_count(), 1);
    }

    #[test]
    fn test_uploads_cover_dirty_ranges() {
        let mut binder = ResourceBinder::new(8, 8);
        binder
            .register_material(2, MaterialProperties::new([0.5; 4]))
            .unwrap();
        binder
            .register_material(5, MaterialProperties::new([0.25; 4]))
            .unwrap();
        binder.push_light(light(3.0)).unwrap();

        let uploads = binder.take_uploads();
        assert_eq!(
            uploads,
            vec![
                PoolUpload {
                    pool: PoolKind::Materials,
                    range: 0..6
                },
                PoolUpload {
                    pool: PoolKind::Lights,
                    range: 0..1
                },
            ]
        );
        assert_eq!(uploads[0].byte_offset(), 0);
        assert_eq!(uploads[0].byte_size(), 288);
        assert_eq!(binder.upload_bytes(&uploads[0]).len(), 288);
        assert_eq!(
            binder.upload_bytes(&uploads[1]),
            bytemuck::bytes_of(&light(3.0))
        );
        assert!(binder.take_uploads().is_empty());

        // Below the high-water mark only the written slot is uploaded.
        binder
            .register_material(3, MaterialProperties::new([1.0; 4]))
            .unwrap();
        let uploads = binder.take_uploads();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].range, 3..4);
        assert_eq!(uploads[0].byte_offset(), 144);

        binder.mark_all_dirty();
        assert_eq!(binder.take_uploads()[0].range, 0..6);
    }

    #[test]
    fn test_validate_draws() {
        let mut binder = ResourceBinder::new(4, 4);
        binder
            .register_material(1, MaterialProperties::new([1.0; 4]))
            .unwrap();
        assert!(binder.validate_draws(&[DrawCommand::new(3, 1)]).is_ok());
        assert!(matches!(
            binder.validate_draws(&[DrawCommand::new(3, 0)]),
            Err(GraphicsError::InvalidParameter(_))
        ));
        assert!(matches!(
            binder.validate_draws(&[DrawCommand::new(3, 4)]),
            Err(GraphicsError::PoolOverflow { index: 4, .. })
        ));
    }

    #[test]
    fn test_unbound_buffers_error() {
        let binder = ResourceBinder::new(4, 4);
        assert!(binder.material_buffer().is_err());
        assert!(binder.light_buffer().is_err());
    }
}
