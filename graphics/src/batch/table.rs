//! In-flight slot table.

use std::sync::Arc;

use crate::device::GraphicsDevice;
use crate::error::GraphicsError;
use crate::resources::{Buffer, Image};
use crate::types::{
    AtlasLayout, BufferDescriptor, ImageDescriptor, ImageFormat, ImageUsage, ViewInfo,
};

use super::BatchId;

struct Slot {
    atlas: Arc<Image>,
    readback: Arc<Buffer>,
    occupant: Option<BatchId>,
}

/// Fixed set of slots a batch occupies while on the device.
///
/// Slot `s` owns views `s * images_per_fb .. (s + 1) * images_per_fb` of the
/// shared view buffer, one atlas image, and one host-readable readback
/// buffer. All of it is allocated once, up front.
pub struct SlotTable {
    layout: AtlasLayout,
    views: Arc<Buffer>,
    slots: Vec<Slot>,
}

impl SlotTable {
    /// Allocate `capacity` slots for atlases of `layout`.
    ///
    /// # Errors
    ///
    /// Returns an error if `capacity` is zero or resource creation fails.
    pub fn new(
        device: &Arc<GraphicsDevice>,
        layout: AtlasLayout,
        capacity: u32,
    ) -> Result<Self, GraphicsError> {
        if capacity == 0 {
            return Err(GraphicsError::InvalidParameter(
                "slot table capacity cannot be zero".to_string(),
            ));
        }

        let view_bytes = capacity as u64 * layout.images_per_fb() as u64 * ViewInfo::SIZE;
        let views =
            device.create_buffer(&BufferDescriptor::storage(view_bytes).with_label("views"))?;

        let extent = layout.extent();
        let atlas_usage =
            ImageUsage::RENDER_ATTACHMENT | ImageUsage::COPY_SRC | ImageUsage::COPY_DST;
        let slots = (0..capacity)
            .map(|slot| {
                let atlas = device.create_image(
                    &ImageDescriptor::new_2d(
                        extent.width,
                        extent.height,
                        ImageFormat::Rgba8Unorm,
                        atlas_usage,
                    )
                    .with_label(format!("atlas_{slot}")),
                )?;
                let readback = device.create_buffer(
                    &BufferDescriptor::readback(layout.readback_size())
                        .with_label(format!("readback_{slot}")),
                )?;
                Ok(Slot {
                    atlas,
                    readback,
                    occupant: None,
                })
            })
            .collect::<Result<Vec<_>, GraphicsError>>()?;

        log::debug!(
            "SlotTable: {} slot(s), atlas {}x{}",
            capacity,
            extent.width,
            extent.height
        );

        Ok(Self {
            layout,
            views,
            slots,
        })
    }

    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    pub fn layout(&self) -> &AtlasLayout {
        &self.layout
    }

    /// Number of occupied slots.
    pub fn in_flight(&self) -> u32 {
        self.slots.iter().filter(|s| s.occupant.is_some()).count() as u32
    }

    /// Lowest free slot.
    pub fn acquire_free(&self) -> Option<u32> {
        self.slots
            .iter()
            .position(|s| s.occupant.is_none())
            .map(|i| i as u32)
    }

    /// Mark `slot` as used by `batch`.
    pub fn occupy(&mut self, slot: u32, batch: BatchId) {
        let entry = &mut self.slots[slot as usize];
        debug_assert!(entry.occupant.is_none(), "slot {slot} already occupied");
        entry.occupant = Some(batch);
    }

    /// Free `slot`, returning the batch that held it.
    pub fn release(&mut self, slot: u32) -> Option<BatchId> {
        self.slots
            .get_mut(slot as usize)
            .and_then(|s| s.occupant.take())
    }

    /// Batch occupying `slot`.
    pub fn occupant(&self, slot: u32) -> Option<BatchId> {
        self.slots.get(slot as usize).and_then(|s| s.occupant)
    }

    /// Occupied slot holding the lowest batch id.
    pub fn oldest_in_flight(&self) -> Option<(u32, BatchId)> {
        self.occupied().min_by_key(|&(_, batch)| batch)
    }

    /// Occupied slots as `(slot, batch)`.
    pub fn occupied(&self) -> impl Iterator<Item = (u32, BatchId)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.occupant.map(|b| (i as u32, b)))
    }

    /// View buffer shared by all slots.
    pub fn view_buffer(&self) -> &Arc<Buffer> {
        &self.views
    }

    /// Byte offset of `slot`'s first view in the view buffer.
    pub fn view_offset(&self, slot: u32) -> u64 {
        slot as u64 * self.layout.images_per_fb() as u64 * ViewInfo::SIZE
    }

    pub fn atlas(&self, slot: u32) -> &Arc<Image> {
        &self.slots[slot as usize].atlas
    }

    pub fn readback(&self, slot: u32) -> &Arc<Buffer> {
        &self.slots[slot as usize].readback
    }
}

impl std::fmt::Debug for SlotTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotTable")
            .field("capacity", &self.capacity())
            .field("in_flight", &self.in_flight())
            .field("layout", &self.layout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::instance::{BackendType, GraphicsInstance, InstanceParameters};
    use crate::types::Extent2d;

    fn create_table(capacity: u32) -> SlotTable {
        let instance =
            GraphicsInstance::new(InstanceParameters::new().with_backend(BackendType::Dummy))
                .unwrap();
        let device = instance.create_device(0, &QueueConfig::default()).unwrap();
        SlotTable::new(&device, AtlasLayout::new(4, Extent2d::new(8, 8)), capacity).unwrap()
    }

    #[test]
    fn test_resources_per_slot() {
        let table = create_table(3);
        assert_eq!(table.capacity(), 3);
        assert_eq!(table.view_buffer().size(), 3 * 4 * 128);
        assert_eq!(table.view_offset(2), 2 * 4 * 128);
        assert_eq!(table.atlas(0).extent(), Extent2d::new(16, 16));
        assert_eq!(table.readback(1).size(), 4 * 8 * 8 * 4);
    }

    #[test]
    fn test_occupy_and_release() {
        let mut table = create_table(2);
        let slot = table.acquire_free().unwrap();
        table.occupy(slot, BatchId::new(5));
        let other = table.acquire_free().unwrap();
        assert_ne!(slot, other);
        table.occupy(other, BatchId::new(6));

        assert_eq!(table.acquire_free(), None);
        assert_eq!(table.in_flight(), 2);
        assert_eq!(table.oldest_in_flight(), Some((slot, BatchId::new(5))));

        assert_eq!(table.release(slot), Some(BatchId::new(5)));
        assert_eq!(table.release(slot), None);
        assert_eq!(table.acquire_free(), Some(slot));
        assert_eq!(table.oldest_in_flight(), Some((other, BatchId::new(6))));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let instance =
            GraphicsInstance::new(InstanceParameters::new().with_backend(BackendType::Dummy))
                .unwrap();
        let device = instance.create_device(0, &QueueConfig::default()).unwrap();
        let result = SlotTable::new(&device, AtlasLayout::new(4, Extent2d::new(8, 8)), 0);
        assert!(result.is_err());
    }
}
