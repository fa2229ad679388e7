//! Framebuffer atlas geometry.
//!
//! A batch renders all of its views into one atlas image arranged as a grid of
//! equally sized regions. With `n` views per framebuffer the grid has
//! `columns = ceil(sqrt(n))` and `rows = ceil(n / columns)`, and view slot `s`
//! sits at column `s % columns`, row `s / columns`.

use serde::Deserialize;

/// Bytes per atlas texel (RGBA8).
pub const ATLAS_BYTES_PER_TEXEL: u32 = 4;

/// Width and height in texels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
pub struct Extent2d {
    pub width: u32,
    pub height: u32,
}

impl Extent2d {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Number of texels.
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// A rectangle inside the atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    /// Size of the region's texels when tightly packed.
    pub fn byte_size(&self) -> u64 {
        self.width as u64 * self.height as u64 * ATLAS_BYTES_PER_TEXEL as u64
    }
}

/// Grid placement of view regions in a batch atlas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AtlasLayout {
    images_per_fb: u32,
    columns: u32,
    rows: u32,
    view_extent: Extent2d,
}

impl AtlasLayout {
    /// Lay out `images_per_fb` views of `view_extent` each.
    pub fn new(images_per_fb: u32, view_extent: Extent2d) -> Self {
        let images_per_fb = images_per_fb.max(1);
        let columns = ceil_sqrt(images_per_fb);
        let rows = images_per_fb.div_ceil(columns);
        Self {
            images_per_fb,
            columns,
            rows,
            view_extent,
        }
    }

    pub fn images_per_fb(&self) -> u32 {
        self.images_per_fb
    }

    pub fn columns(&self) -> u32 {
        self.columns
    }

    pub fn rows(&self) -> u32 {
        self.rows
    }

    pub fn view_extent(&self) -> Extent2d {
        self.view_extent
    }

    /// Size of the whole atlas image.
    ///
    /// Saturates at `u32::MAX` per axis; see [`checked_extent`](Self::checked_extent).
    pub fn extent(&self) -> Extent2d {
        Extent2d::new(
            self.columns.saturating_mul(self.view_extent.width),
            self.rows.saturating_mul(self.view_extent.height),
        )
    }

    /// Size of the whole atlas image, or `None` if an axis overflows `u32`.
    pub fn checked_extent(&self) -> Option<Extent2d> {
        Some(Extent2d::new(
            self.columns.checked_mul(self.view_extent.width)?,
            self.rows.checked_mul(self.view_extent.height)?,
        ))
    }

    /// Region of view slot `slot`.
    pub fn region(&self, slot: u32) -> Region {
        debug_assert!(slot < self.images_per_fb);
        Region {
            x: (slot % self.columns) * self.view_extent.width,
            y: (slot / self.columns) * self.view_extent.height,
            width: self.view_extent.width,
            height: self.view_extent.height,
        }
    }

    /// Bytes of one view when read back tightly packed.
    pub fn view_bytes(&self) -> u64 {
        self.view_extent.area() * ATLAS_BYTES_PER_TEXEL as u64
    }

    /// Offset of view slot `slot` in a readback buffer.
    pub fn readback_offset(&self, slot: u32) -> u64 {
        slot as u64 * self.view_bytes()
    }

    /// Size of a readback buffer holding every view of a full batch.
    pub fn readback_size(&self) -> u64 {
        self.images_per_fb as u64 * self.view_bytes()
    }
}

fn ceil_sqrt(n: u32) -> u32 {
    let mut root = (n as f64).sqrt() as u32;
    while root * root < n {
        root += 1;
    }
    while root > 1 && (root - 1) * (root - 1) >= n {
        root -= 1;
    }
    root.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ceil_sqrt() {
        assert_eq!(ceil_sqrt(1), 1);
        assert_eq!(ceil_sqrt(2), 2);
        assert_eq!(ceil_sqrt(4), 2);
        assert_eq!(ceil_sqrt(5), 3);
        assert_eq!(ceil_sqrt(64), 8);
        assert_eq!(ceil_sqrt(65), 9);
    }

    #[test]
    fn test_full_framebuffer_layout() {
        let layout = AtlasLayout::new(64, Extent2d::new(32, 16));
        assert_eq!(layout.columns(), 8);
        assert_eq!(layout.rows(), 8);
        assert_eq!(layout.extent(), Extent2d::new(256, 128));
        assert_eq!(
            layout.region(9),
            Region {
                x: 32,
                y: 16,
                width: 32,
                height: 16
            }
        );
    }

    #[test]
    fn test_non_square_layout() {
        let layout = AtlasLayout::new(6, Extent2d::new(10, 10));
        assert_eq!(layout.columns(), 3);
        assert_eq!(layout.rows(), 2);
        assert_eq!(layout.region(5).x, 20);
        assert_eq!(layout.region(5).y, 10);
    }

    #[test]
    fn test_regions_do_not_overlap() {
        let layout = AtlasLayout::new(10, Extent2d::new(4, 4));
        let extent = layout.extent();
        let mut covered = vec![false; extent.area() as usize];
        for slot in 0..layout.images_per_fb() {
            let r = layout.region(slot);
            for y in r.y..r.y + r.height {
                for x in r.x..r.x + r.width {
                    let i = (y * extent.width + x) as usize;
                    assert!(!covered[i], "slot {slot} overlaps at ({x}, {y})");
                    covered[i] = true;
                }
            }
        }
    }

    #[test]
    fn test_checked_extent_overflow() {
        let layout = AtlasLayout::new(64, Extent2d::new(u32::MAX / 4, 8));
        assert_eq!(layout.checked_extent(), None);
        assert_eq!(layout.extent().width, u32::MAX);

        let layout = AtlasLayout::new(64, Extent2d::new(16, 8));
        assert_eq!(layout.checked_extent(), Some(Extent2d::new(128, 64)));
    }

    #[test]
    fn test_readback_offsets() {
        let layout = AtlasLayout::new(4, Extent2d::new(2, 3));
        assert_eq!(layout.view_bytes(), 24);
        assert_eq!(layout.readback_offset(3), 72);
        assert_eq!(layout.readback_size(), 96);
    }
}
