//! Regions of interest in pipeline-local coordinates.

use serde::{Deserialize, Serialize};

/// A rectangle in pipeline-local coordinates plus the scale of the
/// coordinate system relative to the full-resolution image.
///
/// `scale` is 1.0 for the full pipeline and < 1.0 for downsampled
/// preview pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Roi {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
}

impl Roi {
    pub fn new(x: i32, y: i32, width: u32, height: u32, scale: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            scale,
        }
    }

    /// The full extent of a buffer at scale 1.0.
    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height, 1.0)
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Clamp this roi so it fits inside an image of the given dimensions
    /// (in this roi's coordinate system).
    pub fn clamped_to(&self, img_width: u32, img_height: u32) -> Self {
        let x = self.x.clamp(0, img_width.saturating_sub(1) as i32);
        let y = self.y.clamp(0, img_height.saturating_sub(1) as i32);
        let width = self.width.min(img_width.saturating_sub(x as u32));
        let height = self.height.min(img_height.saturating_sub(y as u32));
        Self {
            x,
            y,
            width,
            height,
            scale: self.scale,
        }
    }

    /// Whether two rois describe the same pixels (scale compared exactly;
    /// the fingerprint fold does the same).
    pub fn same_region(&self, other: &Roi) -> bool {
        self.x == other.x
            && self.y == other.y
            && self.width == other.width
            && self.height == other.height
            && self.scale.to_bits() == other.scale.to_bits()
    }
}
