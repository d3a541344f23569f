//! Image handles and capture metadata.
//!
//! The handle is opaque to the engine; the metadata is what the preset
//! resolver matches against and what `reload_defaults` hooks may consult.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Flag bits stored in the image record. The `AUTO_PRESETS_*` bits drive
/// the exactly-once preset application.
pub mod image_flags {
    pub const RAW: u32 = 1 << 0;
    pub const LDR: u32 = 1 << 1;
    pub const HDR: u32 = 1 << 2;
    pub const MONOCHROME: u32 = 1 << 3;
    pub const AUTO_PRESETS_APPLIED: u32 = 1 << 4;
    pub const NO_LEGACY_PRESETS: u32 = 1 << 5;
    pub const AUTO_PRESETS_APPLIED_SET_ONCE: u32 = 1 << 6;
}

/// Opaque image identifier, matching the relational store's primary key.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
pub struct ImageId(pub i32);

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Immutable capture metadata plus the mutable flag word.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageInfo {
    pub id: ImageId,
    pub width: u32,
    pub height: u32,
    pub maker: String,
    pub model: String,
    /// Normalized camera name used by preset selectors alongside the
    /// exact model string.
    pub camera_alias: String,
    pub lens: String,
    pub iso: f32,
    /// Exposure time in seconds.
    pub exposure: f32,
    pub aperture: f32,
    pub focal_length: f32,
    pub flags: u32,
    /// Unix timestamp of the last edit, mirrored into the store.
    pub change_timestamp: i64,
}

impl ImageInfo {
    pub fn is_raw(&self) -> bool {
        self.flags & image_flags::RAW != 0
    }

    pub fn is_monochrome(&self) -> bool {
        self.flags & image_flags::MONOCHROME != 0
    }

    pub fn auto_presets_applied(&self) -> bool {
        self.flags & image_flags::AUTO_PRESETS_APPLIED != 0
    }

    pub fn set_flag(&mut self, bit: u32) {
        self.flags |= bit;
    }

    pub fn clear_flag(&mut self, bit: u32) {
        self.flags &= !bit;
    }

    /// A plausible raw test image. Metadata chosen so preset selectors
    /// with maker/model/ISO ranges have something to match.
    pub fn test_image(id: i32) -> Self {
        Self {
            id: ImageId(id),
            width: 6000,
            height: 4000,
            maker: "ACME".into(),
            model: "ACME X-1".into(),
            camera_alias: "X-1".into(),
            lens: "ACME 35mm f/1.8".into(),
            iso: 200.0,
            exposure: 1.0 / 125.0,
            aperture: 5.6,
            focal_length: 35.0,
            flags: image_flags::RAW,
            change_timestamp: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_accessors() {
        let mut img = ImageInfo::test_image(1);
        assert!(img.is_raw());
        assert!(!img.auto_presets_applied());
        img.set_flag(image_flags::AUTO_PRESETS_APPLIED);
        assert!(img.auto_presets_applied());
        img.clear_flag(image_flags::AUTO_PRESETS_APPLIED);
        assert!(!img.auto_presets_applied());
    }
}
