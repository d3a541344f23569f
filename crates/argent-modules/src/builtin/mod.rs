//! Built-in operations.
//!
//! The engine ships a small set of operations covering every contract
//! path: mandatory sensor preparation, a versioned tonal adjustment, a
//! geometric transform, a retouch module with masks, and the hidden
//! display transform. Their pixel math is deliberately plain; anything
//! fancier is an external module.

mod colorout;
mod exposure;
mod flip;
mod gamma;
mod mask_manager;
mod rawprepare;
mod sharpen;
mod spots;

pub use colorout::Colorout;
pub use exposure::{ExposureParams, ExposureParamsV1, Exposure, EXPOSURE_VERSION};
pub use flip::{Flip, FlipParams, Orientation, FLIP_VERSION};
pub use gamma::Gamma;
pub use mask_manager::MaskManager;
pub use rawprepare::{RawPrepare, RawPrepareParams};
pub use sharpen::{Sharpen, SharpenParams};
pub use spots::{Spot, Spots, SpotsParams, SpotsParamsV1, SPOTS_VERSION};

use std::sync::Arc;

use crate::operation::Operation;

/// Every built-in, ready for registration.
pub fn all() -> Vec<Arc<dyn Operation>> {
    vec![
        Arc::new(RawPrepare::new()),
        Arc::new(Exposure::new()),
        Arc::new(Spots::new()),
        Arc::new(Flip::new()),
        Arc::new(Sharpen::new()),
        Arc::new(Colorout::new()),
        Arc::new(Gamma::new()),
        Arc::new(MaskManager::new()),
    ]
}
