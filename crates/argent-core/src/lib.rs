//! argent-core - Foundation types for the develop engine
//!
//! This crate provides the fundamental types used throughout argent:
//! - The unified error taxonomy
//! - Pixel buffers and regions of interest
//! - Image handles with capture metadata
//! - Cooperative cancellation
//! - The rolling 64-bit hash used for fingerprints and content hashes

pub mod buffer;
pub mod cancel;
pub mod error;
pub mod geometry;
pub mod hash;
pub mod image;

pub use buffer::{BufferColorSpace, PixelBuffer, SharedPixelBuffer};
pub use cancel::CancelToken;
pub use error::{DevelopError, Result};
pub use geometry::Roi;
pub use hash::Hasher64;
pub use image::{image_flags, ImageId, ImageInfo};
