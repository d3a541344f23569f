//! Orientation flips and 180° rotation.
//!
//! The only geometric built-in; its distort pair is what exercises the
//! pipeline's forward/backward point mapping.

use bytemuck::{Pod, Zeroable};

use argent_core::{PixelBuffer, Result, Roi};

use crate::blend::default_blend_bytes;
use crate::descriptor::{OpDescriptor, OpFlags};
use crate::operation::{Operation, ProcessContext, ProcessStatus, CANCEL_POLL_ROWS};

pub const FLIP_VERSION: i32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    None,
    Horizontal,
    Vertical,
    Rotate180,
}

impl Orientation {
    pub fn from_raw(v: u32) -> Self {
        match v {
            1 => Self::Horizontal,
            2 => Self::Vertical,
            3 => Self::Rotate180,
            _ => Self::None,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct FlipParams {
    /// 0 = none, 1 = horizontal, 2 = vertical, 3 = 180°.
    pub orientation: u32,
}

pub struct Flip {
    desc: OpDescriptor,
}

impl Flip {
    pub fn new() -> Self {
        Self {
            desc: OpDescriptor {
                op: "flip",
                version: FLIP_VERSION,
                params_size: std::mem::size_of::<FlipParams>(),
                default_params: bytemuck::bytes_of(&FlipParams::default()).to_vec(),
                default_blend_params: default_blend_bytes(),
                flags: OpFlags::ONE_INSTANCE,
            },
        }
    }
}

impl Default for Flip {
    fn default() -> Self {
        Self::new()
    }
}

fn flip_point(orientation: Orientation, width: f32, height: f32, x: f32, y: f32) -> (f32, f32) {
    match orientation {
        Orientation::None => (x, y),
        Orientation::Horizontal => (width - x, y),
        Orientation::Vertical => (x, height - y),
        Orientation::Rotate180 => (width - x, height - y),
    }
}

impl Operation for Flip {
    fn descriptor(&self) -> &OpDescriptor {
        &self.desc
    }

    fn process(
        &self,
        params: &[u8],
        _blend_params: &[u8],
        input: &PixelBuffer,
        output: &mut PixelBuffer,
        _roi_in: Roi,
        roi_out: Roi,
        ctx: &ProcessContext<'_>,
    ) -> Result<ProcessStatus> {
        let p: FlipParams = bytemuck::pod_read_unaligned(params);
        let orientation = Orientation::from_raw(p.orientation);
        let (w, h) = (roi_out.width, roi_out.height);
        for y in 0..h {
            if y % CANCEL_POLL_ROWS == 0 && ctx.shutdown.is_cancelled() {
                return Ok(ProcessStatus::Interrupted);
            }
            let sy = match orientation {
                Orientation::Vertical | Orientation::Rotate180 => h - 1 - y,
                _ => y,
            };
            let src = input.row(sy);
            let dst = output.row_mut(y);
            for x in 0..w as usize {
                let sx = match orientation {
                    Orientation::Horizontal | Orientation::Rotate180 => w as usize - 1 - x,
                    _ => x,
                };
                let di = x * PixelBuffer::CHANNELS;
                let si = sx * PixelBuffer::CHANNELS;
                dst[di..di + PixelBuffer::CHANNELS]
                    .copy_from_slice(&src[si..si + PixelBuffer::CHANNELS]);
            }
        }
        Ok(ProcessStatus::Complete)
    }

    fn distort_transform(&self, params: &[u8], width: u32, height: u32, points: &mut [f32]) {
        let p: FlipParams = bytemuck::pod_read_unaligned(params);
        let orientation = Orientation::from_raw(p.orientation);
        for pt in points.chunks_exact_mut(2) {
            let (x, y) = flip_point(orientation, width as f32, height as f32, pt[0], pt[1]);
            pt[0] = x;
            pt[1] = y;
        }
    }

    fn distort_backtransform(&self, params: &[u8], width: u32, height: u32, points: &mut [f32]) {
        // All four orientations are involutions.
        self.distort_transform(params, width, height, points);
    }

    fn legacy_params(&self, _old_params: &[u8], old_version: i32) -> Result<(Vec<u8>, i32)> {
        // Version 1 stored the orientation in image metadata; the entry is
        // rebuilt from defaults and force-enabled by the loader.
        if old_version == 1 {
            Ok((
                bytemuck::bytes_of(&FlipParams::default()).to_vec(),
                FLIP_VERSION,
            ))
        } else {
            Err(argent_core::DevelopError::LegacyMigrationFailed {
                op: "flip".into(),
                stored: old_version,
                current: FLIP_VERSION,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argent_core::{BufferColorSpace, CancelToken};

    fn run(orientation: u32, input: &PixelBuffer) -> PixelBuffer {
        let op = Flip::new();
        let mut output = PixelBuffer::new(input.width, input.height, input.colorspace);
        let params = FlipParams { orientation };
        let token = CancelToken::new();
        let status = op
            .process(
                bytemuck::bytes_of(&params),
                &default_blend_bytes(),
                input,
                &mut output,
                Roi::full(input.width, input.height),
                Roi::full(input.width, input.height),
                &ProcessContext::new(&token),
            )
            .unwrap();
        assert_eq!(status, ProcessStatus::Complete);
        output
    }

    #[test]
    fn test_horizontal_flip_mirrors_row() {
        let mut input = PixelBuffer::new(4, 1, BufferColorSpace::Linear);
        for x in 0..4 {
            input.row_mut(0)[x * 4] = x as f32;
        }
        let out = run(1, &input);
        assert_eq!(out.row(0)[0], 3.0);
        assert_eq!(out.row(0)[3 * 4], 0.0);
    }

    #[test]
    fn test_rotate180_is_involution() {
        let input = PixelBuffer::gradient(8, 6);
        let once = run(3, &input);
        let twice = run(3, &once);
        assert_eq!(twice.data(), input.data());
    }

    #[test]
    fn test_distort_roundtrip() {
        let op = Flip::new();
        let params = FlipParams { orientation: 1 };
        let bytes = bytemuck::bytes_of(&params).to_vec();
        let mut pts = [10.0, 20.0, 90.0, 40.0];
        op.distort_transform(&bytes, 100, 50, &mut pts);
        assert_eq!(pts, [90.0, 20.0, 10.0, 40.0]);
        op.distort_backtransform(&bytes, 100, 50, &mut pts);
        assert_eq!(pts, [10.0, 20.0, 90.0, 40.0]);
    }
}
