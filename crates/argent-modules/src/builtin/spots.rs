//! Spot removal: clones circular patches from a source offset.
//!
//! The retouch module with drawn-mask support; also the operation whose
//! legacy history needs the loader's blend-parameter special case.

use bytemuck::{Pod, Zeroable};

use argent_core::{PixelBuffer, Result, Roi};

use crate::blend::default_blend_bytes;
use crate::descriptor::{OpDescriptor, OpFlags};
use crate::operation::{Operation, ProcessContext, ProcessStatus, CANCEL_POLL_ROWS};

pub const SPOTS_VERSION: i32 = 2;
pub const MAX_SPOTS: usize = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct Spot {
    /// Center, normalized to [0, 1].
    pub x: f32,
    pub y: f32,
    /// Radius, normalized to image width.
    pub radius: f32,
    /// Clone-source offset, normalized.
    pub dx: f32,
    pub dy: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct SpotsParams {
    pub count: u32,
    pub spots: [Spot; MAX_SPOTS],
}

/// Version 1 held two spots.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct SpotsParamsV1 {
    pub count: u32,
    pub spots: [Spot; 2],
}

pub struct Spots {
    desc: OpDescriptor,
}

impl Spots {
    pub fn new() -> Self {
        Self {
            desc: OpDescriptor {
                op: "spots",
                version: SPOTS_VERSION,
                params_size: std::mem::size_of::<SpotsParams>(),
                default_params: bytemuck::bytes_of(&SpotsParams::default()).to_vec(),
                default_blend_params: default_blend_bytes(),
                flags: OpFlags::SUPPORTS_BLENDING,
            },
        }
    }
}

impl Default for Spots {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for Spots {
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
        let p: SpotsParams = bytemuck::pod_read_unaligned(params);
        let w = roi_out.width;
        let h = roi_out.height;
        for y in 0..h {
            if y % CANCEL_POLL_ROWS == 0 && ctx.shutdown.is_cancelled() {
                return Ok(ProcessStatus::Interrupted);
            }
            let dst = output.row_mut(y);
            dst.copy_from_slice(input.row(y));
        }
        for spot in p.spots.iter().take(p.count.min(MAX_SPOTS as u32) as usize) {
            let cx = spot.x * w as f32;
            let cy = spot.y * h as f32;
            let r = spot.radius * w as f32;
            let y0 = ((cy - r).floor().max(0.0)) as u32;
            let y1 = ((cy + r).ceil() as u32).min(h);
            for y in y0..y1 {
                if ctx.shutdown.is_cancelled() {
                    return Ok(ProcessStatus::Interrupted);
                }
                let sy = ((y as f32 + spot.dy * h as f32) as i64).clamp(0, h as i64 - 1) as u32;
                let src_row: Vec<f32> = input.row(sy).to_vec();
                let dst = output.row_mut(y);
                let x0 = ((cx - r).floor().max(0.0)) as usize;
                let x1 = ((cx + r).ceil() as usize).min(w as usize);
                for x in x0..x1 {
                    let dxp = x as f32 - cx;
                    let dyp = y as f32 - cy;
                    if dxp * dxp + dyp * dyp > r * r {
                        continue;
                    }
                    let sx =
                        ((x as f32 + spot.dx * w as f32) as i64).clamp(0, w as i64 - 1) as usize;
                    let di = x * PixelBuffer::CHANNELS;
                    let si = sx * PixelBuffer::CHANNELS;
                    dst[di..di + PixelBuffer::CHANNELS]
                        .copy_from_slice(&src_row[si..si + PixelBuffer::CHANNELS]);
                }
            }
        }
        Ok(ProcessStatus::Complete)
    }

    fn legacy_params(&self, old_params: &[u8], old_version: i32) -> Result<(Vec<u8>, i32)> {
        match old_version {
            1 if old_params.len() == std::mem::size_of::<SpotsParamsV1>() => {
                let old: SpotsParamsV1 = bytemuck::pod_read_unaligned(old_params);
                let mut new = SpotsParams {
                    count: old.count.min(2),
                    ..Default::default()
                };
                new.spots[..2].copy_from_slice(&old.spots);
                Ok((bytemuck::bytes_of(&new).to_vec(), SPOTS_VERSION))
            }
            _ => Err(argent_core::DevelopError::LegacyMigrationFailed {
                op: "spots".into(),
                stored: old_version,
                current: SPOTS_VERSION,
            }),
        }
    }
}
