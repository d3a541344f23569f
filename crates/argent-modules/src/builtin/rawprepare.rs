//! Sensor preparation: black-level subtraction and white-point scaling.
//!
//! Mandatory: always enabled, toggle hidden, first in every ordering.

use bytemuck::{Pod, Zeroable};

use argent_core::{ImageInfo, PixelBuffer, Result, Roi};

use crate::blend::default_blend_bytes;
use crate::descriptor::{OpDescriptor, OpFlags};
use crate::operation::{Operation, ProcessContext, ProcessStatus, CANCEL_POLL_ROWS};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct RawPrepareParams {
    pub black_level: f32,
    pub white_point: f32,
}

impl Default for RawPrepareParams {
    fn default() -> Self {
        Self {
            black_level: 0.0,
            white_point: 1.0,
        }
    }
}

pub struct RawPrepare {
    desc: OpDescriptor,
}

impl RawPrepare {
    pub fn new() -> Self {
        Self {
            desc: OpDescriptor {
                op: "rawprepare",
                version: 1,
                params_size: std::mem::size_of::<RawPrepareParams>(),
                default_params: bytemuck::bytes_of(&RawPrepareParams::default()).to_vec(),
                default_blend_params: default_blend_bytes(),
                flags: OpFlags::DEFAULT_ENABLED
                    | OpFlags::HIDE_ENABLE_BUTTON
                    | OpFlags::ONE_INSTANCE
                    | OpFlags::ALLOW_TILING,
            },
        }
    }
}

impl Default for RawPrepare {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for RawPrepare {
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
        let p: RawPrepareParams = bytemuck::pod_read_unaligned(params);
        let range = (p.white_point - p.black_level).max(f32::EPSILON);
        for y in 0..roi_out.height {
            if y % CANCEL_POLL_ROWS == 0 && ctx.shutdown.is_cancelled() {
                return Ok(ProcessStatus::Interrupted);
            }
            let src = input.row(y);
            let dst = output.row_mut(y);
            for x in 0..roi_out.width as usize {
                let i = x * PixelBuffer::CHANNELS;
                for c in 0..3 {
                    dst[i + c] = (src[i + c] - p.black_level) / range;
                }
                dst[i + 3] = src[i + 3];
            }
        }
        Ok(ProcessStatus::Complete)
    }

    fn reload_defaults(&self, image: &ImageInfo) -> Option<Vec<u8>> {
        if !image.is_raw() {
            // LDR sources arrive already normalized.
            return None;
        }
        // Sensor floor scales with ISO on this simplified model.
        let params = RawPrepareParams {
            black_level: 0.002 * (image.iso / 100.0).max(1.0).log2().max(1.0),
            white_point: 1.0,
        };
        Some(bytemuck::bytes_of(&params).to_vec())
    }
}
