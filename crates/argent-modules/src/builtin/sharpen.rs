//! Unsharp-mask sharpening.

use bytemuck::{Pod, Zeroable};

use argent_core::{PixelBuffer, Result, Roi};

use crate::blend::default_blend_bytes;
use crate::descriptor::{OpDescriptor, OpFlags};
use crate::operation::{Operation, ProcessContext, ProcessStatus, CANCEL_POLL_ROWS};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct SharpenParams {
    pub radius: f32,
    pub amount: f32,
}

impl Default for SharpenParams {
    fn default() -> Self {
        Self {
            radius: 2.0,
            amount: 0.5,
        }
    }
}

pub struct Sharpen {
    desc: OpDescriptor,
}

impl Sharpen {
    pub fn new() -> Self {
        Self {
            desc: OpDescriptor {
                op: "sharpen",
                version: 1,
                params_size: std::mem::size_of::<SharpenParams>(),
                default_params: bytemuck::bytes_of(&SharpenParams::default()).to_vec(),
                default_blend_params: default_blend_bytes(),
                flags: OpFlags::SUPPORTS_BLENDING | OpFlags::ALLOW_TILING,
            },
        }
    }
}

impl Default for Sharpen {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for Sharpen {
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
        let p: SharpenParams = bytemuck::pod_read_unaligned(params);
        let w = roi_out.width as usize;
        for y in 0..roi_out.height {
            if y % CANCEL_POLL_ROWS == 0 && ctx.shutdown.is_cancelled() {
                return Ok(ProcessStatus::Interrupted);
            }
            let src = input.row(y);
            let dst = output.row_mut(y);
            for x in 0..w {
                let i = x * PixelBuffer::CHANNELS;
                let left = x.saturating_sub(1) * PixelBuffer::CHANNELS;
                let right = (x + 1).min(w - 1) * PixelBuffer::CHANNELS;
                for c in 0..3 {
                    let blur = 0.25 * src[left + c] + 0.5 * src[i + c] + 0.25 * src[right + c];
                    dst[i + c] = src[i + c] + p.amount * (src[i + c] - blur);
                }
                dst[i + 3] = src[i + 3];
            }
        }
        Ok(ProcessStatus::Complete)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argent_core::{BufferColorSpace, CancelToken};

    #[test]
    fn test_flat_region_unchanged() {
        let op = Sharpen::new();
        let mut input = PixelBuffer::new(8, 2, BufferColorSpace::Linear);
        input.data_mut().fill(0.5);
        let mut output = PixelBuffer::new(8, 2, BufferColorSpace::Linear);
        let token = CancelToken::new();
        op.process(
            &op.descriptor().default_params.clone(),
            &default_blend_bytes(),
            &input,
            &mut output,
            Roi::full(8, 2),
            Roi::full(8, 2),
            &ProcessContext::new(&token),
        )
        .unwrap();
        for v in output.data() {
            assert!((v - 0.5).abs() < 1e-6);
        }
    }
}
