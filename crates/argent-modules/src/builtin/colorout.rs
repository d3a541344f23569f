//! Output color transform.
//!
//! Enabled by default but user-toggleable, which makes it the "always-on"
//! operation the history sweep must preserve.

use bytemuck::{Pod, Zeroable};

use argent_core::{BufferColorSpace, PixelBuffer, Result, Roi};

use crate::blend::default_blend_bytes;
use crate::descriptor::{OpDescriptor, OpFlags};
use crate::operation::{Operation, ProcessContext, ProcessStatus, CANCEL_POLL_ROWS};

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Default, Pod, Zeroable)]
pub struct ColoroutParams {
    /// Rendering intent: 0 = perceptual, 1 = relative colorimetric.
    pub intent: u32,
}

pub struct Colorout {
    desc: OpDescriptor,
}

impl Colorout {
    pub fn new() -> Self {
        Self {
            desc: OpDescriptor {
                op: "colorout",
                version: 1,
                params_size: std::mem::size_of::<ColoroutParams>(),
                default_params: bytemuck::bytes_of(&ColoroutParams::default()).to_vec(),
                default_blend_params: default_blend_bytes(),
                flags: OpFlags::ONE_INSTANCE | OpFlags::DEFAULT_ENABLED | OpFlags::ALLOW_TILING,
            },
        }
    }
}

impl Default for Colorout {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for Colorout {
    fn descriptor(&self) -> &OpDescriptor {
        &self.desc
    }

    fn process(
        &self,
        _params: &[u8],
        _blend_params: &[u8],
        input: &PixelBuffer,
        output: &mut PixelBuffer,
        _roi_in: Roi,
        roi_out: Roi,
        ctx: &ProcessContext<'_>,
    ) -> Result<ProcessStatus> {
        output.colorspace = BufferColorSpace::Display;
        for y in 0..roi_out.height {
            if y % CANCEL_POLL_ROWS == 0 && ctx.shutdown.is_cancelled() {
                return Ok(ProcessStatus::Interrupted);
            }
            let src = input.row(y);
            let dst = output.row_mut(y);
            for (d, s) in dst.iter_mut().zip(src.iter()) {
                *d = s.clamp(0.0, 1.0);
            }
        }
        Ok(ProcessStatus::Complete)
    }
}
