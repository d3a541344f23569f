//! Final display gamma encode.
//!
//! Hidden, mandatory, and excluded from the history stack: every
//! pipeline ends with it, no history entry ever records it.

use argent_core::{PixelBuffer, Result, Roi};

use crate::blend::default_blend_bytes;
use crate::descriptor::{OpDescriptor, OpFlags};
use crate::operation::{Operation, ProcessContext, ProcessStatus, CANCEL_POLL_ROWS};

pub struct Gamma {
    desc: OpDescriptor,
}

impl Gamma {
    pub fn new() -> Self {
        Self {
            desc: OpDescriptor {
                op: "gamma",
                version: 1,
                params_size: 0,
                default_params: Vec::new(),
                default_blend_params: default_blend_bytes(),
                flags: OpFlags::HIDDEN
                    | OpFlags::NO_HISTORY_STACK
                    | OpFlags::DEFAULT_ENABLED
                    | OpFlags::HIDE_ENABLE_BUTTON
                    | OpFlags::ONE_INSTANCE,
            },
        }
    }
}

impl Default for Gamma {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for Gamma {
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
        for y in 0..roi_out.height {
            if y % CANCEL_POLL_ROWS == 0 && ctx.shutdown.is_cancelled() {
                return Ok(ProcessStatus::Interrupted);
            }
            let src = input.row(y);
            let dst = output.row_mut(y);
            for x in 0..roi_out.width as usize {
                let i = x * PixelBuffer::CHANNELS;
                for c in 0..3 {
                    dst[i + c] = src[i + c].max(0.0).powf(1.0 / 2.2);
                }
                dst[i + 3] = src[i + 3];
            }
        }
        Ok(ProcessStatus::Complete)
    }
}
