//! Mask manager pseudo-module.
//!
//! Owns no pixels; exists so mask-only edits have a module instance to
//! anchor their history entries to. Takes no pipeline slot.

use argent_core::{PixelBuffer, Result, Roi};

use crate::blend::default_blend_bytes;
use crate::descriptor::{OpDescriptor, OpFlags};
use crate::operation::{Operation, ProcessContext, ProcessStatus};

pub struct MaskManager {
    desc: OpDescriptor,
}

impl MaskManager {
    pub fn new() -> Self {
        Self {
            desc: OpDescriptor {
                op: "mask_manager",
                version: 1,
                params_size: 0,
                default_params: Vec::new(),
                default_blend_params: default_blend_bytes(),
                flags: OpFlags::HIDDEN | OpFlags::ONE_INSTANCE,
            },
        }
    }
}

impl Default for MaskManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for MaskManager {
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
        _roi_out: Roi,
        _ctx: &ProcessContext<'_>,
    ) -> Result<ProcessStatus> {
        output.data_mut().copy_from_slice(input.data());
        Ok(ProcessStatus::Complete)
    }
}
