//! Exposure correction.

use bytemuck::{Pod, Zeroable};

use argent_core::{PixelBuffer, Result, Roi};

use crate::blend::default_blend_bytes;
use crate::descriptor::{OpDescriptor, OpFlags};
use crate::operation::{Operation, ProcessContext, ProcessStatus, CANCEL_POLL_ROWS};

pub const EXPOSURE_VERSION: i32 = 2;

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ExposureParams {
    /// Black level offset subtracted before scaling.
    pub black: f32,
    /// Exposure compensation in EV.
    pub exposure: f32,
}

impl Default for ExposureParams {
    fn default() -> Self {
        Self {
            black: 0.0,
            exposure: 0.0,
        }
    }
}

/// Version 1 stored only the EV value.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ExposureParamsV1 {
    pub exposure: f32,
}

pub struct Exposure {
    desc: OpDescriptor,
}

impl Exposure {
    pub fn new() -> Self {
        Self {
            desc: OpDescriptor {
                op: "exposure",
                version: EXPOSURE_VERSION,
                params_size: std::mem::size_of::<ExposureParams>(),
                default_params: bytemuck::bytes_of(&ExposureParams::default()).to_vec(),
                default_blend_params: default_blend_bytes(),
                flags: OpFlags::SUPPORTS_BLENDING | OpFlags::ALLOW_TILING,
            },
        }
    }
}

impl Default for Exposure {
    fn default() -> Self {
        Self::new()
    }
}

impl Operation for Exposure {
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
        let p: ExposureParams = bytemuck::pod_read_unaligned(params);
        let gain = (p.exposure).exp2();
        for y in 0..roi_out.height {
            if y % CANCEL_POLL_ROWS == 0 && ctx.shutdown.is_cancelled() {
                return Ok(ProcessStatus::Interrupted);
            }
            let src = input.row(y);
            let dst = output.row_mut(y);
            for x in 0..roi_out.width as usize {
                let i = x * PixelBuffer::CHANNELS;
                dst[i] = (src[i] - p.black) * gain;
                dst[i + 1] = (src[i + 1] - p.black) * gain;
                dst[i + 2] = (src[i + 2] - p.black) * gain;
                dst[i + 3] = src[i + 3];
            }
        }
        Ok(ProcessStatus::Complete)
    }

    fn legacy_params(&self, old_params: &[u8], old_version: i32) -> Result<(Vec<u8>, i32)> {
        match old_version {
            1 if old_params.len() == std::mem::size_of::<ExposureParamsV1>() => {
                let old: ExposureParamsV1 = bytemuck::pod_read_unaligned(old_params);
                let new = ExposureParams {
                    black: 0.0,
                    exposure: old.exposure,
                };
                Ok((bytemuck::bytes_of(&new).to_vec(), EXPOSURE_VERSION))
            }
            _ => Err(argent_core::DevelopError::LegacyMigrationFailed {
                op: "exposure".into(),
                stored: old_version,
                current: EXPOSURE_VERSION,
            }),
        }
    }
}
