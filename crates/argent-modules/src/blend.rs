//! Blend parameters shared by every blending-capable operation.

use bytemuck::{Pod, Zeroable};

/// Current blend parameter schema version.
pub const BLEND_VERSION: i32 = 3;

/// How a node's output is combined with its input.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct BlendParams {
    /// 0 = off, 1 = uniform, 2 = drawn mask.
    pub mask_mode: u32,
    /// 0 = normal, 1 = multiply, 2 = screen.
    pub blend_mode: u32,
    pub opacity: f32,
    /// Drawn-mask form group id, 0 when unused.
    pub mask_id: i32,
}

impl Default for BlendParams {
    fn default() -> Self {
        Self {
            mask_mode: 0,
            blend_mode: 0,
            opacity: 1.0,
            mask_id: 0,
        }
    }
}

impl BlendParams {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        bytemuck::try_pod_read_unaligned(bytes).ok()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        bytemuck::bytes_of(self).to_vec()
    }
}

/// Default blend parameter bytes for descriptors.
pub fn default_blend_bytes() -> Vec<u8> {
    BlendParams::default().to_bytes()
}
