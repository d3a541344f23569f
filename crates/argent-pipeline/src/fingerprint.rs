//! Node and pipeline fingerprints.
//!
//! A node fingerprint folds, in this order: op identifier, schema
//! version, ordering rank, instance-priority, enabled flag, parameter
//! bytes, blend-parameter bytes, the node's roi in pipeline coordinates,
//! and the source-buffer dimensions plus scale. The pipeline fingerprint
//! up to node k is the fold of node fingerprints 0..=k.

use argent_core::{Hasher64, Roi};

use crate::node::NodeSpec;

/// Fingerprint of one node given its upstream fold.
pub fn node_fingerprint(
    prev: u64,
    spec: &NodeSpec,
    roi: &Roi,
    src_width: u32,
    src_height: u32,
    src_scale: f32,
) -> u64 {
    let mut h = Hasher64::seeded(prev);
    h.write_str(&spec.op)
        .write_i32(spec.op_version)
        .write_i32(spec.iop_order)
        .write_i32(spec.instance_priority)
        .write_bool(spec.enabled)
        .write(&spec.params)
        .write(&spec.blend_params)
        .write_i32(roi.x)
        .write_i32(roi.y)
        .write_u32(roi.width)
        .write_u32(roi.height)
        .write_f32(roi.scale)
        .write_u32(src_width)
        .write_u32(src_height)
        .write_f32(src_scale);
    h.finish()
}
