//! Pipeline nodes and the plan they are built from.

use std::sync::Arc;

use argent_core::Roi;
use argent_modules::{ModuleInstance, ModuleRegistry, Operation};

/// Where a node executes. The engine only schedules; the accelerator
/// path is provided by an external backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePlacement {
    #[default]
    Cpu,
    Accelerator,
}

/// Everything a node needs from history and module state, committed at
/// plan time so a running pipeline never reads live instances.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSpec {
    pub op: String,
    pub op_version: i32,
    pub instance_priority: i32,
    pub enabled: bool,
    /// Committed parameter bytes (`Operation::commit_params` output).
    pub params: Vec<u8>,
    pub blend_params: Vec<u8>,
    pub iop_order: i32,
}

impl NodeSpec {
    pub fn key(&self) -> (&str, i32) {
        (self.op.as_str(), self.instance_priority)
    }
}

/// The node sequence a render run should converge to, in rank order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelinePlan {
    pub nodes: Vec<NodeSpec>,
}

impl PipelinePlan {
    /// Instance keys in rank order, for topology comparison.
    pub fn topology(&self) -> Vec<(String, i32)> {
        self.nodes
            .iter()
            .map(|n| (n.op.clone(), n.instance_priority))
            .collect()
    }
}

/// Build a plan from the live module instances. Instances without an
/// ordering rank (pseudo-modules like the mask manager) take no slot;
/// disabled instances keep theirs so the fingerprint sees the flag.
pub fn plan_from_instances(
    registry: &ModuleRegistry,
    instances: &[ModuleInstance],
) -> PipelinePlan {
    let mut nodes: Vec<NodeSpec> = Vec::with_capacity(instances.len());
    for inst in instances {
        if inst.iop_order == 0 {
            continue;
        }
        let Some(operation) = registry.get(&inst.op) else {
            continue;
        };
        let desc = operation.descriptor();
        nodes.push(NodeSpec {
            op: inst.op.clone(),
            op_version: desc.version,
            instance_priority: inst.instance_priority,
            enabled: inst.enabled,
            params: operation.commit_params(inst),
            blend_params: inst.blend_params.clone(),
            iop_order: inst.iop_order,
        });
    }
    nodes.sort_by_key(|n| n.iop_order);
    PipelinePlan { nodes }
}

/// Runtime pairing of a committed spec with its operation and per-run
/// state.
pub struct PipeNode {
    pub spec: NodeSpec,
    pub operation: Arc<dyn Operation>,
    pub roi_in: Roi,
    pub roi_out: Roi,
    /// Cumulative pipeline fingerprint up to and including this node,
    /// valid for the current run.
    pub fingerprint: u64,
    pub placement: DevicePlacement,
}

impl PipeNode {
    pub fn new(spec: NodeSpec, operation: Arc<dyn Operation>) -> Self {
        operation.init_pipe();
        Self {
            spec,
            operation,
            roi_in: Roi::full(0, 0),
            roi_out: Roi::full(0, 0),
            fingerprint: 0,
            placement: DevicePlacement::default(),
        }
    }
}

impl Drop for PipeNode {
    fn drop(&mut self) {
        self.operation.cleanup_pipe();
    }
}
