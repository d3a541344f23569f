//! Operation ordering.
//!
//! A total order over (op, instance-priority) pairs assigns each pipeline
//! node its rank. A per-image list overrides the workflow default; the
//! list version is recorded so old serialized orders keep loading.

use serde::{Deserialize, Serialize};

use argent_core::{DevelopError, Result};

use crate::descriptor::OpFlags;
use crate::instance::ModuleInstance;
use crate::registry::ModuleRegistry;

/// Serialized ordering schema version.
pub const ORDER_VERSION: i32 = 2;

/// Named default orderings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Workflow {
    #[default]
    SceneReferred,
    DisplayReferred,
    Legacy,
    None,
}

impl Workflow {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::SceneReferred => "scene-referred",
            Self::DisplayReferred => "display-referred",
            Self::Legacy => "legacy",
            Self::None => "none",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "scene-referred" => Some(Self::SceneReferred),
            "display-referred" => Some(Self::DisplayReferred),
            "legacy" => Some(Self::Legacy),
            "none" => Some(Self::None),
            _ => None,
        }
    }
}

/// One slot of the total order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEntry {
    pub op: String,
    pub instance_priority: i32,
    pub rank: i32,
}

/// The total order for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationOrder {
    pub version: i32,
    pub workflow: Workflow,
    pub entries: Vec<OrderEntry>,
}

/// Pipeline position of each built-in per workflow. The scene-referred
/// workflow exposes before geometry; the display-referred and legacy
/// workflows run exposure after the retouch stage like older releases.
fn default_sequence(workflow: Workflow) -> &'static [&'static str] {
    match workflow {
        Workflow::SceneReferred | Workflow::None => &[
            "rawprepare",
            "exposure",
            "spots",
            "flip",
            "sharpen",
            "colorout",
            "gamma",
        ],
        Workflow::DisplayReferred | Workflow::Legacy => &[
            "rawprepare",
            "spots",
            "exposure",
            "flip",
            "sharpen",
            "colorout",
            "gamma",
        ],
    }
}

impl OperationOrder {
    /// The workflow-default order covering every installed operation.
    /// Operations unknown to the workflow sequence go to the end in
    /// registry order; the mask manager never takes a pipeline slot.
    pub fn default_for(workflow: Workflow, registry: &ModuleRegistry) -> Self {
        let seq = default_sequence(workflow);
        let mut entries = Vec::new();
        let mut rank = 1;
        for op in seq {
            if registry.get(op).is_some() {
                entries.push(OrderEntry {
                    op: op.to_string(),
                    instance_priority: 0,
                    rank,
                });
                rank += 1;
            }
        }
        for desc in registry.descriptors() {
            if desc.op == "mask_manager" {
                continue;
            }
            if !entries.iter().any(|e| e.op == desc.op) {
                entries.push(OrderEntry {
                    op: desc.op.to_string(),
                    instance_priority: 0,
                    rank,
                });
                rank += 1;
            }
        }
        Self {
            version: ORDER_VERSION,
            workflow,
            entries,
        }
    }

    pub fn rank_of(&self, op: &str, instance_priority: i32) -> Option<i32> {
        self.entries
            .iter()
            .find(|e| e.op == op && e.instance_priority == instance_priority)
            .map(|e| e.rank)
    }

    /// Insert a new instance of an existing type directly after the base
    /// instance, shifting every later rank up by one. Returns the new
    /// instance's rank.
    pub fn insert_duplicate(
        &mut self,
        op: &str,
        base_priority: i32,
        new_priority: i32,
    ) -> Result<i32> {
        let base_rank = self.rank_of(op, base_priority).ok_or_else(|| {
            DevelopError::InvalidParameter(format!(
                "cannot duplicate {op}.{base_priority}: not in the ordering"
            ))
        })?;
        if self.rank_of(op, new_priority).is_some() {
            return Err(DevelopError::InvalidParameter(format!(
                "{op}.{new_priority} already ordered"
            )));
        }
        let new_rank = base_rank + 1;
        for entry in &mut self.entries {
            if entry.rank >= new_rank {
                entry.rank += 1;
            }
        }
        self.entries.push(OrderEntry {
            op: op.to_string(),
            instance_priority: new_priority,
            rank: new_rank,
        });
        self.entries.sort_by_key(|e| e.rank);
        Ok(new_rank)
    }

    /// Check the per-image invariants: unique ranks, `ONE_INSTANCE` types
    /// occupying exactly one rank.
    pub fn validate(&self, registry: &ModuleRegistry) -> Result<()> {
        let mut ranks: Vec<i32> = self.entries.iter().map(|e| e.rank).collect();
        ranks.sort_unstable();
        ranks.dedup();
        if ranks.len() != self.entries.len() {
            return Err(DevelopError::InvalidParameter(
                "ordering ranks are not unique".into(),
            ));
        }
        for entry in &self.entries {
            if registry.flags(&entry.op).contains(OpFlags::ONE_INSTANCE) {
                let n = self.entries.iter().filter(|e| e.op == entry.op).count();
                if n != 1 {
                    return Err(DevelopError::InvalidParameter(format!(
                        "single-instance operation {} occupies {n} ranks",
                        entry.op
                    )));
                }
            }
        }
        Ok(())
    }

    /// Seed `iop_order` on each instance from this order. Instances
    /// without a slot keep rank 0 and sort first; the caller decides
    /// whether that is an error.
    pub fn apply_to_instances(&self, instances: &mut [ModuleInstance]) {
        for inst in instances.iter_mut() {
            if let Some(rank) = self.rank_of(&inst.op, inst.instance_priority) {
                inst.iop_order = rank;
            }
        }
    }

    /// Serialize for the per-image override blob.
    pub fn to_blob(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| DevelopError::Serialization(e.to_string()))
    }

    /// Parse an override blob; older versions are upgraded in place.
    pub fn from_blob(blob: &str) -> Result<Self> {
        let mut order: OperationOrder =
            serde_json::from_str(blob).map_err(|e| DevelopError::Serialization(e.to_string()))?;
        if order.version > ORDER_VERSION {
            return Err(DevelopError::Serialization(format!(
                "ordering version {} is newer than supported {}",
                order.version, ORDER_VERSION
            )));
        }
        // v1 predates the workflow tag; those images rendered with the
        // legacy sequence.
        if order.version < 2 {
            order.workflow = Workflow::Legacy;
            order.version = ORDER_VERSION;
        }
        Ok(order)
    }
}
