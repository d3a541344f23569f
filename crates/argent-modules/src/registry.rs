//! The registry of installed operation types.

use std::collections::BTreeMap;
use std::sync::Arc;

use argent_core::{DevelopError, Result};

use crate::builtin;
use crate::descriptor::{OpDescriptor, OpFlags};
use crate::instance::ModuleInstance;
use crate::operation::Operation;

/// Map from stable textual id to a boxed operation implementation.
/// Populated once at process start; immutable thereafter.
pub struct ModuleRegistry {
    ops: BTreeMap<&'static str, Arc<dyn Operation>>,
}

impl ModuleRegistry {
    pub fn empty() -> Self {
        Self {
            ops: BTreeMap::new(),
        }
    }

    /// Registry with every built-in operation installed.
    pub fn with_builtins() -> Self {
        let mut reg = Self::empty();
        for op in builtin::all() {
            reg.register(op);
        }
        reg
    }

    /// Install an operation. Panics on duplicate ids: the installed set is
    /// a build-time property, not user input.
    pub fn register(&mut self, op: Arc<dyn Operation>) {
        let id = op.descriptor().op;
        let prev = self.ops.insert(id, op);
        assert!(prev.is_none(), "duplicate operation id {id:?}");
    }

    pub fn get(&self, op: &str) -> Option<&Arc<dyn Operation>> {
        self.ops.get(op)
    }

    /// Like [`ModuleRegistry::get`] but failing with the error persisted
    /// entries see when they reference an uninstalled operation.
    pub fn require(&self, op: &str) -> Result<&Arc<dyn Operation>> {
        self.get(op).ok_or_else(|| DevelopError::ModuleMismatch {
            op: op.to_string(),
        })
    }

    pub fn descriptor(&self, op: &str) -> Option<&OpDescriptor> {
        self.get(op).map(|o| o.descriptor())
    }

    pub fn flags(&self, op: &str) -> OpFlags {
        self.descriptor(op).map(|d| d.flags).unwrap_or_default()
    }

    /// Iterate descriptors in id order.
    pub fn descriptors(&self) -> impl Iterator<Item = &OpDescriptor> {
        self.ops.values().map(|o| o.descriptor())
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// One fresh instance per installed type, in id order. Ordering ranks
    /// are assigned separately by the operation order.
    pub fn instantiate_all(&self) -> Vec<ModuleInstance> {
        self.ops
            .values()
            .map(|op| ModuleInstance::from_descriptor(op.descriptor()))
            .collect()
    }
}
