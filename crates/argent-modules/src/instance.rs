//! Live module instances.
//!
//! An instance pairs an operation type with per-image editable state.
//! Instances are reshaped only while the develop init lock is held and
//! their parameters mutate only under the history mutex.

use crate::descriptor::{OpDescriptor, OpFlags};

/// One instantiated operation on one image.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleInstance {
    /// Operation identifier, matches a registry entry.
    pub op: String,
    /// Distinguishes multiple instances of the same type; `ONE_INSTANCE`
    /// types are pinned to 0.
    pub instance_priority: i32,
    /// User-visible instance label.
    pub label: String,
    /// Set when the user edited the label by hand; automatic labeling
    /// then leaves it alone.
    pub label_hand_edited: bool,
    pub enabled: bool,
    pub params: Vec<u8>,
    pub blend_params: Vec<u8>,
    /// Rank in the operation ordering; unique per image.
    pub iop_order: i32,
}

impl ModuleInstance {
    /// A fresh instance with descriptor defaults at priority 0.
    pub fn from_descriptor(desc: &OpDescriptor) -> Self {
        Self {
            op: desc.op.to_string(),
            instance_priority: 0,
            label: String::new(),
            label_hand_edited: false,
            enabled: desc.flags.contains(OpFlags::DEFAULT_ENABLED),
            params: desc.default_params.clone(),
            blend_params: desc.default_blend_params.clone(),
            iop_order: 0,
        }
    }

    /// Identity of this instance within an image.
    pub fn key(&self) -> (&str, i32) {
        (self.op.as_str(), self.instance_priority)
    }

    /// Reset editable state back to descriptor defaults.
    pub fn reset_to_defaults(&mut self, desc: &OpDescriptor) {
        self.enabled = desc.flags.contains(OpFlags::DEFAULT_ENABLED);
        self.params = desc.default_params.clone();
        self.blend_params = desc.default_blend_params.clone();
        self.label.clear();
        self.label_hand_edited = false;
    }

    /// Derive the automatic instance label: empty for the base instance,
    /// the priority number for duplicates. Hand-edited labels are kept.
    pub fn refresh_auto_label(&mut self) -> bool {
        if self.label_hand_edited {
            return false;
        }
        let auto = if self.instance_priority == 0 {
            String::new()
        } else {
            self.instance_priority.to_string()
        };
        if self.label != auto {
            self.label = auto;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blend::default_blend_bytes;

    fn desc() -> OpDescriptor {
        OpDescriptor {
            op: "exposure",
            version: 2,
            params_size: 8,
            default_params: vec![0u8; 8],
            default_blend_params: default_blend_bytes(),
            flags: OpFlags::SUPPORTS_BLENDING,
        }
    }

    #[test]
    fn test_fresh_instance_disabled_without_default_enabled() {
        let inst = ModuleInstance::from_descriptor(&desc());
        assert!(!inst.enabled);
        assert_eq!(inst.key(), ("exposure", 0));
    }

    #[test]
    fn test_auto_label_tracks_priority() {
        let mut inst = ModuleInstance::from_descriptor(&desc());
        assert!(!inst.refresh_auto_label());
        inst.instance_priority = 2;
        assert!(inst.refresh_auto_label());
        assert_eq!(inst.label, "2");
    }

    #[test]
    fn test_hand_edited_label_is_kept() {
        let mut inst = ModuleInstance::from_descriptor(&desc());
        inst.instance_priority = 1;
        inst.label = "shadows".into();
        inst.label_hand_edited = true;
        assert!(!inst.refresh_auto_label());
        assert_eq!(inst.label, "shadows");
    }
}
