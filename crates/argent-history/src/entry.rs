//! History entries.

use smallvec::SmallVec;

use argent_modules::ModuleInstance;

use crate::masks::MaskForm;

/// Immutable snapshot of one operation instance at one point in time.
/// The module instance is found through (op, instance_priority); entries
/// never store pointers into the module list.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub op: String,
    /// Parameter schema version the bytes were written with.
    pub op_version: i32,
    pub instance_priority: i32,
    pub label: String,
    pub label_hand_edited: bool,
    pub enabled: bool,
    pub params: Vec<u8>,
    pub blend_params: Vec<u8>,
    /// Ordering rank at the time of append.
    pub iop_order: i32,
    /// Deep-copied mask forms this entry depends on; empty when the edit
    /// did not snapshot masks.
    pub forms: SmallVec<[MaskForm; 4]>,
    /// Opaque coalescing token supplied by the editing surface.
    pub focus_hash: u64,
}

impl HistoryEntry {
    /// Snapshot an instance.
    pub fn from_instance(
        instance: &ModuleInstance,
        op_version: i32,
        focus_hash: u64,
        forms: Option<&[MaskForm]>,
    ) -> Self {
        Self {
            op: instance.op.clone(),
            op_version,
            instance_priority: instance.instance_priority,
            label: instance.label.clone(),
            label_hand_edited: instance.label_hand_edited,
            enabled: instance.enabled,
            params: instance.params.clone(),
            blend_params: instance.blend_params.clone(),
            iop_order: instance.iop_order,
            forms: forms
                .map(|fs| fs.iter().map(MaskForm::deep_copy).collect())
                .unwrap_or_default(),
            focus_hash,
        }
    }

    /// Identity of the instance this entry belongs to.
    pub fn key(&self) -> (&str, i32) {
        (self.op.as_str(), self.instance_priority)
    }

    /// Overwrite this entry in place from the instance's current state,
    /// keeping its position in the stack.
    pub fn update_from(
        &mut self,
        instance: &ModuleInstance,
        op_version: i32,
        focus_hash: u64,
        forms: Option<&[MaskForm]>,
    ) {
        debug_assert_eq!(self.key(), instance.key());
        self.op_version = op_version;
        self.label = instance.label.clone();
        self.label_hand_edited = instance.label_hand_edited;
        self.enabled = instance.enabled;
        self.params = instance.params.clone();
        self.blend_params = instance.blend_params.clone();
        self.iop_order = instance.iop_order;
        self.focus_hash = focus_hash;
        if let Some(fs) = forms {
            self.forms = fs.iter().map(MaskForm::deep_copy).collect();
        }
    }
}
