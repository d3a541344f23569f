//! The history stack.

use tracing::trace;

use argent_modules::{ModuleInstance, ModuleRegistry};

use crate::entry::HistoryEntry;
use crate::masks::MaskForm;

/// What an append did, which doubles as the change-flag the pipelines
/// must raise: a replacement is a `TOP_CHANGED`, a push is a `SYNCH`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Tail entry updated in place.
    Replaced,
    /// New entry pushed, cursor advanced.
    Pushed,
}

/// Ordered log of edit entries with a cursor. Indices `[0, end)` are
/// active, `[end, len)` are the redo tail.
#[derive(Debug, Clone, Default)]
pub struct HistoryStack {
    entries: Vec<HistoryEntry>,
    end: usize,
}

impl HistoryStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.end
    }

    /// Move the cursor without touching entries. Clamped to `[0, len]`.
    pub fn set_cursor(&mut self, n: usize) {
        self.end = n.min(self.entries.len());
    }

    /// Entries below the cursor.
    pub fn active(&self) -> &[HistoryEntry] {
        &self.entries[..self.end]
    }

    /// Entries above the cursor.
    pub fn redo_tail(&self) -> &[HistoryEntry] {
        &self.entries[self.end..]
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn entry(&self, idx: usize) -> Option<&HistoryEntry> {
        self.entries.get(idx)
    }

    /// Drop the redo tail.
    pub fn truncate_redo(&mut self) {
        self.entries.truncate(self.end);
    }

    /// Append a fully formed entry without coalescing or cursor movement.
    /// The persistence layer uses this while re-reading a stored stack;
    /// interactive edits go through [`HistoryStack::append`].
    pub fn push_raw(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.end = 0;
    }

    /// Last entry for `op`, searching the whole stack from the tail.
    pub fn find_last(&self, op: &str) -> Option<&HistoryEntry> {
        self.entries.iter().rev().find(|e| e.op == op)
    }

    /// Append an edit of `instance`.
    ///
    /// First the redo tail is swept: entries survive only when their
    /// operation is always-on (enabled by default with a user-accessible
    /// toggle) or when an earlier occurrence of the same operation exists
    /// in the active region; the cursor advances past the survivors.
    /// Then the edit either replaces the tail entry in place or pushes a
    /// new entry. The tail is replaced when the edit targets the same
    /// (op, instance-priority) and either the focus token matches or the
    /// parameter bytes are identical and no mask snapshot was requested.
    pub fn append(
        &mut self,
        registry: &ModuleRegistry,
        instance: &ModuleInstance,
        new_item: bool,
        forms: Option<&[MaskForm]>,
        focus_hash: u64,
    ) -> AppendOutcome {
        self.sweep_redo_tail(registry);

        let op_version = registry
            .descriptor(&instance.op)
            .map(|d| d.version)
            .unwrap_or(0);

        let replace = !new_item
            && self
                .end
                .checked_sub(1)
                .and_then(|i| self.entries.get(i))
                .map(|tail| {
                    tail.key() == instance.key()
                        && (tail.focus_hash == focus_hash
                            || (tail.params == instance.params && forms.is_none()))
                })
                .unwrap_or(false);

        if replace {
            let tail = &mut self.entries[self.end - 1];
            tail.update_from(instance, op_version, focus_hash, forms);
            AppendOutcome::Replaced
        } else {
            self.entries.truncate(self.end);
            self.entries.push(HistoryEntry::from_instance(
                instance, op_version, focus_hash, forms,
            ));
            self.end += 1;
            AppendOutcome::Pushed
        }
    }

    /// The pre-append sweep over `[end, len)`.
    fn sweep_redo_tail(&mut self, registry: &ModuleRegistry) {
        if self.end >= self.entries.len() {
            return;
        }
        let active_end = self.end;
        let mut kept = 0usize;
        let mut idx = active_end;
        while idx < self.entries.len() {
            let keep = {
                let entry = &self.entries[idx];
                registry.flags(&entry.op).is_always_on()
                    || self.entries[..active_end].iter().any(|e| e.op == entry.op)
            };
            if keep {
                kept += 1;
                idx += 1;
            } else {
                trace!(op = %self.entries[idx].op, "dropping obsolete history entry");
                self.entries.remove(idx);
            }
        }
        self.end = active_end + kept;
    }

    /// Ordered instance keys of the active region, used to compare
    /// pipeline topology before and after a cursor move.
    pub fn active_topology(&self) -> Vec<(String, i32)> {
        let mut keys: Vec<(String, i32, i32)> = Vec::new();
        for entry in self.active() {
            match keys
                .iter_mut()
                .find(|(op, prio, _)| op == &entry.op && *prio == entry.instance_priority)
            {
                Some(slot) => slot.2 = entry.iop_order,
                None => keys.push((entry.op.clone(), entry.instance_priority, entry.iop_order)),
            }
        }
        keys.sort_by_key(|(_, _, rank)| *rank);
        keys.into_iter().map(|(op, prio, _)| (op, prio)).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use argent_modules::ModuleRegistry;

    fn registry() -> ModuleRegistry {
        ModuleRegistry::with_builtins()
    }

    fn instance(reg: &ModuleRegistry, op: &str) -> ModuleInstance {
        ModuleInstance::from_descriptor(reg.descriptor(op).unwrap())
    }

    #[test]
    fn test_identical_append_coalesces() {
        let reg = registry();
        let mut stack = HistoryStack::new();
        let exposure = instance(&reg, "exposure");

        assert_eq!(
            stack.append(&reg, &exposure, false, None, 7),
            AppendOutcome::Pushed
        );
        assert_eq!(
            stack.append(&reg, &exposure, false, None, 7),
            AppendOutcome::Replaced
        );
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.cursor(), 1);
    }

    #[test]
    fn test_changed_params_same_focus_replace_tail() {
        let reg = registry();
        let mut stack = HistoryStack::new();
        let mut exposure = instance(&reg, "exposure");
        stack.append(&reg, &exposure, false, None, 7);
        exposure.params[0] ^= 0xff;
        assert_eq!(
            stack.append(&reg, &exposure, false, None, 7),
            AppendOutcome::Replaced
        );
        assert_eq!(stack.len(), 1);
        assert_eq!(stack.active()[0].params, exposure.params);
    }

    #[test]
    fn test_changed_params_new_focus_push() {
        let reg = registry();
        let mut stack = HistoryStack::new();
        let mut exposure = instance(&reg, "exposure");
        stack.append(&reg, &exposure, false, None, 1);
        exposure.params[0] ^= 0xff;
        assert_eq!(
            stack.append(&reg, &exposure, false, None, 2),
            AppendOutcome::Pushed
        );
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_new_item_forces_push() {
        let reg = registry();
        let mut stack = HistoryStack::new();
        let exposure = instance(&reg, "exposure");
        stack.append(&reg, &exposure, false, None, 7);
        assert_eq!(
            stack.append(&reg, &exposure, true, None, 7),
            AppendOutcome::Pushed
        );
        assert_eq!(stack.len(), 2);
    }

    #[test]
    fn test_redo_tail_dropped_on_append() {
        let reg = registry();
        let mut stack = HistoryStack::new();
        let exposure = instance(&reg, "exposure");
        let sharpen = instance(&reg, "sharpen");
        let flip = instance(&reg, "flip");
        stack.append(&reg, &exposure, false, None, 1);
        stack.append(&reg, &sharpen, false, None, 2);
        stack.append(&reg, &flip, false, None, 3);

        // undo two steps, then edit
        stack.set_cursor(1);
        stack.append(&reg, &sharpen, false, None, 4);

        assert_eq!(stack.len(), 2);
        assert_eq!(stack.cursor(), 2);
        assert_eq!(stack.active()[0].op, "exposure");
        assert_eq!(stack.active()[1].op, "sharpen");
    }

    #[test]
    fn test_always_on_survives_sweep() {
        let reg = registry();
        let mut stack = HistoryStack::new();
        let exposure = instance(&reg, "exposure");
        // colorout is DEFAULT_ENABLED without HIDE_ENABLE_BUTTON
        let colorout = instance(&reg, "colorout");
        stack.append(&reg, &exposure, false, None, 1);
        stack.append(&reg, &colorout, false, None, 2);

        stack.set_cursor(1);
        let sharpen = instance(&reg, "sharpen");
        stack.append(&reg, &sharpen, false, None, 3);

        // colorout was preserved and reactivated ahead of the new entry
        assert_eq!(stack.len(), 3);
        assert_eq!(stack.cursor(), 3);
        assert!(stack.active().iter().any(|e| e.op == "colorout"));
    }

    #[test]
    fn test_earlier_occurrence_survives_sweep() {
        let reg = registry();
        let mut stack = HistoryStack::new();
        let mut exposure = instance(&reg, "exposure");
        stack.append(&reg, &exposure, false, None, 1);
        exposure.params[0] ^= 0xff;
        stack.append(&reg, &exposure, false, None, 2);

        // exposure has an earlier occurrence below the cursor, so the
        // swept entry is preserved
        stack.set_cursor(1);
        let sharpen = instance(&reg, "sharpen");
        stack.append(&reg, &sharpen, false, None, 3);

        assert_eq!(stack.len(), 3);
        assert_eq!(stack.active()[1].op, "exposure");
        assert_eq!(stack.active()[2].op, "sharpen");
    }

    #[test]
    fn test_find_last_searches_from_tail() {
        let reg = registry();
        let mut stack = HistoryStack::new();
        let mut exposure = instance(&reg, "exposure");
        stack.append(&reg, &exposure, false, None, 1);
        exposure.params[0] = 0xaa;
        stack.append(&reg, &exposure, false, None, 2);
        let found = stack.find_last("exposure").unwrap();
        assert_eq!(found.params[0], 0xaa);
        assert!(stack.find_last("flip").is_none());
    }

    #[test]
    fn test_topology_ignores_repeated_entries() {
        let reg = registry();
        let mut stack = HistoryStack::new();
        let mut exposure = instance(&reg, "exposure");
        exposure.iop_order = 2;
        let mut sharpen = instance(&reg, "sharpen");
        sharpen.iop_order = 5;
        stack.append(&reg, &exposure, false, None, 1);
        stack.append(&reg, &sharpen, false, None, 2);
        exposure.params[0] = 1;
        stack.append(&reg, &exposure, true, None, 3);

        let topo = stack.active_topology();
        assert_eq!(
            topo,
            vec![("exposure".to_string(), 0), ("sharpen".to_string(), 0)]
        );
    }
}
