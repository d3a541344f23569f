//! argent-history - The versioned edit-history stack
//!
//! An ordered log of edit entries with a cursor. Entries at indices
//! `[0, end)` are active; `[end, len)` are the redo tail. Entries are
//! owning value types identified by (op, instance-priority); they never
//! hold references into the module list.

pub mod entry;
pub mod masks;
pub mod stack;
pub mod undo;

pub use entry::HistoryEntry;
pub use masks::{forms_changed, MaskForm, MaskKind};
pub use stack::{AppendOutcome, HistoryStack};
pub use undo::UndoGate;
