//! Mask form descriptors.
//!
//! Forms are referenced by id from history entries and blend parameters.
//! A history entry snapshots the forms it depends on by deep copy so
//! later mask edits cannot mutate an older entry.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaskKind {
    Circle,
    Ellipse,
    Gradient,
    Polygon,
    Brush,
    /// A group referencing other forms by id.
    Group,
}

/// One drawn mask form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskForm {
    pub id: i32,
    pub name: String,
    pub kind: MaskKind,
    /// Control points, meaning depends on `kind`; normalized coordinates.
    pub points: Vec<[f32; 2]>,
}

impl MaskForm {
    pub fn new(id: i32, kind: MaskKind) -> Self {
        Self {
            id,
            name: String::new(),
            kind,
            points: Vec::new(),
        }
    }

    /// Snapshot copy taken when a history entry records this form. Keeps
    /// the id: entries reference forms by id across snapshots.
    pub fn deep_copy(&self) -> Self {
        self.clone()
    }
}

/// Whether two form sets differ, compared as sets keyed by id with full
/// content equality. Drives the mask-list refresh after a cursor move.
pub fn forms_changed(a: &[MaskForm], b: &[MaskForm]) -> bool {
    if a.len() != b.len() {
        return true;
    }
    for form in a {
        match b.iter().find(|f| f.id == form.id) {
            Some(other) if other == form => {}
            _ => return true,
        }
    }
    false
}
