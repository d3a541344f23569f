//! Per-image sidecar files.
//!
//! A sidecar carries the same history, ordering list and content hash as
//! the store, so edits travel with the image file. Versioned JSON with
//! forward-compatible migration; parameter blobs are hex strings to keep
//! the document diffable.

use std::path::Path;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use argent_core::{DevelopError, ImageId, Result};
use argent_history::{HistoryStack, MaskForm};
use argent_modules::{OperationOrder, BLEND_VERSION};

use crate::history_io::content_hash;

/// Current sidecar schema version.
pub const SIDECAR_VERSION: u32 = 2;

#[derive(Debug, Serialize, Deserialize)]
pub struct SidecarFile {
    pub version: u32,
    /// Document identity, regenerated on every export.
    pub doc_id: Uuid,
    pub image_id: i32,
    pub history_end: usize,
    pub ordering: OperationOrder,
    pub entries: Vec<SidecarEntry>,
    pub content_hash: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SidecarEntry {
    pub num: usize,
    pub operation: String,
    pub op_version: i32,
    pub enabled: bool,
    pub multi_priority: i32,
    #[serde(default)]
    pub multi_name: String,
    #[serde(default)]
    pub multi_name_hand_edited: bool,
    pub iop_order: i32,
    /// Hex-encoded parameter record.
    pub op_params: String,
    pub blendop_params: String,
    pub blendop_version: i32,
    #[serde(default)]
    pub forms: Vec<MaskForm>,
}

fn to_hex(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{b:02x}"));
    }
    s
}

fn from_hex(s: &str) -> Result<Vec<u8>> {
    if s.len() % 2 != 0 {
        return Err(DevelopError::Serialization(
            "odd-length hex parameter blob".into(),
        ));
    }
    (0..s.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&s[i..i + 2], 16)
                .map_err(|e| DevelopError::Serialization(e.to_string()))
        })
        .collect()
}

impl SidecarFile {
    /// Build the document for the current in-memory state.
    pub fn from_state(image_id: ImageId, stack: &HistoryStack, order: &OperationOrder) -> Self {
        let entries = stack
            .entries()
            .iter()
            .enumerate()
            .map(|(num, e)| SidecarEntry {
                num,
                operation: e.op.clone(),
                op_version: e.op_version,
                enabled: e.enabled,
                multi_priority: e.instance_priority,
                multi_name: e.label.clone(),
                multi_name_hand_edited: e.label_hand_edited,
                iop_order: e.iop_order,
                op_params: to_hex(&e.params),
                blendop_params: to_hex(&e.blend_params),
                blendop_version: BLEND_VERSION,
                forms: e.forms.to_vec(),
            })
            .collect();
        Self {
            version: SIDECAR_VERSION,
            doc_id: Uuid::new_v4(),
            image_id: image_id.0,
            history_end: stack.cursor(),
            ordering: order.clone(),
            entries,
            content_hash: content_hash(stack, order),
        }
    }

    /// Decode one entry's parameter bytes.
    pub fn entry_params(&self, num: usize) -> Result<Vec<u8>> {
        let entry = self.entries.get(num).ok_or_else(|| {
            DevelopError::InvalidParameter(format!("sidecar has no entry {num}"))
        })?;
        from_hex(&entry.op_params)
    }

    pub fn to_json(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self).map_err(|e| DevelopError::Serialization(e.to_string()))
    }

    /// Parse, applying migrations for older versions.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let raw: serde_json::Value = serde_json::from_slice(data)
            .map_err(|e| DevelopError::Serialization(e.to_string()))?;
        let version = raw.get("version").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        if version > SIDECAR_VERSION {
            return Err(DevelopError::Serialization(format!(
                "sidecar version {version} is newer than supported {SIDECAR_VERSION}"
            )));
        }
        let migrated = migrate(raw, version)?;
        serde_json::from_value(migrated).map_err(|e| DevelopError::Serialization(e.to_string()))
    }
}

/// Sequential migrations up to the current version.
fn migrate(mut data: serde_json::Value, from_version: u32) -> Result<serde_json::Value> {
    let mut version = from_version;
    while version < SIDECAR_VERSION {
        match version {
            // v1 carried no document id
            1 => {
                if data.get("doc_id").is_none() {
                    data["doc_id"] = serde_json::json!(Uuid::nil());
                }
                data["version"] = serde_json::json!(2);
                version = 2;
            }
            _ => {
                return Err(DevelopError::Serialization(format!(
                    "no sidecar migration path from version {version}"
                )));
            }
        }
    }
    Ok(data)
}

/// Write the sidecar for an image next to `path`.
pub fn export_sidecar(
    path: &Path,
    image_id: ImageId,
    stack: &HistoryStack,
    order: &OperationOrder,
) -> Result<u64> {
    let doc = SidecarFile::from_state(image_id, stack, order);
    std::fs::write(path, doc.to_json()?)?;
    Ok(doc.content_hash)
}

/// Read a sidecar document.
pub fn read_sidecar(path: &Path) -> Result<SidecarFile> {
    let data = std::fs::read(path)?;
    SidecarFile::from_json(&data)
}
