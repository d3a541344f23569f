//! History round-tripping.
//!
//! `read_history` rebuilds the in-memory stack from the store, applying
//! auto presets on first load and migrating legacy parameter records.
//! `write_history` replaces the persisted stack inside one transaction
//! and refreshes the image's content hash.

use rusqlite::{params, Connection, Transaction};
use smallvec::SmallVec;
use tracing::{info, warn};

use argent_core::{
    image_flags, DevelopError, Hasher64, ImageInfo, Result,
};
use argent_history::{HistoryEntry, HistoryStack, MaskForm, MaskKind};
use argent_modules::{
    BlendParams, ModuleInstance, ModuleRegistry, OpFlags, OperationOrder, Workflow, BLEND_VERSION,
};

use crate::presets::{resolve_autoapply, resolve_ioporder};
use crate::schema::{db_err, Database};

/// What a load did, for the caller's follow-up decisions.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadOutcome {
    /// Presets were applied: this was the image's first load.
    pub first_run: bool,
    /// At least one entry was migrated or repaired; the stack was
    /// persisted back.
    pub migrated: bool,
    /// Number of preset entries prepended.
    pub applied_presets: usize,
    pub content_hash: u64,
}

/// Content hash over the active history and ordering, persisted for
/// change detection by sidecar sync.
pub fn content_hash(stack: &HistoryStack, order: &OperationOrder) -> u64 {
    let mut h = Hasher64::new();
    h.write_u64(stack.cursor() as u64);
    for entry in stack.active() {
        h.write_str(&entry.op)
            .write_i32(entry.op_version)
            .write_i32(entry.instance_priority)
            .write_bool(entry.enabled)
            .write(&entry.params)
            .write(&entry.blend_params)
            .write_i32(entry.iop_order);
        for form in &entry.forms {
            h.write_i32(form.id);
            h.write_u64(form.points.len() as u64);
        }
    }
    for e in &order.entries {
        h.write_str(&e.op).write_i32(e.instance_priority).write_i32(e.rank);
    }
    h.finish()
}

fn history_table(snapshot: Option<i32>) -> String {
    match snapshot {
        Some(id) => format!("history_snapshot_{id}"),
        None => "history".to_string(),
    }
}

/// Find the instance for (op, priority), creating a duplicate instance
/// (and an ordering slot right after the base instance) when the stack
/// references one that does not exist yet.
fn find_or_create_instance<'a>(
    registry: &ModuleRegistry,
    order: &mut OperationOrder,
    instances: &'a mut Vec<ModuleInstance>,
    op: &str,
    priority: i32,
) -> Result<&'a mut ModuleInstance> {
    let idx = instances
        .iter()
        .position(|i| i.op == op && i.instance_priority == priority);
    let idx = match idx {
        Some(idx) => idx,
        None => {
            let operation = registry.require(op)?;
            let mut inst = ModuleInstance::from_descriptor(operation.descriptor());
            inst.instance_priority = priority;
            // base instance = highest existing priority below this one
            let base_priority = instances
                .iter()
                .filter(|i| i.op == op && i.instance_priority < priority)
                .map(|i| i.instance_priority)
                .max()
                .unwrap_or(0);
            if order.rank_of(op, priority).is_none() {
                order.insert_duplicate(op, base_priority, priority)?;
            }
            inst.iop_order = order.rank_of(op, priority).unwrap_or(0);
            inst.refresh_auto_label();
            instances.push(inst);
            instances.len() - 1
        }
    };
    Ok(&mut instances[idx])
}

struct HistoryRow {
    num: i64,
    operation: String,
    op_params: Vec<u8>,
    module_version: i32,
    enabled: bool,
    blendop_params: Vec<u8>,
    blendop_version: i32,
    multi_priority: i32,
    multi_name: String,
    multi_name_hand_edited: bool,
    iop_order: i32,
    focus_hash: u64,
}

fn query_history_rows(
    conn: &Connection,
    table: &str,
    imgid: i32,
) -> Result<Vec<HistoryRow>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT num, operation, op_params, module, enabled, blendop_params,
                    blendop_version, multi_priority, multi_name, multi_name_hand_edited,
                    iop_order, focus_hash
             FROM {table} WHERE imgid = ?1 ORDER BY num"
        ))
        .map_err(db_err)?;
    let rows = stmt
        .query_map(params![imgid], |row| {
            Ok(HistoryRow {
                num: row.get(0)?,
                operation: row.get(1)?,
                op_params: row.get::<_, Option<Vec<u8>>>(2)?.unwrap_or_default(),
                module_version: row.get(3)?,
                enabled: row.get::<_, i32>(4)? != 0,
                blendop_params: row.get::<_, Option<Vec<u8>>>(5)?.unwrap_or_default(),
                blendop_version: row.get(6)?,
                multi_priority: row.get(7)?,
                multi_name: row.get(8)?,
                multi_name_hand_edited: row.get::<_, i32>(9)? != 0,
                iop_order: row.get(10)?,
                focus_hash: row.get::<_, i64>(11)? as u64,
            })
        })
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;
    Ok(rows)
}

fn query_mask_rows(conn: &Connection, imgid: i32, num: i64) -> Result<SmallVec<[MaskForm; 4]>> {
    let mut stmt = conn
        .prepare(
            "SELECT formid, form_kind, name, points FROM masks_history
             WHERE imgid = ?1 AND num = ?2",
        )
        .map_err(db_err)?;
    let forms = stmt
        .query_map(params![imgid, num], |row| {
            let kind_json: String = row.get(1)?;
            let points_json: String = row.get(3)?;
            Ok((
                row.get::<_, i32>(0)?,
                kind_json,
                row.get::<_, String>(2)?,
                points_json,
            ))
        })
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
        .map_err(db_err)?;

    let mut out = SmallVec::new();
    for (id, kind_json, name, points_json) in forms {
        let kind: MaskKind = serde_json::from_str(&kind_json)
            .map_err(|e| DevelopError::Serialization(e.to_string()))?;
        let points: Vec<[f32; 2]> = serde_json::from_str(&points_json)
            .map_err(|e| DevelopError::Serialization(e.to_string()))?;
        let mut form = MaskForm::new(id, kind);
        form.name = name;
        form.points = points;
        out.push(form);
    }
    Ok(out)
}

/// First-run initialisation: seed the transient table with the default
/// modules and the preset-resolver output, then merge it below any
/// persisted history. Returns the number of inserted rows.
fn first_run_merge(
    conn: &mut Connection,
    image: &ImageInfo,
    registry: &ModuleRegistry,
    order: &OperationOrder,
) -> Result<usize> {
    conn.execute("DELETE FROM memory_history WHERE imgid = ?1", params![image.id.0])
        .map_err(db_err)?;

    let resolved = resolve_autoapply(
        conn,
        image,
        registry,
        order.workflow == Workflow::SceneReferred,
    )?;

    let tx = conn.transaction().map_err(db_err)?;
    let mut num: i64 = 0;

    // default modules first, skipping anything the presets will seed and
    // anything barred from the stack
    for desc in registry.descriptors() {
        if !desc.flags.contains(OpFlags::DEFAULT_ENABLED)
            || desc.flags.contains(OpFlags::NO_HISTORY_STACK)
        {
            continue;
        }
        if resolved.iter().any(|r| r.operation == desc.op) {
            continue;
        }
        tx.execute(
            "INSERT INTO memory_history (imgid, num, operation, op_params, module, enabled,
                                         blendop_params, blendop_version, multi_priority,
                                         multi_name, multi_name_hand_edited, iop_order, focus_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, 1, ?6, ?7, 0, '', 0, ?8, 0)",
            params![
                image.id.0,
                num,
                desc.op,
                desc.default_params,
                desc.version,
                desc.default_blend_params,
                BLEND_VERSION,
                order.rank_of(desc.op, 0).unwrap_or(0),
            ],
        )
        .map_err(db_err)?;
        num += 1;
    }

    for preset in &resolved {
        tx.execute(
            "INSERT INTO memory_history (imgid, num, operation, op_params, module, enabled,
                                         blendop_params, blendop_version, multi_priority,
                                         multi_name, multi_name_hand_edited, iop_order, focus_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, 0)",
            params![
                image.id.0,
                num,
                preset.operation,
                preset.op_params,
                preset.op_version,
                preset.enabled as i32,
                preset.blendop_params,
                preset.blendop_version,
                preset.multi_priority,
                preset.multi_name,
                preset.multi_name_hand_edited as i32,
                order
                    .rank_of(&preset.operation, preset.multi_priority)
                    .or_else(|| order.rank_of(&preset.operation, 0))
                    .unwrap_or(0),
            ],
        )
        .map_err(db_err)?;
        num += 1;
    }

    // shift any persisted rows up and merge the seed below them
    tx.execute(
        "UPDATE history SET num = num + ?2 WHERE imgid = ?1",
        params![image.id.0, num],
    )
    .map_err(db_err)?;
    tx.execute(
        "INSERT INTO history SELECT * FROM memory_history WHERE imgid = ?1",
        params![image.id.0],
    )
    .map_err(db_err)?;
    tx.execute(
        "UPDATE images SET history_end = history_end + ?2,
                           flags = flags | ?3
         WHERE id = ?1",
        params![
            image.id.0,
            num,
            image_flags::AUTO_PRESETS_APPLIED | image_flags::AUTO_PRESETS_APPLIED_SET_ONCE,
        ],
    )
    .map_err(db_err)?;
    tx.commit().map_err(db_err)?;

    Ok(num as usize)
}

/// Read the persisted history into the stack and module instances.
/// Presets are applied exactly once per image.
pub fn read_history(
    db: &Database,
    image: &mut ImageInfo,
    registry: &ModuleRegistry,
    order: &mut OperationOrder,
    instances: &mut Vec<ModuleInstance>,
    stack: &mut HistoryStack,
    snapshot: Option<i32>,
) -> Result<LoadOutcome> {
    let mut outcome = LoadOutcome::default();

    db.with_conn(|conn| {
        // stored per-image ordering wins; otherwise an ioporder preset;
        // otherwise the caller's workflow default stands
        let stored_blob: Option<String> = conn
            .query_row(
                "SELECT iop_order_blob FROM images WHERE id = ?1",
                params![image.id.0],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        if let Some(blob) = stored_blob {
            *order = OperationOrder::from_blob(&blob)?;
        } else if let Some(preset_order) = resolve_ioporder(conn, image)? {
            *order = preset_order;
        }
        order.validate(registry)?;
        order.apply_to_instances(instances);

        if snapshot.is_none() && !image.auto_presets_applied() {
            outcome.first_run = true;
            outcome.applied_presets = first_run_merge(conn, image, registry, order)?;
            image.set_flag(
                image_flags::AUTO_PRESETS_APPLIED | image_flags::AUTO_PRESETS_APPLIED_SET_ONCE,
            );
            info!(
                image = %image.id,
                presets = outcome.applied_presets,
                "first load, presets applied"
            );
        }

        stack.clear();
        let table = history_table(snapshot);
        let rows = query_history_rows(conn, &table, image.id.0)?;

        for row in rows {
            let Ok(operation) = registry.require(&row.operation) else {
                warn!(
                    image = %image.id,
                    op = %row.operation,
                    "dropping history entry for uninstalled operation"
                );
                outcome.migrated = true;
                continue;
            };
            let desc = operation.descriptor();

            if desc.flags.contains(OpFlags::NO_HISTORY_STACK) {
                warn!(op = %row.operation, "operation is barred from history, dropping entry");
                outcome.migrated = true;
                continue;
            }

            let mut priority = row.multi_priority;
            if desc.flags.contains(OpFlags::ONE_INSTANCE) && priority != 0 {
                warn!(
                    op = %row.operation,
                    priority,
                    "single-instance operation with nonzero priority, coercing to 0"
                );
                priority = 0;
                outcome.migrated = true;
            }

            let mut params_bytes = row.op_params.clone();
            let mut entry_enabled = row.enabled;
            let mut op_version = row.module_version;

            let needs_migration =
                op_version != desc.version || params_bytes.len() != desc.params_size;
            if needs_migration {
                match operation.legacy_params(&params_bytes, op_version) {
                    Ok((new_bytes, new_version)) => {
                        info!(
                            op = %row.operation,
                            from = op_version,
                            to = new_version,
                            "migrated legacy parameters"
                        );
                        // the orientation rework force-enables migrated
                        // flip entries
                        if row.operation == "flip" && op_version == 1 {
                            entry_enabled = true;
                        }
                        params_bytes = new_bytes;
                        op_version = new_version;
                        outcome.migrated = true;
                    }
                    Err(err) => {
                        warn!(
                            image = %image.id,
                            op = %row.operation,
                            stored = op_version,
                            current = desc.version,
                            %err,
                            "legacy migration failed, dropping entry"
                        );
                        outcome.migrated = true;
                        continue;
                    }
                }
            }

            let instance =
                find_or_create_instance(registry, order, instances, &row.operation, priority)?;

            let mut blend_bytes = row.blendop_params.clone();
            if row.operation == "spots" && row.module_version == 1 {
                // v1 spots predate per-entry blending; take the live ones
                blend_bytes = instance.blend_params.clone();
                outcome.migrated = true;
            } else if blend_bytes.len() != std::mem::size_of::<BlendParams>()
                || row.blendop_version != BLEND_VERSION
            {
                warn!(
                    op = %row.operation,
                    stored = row.blendop_version,
                    current = BLEND_VERSION,
                    "blend parameters unusable, resetting to defaults"
                );
                blend_bytes = desc.default_blend_params.clone();
                outcome.migrated = true;
            }

            if desc.flags.is_mandatory() {
                entry_enabled = true;
            }

            let iop_order = if row.iop_order != 0 {
                row.iop_order
            } else {
                order.rank_of(&row.operation, priority).unwrap_or(0)
            };

            let forms = query_mask_rows(conn, image.id.0, row.num)?;

            stack.push_raw(HistoryEntry {
                op: row.operation,
                op_version,
                instance_priority: priority,
                label: row.multi_name,
                label_hand_edited: row.multi_name_hand_edited,
                enabled: entry_enabled,
                params: params_bytes,
                blend_params: blend_bytes,
                iop_order,
                forms,
                focus_hash: row.focus_hash,
            });
        }

        let end: i64 = conn
            .query_row(
                "SELECT history_end FROM images WHERE id = ?1",
                params![image.id.0],
                |row| row.get(0),
            )
            .map_err(db_err)?;
        stack.set_cursor(end.max(0) as usize);
        Ok(())
    })?;

    if outcome.first_run || outcome.migrated {
        outcome.content_hash = write_history(db, image, stack, order)?;
    } else {
        outcome.content_hash = content_hash(stack, order);
    }
    Ok(outcome)
}

fn insert_entry(tx: &Transaction<'_>, imgid: i32, num: i64, entry: &HistoryEntry) -> Result<()> {
    tx.execute(
        "INSERT INTO history (imgid, num, operation, op_params, module, enabled,
                              blendop_params, blendop_version, multi_priority,
                              multi_name, multi_name_hand_edited, iop_order, focus_hash)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            imgid,
            num,
            entry.op,
            entry.params,
            entry.op_version,
            entry.enabled as i32,
            entry.blend_params,
            BLEND_VERSION,
            entry.instance_priority,
            entry.label,
            entry.label_hand_edited as i32,
            entry.iop_order,
            entry.focus_hash as i64,
        ],
    )
    .map_err(db_err)?;

    for form in &entry.forms {
        tx.execute(
            "INSERT INTO masks_history (imgid, num, formid, form_kind, name, points)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                imgid,
                num,
                form.id,
                serde_json::to_string(&form.kind)
                    .map_err(|e| DevelopError::Serialization(e.to_string()))?,
                form.name,
                serde_json::to_string(&form.points)
                    .map_err(|e| DevelopError::Serialization(e.to_string()))?,
            ],
        )
        .map_err(db_err)?;
    }
    Ok(())
}

/// Persist the whole stack: delete-and-insert inside a
/// transaction, update the image row, write the ordering blob and the
/// content hash. In-memory state is untouched on failure.
pub fn write_history(
    db: &Database,
    image: &ImageInfo,
    stack: &HistoryStack,
    order: &OperationOrder,
) -> Result<u64> {
    let hash = content_hash(stack, order);
    let order_blob = order.to_blob()?;

    db.with_conn(|conn| {
        let tx = conn
            .transaction()
            .map_err(|e| DevelopError::PersistenceConflict(e.to_string()))?;

        tx.execute("DELETE FROM history WHERE imgid = ?1", params![image.id.0])
            .map_err(db_err)?;
        tx.execute(
            "DELETE FROM masks_history WHERE imgid = ?1",
            params![image.id.0],
        )
        .map_err(db_err)?;

        for (num, entry) in stack.entries().iter().enumerate() {
            insert_entry(&tx, image.id.0, num as i64, entry)?;
        }

        tx.execute(
            "UPDATE images SET history_end = ?2, iop_order_blob = ?3,
                               content_hash = ?4, change_timestamp = ?5, flags = ?6
             WHERE id = ?1",
            params![
                image.id.0,
                stack.cursor() as i64,
                order_blob,
                hash as i64,
                image.change_timestamp,
                image.flags,
            ],
        )
        .map_err(db_err)?;

        tx.commit()
            .map_err(|e| DevelopError::PersistenceConflict(e.to_string()))?;
        Ok(())
    })?;

    Ok(hash)
}
