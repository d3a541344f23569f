//! The preset resolver.
//!
//! Presets carry a selector over capture metadata. On an image's first
//! load, matching auto-apply presets become the seed history. Selector
//! string fields are SQL LIKE patterns; numeric fields are ranges;
//! `format` is a bitmask over the image flag bits (0 matches anything).

use rusqlite::{params, Connection};
use tracing::debug;

use argent_core::{ImageInfo, Result};
use argent_modules::{ModuleRegistry, OpFlags, OperationOrder};

use crate::schema::{db_err, Database};

/// Pseudo-operations that never become history entries.
const EXCLUDED_OPS: [&str; 6] = [
    "ioporder",
    "metadata",
    "modulegroups",
    "export",
    "tagging",
    "collect",
];

/// A stored preset.
#[derive(Debug, Clone)]
pub struct Preset {
    pub name: String,
    pub operation: String,
    pub op_version: i32,
    pub op_params: Vec<u8>,
    pub blendop_params: Vec<u8>,
    pub blendop_version: i32,
    pub enabled: bool,
    pub autoapply: bool,
    /// Built-in presets are write-protected; user presets are not and
    /// win over built-ins for the same operation.
    pub writeprotect: bool,
    pub model: String,
    pub maker: String,
    pub lens: String,
    pub iso_min: f32,
    pub iso_max: f32,
    pub exposure_min: f32,
    pub exposure_max: f32,
    pub aperture_min: f32,
    pub aperture_max: f32,
    pub focal_length_min: f32,
    pub focal_length_max: f32,
    pub format: u32,
    pub multi_name: String,
    pub multi_name_hand_edited: bool,
}

impl Preset {
    /// An auto-apply preset matching everything.
    pub fn catch_all(name: &str, operation: &str, op_version: i32, op_params: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            operation: operation.into(),
            op_version,
            op_params,
            blendop_params: Vec::new(),
            blendop_version: 0,
            enabled: true,
            autoapply: true,
            writeprotect: true,
            model: "%".into(),
            maker: "%".into(),
            lens: "%".into(),
            iso_min: 0.0,
            iso_max: f32::MAX,
            exposure_min: 0.0,
            exposure_max: f32::MAX,
            aperture_min: 0.0,
            aperture_max: f32::MAX,
            focal_length_min: 0.0,
            focal_length_max: 1_000_000.0,
            format: 0,
            multi_name: String::new(),
            multi_name_hand_edited: false,
        }
    }
}

/// Store a preset.
pub fn install_preset(db: &Database, preset: &Preset) -> Result<()> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT OR REPLACE INTO presets
                 (name, operation, op_version, op_params, blendop_params, blendop_version,
                  enabled, autoapply, writeprotect, model, maker, lens,
                  iso_min, iso_max, exposure_min, exposure_max, aperture_min, aperture_max,
                  focal_length_min, focal_length_max, format, multi_name, multi_name_hand_edited)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12,
                     ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23)",
            params![
                preset.name,
                preset.operation,
                preset.op_version,
                preset.op_params,
                preset.blendop_params,
                preset.blendop_version,
                preset.enabled as i32,
                preset.autoapply as i32,
                preset.writeprotect as i32,
                preset.model,
                preset.maker,
                preset.lens,
                preset.iso_min as f64,
                preset.iso_max as f64,
                preset.exposure_min as f64,
                preset.exposure_max as f64,
                preset.aperture_min as f64,
                preset.aperture_max as f64,
                preset.focal_length_min as f64,
                preset.focal_length_max as f64,
                preset.format,
                preset.multi_name,
                preset.multi_name_hand_edited as i32,
            ],
        )
        .map_err(db_err)?;
        Ok(())
    })
}

/// A preset selected for application, with its assigned instance
/// priority.
#[derive(Debug, Clone)]
pub struct ResolvedPreset {
    pub operation: String,
    pub op_version: i32,
    pub op_params: Vec<u8>,
    pub blendop_params: Vec<u8>,
    pub blendop_version: i32,
    pub enabled: bool,
    pub multi_priority: i32,
    pub multi_name: String,
    pub multi_name_hand_edited: bool,
}

fn query_matching(
    conn: &Connection,
    image: &ImageInfo,
    operation_filter: Option<&str>,
) -> Result<Vec<Preset>> {
    let mut sql = String::from(
        "SELECT name, operation, op_version, op_params, blendop_params, blendop_version,
                enabled, autoapply, writeprotect, model, maker, lens,
                iso_min, iso_max, exposure_min, exposure_max, aperture_min, aperture_max,
                focal_length_min, focal_length_max, format, multi_name, multi_name_hand_edited
         FROM presets
         WHERE autoapply = 1
           AND ?1 LIKE maker
           AND (?2 LIKE model OR ?3 LIKE model)
           AND ?4 LIKE lens
           AND ?5 BETWEEN iso_min AND iso_max
           AND ?6 BETWEEN exposure_min AND exposure_max
           AND ?7 BETWEEN aperture_min AND aperture_max
           AND ?8 BETWEEN focal_length_min AND focal_length_max
           AND (format = 0 OR (format & ?9) != 0)",
    );
    if operation_filter.is_some() {
        sql.push_str(" AND operation = ?10");
    }

    let mut stmt = conn.prepare(&sql).map_err(db_err)?;
    let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<Preset> {
        Ok(Preset {
            name: row.get(0)?,
            operation: row.get(1)?,
            op_version: row.get(2)?,
            op_params: row.get::<_, Option<Vec<u8>>>(3)?.unwrap_or_default(),
            blendop_params: row.get::<_, Option<Vec<u8>>>(4)?.unwrap_or_default(),
            blendop_version: row.get(5)?,
            enabled: row.get::<_, i32>(6)? != 0,
            autoapply: row.get::<_, i32>(7)? != 0,
            writeprotect: row.get::<_, i32>(8)? != 0,
            model: row.get(9)?,
            maker: row.get(10)?,
            lens: row.get(11)?,
            iso_min: row.get::<_, f64>(12)? as f32,
            iso_max: row.get::<_, f64>(13)? as f32,
            exposure_min: row.get::<_, f64>(14)? as f32,
            exposure_max: row.get::<_, f64>(15)? as f32,
            aperture_min: row.get::<_, f64>(16)? as f32,
            aperture_max: row.get::<_, f64>(17)? as f32,
            focal_length_min: row.get::<_, f64>(18)? as f32,
            focal_length_max: row.get::<_, f64>(19)? as f32,
            format: row.get(20)?,
            multi_name: row.get(21)?,
            multi_name_hand_edited: row.get::<_, i32>(22)? != 0,
        })
    };

    let rows = if let Some(op) = operation_filter {
        stmt.query_map(
            params![
                image.maker,
                image.model,
                image.camera_alias,
                image.lens,
                image.iso as f64,
                image.exposure as f64,
                image.aperture as f64,
                image.focal_length as f64,
                image.flags & 0xf,
                op,
            ],
            map_row,
        )
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
    } else {
        stmt.query_map(
            params![
                image.maker,
                image.model,
                image.camera_alias,
                image.lens,
                image.iso as f64,
                image.exposure as f64,
                image.aperture as f64,
                image.focal_length as f64,
                image.flags & 0xf,
            ],
            map_row,
        )
        .map_err(db_err)?
        .collect::<rusqlite::Result<Vec<_>>>()
    };

    rows.map_err(db_err)
}

/// Selector specificity: longer literal matches rank first.
fn specificity(p: &Preset) -> usize {
    let literal = |s: &str| s.chars().filter(|&c| c != '%').count();
    literal(&p.model) * 4 + literal(&p.maker) * 2 + literal(&p.lens)
}

/// Resolve the auto-apply presets for an image. Excludes pseudo-ops
/// (plus `basecurve` in a scene-referred workflow), prefers user presets
/// over built-ins per operation, ranks by selector specificity, and
/// serializes conflicting matches for one op into increasing instance
/// priorities.
pub fn resolve_autoapply(
    conn: &Connection,
    image: &ImageInfo,
    registry: &ModuleRegistry,
    scene_referred: bool,
) -> Result<Vec<ResolvedPreset>> {
    let mut matches = query_matching(conn, image, None)?;

    matches.retain(|p| {
        !EXCLUDED_OPS.contains(&p.operation.as_str())
            && !(scene_referred && p.operation == "basecurve")
    });

    // user presets win over built-ins per operation
    let mut ops: Vec<String> = matches.iter().map(|p| p.operation.clone()).collect();
    ops.sort();
    ops.dedup();

    let mut resolved = Vec::new();
    for op in ops {
        let mut group: Vec<&Preset> = matches.iter().filter(|p| p.operation == op).collect();
        if group.iter().any(|p| !p.writeprotect) {
            group.retain(|p| !p.writeprotect);
        }
        group.sort_by(|a, b| specificity(b).cmp(&specificity(a)).then(a.name.cmp(&b.name)));

        let one_instance = registry.flags(&op).contains(OpFlags::ONE_INSTANCE);
        let take = if one_instance { 1 } else { group.len() };
        for (priority, preset) in group.into_iter().take(take).enumerate() {
            resolved.push(ResolvedPreset {
                operation: preset.operation.clone(),
                op_version: preset.op_version,
                op_params: preset.op_params.clone(),
                blendop_params: preset.blendop_params.clone(),
                blendop_version: preset.blendop_version,
                enabled: preset.enabled,
                multi_priority: priority as i32,
                multi_name: if preset.multi_name.is_empty() {
                    preset.name.clone()
                } else {
                    preset.multi_name.clone()
                },
                multi_name_hand_edited: preset.multi_name_hand_edited,
            });
        }
    }

    debug!(image = %image.id, count = resolved.len(), "auto-apply presets resolved");
    Ok(resolved)
}

/// Select the ordering preset for an image, if any. The preset's
/// parameter blob is a serialized [`OperationOrder`].
pub fn resolve_ioporder(conn: &Connection, image: &ImageInfo) -> Result<Option<OperationOrder>> {
    let mut matches = query_matching(conn, image, Some("ioporder"))?;
    if matches.is_empty() {
        return Ok(None);
    }
    matches.sort_by(|a, b| specificity(b).cmp(&specificity(a)).then(a.name.cmp(&b.name)));
    let best = &matches[0];
    let blob = String::from_utf8(best.op_params.clone())
        .map_err(|e| argent_core::DevelopError::Serialization(e.to_string()))?;
    OperationOrder::from_blob(&blob).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use argent_modules::Workflow;

    fn setup() -> (Database, ImageInfo, ModuleRegistry) {
        (
            Database::open_in_memory().unwrap(),
            ImageInfo::test_image(1),
            ModuleRegistry::with_builtins(),
        )
    }

    fn resolve(db: &Database, image: &ImageInfo, reg: &ModuleRegistry) -> Vec<ResolvedPreset> {
        db.with_conn(|conn| resolve_autoapply(conn, image, reg, true))
            .unwrap()
    }

    #[test]
    fn test_catch_all_matches() {
        let (db, image, reg) = setup();
        install_preset(&db, &Preset::catch_all("base", "exposure", 2, vec![1, 2])).unwrap();
        let resolved = resolve(&db, &image, &reg);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].operation, "exposure");
        assert_eq!(resolved[0].multi_priority, 0);
    }

    #[test]
    fn test_maker_selector_filters() {
        let (db, image, reg) = setup();
        let mut p = Preset::catch_all("other-maker", "exposure", 2, vec![]);
        p.maker = "Nikoff%".into();
        install_preset(&db, &p).unwrap();
        assert!(resolve(&db, &image, &reg).is_empty());
    }

    #[test]
    fn test_iso_range_filters() {
        let (db, image, reg) = setup();
        let mut p = Preset::catch_all("high-iso", "exposure", 2, vec![]);
        p.iso_min = 1600.0;
        install_preset(&db, &p).unwrap();
        assert!(resolve(&db, &image, &reg).is_empty());

        let mut p2 = Preset::catch_all("low-iso", "exposure", 2, vec![]);
        p2.iso_max = 400.0;
        install_preset(&db, &p2).unwrap();
        assert_eq!(resolve(&db, &image, &reg).len(), 1);
    }

    #[test]
    fn test_user_preset_wins_over_builtin() {
        let (db, image, reg) = setup();
        install_preset(&db, &Preset::catch_all("builtin", "sharpen", 1, vec![1])).unwrap();
        let mut user = Preset::catch_all("mine", "sharpen", 1, vec![2]);
        user.writeprotect = false;
        install_preset(&db, &user).unwrap();

        let resolved = resolve(&db, &image, &reg);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].op_params, vec![2]);
    }

    #[test]
    fn test_conflicts_get_increasing_priorities() {
        let (db, image, reg) = setup();
        install_preset(&db, &Preset::catch_all("generic", "sharpen", 1, vec![1])).unwrap();
        let mut specific = Preset::catch_all("for-acme", "sharpen", 1, vec![2]);
        specific.maker = "ACME%".into();
        install_preset(&db, &specific).unwrap();

        let resolved = resolve(&db, &image, &reg);
        assert_eq!(resolved.len(), 2);
        // the more specific one comes first at priority 0
        assert_eq!(resolved[0].op_params, vec![2]);
        assert_eq!(resolved[0].multi_priority, 0);
        assert_eq!(resolved[1].multi_priority, 1);
    }

    #[test]
    fn test_one_instance_keeps_best_only() {
        let (db, image, reg) = setup();
        install_preset(&db, &Preset::catch_all("a", "flip", 2, vec![1])).unwrap();
        let mut b = Preset::catch_all("b", "flip", 2, vec![2]);
        b.model = "ACME X-1".into();
        install_preset(&db, &b).unwrap();

        let resolved = resolve(&db, &image, &reg);
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].op_params, vec![2]);
    }

    #[test]
    fn test_pseudo_ops_excluded() {
        let (db, image, reg) = setup();
        install_preset(&db, &Preset::catch_all("order", "ioporder", 1, vec![])).unwrap();
        install_preset(&db, &Preset::catch_all("tags", "tagging", 1, vec![])).unwrap();
        assert!(resolve(&db, &image, &reg).is_empty());
    }

    #[test]
    fn test_basecurve_excluded_in_scene_referred() {
        let (db, image, reg) = setup();
        install_preset(&db, &Preset::catch_all("curve", "basecurve", 1, vec![])).unwrap();
        assert!(resolve(&db, &image, &reg).is_empty());
        let display = db
            .with_conn(|conn| resolve_autoapply(conn, &image, &reg, false))
            .unwrap();
        assert_eq!(display.len(), 1);
    }

    #[test]
    fn test_ioporder_preset_selected() {
        let (db, image, reg) = setup();
        let order = OperationOrder::default_for(Workflow::DisplayReferred, &reg);
        let blob = order.to_blob().unwrap();
        install_preset(
            &db,
            &Preset::catch_all("camera-order", "ioporder", 1, blob.into_bytes()),
        )
        .unwrap();

        let found = db
            .with_conn(|conn| resolve_ioporder(conn, &image))
            .unwrap()
            .unwrap();
        assert_eq!(found.workflow, Workflow::DisplayReferred);
    }

    #[test]
    fn test_no_ioporder_preset_is_none() {
        let (db, image, _reg) = setup();
        assert!(db
            .with_conn(|conn| resolve_ioporder(conn, &image))
            .unwrap()
            .is_none());
    }
}
