//! Persistence scenarios: legacy migration, preset auto-apply,
//! round-trip law, sidecars.

use crate::common::{env_with_image, load, skip_presets};

use argent_core::ImageId;
use argent_db::{install_preset, read_sidecar, Preset};
use argent_develop::Develop;
use argent_modules::builtin::{ExposureParams, ExposureParamsV1, EXPOSURE_VERSION};
use argent_modules::{default_blend_bytes, BLEND_VERSION};

// ── Legacy migration (scenario: stored v1 exposure row) ────────

#[test]
fn legacy_exposure_row_migrates_and_roundtrips() {
    let env = env_with_image(96, 64);
    skip_presets(&env);

    let old = ExposureParamsV1 { exposure: 0.5 };
    env.db
        .with_conn(|conn| {
            conn.execute(
                "INSERT INTO history (imgid, num, operation, op_params, module, enabled,
                                      blendop_params, blendop_version, multi_priority,
                                      multi_name, multi_name_hand_edited, iop_order, focus_hash)
                 VALUES (1, 0, 'exposure', ?1, 1, 1, ?2, ?3, 0, '', 0, 2, 0)",
                (
                    bytemuck::bytes_of(&old).to_vec(),
                    default_blend_bytes(),
                    BLEND_VERSION,
                ),
            )
            .map_err(|e| argent_core::DevelopError::Database(e.to_string()))?;
            conn.execute("UPDATE images SET history_end = 1 WHERE id = 1", [])
                .map_err(|e| argent_core::DevelopError::Database(e.to_string()))?;
            Ok(())
        })
        .unwrap();

    let dev = load(&env);
    dev.with_history(|s| {
        assert_eq!(s.len(), 1);
        let entry = &s.active()[0];
        assert_eq!(entry.op_version, EXPOSURE_VERSION);
        let params: ExposureParams = bytemuck::pod_read_unaligned(&entry.params);
        assert_eq!(params.exposure, 0.5);
        assert_eq!(params.black, 0.0);
    });

    // the migrated row was persisted at the new version
    let stored_version: i32 = env
        .db
        .with_conn(|conn| {
            conn.query_row(
                "SELECT module FROM history WHERE imgid = 1 AND num = 0",
                [],
                |row| row.get(0),
            )
            .map_err(|e| argent_core::DevelopError::Database(e.to_string()))
        })
        .unwrap();
    assert_eq!(stored_version, EXPOSURE_VERSION);

    // and a fresh load yields identical in-memory state
    let again = Develop::load_image(env.clone(), ImageId(1), None).unwrap();
    let a = dev.with_history(|s| s.entries().to_vec());
    let b = again.with_history(|s| s.entries().to_vec());
    assert_eq!(a, b);
}

// ── Preset resolver runs exactly once ──────────────────────────

#[test]
fn presets_prepend_once_per_image() {
    let env = env_with_image(96, 64);
    let boost = ExposureParams {
        black: 0.0,
        exposure: 1.0,
    };
    install_preset(
        &env.db,
        &Preset::catch_all(
            "auto boost",
            "exposure",
            EXPOSURE_VERSION,
            bytemuck::bytes_of(&boost).to_vec(),
        ),
    )
    .unwrap();

    let dev = load(&env);
    let (len, has_exposure) = dev.with_history(|s| {
        (
            s.len(),
            s.active().iter().any(|e| e.op == "exposure"),
        )
    });
    assert!(len > 0);
    assert!(has_exposure);
    assert!(dev.image().auto_presets_applied());

    // a second load of the same image must not prepend again
    let again = Develop::load_image(env.clone(), ImageId(1), None).unwrap();
    assert_eq!(again.with_history(|s| s.len()), len);
}

// ── Round-trip law ─────────────────────────────────────────────

#[test]
fn write_read_roundtrip_preserves_state() {
    let env = env_with_image(96, 64);
    let dev = load(&env);

    dev.set_focus(1);
    dev.add_history_item("exposure", true, |inst| {
        inst.params = bytemuck::bytes_of(&ExposureParams {
            black: 0.01,
            exposure: -0.3,
        })
        .to_vec();
    })
    .unwrap();
    dev.set_focus(2);
    dev.add_history_item("sharpen", true, |_| {}).unwrap();
    dev.pop_history(dev.with_history(|s| s.cursor()) - 1).unwrap();

    let hash = dev.write_history().unwrap();
    let entries = dev.with_history(|s| s.entries().to_vec());
    let cursor = dev.with_history(|s| s.cursor());

    let again = Develop::load_image(env.clone(), ImageId(1), None).unwrap();
    assert_eq!(again.with_history(|s| s.entries().to_vec()), entries);
    assert_eq!(again.with_history(|s| s.cursor()), cursor);
    assert_eq!(again.write_history().unwrap(), hash);
}

// ── Sidecar ────────────────────────────────────────────────────

#[test]
fn sidecar_export_matches_store_hash() {
    let dir = std::env::temp_dir().join("argent-tests-sidecar");
    std::fs::create_dir_all(&dir).unwrap();

    let env = {
        use argent_develop::{DevelopConfig, Env, SyntheticRaw};
        use argent_modules::ModuleRegistry;
        use std::sync::Arc;
        let db = argent_db::Database::open_in_memory().unwrap();
        let mut image = argent_core::ImageInfo::test_image(1);
        image.width = 96;
        image.height = 64;
        db.upsert_image(&image).unwrap();
        let source = Arc::new(SyntheticRaw);
        Env::new(
            db,
            ModuleRegistry::with_builtins(),
            source.clone(),
            source,
            DevelopConfig {
                autosave_enabled: false,
                sidecar_dir: Some(dir.clone()),
                ..Default::default()
            },
        )
    };

    let dev = load(&env);
    dev.add_history_item("exposure", true, |_| {}).unwrap();

    let store_hash = dev.write_history().unwrap();
    let sidecar_hash = dev.export_sidecar().unwrap().unwrap();
    assert_eq!(store_hash, sidecar_hash);

    let doc = read_sidecar(&dir.join("1.argent.json")).unwrap();
    assert_eq!(doc.content_hash, store_hash);
    assert_eq!(doc.history_end, dev.with_history(|s| s.cursor()));
    std::fs::remove_file(dir.join("1.argent.json")).ok();
}
