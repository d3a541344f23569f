//! History stack scenarios: coalescing, undo tail-drop, cursor laws.

use crate::common::{env_with_image, load, skip_presets};
use argent_modules::builtin::ExposureParams;
use argent_pipeline::{ChangeFlags, PipeKind};

// ── Coalesce ───────────────────────────────────────────────────

#[test]
fn identical_appends_coalesce_into_one_entry() {
    let env = env_with_image(96, 64);
    skip_presets(&env);
    let dev = load(&env);
    assert_eq!(dev.with_history(|s| s.len()), 0);

    let params = ExposureParams {
        black: 0.0,
        exposure: 0.7,
    };
    let bytes = bytemuck::bytes_of(&params).to_vec();

    let control = dev.control(PipeKind::Full).clone();

    let b = bytes.clone();
    dev.add_history_item("exposure", true, move |inst| inst.params = b)
        .unwrap();
    assert!(control.take_changed().contains(ChangeFlags::SYNCH));

    let b = bytes.clone();
    dev.add_history_item("exposure", true, move |inst| inst.params = b)
        .unwrap();
    assert!(control.take_changed().contains(ChangeFlags::TOP_CHANGED));

    dev.with_history(|s| {
        assert_eq!(s.len(), 1);
        assert_eq!(s.cursor(), 1);
        assert_eq!(s.active()[0].params, bytes);
    });
}

// ── Undo tail-drop ─────────────────────────────────────────────

#[test]
fn pop_then_append_drops_redo_tail() {
    let env = env_with_image(96, 64);
    skip_presets(&env);
    let dev = load(&env);

    // history [A, B, C]
    dev.set_focus(1);
    dev.add_history_item("exposure", true, |_| {}).unwrap();
    dev.set_focus(2);
    dev.add_history_item("sharpen", true, |_| {}).unwrap();
    dev.set_focus(3);
    dev.add_history_item("flip", true, |_| {}).unwrap();
    assert_eq!(dev.with_history(|s| (s.len(), s.cursor())), (3, 3));

    dev.pop_history(1).unwrap();
    assert_eq!(dev.with_history(|s| (s.len(), s.cursor())), (3, 1));

    dev.set_focus(4);
    dev.add_history_item("spots", true, |_| {}).unwrap();
    dev.with_history(|s| {
        assert_eq!(s.len(), 2);
        assert_eq!(s.cursor(), 2);
        assert_eq!(s.active()[0].op, "exposure");
        assert_eq!(s.active()[1].op, "spots");
    });
}

#[test]
fn pop_to_zero_renders_defaults() {
    let env = env_with_image(96, 64);
    skip_presets(&env);
    let dev = load(&env);

    let before = dev.instance_params("exposure", 0).unwrap();
    dev.add_history_item("exposure", true, |inst| {
        inst.params = bytemuck::bytes_of(&ExposureParams {
            black: 0.0,
            exposure: 2.0,
        })
        .to_vec();
    })
    .unwrap();
    assert_ne!(dev.instance_params("exposure", 0).unwrap(), before);

    dev.pop_history(0).unwrap();
    // replaying nothing resets the live instance to its defaults
    assert_eq!(dev.instance_params("exposure", 0).unwrap(), before);
    assert_eq!(dev.with_history(|s| s.cursor()), 0);
}

// ── Topology decisions on cursor moves ─────────────────────────

#[test]
fn cursor_move_with_same_module_set_raises_synch() {
    let env = env_with_image(96, 64);
    skip_presets(&env);
    let dev = load(&env);

    dev.set_focus(1);
    dev.add_history_item("exposure", true, |_| {}).unwrap();
    dev.set_focus(2);
    dev.add_history_item("exposure", false, |inst| inst.params[0] ^= 1)
        .unwrap();

    let control = dev.control(PipeKind::Preview).clone();
    control.take_changed();
    // both entries are the same instance: the module set is unchanged
    dev.pop_history(1).unwrap();
    let flags = control.take_changed();
    assert!(flags.contains(ChangeFlags::SYNCH));
    assert!(!flags.contains(ChangeFlags::REMOVE));
}

#[test]
fn cursor_move_changing_instance_set_raises_remove() {
    let env = env_with_image(96, 64);
    skip_presets(&env);
    let dev = load(&env);

    dev.set_focus(1);
    dev.add_history_item("sharpen", true, |_| {}).unwrap();
    dev.set_focus(2);
    dev.add_new_history_item("sharpen", 1, true, |_| {}).unwrap();

    let control = dev.control(PipeKind::Preview).clone();
    control.take_changed();
    // dropping below the duplicate's entry removes its instance
    dev.pop_history(1).unwrap();
    assert!(control.take_changed().contains(ChangeFlags::REMOVE));

    // and replaying past it brings the instance back
    control.take_changed();
    dev.pop_history(2).unwrap();
    assert!(control.take_changed().contains(ChangeFlags::REMOVE));
    assert!(dev.instance_params("sharpen", 1).is_some());
}

// ── Undo checkpoints ───────────────────────────────────────────

#[test]
fn undo_restores_previous_cursor_and_redo_returns() {
    let env = env_with_image(96, 64);
    skip_presets(&env);
    let dev = load(&env);

    dev.set_focus(1);
    dev.add_history_item("exposure", true, |_| {}).unwrap();
    dev.set_focus(2);
    dev.add_history_item("sharpen", true, |_| {}).unwrap();
    assert_eq!(dev.with_history(|s| s.cursor()), 2);

    assert!(dev.undo().unwrap());
    assert_eq!(dev.with_history(|s| s.cursor()), 1);
    assert!(dev.undo().unwrap());
    assert_eq!(dev.with_history(|s| s.cursor()), 0);
    assert!(!dev.undo().unwrap());

    assert!(dev.redo().unwrap());
    assert_eq!(dev.with_history(|s| s.cursor()), 1);
    assert!(dev.redo().unwrap());
    assert_eq!(dev.with_history(|s| s.cursor()), 2);
    assert!(!dev.redo().unwrap());
}

#[test]
fn mandatory_entries_stay_enabled() {
    let env = env_with_image(96, 64);
    let dev = load(&env);
    // the preset seed contains rawprepare; mandatory entries may never
    // be disabled
    dev.with_history(|s| {
        for entry in s.active() {
            if entry.op == "rawprepare" {
                assert!(entry.enabled);
            }
        }
    });
}
