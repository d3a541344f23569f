//! Pipeline scenarios: determinism, cache reuse, viewport clamping,
//! hash wait.

use crate::common::{env_with_image, load, skip_presets};

use argent_modules::builtin::ExposureParams;
use argent_pipeline::{PipeKind, PipeStatus, Viewport, WaitDirection, WaitOutcome, ZoomMode};

// ── Determinism (P7/P10) ───────────────────────────────────────

#[test]
fn identical_state_produces_identical_output() {
    let env_a = env_with_image(96, 64);
    let env_b = env_with_image(96, 64);
    let dev_a = load(&env_a);
    let dev_b = load(&env_b);

    assert_eq!(dev_a.process(PipeKind::Preview), PipeStatus::Valid);
    assert_eq!(dev_b.process(PipeKind::Preview), PipeStatus::Valid);

    let a = dev_a.backbuffer(PipeKind::Preview).unwrap();
    let b = dev_b.backbuffer(PipeKind::Preview).unwrap();
    assert_eq!(a.buffer.data(), b.buffer.data());
    assert_eq!(
        dev_a.control(PipeKind::Preview).last_fingerprint(),
        dev_b.control(PipeKind::Preview).last_fingerprint()
    );
}

#[test]
fn edit_changes_output_and_fingerprint() {
    let env = env_with_image(96, 64);
    let dev = load(&env);

    assert_eq!(dev.process(PipeKind::Preview), PipeStatus::Valid);
    let before = dev.backbuffer(PipeKind::Preview).unwrap();
    let fp_before = dev.control(PipeKind::Preview).last_fingerprint();

    dev.add_history_item("exposure", true, |inst| {
        inst.params = bytemuck::bytes_of(&ExposureParams {
            black: 0.0,
            exposure: 1.5,
        })
        .to_vec();
    })
    .unwrap();

    assert_eq!(dev.process(PipeKind::Preview), PipeStatus::Valid);
    let after = dev.backbuffer(PipeKind::Preview).unwrap();
    assert_ne!(before.buffer.data(), after.buffer.data());
    assert_ne!(fp_before, dev.control(PipeKind::Preview).last_fingerprint());
}

// ── Back-buffer dimensions (P8) ────────────────────────────────

#[test]
fn full_backbuffer_matches_viewport_window() {
    let env = env_with_image(640, 480);
    skip_presets(&env);
    let dev = load(&env);

    dev.set_viewport(
        PipeKind::Full,
        Viewport {
            mode: ZoomMode::OneToOne,
            win_width: 200,
            win_height: 100,
            ..Default::default()
        },
    );
    assert_eq!(dev.process(PipeKind::Full), PipeStatus::Valid);
    let bb = dev.backbuffer(PipeKind::Full).unwrap();
    assert_eq!((bb.width, bb.height), (200, 100));
}

#[test]
fn oversized_window_clamps_to_image() {
    let env = env_with_image(64, 48);
    skip_presets(&env);
    let dev = load(&env);

    dev.set_viewport(
        PipeKind::Full,
        Viewport {
            mode: ZoomMode::OneToOne,
            win_width: 4000,
            win_height: 4000,
            zoom_x: 0.4,
            zoom_y: -0.4,
            ..Default::default()
        },
    );
    assert_eq!(dev.process(PipeKind::Full), PipeStatus::Valid);
    let bb = dev.backbuffer(PipeKind::Full).unwrap();
    assert_eq!((bb.width, bb.height), (64, 48));
    // the zoom center was forced back to 0 on both axes
    assert_eq!((bb.zoom_x, bb.zoom_y), (0.0, 0.0));
}

// ── Preview uses the downsampled source ────────────────────────

#[test]
fn preview_processes_whole_downsampled_source() {
    let env = env_with_image(640, 480);
    skip_presets(&env);
    let dev = load(&env);

    assert_eq!(dev.process(PipeKind::Preview), PipeStatus::Valid);
    let bb = dev.backbuffer(PipeKind::Preview).unwrap();
    // default downsample factor is 1/2
    assert_eq!((bb.width, bb.height), (320, 240));
    assert!((bb.scale - 0.5).abs() < 1e-6);
}

// ── Hash wait (scenario 6) ─────────────────────────────────────

#[test]
fn wait_hash_matches_after_run_then_detects_staleness() {
    let env = env_with_image(96, 64);
    let dev = load(&env);

    assert_eq!(dev.process(PipeKind::Preview), PipeStatus::Valid);
    let h = dev
        .control(PipeKind::Preview)
        .last_fingerprint()
        .unwrap();

    // rank beyond the last node covers the whole pipeline
    let outcome = dev.wait_hash(PipeKind::Preview, i32::MAX, WaitDirection::ForwardIncl, h);
    assert_eq!(outcome, WaitOutcome::Matched);

    dev.add_history_item("sharpen", true, |_| {}).unwrap();
    let outcome = dev.wait_hash(PipeKind::Preview, i32::MAX, WaitDirection::ForwardIncl, h);
    // never a silent Matched at the stale hash
    assert!(matches!(
        outcome,
        WaitOutcome::ReprocessRequested | WaitOutcome::TimedOut
    ));
}

#[test]
fn wait_hash_directions_agree_on_rank_boundaries() {
    let env = env_with_image(96, 64);
    let dev = load(&env);
    assert_eq!(dev.process(PipeKind::Preview), PipeStatus::Valid);

    let control = dev.control(PipeKind::Preview);
    let full = control.last_fingerprint().unwrap();
    // rank 1 is the first node; excluding rank 2 covers the same prefix
    let at_first = control.fingerprint_at(1, WaitDirection::ForwardIncl);
    let excl_second = control.fingerprint_at(2, WaitDirection::ForwardExcl);
    assert!(at_first.is_some());
    assert_eq!(at_first, excl_second);
    assert_ne!(at_first, Some(full));
}
