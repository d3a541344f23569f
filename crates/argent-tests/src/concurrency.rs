//! Concurrency scenarios: mid-run invalidation, clean unload, the
//! scheduler's coalescing pool.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use crate::common::{env_with_registry, load, skip_presets};

use argent_core::{PixelBuffer, Result, Roi};
use argent_develop::DevelopSignal;
use argent_modules::{
    default_blend_bytes, ModuleRegistry, OpDescriptor, OpFlags, Operation, ProcessContext,
    ProcessStatus,
};
use argent_pipeline::{PipeKind, PipeStatus, RenderRequest, RenderScheduler};

// ── A controllable operation ───────────────────────────────────

/// Blocks inside `process` until released, polling the shutdown token
/// like a well-behaved module.
struct GateOp {
    desc: OpDescriptor,
    runs: Arc<(Mutex<usize>, Condvar)>,
    release: Arc<AtomicBool>,
}

impl GateOp {
    fn new(runs: Arc<(Mutex<usize>, Condvar)>, release: Arc<AtomicBool>) -> Self {
        Self {
            desc: OpDescriptor {
                op: "gate",
                version: 1,
                params_size: 0,
                default_params: Vec::new(),
                default_blend_params: default_blend_bytes(),
                flags: OpFlags::DEFAULT_ENABLED | OpFlags::HIDE_ENABLE_BUTTON | OpFlags::HIDDEN,
            },
            runs,
            release,
        }
    }
}

impl Operation for GateOp {
    fn descriptor(&self) -> &OpDescriptor {
        &self.desc
    }

    fn process(
        &self,
        _params: &[u8],
        _blend: &[u8],
        input: &PixelBuffer,
        output: &mut PixelBuffer,
        _roi_in: Roi,
        _roi_out: Roi,
        ctx: &ProcessContext<'_>,
    ) -> Result<ProcessStatus> {
        {
            let (count, cvar) = &*self.runs;
            *count.lock().unwrap() += 1;
            cvar.notify_all();
        }
        while !self.release.load(Ordering::SeqCst) {
            if ctx.shutdown.is_cancelled() {
                return Ok(ProcessStatus::Interrupted);
            }
            std::thread::sleep(Duration::from_millis(1));
        }
        output.data_mut().copy_from_slice(input.data());
        Ok(ProcessStatus::Complete)
    }
}

fn wait_runs(runs: &Arc<(Mutex<usize>, Condvar)>, at_least: usize) {
    let (count, cvar) = &**runs;
    let mut guard = count.lock().unwrap();
    let deadline = Instant::now() + Duration::from_secs(5);
    while *guard < at_least {
        let remaining = deadline.saturating_duration_since(Instant::now());
        assert!(!remaining.is_zero(), "gate op never reached {at_least} runs");
        let (g, _) = cvar.wait_timeout(guard, remaining).unwrap();
        guard = g;
    }
}

fn gated_setup() -> (
    Arc<argent_develop::Env>,
    Arc<(Mutex<usize>, Condvar)>,
    Arc<AtomicBool>,
) {
    let runs = Arc::new((Mutex::new(0usize), Condvar::new()));
    let release = Arc::new(AtomicBool::new(false));
    let mut registry = ModuleRegistry::with_builtins();
    registry.register(Arc::new(GateOp::new(runs.clone(), release.clone())));
    let env = env_with_registry(64, 48, registry);
    skip_presets(&env);
    (env, runs, release)
}

// ── Mid-run invalidation restarts the run (scenario 4, P12) ────

#[test]
fn invalidation_mid_run_interrupts_and_restarts() {
    let (env, runs, release) = gated_setup();
    let dev = load(&env);

    let worker = {
        let dev = dev.clone();
        std::thread::spawn(move || dev.process(PipeKind::Full))
    };

    wait_runs(&runs, 1);
    dev.invalidate_all();
    // the chain re-plans and re-enters the gate
    wait_runs(&runs, 2);
    release.store(true, Ordering::SeqCst);

    let status = worker.join().unwrap();
    assert_eq!(status, PipeStatus::Valid);
    assert!(dev.backbuffer(PipeKind::Full).is_some());
}

// ── Clean unload (P9) ──────────────────────────────────────────

#[test]
fn close_terminates_in_flight_run_without_publishing() {
    let (env, runs, _release) = gated_setup();
    let dev = load(&env);

    let worker = {
        let dev = dev.clone();
        std::thread::spawn(move || dev.process(PipeKind::Full))
    };

    wait_runs(&runs, 1);
    dev.close();

    let status = worker.join().unwrap();
    assert_eq!(status, PipeStatus::Invalid);
    assert!(dev.backbuffer(PipeKind::Full).is_none());

    // once closing, nothing ever publishes VALID again
    assert_eq!(dev.process(PipeKind::Preview), PipeStatus::Invalid);
}

// ── Scheduler wiring ───────────────────────────────────────────

#[test]
fn scheduler_drives_runs_and_emits_pipe_finished() {
    let (env, _runs, release) = gated_setup();
    release.store(true, Ordering::SeqCst);
    let dev = load(&env);

    let finished = Arc::new(AtomicUsize::new(0));
    {
        let finished = finished.clone();
        env.signals.connect(move |signal| {
            if matches!(signal, DevelopSignal::PipeFinished(PipeKind::Preview)) {
                finished.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    let scheduler = {
        let dev = dev.clone();
        Arc::new(RenderScheduler::new(Arc::new(move |req: RenderRequest| {
            dev.process(req.kind);
        })))
    };
    dev.attach_scheduler(scheduler);

    dev.add_history_item("exposure", true, |_| {}).unwrap();

    let deadline = Instant::now() + Duration::from_secs(5);
    while finished.load(Ordering::SeqCst) == 0 {
        assert!(Instant::now() < deadline, "preview never finished");
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(dev.backbuffer(PipeKind::Preview).is_some());
}
