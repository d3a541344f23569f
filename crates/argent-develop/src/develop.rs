//! The develop state and controller.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use argent_core::{DevelopError, ImageId, ImageInfo, Result};
use argent_db::{export_sidecar, read_history, write_history};
use argent_history::{forms_changed, AppendOutcome, HistoryStack, MaskForm, UndoGate};
use argent_modules::{ModuleInstance, OpFlags, OperationOrder};
use argent_pipeline::{
    plan_from_instances, wait_hash, BackBuffer, ChangeFlags, PipeControl, PipeKind, PipeStatus,
    Pipeline, RenderRequest, RenderScheduler, RunContext, SourceBuffer, Viewport, WaitDirection,
    WaitOutcome,
};

use crate::env::Env;
use crate::signals::DevelopSignal;

/// Everything guarded by the history mutex. Lock order when several are
/// needed: init lock, then this, then a pipeline mutex. The one
/// sanctioned inversion is a render run re-planning mid-run: it holds
/// its pipeline mutex and takes this lock briefly, which is safe because
/// edit intents never take a pipeline mutex while holding this lock.
struct EditState {
    image: ImageInfo,
    order: OperationOrder,
    instances: Vec<ModuleInstance>,
    stack: HistoryStack,
    undo_gate: UndoGate,
    undo_marks: Vec<usize>,
    redo_marks: Vec<usize>,
    /// Opaque coalescing token supplied by the editing surface.
    focus_hash: u64,
    /// The currently edited mask set.
    forms: Vec<MaskForm>,
    /// Monotonic time of the last autosave.
    autosave_last: Option<f64>,
}

/// One develop state per loaded image.
pub struct Develop {
    env: Arc<Env>,
    state: Mutex<EditState>,

    full: Mutex<Pipeline>,
    preview: Mutex<Pipeline>,
    secondary: Mutex<Pipeline>,
    full_control: Arc<PipeControl>,
    preview_control: Arc<PipeControl>,
    secondary_control: Arc<PipeControl>,

    published_full: Mutex<Option<BackBuffer>>,
    published_preview: Mutex<Option<BackBuffer>>,
    published_secondary: Mutex<Option<BackBuffer>>,

    viewport_full: Mutex<Viewport>,
    viewport_secondary: Mutex<Viewport>,

    scheduler: Mutex<Option<Arc<RenderScheduler>>>,

    /// Monotonic develop timestamp; every invalidation bumps it.
    timestamp: AtomicU64,
    /// Kill switch observed by every run loop and module chunk.
    gui_leaving: AtomicBool,
    autosave_disabled: AtomicBool,
    started: Instant,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

impl Develop {
    /// Load an image into a fresh develop state: blocking raw load,
    /// module instantiation, history read with preset auto-apply.
    pub fn load_image(env: Arc<Env>, imgid: ImageId, snapshot: Option<i32>) -> Result<Arc<Self>> {
        let _init = env.lock_init();

        let mut image = match env.db.load_image(imgid) {
            Ok(image) => image,
            Err(err) => {
                env.note_invalid_image();
                return Err(err);
            }
        };
        let raw = match env.raw.load(&image) {
            Ok(raw) => raw,
            Err(err) => {
                env.note_invalid_image();
                warn!(image = %imgid, %err, "raw load failed");
                return Err(DevelopError::InvalidImage(imgid));
            }
        };

        let registry = env.registry.clone();
        let mut order = OperationOrder::default_for(env.config.workflow, &registry);
        let mut instances = registry.instantiate_all();
        for inst in &mut instances {
            if let Some(op) = registry.get(&inst.op) {
                if let Some(bytes) = op.reload_defaults(&image) {
                    inst.params = bytes;
                }
            }
        }
        order.apply_to_instances(&mut instances);

        let mut stack = HistoryStack::new();
        read_history(
            &env.db,
            &mut image,
            &registry,
            &mut order,
            &mut instances,
            &mut stack,
            snapshot,
        )?;
        let cursor = stack.cursor();

        let cache_lines = env.config.cache_lines;
        let full = Pipeline::new(PipeKind::Full, cache_lines);
        let preview = Pipeline::new(PipeKind::Preview, cache_lines);
        let secondary = Pipeline::new(PipeKind::Secondary, cache_lines);
        let (full_control, preview_control, secondary_control) =
            (full.control(), preview.control(), secondary.control());

        let dev = Arc::new(Self {
            state: Mutex::new(EditState {
                image,
                order,
                instances,
                stack,
                undo_gate: UndoGate::new(env.config.merge_same_secs, env.config.review_secs),
                undo_marks: Vec::new(),
                redo_marks: Vec::new(),
                focus_hash: 0,
                forms: Vec::new(),
                autosave_last: None,
            }),
            full: Mutex::new(full),
            preview: Mutex::new(preview),
            secondary: Mutex::new(secondary),
            full_control,
            preview_control,
            secondary_control,
            published_full: Mutex::new(None),
            published_preview: Mutex::new(None),
            published_secondary: Mutex::new(None),
            viewport_full: Mutex::new(Viewport::default()),
            viewport_secondary: Mutex::new(Viewport::default()),
            scheduler: Mutex::new(None),
            timestamp: AtomicU64::new(1),
            gui_leaving: AtomicBool::new(false),
            autosave_disabled: AtomicBool::new(false),
            started: Instant::now(),
            env: env.clone(),
        });

        // sources: full and secondary at native resolution, preview from
        // the mipmap cache (best-effort; the preview stays DIRTY until
        // the cache delivers)
        {
            let mut state = dev.state.lock().unwrap();
            let factor = dev.env.config.preview_downsample;
            dev.full.lock().unwrap().set_source(SourceBuffer {
                buffer: raw.clone(),
                scale: 1.0,
            });
            dev.secondary.lock().unwrap().set_source(SourceBuffer {
                buffer: raw,
                scale: 1.0,
            });
            if let Some(buffer) = dev.env.mipmap.preview(&state.image, factor) {
                dev.preview.lock().unwrap().set_source(SourceBuffer {
                    buffer,
                    scale: factor.as_f32(),
                });
            }
            dev.pop_to_locked(&mut state, cursor)?;
        }

        info!(image = %imgid, cursor, "develop state loaded");
        Ok(dev)
    }

    // ── Accessors ───────────────────────────────────────────────

    pub fn env(&self) -> &Arc<Env> {
        &self.env
    }

    pub fn image(&self) -> ImageInfo {
        self.state.lock().unwrap().image.clone()
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp.load(Ordering::SeqCst)
    }

    /// Inspect the history stack under the history mutex.
    pub fn with_history<R>(&self, f: impl FnOnce(&HistoryStack) -> R) -> R {
        f(&self.state.lock().unwrap().stack)
    }

    /// Live parameters of an instance, if present.
    pub fn instance_params(&self, op: &str, priority: i32) -> Option<Vec<u8>> {
        let state = self.state.lock().unwrap();
        state
            .instances
            .iter()
            .find(|i| i.op == op && i.instance_priority == priority)
            .map(|i| i.params.clone())
    }

    fn pipe(&self, kind: PipeKind) -> &Mutex<Pipeline> {
        match kind {
            PipeKind::Full => &self.full,
            PipeKind::Preview => &self.preview,
            PipeKind::Secondary => &self.secondary,
        }
    }

    pub fn control(&self, kind: PipeKind) -> &Arc<PipeControl> {
        match kind {
            PipeKind::Full => &self.full_control,
            PipeKind::Preview => &self.preview_control,
            PipeKind::Secondary => &self.secondary_control,
        }
    }

    fn published(&self, kind: PipeKind) -> &Mutex<Option<BackBuffer>> {
        match kind {
            PipeKind::Full => &self.published_full,
            PipeKind::Preview => &self.published_preview,
            PipeKind::Secondary => &self.published_secondary,
        }
    }

    /// The viewer's copy of the latest valid back-buffer.
    pub fn backbuffer(&self, kind: PipeKind) -> Option<BackBuffer> {
        self.published(kind).lock().unwrap().clone()
    }

    fn now_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    // ── Edit intents ────────────────────────────────────────────

    /// Set the coalescing token for subsequent edits (e.g. on focus
    /// change of the editing widget).
    pub fn set_focus(&self, token: u64) {
        self.state.lock().unwrap().focus_hash = token;
    }

    /// Replace the currently edited mask set.
    pub fn set_forms(&self, forms: Vec<MaskForm>) {
        self.state.lock().unwrap().forms = forms;
    }

    /// Record an edit of `(op, 0)`.
    pub fn add_history_item(
        &self,
        op: &str,
        enable: bool,
        mutate: impl FnOnce(&mut ModuleInstance),
    ) -> Result<()> {
        self.add_item_inner(op, 0, enable, false, None, false, mutate)
    }

    /// Record an edit with an undo-coalescing target.
    pub fn add_history_item_target(
        &self,
        op: &str,
        priority: i32,
        enable: bool,
        target: Option<u64>,
        mutate: impl FnOnce(&mut ModuleInstance),
    ) -> Result<()> {
        self.add_item_inner(op, priority, enable, false, target, false, mutate)
    }

    /// Record an edit that must become a new entry even if the tail
    /// matches (new instance, explicit duplication).
    pub fn add_new_history_item(
        &self,
        op: &str,
        priority: i32,
        enable: bool,
        mutate: impl FnOnce(&mut ModuleInstance),
    ) -> Result<()> {
        self.add_item_inner(op, priority, enable, true, None, false, mutate)
    }

    /// Record a mask edit. Without an anchor operation the entry goes to
    /// the mask manager.
    pub fn add_masks_history_item(&self, anchor: Option<(&str, i32)>, enable: bool) -> Result<()> {
        let (op, priority, enable) = match anchor {
            Some((op, priority)) => (op.to_string(), priority, enable),
            None => ("mask_manager".to_string(), 0, false),
        };
        self.add_item_inner(&op, priority, enable, false, None, true, |_| {})
    }

    #[allow(clippy::too_many_arguments)]
    fn add_item_inner(
        &self,
        op: &str,
        priority: i32,
        enable: bool,
        new_item: bool,
        target: Option<u64>,
        include_masks: bool,
        mutate: impl FnOnce(&mut ModuleInstance),
    ) -> Result<()> {
        let now = self.now_secs();
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        let idx = Self::find_or_create_instance(
            &self.env,
            &mut state.order,
            &mut state.instances,
            op,
            priority,
        )?;
        let inst = &mut state.instances[idx];
        mutate(inst);
        if enable {
            inst.enabled = true;
        }
        let label_changed = inst.refresh_auto_label();
        let inst = inst.clone();

        // a renamed instance always opens a fresh checkpoint
        let target = if label_changed { None } else { target };
        if state.undo_gate.should_record(target, now) {
            state.undo_marks.push(state.stack.cursor());
            state.redo_marks.clear();
        }

        let forms = include_masks.then(|| state.forms.clone());
        let outcome = state.stack.append(
            &self.env.registry,
            &inst,
            new_item,
            forms.as_deref(),
            state.focus_hash,
        );
        let flags = match outcome {
            AppendOutcome::Replaced => ChangeFlags::TOP_CHANGED,
            AppendOutcome::Pushed => ChangeFlags::SYNCH,
        };
        self.raise_all(flags);
        state.image.change_timestamp = unix_now();

        self.maybe_autosave(state, now)?;
        drop(guard);

        self.env.signals.raise(DevelopSignal::HistoryChange);
        self.env.signals.raise(DevelopSignal::ImageChanged);
        self.kick_all();
        Ok(())
    }

    fn find_or_create_instance(
        env: &Env,
        order: &mut OperationOrder,
        instances: &mut Vec<ModuleInstance>,
        op: &str,
        priority: i32,
    ) -> Result<usize> {
        if let Some(idx) = instances
            .iter()
            .position(|i| i.op == op && i.instance_priority == priority)
        {
            return Ok(idx);
        }
        let operation = env.registry.require(op)?;
        let desc = operation.descriptor();
        if desc.flags.contains(OpFlags::ONE_INSTANCE) && priority != 0 {
            return Err(DevelopError::InvalidParameter(format!(
                "{op} is single-instance"
            )));
        }
        let base = instances
            .iter()
            .filter(|i| i.op == op && i.instance_priority < priority)
            .map(|i| i.instance_priority)
            .max()
            .unwrap_or(0);
        let mut inst = ModuleInstance::from_descriptor(desc);
        inst.instance_priority = priority;
        if order.rank_of(op, priority).is_none() {
            order.insert_duplicate(op, base, priority)?;
        }
        inst.iop_order = order.rank_of(op, priority).unwrap_or(0);
        inst.refresh_auto_label();
        instances.push(inst);
        Ok(instances.len() - 1)
    }

    // ── Cursor movement ─────────────────────────────────────────

    /// Move the cursor to `n`, replaying entries `[0, n)` into the
    /// module instances.
    pub fn pop_history(&self, n: usize) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        self.pop_to_locked(&mut state, n)?;
        drop(state);
        self.env.signals.raise(DevelopSignal::HistoryChange);
        self.kick_all();
        Ok(())
    }

    pub fn undo(&self) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(mark) = state.undo_marks.pop() else {
            return Ok(false);
        };
        let cursor = state.stack.cursor();
        state.redo_marks.push(cursor);
        self.pop_to_locked(&mut state, mark)?;
        drop(state);
        self.env.signals.raise(DevelopSignal::HistoryChange);
        self.kick_all();
        Ok(true)
    }

    pub fn redo(&self) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        let Some(mark) = state.redo_marks.pop() else {
            return Ok(false);
        };
        let cursor = state.stack.cursor();
        state.undo_marks.push(cursor);
        self.pop_to_locked(&mut state, mark)?;
        drop(state);
        self.env.signals.raise(DevelopSignal::HistoryChange);
        self.kick_all();
        Ok(true)
    }

    /// The mask set visible at cursor `n`: the latest snapshot at or
    /// below it.
    fn forms_at(stack: &HistoryStack, n: usize) -> Vec<MaskForm> {
        stack.entries()[..n.min(stack.len())]
            .iter()
            .rev()
            .find(|e| !e.forms.is_empty())
            .map(|e| e.forms.to_vec())
            .unwrap_or_default()
    }

    fn pop_to_locked(&self, state: &mut EditState, n: usize) -> Result<()> {
        let registry = &self.env.registry;
        let n = n.min(state.stack.len());

        let prev_topology = plan_from_instances(registry, &state.instances).topology();
        let prev_forms = Self::forms_at(&state.stack, state.stack.cursor());

        for inst in &mut state.instances {
            if let Some(op) = registry.get(&inst.op) {
                inst.reset_to_defaults(op.descriptor());
                if let Some(bytes) = op.reload_defaults(&state.image) {
                    inst.params = bytes;
                }
            }
        }
        state.order.apply_to_instances(&mut state.instances);

        for i in 0..n {
            let entry = state.stack.entry(i).cloned();
            let Some(entry) = entry else { break };
            let idx = Self::find_or_create_instance(
                &self.env,
                &mut state.order,
                &mut state.instances,
                &entry.op,
                entry.instance_priority,
            )?;
            let inst = &mut state.instances[idx];
            inst.params = entry.params.clone();
            inst.blend_params = entry.blend_params.clone();
            inst.enabled = entry.enabled;
            inst.label = entry.label.clone();
            inst.label_hand_edited = entry.label_hand_edited;
            inst.iop_order = entry.iop_order;
        }
        state.stack.set_cursor(n);

        // duplicate instances exist only while the active prefix
        // references them; their ordering slot survives for a redo
        let stack = &state.stack;
        state.instances.retain(|inst| {
            inst.instance_priority == 0
                || stack
                    .active()
                    .iter()
                    .any(|e| e.key() == (inst.op.as_str(), inst.instance_priority))
        });

        let new_topology = plan_from_instances(registry, &state.instances).topology();
        let new_forms = Self::forms_at(&state.stack, n);

        if new_topology != prev_topology {
            self.raise_all(ChangeFlags::REMOVE);
        } else {
            self.raise_all(ChangeFlags::SYNCH);
        }
        if forms_changed(&prev_forms, &new_forms) {
            state.forms = new_forms;
            self.env.signals.raise(DevelopSignal::MaskListChanged);
        }
        Ok(())
    }

    /// Re-read everything from the store, e.g. after an external tool
    /// rewrote the history. Replays to the stored cursor and rebuilds or
    /// syncs pipelines depending on whether the topology changed.
    pub fn reload_history(&self) -> Result<()> {
        let _init = self.env.lock_init();
        let mut guard = self.state.lock().unwrap();
        let state = &mut *guard;

        state.focus_hash = 0;
        state.undo_marks.clear();
        state.redo_marks.clear();

        self.pop_to_locked(state, 0)?;
        state.stack.truncate_redo();

        state.order = OperationOrder::default_for(self.env.config.workflow, &self.env.registry);
        read_history(
            &self.env.db,
            &mut state.image,
            &self.env.registry,
            &mut state.order,
            &mut state.instances,
            &mut state.stack,
            None,
        )?;
        let cursor = state.stack.cursor();
        self.pop_to_locked(state, cursor)?;
        drop(guard);

        self.env.signals.raise(DevelopSignal::HistoryChange);
        self.invalidate_all();
        Ok(())
    }

    // ── Invalidation & scheduling ───────────────────────────────

    pub fn attach_scheduler(&self, scheduler: Arc<RenderScheduler>) {
        *self.scheduler.lock().unwrap() = Some(scheduler);
    }

    fn bump_timestamp(&self) -> u64 {
        self.timestamp.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn raise_all(&self, flags: ChangeFlags) {
        for kind in PipeKind::ALL {
            self.control(kind).raise(flags);
        }
        self.bump_timestamp();
    }

    fn kick(&self, kind: PipeKind) {
        if let Some(scheduler) = self.scheduler.lock().unwrap().as_ref() {
            let _ = scheduler.request(RenderRequest {
                kind,
                timestamp: self.timestamp(),
            });
        }
    }

    fn kick_all(&self) {
        for kind in PipeKind::ALL {
            self.kick(kind);
        }
    }

    /// Mark one pipeline dirty and bump the develop timestamp; a running
    /// run observes the new value at its next loop iteration.
    pub fn invalidate(&self, kind: PipeKind) {
        self.control(kind).set_status(PipeStatus::Dirty);
        self.control(kind).shutdown.cancel();
        self.bump_timestamp();
        self.kick(kind);
    }

    pub fn invalidate_all(&self) {
        for kind in PipeKind::ALL {
            self.control(kind).set_status(PipeStatus::Dirty);
            self.control(kind).shutdown.cancel();
        }
        self.bump_timestamp();
        self.kick_all();
    }

    /// Preview becomes dirty; the other pipelines only learn the new
    /// timestamp so they re-check their inputs on the next run.
    pub fn invalidate_preview(&self) {
        self.control(PipeKind::Preview).set_status(PipeStatus::Dirty);
        let ts = self.bump_timestamp();
        self.control(PipeKind::Full).set_input_timestamp(ts);
        self.control(PipeKind::Secondary).set_input_timestamp(ts);
        self.kick(PipeKind::Preview);
    }

    /// Force a full cache flush on every pipeline's next run (the source
    /// raw was re-read).
    pub fn mark_source_obsolete(&self) {
        for kind in PipeKind::ALL {
            self.control(kind).mark_cache_obsolete();
        }
    }

    pub fn set_viewport(&self, kind: PipeKind, viewport: Viewport) {
        match kind {
            PipeKind::Full => *self.viewport_full.lock().unwrap() = viewport,
            PipeKind::Secondary => *self.viewport_secondary.lock().unwrap() = viewport,
            PipeKind::Preview => return,
        }
        self.control(kind).raise(ChangeFlags::ZOOMED);
        self.bump_timestamp();
        self.kick(kind);
    }

    // ── Rendering ───────────────────────────────────────────────

    /// Run one pipeline to completion (or interruption). Blocking; the
    /// scheduler calls this from the pipeline's worker.
    pub fn process(&self, kind: PipeKind) -> PipeStatus {
        let mut pipe = self.pipe(kind).lock().unwrap();

        let viewport = match kind {
            PipeKind::Full => *self.viewport_full.lock().unwrap(),
            PipeKind::Secondary => *self.viewport_secondary.lock().unwrap(),
            PipeKind::Preview => Viewport::default(),
        };
        let ctx = RunContext {
            gui_leaving: &self.gui_leaving,
            timestamp: self.timestamp(),
            viewport,
        };
        let registry = self.env.registry.clone();
        let mut replan = || {
            let state = self.state.lock().unwrap();
            plan_from_instances(&registry, &state.instances)
        };

        let status = pipe.run(&self.env.registry, &ctx, &mut replan);

        if status == PipeStatus::Valid {
            *self.published(kind).lock().unwrap() = pipe.backbuf().cloned();
            drop(pipe);
            let now = self.now_secs();
            self.state.lock().unwrap().undo_gate.note_pipe_finished(now);
            self.env.signals.raise(DevelopSignal::PipeFinished(kind));
        }
        status
    }

    /// Wait until `kind`'s published fingerprint at `rank` matches
    /// `expected`. On a pending change the wait turns into a reprocess
    /// request before returning.
    pub fn wait_hash(
        &self,
        kind: PipeKind,
        rank: i32,
        direction: WaitDirection,
        expected: u64,
    ) -> WaitOutcome {
        let outcome = wait_hash(
            self.control(kind),
            rank,
            direction,
            expected,
            Duration::from_millis(self.env.config.wait_hash_poll_ms),
            Duration::from_millis(self.env.config.wait_hash_timeout_ms),
        );
        if outcome == WaitOutcome::ReprocessRequested {
            self.invalidate(kind);
        }
        outcome
    }

    // ── Persistence ─────────────────────────────────────────────

    /// Persist history, ordering and flags now.
    pub fn write_history(&self) -> Result<u64> {
        let state = self.state.lock().unwrap();
        write_history(&self.env.db, &state.image, &state.stack, &state.order)
    }

    /// Export the sidecar next to the configured directory.
    pub fn export_sidecar(&self) -> Result<Option<u64>> {
        let state = self.state.lock().unwrap();
        let Some(dir) = &self.env.config.sidecar_dir else {
            return Ok(None);
        };
        let path = dir.join(format!("{}.argent.json", state.image.id.0));
        export_sidecar(&path, state.image.id, &state.stack, &state.order).map(Some)
    }

    fn maybe_autosave(&self, state: &mut EditState, now: f64) -> Result<()> {
        let config = &self.env.config;
        if !config.autosave_enabled || self.autosave_disabled.load(Ordering::SeqCst) {
            return Ok(());
        }
        let due = state
            .autosave_last
            .map_or(true, |last| now - last >= config.autosave_delay_secs);
        if !due {
            return Ok(());
        }

        let started = Instant::now();
        write_history(&self.env.db, &state.image, &state.stack, &state.order)?;
        if let Some(dir) = &config.sidecar_dir {
            let path = dir.join(format!("{}.argent.json", state.image.id.0));
            export_sidecar(&path, state.image.id, &state.stack, &state.order)?;
        }
        state.autosave_last = Some(now);

        let took = started.elapsed().as_secs_f64();
        if took > config.autosave_slow_secs {
            self.autosave_disabled.store(true, Ordering::SeqCst);
            warn!(
                "{}",
                DevelopError::AutosaveSlowDrive(took)
            );
            self.env.signals.raise(DevelopSignal::AutosaveDisabled);
        }
        Ok(())
    }

    // ── Lifecycle ───────────────────────────────────────────────

    /// Begin unload: every in-flight run observes this at its next
    /// suspension point and exits without publishing.
    pub fn close(&self) {
        self.gui_leaving.store(true, Ordering::SeqCst);
        for kind in PipeKind::ALL {
            self.control(kind).shutdown.cancel();
        }
    }

    pub fn is_closing(&self) -> bool {
        self.gui_leaving.load(Ordering::SeqCst)
    }
}
