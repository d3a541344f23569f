//! Pipeline execution.
//!
//! One render run converges the node list onto the current plan, then
//! processes nodes in rank order through the cache. The run owns the
//! pipeline mutex for its whole duration; everything that can change
//! under its feet arrives through [`PipeControl`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, trace};

use argent_core::{PixelBuffer, Roi, SharedPixelBuffer};
use argent_modules::{ModuleRegistry, ProcessContext, ProcessStatus};

use crate::cache::PipelineCache;
use crate::change::ChangeFlags;
use crate::control::{NodeHash, PipeControl, PipeStatus};
use crate::fingerprint::node_fingerprint;
use crate::node::{PipeNode, PipelinePlan};
use crate::viewport::Viewport;
use crate::PipeKind;

/// The source a pipeline starts from.
#[derive(Clone)]
pub struct SourceBuffer {
    pub buffer: SharedPixelBuffer,
    /// Scale of the source relative to the full-resolution image.
    pub scale: f32,
}

/// The published result of a run.
#[derive(Clone)]
pub struct BackBuffer {
    pub buffer: SharedPixelBuffer,
    pub width: u32,
    pub height: u32,
    pub scale: f32,
    pub zoom_x: f32,
    pub zoom_y: f32,
}

/// Per-run inputs from the develop state.
pub struct RunContext<'a> {
    pub gui_leaving: &'a AtomicBool,
    /// Develop timestamp at the start of the run.
    pub timestamp: u64,
    pub viewport: Viewport,
}

/// Internal state machine of the process loop.
enum RunState {
    Planning,
    Exit(PipeStatus),
}

pub struct Pipeline {
    pub kind: PipeKind,
    control: Arc<PipeControl>,
    nodes: Vec<PipeNode>,
    cache: PipelineCache,
    /// Nodes must be (re)created before the next run.
    pub loading: bool,
    /// The source buffer was replaced; cached intermediates are stale.
    pub input_changed: bool,
    source: Option<SourceBuffer>,
    backbuf: Option<BackBuffer>,
    /// Rolling average run time in milliseconds.
    avg_delay_ms: f64,
}

impl Pipeline {
    pub fn new(kind: PipeKind, cache_lines: usize) -> Self {
        Self {
            kind,
            control: Arc::new(PipeControl::new()),
            nodes: Vec::new(),
            cache: PipelineCache::new(cache_lines),
            loading: true,
            input_changed: false,
            source: None,
            backbuf: None,
            avg_delay_ms: 0.0,
        }
    }

    pub fn control(&self) -> Arc<PipeControl> {
        self.control.clone()
    }

    pub fn status(&self) -> PipeStatus {
        self.control.status()
    }

    pub fn backbuf(&self) -> Option<&BackBuffer> {
        self.backbuf.as_ref()
    }

    pub fn average_delay_ms(&self) -> f64 {
        self.avg_delay_ms
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Replace the source buffer; the next run flushes the cache.
    pub fn set_source(&mut self, source: SourceBuffer) {
        self.source = Some(source);
        self.input_changed = true;
    }

    pub fn has_source(&self) -> bool {
        self.source.is_some()
    }

    /// Tear down and recreate every node from the plan.
    fn rebuild_nodes(&mut self, registry: &ModuleRegistry, plan: &PipelinePlan) {
        self.nodes.clear();
        for spec in &plan.nodes {
            if let Some(op) = registry.get(&spec.op) {
                self.nodes.push(PipeNode::new(spec.clone(), op.clone()));
            }
        }
        self.cache.flush();
    }

    /// Refresh node parameters in place. Falls back to a rebuild when the
    /// plan's topology no longer matches the node list.
    fn refresh_nodes(&mut self, registry: &ModuleRegistry, plan: &PipelinePlan) {
        let same_topology = self.nodes.len() == plan.nodes.len()
            && self
                .nodes
                .iter()
                .zip(plan.nodes.iter())
                .all(|(node, spec)| node.spec.key() == spec.key());
        if !same_topology {
            self.rebuild_nodes(registry, plan);
            return;
        }
        for (node, spec) in self.nodes.iter_mut().zip(plan.nodes.iter()) {
            node.spec = spec.clone();
        }
    }

    /// Refresh only the tail node (the `TOP_CHANGED` reaction) and drop
    /// its cache line.
    fn refresh_tail(&mut self, registry: &ModuleRegistry, plan: &PipelinePlan) {
        if self.nodes.len() != plan.nodes.len() {
            self.rebuild_nodes(registry, plan);
            return;
        }
        // The changed entry is the history tail, not necessarily the last
        // pipeline node; refresh every node whose spec differs.
        for (node, spec) in self.nodes.iter_mut().zip(plan.nodes.iter()) {
            if node.spec != *spec {
                self.cache.invalidate(node.fingerprint);
                node.spec = spec.clone();
            }
        }
    }

    /// One render run. `replan` is called with the history
    /// mutex held by the caller's closure whenever the node list must be
    /// re-derived from history.
    pub fn run(
        &mut self,
        registry: &ModuleRegistry,
        ctx: &RunContext<'_>,
        replan: &mut dyn FnMut() -> PipelinePlan,
    ) -> PipeStatus {
        if ctx.gui_leaving.load(Ordering::SeqCst) {
            self.control.set_status(PipeStatus::Invalid);
            return PipeStatus::Invalid;
        }
        let Some(source) = self.source.clone() else {
            // Raw still loading; the loader will re-trigger.
            self.control.set_status(PipeStatus::Dirty);
            return PipeStatus::Dirty;
        };

        self.control.set_input_timestamp(ctx.timestamp);
        self.control.set_status(PipeStatus::Running);

        if self.loading {
            let plan = replan();
            self.rebuild_nodes(registry, &plan);
            self.loading = false;
        }
        if self.input_changed {
            self.cache.flush();
            self.input_changed = false;
        }

        let started = Instant::now();
        let mut viewport = ctx.viewport;

        let status = loop {
            match self.process_once(registry, ctx, &source, &mut viewport, replan) {
                RunState::Planning => continue,
                RunState::Exit(status) => break status,
            }
        };

        self.control.set_status(status);
        if status == PipeStatus::Valid {
            let elapsed = started.elapsed().as_secs_f64() * 1000.0;
            self.avg_delay_ms = if self.avg_delay_ms == 0.0 {
                elapsed
            } else {
                0.9 * self.avg_delay_ms + 0.1 * elapsed
            };
            debug!(
                pipe = self.kind.name(),
                ms = format!("{elapsed:.1}"),
                avg = format!("{:.1}", self.avg_delay_ms),
                "pipeline run finished"
            );
        }
        status
    }

    /// One iteration of the process loop: converge nodes, process the
    /// chain, decide whether to restart.
    fn process_once(
        &mut self,
        registry: &ModuleRegistry,
        ctx: &RunContext<'_>,
        source: &SourceBuffer,
        viewport: &mut Viewport,
        replan: &mut dyn FnMut() -> PipelinePlan,
    ) -> RunState {
        if ctx.gui_leaving.load(Ordering::SeqCst) {
            return RunState::Exit(PipeStatus::Invalid);
        }
        // Re-arm the interrupt token: a cancellation only aborts the
        // current chain so the loop can re-plan, never the whole run.
        self.control.shutdown.reset();

        let flags = self.control.take_changed();
        if self.control.take_cache_obsolete() {
            // Source bytes were re-read; no cached intermediate survives.
            self.cache.flush();
        }
        if flags.contains(ChangeFlags::REMOVE) {
            let plan = replan();
            self.rebuild_nodes(registry, &plan);
        } else if flags.contains(ChangeFlags::SYNCH) {
            let plan = replan();
            self.refresh_nodes(registry, &plan);
            self.cache.flush();
        } else if flags.contains(ChangeFlags::TOP_CHANGED) {
            let plan = replan();
            self.refresh_tail(registry, &plan);
        }

        let src_w = source.buffer.width;
        let src_h = source.buffer.height;

        // Preview processes the whole downsampled source; full and
        // secondary show the viewport window.
        let roi = match self.kind {
            PipeKind::Preview => Roi::new(0, 0, src_w, src_h, source.scale),
            PipeKind::Full | PipeKind::Secondary => {
                viewport.check_zoom_bounds(src_w, src_h);
                let mut r = viewport.visible_roi(src_w, src_h);
                r.scale = source.scale;
                r
            }
        };
        if flags.contains(ChangeFlags::ZOOMED) {
            self.cache.retain_roi(&roi);
        }

        match self.process_nodes(source, &roi, ctx) {
            ChainOutcome::Interrupted => {
                if self.loading || self.input_changed {
                    // A reload is pending; give up and let the next
                    // trigger resume.
                    return RunState::Exit(PipeStatus::Invalid);
                }
                trace!(pipe = self.kind.name(), "chain interrupted, re-planning");
                RunState::Planning
            }
            ChainOutcome::Failed => RunState::Exit(PipeStatus::Invalid),
            ChainOutcome::Done(buffer) => {
                if !self.control.peek_changed().is_unchanged() {
                    // History moved mid-run; the output is already stale.
                    return RunState::Planning;
                }
                let hashes = self
                    .nodes
                    .iter()
                    .map(|n| NodeHash {
                        rank: n.spec.iop_order,
                        node: node_fingerprint(0, &n.spec, &n.roi_out, src_w, src_h, source.scale),
                        cumulative: n.fingerprint,
                    })
                    .collect();
                self.control.publish_fingerprints(hashes);
                self.backbuf = Some(BackBuffer {
                    width: buffer.width,
                    height: buffer.height,
                    buffer,
                    scale: source.scale,
                    zoom_x: viewport.zoom_x,
                    zoom_y: viewport.zoom_y,
                });
                RunState::Exit(PipeStatus::Valid)
            }
        }
    }

    /// Process the node chain over the cache.
    fn process_nodes(
        &mut self,
        source: &SourceBuffer,
        roi: &Roi,
        ctx: &RunContext<'_>,
    ) -> ChainOutcome {
        let mut current: SharedPixelBuffer = Arc::new(crop(&source.buffer, roi));
        let mut fold = 0u64;

        for idx in 0..self.nodes.len() {
            if ctx.gui_leaving.load(Ordering::SeqCst) || self.control.shutdown.is_cancelled() {
                return ChainOutcome::Interrupted;
            }

            let node = &mut self.nodes[idx];
            node.roi_in = *roi;
            node.roi_out = *roi;
            fold = node_fingerprint(
                fold,
                &node.spec,
                roi,
                source.buffer.width,
                source.buffer.height,
                source.scale,
            );
            node.fingerprint = fold;

            if !node.spec.enabled {
                continue;
            }

            if let Some(hit) = self.cache.get(fold) {
                trace!(op = %node.spec.op, "cache hit");
                current = hit;
                continue;
            }

            let mut output = PixelBuffer::new(roi.width, roi.height, current.colorspace);
            let pctx = ProcessContext::new(&self.control.shutdown);
            match node.operation.process(
                &node.spec.params,
                &node.spec.blend_params,
                &current,
                &mut output,
                node.roi_in,
                node.roi_out,
                &pctx,
            ) {
                Ok(ProcessStatus::Complete) => {
                    current = Arc::new(output);
                    self.cache.insert(fold, current.clone(), *roi);
                }
                Ok(ProcessStatus::Interrupted) => return ChainOutcome::Interrupted,
                Err(err) => {
                    tracing::error!(op = %node.spec.op, %err, "node processing failed");
                    return ChainOutcome::Failed;
                }
            }
        }

        ChainOutcome::Done(current)
    }
}

enum ChainOutcome {
    Done(SharedPixelBuffer),
    Interrupted,
    Failed,
}

/// Extract an roi window from a source buffer.
fn crop(src: &PixelBuffer, roi: &Roi) -> PixelBuffer {
    if roi.x == 0 && roi.y == 0 && roi.width == src.width && roi.height == src.height {
        return src.clone();
    }
    let mut out = PixelBuffer::new(roi.width, roi.height, src.colorspace);
    let c = PixelBuffer::CHANNELS;
    for y in 0..roi.height {
        let sy = (roi.y as u32 + y).min(src.height.saturating_sub(1));
        let src_row = src.row(sy);
        let dst_row = out.row_mut(y);
        let sx0 = roi.x as usize * c;
        dst_row.copy_from_slice(&src_row[sx0..sx0 + roi.width as usize * c]);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::plan_from_instances;
    use crate::viewport::ZoomMode;
    use argent_modules::{OperationOrder, Workflow};
    use std::sync::atomic::AtomicBool;

    fn setup() -> (ModuleRegistry, PipelinePlan) {
        let registry = ModuleRegistry::with_builtins();
        let mut instances = registry.instantiate_all();
        let order = OperationOrder::default_for(Workflow::SceneReferred, &registry);
        order.apply_to_instances(&mut instances);
        let plan = plan_from_instances(&registry, &instances);
        (registry, plan)
    }

    fn source(w: u32, h: u32) -> SourceBuffer {
        SourceBuffer {
            buffer: Arc::new(PixelBuffer::gradient(w, h)),
            scale: 1.0,
        }
    }

    #[test]
    fn test_run_without_source_is_dirty() {
        let (registry, plan) = setup();
        let mut pipe = Pipeline::new(PipeKind::Preview, 16);
        let leaving = AtomicBool::new(false);
        let ctx = RunContext {
            gui_leaving: &leaving,
            timestamp: 1,
            viewport: Viewport::default(),
        };
        let status = pipe.run(&registry, &ctx, &mut || plan.clone());
        assert_eq!(status, PipeStatus::Dirty);
    }

    #[test]
    fn test_run_publishes_valid_backbuffer() {
        let (registry, plan) = setup();
        let mut pipe = Pipeline::new(PipeKind::Preview, 16);
        pipe.set_source(source(64, 48));
        let leaving = AtomicBool::new(false);
        let ctx = RunContext {
            gui_leaving: &leaving,
            timestamp: 1,
            viewport: Viewport::default(),
        };
        let status = pipe.run(&registry, &ctx, &mut || plan.clone());
        assert_eq!(status, PipeStatus::Valid);
        let bb = pipe.backbuf().unwrap();
        assert_eq!((bb.width, bb.height), (64, 48));
        assert!(pipe.control().last_fingerprint().is_some());
    }

    #[test]
    fn test_identical_runs_identical_output() {
        let (registry, plan) = setup();
        let leaving = AtomicBool::new(false);
        let ctx = RunContext {
            gui_leaving: &leaving,
            timestamp: 1,
            viewport: Viewport::default(),
        };

        let mut first = Pipeline::new(PipeKind::Preview, 16);
        first.set_source(source(64, 48));
        first.run(&registry, &ctx, &mut || plan.clone());

        let mut second = Pipeline::new(PipeKind::Preview, 16);
        second.set_source(source(64, 48));
        second.run(&registry, &ctx, &mut || plan.clone());

        assert_eq!(
            first.backbuf().unwrap().buffer.data(),
            second.backbuf().unwrap().buffer.data()
        );
        assert_eq!(
            first.control().last_fingerprint(),
            second.control().last_fingerprint()
        );
    }

    #[test]
    fn test_second_run_hits_cache() {
        let (registry, plan) = setup();
        let mut pipe = Pipeline::new(PipeKind::Preview, 16);
        pipe.set_source(source(64, 48));
        let leaving = AtomicBool::new(false);
        let ctx = RunContext {
            gui_leaving: &leaving,
            timestamp: 1,
            viewport: Viewport::default(),
        };
        pipe.run(&registry, &ctx, &mut || plan.clone());
        let lines = pipe.cache.len();
        assert!(lines > 0);
        // second run reuses every line, producing no new ones
        pipe.run(&registry, &ctx, &mut || plan.clone());
        assert_eq!(pipe.cache.len(), lines);
    }

    #[test]
    fn test_gui_leaving_never_publishes_valid() {
        let (registry, plan) = setup();
        let mut pipe = Pipeline::new(PipeKind::Preview, 16);
        pipe.set_source(source(64, 48));
        let leaving = AtomicBool::new(true);
        let ctx = RunContext {
            gui_leaving: &leaving,
            timestamp: 1,
            viewport: Viewport::default(),
        };
        let status = pipe.run(&registry, &ctx, &mut || plan.clone());
        assert_eq!(status, PipeStatus::Invalid);
        assert!(pipe.backbuf().is_none());
    }

    #[test]
    fn test_full_pipe_viewport_roi() {
        let (registry, plan) = setup();
        let mut pipe = Pipeline::new(PipeKind::Full, 16);
        pipe.set_source(source(640, 480));
        let leaving = AtomicBool::new(false);
        let viewport = Viewport {
            mode: ZoomMode::OneToOne,
            win_width: 100,
            win_height: 80,
            ..Default::default()
        };
        let ctx = RunContext {
            gui_leaving: &leaving,
            timestamp: 1,
            viewport,
        };
        let status = pipe.run(&registry, &ctx, &mut || plan.clone());
        assert_eq!(status, PipeStatus::Valid);
        let bb = pipe.backbuf().unwrap();
        assert_eq!((bb.width, bb.height), (100, 80));
    }
}
