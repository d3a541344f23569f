//! The render scheduler.
//!
//! One worker per pipeline class so zooming the full image can never
//! starve the preview. Queues are small; pending requests for the same
//! pipeline collapse to the newest timestamp, and a saturated queue drops
//! the request — the next invalidation re-enqueues.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;

use tracing::{debug, warn};

use argent_core::{DevelopError, Result};

use crate::PipeKind;

/// Queue depth per worker before requests are dropped.
const QUEUE_DEPTH: usize = 4;

/// A request to run one pipeline.
#[derive(Debug, Clone, Copy)]
pub struct RenderRequest {
    pub kind: PipeKind,
    /// Develop timestamp at enqueue time; newest wins when coalescing.
    pub timestamp: u64,
}

enum Msg {
    Run(RenderRequest),
    Quit,
}

/// The function a worker calls to perform one pipeline run.
pub type RenderFn = Arc<dyn Fn(RenderRequest) + Send + Sync>;

struct Worker {
    kind: PipeKind,
    tx: SyncSender<Msg>,
    handle: Option<JoinHandle<()>>,
}

/// Routes `process(kind)` requests to a bounded worker pool.
pub struct RenderScheduler {
    workers: Vec<Worker>,
}

impl RenderScheduler {
    pub fn new(render: RenderFn) -> Self {
        let workers = PipeKind::ALL
            .iter()
            .map(|&kind| {
                let (tx, rx) = sync_channel::<Msg>(QUEUE_DEPTH);
                let render = render.clone();
                let handle = std::thread::Builder::new()
                    .name(format!("argent-render-{}", kind.name()))
                    .spawn(move || worker_loop(kind, rx, render))
                    .expect("failed to spawn render worker");
                Worker {
                    kind,
                    tx,
                    handle: Some(handle),
                }
            })
            .collect();
        Self { workers }
    }

    /// Enqueue a run. Drops the request with a log when the worker's
    /// queue is saturated.
    pub fn request(&self, req: RenderRequest) -> Result<()> {
        let worker = self
            .workers
            .iter()
            .find(|w| w.kind == req.kind)
            .expect("scheduler has a worker per pipe kind");
        match worker.tx.try_send(Msg::Run(req)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                warn!(
                    pipe = req.kind.name(),
                    ts = req.timestamp,
                    "render queue saturated, dropping request"
                );
                Err(DevelopError::ScheduleSaturated(req.kind.name()))
            }
        }
    }
}

impl Drop for RenderScheduler {
    fn drop(&mut self) {
        // Dropping the sender closes the channel, which wakes the worker
        // even when the Quit message did not fit into a full queue.
        for Worker { tx, handle, .. } in self.workers.drain(..) {
            let _ = tx.try_send(Msg::Quit);
            drop(tx);
            if let Some(handle) = handle {
                let _ = handle.join();
            }
        }
    }
}

fn worker_loop(kind: PipeKind, rx: Receiver<Msg>, render: RenderFn) {
    debug!(pipe = kind.name(), "render worker up");
    while let Ok(msg) = rx.recv() {
        let mut req = match msg {
            Msg::Run(req) => req,
            Msg::Quit => break,
        };
        // Collapse queued duplicates; the latest timestamp wins.
        let mut quit = false;
        while let Ok(next) = rx.try_recv() {
            match next {
                Msg::Run(newer) if newer.timestamp >= req.timestamp => req = newer,
                Msg::Run(_) => {}
                Msg::Quit => {
                    quit = true;
                    break;
                }
            }
        }
        render(req);
        if quit {
            break;
        }
    }
    debug!(pipe = kind.name(), "render worker down");
}
