//! The shared control surface of a pipeline.
//!
//! A render run holds its pipeline's mutex for the whole run, so edit
//! intents never touch the `Pipeline` itself. Everything they may poke
//! mid-run lives here behind atomics or short-lived locks: the shutdown
//! token, the change-flag set, the input timestamp, the status word and
//! the published fingerprints.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use argent_core::{CancelToken, Hasher64};

use crate::change::ChangeFlags;
use crate::hash_wait::WaitDirection;

/// Observable state of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeStatus {
    /// Needs a run; source or history changed since the last publish.
    Dirty,
    Running,
    /// Back-buffer matches the current history and viewport.
    Valid,
    /// The last run was abandoned; the next trigger starts over.
    Invalid,
}

/// Per-node fingerprint record published after a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeHash {
    pub rank: i32,
    /// This node's own contribution.
    pub node: u64,
    /// Fold of nodes `0..=self`.
    pub cumulative: u64,
}

/// Shared control block, one per pipeline.
pub struct PipeControl {
    pub shutdown: CancelToken,
    input_timestamp: AtomicU64,
    changed: Mutex<ChangeFlags>,
    status: Mutex<PipeStatus>,
    cache_obsolete: AtomicBool,
    fingerprints: Mutex<Vec<NodeHash>>,
}

impl Default for PipeControl {
    fn default() -> Self {
        Self {
            shutdown: CancelToken::new(),
            input_timestamp: AtomicU64::new(0),
            changed: Mutex::new(ChangeFlags::UNCHANGED),
            status: Mutex::new(PipeStatus::Dirty),
            cache_obsolete: AtomicBool::new(false),
            fingerprints: Mutex::new(Vec::new()),
        }
    }
}

impl PipeControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> PipeStatus {
        *self.status.lock().unwrap()
    }

    pub fn set_status(&self, status: PipeStatus) {
        *self.status.lock().unwrap() = status;
    }

    /// Raise change-flag bits. Callers hold the history mutex, not the
    /// pipeline mutex.
    pub fn raise(&self, flags: ChangeFlags) {
        *self.changed.lock().unwrap() |= flags;
    }

    /// Read and clear the change-flag set atomically.
    pub fn take_changed(&self) -> ChangeFlags {
        std::mem::take(&mut *self.changed.lock().unwrap())
    }

    /// Peek without clearing; the hash-wait loop uses this.
    pub fn peek_changed(&self) -> ChangeFlags {
        *self.changed.lock().unwrap()
    }

    pub fn set_input_timestamp(&self, ts: u64) {
        self.input_timestamp.store(ts, Ordering::SeqCst);
    }

    pub fn input_timestamp(&self) -> u64 {
        self.input_timestamp.load(Ordering::SeqCst)
    }

    /// Force a full cache flush on the next run, whatever the flags say.
    pub fn mark_cache_obsolete(&self) {
        self.cache_obsolete.store(true, Ordering::SeqCst);
    }

    /// Consume the obsolescence bit.
    pub fn take_cache_obsolete(&self) -> bool {
        self.cache_obsolete.swap(false, Ordering::SeqCst)
    }

    /// Publish the fingerprints of a completed run.
    pub fn publish_fingerprints(&self, hashes: Vec<NodeHash>) {
        *self.fingerprints.lock().unwrap() = hashes;
    }

    /// Pipeline fingerprint of the last completed run, folded over the
    /// requested rank range.
    pub fn fingerprint_at(&self, rank: i32, direction: WaitDirection) -> Option<u64> {
        let hashes = self.fingerprints.lock().unwrap();
        if hashes.is_empty() {
            return None;
        }
        match direction {
            WaitDirection::ForwardIncl => hashes
                .iter()
                .rev()
                .find(|h| h.rank <= rank)
                .map(|h| h.cumulative),
            WaitDirection::ForwardExcl => hashes
                .iter()
                .rev()
                .find(|h| h.rank < rank)
                .map(|h| h.cumulative),
            WaitDirection::BackIncl | WaitDirection::BackExcl => {
                let mut fold = Hasher64::new();
                let mut any = false;
                for h in hashes.iter() {
                    let take = match direction {
                        WaitDirection::BackIncl => h.rank >= rank,
                        _ => h.rank > rank,
                    };
                    if take {
                        fold.write_u64(h.node);
                        any = true;
                    }
                }
                any.then(|| fold.finish())
            }
        }
    }

    /// Full-pipeline fingerprint of the last completed run.
    pub fn last_fingerprint(&self) -> Option<u64> {
        self.fingerprints.lock().unwrap().last().map(|h| h.cumulative)
    }
}
