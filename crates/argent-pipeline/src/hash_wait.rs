//! The hash-wait protocol.
//!
//! GUI widgets doing geometric queries compute the pipeline fingerprint
//! they expect and wait until the pipeline has produced it. The wait
//! polls; it never blocks a render run.

use std::time::{Duration, Instant};

use crate::change::ChangeFlags;
use crate::control::PipeControl;

/// Which part of the pipeline the expected fingerprint covers, relative
/// to an ordering rank.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitDirection {
    /// Nodes `0..=rank`.
    ForwardIncl,
    /// Nodes `0..rank`.
    ForwardExcl,
    /// Nodes `rank..`.
    BackIncl,
    /// Nodes after `rank`.
    BackExcl,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The pipeline produced the expected fingerprint.
    Matched,
    /// A `TOP_CHANGED | SYNCH | REMOVE` flag was raised during the wait;
    /// the caller should trigger a reprocess and retry afterwards.
    ReprocessRequested,
    TimedOut,
    /// The shutdown token fired.
    Shutdown,
}

/// Poll until the pipeline's published fingerprint at `rank` matches
/// `expected`.
pub fn wait_hash(
    control: &PipeControl,
    rank: i32,
    direction: WaitDirection,
    expected: u64,
    poll_period: Duration,
    timeout: Duration,
) -> WaitOutcome {
    let reprocess_flags = ChangeFlags::TOP_CHANGED | ChangeFlags::SYNCH | ChangeFlags::REMOVE;
    let deadline = Instant::now() + timeout;

    loop {
        if control.shutdown.is_cancelled() {
            return WaitOutcome::Shutdown;
        }
        // Pending history changes are checked before the fingerprint: a
        // published hash that still matches is stale the instant such a
        // flag is up, and must not be reported as a silent match.
        if control.peek_changed().intersects(reprocess_flags) {
            return WaitOutcome::ReprocessRequested;
        }
        if control.fingerprint_at(rank, direction) == Some(expected) {
            return WaitOutcome::Matched;
        }
        if Instant::now() >= deadline {
            return WaitOutcome::TimedOut;
        }
        std::thread::sleep(poll_period);
    }
}
