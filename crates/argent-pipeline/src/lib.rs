//! argent-pipeline - The dependency-ordered pixel-processing pipeline
//!
//! A pipeline is the ordered sequence of operation nodes derived from the
//! active history prefix. Each node carries a content fingerprint; equal
//! fingerprints imply equal outputs, which is what makes the
//! intermediate-result cache sound. Runs are serialized per pipeline and
//! cooperate with mid-run invalidation by restarting from the planning
//! step.

pub mod cache;
pub mod change;
pub mod control;
pub mod exec;
pub mod fingerprint;
pub mod hash_wait;
pub mod node;
pub mod scheduler;
pub mod viewport;

pub use cache::PipelineCache;
pub use change::ChangeFlags;
pub use control::{NodeHash, PipeControl, PipeStatus};
pub use exec::{BackBuffer, Pipeline, RunContext, SourceBuffer};
pub use fingerprint::node_fingerprint;
pub use hash_wait::{wait_hash, WaitDirection, WaitOutcome};
pub use node::{plan_from_instances, DevicePlacement, NodeSpec, PipeNode, PipelinePlan};
pub use scheduler::{RenderRequest, RenderScheduler};
pub use viewport::{DownsampleFactor, Viewport, ZoomMode};

/// Which of the three concurrent pipelines of an image this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipeKind {
    /// Full-resolution center view.
    Full,
    /// Downsampled whole-image preview.
    Preview,
    /// Secondary-window view.
    Secondary,
}

impl PipeKind {
    pub fn name(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Preview => "preview",
            Self::Secondary => "secondary",
        }
    }

    pub const ALL: [PipeKind; 3] = [Self::Full, Self::Preview, Self::Secondary];
}
