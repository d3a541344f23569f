//! The operation module contract.
//!
//! Each installed operation is a value implementing [`Operation`]. The
//! engine calls `process` with committed parameter bytes; the operation
//! must be deterministic in its inputs, must not mutate its input buffer,
//! and must poll the cancellation token at natural chunk boundaries.

use argent_core::{CancelToken, DevelopError, ImageInfo, PixelBuffer, Result, Roi};

use crate::descriptor::OpDescriptor;
use crate::instance::ModuleInstance;

/// Outcome of a successful `process` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Output buffer fully written.
    Complete,
    /// The shutdown token fired mid-run; output is undefined.
    Interrupted,
}

/// Per-invocation context handed to `process`.
pub struct ProcessContext<'a> {
    /// The owning pipeline's shutdown token.
    pub shutdown: &'a CancelToken,
}

impl<'a> ProcessContext<'a> {
    pub fn new(shutdown: &'a CancelToken) -> Self {
        Self { shutdown }
    }
}

/// Contract every installed operation satisfies. The set of
/// implementations is discovered at process start and immutable
/// thereafter.
pub trait Operation: Send + Sync {
    fn descriptor(&self) -> &OpDescriptor;

    /// Produce `roi_out` pixels of output from `roi_in` pixels of input.
    ///
    /// Must poll `ctx.shutdown` at chunk boundaries and return
    /// [`ProcessStatus::Interrupted`] when it fires.
    fn process(
        &self,
        params: &[u8],
        blend_params: &[u8],
        input: &PixelBuffer,
        output: &mut PixelBuffer,
        roi_in: Roi,
        roi_out: Roi,
        ctx: &ProcessContext<'_>,
    ) -> Result<ProcessStatus>;

    /// Map point pairs `(x, y)` forward through this operation's geometry.
    /// Identity for non-geometric operations.
    fn distort_transform(&self, _params: &[u8], _width: u32, _height: u32, _points: &mut [f32]) {}

    /// Inverse of [`Operation::distort_transform`].
    fn distort_backtransform(&self, _params: &[u8], _width: u32, _height: u32, _points: &mut [f32]) {
    }

    /// Migrate parameter bytes stored at an older schema version to the
    /// current one. The default refuses; operations with legacy history
    /// override this.
    fn legacy_params(&self, _old_params: &[u8], old_version: i32) -> Result<(Vec<u8>, i32)> {
        Err(DevelopError::LegacyMigrationFailed {
            op: self.descriptor().op.to_string(),
            stored: old_version,
            current: self.descriptor().version,
        })
    }

    /// Parameter bytes committed into a pipeline node. The default commits
    /// the instance's live parameters unchanged; operations that derive
    /// runtime data from their parameters override this.
    fn commit_params(&self, instance: &ModuleInstance) -> Vec<u8> {
        instance.params.clone()
    }

    /// Called when a pipeline instantiates a node for this operation.
    fn init_pipe(&self) {}

    /// Called when a pipeline tears a node down.
    fn cleanup_pipe(&self) {}

    /// Image-dependent defaults, e.g. sensor black level from metadata.
    /// `None` keeps the descriptor defaults.
    fn reload_defaults(&self, _image: &ImageInfo) -> Option<Vec<u8>> {
        None
    }
}

/// Poll cadence for row-chunked processing loops in the built-ins.
pub(crate) const CANCEL_POLL_ROWS: u32 = 64;
