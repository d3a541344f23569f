//! Error types for the develop engine.

use thiserror::Error;

use crate::image::ImageId;

/// Main error type for develop-engine operations.
#[derive(Error, Debug)]
pub enum DevelopError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown or unreadable image {0}")]
    InvalidImage(ImageId),

    #[error("render queue saturated for {0} pipeline")]
    ScheduleSaturated(&'static str),

    #[error("history references operation `{op}` which is not installed")]
    ModuleMismatch { op: String },

    #[error("cannot migrate `{op}` parameters from version {stored} to {current}")]
    LegacyMigrationFailed {
        op: String,
        stored: i32,
        current: i32,
    },

    /// Internal control-flow sentinel; a render run was interrupted
    /// mid-node. Never surfaced to callers of the public API.
    #[error("pipeline run interrupted")]
    Interrupted,

    #[error("autosave disabled for this session: history write took {0:.2}s")]
    AutosaveSlowDrive(f64),

    #[error("persistence conflict: {0}")]
    PersistenceConflict(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Result type alias for develop-engine operations.
pub type Result<T> = std::result::Result<T, DevelopError>;
