//! argent-db - Persistence for the develop engine
//!
//! Round-trips history, ordering and masks to an SQLite store and to
//! per-image sidecar files, and resolves auto-apply presets on an
//! image's first load.

pub mod history_io;
pub mod presets;
pub mod schema;
pub mod sidecar;

pub use history_io::{content_hash, read_history, write_history, LoadOutcome};
pub use presets::{install_preset, resolve_autoapply, resolve_ioporder, Preset, ResolvedPreset};
pub use schema::Database;
pub use sidecar::{export_sidecar, read_sidecar, SidecarEntry, SidecarFile, SIDECAR_VERSION};
