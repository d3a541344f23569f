//! argent-develop - The develop controller
//!
//! The façade tying the engine together: it accepts edit intents from
//! the GUI thread, updates history under the history mutex, raises
//! pipeline change flags, drives render runs, and persists on an
//! autosave cadence. No ambient globals: everything external arrives
//! through [`Env`].

pub mod develop;
pub mod env;
pub mod signals;

pub use develop::Develop;
pub use env::{DevelopConfig, Env, MipmapSource, RawSource, SyntheticRaw};
pub use signals::{DevelopSignal, SignalHub};
