//! Lifecycle signals.
//!
//! Listeners are plain callbacks; delivery is synchronous on the thread
//! that raised the signal. Keep handlers short.

use std::sync::Mutex;

use argent_pipeline::PipeKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DevelopSignal {
    /// The history stack changed (append, pop, reload).
    HistoryChange,
    /// A render run published a valid back-buffer.
    PipeFinished(PipeKind),
    /// The current mask set changed after a cursor move.
    MaskListChanged,
    /// Image metadata changed (edit timestamp, flags).
    ImageChanged,
    /// Autosave hit a slow drive and disabled itself for the session.
    AutosaveDisabled,
}

type Listener = Box<dyn Fn(&DevelopSignal) + Send + Sync>;

/// Fan-out of develop lifecycle signals.
#[derive(Default)]
pub struct SignalHub {
    listeners: Mutex<Vec<Listener>>,
}

impl SignalHub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, listener: impl Fn(&DevelopSignal) + Send + Sync + 'static) {
        self.listeners.lock().unwrap().push(Box::new(listener));
    }

    pub fn raise(&self, signal: DevelopSignal) {
        for listener in self.listeners.lock().unwrap().iter() {
            listener(&signal);
        }
    }
}
