//! Undo checkpoint coalescing.
//!
//! Successive edits from the same editing surface inside a short window
//! collapse into one undo checkpoint, so dragging a slider does not
//! produce dozens of undo steps.

/// Gate deciding whether an edit opens a new undo checkpoint.
#[derive(Debug, Clone)]
pub struct UndoGate {
    /// Edits to the same target within this window merge.
    merge_same_secs: f64,
    /// Window extension measured from the last finished render, so slow
    /// pipelines leave the user time to review before the merge closes.
    review_secs: f64,
    previous_target: Option<u64>,
    previous_time: f64,
    previous_pipe_time: f64,
}

impl UndoGate {
    pub fn new(merge_same_secs: f64, review_secs: f64) -> Self {
        Self {
            merge_same_secs,
            review_secs,
            previous_target: None,
            previous_time: f64::NEG_INFINITY,
            previous_pipe_time: f64::NEG_INFINITY,
        }
    }

    /// Returns true when a new checkpoint must be opened for an edit to
    /// `target` at time `now` (seconds, monotonic). A `None` target never
    /// merges.
    pub fn should_record(&mut self, target: Option<u64>, now: f64) -> bool {
        let merge_until = self.previous_time + self.merge_same_secs;
        let review_until = self.previous_pipe_time + self.review_secs;
        self.previous_pipe_time = merge_until;

        if let Some(t) = target {
            if self.previous_target == Some(t) && now < merge_until.min(review_until) {
                return false;
            }
        }

        self.previous_target = target;
        self.previous_time = now;
        true
    }

    /// Note a finished render; extends the review window.
    pub fn note_pipe_finished(&mut self, now: f64) {
        self.previous_pipe_time = now;
    }
}
