//! The intermediate-result cache.
//!
//! Content-addressed by node fingerprint. Bounded by entry count; when
//! full, the least-hit line goes first. The obsolescence bit forces a
//! full flush on the next run, e.g. after the source raw is re-read.

use std::collections::HashMap;

use tracing::trace;

use argent_core::{Roi, SharedPixelBuffer};

struct CacheLine {
    buffer: SharedPixelBuffer,
    roi: Roi,
    hits: u64,
}

/// Per-pipeline cache of node outputs.
pub struct PipelineCache {
    lines: HashMap<u64, CacheLine>,
    max_lines: usize,
}

impl PipelineCache {
    pub fn new(max_lines: usize) -> Self {
        Self {
            lines: HashMap::new(),
            max_lines: max_lines.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Probe by fingerprint; a hit bumps the line's counter.
    pub fn get(&mut self, fingerprint: u64) -> Option<SharedPixelBuffer> {
        self.lines.get_mut(&fingerprint).map(|line| {
            line.hits += 1;
            line.buffer.clone()
        })
    }

    pub fn contains(&self, fingerprint: u64) -> bool {
        self.lines.contains_key(&fingerprint)
    }

    /// Insert a node output, evicting the least-hit line when full.
    pub fn insert(&mut self, fingerprint: u64, buffer: SharedPixelBuffer, roi: Roi) {
        if self.lines.len() >= self.max_lines && !self.lines.contains_key(&fingerprint) {
            if let Some(&coldest) = self
                .lines
                .iter()
                .min_by_key(|(_, line)| line.hits)
                .map(|(k, _)| k)
            {
                trace!(fingerprint = coldest, "evicting cache line");
                self.lines.remove(&coldest);
            }
        }
        self.lines.insert(
            fingerprint,
            CacheLine {
                buffer,
                roi,
                hits: 0,
            },
        );
    }

    /// Drop everything.
    pub fn flush(&mut self) {
        self.lines.clear();
    }

    /// Drop one line.
    pub fn invalidate(&mut self, fingerprint: u64) {
        self.lines.remove(&fingerprint);
    }

    /// Drop lines computed for a different roi (the `ZOOMED` reaction).
    pub fn retain_roi(&mut self, roi: &Roi) {
        self.lines.retain(|_, line| line.roi.same_region(roi));
    }
}
