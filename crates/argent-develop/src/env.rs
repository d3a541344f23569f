//! The explicit environment a develop state runs against.
//!
//! External collaborators (raw loader, mipmap cache, store) are traits;
//! the engine never reaches for process-wide singletons.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use argent_core::{ImageInfo, PixelBuffer, Result, SharedPixelBuffer};
use argent_db::Database;
use argent_modules::{ModuleRegistry, Workflow};
use argent_pipeline::DownsampleFactor;

use crate::signals::SignalHub;

/// Blocking full-resolution decoder, provided by the host.
pub trait RawSource: Send + Sync {
    fn load(&self, image: &ImageInfo) -> Result<SharedPixelBuffer>;
}

/// Thumbnail/downsample cache consumed by the preview pipeline.
/// Best-effort: `None` means not ready yet; the cache re-triggers the
/// preview when the buffer lands.
pub trait MipmapSource: Send + Sync {
    fn preview(&self, image: &ImageInfo, factor: DownsampleFactor) -> Option<SharedPixelBuffer>;
}

/// Engine configuration, host-supplied.
#[derive(Debug, Clone)]
pub struct DevelopConfig {
    pub workflow: Workflow,
    /// Undo coalescing window for repeated edits to the same target.
    pub merge_same_secs: f64,
    pub review_secs: f64,
    pub autosave_enabled: bool,
    pub autosave_delay_secs: f64,
    /// History writes slower than this disable autosave for the session.
    pub autosave_slow_secs: f64,
    pub preview_downsample: DownsampleFactor,
    /// Intermediate-result cache lines per pipeline.
    pub cache_lines: usize,
    pub wait_hash_poll_ms: u64,
    pub wait_hash_timeout_ms: u64,
    /// Directory for sidecar files; `None` disables sidecar export.
    pub sidecar_dir: Option<PathBuf>,
}

impl Default for DevelopConfig {
    fn default() -> Self {
        Self {
            workflow: Workflow::SceneReferred,
            merge_same_secs: 2.0,
            review_secs: 10.0,
            autosave_enabled: true,
            autosave_delay_secs: 2.0,
            autosave_slow_secs: 0.5,
            preview_downsample: DownsampleFactor::Half,
            cache_lines: 24,
            wait_hash_poll_ms: 20,
            wait_hash_timeout_ms: 2000,
            sidecar_dir: None,
        }
    }
}

/// Everything a develop state needs from the outside world.
pub struct Env {
    pub db: Database,
    pub registry: Arc<ModuleRegistry>,
    pub raw: Arc<dyn RawSource>,
    pub mipmap: Arc<dyn MipmapSource>,
    pub config: DevelopConfig,
    pub signals: SignalHub,
    /// Counts unreadable images for UI messaging.
    invalid_images: AtomicU32,
    /// Process-wide init lock: module lists are reshaped only under it.
    init_lock: Mutex<()>,
}

impl Env {
    pub fn new(
        db: Database,
        registry: ModuleRegistry,
        raw: Arc<dyn RawSource>,
        mipmap: Arc<dyn MipmapSource>,
        config: DevelopConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            registry: Arc::new(registry),
            raw,
            mipmap,
            config,
            signals: SignalHub::new(),
            invalid_images: AtomicU32::new(0),
            init_lock: Mutex::new(()),
        })
    }

    pub fn lock_init(&self) -> MutexGuard<'_, ()> {
        self.init_lock.lock().unwrap()
    }

    pub fn note_invalid_image(&self) {
        self.invalid_images.fetch_add(1, Ordering::SeqCst);
    }

    pub fn invalid_image_count(&self) -> u32 {
        self.invalid_images.load(Ordering::SeqCst)
    }
}

/// Deterministic stand-in source: a gradient at the image's dimensions.
/// Serves tests and headless runs where no decoder is wired up.
pub struct SyntheticRaw;

impl RawSource for SyntheticRaw {
    fn load(&self, image: &ImageInfo) -> Result<SharedPixelBuffer> {
        Ok(Arc::new(PixelBuffer::gradient(image.width, image.height)))
    }
}

impl MipmapSource for SyntheticRaw {
    fn preview(&self, image: &ImageInfo, factor: DownsampleFactor) -> Option<SharedPixelBuffer> {
        let w = ((image.width as f32 * factor.as_f32()) as u32).max(1);
        let h = ((image.height as f32 * factor.as_f32()) as u32).max(1);
        Some(Arc::new(PixelBuffer::gradient(w, h)))
    }
}
