//! Viewport and zoom math.
//!
//! All pure; the GUI calls these without holding pipeline locks, and a
//! render run reads the results once per process loop.

use argent_core::Roi;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZoomMode {
    #[default]
    Fit,
    Fill,
    OneToOne,
    Free,
}

/// Preview pipeline downsampling factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DownsampleFactor {
    #[default]
    Full,
    Half,
    Third,
    Quarter,
}

impl DownsampleFactor {
    pub fn as_f32(self) -> f32 {
        match self {
            Self::Full => 1.0,
            Self::Half => 0.5,
            Self::Third => 1.0 / 3.0,
            Self::Quarter => 0.25,
        }
    }
}

/// Viewport state for the full and secondary pipelines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub mode: ZoomMode,
    /// Zoom center, normalized to [-0.5, 0.5] with 0 at the image center.
    pub zoom_x: f32,
    pub zoom_y: f32,
    /// Magnification exponent: the window shrinks by 2^closeup.
    pub closeup: u32,
    /// Scale used in `Free` mode.
    pub free_scale: f32,
    /// Window size in device pixels.
    pub win_width: u32,
    pub win_height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            mode: ZoomMode::Fit,
            zoom_x: 0.0,
            zoom_y: 0.0,
            closeup: 0,
            free_scale: 1.0,
            win_width: 1280,
            win_height: 800,
        }
    }
}

impl Viewport {
    /// Scale from processed-image pixels to window pixels, before the
    /// closeup factor.
    pub fn scale(&self, proc_width: u32, proc_height: u32) -> f32 {
        let fit_w = self.win_width as f32 / proc_width.max(1) as f32;
        let fit_h = self.win_height as f32 / proc_height.max(1) as f32;
        match self.mode {
            ZoomMode::Fit => fit_w.min(fit_h),
            ZoomMode::Fill => fit_w.max(fit_h),
            ZoomMode::OneToOne => 1.0,
            ZoomMode::Free => self.free_scale,
        }
    }

    /// Effective scale including the closeup magnification.
    pub fn effective_scale(&self, proc_width: u32, proc_height: u32) -> f32 {
        self.scale(proc_width, proc_height) * (1 << self.closeup) as f32
    }

    /// Fraction of the processed image the window covers, per axis.
    fn box_size(&self, proc_width: u32, proc_height: u32) -> (f32, f32) {
        let scale = self.effective_scale(proc_width, proc_height);
        (
            self.win_width as f32 / (proc_width as f32 * scale),
            self.win_height as f32 / (proc_height as f32 * scale),
        )
    }

    /// Clamp the zoom center so the window stays inside the image,
    /// forcing 0 on an axis where the window covers the whole image.
    /// Returns true when anything was clamped.
    pub fn check_zoom_bounds(&mut self, proc_width: u32, proc_height: u32) -> bool {
        let (box_w, box_h) = self.box_size(proc_width, proc_height);
        let mut clamped = false;

        if box_w >= 1.0 {
            clamped |= self.zoom_x != 0.0;
            self.zoom_x = 0.0;
        } else {
            let limit = 0.5 - box_w / 2.0;
            let new = self.zoom_x.clamp(-limit, limit);
            clamped |= new != self.zoom_x;
            self.zoom_x = new;
        }

        if box_h >= 1.0 {
            clamped |= self.zoom_y != 0.0;
            self.zoom_y = 0.0;
        } else {
            let limit = 0.5 - box_h / 2.0;
            let new = self.zoom_y.clamp(-limit, limit);
            clamped |= new != self.zoom_y;
            self.zoom_y = new;
        }

        clamped
    }

    /// The processed-image roi the window shows, centered on the zoom
    /// point and clamped to image bounds.
    pub fn visible_roi(&self, proc_width: u32, proc_height: u32) -> Roi {
        let (box_w, box_h) = self.box_size(proc_width, proc_height);
        let w = ((box_w.min(1.0) * proc_width as f32).round() as u32).max(1);
        let h = ((box_h.min(1.0) * proc_height as f32).round() as u32).max(1);
        let cx = (0.5 + self.zoom_x) * proc_width as f32;
        let cy = (0.5 + self.zoom_y) * proc_height as f32;
        let x = (cx - w as f32 / 2.0)
            .round()
            .clamp(0.0, (proc_width - w.min(proc_width)) as f32) as i32;
        let y = (cy - h as f32 / 2.0)
            .round()
            .clamp(0.0, (proc_height - h.min(proc_height)) as f32) as i32;
        Roi::new(x, y, w.min(proc_width), h.min(proc_height), 1.0)
    }
}
