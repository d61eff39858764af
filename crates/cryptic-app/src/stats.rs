//! Frame-rate statistics reported at exit.

use std::time::Duration;

/// Running FPS statistics.
#[derive(Debug, Clone)]
pub struct FrameStats {
    frames: u64,
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
    active: Duration,
}

impl Default for FrameStats {
    fn default() -> Self {
        Self {
            frames: 0,
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
            active: Duration::ZERO,
        }
    }
}

impl FrameStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a frame that took `dt` since the previous one.
    pub fn record(&mut self, dt: Duration) {
        self.frames += 1;
        self.active += dt;

        let secs = dt.as_secs_f64();
        if secs > 0.0 {
            let fps = 1.0 / secs;
            self.min_fps = self.min_fps.min(fps);
            self.max_fps = self.max_fps.max(fps);
            self.fps_sum += fps;
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames divided by the time they took.
    pub fn average_fps(&self) -> f64 {
        let secs = self.active.as_secs_f64();
        if secs > 0.0 {
            self.frames as f64 / secs
        } else {
            0.0
        }
    }

    /// Slowest instantaneous frame rate, if any frame was timed.
    pub fn min_fps(&self) -> Option<f64> {
        (self.max_fps > 0.0).then_some(self.min_fps)
    }

    /// Fastest instantaneous frame rate, if any frame was timed.
    pub fn max_fps(&self) -> Option<f64> {
        (self.max_fps > 0.0).then_some(self.max_fps)
    }

    /// Log the summary on the app target.
    pub fn log_summary(&self) {
        use cryptic_core::logging::targets;

        if self.frames == 0 {
            tracing::info!(target: targets::APP, "No frames rendered");
            return;
        }
        tracing::info!(target: targets::APP, "FPS Statistics:");
        if let (Some(min), Some(max)) = (self.min_fps(), self.max_fps()) {
            tracing::info!(target: targets::APP, "  Min: {min:.1}");
            tracing::info!(target: targets::APP, "  Max: {max:.1}");
        }
        tracing::info!(target: targets::APP, "  Avg: {:.1}", self.average_fps());
        tracing::info!(target: targets::APP, "  Total frames: {}", self.frames);
    }
}
