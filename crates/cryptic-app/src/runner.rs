//! Application runner and event loop.

use std::sync::Arc;
use std::time::Instant;

use cryptic_core::constants::{WINDOW_HEIGHT, WINDOW_TITLE, WINDOW_WIDTH};
use cryptic_core::logging::targets;
use cryptic_core::{Error, LogConfig};
use cryptic_gpu::PresentPolicy;
use tracing::{debug, error, info};
use winit::application::ApplicationHandler;
use winit::dpi::PhysicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::context::AppContext;
use crate::stats::FrameStats;

/// Environment variable overriding whether validation is enabled.
pub const VALIDATION_ENV: &str = "CRYPTIC_VALIDATION";

/// Application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Window title, also used as the Vulkan application name.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    /// What to do when presenting a frame fails.
    pub present_policy: PresentPolicy,
    /// Logging setup for the binary to install.
    pub log: LogConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: WINDOW_TITLE.to_string(),
            width: WINDOW_WIDTH,
            height: WINDOW_HEIGHT,
            vsync: false,
            validation: cfg!(debug_assertions),
            present_policy: PresentPolicy::default(),
            log: LogConfig::default(),
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> cryptic_core::Result<Self> {
        Self::default().with_validation_override(std::env::var(VALIDATION_ENV).ok().as_deref())
    }

    /// Apply a `CRYPTIC_VALIDATION`-style value, if present.
    pub fn with_validation_override(mut self, value: Option<&str>) -> cryptic_core::Result<Self> {
        if let Some(value) = value {
            self.validation = parse_flag(value).ok_or_else(|| {
                Error::Config(format!("{VALIDATION_ENV} must be 0 or 1, got '{value}'"))
            })?;
        }
        Ok(self)
    }

    /// Set the window dimensions.
    #[must_use]
    pub fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    /// Enable or disable vsync.
    #[must_use]
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    /// Set the present failure policy.
    #[must_use]
    pub fn with_present_policy(mut self, policy: PresentPolicy) -> Self {
        self.present_policy = policy;
        self
    }

    /// Set the logging configuration.
    #[must_use]
    pub fn with_log(mut self, log: LogConfig) -> Self {
        self.log = log;
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}

/// Open the window and draw until it is closed.
///
/// Logging must already be set up by the caller. Returns an error if
/// bring-up or a frame failed; an out-of-date swapchain ends the loop
/// normally since the window cannot be resized.
pub fn run_app(config: AppConfig) -> anyhow::Result<()> {
    info!(target: targets::APP, "{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner {
        config,
        state: None,
        failure: None,
    };

    event_loop.run_app(&mut runner)?;

    match runner.failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Internal application runner that implements winit's ApplicationHandler.
struct AppRunner {
    config: AppConfig,
    state: Option<AppState>,
    failure: Option<anyhow::Error>,
}

struct AppState {
    ctx: AppContext,
    stats: FrameStats,
    last_frame: Instant,
    reported_suboptimal: bool,
}

impl ApplicationHandler for AppRunner {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!(target: targets::APP, "Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!(target: targets::APP, "Application ready!");
            }
            Err(e) => {
                error!(target: targets::APP, "Failed to initialize application: {e:#}");
                self.failure = Some(e);
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let WindowEvent::CloseRequested = event {
            info!(target: targets::APP, "Close requested");
            self.teardown();
            event_loop.exit();
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        let Some(state) = &mut self.state else {
            return;
        };

        match state.ctx.run_frame() {
            Ok(status) => {
                let now = Instant::now();
                state.stats.record(now.duration_since(state.last_frame));
                state.last_frame = now;

                if status.suboptimal && !state.reported_suboptimal {
                    debug!(target: targets::APP, "Swapchain reported suboptimal at frame {}", status.frame_number);
                    state.reported_suboptimal = true;
                }
            }
            Err(e) if e.is_out_of_date() => {
                info!(target: targets::APP, "Swapchain out of date and the window cannot resize; exiting");
                self.teardown();
                event_loop.exit();
            }
            Err(e) => {
                error!(target: targets::APP, "Frame failed: {e}");
                self.failure = Some(e.into());
                self.teardown();
                event_loop.exit();
            }
        }
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        self.teardown();
    }
}

impl AppRunner {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState> {
        let window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height))
            .with_resizable(false);

        let window = Arc::new(event_loop.create_window(window_attrs)?);
        let ctx = AppContext::new(window, &self.config)?;

        Ok(AppState {
            ctx,
            stats: FrameStats::new(),
            last_frame: Instant::now(),
            reported_suboptimal: false,
        })
    }

    /// Drain the device and release every GPU object. Safe to call twice.
    fn teardown(&mut self) {
        let Some(mut state) = self.state.take() else {
            return;
        };

        state.stats.log_summary();

        info!(target: targets::APP, "Starting cleanup...");
        if let Err(e) = state.ctx.shutdown() {
            error!(target: targets::APP, "Failed to drain the device: {e}");
            self.failure.get_or_insert_with(|| e.into());
        }
        drop(state);
        info!(target: targets::APP, "Cleanup complete");
    }
}
