// =============================================================================
// HUNDRED KILOMETERS - Vulkan triangle host
// =============================================================================
//
// Opens a window with winit and drives the renderer from the event loop:
//
// FRAME FLOW:
// 1. RedrawRequested -> Renderer::draw_frame(window size)
// 2. Resized         -> Renderer::notify_resized
// 3. about_to_wait   -> request the next redraw (continuous rendering)
// 4. Close / Escape  -> wait for the GPU, exit; the renderer cleans up on drop
//
// The first fatal renderer error stops the loop and is returned from main.
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use hundred_km::{Config, FrameOutcome, Renderer};
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml
    let config = Config::load();

    init_logging(&config);
    log::info!("Starting {}", config.window.title);
    log::info!("Window: {}x{}", config.window.width, config.window.height);

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    match app.fatal.take() {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

/// Info by default, then `debug.log_filter` from the config, then RUST_LOG.
fn init_logging(config: &Config) {
    use env_logger::{Builder, Env};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);

    if let Some(filter) = &config.debug.log_filter {
        builder.parse_filters(filter);
    }

    builder.parse_env(Env::default());
    builder.init();
}

fn window_extent(window: &Window) -> vk::Extent2D {
    let size = window.inner_size();
    vk::Extent2D {
        width: size.width,
        height: size.height,
    }
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The renderer must go before the
/// window its surface was created from.
struct App {
    config: Config,
    renderer: Option<Renderer>,
    window: Option<Window>,

    /// First fatal error; stops the loop and is returned from main
    fatal: Option<anyhow::Error>,

    // FPS tracking
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();

        Self {
            config,
            renderer: None,
            window: None,
            fatal: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn init_renderer(&self, window: &Window) -> Result<Renderer> {
        let display = window
            .display_handle()
            .context("Failed to get display handle")?
            .as_raw();
        let handle = window
            .window_handle()
            .context("Failed to get window handle")?
            .as_raw();

        Renderer::init(&self.config, display, handle, window_extent(window))
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("Fatal renderer error: {:?}", error);
        if self.fatal.is_none() {
            self.fatal = Some(error);
        }
        event_loop.exit();
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(renderer) = &self.renderer {
            if let Err(e) = renderer.wait_idle() {
                log::warn!("Failed to wait for device idle: {:?}", e);
            }
        }
        event_loop.exit();
    }

    fn render(&mut self, event_loop: &ActiveEventLoop) {
        let (Some(renderer), Some(window)) = (self.renderer.as_mut(), self.window.as_ref()) else {
            return;
        };

        match renderer.draw_frame(window_extent(window)) {
            Ok(FrameOutcome::Presented) | Ok(FrameOutcome::Recreated) => self.update_fps(),
            Ok(FrameOutcome::Skipped) => {}
            Err(e) => self.fail(event_loop, e),
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(window) = &self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0,
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(window) => window,
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_renderer(&window) {
            Ok(renderer) => {
                self.renderer = Some(renderer);
                self.window = Some(window);
            }
            Err(e) => self.fail(event_loop, e.context("Failed to initialize renderer")),
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.shutdown(event_loop);
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                if let Some(renderer) = &mut self.renderer {
                    renderer.notify_resized();
                }
            }

            WindowEvent::RedrawRequested => self.render(event_loop),

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.shutdown(event_loop);
                }
            }

            _ => {}
        }
    }

    /// Continuous redraws for as long as the loop runs.
    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        if event_loop.exiting() {
            return;
        }
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}
