// Renderer context
//
// One explicit object holding every Vulkan resource, created in dependency
// order by `init` and released in reverse by `cleanup`. The host calls
// `draw_frame` once per redraw and `notify_resized` on window resize;
// swapchain staleness is handled here and never reaches the host as an
// error.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::backend::device::{required_device_extensions, LogicalDevice};
use crate::backend::frame::{FrameRenderer, FrameStatus};
use crate::backend::gpu::GpuDevice;
use crate::backend::instance::Instance;
use crate::backend::pipeline::GraphicsPipeline;
use crate::backend::surface;
use crate::backend::swapchain::Swapchain;
use crate::config::Config;
use crate::resources::ShaderLibrary;

/// Logical names of the two shader stages.
pub const VERTEX_SHADER: &str = "vert";
pub const FRAGMENT_SHADER: &str = "frag";

/// Result of one `draw_frame` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameOutcome {
    /// A frame was presented and the swapchain is still current.
    Presented,
    /// The swapchain was rebuilt during this call. The frame may or may
    /// not have reached the screen.
    Recreated,
    /// Zero-sized framebuffer (minimised); nothing was done and
    /// recreation is deferred until there is something to draw to.
    Skipped,
}

/// Swapchain, pipeline and frame loop: everything that depends on the
/// surface and is rebuilt or driven each frame.
#[derive(Debug, Default)]
struct Presenter {
    frames: FrameRenderer,
    pipeline: GraphicsPipeline,
    swapchain: Swapchain,
    pending_recreate: bool,
}

impl Presenter {
    fn new<D: GpuDevice>(
        device: &D,
        surface: vk::SurfaceKHR,
        extent: vk::Extent2D,
        shaders: &ShaderLibrary,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let mut presenter = Self::default();

        let created = (|| -> Result<()> {
            presenter.swapchain = Swapchain::new(device, surface, extent)?;
            presenter.pipeline = build_pipeline(device, presenter.swapchain.render_pass(), shaders)?;
            presenter.frames = FrameRenderer::new(device, clear_color)?;
            Ok(())
        })();

        if let Err(e) = created {
            presenter.destroy(device);
            return Err(e);
        }

        Ok(presenter)
    }

    fn draw_frame<D: GpuDevice>(
        &mut self,
        device: &D,
        shaders: &ShaderLibrary,
        extent: vk::Extent2D,
    ) -> Result<FrameOutcome> {
        if extent.width == 0 || extent.height == 0 {
            self.pending_recreate = true;
            return Ok(FrameOutcome::Skipped);
        }

        let mut recreated = false;
        if self.pending_recreate {
            self.rebuild(device, shaders, extent, "deferred")?;
            recreated = true;
        }

        let status = self
            .frames
            .draw_frame(device, &self.swapchain, &self.pipeline)?;

        match status {
            FrameStatus::Presented if !recreated => Ok(FrameOutcome::Presented),
            FrameStatus::Presented => Ok(FrameOutcome::Recreated),
            FrameStatus::Stale => {
                self.rebuild(device, shaders, extent, "out of date at acquire")?;
                Ok(FrameOutcome::Recreated)
            }
            FrameStatus::NeedsRecreate => {
                self.rebuild(device, shaders, extent, "stale or resized at present")?;
                Ok(FrameOutcome::Recreated)
            }
        }
    }

    /// Drain the device, rebuild the swapchain, and rebuild the pipeline
    /// too if the render pass had to change.
    fn rebuild<D: GpuDevice>(
        &mut self,
        device: &D,
        shaders: &ShaderLibrary,
        extent: vk::Extent2D,
        reason: &str,
    ) -> Result<()> {
        log::info!(
            "Recreating swapchain ({}) at {}x{}",
            reason,
            extent.width,
            extent.height
        );

        device.wait_idle()?;

        // Stays set if recreation fails part way
        self.pending_recreate = true;
        let recreation = self.swapchain.recreate(device, extent)?;

        if recreation.render_pass_rebuilt {
            log::info!("Render pass changed, rebuilding graphics pipeline");
            let pipeline = build_pipeline(device, self.swapchain.render_pass(), shaders)?;
            let mut old = std::mem::replace(&mut self.pipeline, pipeline);
            old.destroy(device);
        }

        self.pending_recreate = false;
        Ok(())
    }

    fn notify_resized(&mut self) {
        self.frames.notify_resized();
    }

    fn destroy<D: GpuDevice>(&mut self, device: &D) {
        self.frames.destroy(device);
        self.pipeline.destroy(device);
        self.swapchain.destroy(device);
    }
}

fn build_pipeline<D: GpuDevice>(
    device: &D,
    render_pass: vk::RenderPass,
    shaders: &ShaderLibrary,
) -> Result<GraphicsPipeline> {
    GraphicsPipeline::new(
        device,
        render_pass,
        shaders.get(VERTEX_SHADER)?,
        shaders.get(FRAGMENT_SHADER)?,
    )
}

/// The whole renderer.
///
/// A default value owns nothing; `cleanup` (and dropping) is safe on it,
/// on a partially initialized one, and a second time.
#[derive(Default)]
pub struct Renderer {
    presenter: Presenter,
    device: Option<LogicalDevice>,
    surface: vk::SurfaceKHR,
    instance: Option<Instance>,
    shaders: Option<ShaderLibrary>,
}

impl Renderer {
    /// Bring up instance, surface, device, swapchain, pipeline and frame
    /// loop for the given window.
    pub fn init(
        config: &Config,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        extent: vk::Extent2D,
    ) -> Result<Self> {
        log::info!("Initializing Vulkan...");

        let mut renderer = Self::default();

        if let Err(e) = renderer.build(config, display, window, extent) {
            renderer.cleanup();
            return Err(e);
        }

        log::info!("Vulkan initialized successfully!");
        Ok(renderer)
    }

    fn build(
        &mut self,
        config: &Config,
        display: RawDisplayHandle,
        window: RawWindowHandle,
        extent: vk::Extent2D,
    ) -> Result<()> {
        let surface_extensions = surface::required_instance_extensions(display)?;
        let instance = &*self.instance.insert(Instance::new(
            &config.window.title,
            &surface_extensions,
            config.validation_enabled(),
        )?);

        self.surface = surface::create_surface(instance, display, window)?;

        let device = &*self.device.insert(LogicalDevice::new(
            instance,
            self.surface,
            &required_device_extensions(),
        )?);
        log::info!("Using GPU: {}", device.device_name());

        let mut shaders = ShaderLibrary::new(&config.resources.shader_dir);
        for name in [VERTEX_SHADER, FRAGMENT_SHADER] {
            shaders
                .load(name)
                .with_context(|| format!("Failed to load shader `{}`", name))?;
        }
        let shaders = &*self.shaders.insert(shaders);

        self.presenter = Presenter::new(
            device,
            self.surface,
            extent,
            shaders,
            config.graphics.clear_color,
        )?;

        Ok(())
    }

    /// Render one frame to a framebuffer of `extent` (the window's current
    /// size in pixels).
    pub fn draw_frame(&mut self, extent: vk::Extent2D) -> Result<FrameOutcome> {
        let device = self.device.as_ref().context("Renderer not initialized")?;
        let shaders = self.shaders.as_ref().context("Renderer not initialized")?;

        self.presenter.draw_frame(device, shaders, extent)
    }

    /// Host notification that the framebuffer changed size.
    pub fn notify_resized(&mut self) {
        self.presenter.notify_resized();
    }

    /// Block until the GPU has finished all submitted work.
    pub fn wait_idle(&self) -> Result<()> {
        match &self.device {
            Some(device) => device.wait_idle(),
            None => Ok(()),
        }
    }

    pub fn swapchain_extent(&self) -> vk::Extent2D {
        self.presenter.swapchain.extent()
    }

    /// Release everything in reverse creation order.
    pub fn cleanup(&mut self) {
        if let Some(device) = self.device.take() {
            log::info!("Cleaning up Vulkan resources...");

            if let Err(e) = device.wait_idle() {
                log::warn!("Device did not go idle before cleanup: {:?}", e);
            }
            self.presenter.destroy(&device);
            drop(device);
        }

        self.shaders = None;

        if let Some(instance) = self.instance.take() {
            instance.destroy_surface(self.surface);
            self.surface = vk::SurfaceKHR::null();
            drop(instance);
            log::info!("Cleanup complete");
        }
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.cleanup();
    }
}
