// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen,
// together with the render pass and one framebuffer per image.
// Rebuilt wholesale when the surface is resized or goes stale.

use anyhow::{Context, Result};
use ash::vk;

use super::device::{QueueFamilyIndices, SwapchainSupportDetails};
use super::gpu::GpuDevice;

/// Preferred surface format: 8-bit BGRA in sRGB.
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_SRGB,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Prefer BGRA8 sRGB, otherwise whatever the device lists first.
/// `None` only when the list is empty.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == PREFERRED_SURFACE_FORMAT.format
                && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
        })
        .or_else(|| formats.first().copied())
}

/// MAILBOX when offered; FIFO otherwise, the one mode every device must support.
pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Use the surface's current extent unless it is the `u32::MAX` "no
/// preference" sentinel, in which case clamp the window size into the
/// allowed range.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_extent: vk::Extent2D,
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum so we never wait on the driver for an image,
/// capped at the maximum when there is one (0 means unbounded).
pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = capabilities.min_image_count + 1;

    if capabilities.max_image_count > 0 && image_count > capabilities.max_image_count {
        capabilities.max_image_count
    } else {
        image_count
    }
}

/// Concurrent sharing across both families when they differ, exclusive
/// with no family list otherwise.
pub fn choose_sharing_mode(indices: &QueueFamilyIndices) -> Result<(vk::SharingMode, Vec<u32>)> {
    let graphics = indices.graphics()?;
    let present = indices.present()?;

    if graphics != present {
        Ok((vk::SharingMode::CONCURRENT, vec![graphics, present]))
    } else {
        Ok((vk::SharingMode::EXCLUSIVE, Vec::new()))
    }
}

/// Single-subpass render pass with one cleared color attachment that ends
/// up ready for presentation.
pub fn create_render_pass<D: GpuDevice>(device: &D, format: vk::Format) -> Result<vk::RenderPass> {
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    // Color writes must wait until the acquired image is actually ours
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    device.create_render_pass(&render_pass_info)
}

/// Returned by [`Swapchain::recreate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recreation {
    /// The surface format changed, so the render pass (and anything
    /// compiled against it) had to be rebuilt.
    pub render_pass_rebuilt: bool,
}

/// Swapchain plus everything bound to its images.
///
/// Does not hold the device; every operation takes it. A default value
/// owns nothing and `destroy` on it is a no-op, as is a second `destroy`.
#[derive(Debug, Default)]
pub struct Swapchain {
    surface: vk::SurfaceKHR,
    handle: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    /// Owned by the swapchain itself, never destroyed here.
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    framebuffers: Vec<vk::Framebuffer>,
    render_pass: vk::RenderPass,
    render_pass_format: vk::Format,
}

impl Swapchain {
    pub fn new<D: GpuDevice>(
        device: &D,
        surface: vk::SurfaceKHR,
        window_extent: vk::Extent2D,
    ) -> Result<Self> {
        let mut swapchain = Self {
            surface,
            ..Default::default()
        };

        let built = swapchain
            .create_swapchain(device, window_extent)
            .and_then(|()| swapchain.create_image_views(device))
            .and_then(|()| swapchain.ensure_render_pass(device).map(|_| ()))
            .and_then(|()| swapchain.create_framebuffers(device));

        if let Err(e) = built {
            swapchain.destroy(device);
            return Err(e);
        }

        Ok(swapchain)
    }

    /// Tear down framebuffers, views and the swapchain handle, then build
    /// them again for `window_extent`. The render pass is kept unless the
    /// chosen format changed.
    ///
    /// The caller must make sure the device is idle first.
    pub fn recreate<D: GpuDevice>(
        &mut self,
        device: &D,
        window_extent: vk::Extent2D,
    ) -> Result<Recreation> {
        self.cleanup_swapchain(device);

        self.create_swapchain(device, window_extent)?;
        self.create_image_views(device)?;
        let render_pass_rebuilt = self.ensure_render_pass(device)?;
        self.create_framebuffers(device)?;

        Ok(Recreation {
            render_pass_rebuilt,
        })
    }

    /// Destroy everything, render pass included.
    pub fn destroy<D: GpuDevice>(&mut self, device: &D) {
        self.cleanup_swapchain(device);

        if self.render_pass != vk::RenderPass::null() {
            device.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
        }
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn framebuffers(&self) -> &[vk::Framebuffer] {
        &self.framebuffers
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).copied()
    }

    fn cleanup_swapchain<D: GpuDevice>(&mut self, device: &D) {
        for framebuffer in self.framebuffers.drain(..) {
            device.destroy_framebuffer(framebuffer);
        }

        for view in self.image_views.drain(..) {
            device.destroy_image_view(view);
        }

        self.images.clear();

        if self.handle != vk::SwapchainKHR::null() {
            device.destroy_swapchain(self.handle);
            self.handle = vk::SwapchainKHR::null();
        }
    }

    fn create_swapchain<D: GpuDevice>(
        &mut self,
        device: &D,
        window_extent: vk::Extent2D,
    ) -> Result<()> {
        let support: SwapchainSupportDetails = device.query_swapchain_support(self.surface)?;
        let capabilities = &support.capabilities;

        let surface_format = choose_surface_format(&support.formats)
            .context("Surface reports no formats")?;
        let present_mode = choose_present_mode(&support.present_modes);
        let extent = choose_extent(capabilities, window_extent);
        let image_count = choose_image_count(capabilities);

        let indices = device.find_queue_families(self.surface)?;
        let (sharing_mode, family_indices) = choose_sharing_mode(&indices)?;

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(self.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(&family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        self.handle = device.create_swapchain(&create_info)?;
        self.images = device.swapchain_images(self.handle)?;
        self.format = surface_format.format;
        self.extent = extent;
        self.present_mode = present_mode;

        log::info!(
            "Created swapchain: {}x{}, {} images, {:?}, {:?}, {:?}",
            extent.width,
            extent.height,
            self.images.len(),
            surface_format.format,
            present_mode,
            sharing_mode
        );

        Ok(())
    }

    fn create_image_views<D: GpuDevice>(&mut self, device: &D) -> Result<()> {
        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = device.create_image_view(&create_info)?;
            self.image_views.push(view);
        }

        Ok(())
    }

    /// Build the render pass if there is none, or rebuild it if the format
    /// moved. Returns whether a rebuild of an existing pass happened.
    fn ensure_render_pass<D: GpuDevice>(&mut self, device: &D) -> Result<bool> {
        if self.render_pass != vk::RenderPass::null() {
            if self.render_pass_format == self.format {
                return Ok(false);
            }

            log::warn!(
                "Surface format changed from {:?} to {:?}, rebuilding render pass",
                self.render_pass_format,
                self.format
            );
            device.destroy_render_pass(self.render_pass);
            self.render_pass = vk::RenderPass::null();
            self.render_pass = create_render_pass(device, self.format)?;
            self.render_pass_format = self.format;
            return Ok(true);
        }

        self.render_pass = create_render_pass(device, self.format)?;
        self.render_pass_format = self.format;
        Ok(false)
    }

    fn create_framebuffers<D: GpuDevice>(&mut self, device: &D) -> Result<()> {
        for &view in &self.image_views {
            let attachments = &[view];
            let framebuffer_info = vk::FramebufferCreateInfo::builder()
                .render_pass(self.render_pass)
                .attachments(attachments)
                .width(self.extent.width)
                .height(self.extent.height)
                .layers(1);

            let framebuffer = device.create_framebuffer(&framebuffer_info)?;
            self.framebuffers.push(framebuffer);
        }

        Ok(())
    }
}
