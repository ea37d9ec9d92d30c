// Device-call seam
//
// Every device-level call made by the swapchain manager, the pipeline
// builder, the sync set and the frame renderer goes through `GpuDevice`.
// `LogicalDevice` implements it on top of ash; `backend::testing` has a
// recording implementation so the lifecycle logic runs without a driver.

use anyhow::Result;
use ash::prelude::VkResult;
use ash::vk;

use super::device::{QueueFamilyIndices, SwapchainSupportDetails};

/// Everything needed to record one frame's command buffer.
#[derive(Debug, Clone, Copy)]
pub struct FrameRecording {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub pipeline: vk::Pipeline,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

pub trait GpuDevice {
    /// Fresh capability query; never cached.
    fn query_swapchain_support(&self, surface: vk::SurfaceKHR) -> Result<SwapchainSupportDetails>;
    fn find_queue_families(&self, surface: vk::SurfaceKHR) -> Result<QueueFamilyIndices>;

    /// Blocks until every queue on the device has drained.
    fn wait_idle(&self) -> Result<()>;

    // Swapchain manager
    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> Result<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    fn create_image_view(&self, info: &vk::ImageViewCreateInfo) -> Result<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> Result<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> Result<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);

    // Pipeline builder
    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule>;
    fn destroy_shader_module(&self, module: vk::ShaderModule);
    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo) -> Result<vk::PipelineLayout>;
    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout);
    fn create_graphics_pipeline(&self, info: &vk::GraphicsPipelineCreateInfo) -> Result<vk::Pipeline>;
    fn destroy_pipeline(&self, pipeline: vk::Pipeline);

    // Synchronization
    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;

    // Commands
    fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]);
    /// Resets `cmd` and records a full render pass into it.
    fn record_frame(&self, cmd: vk::CommandBuffer, frame: &FrameRecording) -> Result<()>;

    // Queue operations. Raw results so the frame renderer can tell
    // staleness apart from real failures.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    fn submit(&self, info: &vk::SubmitInfo, fence: vk::Fence) -> VkResult<()>;
    fn present(&self, info: &vk::PresentInfoKHR) -> VkResult<bool>;
}
