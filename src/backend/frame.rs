// Frame renderer
//
// Drives one frame: wait for the slot's fence, acquire an image, record,
// submit, present. Staleness reported by acquire or present is handed back
// to the caller as a status so it can rebuild the swapchain; anything else
// the driver reports is fatal.

use anyhow::{Context, Result};
use ash::prelude::VkResult;
use ash::vk;

use super::error::RendererError;
use super::gpu::{FrameRecording, GpuDevice};
use super::pipeline::{full_scissor, full_viewport, GraphicsPipeline};
use super::swapchain::Swapchain;
use super::sync::{FrameIndex, FrameSync, MAX_FRAMES_IN_FLIGHT};

/// What happened to a frame that did not fail outright.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    /// Submitted and presented; nothing to do.
    Presented,
    /// Presented (or attempted), but the swapchain no longer matches the
    /// surface or the window was resized. Recreate before the next frame.
    NeedsRecreate,
    /// The swapchain was out of date at acquire time. Nothing was
    /// submitted and the slot's fence is still signaled.
    Stale,
}

/// Per-frame command buffers and sync objects.
#[derive(Debug, Default)]
pub struct FrameRenderer {
    command_buffers: Vec<vk::CommandBuffer>,
    sync: Vec<FrameSync>,
    frame: FrameIndex,
    framebuffer_resized: bool,
    clear_color: [f32; 4],
}

impl FrameRenderer {
    pub fn new<D: GpuDevice>(device: &D, clear_color: [f32; 4]) -> Result<Self> {
        let mut renderer = Self {
            clear_color,
            ..Default::default()
        };

        let created = (|| -> Result<()> {
            renderer.command_buffers =
                device.allocate_command_buffers(MAX_FRAMES_IN_FLIGHT as u32)?;
            for _ in 0..MAX_FRAMES_IN_FLIGHT {
                renderer.sync.push(FrameSync::new(device)?);
            }
            Ok(())
        })();

        if let Err(e) = created {
            renderer.destroy(device);
            return Err(e);
        }

        log::debug!("Created {} frames in flight", MAX_FRAMES_IN_FLIGHT);

        Ok(renderer)
    }

    /// The window changed size; recreate after the next present even if the
    /// driver does not say so.
    pub fn notify_resized(&mut self) {
        self.framebuffer_resized = true;
    }

    pub fn current_frame(&self) -> usize {
        self.frame.current()
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn draw_frame<D: GpuDevice>(
        &mut self,
        device: &D,
        swapchain: &Swapchain,
        pipeline: &GraphicsPipeline,
    ) -> Result<FrameStatus> {
        let current = self.frame.current();
        let sync = self
            .sync
            .get(current)
            .context("Frame renderer has no sync objects")?;
        let cmd = self.command_buffers[current];

        device.wait_for_fence(sync.in_flight_fence)?;

        let image_index = match device.acquire_next_image(swapchain.handle(), sync.image_available) {
            Ok((index, _suboptimal)) => index,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::trace!("Swapchain out of date at acquire");
                return Ok(FrameStatus::Stale);
            }
            Err(e) => {
                return Err(RendererError::AcquireFailed(e))
                    .context("Failed to acquire swapchain image");
            }
        };

        // Only reset once we know work will be submitted
        device.reset_fence(sync.in_flight_fence)?;

        let framebuffer = swapchain
            .framebuffer(image_index)
            .with_context(|| format!("No framebuffer for swapchain image {}", image_index))?;

        device.record_frame(
            cmd,
            &FrameRecording {
                render_pass: swapchain.render_pass(),
                framebuffer,
                pipeline: pipeline.handle(),
                extent: swapchain.extent(),
                clear_color: self.clear_color,
            },
        )?;

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        device
            .submit(&submit_info, sync.in_flight_fence)
            .map_err(RendererError::SubmitFailed)
            .context("Failed to submit draw command buffer")?;

        let swapchains = [swapchain.handle()];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&signal_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let stale = match device.present(&present_info) {
            Ok(suboptimal) => suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => true,
            Err(e) => {
                return Err(RendererError::PresentFailed(e))
                    .context("Failed to present swapchain image");
            }
        };

        let resized = std::mem::take(&mut self.framebuffer_resized);
        self.frame.advance();

        if stale || resized {
            log::trace!("Swapchain needs recreation (stale: {}, resized: {})", stale, resized);
            Ok(FrameStatus::NeedsRecreate)
        } else {
            Ok(FrameStatus::Presented)
        }
    }

    /// Free command buffers and sync objects. Safe to call twice.
    pub fn destroy<D: GpuDevice>(&mut self, device: &D) {
        device.free_command_buffers(&self.command_buffers);
        self.command_buffers.clear();

        for sync in &mut self.sync {
            sync.destroy(device);
        }
        self.sync.clear();
    }
}

/// Record a full frame: clear, bind, set viewport/scissor, draw three
/// vertices. `cmd` must be in the initial state.
pub fn record_triangle_pass(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    frame: &FrameRecording,
) -> VkResult<()> {
    let begin_info = vk::CommandBufferBeginInfo::builder();

    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: frame.clear_color,
        },
    }];

    let render_pass_info = vk::RenderPassBeginInfo::builder()
        .render_pass(frame.render_pass)
        .framebuffer(frame.framebuffer)
        .render_area(full_scissor(frame.extent))
        .clear_values(&clear_values);

    unsafe {
        device.begin_command_buffer(cmd, &begin_info)?;

        device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, frame.pipeline);
        device.cmd_set_viewport(cmd, 0, &[full_viewport(frame.extent)]);
        device.cmd_set_scissor(cmd, 0, &[full_scissor(frame.extent)]);
        device.cmd_draw(cmd, 3, 1, 0, 0);
        device.cmd_end_render_pass(cmd);

        device.end_command_buffer(cmd)
    }
}
