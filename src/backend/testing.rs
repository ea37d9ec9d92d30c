// Recording device for headless tests
//
// Hands out fake handles from a counter and remembers what was created,
// destroyed, submitted and presented. Surface queries, acquire/present
// results and creation failures can be scripted per test.

use anyhow::{anyhow, Result};
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::ffi::CStr;

use super::device::{QueueFamilyIndices, SwapchainSupportDetails};
use super::error::RendererError;
use super::gpu::{FrameRecording, GpuDevice};

/// Reads `len` elements behind a create-info pointer.
unsafe fn slice<'a, T>(ptr: *const T, len: u32) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(ptr, len as usize)
    }
}

#[derive(Debug, Clone)]
pub struct SwapchainInfo {
    pub surface: vk::SurfaceKHR,
    pub min_image_count: u32,
    pub image_format: vk::Format,
    pub image_color_space: vk::ColorSpaceKHR,
    pub image_extent: vk::Extent2D,
    pub image_array_layers: u32,
    pub image_usage: vk::ImageUsageFlags,
    pub sharing_mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
    pub composite_alpha: vk::CompositeAlphaFlagsKHR,
    pub present_mode: vk::PresentModeKHR,
    pub clipped: bool,
    pub old_swapchain: vk::SwapchainKHR,
}

#[derive(Debug, Clone)]
pub struct FramebufferInfo {
    pub render_pass: vk::RenderPass,
    pub attachment_count: u32,
    pub width: u32,
    pub height: u32,
    pub layers: u32,
}

#[derive(Debug, Clone)]
pub struct RenderPassInfo {
    pub attachments: Vec<vk::AttachmentDescription>,
    pub subpass_count: u32,
    pub bind_point: vk::PipelineBindPoint,
    pub color_attachments: Vec<vk::AttachmentReference>,
    pub dependencies: Vec<vk::SubpassDependency>,
}

#[derive(Debug, Clone)]
pub struct ShaderStage {
    pub stage: vk::ShaderStageFlags,
    pub module: vk::ShaderModule,
    pub entry_point: String,
}

#[derive(Debug, Clone)]
pub struct PipelineInfo {
    pub stages: Vec<ShaderStage>,
    pub vertex_binding_count: u32,
    pub vertex_attribute_count: u32,
    pub topology: vk::PrimitiveTopology,
    pub primitive_restart: bool,
    pub viewport_count: u32,
    pub scissor_count: u32,
    pub static_viewports: bool,
    pub dynamic_states: Vec<vk::DynamicState>,
    pub depth_clamp: bool,
    pub rasterizer_discard: bool,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub depth_bias: bool,
    pub line_width: f32,
    pub samples: vk::SampleCountFlags,
    pub sample_shading: bool,
    pub has_depth_stencil: bool,
    pub logic_op_enable: bool,
    pub blend_attachments: Vec<vk::PipelineColorBlendAttachmentState>,
    pub layout: vk::PipelineLayout,
    pub render_pass: vk::RenderPass,
    pub subpass: u32,
}

#[derive(Debug, Clone)]
pub struct SubmitRecord {
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub wait_stages: Vec<vk::PipelineStageFlags>,
    pub command_buffers: Vec<vk::CommandBuffer>,
    pub signal_semaphores: Vec<vk::Semaphore>,
    pub fence: vk::Fence,
}

#[derive(Debug, Clone)]
pub struct PresentRecord {
    pub wait_semaphores: Vec<vk::Semaphore>,
    pub swapchains: Vec<vk::SwapchainKHR>,
    pub image_indices: Vec<u32>,
}

pub struct RecordingDevice {
    next_handle: Cell<u64>,
    created: RefCell<HashMap<&'static str, usize>>,
    destroyed: RefCell<HashMap<&'static str, usize>>,
    /// Successful creations left before a kind starts failing.
    failures: RefCell<HashMap<&'static str, usize>>,
    calls: RefCell<Vec<&'static str>>,

    support: RefCell<SwapchainSupportDetails>,
    queue_families: Cell<QueueFamilyIndices>,
    swapchain_image_counts: RefCell<HashMap<vk::SwapchainKHR, u32>>,
    fences: RefCell<HashMap<vk::Fence, bool>>,
    acquire_results: RefCell<VecDeque<VkResult<(u32, bool)>>>,
    present_results: RefCell<VecDeque<VkResult<bool>>>,
    submit_results: RefCell<VecDeque<VkResult<()>>>,
    next_image: Cell<u32>,
    wait_idle_calls: Cell<usize>,

    swapchain_infos: RefCell<Vec<SwapchainInfo>>,
    framebuffer_infos: RefCell<Vec<FramebufferInfo>>,
    render_pass_infos: RefCell<Vec<RenderPassInfo>>,
    pipeline_infos: RefCell<Vec<PipelineInfo>>,
    pipeline_layout_set_counts: RefCell<Vec<(u32, u32)>>,
    shader_code: RefCell<Vec<Vec<u32>>>,
    recordings: RefCell<Vec<(vk::CommandBuffer, FrameRecording)>>,
    submits: RefCell<Vec<SubmitRecord>>,
    presents: RefCell<Vec<PresentRecord>>,
}

impl RecordingDevice {
    /// Two images minimum, BGRA8 sRGB and MAILBOX available, one family
    /// doing both graphics and present, extent left to the window.
    pub fn new() -> Self {
        let support = SwapchainSupportDetails {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::R8G8B8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };

        Self {
            next_handle: Cell::new(0x1000),
            created: RefCell::default(),
            destroyed: RefCell::default(),
            failures: RefCell::default(),
            calls: RefCell::default(),
            support: RefCell::new(support),
            queue_families: Cell::new(QueueFamilyIndices {
                graphics_family: Some(0),
                present_family: Some(0),
            }),
            swapchain_image_counts: RefCell::default(),
            fences: RefCell::default(),
            acquire_results: RefCell::default(),
            present_results: RefCell::default(),
            submit_results: RefCell::default(),
            next_image: Cell::new(0),
            wait_idle_calls: Cell::new(0),
            swapchain_infos: RefCell::default(),
            framebuffer_infos: RefCell::default(),
            render_pass_infos: RefCell::default(),
            pipeline_infos: RefCell::default(),
            pipeline_layout_set_counts: RefCell::default(),
            shader_code: RefCell::default(),
            recordings: RefCell::default(),
            submits: RefCell::default(),
            presents: RefCell::default(),
        }
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        vk::SurfaceKHR::from_raw(0xF00D)
    }

    // Scripting

    pub fn set_formats(&self, formats: Vec<vk::SurfaceFormatKHR>) {
        self.support.borrow_mut().formats = formats;
    }

    pub fn set_capabilities(&self, capabilities: vk::SurfaceCapabilitiesKHR) {
        self.support.borrow_mut().capabilities = capabilities;
    }

    pub fn set_queue_families(&self, indices: QueueFamilyIndices) {
        self.queue_families.set(indices);
    }

    /// Next creation of `kind` fails.
    pub fn fail_on(&self, kind: &'static str) {
        self.fail_after(kind, 0);
    }

    /// Creation of `kind` fails once `successes` more have gone through.
    pub fn fail_after(&self, kind: &'static str, successes: usize) {
        self.failures.borrow_mut().insert(kind, successes);
    }

    pub fn push_acquire_result(&self, result: VkResult<(u32, bool)>) {
        self.acquire_results.borrow_mut().push_back(result);
    }

    pub fn push_present_result(&self, result: VkResult<bool>) {
        self.present_results.borrow_mut().push_back(result);
    }

    pub fn push_submit_result(&self, result: VkResult<()>) {
        self.submit_results.borrow_mut().push_back(result);
    }

    // Inspection

    pub fn created(&self, kind: &str) -> usize {
        self.created.borrow().get(kind).copied().unwrap_or(0)
    }

    pub fn destroyed(&self, kind: &str) -> usize {
        self.destroyed.borrow().get(kind).copied().unwrap_or(0)
    }

    pub fn total_destroyed(&self) -> usize {
        self.destroyed.borrow().values().sum()
    }

    /// Every kind created so far has been destroyed as many times.
    pub fn is_balanced(&self) -> bool {
        let created = self.created.borrow();
        let destroyed = self.destroyed.borrow();

        created
            .iter()
            .all(|(kind, count)| destroyed.get(kind).copied().unwrap_or(0) == *count)
            && destroyed.keys().all(|kind| created.contains_key(kind))
    }

    /// Queue and sync calls in the order they were made.
    pub fn calls(&self) -> Vec<&'static str> {
        self.calls.borrow().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.borrow_mut().clear();
    }

    pub fn wait_idle_calls(&self) -> usize {
        self.wait_idle_calls.get()
    }

    pub fn is_fence_signaled(&self, fence: vk::Fence) -> Option<bool> {
        self.fences.borrow().get(&fence).copied()
    }

    pub fn last_swapchain_info(&self) -> Option<SwapchainInfo> {
        self.swapchain_infos.borrow().last().cloned()
    }

    pub fn last_framebuffer_info(&self) -> Option<FramebufferInfo> {
        self.framebuffer_infos.borrow().last().cloned()
    }

    pub fn last_render_pass_info(&self) -> Option<RenderPassInfo> {
        self.render_pass_infos.borrow().last().cloned()
    }

    pub fn last_pipeline_info(&self) -> Option<PipelineInfo> {
        self.pipeline_infos.borrow().last().cloned()
    }

    /// (set layouts, push constant ranges) per pipeline layout created.
    pub fn pipeline_layout_contents(&self) -> Vec<(u32, u32)> {
        self.pipeline_layout_set_counts.borrow().clone()
    }

    pub fn shader_code(&self) -> Vec<Vec<u32>> {
        self.shader_code.borrow().clone()
    }

    pub fn recordings(&self) -> Vec<(vk::CommandBuffer, FrameRecording)> {
        self.recordings.borrow().clone()
    }

    pub fn submits(&self) -> Vec<SubmitRecord> {
        self.submits.borrow().clone()
    }

    pub fn presents(&self) -> Vec<PresentRecord> {
        self.presents.borrow().clone()
    }

    fn call(&self, name: &'static str) {
        self.calls.borrow_mut().push(name);
    }

    fn handle<H: Handle>(&self) -> H {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        H::from_raw(raw)
    }

    /// Count a creation of `kind`, or fail it if scripted to.
    fn create<H: Handle>(&self, kind: &'static str) -> Result<H> {
        let mut failures = self.failures.borrow_mut();
        if let Some(remaining) = failures.get_mut(kind) {
            if *remaining == 0 {
                failures.remove(kind);
                return Err(creation_error(kind));
            }
            *remaining -= 1;
        }
        drop(failures);

        *self.created.borrow_mut().entry(kind).or_default() += 1;
        Ok(self.handle())
    }

    fn destroy<H: Handle>(&self, kind: &'static str, handle: H) {
        assert_ne!(handle.as_raw(), 0, "destroying a null {kind}");
        *self.destroyed.borrow_mut().entry(kind).or_default() += 1;
    }
}

impl Default for RecordingDevice {
    fn default() -> Self {
        Self::new()
    }
}

fn creation_error(kind: &str) -> anyhow::Error {
    let result = vk::Result::ERROR_OUT_OF_DEVICE_MEMORY;
    let error = match kind {
        "swapchain" | "image_view" | "render_pass" | "framebuffer" => {
            RendererError::SwapchainCreation(result)
        }
        "shader_module" | "pipeline_layout" | "pipeline" => RendererError::PipelineCreation(result),
        "semaphore" | "fence" => RendererError::SyncObjectCreation(result),
        "command_buffer" => RendererError::CommandRecording(result),
        _ => return anyhow!("scripted failure creating {kind}"),
    };

    anyhow::Error::new(error).context(format!("Failed to create {kind}"))
}

impl GpuDevice for RecordingDevice {
    fn query_swapchain_support(&self, _surface: vk::SurfaceKHR) -> Result<SwapchainSupportDetails> {
        Ok(self.support.borrow().clone())
    }

    fn find_queue_families(&self, _surface: vk::SurfaceKHR) -> Result<QueueFamilyIndices> {
        Ok(self.queue_families.get())
    }

    fn wait_idle(&self) -> Result<()> {
        self.call("wait_idle");
        self.wait_idle_calls.set(self.wait_idle_calls.get() + 1);
        Ok(())
    }

    fn create_swapchain(&self, info: &vk::SwapchainCreateInfoKHR) -> Result<vk::SwapchainKHR> {
        let swapchain = self.create("swapchain")?;

        let queue_family_indices =
            unsafe { slice(info.p_queue_family_indices, info.queue_family_index_count) }.to_vec();
        self.swapchain_infos.borrow_mut().push(SwapchainInfo {
            surface: info.surface,
            min_image_count: info.min_image_count,
            image_format: info.image_format,
            image_color_space: info.image_color_space,
            image_extent: info.image_extent,
            image_array_layers: info.image_array_layers,
            image_usage: info.image_usage,
            sharing_mode: info.image_sharing_mode,
            queue_family_indices,
            composite_alpha: info.composite_alpha,
            present_mode: info.present_mode,
            clipped: info.clipped == vk::TRUE,
            old_swapchain: info.old_swapchain,
        });
        self.swapchain_image_counts
            .borrow_mut()
            .insert(swapchain, info.min_image_count);

        Ok(swapchain)
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> Result<Vec<vk::Image>> {
        let count = self
            .swapchain_image_counts
            .borrow()
            .get(&swapchain)
            .copied()
            .ok_or_else(|| anyhow!("unknown swapchain {swapchain:?}"))?;

        Ok((0..count).map(|_| self.handle()).collect())
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.swapchain_image_counts.borrow_mut().remove(&swapchain);
        self.destroy("swapchain", swapchain);
    }

    fn create_image_view(&self, _info: &vk::ImageViewCreateInfo) -> Result<vk::ImageView> {
        self.create("image_view")
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.destroy("image_view", view);
    }

    fn create_render_pass(&self, info: &vk::RenderPassCreateInfo) -> Result<vk::RenderPass> {
        let render_pass = self.create("render_pass")?;

        let snapshot = unsafe {
            let subpasses = slice(info.p_subpasses, info.subpass_count);
            let (bind_point, color_attachments) = subpasses
                .first()
                .map(|subpass| {
                    (
                        subpass.pipeline_bind_point,
                        slice(subpass.p_color_attachments, subpass.color_attachment_count)
                            .to_vec(),
                    )
                })
                .unwrap_or_default();

            RenderPassInfo {
                attachments: slice(info.p_attachments, info.attachment_count).to_vec(),
                subpass_count: info.subpass_count,
                bind_point,
                color_attachments,
                dependencies: slice(info.p_dependencies, info.dependency_count).to_vec(),
            }
        };
        self.render_pass_infos.borrow_mut().push(snapshot);

        Ok(render_pass)
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.destroy("render_pass", render_pass);
    }

    fn create_framebuffer(&self, info: &vk::FramebufferCreateInfo) -> Result<vk::Framebuffer> {
        let framebuffer = self.create("framebuffer")?;

        self.framebuffer_infos.borrow_mut().push(FramebufferInfo {
            render_pass: info.render_pass,
            attachment_count: info.attachment_count,
            width: info.width,
            height: info.height,
            layers: info.layers,
        });

        Ok(framebuffer)
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.destroy("framebuffer", framebuffer);
    }

    fn create_shader_module(&self, code: &[u32]) -> Result<vk::ShaderModule> {
        let module = self.create("shader_module")?;
        self.shader_code.borrow_mut().push(code.to_vec());
        Ok(module)
    }

    fn destroy_shader_module(&self, module: vk::ShaderModule) {
        self.destroy("shader_module", module);
    }

    fn create_pipeline_layout(&self, info: &vk::PipelineLayoutCreateInfo) -> Result<vk::PipelineLayout> {
        let layout = self.create("pipeline_layout")?;
        self.pipeline_layout_set_counts
            .borrow_mut()
            .push((info.set_layout_count, info.push_constant_range_count));
        Ok(layout)
    }

    fn destroy_pipeline_layout(&self, layout: vk::PipelineLayout) {
        self.destroy("pipeline_layout", layout);
    }

    fn create_graphics_pipeline(&self, info: &vk::GraphicsPipelineCreateInfo) -> Result<vk::Pipeline> {
        let pipeline = self.create("pipeline")?;

        let snapshot = unsafe {
            let stages = slice(info.p_stages, info.stage_count)
                .iter()
                .map(|stage| ShaderStage {
                    stage: stage.stage,
                    module: stage.module,
                    entry_point: CStr::from_ptr(stage.p_name).to_string_lossy().into_owned(),
                })
                .collect();
            let vertex_input = &*info.p_vertex_input_state;
            let input_assembly = &*info.p_input_assembly_state;
            let viewport = &*info.p_viewport_state;
            let rasterization = &*info.p_rasterization_state;
            let multisample = &*info.p_multisample_state;
            let color_blend = &*info.p_color_blend_state;
            let dynamic_states = if info.p_dynamic_state.is_null() {
                Vec::new()
            } else {
                let dynamic = &*info.p_dynamic_state;
                slice(dynamic.p_dynamic_states, dynamic.dynamic_state_count).to_vec()
            };

            PipelineInfo {
                stages,
                vertex_binding_count: vertex_input.vertex_binding_description_count,
                vertex_attribute_count: vertex_input.vertex_attribute_description_count,
                topology: input_assembly.topology,
                primitive_restart: input_assembly.primitive_restart_enable == vk::TRUE,
                viewport_count: viewport.viewport_count,
                scissor_count: viewport.scissor_count,
                static_viewports: !viewport.p_viewports.is_null() || !viewport.p_scissors.is_null(),
                dynamic_states,
                depth_clamp: rasterization.depth_clamp_enable == vk::TRUE,
                rasterizer_discard: rasterization.rasterizer_discard_enable == vk::TRUE,
                polygon_mode: rasterization.polygon_mode,
                cull_mode: rasterization.cull_mode,
                front_face: rasterization.front_face,
                depth_bias: rasterization.depth_bias_enable == vk::TRUE,
                line_width: rasterization.line_width,
                samples: multisample.rasterization_samples,
                sample_shading: multisample.sample_shading_enable == vk::TRUE,
                has_depth_stencil: !info.p_depth_stencil_state.is_null(),
                logic_op_enable: color_blend.logic_op_enable == vk::TRUE,
                blend_attachments: slice(color_blend.p_attachments, color_blend.attachment_count)
                    .to_vec(),
                layout: info.layout,
                render_pass: info.render_pass,
                subpass: info.subpass,
            }
        };
        self.pipeline_infos.borrow_mut().push(snapshot);

        Ok(pipeline)
    }

    fn destroy_pipeline(&self, pipeline: vk::Pipeline) {
        self.destroy("pipeline", pipeline);
    }

    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        self.create("semaphore")
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        self.destroy("semaphore", semaphore);
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let fence = self.create("fence")?;
        self.fences.borrow_mut().insert(fence, signaled);
        Ok(fence)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        self.fences.borrow_mut().remove(&fence);
        self.destroy("fence", fence);
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()> {
        self.call("wait_fence");
        match self.fences.borrow().get(&fence) {
            Some(true) => Ok(()),
            // A real device would block forever here.
            Some(false) => Err(anyhow!("waited on unsignaled fence {fence:?}")),
            None => Err(anyhow!("waited on unknown fence {fence:?}")),
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        self.call("reset_fence");
        match self.fences.borrow_mut().get_mut(&fence) {
            Some(signaled) => {
                *signaled = false;
                Ok(())
            }
            None => Err(anyhow!("reset unknown fence {fence:?}")),
        }
    }

    fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        (0..count).map(|_| self.create("command_buffer")).collect()
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        for &buffer in buffers {
            self.destroy("command_buffer", buffer);
        }
    }

    fn record_frame(&self, cmd: vk::CommandBuffer, frame: &FrameRecording) -> Result<()> {
        self.call("record");
        self.recordings.borrow_mut().push((cmd, *frame));
        Ok(())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _signal: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        self.call("acquire");

        if let Some(result) = self.acquire_results.borrow_mut().pop_front() {
            return result;
        }

        let count = self
            .swapchain_image_counts
            .borrow()
            .get(&swapchain)
            .copied()
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        let index = self.next_image.get() % count;
        self.next_image.set(index + 1);

        Ok((index, false))
    }

    fn submit(&self, info: &vk::SubmitInfo, fence: vk::Fence) -> VkResult<()> {
        self.call("submit");

        if let Some(Err(e)) = self.submit_results.borrow_mut().pop_front() {
            return Err(e);
        }

        let record = unsafe {
            SubmitRecord {
                wait_semaphores: slice(info.p_wait_semaphores, info.wait_semaphore_count).to_vec(),
                wait_stages: slice(info.p_wait_dst_stage_mask, info.wait_semaphore_count).to_vec(),
                command_buffers: slice(info.p_command_buffers, info.command_buffer_count).to_vec(),
                signal_semaphores: slice(info.p_signal_semaphores, info.signal_semaphore_count)
                    .to_vec(),
                fence,
            }
        };
        self.submits.borrow_mut().push(record);

        // The work completes instantly.
        if let Some(signaled) = self.fences.borrow_mut().get_mut(&fence) {
            *signaled = true;
        }

        Ok(())
    }

    fn present(&self, info: &vk::PresentInfoKHR) -> VkResult<bool> {
        self.call("present");

        let record = unsafe {
            PresentRecord {
                wait_semaphores: slice(info.p_wait_semaphores, info.wait_semaphore_count).to_vec(),
                swapchains: slice(info.p_swapchains, info.swapchain_count).to_vec(),
                image_indices: slice(info.p_image_indices, info.swapchain_count).to_vec(),
            }
        };
        self.presents.borrow_mut().push(record);

        self.present_results
            .borrow_mut()
            .pop_front()
            .unwrap_or(Ok(false))
    }
}
