// Graphics pipeline creation and management
//
// One fixed-function pipeline: two shader stages, no vertex buffers,
// dynamic viewport/scissor so it survives swapchain resizes, and no
// descriptor sets or push constants. Depends on the render pass, so it is
// rebuilt whenever the render pass is.

use anyhow::Result;
use ash::vk;
use std::ffi::CStr;

use super::gpu::GpuDevice;
use super::shader::create_shader_module;

pub const SHADER_ENTRY_POINT: &CStr = c"main";

/// Viewport and scissor are set while recording, every frame.
pub const DYNAMIC_STATES: [vk::DynamicState; 2] =
    [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];

/// Viewport covering the whole extent with the full depth range.
pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Pipeline and its (empty) layout.
#[derive(Debug, Default)]
pub struct GraphicsPipeline {
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl GraphicsPipeline {
    /// Build the pipeline against `render_pass`.
    ///
    /// The shader modules only live for the duration of this call, on
    /// success and on every failure path.
    pub fn new<D: GpuDevice>(
        device: &D,
        render_pass: vk::RenderPass,
        vert_code: &[u8],
        frag_code: &[u8],
    ) -> Result<Self> {
        let vert_module = create_shader_module(device, vert_code)?;
        let frag_module = match create_shader_module(device, frag_code) {
            Ok(module) => module,
            Err(e) => {
                device.destroy_shader_module(vert_module);
                return Err(e);
            }
        };

        let result = Self::build(device, render_pass, vert_module, frag_module);

        device.destroy_shader_module(frag_module);
        device.destroy_shader_module(vert_module);

        let pipeline = result?;
        log::info!("Created graphics pipeline");
        Ok(pipeline)
    }

    fn build<D: GpuDevice>(
        device: &D,
        render_pass: vk::RenderPass,
        vert_module: vk::ShaderModule,
        frag_module: vk::ShaderModule,
    ) -> Result<Self> {
        let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(vert_module)
            .name(SHADER_ENTRY_POINT)
            .build();

        let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(frag_module)
            .name(SHADER_ENTRY_POINT)
            .build();

        let shader_stages = &[vert_stage, frag_stage];

        // Vertices are generated in the vertex shader
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST)
            .primitive_restart_enable(false);

        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&DYNAMIC_STATES);

        // Counts only; the actual rectangles are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(vk::PolygonMode::FILL)
            .line_width(1.0)
            .cull_mode(vk::CullModeFlags::BACK)
            .front_face(vk::FrontFace::CLOCKWISE)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);

        // Opaque, no blending
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .build();

        let color_blend_attachments = &[color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(color_blend_attachments)
            .blend_constants([0.0, 0.0, 0.0, 0.0]);

        // No descriptor sets, no push constants
        let layout_info = vk::PipelineLayoutCreateInfo::builder();
        let layout = device.create_pipeline_layout(&layout_info)?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .base_pipeline_handle(vk::Pipeline::null())
            .base_pipeline_index(-1);

        match device.create_graphics_pipeline(&pipeline_info) {
            Ok(pipeline) => Ok(Self { layout, pipeline }),
            Err(e) => {
                device.destroy_pipeline_layout(layout);
                Err(e)
            }
        }
    }

    pub fn handle(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.layout
    }

    /// Safe to call twice, or on a default value.
    pub fn destroy<D: GpuDevice>(&mut self, device: &D) {
        if self.pipeline != vk::Pipeline::null() {
            device.destroy_pipeline(self.pipeline);
            self.pipeline = vk::Pipeline::null();
        }

        if self.layout != vk::PipelineLayout::null() {
            device.destroy_pipeline_layout(self.layout);
            self.layout = vk::PipelineLayout::null();
        }
    }
}
