//! Graphics pipeline creation for cache misses

use ash::vk;

use super::resources::GpuResources;
use super::{GpuError, VkResultExt};
use crate::cache::PipelineFactory;
use crate::pipeline::PipelineKey;
use crate::vertex::GpuVertex;

/// Builds pipelines against one device, layout and render pass
pub(super) struct VkPipelineFactory<'a> {
    device: &'a ash::Device,
    layout: vk::PipelineLayout,
    render_pass: vk::RenderPass,
    vertex_shader: vk::ShaderModule,
    fragment_shader: vk::ShaderModule,
    extent: vk::Extent2D,
    dual_source: bool,
}

impl<'a> VkPipelineFactory<'a> {
    pub fn new(device: &'a ash::Device, resources: &GpuResources) -> Self {
        Self {
            device,
            layout: resources.pipeline_layout,
            // The load pass is compatible with the clear pass
            render_pass: resources.clear_pass,
            vertex_shader: resources.vertex_shader,
            fragment_shader: resources.fragment_shader,
            extent: vk::Extent2D {
                width: resources.width,
                height: resources.height,
            },
            dual_source: resources.dual_source,
        }
    }
}

/// Color blend attachment state for a key.
///
/// Alpha shares the color factors: SRC_ALPHA_SATURATE is one on alpha and
/// SRC1_COLOR reads the second source's alpha, which carries the same weight.
pub(super) fn blend_attachment(key: &PipelineKey, dual_source: bool) -> vk::PipelineColorBlendAttachmentState {
    let write_mask = if key.color_write {
        vk::ColorComponentFlags::RGBA
    } else {
        vk::ColorComponentFlags::empty()
    };
    let (src, dst) = key.vk_blend_factors(dual_source);
    vk::PipelineColorBlendAttachmentState::default()
        .blend_enable(key.blend_enable)
        .src_color_blend_factor(src)
        .dst_color_blend_factor(dst)
        .color_blend_op(vk::BlendOp::ADD)
        .src_alpha_blend_factor(src)
        .dst_alpha_blend_factor(dst)
        .alpha_blend_op(vk::BlendOp::ADD)
        .color_write_mask(write_mask)
}

/// Depth state for a key; writes only happen while the test is enabled
pub(super) fn depth_state(key: &PipelineKey) -> vk::PipelineDepthStencilStateCreateInfo<'static> {
    vk::PipelineDepthStencilStateCreateInfo::default()
        .depth_test_enable(key.depth_test)
        .depth_write_enable(key.depth_test && key.depth_write)
        .depth_compare_op(key.vk_depth_compare())
        .depth_bounds_test_enable(false)
        .stencil_test_enable(false)
}

impl PipelineFactory for VkPipelineFactory<'_> {
    type Handle = vk::Pipeline;
    type Error = GpuError;

    fn create_pipeline(&mut self, key: &PipelineKey) -> Result<vk::Pipeline, GpuError> {
        let stages = [
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(self.vertex_shader)
                .name(c"main"),
            vk::PipelineShaderStageCreateInfo::default()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(self.fragment_shader)
                .name(c"main"),
        ];

        let bindings = [vk::VertexInputBindingDescription {
            binding: 0,
            stride: GpuVertex::STRIDE,
            input_rate: vk::VertexInputRate::VERTEX,
        }];
        let attributes = [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: GpuVertex::POSITION_OFFSET,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32A32_SFLOAT,
                offset: GpuVertex::COLOR_OFFSET,
            },
            vk::VertexInputAttributeDescription {
                location: 2,
                binding: 0,
                format: vk::Format::R32G32_SFLOAT,
                offset: GpuVertex::TEX_COORD_OFFSET,
            },
        ];
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes);
        let input_assembly =
            vk::PipelineInputAssemblyStateCreateInfo::default().topology(vk::PrimitiveTopology::TRIANGLE_LIST);

        let viewports = [vk::Viewport {
            x: 0.0,
            y: 0.0,
            width: self.extent.width as f32,
            height: self.extent.height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }];
        let scissors = [vk::Rect2D {
            offset: vk::Offset2D::default(),
            extent: self.extent,
        }];
        let viewport_state = vk::PipelineViewportStateCreateInfo::default()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample =
            vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let depth_stencil = depth_state(key);

        if key.uses_source_color() && !self.dual_source {
            tracing::warn!(
                "No dual-source blending; source-color factors read zero blend constants ({:?}/{:?})",
                key.src_factor,
                key.dst_factor
            );
        }
        let attachments = [blend_attachment(key, self.dual_source)];
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&attachments);

        let dynamic_states = [vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);

        let info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(self.layout)
            .render_pass(self.render_pass)
            .subpass(0);

        // SAFETY: every handle referenced by `info` belongs to `self.device`
        let pipelines = unsafe {
            self.device
                .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&info), None)
        }
        .map_err(|(_, e)| e)
        .step("vkCreateGraphicsPipelines")?;
        pipelines
            .into_iter()
            .next()
            .ok_or(GpuError::Vulkan {
                step: "vkCreateGraphicsPipelines",
                result: vk::Result::ERROR_UNKNOWN,
            })
    }

    fn destroy_pipeline(&mut self, handle: vk::Pipeline) {
        // SAFETY: the cache only destroys pipelines once the device is idle
        unsafe { self.device.destroy_pipeline(handle, None) };
    }
}
