// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context, Result};
use ash::vk;
use std::rc::Rc;

use crate::context::GpuContext;
use crate::shader::{ShaderModule, ShaderStage};

const ENTRY: &std::ffi::CStr = c"main";

/// Fixed-function state plus sources for one graphics pipeline. Viewport
/// and scissor are always dynamic.
#[derive(Clone, Debug)]
pub struct GraphicsPipelineDesc<'a> {
    pub name: &'a str,
    pub vertex_source: &'a str,
    pub fragment_source: &'a str,
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub polygon_mode: vk::PolygonMode,
    pub depth_test: bool,
    pub depth_write: bool,
    pub alpha_blend: bool,
    pub push_constants: Vec<vk::PushConstantRange>,
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
}

impl<'a> GraphicsPipelineDesc<'a> {
    pub fn new(name: &'a str, vertex_source: &'a str, fragment_source: &'a str) -> Self {
        Self {
            name,
            vertex_source,
            fragment_source,
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            polygon_mode: vk::PolygonMode::FILL,
            depth_test: true,
            depth_write: true,
            alpha_blend: false,
            push_constants: Vec::new(),
            set_layouts: Vec::new(),
        }
    }

    pub fn push_constant<T>(mut self, stages: vk::ShaderStageFlags) -> Self {
        let offset = self.push_constants.iter().map(|r| r.offset + r.size).max().unwrap_or(0);
        self.push_constants.push(vk::PushConstantRange {
            stage_flags: stages,
            offset,
            size: std::mem::size_of::<T>() as u32,
        });
        self
    }
}

fn color_blend_attachment(alpha_blend: bool) -> vk::PipelineColorBlendAttachmentState {
    let color_write_mask = vk::ColorComponentFlags::R
        | vk::ColorComponentFlags::G
        | vk::ColorComponentFlags::B
        | vk::ColorComponentFlags::A;
    if !alpha_blend {
        return vk::PipelineColorBlendAttachmentState {
            color_write_mask,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
    }
    vk::PipelineColorBlendAttachmentState {
        blend_enable: vk::TRUE,
        src_color_blend_factor: vk::BlendFactor::SRC_ALPHA,
        dst_color_blend_factor: vk::BlendFactor::ONE_MINUS_SRC_ALPHA,
        color_blend_op: vk::BlendOp::ADD,
        src_alpha_blend_factor: vk::BlendFactor::ONE,
        dst_alpha_blend_factor: vk::BlendFactor::ZERO,
        alpha_blend_op: vk::BlendOp::ADD,
        color_write_mask,
    }
}

fn create_layout(
    ctx: &GpuContext,
    set_layouts: &[vk::DescriptorSetLayout],
    push_constants: &[vk::PushConstantRange],
) -> Result<vk::PipelineLayout> {
    let info = vk::PipelineLayoutCreateInfo {
        s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
        set_layout_count: set_layouts.len() as u32,
        p_set_layouts: set_layouts.as_ptr(),
        push_constant_range_count: push_constants.len() as u32,
        p_push_constant_ranges: push_constants.as_ptr(),
        ..Default::default()
    };
    unsafe { ctx.raw().create_pipeline_layout(&info, None) }.context("create_pipeline_layout")
}

fn stage_info(module: &ShaderModule) -> vk::PipelineShaderStageCreateInfo<'static> {
    vk::PipelineShaderStageCreateInfo {
        s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
        stage: module.stage().flags(),
        module: module.raw(),
        p_name: ENTRY.as_ptr(),
        ..Default::default()
    }
}

/// Pipeline + layout. Both are destroyed on drop.
struct PipelineHandles {
    ctx: Rc<GpuContext>,
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
}

impl Drop for PipelineHandles {
    fn drop(&mut self) {
        let device = self.ctx.raw();
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.layout, None);
        }
    }
}

impl PipelineHandles {
    fn push_constants(&self, cmd: vk::CommandBuffer, stages: vk::ShaderStageFlags, offset: u32, bytes: &[u8]) {
        unsafe {
            self.ctx
                .raw()
                .cmd_push_constants(cmd, self.layout, stages, offset, bytes)
        };
    }
}

pub struct GraphicsPipeline {
    handles: PipelineHandles,
}

impl GraphicsPipeline {
    pub fn new(ctx: &Rc<GpuContext>, render_pass: vk::RenderPass, desc: &GraphicsPipelineDesc<'_>) -> Result<Self> {
        // Modules only live until the pipeline exists.
        let vs = ShaderModule::from_glsl(ctx, desc.vertex_source, ShaderStage::Vertex, &format!("{}.vert", desc.name))?;
        let fs = ShaderModule::from_glsl(ctx, desc.fragment_source, ShaderStage::Fragment, &format!("{}.frag", desc.name))?;
        let stages = [stage_info(&vs), stage_info(&fs)];

        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: desc.vertex_bindings.len() as u32,
            p_vertex_binding_descriptions: desc.vertex_bindings.as_ptr(),
            vertex_attribute_description_count: desc.vertex_attributes.len() as u32,
            p_vertex_attribute_descriptions: desc.vertex_attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: desc.topology,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: desc.polygon_mode,
            cull_mode: desc.cull_mode,
            front_face: desc.front_face,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DEPTH_STENCIL_STATE_CREATE_INFO,
            depth_test_enable: desc.depth_test.into(),
            depth_write_enable: desc.depth_write.into(),
            depth_compare_op: vk::CompareOp::LESS,
            ..Default::default()
        };
        let blend_attachment = color_blend_attachment(desc.alpha_blend);
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &blend_attachment,
            ..Default::default()
        };

        let layout = create_layout(ctx, &desc.set_layouts, &desc.push_constants)?;
        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_depth_stencil_state: &depth_stencil,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout,
            render_pass,
            subpass: 0,
            ..Default::default()
        };
        let created = unsafe {
            ctx.raw().create_graphics_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&pipeline_info),
                None,
            )
        };
        let pipeline = match created {
            Ok(p) => p[0],
            Err((_, err)) => {
                unsafe { ctx.raw().destroy_pipeline_layout(layout, None) };
                return Err(anyhow!("create_graphics_pipelines failed for `{}`: {err:?}", desc.name));
            }
        };
        tracing::debug!(name = desc.name, "graphics pipeline created");

        Ok(Self {
            handles: PipelineHandles {
                ctx: Rc::clone(ctx),
                pipeline,
                layout,
            },
        })
    }

    pub fn bind(&self, cmd: vk::CommandBuffer) {
        unsafe {
            self.handles
                .ctx
                .raw()
                .cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, self.handles.pipeline)
        };
    }

    pub fn push_constants<T: bytemuck::Pod>(&self, cmd: vk::CommandBuffer, stages: vk::ShaderStageFlags, value: &T) {
        self.handles.push_constants(cmd, stages, 0, bytemuck::bytes_of(value));
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.handles.layout
    }

    pub fn raw(&self) -> vk::Pipeline {
        self.handles.pipeline
    }
}

pub struct ComputePipeline {
    handles: PipelineHandles,
}

impl ComputePipeline {
    pub fn new(
        ctx: &Rc<GpuContext>,
        name: &str,
        source: &str,
        set_layouts: &[vk::DescriptorSetLayout],
        push_size: u32,
    ) -> Result<Self> {
        let module = ShaderModule::from_glsl(ctx, source, ShaderStage::Compute, name)?;
        let ranges: Vec<vk::PushConstantRange> = (push_size > 0)
            .then(|| vk::PushConstantRange {
                stage_flags: vk::ShaderStageFlags::COMPUTE,
                offset: 0,
                size: push_size,
            })
            .into_iter()
            .collect();
        let layout = create_layout(ctx, set_layouts, &ranges)?;

        let info = vk::ComputePipelineCreateInfo {
            s_type: vk::StructureType::COMPUTE_PIPELINE_CREATE_INFO,
            stage: stage_info(&module),
            layout,
            ..Default::default()
        };
        let created = unsafe {
            ctx.raw().create_compute_pipelines(
                vk::PipelineCache::null(),
                std::slice::from_ref(&info),
                None,
            )
        };
        let pipeline = match created {
            Ok(p) => p[0],
            Err((_, err)) => {
                unsafe { ctx.raw().destroy_pipeline_layout(layout, None) };
                return Err(anyhow!("create_compute_pipelines failed for `{name}`: {err:?}"));
            }
        };

        Ok(Self {
            handles: PipelineHandles {
                ctx: Rc::clone(ctx),
                pipeline,
                layout,
            },
        })
    }

    /// Bind, push `push` (may be empty) and dispatch.
    pub fn dispatch(&self, cmd: vk::CommandBuffer, groups: [u32; 3], push: &[u8]) {
        let device = self.handles.ctx.raw();
        unsafe { device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.handles.pipeline) };
        if !push.is_empty() {
            self.handles.push_constants(cmd, vk::ShaderStageFlags::COMPUTE, 0, push);
        }
        unsafe { device.cmd_dispatch(cmd, groups[0], groups[1], groups[2]) };
    }

    pub fn layout(&self) -> vk::PipelineLayout {
        self.handles.layout
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_constant_ranges_are_packed() {
        let desc = GraphicsPipelineDesc::new("t", "", "")
            .push_constant::<[f32; 16]>(vk::ShaderStageFlags::VERTEX)
            .push_constant::<[f32; 4]>(vk::ShaderStageFlags::FRAGMENT);
        assert_eq!(desc.push_constants[0].offset, 0);
        assert_eq!(desc.push_constants[0].size, 64);
        assert_eq!(desc.push_constants[1].offset, 64);
        assert_eq!(desc.push_constants[1].size, 16);
    }

    #[test]
    fn blending_only_when_asked() {
        assert_eq!(color_blend_attachment(false).blend_enable, vk::FALSE);
        let blended = color_blend_attachment(true);
        assert_eq!(blended.blend_enable, vk::TRUE);
        assert_eq!(blended.dst_color_blend_factor, vk::BlendFactor::ONE_MINUS_SRC_ALPHA);
    }

    #[test]
    fn defaults_match_opaque_geometry() {
        let desc = GraphicsPipelineDesc::new("t", "", "");
        assert_eq!(desc.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(desc.cull_mode, vk::CullModeFlags::BACK);
        assert!(desc.depth_test && desc.depth_write && !desc.alpha_blend);
    }
}
