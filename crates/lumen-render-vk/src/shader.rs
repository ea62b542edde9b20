// SPDX-License-Identifier: CEPL-1.0
//! GLSL to SPIR-V at runtime through shaderc.
use anyhow::{Context, Result};
use ash::vk;
use std::rc::Rc;

use crate::context::GpuContext;
use crate::error::RenderError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
    Geometry,
    TessControl,
    TessEvaluation,
}

impl ShaderStage {
    fn kind(self) -> shaderc::ShaderKind {
        match self {
            ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
            ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
            ShaderStage::Compute => shaderc::ShaderKind::Compute,
            ShaderStage::Geometry => shaderc::ShaderKind::Geometry,
            ShaderStage::TessControl => shaderc::ShaderKind::TessControl,
            ShaderStage::TessEvaluation => shaderc::ShaderKind::TessEvaluation,
        }
    }

    pub fn flags(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
            ShaderStage::Geometry => vk::ShaderStageFlags::GEOMETRY,
            ShaderStage::TessControl => vk::ShaderStageFlags::TESSELLATION_CONTROL,
            ShaderStage::TessEvaluation => vk::ShaderStageFlags::TESSELLATION_EVALUATION,
        }
    }
}

pub fn try_compile_glsl(source: &str, stage: ShaderStage, name: &str) -> Result<Vec<u32>, RenderError> {
    let fail = |message: String| RenderError::ShaderCompilation {
        name: name.to_owned(),
        message,
    };
    let compiler = shaderc::Compiler::new().map_err(|e| fail(e.to_string()))?;
    let mut options = shaderc::CompileOptions::new().map_err(|e| fail(e.to_string()))?;
    options.set_target_env(shaderc::TargetEnv::Vulkan, shaderc::EnvVersion::Vulkan1_2 as u32);
    options.set_optimization_level(shaderc::OptimizationLevel::Performance);
    if cfg!(debug_assertions) {
        options.set_generate_debug_info();
    }

    let artifact = compiler
        .compile_into_spirv(source, stage.kind(), name, "main", Some(&options))
        .map_err(|e| fail(e.to_string()))?;
    if artifact.get_num_warnings() > 0 {
        tracing::warn!(shader = name, "{}", artifact.get_warning_messages());
    }
    Ok(artifact.as_binary().to_vec())
}

/// Empty on failure; the compiler output is logged.
pub fn compile_glsl(source: &str, stage: ShaderStage, name: &str) -> Vec<u32> {
    match try_compile_glsl(source, stage, name) {
        Ok(words) => words,
        Err(e) => {
            tracing::error!("{e}");
            Vec::new()
        }
    }
}

pub struct ShaderModule {
    ctx: Rc<GpuContext>,
    raw: vk::ShaderModule,
    stage: ShaderStage,
}

impl ShaderModule {
    pub fn new(ctx: &Rc<GpuContext>, spirv: &[u32], stage: ShaderStage) -> Result<Self> {
        if spirv.is_empty() {
            return Err(RenderError::EmptySpirv.into());
        }
        let ci = vk::ShaderModuleCreateInfo {
            s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
            code_size: std::mem::size_of_val(spirv),
            p_code: spirv.as_ptr(),
            ..Default::default()
        };
        let raw = unsafe { ctx.raw().create_shader_module(&ci, None) }
            .context("create_shader_module")?;
        Ok(Self {
            ctx: Rc::clone(ctx),
            raw,
            stage,
        })
    }

    pub fn from_glsl(ctx: &Rc<GpuContext>, source: &str, stage: ShaderStage, name: &str) -> Result<Self> {
        let spirv = try_compile_glsl(source, stage, name)?;
        Self::new(ctx, &spirv, stage)
    }

    pub fn raw(&self) -> vk::ShaderModule {
        self.raw
    }

    pub fn stage(&self) -> ShaderStage {
        self.stage
    }
}

impl Drop for ShaderModule {
    fn drop(&mut self) {
        unsafe { self.ctx.raw().destroy_shader_module(self.raw, None) };
    }
}
