// SPDX-License-Identifier: CEPL-1.0
//! Vulkan renderer core.
//!
//! [`GpuContext`] owns instance, device, queues and pools. [`Renderer`] drives
//! the swapchain frame by frame on top of it. [`RenderWidget`] draws into an
//! off-screen target that a UI panel shows as an image. The frame machinery
//! is generic over [`Device`] so it runs without a GPU in tests.
#![deny(unsafe_op_in_unsafe_fn)]

pub mod buffer;
pub mod commands;
pub mod context;
pub mod device;
pub mod error;
pub mod image;
pub mod pipeline;
pub mod render_target;
pub mod renderer;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod texture;
pub mod ui;

#[cfg(test)]
mod mock;

pub use ash::vk;
pub use buffer::{upload_device_local, Buffer};
pub use context::{ContextConfig, GpuContext};
pub use device::{Device, Owned};
pub use error::RenderError;
pub use pipeline::{ComputePipeline, GraphicsPipeline, GraphicsPipelineDesc};
pub use render_target::{RenderTarget, RenderWidget, WidgetConfig, WidgetContent};
pub use renderer::{Renderer, RendererConfig};
pub use shader::{compile_glsl, ShaderModule, ShaderStage};
pub use swapchain::{SwapchainBundle, SwapchainSettings};
pub use texture::{Texture, TextureOptions};
pub use ui::{NoUi, UiBackend, UiTextureId, UiTextures};

/// The renderer over a real device.
pub type VkRenderer = Renderer<GpuContext>;
