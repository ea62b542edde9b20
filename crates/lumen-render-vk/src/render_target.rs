// SPDX-License-Identifier: CEPL-1.0
//! Off-screen viewports drawn inside a UI panel.
//!
//! A [`RenderTarget`] owns a sampled color image, a depth image and a
//! framebuffer over both, renders into them with its own command buffer and
//! waits for the queue before returning, so the image is always complete
//! when the UI samples it. [`RenderWidget`] puts one in a panel and follows
//! the panel's size one frame late.
use anyhow::{Context, Result};
use ash::vk;
use lumen_render::{EmbeddedWidget, UiLayer};
use std::rc::Rc;

use crate::device::{Device, Owned, SubmitDesc};
use crate::error::VkResultExt;
use crate::image::AttachmentImage;
use crate::swapchain::{create_framebuffer, create_render_pass};
use crate::ui::{UiTextureId, UiTextures};

pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.1, 0.1, 0.15, 1.0];
/// Smallest edge a target is ever built with.
pub const MIN_TARGET_EXTENT: u32 = 32;
pub const TARGET_COLOR_FORMAT: vk::Format = vk::Format::R8G8B8A8_UNORM;
pub const TARGET_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

fn clamp_extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D {
        width: width.max(MIN_TARGET_EXTENT),
        height: height.max(MIN_TARGET_EXTENT),
    }
}

// Release order: framebuffer, depth, color.
struct SizedTargets<D: Device> {
    framebuffer: Owned<D, vk::Framebuffer>,
    depth: AttachmentImage<D>,
    color: AttachmentImage<D>,
}

impl<D: Device> SizedTargets<D> {
    fn new(device: &Rc<D>, render_pass: vk::RenderPass, extent: vk::Extent2D) -> Result<Self> {
        let color = AttachmentImage::new(
            device,
            extent,
            TARGET_COLOR_FORMAT,
            vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::SAMPLED,
            vk::ImageAspectFlags::COLOR,
        )?;
        let depth = AttachmentImage::depth(device, extent, TARGET_DEPTH_FORMAT)?;
        let framebuffer =
            create_framebuffer(device, render_pass, &[color.view(), depth.view()], extent)?;
        Ok(Self {
            framebuffer,
            depth,
            color,
        })
    }
}

pub struct RenderTarget<D: Device> {
    targets: Option<SizedTargets<D>>,
    command_buffer: vk::CommandBuffer,
    sampler: Owned<D, vk::Sampler>,
    render_pass: Owned<D, vk::RenderPass>,
    extent: vk::Extent2D,
    pending: Option<vk::Extent2D>,
    clear_color: [f32; 4],
    device: Rc<D>,
}

impl<D: Device> RenderTarget<D> {
    pub fn new(device: &Rc<D>, width: u32, height: u32, clear_color: [f32; 4]) -> Result<Self> {
        let extent = clamp_extent(width, height);
        let render_pass = create_render_pass(
            device,
            TARGET_COLOR_FORMAT,
            TARGET_DEPTH_FORMAT,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;

        let sampler_ci = vk::SamplerCreateInfo {
            s_type: vk::StructureType::SAMPLER_CREATE_INFO,
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            max_lod: 1.0,
            border_color: vk::BorderColor::FLOAT_OPAQUE_BLACK,
            ..Default::default()
        };
        let sampler = Owned::new(
            device,
            device.create_sampler(&sampler_ci).call("vkCreateSampler")?,
        );

        let targets = SizedTargets::new(device, render_pass.raw(), extent)?;
        let command_buffer = device
            .allocate_command_buffers(1)
            .call("vkAllocateCommandBuffers")?
            .into_iter()
            .next()
            .context("driver returned no command buffer")?;

        tracing::debug!(width = extent.width, height = extent.height, "render target created");
        Ok(Self {
            targets: Some(targets),
            command_buffer,
            sampler,
            render_pass,
            extent,
            pending: None,
            clear_color,
            device: Rc::clone(device),
        })
    }

    /// Record the size the target should have from the next frame on.
    /// Returns true when that differs from the current size.
    pub fn request_size(&mut self, width: u32, height: u32) -> bool {
        let wanted = clamp_extent(width, height);
        if wanted == self.extent {
            self.pending = None;
            return false;
        }
        self.pending = Some(wanted);
        true
    }

    pub fn has_pending_resize(&self) -> bool {
        self.pending.is_some()
    }

    /// Rebuild the size-dependent images if a resize was requested.
    /// Returns the new extent when something was rebuilt. On failure the old
    /// images and the pending request are both kept.
    pub fn apply_pending_resize(&mut self) -> Result<Option<vk::Extent2D>> {
        let Some(extent) = self.pending else {
            return Ok(None);
        };
        self.device.wait_idle().call("vkDeviceWaitIdle")?;
        let targets = SizedTargets::new(&self.device, self.render_pass.raw(), extent)
            .context("rebuild render target images")?;
        self.targets = Some(targets);
        self.pending = None;
        self.extent = extent;
        tracing::debug!(width = extent.width, height = extent.height, "render target resized");
        Ok(Some(extent))
    }

    /// Apply any pending resize, record one pass into the target with
    /// `record` and wait for it to finish on the GPU.
    pub fn render<F>(&mut self, record: F) -> Result<()>
    where
        F: FnOnce(vk::CommandBuffer, vk::Extent2D) -> Result<()>,
    {
        self.apply_pending_resize()?;
        let targets = self.targets.as_ref().context("render target has no images")?;
        let cmd = self.command_buffer;
        let device = &*self.device;

        device.reset_command_buffer(cmd).call("vkResetCommandBuffer")?;
        device
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)
            .call("vkBeginCommandBuffer")?;

        let clear_values = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: self.render_pass.raw(),
            framebuffer: targets.framebuffer.raw(),
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            },
            clear_value_count: clear_values.len() as u32,
            p_clear_values: clear_values.as_ptr(),
            ..Default::default()
        };
        device.cmd_begin_render_pass(cmd, &begin);
        device.cmd_set_viewport(
            cmd,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: self.extent.width as f32,
                height: self.extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        device.cmd_set_scissor(
            cmd,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: self.extent,
            },
        );

        let recorded = record(cmd, self.extent);
        device.cmd_end_render_pass(cmd);
        device.end_command_buffer(cmd).call("vkEndCommandBuffer")?;
        recorded?;

        let command_buffers = [cmd];
        device
            .queue_submit(&SubmitDesc {
                command_buffers: &command_buffers,
                ..Default::default()
            })
            .call("vkQueueSubmit")?;
        device.queue_wait_idle().call("vkQueueWaitIdle")?;
        Ok(())
    }

    pub fn device(&self) -> &Rc<D> {
        &self.device
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.raw()
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.raw()
    }

    pub fn color_view(&self) -> vk::ImageView {
        self.targets
            .as_ref()
            .map_or(vk::ImageView::null(), |t| t.color.view())
    }

    pub fn framebuffer(&self) -> vk::Framebuffer {
        self.targets
            .as_ref()
            .map_or(vk::Framebuffer::null(), |t| t.framebuffer.raw())
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }
}

impl<D: Device> Drop for RenderTarget<D> {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            tracing::warn!("wait_idle before render target teardown failed: {e}");
        }
        self.device.free_command_buffers(&[self.command_buffer]);
    }
}

/// What a [`RenderWidget`] draws. Everything but `on_render` is optional.
pub trait WidgetContent<D: Device> {
    /// Called once, with the target already built, e.g. to create pipelines
    /// against its render pass.
    fn on_init(&mut self, _target: &RenderTarget<D>) -> Result<()> {
        Ok(())
    }
    fn on_update(&mut self, _dt: f32) {}
    /// Record draws. The pass is begun with viewport and scissor covering
    /// `extent`.
    fn on_render(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D) -> Result<()>;
    fn on_resize(&mut self, _width: u32, _height: u32) {}
    /// Extra UI drawn in the widget's panel after the image.
    fn on_ui_overlay(&mut self, _ui: &mut dyn UiTextures) {}
    fn on_cleanup(&mut self) {}
}

#[derive(Clone, Copy, Debug)]
pub struct WidgetConfig {
    pub width: u32,
    pub height: u32,
    pub clear_color: [f32; 4],
}

impl Default for WidgetConfig {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            clear_color: DEFAULT_CLEAR_COLOR,
        }
    }
}

pub struct RenderWidget<D: Device, C: WidgetContent<D>> {
    title: String,
    enabled: bool,
    initialized: bool,
    hovered: bool,
    focused: bool,
    texture: Option<UiTextureId>,
    content: C,
    target: RenderTarget<D>,
}

impl<D: Device, C: WidgetContent<D>> RenderWidget<D, C> {
    pub fn new(device: &Rc<D>, title: impl Into<String>, content: C, config: WidgetConfig) -> Result<Self> {
        let target = RenderTarget::new(device, config.width, config.height, config.clear_color)?;
        Ok(Self {
            title: title.into(),
            enabled: true,
            initialized: false,
            hovered: false,
            focused: false,
            texture: None,
            content,
            target,
        })
    }

    pub fn content(&self) -> &C {
        &self.content
    }

    pub fn content_mut(&mut self) -> &mut C {
        &mut self.content
    }

    pub fn target(&self) -> &RenderTarget<D> {
        &self.target
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.target.set_clear_color(rgba);
    }

    /// Whether the image was hovered last frame.
    pub fn is_hovered(&self) -> bool {
        self.hovered
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    fn register<U: UiTextures>(&mut self, ui: &mut U) -> Result<()> {
        let id = ui.register_texture(
            self.target.sampler(),
            self.target.color_view(),
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        self.texture = Some(id);
        Ok(())
    }

    fn unregister<U: UiTextures>(&mut self, ui: &mut U) {
        if let Some(id) = self.texture.take() {
            ui.remove_texture(id);
        }
    }

    fn apply_resize<U: UiTextures>(&mut self, ui: &mut U) -> Result<()> {
        if !self.target.has_pending_resize() {
            return Ok(());
        }
        self.target.device().wait_idle().call("vkDeviceWaitIdle")?;
        self.unregister(ui);
        match self.target.apply_pending_resize() {
            Ok(Some(extent)) => self.content.on_resize(extent.width, extent.height),
            Ok(None) => {}
            Err(e) => {
                // The old image is still alive; keep showing it.
                self.register(ui)?;
                return Err(e);
            }
        }
        self.register(ui)
    }
}

impl<D, C, U> EmbeddedWidget<U> for RenderWidget<D, C>
where
    D: Device,
    C: WidgetContent<D>,
    U: UiLayer + UiTextures,
{
    fn title(&self) -> &str {
        &self.title
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn initialize(&mut self, ui: &mut U) -> Result<()> {
        if self.initialized {
            return Ok(());
        }
        self.content.on_init(&self.target)?;
        self.register(ui)?;
        self.initialized = true;
        tracing::info!(title = %self.title, "render widget initialized");
        Ok(())
    }

    fn render(&mut self, ui: &mut U, dt: f32) -> Result<()> {
        if !self.initialized {
            return Ok(());
        }
        self.apply_resize(ui)?;

        self.content.on_update(dt);
        let content = &mut self.content;
        self.target.render(|cmd, extent| content.on_render(cmd, extent))?;

        if ui.begin_panel(&self.title) {
            let [w, h] = ui.content_region_avail();
            let resizing = self.target.request_size(w.max(0.0) as u32, h.max(0.0) as u32);
            // The image is stale-sized until next frame's rebuild.
            if !resizing {
                if let Some(id) = self.texture {
                    let extent = self.target.extent();
                    ui.image(id, [extent.width as f32, extent.height as f32]);
                }
            }
            self.hovered = ui.is_item_hovered();
            self.focused = ui.is_panel_focused();
            self.content.on_ui_overlay(ui);
        }
        ui.end_panel();
        Ok(())
    }

    fn release(&mut self, ui: &mut U) {
        if !self.initialized {
            return;
        }
        if let Err(e) = self.target.device().wait_idle() {
            tracing::warn!("wait_idle before widget release failed: {e}");
        }
        self.unregister(ui);
        self.content.on_cleanup();
        self.initialized = false;
        tracing::info!(title = %self.title, "render widget released");
    }
}
