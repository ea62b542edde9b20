// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use ash::vk;
use lumen_render::UiLayer;

/// Handle a UI backend hands out for a registered image.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UiTextureId(pub u64);

/// What an embedded widget needs from the UI library on top of [`UiLayer`]:
/// a panel to live in, its free content area, and a way to show a sampled
/// image inside it.
pub trait UiTextures {
    fn register_texture(
        &mut self,
        sampler: vk::Sampler,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> Result<UiTextureId>;
    fn remove_texture(&mut self, id: UiTextureId);

    /// Returns false when the panel is collapsed; `end_panel` is still required.
    fn begin_panel(&mut self, _title: &str) -> bool {
        true
    }
    fn end_panel(&mut self) {}

    /// Free space in the current panel, in pixels.
    fn content_region_avail(&self) -> [f32; 2];
    fn image(&mut self, id: UiTextureId, size: [f32; 2]);

    fn is_item_hovered(&self) -> bool {
        false
    }
    fn is_panel_focused(&self) -> bool {
        false
    }
}

/// A UI layer that records into the main render pass of the swapchain
/// renderer and can show registered images.
pub trait UiBackend: UiLayer<CommandBuffer = vk::CommandBuffer> + UiTextures {
    /// The swapchain was rebuilt. Pipelines and the draw extent follow the
    /// new main render pass.
    fn on_swapchain_rebuilt(
        &mut self,
        _render_pass: vk::RenderPass,
        _extent: vk::Extent2D,
    ) -> Result<()> {
        Ok(())
    }
}

/// UI layer that draws nothing. Used for Game mode and headless runs.
#[derive(Debug)]
pub struct NoUi {
    region: [f32; 2],
    next_texture: u64,
    live_textures: usize,
}

impl NoUi {
    pub fn new() -> Self {
        Self::with_region(800.0, 600.0)
    }

    /// Fixed content region reported to widgets.
    pub fn with_region(width: f32, height: f32) -> Self {
        Self {
            region: [width, height],
            next_texture: 1,
            live_textures: 0,
        }
    }

    pub fn live_textures(&self) -> usize {
        self.live_textures
    }
}

impl Default for NoUi {
    fn default() -> Self {
        Self::new()
    }
}

impl UiLayer for NoUi {
    type CommandBuffer = vk::CommandBuffer;

    fn begin_frame(&mut self) {}

    fn end_frame(&mut self, _cmd: vk::CommandBuffer) -> Result<()> {
        Ok(())
    }

    fn wants_capture_keyboard(&self) -> bool {
        false
    }

    fn wants_capture_mouse(&self) -> bool {
        false
    }
}

impl UiBackend for NoUi {}

impl UiTextures for NoUi {
    fn register_texture(
        &mut self,
        _sampler: vk::Sampler,
        _view: vk::ImageView,
        _layout: vk::ImageLayout,
    ) -> Result<UiTextureId> {
        let id = UiTextureId(self.next_texture);
        self.next_texture += 1;
        self.live_textures += 1;
        Ok(id)
    }

    fn remove_texture(&mut self, _id: UiTextureId) {
        self.live_textures = self.live_textures.saturating_sub(1);
    }

    fn content_region_avail(&self) -> [f32; 2] {
        self.region
    }

    fn image(&mut self, _id: UiTextureId, _size: [f32; 2]) {}
}
