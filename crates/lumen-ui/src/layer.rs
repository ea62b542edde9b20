// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, Context as _, Result};
use egui_ash_renderer::{Options, Renderer as EguiRenderer};
use lumen_platform::{winit, RawEventTap, Window};
use lumen_render::UiLayer;
use lumen_render_vk::{vk, GpuContext, UiBackend, UiTextureId, UiTextures, VkRenderer};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use tracing::{debug, warn};

use crate::panels::PanelBook;

const DEFAULT_PANEL_SIZE: [f32; 2] = [640.0, 480.0];

fn is_srgb(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::B8G8R8A8_SRGB | vk::Format::R8G8B8A8_SRGB | vk::Format::A8B8G8R8_SRGB_PACK32
    )
}

/// Items released by frame `n` that may only go once that frame's GPU work
/// has retired, i.e. `depth` frames later.
#[derive(Debug)]
struct RetireQueue<T> {
    depth: u64,
    queue: VecDeque<(u64, Vec<T>)>,
}

impl<T> RetireQueue<T> {
    fn new(depth: usize) -> Self {
        Self {
            depth: depth.max(1) as u64,
            queue: VecDeque::new(),
        }
    }

    fn push(&mut self, frame: u64, items: Vec<T>) {
        if !items.is_empty() {
            self.queue.push_back((frame, items));
        }
    }

    fn due(&mut self, frame: u64) -> Vec<T> {
        let mut out = Vec::new();
        while let Some((released, _)) = self.queue.front() {
            if released + self.depth > frame {
                break;
            }
            if let Some((_, items)) = self.queue.pop_front() {
                out.extend(items);
            }
        }
        out
    }
}

struct UserTexture {
    egui: egui::TextureId,
    set: vk::DescriptorSet,
}

/// egui over the main render pass: input from the window's raw events,
/// draws recorded with `egui-ash-renderer`, widget images shown through
/// user textures.
///
/// Drop with the device idle.
pub struct EguiLayer {
    panels: PanelBook,
    user_textures: HashMap<UiTextureId, UserTexture>,
    next_texture: u64,
    retired: RetireQueue<egui::TextureId>,
    frame: u64,
    in_pass: bool,
    extent: vk::Extent2D,
    state: egui_winit::State,
    events: RawEventTap,
    window: Rc<winit::window::Window>,
    renderer: EguiRenderer,
    texture_layout: vk::DescriptorSetLayout,
    gpu: Rc<GpuContext>,
}

impl EguiLayer {
    pub fn new(
        renderer: &VkRenderer,
        window: &mut Window,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let gpu = Rc::clone(renderer.device());
        let native = window
            .winit_window()
            .context("window has no native handle yet")?;

        let options = Options {
            in_flight_frames: frames_in_flight.max(1),
            srgb_framebuffer: is_srgb(renderer.color_format()),
            ..Default::default()
        };
        let egui_renderer = EguiRenderer::with_default_allocator(
            gpu.instance(),
            gpu.physical_device(),
            gpu.raw().clone(),
            renderer.render_pass(),
            options,
        )
        .map_err(|e| anyhow!("create egui renderer: {e}"))?;

        // Matches the renderer's own texture set: one combined image sampler
        // at binding 0, read by the fragment stage.
        let binding = vk::DescriptorSetLayoutBinding {
            binding: 0,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            descriptor_count: 1,
            stage_flags: vk::ShaderStageFlags::FRAGMENT,
            ..Default::default()
        };
        let layout_info = vk::DescriptorSetLayoutCreateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_LAYOUT_CREATE_INFO,
            binding_count: 1,
            p_bindings: &binding,
            ..Default::default()
        };
        let texture_layout = unsafe { gpu.raw().create_descriptor_set_layout(&layout_info, None) }
            .context("vkCreateDescriptorSetLayout")?;

        let ctx = egui::Context::default();
        let max_texture_side = gpu.properties().limits.max_image_dimension2_d as usize;
        let state = egui_winit::State::new(
            ctx,
            egui::ViewportId::ROOT,
            &*native,
            Some(native.scale_factor() as f32),
            native.theme(),
            Some(max_texture_side),
        );
        debug!(frames_in_flight, "egui layer created");

        Ok(Self {
            panels: PanelBook::new(DEFAULT_PANEL_SIZE),
            user_textures: HashMap::new(),
            next_texture: 1,
            retired: RetireQueue::new(frames_in_flight),
            frame: 0,
            in_pass: false,
            extent: renderer.extent(),
            state,
            events: window.tap_raw_events(),
            window: native,
            renderer: egui_renderer,
            texture_layout,
            gpu,
        })
    }

    /// The egui context, for building UI in `on_ui`.
    pub fn ctx(&self) -> &egui::Context {
        self.state.egui_ctx()
    }

    fn free_retired(&mut self) {
        let due = self.retired.due(self.frame);
        if due.is_empty() {
            return;
        }
        if let Err(e) = self.renderer.free_textures(&due) {
            warn!("free egui textures: {e}");
        }
    }
}

impl UiLayer for EguiLayer {
    type CommandBuffer = vk::CommandBuffer;

    fn begin_frame(&mut self) {
        self.free_retired();
        for event in self.events.drain() {
            let _ = self.state.on_window_event(&self.window, &event);
        }
        let input = self.state.take_egui_input(&self.window);
        self.state.egui_ctx().begin_pass(input);
        self.in_pass = true;
    }

    fn end_frame(&mut self, cmd: vk::CommandBuffer) -> Result<()> {
        if !std::mem::take(&mut self.in_pass) {
            return Ok(());
        }
        self.panels.discard();
        let output = self.state.egui_ctx().end_pass();
        self.state
            .handle_platform_output(&self.window, output.platform_output);
        let primitives = self
            .state
            .egui_ctx()
            .tessellate(output.shapes, output.pixels_per_point);

        self.renderer
            .set_textures(
                self.gpu.graphics_queue(),
                self.gpu.command_pool(),
                &output.textures_delta.set,
            )
            .map_err(|e| anyhow!("upload egui textures: {e}"))?;
        self.renderer
            .cmd_draw(cmd, self.extent, output.pixels_per_point, &primitives)
            .map_err(|e| anyhow!("record egui draws: {e}"))?;

        self.retired.push(self.frame, output.textures_delta.free);
        self.frame += 1;
        Ok(())
    }

    fn wants_capture_keyboard(&self) -> bool {
        self.ctx().wants_keyboard_input()
    }

    fn wants_capture_mouse(&self) -> bool {
        self.ctx().wants_pointer_input()
    }
}

impl UiTextures for EguiLayer {
    fn register_texture(
        &mut self,
        sampler: vk::Sampler,
        view: vk::ImageView,
        layout: vk::ImageLayout,
    ) -> Result<UiTextureId> {
        let device = self.gpu.raw();
        let layouts = [self.texture_layout];
        let alloc = vk::DescriptorSetAllocateInfo {
            s_type: vk::StructureType::DESCRIPTOR_SET_ALLOCATE_INFO,
            descriptor_pool: self.gpu.descriptor_pool(),
            descriptor_set_count: 1,
            p_set_layouts: layouts.as_ptr(),
            ..Default::default()
        };
        let set = unsafe { device.allocate_descriptor_sets(&alloc) }
            .context("vkAllocateDescriptorSets")?
            .into_iter()
            .next()
            .context("driver returned no descriptor set")?;

        let image_info = vk::DescriptorImageInfo {
            sampler,
            image_view: view,
            image_layout: layout,
        };
        let write = vk::WriteDescriptorSet {
            s_type: vk::StructureType::WRITE_DESCRIPTOR_SET,
            dst_set: set,
            dst_binding: 0,
            descriptor_count: 1,
            descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            p_image_info: &image_info,
            ..Default::default()
        };
        unsafe { device.update_descriptor_sets(&[write], &[]) };

        let id = UiTextureId(self.next_texture);
        self.next_texture += 1;
        let egui_id = self.renderer.add_user_texture(set);
        self.user_textures.insert(id, UserTexture { egui: egui_id, set });
        Ok(id)
    }

    fn remove_texture(&mut self, id: UiTextureId) {
        let Some(texture) = self.user_textures.remove(&id) else {
            warn!(?id, "removing unknown UI texture");
            return;
        };
        self.renderer.remove_user_texture(texture.egui);
        let freed = unsafe {
            self.gpu
                .raw()
                .free_descriptor_sets(self.gpu.descriptor_pool(), &[texture.set])
        };
        if let Err(e) = freed {
            warn!("vkFreeDescriptorSets: {e}");
        }
    }

    fn begin_panel(&mut self, title: &str) -> bool {
        self.panels.begin(title)
    }

    fn end_panel(&mut self) {
        if self.in_pass {
            self.panels.end(self.state.egui_ctx());
        } else {
            self.panels.discard();
        }
    }

    fn content_region_avail(&self) -> [f32; 2] {
        self.panels.region()
    }

    fn image(&mut self, id: UiTextureId, size: [f32; 2]) {
        match self.user_textures.get(&id) {
            Some(texture) => self.panels.image(texture.egui, size),
            None => warn!(?id, "image with unknown UI texture"),
        }
    }

    fn is_item_hovered(&self) -> bool {
        self.panels.is_hovered()
    }

    fn is_panel_focused(&self) -> bool {
        self.panels.is_focused()
    }
}

impl UiBackend for EguiLayer {
    fn on_swapchain_rebuilt(
        &mut self,
        render_pass: vk::RenderPass,
        extent: vk::Extent2D,
    ) -> Result<()> {
        self.extent = extent;
        self.renderer
            .set_render_pass(render_pass)
            .map_err(|e| anyhow!("rebind egui renderer: {e}"))
    }
}

impl Drop for EguiLayer {
    fn drop(&mut self) {
        let device = self.gpu.raw();
        let sets: Vec<_> = self.user_textures.drain().map(|(_, t)| t.set).collect();
        unsafe {
            if !sets.is_empty() {
                if let Err(e) = device.free_descriptor_sets(self.gpu.descriptor_pool(), &sets) {
                    warn!("vkFreeDescriptorSets at teardown: {e}");
                }
            }
            device.destroy_descriptor_set_layout(self.texture_layout, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frees_wait_for_frames_in_flight() {
        let mut q = RetireQueue::new(2);
        q.push(0, vec!['a']);
        q.push(1, vec!['b', 'c']);
        q.push(2, Vec::new());
        assert!(q.due(1).is_empty());
        assert_eq!(q.due(2), vec!['a']);
        assert!(q.due(2).is_empty());
        assert_eq!(q.due(5), vec!['b', 'c']);
        assert!(q.queue.is_empty());
    }

    #[test]
    fn zero_depth_still_waits_one_frame() {
        let mut q = RetireQueue::new(0);
        q.push(3, vec![1]);
        assert!(q.due(3).is_empty());
        assert_eq!(q.due(4), vec![1]);
    }

    #[test]
    fn srgb_formats_are_detected() {
        assert!(is_srgb(vk::Format::B8G8R8A8_SRGB));
        assert!(!is_srgb(vk::Format::B8G8R8A8_UNORM));
    }
}
