// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

mod counters;
mod recreate;

pub use counters::FrameCounters;
pub use recreate::{RecreateReasons, RecreateTracker, SwapchainState};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Minimized windows report a zero-area framebuffer.
    pub fn is_zero(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// The window a renderer presents into.
///
/// The renderer asks it for the current framebuffer size (physical pixels,
/// not logical window size) and, while that size is zero, to block until the
/// windowing system has something new to say. A closing window ends that wait.
pub trait SurfaceHost: HasWindowHandle + HasDisplayHandle {
    fn framebuffer_size(&self) -> RenderSize;
    fn wait_events(&mut self);
    fn should_close(&self) -> bool {
        false
    }
}

/// Frame-oriented renderer driven by the frame loop.
pub trait FrameRenderer {
    type CommandBuffer: Copy;

    /// Returns `Ok(false)` when the frame must be skipped (the surface went
    /// stale during acquire and was rebuilt).
    fn begin_frame(&mut self, host: &mut dyn SurfaceHost) -> Result<bool>;
    fn end_frame(&mut self, host: &mut dyn SurfaceHost) -> Result<()>;

    /// Command buffer of the frame currently being recorded.
    fn command_buffer(&self) -> Self::CommandBuffer;

    /// Deferred: the rebuild happens at the next frame boundary.
    fn on_resize(&mut self, size: RenderSize);
    fn set_clear_color(&mut self, rgba: [f32; 4]);
    fn set_vsync(&mut self, _on: bool) {}
    fn wait_idle(&self) -> Result<()>;
}

/// Immediate-mode UI integration. Draw data is recorded into the frame's
/// command buffer inside the main render pass.
pub trait UiLayer {
    type CommandBuffer: Copy;

    fn begin_frame(&mut self);
    fn end_frame(&mut self, cmd: Self::CommandBuffer) -> Result<()>;
    fn wants_capture_keyboard(&self) -> bool;
    fn wants_capture_mouse(&self) -> bool;
}

/// Something the frame loop draws during the UI phase, e.g. an off-screen
/// viewport shown as a UI image.
pub trait EmbeddedWidget<U: UiLayer> {
    fn title(&self) -> &str;
    fn is_enabled(&self) -> bool;
    fn initialize(&mut self, ui: &mut U) -> Result<()>;
    fn render(&mut self, ui: &mut U, dt: f32) -> Result<()>;
    fn release(&mut self, _ui: &mut U) {}
}
