// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use glam::Vec2;
use lumen_render::{RenderSize, SurfaceHost};
use serde::Deserialize;
use winit::keyboard::KeyCode;

mod input;
mod window;

pub use input::{Input, MouseButtons};
pub use window::{RawEventTap, Window};
pub use winit;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub resizable: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "lumen".into(),
            width: 1280,
            height: 720,
            resizable: true,
        }
    }
}

/// Window events as the frame loop sees them.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlatformEvent {
    /// New framebuffer size in physical pixels.
    Resized(RenderSize),
    CloseRequested,
    Focused(bool),
    Key { code: KeyCode, pressed: bool },
    MouseButton { button: MouseButtons, pressed: bool },
    CursorMoved(Vec2),
    Scroll(Vec2),
}

/// Event source for the frame loop. `wait_events` (from [`SurfaceHost`])
/// blocks; `poll_events` never does.
pub trait EventPump: SurfaceHost {
    /// Everything that arrived since the last call.
    fn poll_events(&mut self) -> Vec<PlatformEvent>;
    fn is_minimized(&self) -> bool;
}
