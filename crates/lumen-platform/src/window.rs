// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, bail, Result};
use glam::Vec2;
use lumen_render::{RenderSize, SurfaceHost};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use tracing::{debug, info};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::{ElementState, MouseScrollDelta, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::PhysicalKey;
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::WindowId;

use crate::{EventPump, MouseButtons, PlatformEvent, WindowConfig};

/// Untranslated winit events, shared with integrations that consume them
/// directly (a UI backend's input handling). Clones share one buffer.
#[derive(Clone, Debug, Default)]
pub struct RawEventTap(Rc<RefCell<Vec<WindowEvent>>>);

impl RawEventTap {
    fn push(&self, event: &WindowEvent) {
        self.0.borrow_mut().push(event.clone());
    }

    /// Everything captured since the last drain, oldest first.
    pub fn drain(&self) -> Vec<WindowEvent> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

struct WindowState {
    config: WindowConfig,
    window: Option<Rc<winit::window::Window>>,
    tap: Option<RawEventTap>,
    events: Vec<PlatformEvent>,
    close_requested: bool,
    create_error: Option<anyhow::Error>,
}

impl ApplicationHandler for WindowState {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }
        let attrs = winit::window::Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(LogicalSize::new(self.config.width, self.config.height))
            .with_resizable(self.config.resizable);
        match event_loop.create_window(attrs) {
            Ok(window) => {
                let size = window.inner_size();
                info!(width = size.width, height = size.height, "window created");
                self.window = Some(Rc::new(window));
            }
            Err(e) => {
                self.create_error = Some(anyhow!("create_window: {e}"));
                event_loop.exit();
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        if self.window.as_ref().is_some_and(|w| w.id() != window_id) {
            return;
        }
        if let Some(tap) = &self.tap {
            tap.push(&event);
        }
        let translated = match event {
            WindowEvent::CloseRequested => {
                debug!("close requested");
                self.close_requested = true;
                PlatformEvent::CloseRequested
            }
            WindowEvent::Resized(size) => {
                PlatformEvent::Resized(RenderSize::new(size.width, size.height))
            }
            WindowEvent::Focused(focused) => PlatformEvent::Focused(focused),
            WindowEvent::KeyboardInput { event, .. } => {
                let PhysicalKey::Code(code) = event.physical_key else {
                    return;
                };
                PlatformEvent::Key {
                    code,
                    pressed: event.state == ElementState::Pressed,
                }
            }
            WindowEvent::MouseInput { state, button, .. } => PlatformEvent::MouseButton {
                button: MouseButtons::from_winit(button),
                pressed: state == ElementState::Pressed,
            },
            WindowEvent::CursorMoved { position, .. } => {
                PlatformEvent::CursorMoved(Vec2::new(position.x as f32, position.y as f32))
            }
            WindowEvent::MouseWheel { delta, .. } => PlatformEvent::Scroll(match delta {
                MouseScrollDelta::LineDelta(x, y) => Vec2::new(x, y),
                MouseScrollDelta::PixelDelta(p) => Vec2::new(p.x as f32, p.y as f32),
            }),
            _ => return,
        };
        self.events.push(translated);
    }
}

/// A single OS window driven by `pump_app_events`, so the caller owns the
/// frame loop instead of handing control to winit.
pub struct Window {
    state: WindowState,
    event_loop: EventLoop<()>,
}

impl Window {
    pub fn new(config: WindowConfig) -> Result<Self> {
        let event_loop = EventLoop::new()?;
        let mut window = Self {
            state: WindowState {
                config,
                window: None,
                tap: None,
                events: Vec::new(),
                close_requested: false,
                create_error: None,
            },
            event_loop,
        };
        // The window is created on the first resume.
        while window.state.window.is_none() {
            let status = window.pump(Some(Duration::from_millis(10)));
            if let Some(e) = window.state.create_error.take() {
                return Err(e);
            }
            if let PumpStatus::Exit(code) = status {
                bail!("event loop exited with {code} before a window was created");
            }
        }
        Ok(window)
    }

    fn pump(&mut self, timeout: Option<Duration>) -> PumpStatus {
        let status = self.event_loop.pump_app_events(timeout, &mut self.state);
        if let PumpStatus::Exit(_) = status {
            self.state.close_requested = true;
        }
        status
    }

    fn inner(&self) -> Result<&winit::window::Window, HandleError> {
        self.state.window.as_deref().ok_or(HandleError::Unavailable)
    }

    /// The native window, for integrations that talk to winit directly.
    pub fn winit_window(&self) -> Option<Rc<winit::window::Window>> {
        self.state.window.clone()
    }

    /// Start capturing raw window events. Every call returns a handle to
    /// the same buffer.
    pub fn tap_raw_events(&mut self) -> RawEventTap {
        self.state.tap.get_or_insert_with(RawEventTap::default).clone()
    }

    pub fn set_title(&self, title: &str) {
        if let Some(w) = &self.state.window {
            w.set_title(title);
        }
    }

    pub fn request_close(&mut self) {
        self.state.close_requested = true;
    }

    pub fn config(&self) -> &WindowConfig {
        &self.state.config
    }
}

impl HasWindowHandle for Window {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.inner()?.window_handle()
    }
}

impl HasDisplayHandle for Window {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.inner()?.display_handle()
    }
}

impl SurfaceHost for Window {
    fn framebuffer_size(&self) -> RenderSize {
        self.state.window.as_ref().map_or(RenderSize::default(), |w| {
            let size = w.inner_size();
            RenderSize::new(size.width, size.height)
        })
    }

    fn wait_events(&mut self) {
        self.pump(None);
    }

    fn should_close(&self) -> bool {
        self.state.close_requested
    }
}

impl EventPump for Window {
    fn poll_events(&mut self) -> Vec<PlatformEvent> {
        self.pump(Some(Duration::ZERO));
        std::mem::take(&mut self.state.events)
    }

    fn is_minimized(&self) -> bool {
        let Some(w) = &self.state.window else {
            return true;
        };
        w.is_minimized().unwrap_or(false) || self.framebuffer_size().is_zero()
    }
}
