// SPDX-License-Identifier: CEPL-1.0
use anyhow::Result;
use lumen_core::FrameClock;
use lumen_platform::{EventPump, Input, PlatformEvent};
use lumen_render::{EmbeddedWidget, FrameRenderer, UiLayer};
use tracing::{debug, trace};

use crate::{AppHooks, AppMode};

/// Which recording phases run inside the main render pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FramePhases {
    pub direct: bool,
    pub ui: bool,
}

impl FramePhases {
    pub fn for_mode(mode: AppMode) -> Self {
        match mode {
            AppMode::Gui => Self {
                direct: false,
                ui: true,
            },
            AppMode::Game => Self {
                direct: true,
                ui: false,
            },
            AppMode::Hybrid => Self {
                direct: true,
                ui: true,
            },
        }
    }
}

/// Per-frame view handed to `on_update`.
pub struct FrameContext<'a> {
    pub dt: f32,
    pub elapsed: f32,
    pub fps: f32,
    pub frame: u64,
    /// Already gated by the UI's capture flags.
    pub input: &'a Input,
    quit: bool,
}

impl FrameContext<'_> {
    pub fn request_quit(&mut self) {
        self.quit = true;
    }

    pub fn quit_requested(&self) -> bool {
        self.quit
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered,
    /// The renderer could not start a frame (the swapchain was rebuilt).
    Skipped,
    Minimized,
    Exit,
}

pub struct FrameLoop {
    phases: FramePhases,
    clock: FrameClock,
    input: Input,
}

impl FrameLoop {
    pub fn new(mode: AppMode) -> Self {
        Self {
            phases: FramePhases::for_mode(mode),
            clock: FrameClock::new(),
            input: Input::new(),
        }
    }

    pub fn phases(&self) -> FramePhases {
        self.phases
    }

    pub fn clock(&self) -> &FrameClock {
        &self.clock
    }

    pub fn input(&self) -> &Input {
        &self.input
    }

    /// Run one iteration: events, update, then record and present a frame.
    pub fn step<W, R, U, H>(
        &mut self,
        window: &mut W,
        renderer: &mut R,
        ui: &mut U,
        widgets: &mut [Box<dyn EmbeddedWidget<U>>],
        hooks: &mut H,
    ) -> Result<FrameOutcome>
    where
        W: EventPump,
        R: FrameRenderer,
        U: UiLayer<CommandBuffer = R::CommandBuffer>,
        H: AppHooks<R, U>,
    {
        let dt = self.clock.tick();

        let events = window.poll_events();
        for event in &events {
            match *event {
                PlatformEvent::Resized(size) => {
                    debug!(width = size.width, height = size.height, "resize");
                    renderer.on_resize(size);
                    hooks.on_resize(size);
                }
                PlatformEvent::CloseRequested => return Ok(FrameOutcome::Exit),
                _ => {}
            }
        }
        if window.should_close() {
            return Ok(FrameOutcome::Exit);
        }
        self.input.update(&events);

        if window.is_minimized() {
            trace!("minimized, waiting for events");
            window.wait_events();
            return Ok(FrameOutcome::Minimized);
        }

        let gated = self
            .input
            .gated(ui.wants_capture_keyboard(), ui.wants_capture_mouse());
        let mut ctx = FrameContext {
            dt,
            elapsed: self.clock.elapsed(),
            fps: self.clock.fps(),
            frame: self.clock.frame_count(),
            input: &gated,
            quit: false,
        };
        hooks.on_update(&mut ctx);
        if ctx.quit {
            return Ok(FrameOutcome::Exit);
        }

        if !renderer.begin_frame(window)? {
            return Ok(FrameOutcome::Skipped);
        }
        // The frame is closed even when recording fails.
        let recorded = self.record(renderer, ui, widgets, hooks, dt);
        let ended = renderer.end_frame(window);
        recorded?;
        ended?;
        Ok(FrameOutcome::Rendered)
    }

    fn record<R, U, H>(
        &self,
        renderer: &mut R,
        ui: &mut U,
        widgets: &mut [Box<dyn EmbeddedWidget<U>>],
        hooks: &mut H,
        dt: f32,
    ) -> Result<()>
    where
        R: FrameRenderer,
        U: UiLayer<CommandBuffer = R::CommandBuffer>,
        H: AppHooks<R, U>,
    {
        hooks.on_pre_render(renderer);
        let cmd = renderer.command_buffer();
        if self.phases.direct {
            hooks.on_render(renderer, cmd)?;
        }
        if self.phases.ui {
            ui.begin_frame();
            hooks.on_ui(renderer, ui);
            for widget in widgets.iter_mut().filter(|w| w.is_enabled()) {
                widget.render(ui, dt)?;
            }
            ui.end_frame(cmd)?;
        }
        hooks.on_post_render(renderer);
        Ok(())
    }
}
