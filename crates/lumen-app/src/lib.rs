// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::{Context, Result};
use lumen_platform::Window;
use lumen_render::{EmbeddedWidget, FrameRenderer, RenderSize, UiLayer};
use lumen_render_vk::{ContextConfig, GpuContext, Renderer, VkRenderer};
use serde::Deserialize;
use std::rc::Rc;
use tracing::{info, warn};

mod config;
mod frame_loop;

pub use config::{AppCfg, LumenConfig, RenderCfg, WidgetCfg};
pub use frame_loop::{FrameContext, FrameLoop, FrameOutcome, FramePhases};
pub use lumen_render_vk::{NoUi, UiBackend};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum AppMode {
    /// UI only; no direct render pass recording.
    #[default]
    Gui,
    /// Direct rendering only.
    Game,
    /// Direct rendering, then UI on top.
    Hybrid,
}

/// Application callbacks. Every method has a no-op default.
pub trait AppHooks<R: FrameRenderer, U: UiLayer> {
    fn on_start(&mut self, _renderer: &mut R) -> Result<()> {
        Ok(())
    }
    fn on_update(&mut self, _ctx: &mut FrameContext<'_>) {}
    fn on_pre_render(&mut self, _renderer: &mut R) {}
    /// Direct draws into the main pass (Game and Hybrid).
    fn on_render(&mut self, _renderer: &mut R, _cmd: R::CommandBuffer) -> Result<()> {
        Ok(())
    }
    /// UI building (Gui and Hybrid), before embedded widgets are drawn.
    fn on_ui(&mut self, _renderer: &mut R, _ui: &mut U) {}
    fn on_post_render(&mut self, _renderer: &mut R) {}
    fn on_resize(&mut self, _size: RenderSize) {}
    /// Called after the GPU is idle; release GPU resources here.
    fn on_stop(&mut self) {}
}

/// Owns the window, the renderer, the UI layer and the embedded widgets.
///
/// Field order is the teardown order: widgets, UI, renderer, then the
/// device, and the window last.
pub struct App<U: UiBackend = NoUi> {
    widgets: Vec<Box<dyn EmbeddedWidget<U>>>,
    ui: U,
    /// Swapchain generation the UI last saw.
    ui_generation: u64,
    renderer: VkRenderer,
    context: Rc<GpuContext>,
    frame_loop: FrameLoop,
    window: Window,
}

impl App<NoUi> {
    pub fn new(config: &LumenConfig) -> Result<Self> {
        let [w, h] = [config.widget.width as f32, config.widget.height as f32];
        Self::with_ui(config, |_, _| Ok(NoUi::with_region(w, h)))
    }
}

impl<U: UiBackend> App<U> {
    /// `make_ui` runs once the renderer exists, so a UI backend can build
    /// against its render pass and hook into the window's events.
    pub fn with_ui(
        config: &LumenConfig,
        make_ui: impl FnOnce(&VkRenderer, &mut Window) -> Result<U>,
    ) -> Result<Self> {
        let mut window = Window::new(config.window.clone()).context("create window")?;
        let context = Rc::new(
            GpuContext::new(
                &window,
                &window,
                ContextConfig {
                    app_name: config.window.title.clone(),
                    validation: config.render.validation,
                },
            )
            .context("initialize GPU context")?,
        );
        let renderer = Renderer::new(&context, &mut window, config.renderer())
            .context("create renderer")?;
        let ui = make_ui(&renderer, &mut window).context("create UI layer")?;
        info!(mode = ?config.app.mode, "application ready");

        Ok(Self {
            widgets: Vec::new(),
            ui,
            ui_generation: renderer.swapchain_generation(),
            renderer,
            context,
            frame_loop: FrameLoop::new(config.app.mode),
            window,
        })
    }

    pub fn context(&self) -> &Rc<GpuContext> {
        &self.context
    }

    pub fn renderer(&self) -> &VkRenderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut VkRenderer {
        &mut self.renderer
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn ui_mut(&mut self) -> &mut U {
        &mut self.ui
    }

    /// Initialize and add `widget`. A second widget with the same title is
    /// ignored.
    pub fn register_widget(&mut self, mut widget: Box<dyn EmbeddedWidget<U>>) -> Result<()> {
        if self.widgets.iter().any(|w| w.title() == widget.title()) {
            warn!(title = widget.title(), "widget already registered");
            return Ok(());
        }
        widget
            .initialize(&mut self.ui)
            .with_context(|| format!("initialize widget `{}`", widget.title()))?;
        info!(title = widget.title(), "widget registered");
        self.widgets.push(widget);
        Ok(())
    }

    /// Release and drop the widget titled `title`. Returns whether one was found.
    pub fn unregister_widget(&mut self, title: &str) -> Result<bool> {
        let Some(pos) = self.widgets.iter().position(|w| w.title() == title) else {
            return Ok(false);
        };
        self.renderer.wait_idle()?;
        let mut widget = self.widgets.remove(pos);
        widget.release(&mut self.ui);
        info!(title, "widget unregistered");
        Ok(true)
    }

    pub fn widget_count(&self) -> usize {
        self.widgets.len()
    }

    /// Hand a rebuilt swapchain's render pass and extent to the UI.
    fn follow_swapchain(&mut self) -> Result<()> {
        let generation = self.renderer.swapchain_generation();
        if generation == self.ui_generation {
            return Ok(());
        }
        self.ui_generation = generation;
        self.ui
            .on_swapchain_rebuilt(self.renderer.render_pass(), self.renderer.extent())
            .context("rebind UI to the new swapchain")
    }

    /// Run until the window closes or a hook asks to quit.
    pub fn run<H: AppHooks<VkRenderer, U>>(&mut self, hooks: &mut H) -> Result<()> {
        hooks.on_start(&mut self.renderer).context("on_start")?;
        info!("entering main loop");
        let result = loop {
            let step = self.frame_loop.step(
                &mut self.window,
                &mut self.renderer,
                &mut self.ui,
                &mut self.widgets,
                hooks,
            );
            match step {
                Ok(FrameOutcome::Exit) => break Ok(()),
                Ok(_) => {
                    if let Err(e) = self.follow_swapchain() {
                        break Err(e);
                    }
                }
                Err(e) => break Err(e),
            }
        };
        info!(frames = self.frame_loop.clock().frame_count(), "main loop finished");
        if let Err(e) = self.renderer.wait_idle() {
            warn!("wait_idle at shutdown failed: {e}");
        }
        hooks.on_stop();
        result
    }
}

impl<U: UiBackend> Drop for App<U> {
    fn drop(&mut self) {
        if let Err(e) = self.renderer.wait_idle() {
            warn!("wait_idle before teardown failed: {e}");
        }
        for widget in &mut self.widgets {
            widget.release(&mut self.ui);
        }
    }
}
