// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
use anyhow::Result;
use clap::Parser;
use glam::{Mat4, Vec3};
use lumen_app::{App, AppHooks, AppMode, FrameContext, LumenConfig, NoUi, UiBackend};
use lumen_core::init_tracing;
use lumen_platform::winit::keyboard::KeyCode;
use lumen_render::{FrameRenderer, RenderSize};
use lumen_render_vk::{
    vk, GpuContext, GraphicsPipeline, GraphicsPipelineDesc, RenderTarget, RenderWidget,
    VkRenderer, WidgetContent,
};
use lumen_ui::{egui, EguiLayer};
use std::path::PathBuf;
use std::process::ExitCode;
use std::rc::Rc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file; missing keys fall back to defaults.
    #[arg(long, default_value = "lumen.toml")]
    config: PathBuf,
    /// Overrides `app.mode` from the config file.
    #[arg(long, value_enum)]
    mode: Option<AppMode>,
    /// Force the validation layers on.
    #[arg(long)]
    validation: bool,
    #[arg(long)]
    no_vsync: bool,
}

const TRIANGLE_VS: &str = r#"
#version 450
layout(push_constant) uniform Push { mat4 transform; } pc;
layout(location = 0) out vec3 v_color;
const vec2 POS[3] = vec2[](vec2(0.0, -0.6), vec2(0.6, 0.5), vec2(-0.6, 0.5));
const vec3 COL[3] = vec3[](vec3(1.0, 0.3, 0.2), vec3(0.2, 1.0, 0.4), vec3(0.3, 0.4, 1.0));
void main() {
    gl_Position = pc.transform * vec4(POS[gl_VertexIndex], 0.0, 1.0);
    v_color = COL[gl_VertexIndex];
}
"#;

const TRIANGLE_FS: &str = r#"
#version 450
layout(location = 0) in vec3 v_color;
layout(location = 0) out vec4 o_color;
void main() { o_color = vec4(v_color, 1.0); }
"#;

struct Triangle {
    pipeline: GraphicsPipeline,
    angle: f32,
    speed: f32,
}

impl Triangle {
    fn new(ctx: &Rc<GpuContext>, render_pass: vk::RenderPass, speed: f32) -> Result<Self> {
        let mut desc = GraphicsPipelineDesc::new("triangle", TRIANGLE_VS, TRIANGLE_FS)
            .push_constant::<[[f32; 4]; 4]>(vk::ShaderStageFlags::VERTEX);
        desc.cull_mode = vk::CullModeFlags::NONE;
        Ok(Self {
            pipeline: GraphicsPipeline::new(ctx, render_pass, &desc)?,
            angle: 0.0,
            speed,
        })
    }

    fn advance(&mut self, dt: f32) {
        self.angle = (self.angle + self.speed * dt) % std::f32::consts::TAU;
    }

    fn draw(&self, ctx: &GpuContext, cmd: vk::CommandBuffer, extent: vk::Extent2D) {
        let aspect = extent.width.max(1) as f32 / extent.height.max(1) as f32;
        let transform = Mat4::from_scale(Vec3::new(1.0 / aspect.max(1.0), 1.0, 1.0))
            * Mat4::from_rotation_z(self.angle);
        self.pipeline.bind(cmd);
        self.pipeline.push_constants(
            cmd,
            vk::ShaderStageFlags::VERTEX,
            &transform.to_cols_array_2d(),
        );
        unsafe { ctx.raw().cmd_draw(cmd, 3, 1, 0, 0) };
    }
}

/// Spinning triangle inside an embedded viewport.
struct ViewportContent {
    ctx: Rc<GpuContext>,
    triangle: Option<Triangle>,
}

impl WidgetContent<GpuContext> for ViewportContent {
    fn on_init(&mut self, target: &RenderTarget<GpuContext>) -> Result<()> {
        self.triangle = Some(Triangle::new(&self.ctx, target.render_pass(), -0.8)?);
        Ok(())
    }

    fn on_update(&mut self, dt: f32) {
        if let Some(t) = &mut self.triangle {
            t.advance(dt);
        }
    }

    fn on_render(&mut self, cmd: vk::CommandBuffer, extent: vk::Extent2D) -> Result<()> {
        if let Some(t) = &self.triangle {
            t.draw(&self.ctx, cmd, extent);
        }
        Ok(())
    }

    fn on_resize(&mut self, width: u32, height: u32) {
        info!(width, height, "viewport resized");
    }

    fn on_cleanup(&mut self) {
        self.triangle = None;
    }
}

/// Values the demo's control panel edits.
struct Controls {
    fps: f32,
    speed: f32,
    clear_color: [f32; 4],
}

/// The demo's control panel, drawn with whichever UI the app runs.
trait DemoUi: UiBackend {
    fn controls(&mut self, _controls: &mut Controls) {}
}

impl DemoUi for NoUi {}

impl DemoUi for EguiLayer {
    fn controls(&mut self, controls: &mut Controls) {
        egui::Window::new("Controls")
            .default_pos([16.0, 16.0])
            .show(self.ctx(), |ui| {
                ui.label(format!("{:.0} fps", controls.fps));
                ui.add(egui::Slider::new(&mut controls.speed, -4.0..=4.0).text("spin speed"));
                ui.horizontal(|ui| {
                    ui.label("clear color");
                    ui.color_edit_button_rgba_unmultiplied(&mut controls.clear_color);
                });
            });
    }
}

struct Demo {
    triangle: Option<Triangle>,
    controls: Controls,
}

impl Demo {
    fn new(clear_color: [f32; 4]) -> Self {
        Self {
            triangle: None,
            controls: Controls {
                fps: 0.0,
                speed: 1.2,
                clear_color,
            },
        }
    }
}

impl<U: DemoUi> AppHooks<VkRenderer, U> for Demo {
    fn on_start(&mut self, renderer: &mut VkRenderer) -> Result<()> {
        let speed = self.controls.speed;
        self.triangle = Some(Triangle::new(renderer.device(), renderer.render_pass(), speed)?);
        Ok(())
    }

    fn on_update(&mut self, ctx: &mut FrameContext<'_>) {
        if ctx.input.is_key_pressed(KeyCode::Escape) {
            ctx.request_quit();
        }
        self.controls.fps = ctx.fps;
        if let Some(t) = &mut self.triangle {
            t.speed = self.controls.speed;
            t.advance(ctx.dt);
        }
    }

    fn on_render(&mut self, renderer: &mut VkRenderer, cmd: vk::CommandBuffer) -> Result<()> {
        if let Some(t) = &self.triangle {
            t.draw(renderer.device(), cmd, renderer.extent());
        }
        Ok(())
    }

    fn on_ui(&mut self, renderer: &mut VkRenderer, ui: &mut U) {
        ui.controls(&mut self.controls);
        renderer.set_clear_color(self.controls.clear_color);
    }

    fn on_resize(&mut self, size: RenderSize) {
        info!(width = size.width, height = size.height, "window resized");
    }

    fn on_stop(&mut self) {
        self.triangle = None;
    }
}

fn run(args: Args) -> Result<()> {
    let mut config = LumenConfig::load(&args.config);
    if let Some(mode) = args.mode {
        config.app.mode = mode;
    }
    config.render.validation |= args.validation;
    if args.no_vsync {
        config.render.vsync = false;
    }

    match config.app.mode {
        AppMode::Game => run_app(App::new(&config)?, &config),
        AppMode::Gui | AppMode::Hybrid => {
            let frames_in_flight = config.render.max_frames_in_flight;
            let app = App::with_ui(&config, |renderer, window| {
                EguiLayer::new(renderer, window, frames_in_flight)
            })?;
            run_app(app, &config)
        }
    }
}

fn run_app<U: DemoUi>(mut app: App<U>, config: &LumenConfig) -> Result<()> {
    let mut demo = Demo::new(config.render.clear_color);

    if config.app.mode == AppMode::Hybrid {
        let content = ViewportContent {
            ctx: Rc::clone(app.context()),
            triangle: None,
        };
        let widget = RenderWidget::new(app.context(), "Viewport", content, config.widget())?;
        app.register_widget(Box::new(widget))?;
    }

    app.run(&mut demo)
}

fn main() -> ExitCode {
    init_tracing("info");
    let args = Args::parse();
    info!(?args, "starting");
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
