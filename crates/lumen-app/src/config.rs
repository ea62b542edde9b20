// SPDX-License-Identifier: CEPL-1.0
use lumen_platform::WindowConfig;
use lumen_render_vk::render_target::{WidgetConfig, DEFAULT_CLEAR_COLOR};
use lumen_render_vk::RendererConfig;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::AppMode;

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct RenderCfg {
    pub clear_color: [f32; 4],
    pub vsync: bool,
    pub max_frames_in_flight: usize,
    pub validation: bool,
}

impl Default for RenderCfg {
    fn default() -> Self {
        RenderCfg {
            clear_color: default_clear(),
            vsync: true,
            max_frames_in_flight: 2,
            validation: cfg!(debug_assertions),
        }
    }
}

fn default_clear() -> [f32; 4] {
    [0.02, 0.02, 0.04, 1.0]
}

#[derive(Debug, Deserialize, Default, Clone, Copy)]
#[serde(default)]
pub struct AppCfg {
    pub mode: AppMode,
}

#[derive(Debug, Deserialize, Clone, Copy)]
#[serde(default)]
pub struct WidgetCfg {
    pub width: u32,
    pub height: u32,
    pub clear_color: [f32; 4],
}

impl Default for WidgetCfg {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
            clear_color: DEFAULT_CLEAR_COLOR,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct LumenConfig {
    pub window: WindowConfig,
    pub render: RenderCfg,
    pub app: AppCfg,
    pub widget: WidgetCfg,
}

impl LumenConfig {
    /// Read `path`; a missing or malformed file gives the defaults.
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(s) => match toml::from_str::<LumenConfig>(&s) {
                Ok(cfg) => {
                    info!(path = %path.display(), "config loaded");
                    cfg
                }
                Err(e) => {
                    warn!(path = %path.display(), "invalid config, using defaults: {e}");
                    Self::default()
                }
            },
            Err(e) => {
                warn!(path = %path.display(), "no config ({e}), using defaults");
                Self::default()
            }
        }
    }

    pub fn renderer(&self) -> RendererConfig {
        RendererConfig {
            vsync: self.render.vsync,
            clear_color: self.render.clear_color,
            max_frames_in_flight: self.render.max_frames_in_flight.max(1),
        }
    }

    pub fn widget(&self) -> WidgetConfig {
        WidgetConfig {
            width: self.widget.width,
            height: self.widget.height,
            clear_color: self.widget.clear_color,
        }
    }
}
