// SPDX-License-Identifier: CEPL-1.0
//! Begin/end panels over egui windows.
//!
//! Embedded widgets open a panel, ask for its free area and place an image
//! in it one call at a time. egui lays a window out inside a closure, so the
//! calls made between `begin` and `end` are recorded and replayed when the
//! panel ends. Sizes and hover state read inside a panel are therefore those
//! of the previous frame.
use egui::load::SizedTexture;
use egui::{Context, Id, TextureId, Vec2};
use std::collections::HashMap;
use tracing::warn;

#[derive(Clone, Copy, Debug, Default)]
struct PanelState {
    /// Unknown until the window has been laid out once.
    region: Option<[f32; 2]>,
    collapsed: bool,
    hovered: bool,
}

#[derive(Debug)]
struct OpenPanel {
    title: String,
    images: Vec<(TextureId, [f32; 2])>,
}

#[derive(Debug)]
pub struct PanelBook {
    panels: HashMap<String, PanelState>,
    open: Option<OpenPanel>,
    focused: Option<String>,
    default_size: [f32; 2],
}

impl PanelBook {
    pub fn new(default_size: [f32; 2]) -> Self {
        Self {
            panels: HashMap::new(),
            open: None,
            focused: None,
            default_size,
        }
    }

    /// Open `title`. False until the panel has been laid out once, and
    /// while it is collapsed; `end` is still required.
    pub fn begin(&mut self, title: &str) -> bool {
        if let Some(stale) = self.open.take() {
            warn!(title = %stale.title, "panel was never ended; dropping its content");
        }
        self.open = Some(OpenPanel {
            title: title.to_owned(),
            images: Vec::new(),
        });
        self.panels
            .get(title)
            .is_some_and(|p| p.region.is_some() && !p.collapsed)
    }

    fn current(&self) -> Option<&PanelState> {
        self.open.as_ref().and_then(|o| self.panels.get(&o.title))
    }

    pub fn region(&self) -> [f32; 2] {
        self.current().and_then(|p| p.region).unwrap_or([0.0, 0.0])
    }

    pub fn image(&mut self, id: TextureId, size: [f32; 2]) {
        if let Some(open) = &mut self.open {
            open.images.push((id, size));
        }
    }

    pub fn is_hovered(&self) -> bool {
        self.current().is_some_and(|p| p.hovered)
    }

    pub fn is_focused(&self) -> bool {
        match (&self.open, &self.focused) {
            (Some(open), Some(focused)) => open.title == *focused,
            _ => false,
        }
    }

    /// Forget the open panel without showing it.
    pub fn discard(&mut self) {
        self.open = None;
    }

    /// Lay the open panel out in `ctx` and replay what was recorded for it.
    pub fn end(&mut self, ctx: &Context) {
        let Some(open) = self.open.take() else {
            return;
        };
        let shown = egui::Window::new(open.title.as_str())
            .id(Id::new(("lumen-panel", open.title.as_str())))
            .default_size(self.default_size)
            .resizable(true)
            .show(ctx, |ui| {
                let avail = ui.available_size();
                let mut hovered = false;
                for &(id, size) in &open.images {
                    let texture = SizedTexture::new(id, Vec2::from(size));
                    hovered |= ui.add(egui::Image::new(texture)).hovered();
                }
                ([avail.x, avail.y], hovered)
            });

        let state = self.panels.entry(open.title.clone()).or_default();
        let Some(shown) = shown else {
            state.collapsed = true;
            state.hovered = false;
            return;
        };
        match shown.inner {
            Some((region, hovered)) => {
                state.collapsed = false;
                state.region = Some(region);
                state.hovered = hovered;
            }
            None => {
                state.collapsed = true;
                state.hovered = false;
            }
        }
        if shown.response.contains_pointer() && ctx.input(|i| i.pointer.any_pressed()) {
            self.focused = Some(open.title);
        }
    }
}
