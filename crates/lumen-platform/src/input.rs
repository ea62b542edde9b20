// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;
use glam::Vec2;
use std::collections::HashSet;
use winit::keyboard::KeyCode;

use crate::PlatformEvent;

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct MouseButtons: u8 {
        const LEFT = 1 << 0;
        const RIGHT = 1 << 1;
        const MIDDLE = 1 << 2;
        const BACK = 1 << 3;
        const FORWARD = 1 << 4;
    }
}

impl MouseButtons {
    pub fn from_winit(button: winit::event::MouseButton) -> Self {
        use winit::event::MouseButton as B;
        match button {
            B::Left => Self::LEFT,
            B::Right => Self::RIGHT,
            B::Middle => Self::MIDDLE,
            B::Back => Self::BACK,
            B::Forward => Self::FORWARD,
            B::Other(_) => Self::empty(),
        }
    }
}

/// Keyboard and mouse state, rebuilt once per frame from that frame's events.
#[derive(Clone, Debug, Default)]
pub struct Input {
    held: HashSet<KeyCode>,
    pressed: HashSet<KeyCode>,
    released: HashSet<KeyCode>,
    buttons: MouseButtons,
    buttons_pressed: MouseButtons,
    buttons_released: MouseButtons,
    cursor: Vec2,
    cursor_seen: bool,
    cursor_delta: Vec2,
    scroll: Vec2,
}

impl Input {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop last frame's edges and deltas, then apply `events`.
    pub fn update(&mut self, events: &[PlatformEvent]) {
        self.pressed.clear();
        self.released.clear();
        self.buttons_pressed = MouseButtons::empty();
        self.buttons_released = MouseButtons::empty();
        self.cursor_delta = Vec2::ZERO;
        self.scroll = Vec2::ZERO;

        for event in events {
            match *event {
                PlatformEvent::Key { code, pressed: true } => {
                    if self.held.insert(code) {
                        self.pressed.insert(code);
                    }
                }
                PlatformEvent::Key { code, pressed: false } => {
                    if self.held.remove(&code) {
                        self.released.insert(code);
                    }
                }
                PlatformEvent::MouseButton { button, pressed } => {
                    if pressed {
                        self.buttons_pressed |= button & !self.buttons;
                        self.buttons |= button;
                    } else {
                        self.buttons_released |= button & self.buttons;
                        self.buttons &= !button;
                    }
                }
                PlatformEvent::CursorMoved(pos) => {
                    if self.cursor_seen {
                        self.cursor_delta += pos - self.cursor;
                    }
                    self.cursor = pos;
                    self.cursor_seen = true;
                }
                PlatformEvent::Scroll(delta) => self.scroll += delta,
                PlatformEvent::Focused(false) => {
                    // Key-ups are lost while unfocused.
                    self.released.extend(self.held.drain());
                    self.buttons_released |= self.buttons;
                    self.buttons = MouseButtons::empty();
                }
                _ => {}
            }
        }
    }

    /// Copy with keyboard and/or mouse state blanked, for when the UI owns
    /// that device this frame.
    pub fn gated(&self, keyboard: bool, mouse: bool) -> Self {
        let mut out = self.clone();
        if keyboard {
            out.held.clear();
            out.pressed.clear();
            out.released.clear();
        }
        if mouse {
            out.buttons = MouseButtons::empty();
            out.buttons_pressed = MouseButtons::empty();
            out.buttons_released = MouseButtons::empty();
            out.cursor_delta = Vec2::ZERO;
            out.scroll = Vec2::ZERO;
        }
        out
    }

    pub fn is_key_down(&self, code: KeyCode) -> bool {
        self.held.contains(&code)
    }

    pub fn is_key_pressed(&self, code: KeyCode) -> bool {
        self.pressed.contains(&code)
    }

    pub fn is_key_released(&self, code: KeyCode) -> bool {
        self.released.contains(&code)
    }

    pub fn mouse_buttons(&self) -> MouseButtons {
        self.buttons
    }

    pub fn is_mouse_down(&self, button: MouseButtons) -> bool {
        self.buttons.contains(button)
    }

    pub fn is_mouse_pressed(&self, button: MouseButtons) -> bool {
        self.buttons_pressed.contains(button)
    }

    pub fn is_mouse_released(&self, button: MouseButtons) -> bool {
        self.buttons_released.contains(button)
    }

    pub fn cursor(&self) -> Vec2 {
        self.cursor
    }

    pub fn cursor_delta(&self) -> Vec2 {
        self.cursor_delta
    }

    pub fn scroll(&self) -> Vec2 {
        self.scroll
    }
}
