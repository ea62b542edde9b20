// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
//! egui as the UI layer of the Vulkan renderer.
mod layer;
mod panels;

pub use egui;
pub use layer::EguiLayer;
pub use panels::PanelBook;
