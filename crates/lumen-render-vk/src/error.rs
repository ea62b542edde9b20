// SPDX-License-Identifier: CEPL-1.0
use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("no physical device has graphics+present queues, the swapchain extension and a usable surface")]
    NoSuitableDevice,

    #[error("none of {candidates:?} support {features:?}")]
    NoSupportedFormat {
        candidates: Vec<vk::Format>,
        features: vk::FormatFeatureFlags,
    },

    #[error("no memory type in mask {type_bits:#b} has {flags:?}")]
    MemoryTypeNotFound {
        type_bits: u32,
        flags: vk::MemoryPropertyFlags,
    },

    #[error("shader `{name}` failed to compile: {message}")]
    ShaderCompilation { name: String, message: String },

    #[error("empty SPIR-V blob")]
    EmptySpirv,

    #[error("{call} failed: {result}")]
    Vk {
        call: &'static str,
        result: vk::Result,
    },

    #[error("no swapchain is currently built")]
    NoSwapchain,
}

pub(crate) trait VkResultExt<T> {
    /// Tag a raw driver error with the call that produced it.
    fn call(self, call: &'static str) -> Result<T, RenderError>;
}

impl<T> VkResultExt<T> for ash::prelude::VkResult<T> {
    fn call(self, call: &'static str) -> Result<T, RenderError> {
        self.map_err(|result| RenderError::Vk { call, result })
    }
}
