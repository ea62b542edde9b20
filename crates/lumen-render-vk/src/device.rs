// SPDX-License-Identifier: CEPL-1.0
//! The driver seam used by the frame machinery.
//!
//! Everything the swapchain, sync and render-target code needs from Vulkan
//! goes through [`Device`]. `GpuContext` implements it over `ash`; tests
//! implement it over bookkeeping only. Handles passed in must come from the
//! same implementation that receives them.
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use std::fmt;
use std::rc::Rc;

use crate::error::RenderError;

#[derive(Clone, Debug, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
    pub compute: Option<u32>,
    pub transfer: Option<u32>,
}

impl QueueFamilyIndices {
    /// Resolve families from the device's queue family list.
    ///
    /// Present prefers the graphics family when it can present. Transfer
    /// prefers a dedicated (non-graphics) family.
    pub fn find(
        families: &[vk::QueueFamilyProperties],
        mut supports_present: impl FnMut(u32) -> bool,
    ) -> Self {
        let mut out = Self::default();
        let mut first_present = None;
        let mut first_transfer = None;

        for (i, family) in families.iter().enumerate() {
            if family.queue_count == 0 {
                continue;
            }
            let i = i as u32;
            let flags = family.queue_flags;

            if out.graphics.is_none() && flags.contains(vk::QueueFlags::GRAPHICS) {
                out.graphics = Some(i);
            }
            if out.compute.is_none() && flags.contains(vk::QueueFlags::COMPUTE) {
                out.compute = Some(i);
            }
            if flags.contains(vk::QueueFlags::TRANSFER) {
                if first_transfer.is_none() {
                    first_transfer = Some(i);
                }
                if out.transfer.is_none() && !flags.contains(vk::QueueFlags::GRAPHICS) {
                    out.transfer = Some(i);
                }
            }
            if supports_present(i) {
                if Some(i) == out.graphics {
                    out.present = Some(i);
                }
                first_present.get_or_insert(i);
            }
        }

        if out.present.is_none() {
            out.present = first_present;
        }
        if out.transfer.is_none() {
            out.transfer = first_transfer;
        }
        out
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn graphics_and_present(&self) -> Option<(u32, u32)> {
        Some((self.graphics?, self.present?))
    }
}

/// One queue submission. Semaphore and stage slices must line up.
#[derive(Clone, Copy, Debug, Default)]
pub struct SubmitDesc<'a> {
    pub command_buffers: &'a [vk::CommandBuffer],
    pub wait_semaphores: &'a [vk::Semaphore],
    pub wait_stages: &'a [vk::PipelineStageFlags],
    pub signal_semaphores: &'a [vk::Semaphore],
    pub fence: vk::Fence,
}

pub trait Device {
    fn surface_support(&self) -> VkResult<SurfaceSupport>;
    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties;
    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties;
    fn queue_families(&self) -> QueueFamilyIndices;

    /// `info.surface` is ignored; the implementation targets its own surface.
    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR>;
    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>>;
    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR);
    /// `Ok((index, suboptimal))`.
    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)>;
    /// `Ok(suboptimal)`.
    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool>;

    fn create_image(&self, info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image>;
    fn image_memory_requirements(&self, image: vk::Image) -> vk::MemoryRequirements;
    fn bind_image_memory(&self, image: vk::Image, memory: vk::DeviceMemory) -> VkResult<()>;
    fn destroy_image(&self, image: vk::Image);
    fn allocate_memory(&self, info: &vk::MemoryAllocateInfo<'_>) -> VkResult<vk::DeviceMemory>;
    fn free_memory(&self, memory: vk::DeviceMemory);
    fn create_image_view(&self, info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView>;
    fn destroy_image_view(&self, view: vk::ImageView);
    fn create_render_pass(
        &self,
        info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass>;
    fn destroy_render_pass(&self, render_pass: vk::RenderPass);
    fn create_framebuffer(
        &self,
        info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer>;
    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer);
    fn create_sampler(&self, info: &vk::SamplerCreateInfo<'_>) -> VkResult<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    fn wait_for_fence(&self, fence: vk::Fence, timeout: u64) -> VkResult<()>;
    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()>;
    fn create_semaphore(&self) -> VkResult<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);

    /// Primary buffers from the context's graphics command pool.
    fn allocate_command_buffers(&self, count: u32) -> VkResult<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]);
    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()>;
    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()>;
    fn cmd_begin_render_pass(&self, cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo<'_>);
    fn cmd_end_render_pass(&self, cmd: vk::CommandBuffer);
    fn cmd_set_viewport(&self, cmd: vk::CommandBuffer, viewport: vk::Viewport);
    fn cmd_set_scissor(&self, cmd: vk::CommandBuffer, scissor: vk::Rect2D);

    fn queue_submit(&self, submit: &SubmitDesc<'_>) -> VkResult<()>;
    fn queue_wait_idle(&self) -> VkResult<()>;
    fn wait_idle(&self) -> VkResult<()>;
}

/// First memory type allowed by `type_bits` that has all of `flags`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32, RenderError> {
    (0..props.memory_type_count)
        .find(|&i| {
            (type_bits & (1 << i)) != 0
                && props.memory_types[i as usize].property_flags.contains(flags)
        })
        .ok_or(RenderError::MemoryTypeNotFound { type_bits, flags })
}

/// First candidate whose tiling features contain `features`.
pub fn find_supported_format(
    candidates: &[vk::Format],
    tiling: vk::ImageTiling,
    features: vk::FormatFeatureFlags,
    mut properties: impl FnMut(vk::Format) -> vk::FormatProperties,
) -> Result<vk::Format, RenderError> {
    candidates
        .iter()
        .copied()
        .find(|&format| {
            let props = properties(format);
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
        .ok_or_else(|| RenderError::NoSupportedFormat {
            candidates: candidates.to_vec(),
            features,
        })
}

/// A handle type that knows how to release itself.
pub trait DeviceObject: Handle + Copy {
    fn destroy<D: Device>(self, device: &D);
}

macro_rules! device_object {
    ($($ty:ty => $destroy:ident),* $(,)?) => {
        $(impl DeviceObject for $ty {
            fn destroy<D: Device>(self, device: &D) {
                device.$destroy(self);
            }
        })*
    };
}

device_object! {
    vk::SwapchainKHR => destroy_swapchain,
    vk::Image => destroy_image,
    vk::DeviceMemory => free_memory,
    vk::ImageView => destroy_image_view,
    vk::RenderPass => destroy_render_pass,
    vk::Framebuffer => destroy_framebuffer,
    vk::Sampler => destroy_sampler,
    vk::Fence => destroy_fence,
    vk::Semaphore => destroy_semaphore,
}

/// Owning wrapper: the handle is destroyed when this is dropped. Holding
/// the device `Rc` keeps the device alive at least as long as the handle.
pub struct Owned<D: Device, H: DeviceObject> {
    device: Rc<D>,
    raw: H,
}

impl<D: Device, H: DeviceObject> Owned<D, H> {
    pub fn new(device: &Rc<D>, raw: H) -> Self {
        Self {
            device: Rc::clone(device),
            raw,
        }
    }

    pub fn raw(&self) -> H {
        self.raw
    }

    pub fn device(&self) -> &Rc<D> {
        &self.device
    }
}

impl<D: Device, H: DeviceObject> Drop for Owned<D, H> {
    fn drop(&mut self) {
        if self.raw.as_raw() != 0 {
            self.raw.destroy(&*self.device);
        }
    }
}

impl<D: Device, H: DeviceObject + fmt::Debug> fmt::Debug for Owned<D, H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Owned").field(&self.raw).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn present_prefers_graphics_family() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER),
        ];
        let q = QueueFamilyIndices::find(&families, |_| true);
        assert_eq!(q.graphics, Some(1));
        assert_eq!(q.present, Some(1));
        assert_eq!(q.compute, Some(1));
        assert_eq!(q.transfer, Some(0));
        assert!(q.is_complete());
    }

    #[test]
    fn separate_present_family() {
        let families = [
            family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::COMPUTE),
        ];
        let q = QueueFamilyIndices::find(&families, |i| i == 1);
        assert_eq!(q.graphics_and_present(), Some((0, 1)));
        assert_eq!(q.transfer, Some(0));
    }

    #[test]
    fn missing_present_is_incomplete() {
        let families = [family(vk::QueueFlags::GRAPHICS)];
        let q = QueueFamilyIndices::find(&families, |_| false);
        assert!(!q.is_complete());
        assert_eq!(q.graphics_and_present(), None);
    }

    #[test]
    fn memory_type_lookup_is_first_match_or_error() {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 3,
            ..Default::default()
        };
        props.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
        props.memory_types[1].property_flags =
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        props.memory_types[2].property_flags = vk::MemoryPropertyFlags::HOST_VISIBLE;

        let host = vk::MemoryPropertyFlags::HOST_VISIBLE;
        assert_eq!(find_memory_type(&props, 0b111, host).unwrap(), 1);
        assert_eq!(find_memory_type(&props, 0b100, host).unwrap(), 2);
        assert!(matches!(
            find_memory_type(&props, 0b001, host),
            Err(RenderError::MemoryTypeNotFound { type_bits: 0b001, .. })
        ));
    }

    #[test]
    fn owned_handle_destroys_on_drop() {
        let device = Rc::new(MockDevice::new());
        let fence = device.create_fence(true).unwrap();
        {
            let _owned = Owned::new(&device, fence);
            assert_eq!(device.live("fence"), 1);
        }
        assert_eq!(device.live("fence"), 0);
        assert_eq!(device.created("fence"), device.destroyed("fence"));
    }
}
