// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use lumen_render::RenderSize;
use std::rc::Rc;
use tracing::info;

use crate::device::{find_supported_format, Device, Owned};
use crate::error::RenderError;
use crate::image::AttachmentImage;

/// Candidate order for the depth attachment format.
pub const DEPTH_FORMAT_CANDIDATES: [vk::Format; 3] = [
    vk::Format::D32_SFLOAT,
    vk::Format::D32_SFLOAT_S8_UINT,
    vk::Format::D24_UNORM_S8_UINT,
];

/// BGRA8 sRGB with the sRGB-nonlinear color space, else whatever the driver lists first.
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

/// FIFO with vsync (always available). Without vsync, MAILBOX then IMMEDIATE.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: framebuffer
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: framebuffer
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 means no maximum).
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let want = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        want.min(caps.max_image_count)
    } else {
        want
    }
}

pub fn pick_depth_format<D: Device>(device: &D) -> Result<vk::Format, RenderError> {
    find_supported_format(
        &DEPTH_FORMAT_CANDIDATES,
        vk::ImageTiling::OPTIMAL,
        vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        |f| device.format_properties(f),
    )
}

/// Color + depth, one subpass. Color is cleared and stored, depth is cleared
/// and discarded. The external dependency keeps attachment writes behind the
/// color-output and early-fragment-test stages, so nothing is written before
/// the acquired image is actually available.
pub fn create_render_pass<D: Device>(
    device: &Rc<D>,
    color_format: vk::Format,
    depth_format: vk::Format,
    color_final_layout: vk::ImageLayout,
) -> Result<Owned<D, vk::RenderPass>> {
    let attachments = [
        vk::AttachmentDescription {
            format: color_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::STORE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: color_final_layout,
            ..Default::default()
        },
        vk::AttachmentDescription {
            format: depth_format,
            samples: vk::SampleCountFlags::TYPE_1,
            load_op: vk::AttachmentLoadOp::CLEAR,
            store_op: vk::AttachmentStoreOp::DONT_CARE,
            stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
            stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            final_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
            ..Default::default()
        },
    ];
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let depth_ref = vk::AttachmentReference {
        attachment: 1,
        layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        p_depth_stencil_attachment: &depth_ref,
        ..Default::default()
    };
    let stages = vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        | vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: stages,
        src_access_mask: vk::AccessFlags::empty(),
        dst_stage_mask: stages,
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE
            | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let info = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    let raw = device.create_render_pass(&info).context("create_render_pass")?;
    Ok(Owned::new(device, raw))
}

pub fn create_framebuffer<D: Device>(
    device: &Rc<D>,
    render_pass: vk::RenderPass,
    attachments: &[vk::ImageView],
    extent: vk::Extent2D,
) -> Result<Owned<D, vk::Framebuffer>> {
    let info = vk::FramebufferCreateInfo {
        s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
        render_pass,
        attachment_count: attachments.len() as u32,
        p_attachments: attachments.as_ptr(),
        width: extent.width,
        height: extent.height,
        layers: 1,
        ..Default::default()
    };
    let raw = device.create_framebuffer(&info).context("create_framebuffer")?;
    Ok(Owned::new(device, raw))
}

#[derive(Clone, Copy, Debug)]
pub struct SwapchainSettings {
    pub vsync: bool,
    pub depth_format: vk::Format,
}

/// Swapchain plus everything sized by it. Built and torn down as a unit,
/// never patched in place.
///
/// STRICT TEARDOWN ORDER (field order below, after `Drop` idles the device):
/// framebuffers, render pass, depth, image views, swapchain.
pub struct SwapchainBundle<D: Device> {
    framebuffers: Vec<Owned<D, vk::Framebuffer>>,
    render_pass: Owned<D, vk::RenderPass>,
    depth: AttachmentImage<D>,
    image_views: Vec<Owned<D, vk::ImageView>>,
    swapchain: Owned<D, vk::SwapchainKHR>,
    images: Vec<vk::Image>,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    device: Rc<D>,
}

impl<D: Device> SwapchainBundle<D> {
    pub fn new(device: &Rc<D>, settings: SwapchainSettings, framebuffer: RenderSize) -> Result<Self> {
        let support = device
            .surface_support()
            .context("query surface support")?;
        let caps = support.capabilities;

        let surface_format = choose_surface_format(&support.formats)
            .context("surface reports no formats")?;
        let present_mode = choose_present_mode(&support.present_modes, settings.vsync);
        let extent = choose_extent(&caps, framebuffer);
        let min_image_count = choose_image_count(&caps);

        let (sharing_mode, family_indices) = match device.queue_families().graphics_and_present() {
            Some((g, p)) if g != p => (vk::SharingMode::CONCURRENT, vec![g, p]),
            _ => (vk::SharingMode::EXCLUSIVE, Vec::new()),
        };

        let info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            min_image_count,
            image_format: surface_format.format,
            image_color_space: surface_format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: sharing_mode,
            queue_family_index_count: family_indices.len() as u32,
            p_queue_family_indices: family_indices.as_ptr(),
            pre_transform: caps.current_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: vk::SwapchainKHR::null(),
            ..Default::default()
        };
        let swapchain = Owned::new(
            device,
            device.create_swapchain(&info).context("create_swapchain")?,
        );
        let images = device
            .swapchain_images(swapchain.raw())
            .context("get_swapchain_images")?;

        let image_views = images
            .iter()
            .map(|&image| {
                let view_ci = vk::ImageViewCreateInfo {
                    s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                    image,
                    view_type: vk::ImageViewType::TYPE_2D,
                    format: surface_format.format,
                    subresource_range: vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    },
                    ..Default::default()
                };
                let view = device
                    .create_image_view(&view_ci)
                    .context("create swapchain image view")?;
                Ok(Owned::new(device, view))
            })
            .collect::<Result<Vec<_>>>()?;

        let depth = AttachmentImage::depth(device, extent, settings.depth_format)
            .context("create depth buffer")?;
        let render_pass = create_render_pass(
            device,
            surface_format.format,
            settings.depth_format,
            vk::ImageLayout::PRESENT_SRC_KHR,
        )?;
        let framebuffers = image_views
            .iter()
            .map(|view| {
                create_framebuffer(device, render_pass.raw(), &[view.raw(), depth.view()], extent)
            })
            .collect::<Result<Vec<_>>>()?;

        info!(
            "swapchain: {:?} / {:?}, present_mode={:?}, extent={}x{}, images={} (min={}, max={})",
            surface_format.format,
            surface_format.color_space,
            present_mode,
            extent.width,
            extent.height,
            images.len(),
            caps.min_image_count,
            caps.max_image_count,
        );

        Ok(Self {
            framebuffers,
            render_pass,
            depth,
            image_views,
            swapchain,
            images,
            surface_format,
            present_mode,
            extent,
            device: Rc::clone(device),
        })
    }

    pub fn swapchain(&self) -> vk::SwapchainKHR {
        self.swapchain.raw()
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass.raw()
    }

    pub fn framebuffer(&self, image_index: u32) -> Option<vk::Framebuffer> {
        self.framebuffers.get(image_index as usize).map(Owned::raw)
    }

    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    pub fn image_view_count(&self) -> usize {
        self.image_views.len()
    }

    pub fn framebuffer_count(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn images(&self) -> &[vk::Image] {
        &self.images
    }

    pub fn depth_view(&self) -> vk::ImageView {
        self.depth.view()
    }

    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    pub fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

impl<D: Device> Drop for SwapchainBundle<D> {
    fn drop(&mut self) {
        // Fields release right after this returns; nothing may still be using them.
        let _ = self.device.wait_idle();
    }
}
