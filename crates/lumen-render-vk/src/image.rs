// SPDX-License-Identifier: CEPL-1.0
use anyhow::{Context, Result};
use ash::vk;
use std::rc::Rc;

use crate::device::{find_memory_type, Device, Owned};

/// Device-local 2D image with its own memory and a full view.
/// Field order is the release order: view, image, memory.
pub struct AttachmentImage<D: Device> {
    view: Owned<D, vk::ImageView>,
    image: Owned<D, vk::Image>,
    _memory: Owned<D, vk::DeviceMemory>,
    format: vk::Format,
    extent: vk::Extent2D,
}

impl<D: Device> AttachmentImage<D> {
    pub fn new(
        device: &Rc<D>,
        extent: vk::Extent2D,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
        aspect: vk::ImageAspectFlags,
    ) -> Result<Self> {
        let image_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            },
            mip_levels: 1,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = Owned::new(device, device.create_image(&image_ci).context("create_image")?);

        let req = device.image_memory_requirements(image.raw());
        let memory_type_index = find_memory_type(
            device.memory_properties(),
            req.memory_type_bits,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index,
            ..Default::default()
        };
        let memory = Owned::new(device, device.allocate_memory(&alloc).context("allocate_memory")?);
        device
            .bind_image_memory(image.raw(), memory.raw())
            .context("bind_image_memory")?;

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: image.raw(),
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: vk::ImageSubresourceRange {
                aspect_mask: aspect,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            ..Default::default()
        };
        let view = Owned::new(
            device,
            device.create_image_view(&view_ci).context("create_image_view")?,
        );

        Ok(Self {
            view,
            image,
            _memory: memory,
            format,
            extent,
        })
    }

    pub fn depth(device: &Rc<D>, extent: vk::Extent2D, format: vk::Format) -> Result<Self> {
        Self::new(
            device,
            extent,
            format,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::ImageAspectFlags::DEPTH,
        )
    }

    pub fn view(&self) -> vk::ImageView {
        self.view.raw()
    }

    pub fn image(&self) -> vk::Image {
        self.image.raw()
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}
