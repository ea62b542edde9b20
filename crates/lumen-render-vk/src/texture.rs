// SPDX-License-Identifier: CEPL-1.0
//! Sampled 2D textures from files or raw RGBA8 pixels.
use anyhow::{ensure, Context, Result};
use ash::vk;
use std::path::Path;
use std::rc::Rc;

use crate::buffer::Buffer;
use crate::context::GpuContext;
use crate::device::{find_memory_type, Device, Owned};

/// Full mip chain length for a `width` x `height` image.
pub fn mip_levels(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

#[derive(Clone, Copy, Debug)]
pub struct TextureOptions {
    pub filter: vk::Filter,
    pub address_mode: vk::SamplerAddressMode,
    pub generate_mips: bool,
    pub srgb: bool,
}

impl Default for TextureOptions {
    fn default() -> Self {
        Self {
            filter: vk::Filter::LINEAR,
            address_mode: vk::SamplerAddressMode::REPEAT,
            generate_mips: true,
            srgb: true,
        }
    }
}

fn color_range(base_mip_level: u32, level_count: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        base_mip_level,
        level_count,
        base_array_layer: 0,
        layer_count: 1,
    }
}

fn barrier(
    ctx: &GpuContext,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    range: vk::ImageSubresourceRange,
    (old_layout, src_access, src_stage): (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags),
    (new_layout, dst_access, dst_stage): (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags),
) {
    let b = vk::ImageMemoryBarrier {
        s_type: vk::StructureType::IMAGE_MEMORY_BARRIER,
        src_access_mask: src_access,
        dst_access_mask: dst_access,
        old_layout,
        new_layout,
        src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
        image,
        subresource_range: range,
        ..Default::default()
    };
    unsafe {
        ctx.raw().cmd_pipeline_barrier(
            cmd,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            std::slice::from_ref(&b),
        )
    };
}

const TRANSFER_DST: (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags) = (
    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    vk::AccessFlags::TRANSFER_WRITE,
    vk::PipelineStageFlags::TRANSFER,
);
const TRANSFER_SRC: (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags) = (
    vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    vk::AccessFlags::TRANSFER_READ,
    vk::PipelineStageFlags::TRANSFER,
);
const SHADER_READ: (vk::ImageLayout, vk::AccessFlags, vk::PipelineStageFlags) = (
    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    vk::AccessFlags::SHADER_READ,
    vk::PipelineStageFlags::FRAGMENT_SHADER,
);

fn generate_mips(ctx: &GpuContext, cmd: vk::CommandBuffer, image: vk::Image, width: u32, height: u32, levels: u32) {
    let mut w = width as i32;
    let mut h = height as i32;
    for level in 1..levels {
        barrier(ctx, cmd, image, color_range(level - 1, 1), TRANSFER_DST, TRANSFER_SRC);

        let next_w = (w / 2).max(1);
        let next_h = (h / 2).max(1);
        let blit = vk::ImageBlit {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level - 1,
                base_array_layer: 0,
                layer_count: 1,
            },
            src_offsets: [vk::Offset3D { x: 0, y: 0, z: 0 }, vk::Offset3D { x: w, y: h, z: 1 }],
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level,
                base_array_layer: 0,
                layer_count: 1,
            },
            dst_offsets: [
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: next_w,
                    y: next_h,
                    z: 1,
                },
            ],
        };
        unsafe {
            ctx.raw().cmd_blit_image(
                cmd,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                std::slice::from_ref(&blit),
                vk::Filter::LINEAR,
            )
        };

        barrier(ctx, cmd, image, color_range(level - 1, 1), TRANSFER_SRC, SHADER_READ);
        w = next_w;
        h = next_h;
    }
    barrier(ctx, cmd, image, color_range(levels - 1, 1), TRANSFER_DST, SHADER_READ);
}

pub struct Texture {
    sampler: Owned<GpuContext, vk::Sampler>,
    view: Owned<GpuContext, vk::ImageView>,
    image: Owned<GpuContext, vk::Image>,
    _memory: Owned<GpuContext, vk::DeviceMemory>,
    width: u32,
    height: u32,
    mip_levels: u32,
    format: vk::Format,
}

impl Texture {
    pub fn from_file(ctx: &Rc<GpuContext>, path: impl AsRef<Path>, options: TextureOptions) -> Result<Self> {
        let path = path.as_ref();
        let img = ::image::open(path)
            .with_context(|| format!("loading texture {}", path.display()))?
            .to_rgba8();
        let (w, h) = img.dimensions();
        tracing::debug!(path = %path.display(), w, h, "texture loaded");
        Self::from_rgba8(ctx, w, h, img.as_raw(), options)
    }

    pub fn from_rgba8(ctx: &Rc<GpuContext>, width: u32, height: u32, pixels: &[u8], options: TextureOptions) -> Result<Self> {
        ensure!(width > 0 && height > 0, "texture with zero extent");
        ensure!(
            pixels.len() == (width as usize) * (height as usize) * 4,
            "{} bytes of pixels for a {width}x{height} RGBA8 texture",
            pixels.len()
        );
        let format = if options.srgb {
            vk::Format::R8G8B8A8_SRGB
        } else {
            vk::Format::R8G8B8A8_UNORM
        };

        let mut levels = if options.generate_mips { mip_levels(width, height) } else { 1 };
        if levels > 1
            && !ctx
                .format_properties(format)
                .optimal_tiling_features
                .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR)
        {
            tracing::warn!(?format, "format does not support linear blits; skipping mipmaps");
            levels = 1;
        }

        let staging = Buffer::staging(ctx, pixels.len() as vk::DeviceSize)?;
        staging.write(pixels)?;

        let mut usage = vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED;
        if levels > 1 {
            usage |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        let image_ci = vk::ImageCreateInfo {
            s_type: vk::StructureType::IMAGE_CREATE_INFO,
            image_type: vk::ImageType::TYPE_2D,
            format,
            extent: vk::Extent3D {
                width,
                height,
                depth: 1,
            },
            mip_levels: levels,
            array_layers: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            tiling: vk::ImageTiling::OPTIMAL,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            initial_layout: vk::ImageLayout::UNDEFINED,
            ..Default::default()
        };
        let image = Owned::new(ctx, ctx.create_image(&image_ci).context("create_image")?);
        let req = ctx.image_memory_requirements(image.raw());
        let alloc = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index: find_memory_type(
                ctx.memory_properties(),
                req.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?,
            ..Default::default()
        };
        let memory = Owned::new(ctx, ctx.allocate_memory(&alloc).context("allocate_memory")?);
        ctx.bind_image_memory(image.raw(), memory.raw())
            .context("bind_image_memory")?;

        ctx.immediate_submit(|cmd| {
            let raw = image.raw();
            let undefined = (
                vk::ImageLayout::UNDEFINED,
                vk::AccessFlags::empty(),
                vk::PipelineStageFlags::TOP_OF_PIPE,
            );
            barrier(ctx, cmd, raw, color_range(0, levels), undefined, TRANSFER_DST);
            let region = vk::BufferImageCopy {
                buffer_offset: 0,
                buffer_row_length: 0,
                buffer_image_height: 0,
                image_subresource: vk::ImageSubresourceLayers {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    mip_level: 0,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                image_offset: vk::Offset3D { x: 0, y: 0, z: 0 },
                image_extent: vk::Extent3D {
                    width,
                    height,
                    depth: 1,
                },
            };
            unsafe {
                ctx.raw().cmd_copy_buffer_to_image(
                    cmd,
                    staging.raw(),
                    raw,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    std::slice::from_ref(&region),
                )
            };
            if levels > 1 {
                generate_mips(ctx, cmd, raw, width, height, levels);
            } else {
                barrier(ctx, cmd, raw, color_range(0, 1), TRANSFER_DST, SHADER_READ);
            }
            Ok(())
        })?;
        drop(staging);

        let view_ci = vk::ImageViewCreateInfo {
            s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
            image: image.raw(),
            view_type: vk::ImageViewType::TYPE_2D,
            format,
            subresource_range: color_range(0, levels),
            ..Default::default()
        };
        let view = Owned::new(ctx, ctx.create_image_view(&view_ci).context("create_image_view")?);

        let anisotropy = ctx.features().sampler_anisotropy == vk::TRUE;
        let sampler_ci = vk::SamplerCreateInfo {
            s_type: vk::StructureType::SAMPLER_CREATE_INFO,
            mag_filter: options.filter,
            min_filter: options.filter,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: options.address_mode,
            address_mode_v: options.address_mode,
            address_mode_w: options.address_mode,
            anisotropy_enable: anisotropy.into(),
            max_anisotropy: if anisotropy {
                ctx.properties().limits.max_sampler_anisotropy
            } else {
                1.0
            },
            max_lod: levels as f32,
            border_color: vk::BorderColor::INT_OPAQUE_BLACK,
            ..Default::default()
        };
        let sampler = Owned::new(ctx, ctx.create_sampler(&sampler_ci).context("create_sampler")?);

        Ok(Self {
            sampler,
            view,
            image,
            _memory: memory,
            width,
            height,
            mip_levels: levels,
            format,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }

    pub fn format(&self) -> vk::Format {
        self.format
    }

    pub fn image(&self) -> vk::Image {
        self.image.raw()
    }

    pub fn view(&self) -> vk::ImageView {
        self.view.raw()
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler.raw()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_chain_length() {
        assert_eq!(mip_levels(1, 1), 1);
        assert_eq!(mip_levels(2, 1), 2);
        assert_eq!(mip_levels(256, 256), 9);
        assert_eq!(mip_levels(1920, 1080), 11);
        assert_eq!(mip_levels(0, 0), 1);
    }
}
