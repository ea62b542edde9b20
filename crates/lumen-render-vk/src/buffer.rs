// SPDX-License-Identifier: CEPL-1.0
use anyhow::{ensure, Context, Result};
use ash::vk;
use std::rc::Rc;

use crate::context::GpuContext;

const HOST_MEMORY: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::from_raw(
    vk::MemoryPropertyFlags::HOST_VISIBLE.as_raw() | vk::MemoryPropertyFlags::HOST_COHERENT.as_raw(),
);

/// A `vk::Buffer` with its own dedicated allocation.
pub struct Buffer {
    ctx: Rc<GpuContext>,
    raw: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    host_visible: bool,
}

impl Buffer {
    pub fn new(
        ctx: &Rc<GpuContext>,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        memory_flags: vk::MemoryPropertyFlags,
    ) -> Result<Self> {
        ensure!(size > 0, "zero-sized buffer");
        let device = ctx.raw();
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let raw = unsafe { device.create_buffer(&bci, None) }.context("create_buffer")?;

        let req = unsafe { device.get_buffer_memory_requirements(raw) };
        let memory_type_index = match ctx.find_memory_type(req.memory_type_bits, memory_flags) {
            Ok(i) => i,
            Err(e) => {
                unsafe { device.destroy_buffer(raw, None) };
                return Err(e.into());
            }
        };
        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index,
            ..Default::default()
        };
        let memory = match unsafe { device.allocate_memory(&mai, None) } {
            Ok(m) => m,
            Err(e) => {
                unsafe { device.destroy_buffer(raw, None) };
                return Err(e).context("allocate_memory");
            }
        };
        let buffer = Self {
            ctx: Rc::clone(ctx),
            raw,
            memory,
            size,
            host_visible: memory_flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE),
        };
        unsafe { device.bind_buffer_memory(raw, memory, 0) }.context("bind_buffer_memory")?;
        Ok(buffer)
    }

    pub fn vertex(ctx: &Rc<GpuContext>, size: vk::DeviceSize) -> Result<Self> {
        Self::new(
            ctx,
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
    }

    pub fn index(ctx: &Rc<GpuContext>, size: vk::DeviceSize) -> Result<Self> {
        Self::new(
            ctx,
            size,
            vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )
    }

    /// Host-visible, for per-frame updates through [`Buffer::write`].
    pub fn uniform(ctx: &Rc<GpuContext>, size: vk::DeviceSize) -> Result<Self> {
        Self::new(ctx, size, vk::BufferUsageFlags::UNIFORM_BUFFER, HOST_MEMORY)
    }

    pub fn staging(ctx: &Rc<GpuContext>, size: vk::DeviceSize) -> Result<Self> {
        Self::new(ctx, size, vk::BufferUsageFlags::TRANSFER_SRC, HOST_MEMORY)
    }

    /// Map, copy `bytes` to the start of the buffer, unmap.
    pub fn write(&self, bytes: &[u8]) -> Result<()> {
        ensure!(self.host_visible, "write to a buffer that is not host visible");
        ensure!(
            bytes.len() as vk::DeviceSize <= self.size,
            "write of {} bytes into a {}-byte buffer",
            bytes.len(),
            self.size
        );
        let device = self.ctx.raw();
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, self.size, vk::MemoryMapFlags::empty())
                .context("map_memory")?;
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), ptr.cast::<u8>(), bytes.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }

    pub fn raw(&self) -> vk::Buffer {
        self.raw
    }

    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        let device = self.ctx.raw();
        unsafe {
            device.destroy_buffer(self.raw, None);
            device.free_memory(self.memory, None);
        }
    }
}

/// Device-local buffer filled from `bytes` through a staging copy. Blocks
/// until the copy has finished.
pub fn upload_device_local(
    ctx: &Rc<GpuContext>,
    usage: vk::BufferUsageFlags,
    bytes: &[u8],
) -> Result<Buffer> {
    let size = bytes.len() as vk::DeviceSize;
    let staging = Buffer::staging(ctx, size)?;
    staging.write(bytes)?;

    let dst = Buffer::new(
        ctx,
        size,
        usage | vk::BufferUsageFlags::TRANSFER_DST,
        vk::MemoryPropertyFlags::DEVICE_LOCAL,
    )?;
    ctx.immediate_submit(|cmd| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size,
        };
        unsafe {
            ctx.raw()
                .cmd_copy_buffer(cmd, staging.raw(), dst.raw(), std::slice::from_ref(&region));
        }
        Ok(())
    })?;
    Ok(dst)
}
