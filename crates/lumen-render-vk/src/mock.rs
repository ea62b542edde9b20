// SPDX-License-Identifier: CEPL-1.0
//! Bookkeeping-only `Device` for tests.
//!
//! Handles are plain counters. Submissions go into a FIFO "GPU queue" that
//! only makes progress when the CPU waits on a fence or idles a queue, so
//! tests can see exactly which fence a wait had to drain. Misuse (double
//! destroy, reusing a semaphore with a pending signal, submitting a
//! signaled fence, ...) is recorded as a violation instead of panicking.
use ash::prelude::VkResult;
use ash::vk::{self, Handle};
use lumen_render::{RenderSize, SurfaceHost};
use raw_window_handle::{
    DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle,
};
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, HashSet, VecDeque};

use crate::device::{Device, QueueFamilyIndices, SubmitDesc, SurfaceSupport};

#[derive(Clone, Debug)]
pub struct SwapchainRecord {
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub present_mode: vk::PresentModeKHR,
    pub extent: vk::Extent2D,
    next_image: usize,
}

struct Submission {
    fence: u64,
    waits: Vec<u64>,
}

pub struct MockDevice {
    next_handle: Cell<u64>,
    live: RefCell<HashMap<u64, &'static str>>,
    created: RefCell<HashMap<&'static str, usize>>,
    destroyed: RefCell<HashMap<&'static str, usize>>,
    violations: RefCell<Vec<String>>,

    support: RefCell<SurfaceSupport>,
    format_support: RefCell<Option<HashMap<vk::Format, vk::FormatFeatureFlags>>>,
    memory: vk::PhysicalDeviceMemoryProperties,
    families: QueueFamilyIndices,

    swapchains: RefCell<HashMap<u64, SwapchainRecord>>,
    last_swapchain: RefCell<Option<SwapchainRecord>>,
    acquire_script: RefCell<VecDeque<VkResult<bool>>>,
    image_order: RefCell<VecDeque<u32>>,
    present_script: RefCell<VecDeque<VkResult<bool>>>,

    signaled: RefCell<HashSet<u64>>,
    gpu_queue: RefCell<VecDeque<Submission>>,
    fence_waits: RefCell<Vec<vk::Fence>>,
    max_outstanding: Cell<usize>,
    acquire_pending: RefCell<HashSet<u64>>,
    render_pending: RefCell<HashSet<u64>>,
    recording: RefCell<HashSet<u64>>,

    submits: Cell<usize>,
    presents: Cell<usize>,
    queue_idles: Cell<usize>,
    device_idles: Cell<usize>,
    render_pass_begins: RefCell<Vec<(vk::RenderPass, vk::Framebuffer, vk::Extent2D)>>,
    fail_next: RefCell<Vec<&'static str>>,
}

impl MockDevice {
    pub fn new() -> Self {
        let mut memory = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: 1,
            ..Default::default()
        };
        memory.memory_types[0].property_flags = vk::MemoryPropertyFlags::DEVICE_LOCAL
            | vk::MemoryPropertyFlags::HOST_VISIBLE
            | vk::MemoryPropertyFlags::HOST_COHERENT;

        let support = SurfaceSupport {
            capabilities: vk::SurfaceCapabilitiesKHR {
                min_image_count: 2,
                max_image_count: 8,
                current_extent: vk::Extent2D {
                    width: u32::MAX,
                    height: u32::MAX,
                },
                min_image_extent: vk::Extent2D {
                    width: 1,
                    height: 1,
                },
                max_image_extent: vk::Extent2D {
                    width: 4096,
                    height: 4096,
                },
                max_image_array_layers: 1,
                supported_transforms: vk::SurfaceTransformFlagsKHR::IDENTITY,
                current_transform: vk::SurfaceTransformFlagsKHR::IDENTITY,
                ..Default::default()
            },
            formats: vec![
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_UNORM,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
                vk::SurfaceFormatKHR {
                    format: vk::Format::B8G8R8A8_SRGB,
                    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
                },
            ],
            present_modes: vec![vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX],
        };

        Self {
            next_handle: Cell::new(0x1000),
            live: RefCell::default(),
            created: RefCell::default(),
            destroyed: RefCell::default(),
            violations: RefCell::default(),
            support: RefCell::new(support),
            format_support: RefCell::new(None),
            memory,
            families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
                compute: Some(0),
                transfer: Some(0),
            },
            swapchains: RefCell::default(),
            last_swapchain: RefCell::new(None),
            acquire_script: RefCell::default(),
            image_order: RefCell::default(),
            present_script: RefCell::default(),
            signaled: RefCell::default(),
            gpu_queue: RefCell::default(),
            fence_waits: RefCell::default(),
            max_outstanding: Cell::new(0),
            acquire_pending: RefCell::default(),
            render_pending: RefCell::default(),
            recording: RefCell::default(),
            submits: Cell::new(0),
            presents: Cell::new(0),
            queue_idles: Cell::new(0),
            device_idles: Cell::new(0),
            render_pass_begins: RefCell::default(),
            fail_next: RefCell::default(),
        }
    }

    // ---- scripting ----

    pub fn set_image_count_range(&self, min: u32, max: u32) {
        let mut s = self.support.borrow_mut();
        s.capabilities.min_image_count = min;
        s.capabilities.max_image_count = max;
    }

    pub fn set_current_extent(&self, width: u32, height: u32) {
        self.support.borrow_mut().capabilities.current_extent = vk::Extent2D { width, height };
    }

    pub fn set_present_modes(&self, modes: &[vk::PresentModeKHR]) {
        self.support.borrow_mut().present_modes = modes.to_vec();
    }

    /// Restrict format support; unlisted formats report no features.
    pub fn set_format_support(&self, formats: &[(vk::Format, vk::FormatFeatureFlags)]) {
        *self.format_support.borrow_mut() = Some(formats.iter().copied().collect());
    }

    pub fn script_acquire(&self, result: VkResult<bool>) {
        self.acquire_script.borrow_mut().push_back(result);
    }

    pub fn script_image_order(&self, order: &[u32]) {
        self.image_order.borrow_mut().extend(order.iter().copied());
    }

    /// The next creation of `kind` fails with `ERROR_OUT_OF_DEVICE_MEMORY`.
    /// Queue the same kind twice to fail twice.
    pub fn fail_next(&self, kind: &'static str) {
        self.fail_next.borrow_mut().push(kind);
    }

    pub fn script_present(&self, result: VkResult<bool>) {
        self.present_script.borrow_mut().push_back(result);
    }

    // ---- inspection ----

    pub fn created(&self, kind: &str) -> usize {
        self.created.borrow().get(kind).copied().unwrap_or(0)
    }

    pub fn destroyed(&self, kind: &str) -> usize {
        self.destroyed.borrow().get(kind).copied().unwrap_or(0)
    }

    pub fn live(&self, kind: &str) -> usize {
        self.live.borrow().values().filter(|k| **k == kind).count()
    }

    pub fn live_total(&self) -> usize {
        self.live.borrow().len()
    }

    pub fn violations(&self) -> Vec<String> {
        self.violations.borrow().clone()
    }

    pub fn last_swapchain(&self) -> Option<SwapchainRecord> {
        self.last_swapchain.borrow().clone()
    }

    pub fn fence_waits(&self) -> Vec<vk::Fence> {
        self.fence_waits.borrow().clone()
    }

    pub fn is_signaled(&self, fence: vk::Fence) -> bool {
        self.signaled.borrow().contains(&fence.as_raw())
    }

    /// Highest number of unsignaled submitted fences seen at once.
    pub fn max_outstanding(&self) -> usize {
        self.max_outstanding.get()
    }

    pub fn outstanding(&self) -> usize {
        self.gpu_queue.borrow().len()
    }

    pub fn submits(&self) -> usize {
        self.submits.get()
    }

    pub fn presents(&self) -> usize {
        self.presents.get()
    }

    pub fn queue_idles(&self) -> usize {
        self.queue_idles.get()
    }

    pub fn device_idles(&self) -> usize {
        self.device_idles.get()
    }

    pub fn render_pass_begins(&self) -> Vec<(vk::RenderPass, vk::Framebuffer, vk::Extent2D)> {
        self.render_pass_begins.borrow().clone()
    }

    // ---- internals ----

    fn violation(&self, msg: String) {
        self.violations.borrow_mut().push(msg);
    }

    fn make(&self, kind: &'static str) -> u64 {
        let raw = self.next_handle.get();
        self.next_handle.set(raw + 1);
        self.live.borrow_mut().insert(raw, kind);
        *self.created.borrow_mut().entry(kind).or_default() += 1;
        raw
    }

    fn try_make(&self, kind: &'static str) -> VkResult<u64> {
        let mut failures = self.fail_next.borrow_mut();
        if let Some(pos) = failures.iter().position(|k| *k == kind) {
            failures.remove(pos);
            return Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        }
        drop(failures);
        Ok(self.make(kind))
    }

    fn release(&self, kind: &'static str, raw: u64) {
        match self.live.borrow_mut().remove(&raw) {
            Some(k) if k == kind => {
                *self.destroyed.borrow_mut().entry(kind).or_default() += 1;
            }
            Some(k) => self.violation(format!("destroyed {k} {raw:#x} as {kind}")),
            None => self.violation(format!("{kind} {raw:#x} destroyed twice or never created")),
        }
    }

    fn retire_front(&self) -> bool {
        let Some(done) = self.gpu_queue.borrow_mut().pop_front() else {
            return false;
        };
        if done.fence != 0 {
            self.signaled.borrow_mut().insert(done.fence);
        }
        true
    }

    fn drain(&self) {
        while self.retire_front() {}
    }
}

impl Device for MockDevice {
    fn surface_support(&self) -> VkResult<SurfaceSupport> {
        Ok(self.support.borrow().clone())
    }

    fn format_properties(&self, format: vk::Format) -> vk::FormatProperties {
        let features = match &*self.format_support.borrow() {
            Some(map) => map.get(&format).copied().unwrap_or_default(),
            None => vk::FormatFeatureFlags::from_raw(!0),
        };
        vk::FormatProperties {
            linear_tiling_features: features,
            optimal_tiling_features: features,
            buffer_features: vk::FormatFeatureFlags::empty(),
        }
    }

    fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory
    }

    fn queue_families(&self) -> QueueFamilyIndices {
        self.families
    }

    fn create_swapchain(
        &self,
        info: &vk::SwapchainCreateInfoKHR<'_>,
    ) -> VkResult<vk::SwapchainKHR> {
        if info.image_extent.width == 0 || info.image_extent.height == 0 {
            self.violation("swapchain created with zero extent".into());
        }
        let raw = self.try_make("swapchain")?;
        let images = (0..info.min_image_count)
            .map(|i| vk::Image::from_raw(0xF000_0000 + raw * 16 + i as u64))
            .collect();
        let record = SwapchainRecord {
            images,
            format: info.image_format,
            present_mode: info.present_mode,
            extent: info.image_extent,
            next_image: 0,
        };
        *self.last_swapchain.borrow_mut() = Some(record.clone());
        self.swapchains.borrow_mut().insert(raw, record);
        Ok(vk::SwapchainKHR::from_raw(raw))
    }

    fn swapchain_images(&self, swapchain: vk::SwapchainKHR) -> VkResult<Vec<vk::Image>> {
        self.swapchains
            .borrow()
            .get(&swapchain.as_raw())
            .map(|s| s.images.clone())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)
    }

    fn destroy_swapchain(&self, swapchain: vk::SwapchainKHR) {
        self.swapchains.borrow_mut().remove(&swapchain.as_raw());
        self.release("swapchain", swapchain.as_raw());
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        _timeout: u64,
        semaphore: vk::Semaphore,
    ) -> VkResult<(u32, bool)> {
        let sem = semaphore.as_raw();
        if self.acquire_pending.borrow().contains(&sem) {
            self.violation(format!("acquire with semaphore {sem:#x} whose signal was never waited"));
        }
        if self.gpu_queue.borrow().iter().any(|s| s.waits.contains(&sem)) {
            self.violation(format!("acquire with semaphore {sem:#x} still awaited by the GPU"));
        }

        let suboptimal = match self.acquire_script.borrow_mut().pop_front() {
            Some(Err(e)) => return Err(e),
            Some(Ok(sub)) => sub,
            None => false,
        };

        let mut chains = self.swapchains.borrow_mut();
        let chain = chains
            .get_mut(&swapchain.as_raw())
            .ok_or(vk::Result::ERROR_SURFACE_LOST_KHR)?;
        let count = chain.images.len() as u32;
        let index = match self.image_order.borrow_mut().pop_front() {
            Some(i) => i % count,
            None => {
                let i = chain.next_image as u32 % count;
                chain.next_image += 1;
                i
            }
        };
        self.acquire_pending.borrow_mut().insert(sem);
        Ok((index, suboptimal))
    }

    fn queue_present(
        &self,
        swapchain: vk::SwapchainKHR,
        _image_index: u32,
        wait: vk::Semaphore,
    ) -> VkResult<bool> {
        if !self.swapchains.borrow().contains_key(&swapchain.as_raw()) {
            self.violation("present to a destroyed swapchain".into());
        }
        if !self.render_pending.borrow_mut().remove(&wait.as_raw()) {
            self.violation(format!("present waits on unsignaled semaphore {:#x}", wait.as_raw()));
        }
        self.presents.set(self.presents.get() + 1);
        match self.present_script.borrow_mut().pop_front() {
            Some(result) => result,
            None => Ok(false),
        }
    }

    fn create_image(&self, _info: &vk::ImageCreateInfo<'_>) -> VkResult<vk::Image> {
        Ok(vk::Image::from_raw(self.try_make("image")?))
    }

    fn image_memory_requirements(&self, _image: vk::Image) -> vk::MemoryRequirements {
        vk::MemoryRequirements {
            size: 4096,
            alignment: 256,
            memory_type_bits: 0b1,
        }
    }

    fn bind_image_memory(&self, _image: vk::Image, _memory: vk::DeviceMemory) -> VkResult<()> {
        Ok(())
    }

    fn destroy_image(&self, image: vk::Image) {
        self.release("image", image.as_raw());
    }

    fn allocate_memory(&self, _info: &vk::MemoryAllocateInfo<'_>) -> VkResult<vk::DeviceMemory> {
        Ok(vk::DeviceMemory::from_raw(self.try_make("memory")?))
    }

    fn free_memory(&self, memory: vk::DeviceMemory) {
        self.release("memory", memory.as_raw());
    }

    fn create_image_view(&self, _info: &vk::ImageViewCreateInfo<'_>) -> VkResult<vk::ImageView> {
        Ok(vk::ImageView::from_raw(self.try_make("image_view")?))
    }

    fn destroy_image_view(&self, view: vk::ImageView) {
        self.release("image_view", view.as_raw());
    }

    fn create_render_pass(
        &self,
        _info: &vk::RenderPassCreateInfo<'_>,
    ) -> VkResult<vk::RenderPass> {
        Ok(vk::RenderPass::from_raw(self.try_make("render_pass")?))
    }

    fn destroy_render_pass(&self, render_pass: vk::RenderPass) {
        self.release("render_pass", render_pass.as_raw());
    }

    fn create_framebuffer(
        &self,
        _info: &vk::FramebufferCreateInfo<'_>,
    ) -> VkResult<vk::Framebuffer> {
        Ok(vk::Framebuffer::from_raw(self.try_make("framebuffer")?))
    }

    fn destroy_framebuffer(&self, framebuffer: vk::Framebuffer) {
        self.release("framebuffer", framebuffer.as_raw());
    }

    fn create_sampler(&self, _info: &vk::SamplerCreateInfo<'_>) -> VkResult<vk::Sampler> {
        Ok(vk::Sampler::from_raw(self.try_make("sampler")?))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.release("sampler", sampler.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> VkResult<vk::Fence> {
        let raw = self.make("fence");
        if signaled {
            self.signaled.borrow_mut().insert(raw);
        }
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        if self.gpu_queue.borrow().iter().any(|s| s.fence == fence.as_raw()) {
            self.violation(format!("fence {:#x} destroyed while in flight", fence.as_raw()));
        }
        self.signaled.borrow_mut().remove(&fence.as_raw());
        self.release("fence", fence.as_raw());
    }

    fn wait_for_fence(&self, fence: vk::Fence, _timeout: u64) -> VkResult<()> {
        self.fence_waits.borrow_mut().push(fence);
        let raw = fence.as_raw();
        loop {
            if self.signaled.borrow().contains(&raw) {
                return Ok(());
            }
            if !self.retire_front() {
                self.violation(format!("wait on fence {raw:#x} that can never signal"));
                return Err(vk::Result::TIMEOUT);
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> VkResult<()> {
        if self.gpu_queue.borrow().iter().any(|s| s.fence == fence.as_raw()) {
            self.violation(format!("fence {:#x} reset while in flight", fence.as_raw()));
        }
        self.signaled.borrow_mut().remove(&fence.as_raw());
        Ok(())
    }

    fn create_semaphore(&self) -> VkResult<vk::Semaphore> {
        Ok(vk::Semaphore::from_raw(self.try_make("semaphore")?))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let raw = semaphore.as_raw();
        if self.gpu_queue.borrow().iter().any(|s| s.waits.contains(&raw)) {
            self.violation(format!("semaphore {raw:#x} destroyed while awaited"));
        }
        self.acquire_pending.borrow_mut().remove(&raw);
        self.render_pending.borrow_mut().remove(&raw);
        self.release("semaphore", raw);
    }

    fn allocate_command_buffers(&self, count: u32) -> VkResult<Vec<vk::CommandBuffer>> {
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(self.make("command_buffer")))
            .collect())
    }

    fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        for cmd in buffers {
            self.recording.borrow_mut().remove(&cmd.as_raw());
            self.release("command_buffer", cmd.as_raw());
        }
    }

    fn reset_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        self.recording.borrow_mut().remove(&cmd.as_raw());
        Ok(())
    }

    fn begin_command_buffer(
        &self,
        cmd: vk::CommandBuffer,
        _flags: vk::CommandBufferUsageFlags,
    ) -> VkResult<()> {
        if !self.recording.borrow_mut().insert(cmd.as_raw()) {
            self.violation(format!("command buffer {:#x} begun twice", cmd.as_raw()));
        }
        Ok(())
    }

    fn end_command_buffer(&self, cmd: vk::CommandBuffer) -> VkResult<()> {
        if !self.recording.borrow_mut().remove(&cmd.as_raw()) {
            self.violation(format!("command buffer {:#x} ended while not recording", cmd.as_raw()));
        }
        Ok(())
    }

    fn cmd_begin_render_pass(&self, _cmd: vk::CommandBuffer, info: &vk::RenderPassBeginInfo<'_>) {
        self.render_pass_begins.borrow_mut().push((
            info.render_pass,
            info.framebuffer,
            info.render_area.extent,
        ));
    }

    fn cmd_end_render_pass(&self, _cmd: vk::CommandBuffer) {}

    fn cmd_set_viewport(&self, _cmd: vk::CommandBuffer, _viewport: vk::Viewport) {}

    fn cmd_set_scissor(&self, _cmd: vk::CommandBuffer, _scissor: vk::Rect2D) {}

    fn queue_submit(&self, submit: &SubmitDesc<'_>) -> VkResult<()> {
        for cmd in submit.command_buffers {
            if self.recording.borrow().contains(&cmd.as_raw()) {
                self.violation(format!("submitted command buffer {:#x} still recording", cmd.as_raw()));
            }
        }
        let fence = submit.fence.as_raw();
        if fence != 0 && self.signaled.borrow().contains(&fence) {
            self.violation(format!("submitted with signaled fence {fence:#x}"));
        }
        let waits: Vec<u64> = submit.wait_semaphores.iter().map(|s| s.as_raw()).collect();
        for w in &waits {
            if !self.acquire_pending.borrow_mut().remove(w) {
                self.violation(format!("submit waits on unsignaled semaphore {w:#x}"));
            }
        }
        for s in submit.signal_semaphores {
            if !self.render_pending.borrow_mut().insert(s.as_raw()) {
                self.violation(format!("semaphore {:#x} signaled twice without a wait", s.as_raw()));
            }
        }

        self.gpu_queue.borrow_mut().push_back(Submission { fence, waits });
        let outstanding = self.gpu_queue.borrow().iter().filter(|s| s.fence != 0).count();
        self.max_outstanding.set(self.max_outstanding.get().max(outstanding));
        self.submits.set(self.submits.get() + 1);
        Ok(())
    }

    fn queue_wait_idle(&self) -> VkResult<()> {
        self.queue_idles.set(self.queue_idles.get() + 1);
        self.drain();
        Ok(())
    }

    fn wait_idle(&self) -> VkResult<()> {
        self.device_idles.set(self.device_idles.get() + 1);
        self.drain();
        Ok(())
    }
}

/// Window stand-in with a scripted framebuffer size.
pub struct MockHost {
    size: RenderSize,
    after_wait: VecDeque<RenderSize>,
    close_after: Option<usize>,
    pub waits: usize,
}

impl MockHost {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: RenderSize::new(width, height),
            after_wait: VecDeque::new(),
            close_after: None,
            waits: 0,
        }
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.size = RenderSize::new(width, height);
    }

    /// Each `wait_events` call applies the next queued size.
    pub fn queue_size_after_wait(&mut self, width: u32, height: u32) {
        self.after_wait.push_back(RenderSize::new(width, height));
    }

    /// The window reports closing once `wait_events` has run `waits` times.
    pub fn close_after_waits(&mut self, waits: usize) {
        self.close_after = Some(waits);
    }
}

impl SurfaceHost for MockHost {
    fn framebuffer_size(&self) -> RenderSize {
        self.size
    }

    fn wait_events(&mut self) {
        self.waits += 1;
        assert!(self.waits < 1000, "wait_events called with nothing scripted");
        if let Some(size) = self.after_wait.pop_front() {
            self.size = size;
        }
    }

    fn should_close(&self) -> bool {
        self.close_after.is_some_and(|n| self.waits >= n)
    }
}

impl HasWindowHandle for MockHost {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}

impl HasDisplayHandle for MockHost {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        Err(HandleError::Unavailable)
    }
}
