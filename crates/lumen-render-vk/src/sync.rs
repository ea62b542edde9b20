// SPDX-License-Identifier: CEPL-1.0
//! Per-frame fences and the rotating semaphore pool.
//!
//! Frame slots (one fence + one command buffer each) live as long as the
//! renderer. The semaphore pool is tied to the swapchain image count and is
//! rebuilt with it. Semaphores are borrowed from the pool per acquire rather
//! than owned by a slot, because acquire may return images out of order and
//! a slot-owned semaphore could be reused while the GPU still waits on it.
use anyhow::{Context, Result};
use ash::vk;
use lumen_render::FrameCounters;
use std::rc::Rc;
use tracing::{trace, warn};

use crate::device::{Device, Owned, SubmitDesc};
use crate::error::{RenderError, VkResultExt};

pub struct FrameSlot<D: Device> {
    command_buffer: vk::CommandBuffer,
    in_flight: Owned<D, vk::Fence>,
    acquire_semaphore: vk::Semaphore,
    render_finished_semaphore: vk::Semaphore,
}

impl<D: Device> FrameSlot<D> {
    fn new(device: &Rc<D>, command_buffer: vk::CommandBuffer) -> Result<Self> {
        // Signaled so the very first wait on this slot returns immediately.
        let fence = device.create_fence(true).call("vkCreateFence")?;
        Ok(Self {
            command_buffer,
            in_flight: Owned::new(device, fence),
            acquire_semaphore: vk::Semaphore::null(),
            render_finished_semaphore: vk::Semaphore::null(),
        })
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.command_buffer
    }

    pub fn fence(&self) -> vk::Fence {
        self.in_flight.raw()
    }
}

/// `image_count + 1` acquire semaphores and as many render-finished ones.
pub struct SemaphorePool<D: Device> {
    image_available: Vec<Owned<D, vk::Semaphore>>,
    render_finished: Vec<Owned<D, vk::Semaphore>>,
}

impl<D: Device> SemaphorePool<D> {
    pub fn new(device: &Rc<D>, image_count: usize) -> Result<Self> {
        let size = image_count + 1;
        let make = || -> Result<Vec<Owned<D, vk::Semaphore>>> {
            (0..size)
                .map(|_| {
                    let raw = device.create_semaphore().call("vkCreateSemaphore")?;
                    Ok(Owned::new(device, raw))
                })
                .collect()
        };
        let image_available = make()?;
        let render_finished = make()?;
        Ok(Self {
            image_available,
            render_finished,
        })
    }

    pub fn len(&self) -> usize {
        self.image_available.len()
    }

    pub fn is_empty(&self) -> bool {
        self.image_available.is_empty()
    }

    fn pair(&self, index: usize) -> (vk::Semaphore, vk::Semaphore) {
        (
            self.image_available[index].raw(),
            self.render_finished[index].raw(),
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// Recording has begun on the slot's command buffer. A suboptimal
    /// acquire still renders; present reports it again.
    Acquired { image_index: u32, suboptimal: bool },
    /// Nothing was recorded and the slot fence was left signaled.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PresentOutcome {
    Presented,
    Suboptimal,
    OutOfDate,
}

/// A frame may only reuse a pool semaphore once the submission that waited
/// on it has retired, so no more frames than pool entries are ever in flight.
fn usable_frames(requested: usize, pool_size: usize) -> usize {
    if requested > pool_size {
        warn!(
            requested,
            pool_size, "frames in flight exceeds the semaphore pool; clamping"
        );
    }
    requested.min(pool_size).max(1)
}

pub struct FrameSync<D: Device> {
    device: Rc<D>,
    /// One per requested frame in flight; only the first
    /// `counters.frames_in_flight()` are cycled.
    slots: Vec<FrameSlot<D>>,
    pool: SemaphorePool<D>,
    counters: FrameCounters,
}

impl<D: Device> FrameSync<D> {
    pub fn new(device: &Rc<D>, frames_in_flight: usize, image_count: usize) -> Result<Self> {
        let frames_in_flight = frames_in_flight.max(1);
        let command_buffers = device
            .allocate_command_buffers(frames_in_flight as u32)
            .call("vkAllocateCommandBuffers")?;

        let mut slots = Vec::with_capacity(frames_in_flight);
        for &cmd in &command_buffers {
            match FrameSlot::new(device, cmd) {
                Ok(slot) => slots.push(slot),
                Err(e) => {
                    device.free_command_buffers(&command_buffers);
                    return Err(e);
                }
            }
        }
        let pool = match SemaphorePool::new(device, image_count) {
            Ok(pool) => pool,
            Err(e) => {
                device.free_command_buffers(&command_buffers);
                return Err(e);
            }
        };
        let counters = FrameCounters::new(usable_frames(frames_in_flight, pool.len()), pool.len());

        Ok(Self {
            device: Rc::clone(device),
            slots,
            pool,
            counters,
        })
    }

    pub fn counters(&self) -> &FrameCounters {
        &self.counters
    }

    pub fn current_frame(&self) -> usize {
        self.counters.frame()
    }

    pub fn image_index(&self) -> u32 {
        self.counters.image()
    }

    pub fn pool_size(&self) -> usize {
        self.pool.len()
    }

    pub fn current_slot(&self) -> &FrameSlot<D> {
        &self.slots[self.counters.frame()]
    }

    pub fn command_buffer(&self) -> vk::CommandBuffer {
        self.current_slot().command_buffer
    }

    /// Wait for this slot's previous submission, acquire an image and start
    /// recording.
    pub fn acquire(&mut self, swapchain: vk::SwapchainKHR) -> Result<AcquireOutcome> {
        let frame = self.counters.frame();
        let fence = self.slots[frame].in_flight.raw();

        // Backpressure: at most `frames_in_flight` submissions outstanding.
        self.device
            .wait_for_fence(fence, u64::MAX)
            .call("vkWaitForFences")?;

        let (image_available, render_finished) = self.pool.pair(self.counters.semaphore());
        let (image_index, suboptimal) =
            match self.device.acquire_next_image(swapchain, u64::MAX, image_available) {
                Ok(res) => res,
                Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => return Ok(AcquireOutcome::OutOfDate),
                Err(result) => {
                    return Err(RenderError::Vk {
                        call: "vkAcquireNextImageKHR",
                        result,
                    }
                    .into())
                }
            };
        if suboptimal {
            trace!(image_index, "acquire reported suboptimal swapchain");
        }

        let slot = &mut self.slots[frame];
        slot.acquire_semaphore = image_available;
        slot.render_finished_semaphore = render_finished;
        self.counters.take_semaphore();
        self.counters.set_image(image_index);

        // Only reset once we know work will be submitted against it.
        self.device.reset_fence(fence).call("vkResetFences")?;
        let cmd = slot.command_buffer;
        self.device
            .reset_command_buffer(cmd)
            .call("vkResetCommandBuffer")?;
        self.device
            .begin_command_buffer(cmd, vk::CommandBufferUsageFlags::empty())
            .call("vkBeginCommandBuffer")?;

        Ok(AcquireOutcome::Acquired {
            image_index,
            suboptimal,
        })
    }

    /// End recording and submit: wait on the acquire semaphore at color
    /// output, signal render-finished and the slot fence.
    pub fn submit(&mut self) -> Result<()> {
        let slot = &self.slots[self.counters.frame()];
        self.device
            .end_command_buffer(slot.command_buffer)
            .call("vkEndCommandBuffer")?;

        let command_buffers = [slot.command_buffer];
        let wait_semaphores = [slot.acquire_semaphore];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let signal_semaphores = [slot.render_finished_semaphore];
        self.device
            .queue_submit(&SubmitDesc {
                command_buffers: &command_buffers,
                wait_semaphores: &wait_semaphores,
                wait_stages: &wait_stages,
                signal_semaphores: &signal_semaphores,
                fence: slot.in_flight.raw(),
            })
            .call("vkQueueSubmit")?;
        Ok(())
    }

    pub fn present(&self, swapchain: vk::SwapchainKHR) -> Result<PresentOutcome> {
        let slot = self.current_slot();
        match self.device.queue_present(
            swapchain,
            self.counters.image(),
            slot.render_finished_semaphore,
        ) {
            Ok(false) => Ok(PresentOutcome::Presented),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(result) => Err(RenderError::Vk {
                call: "vkQueuePresentKHR",
                result,
            }
            .into()),
        }
    }

    pub fn advance_frame(&mut self) {
        self.counters.advance_frame();
    }

    /// Replace the pool for a new image count. The caller must have idled
    /// the device: old semaphores are destroyed here.
    pub fn rebuild_semaphores(&mut self, image_count: usize) -> Result<()> {
        for slot in &mut self.slots {
            slot.acquire_semaphore = vk::Semaphore::null();
            slot.render_finished_semaphore = vk::Semaphore::null();
        }
        // Old pool goes first so both never coexist.
        self.pool = SemaphorePool {
            image_available: Vec::new(),
            render_finished: Vec::new(),
        };
        self.pool = SemaphorePool::new(&self.device, image_count)
            .context("rebuild semaphore pool")?;
        self.counters.reset_pool(self.pool.len());
        self.counters
            .set_frames_in_flight(usable_frames(self.slots.len(), self.pool.len()));
        Ok(())
    }
}

impl<D: Device> Drop for FrameSync<D> {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
        let buffers: Vec<_> = self.slots.iter().map(|s| s.command_buffer).collect();
        self.device.free_command_buffers(&buffers);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockDevice;
    use crate::swapchain::{SwapchainBundle, SwapchainSettings};
    use lumen_render::RenderSize;

    fn setup(frames_in_flight: usize) -> (Rc<MockDevice>, SwapchainBundle<MockDevice>, FrameSync<MockDevice>) {
        let device = Rc::new(MockDevice::new());
        let bundle = SwapchainBundle::new(
            &device,
            SwapchainSettings {
                vsync: true,
                depth_format: vk::Format::D32_SFLOAT,
            },
            RenderSize::new(640, 480),
        )
        .unwrap();
        let sync = FrameSync::new(&device, frames_in_flight, bundle.image_count()).unwrap();
        (device, bundle, sync)
    }

    fn run_frame(sync: &mut FrameSync<MockDevice>, swapchain: vk::SwapchainKHR) {
        let outcome = sync.acquire(swapchain).unwrap();
        assert!(matches!(outcome, AcquireOutcome::Acquired { .. }));
        sync.submit().unwrap();
        assert_eq!(sync.present(swapchain).unwrap(), PresentOutcome::Presented);
        sync.advance_frame();
    }

    #[test]
    fn pool_is_image_count_plus_one() {
        let (device, bundle, sync) = setup(2);
        assert_eq!(bundle.image_count(), 3);
        assert_eq!(sync.pool_size(), 4);
        assert_eq!(sync.counters().pool_size(), 4);
        assert_eq!(device.live("semaphore"), 8);
        assert_eq!(device.live("fence"), 2);
    }

    #[test]
    fn outstanding_work_never_exceeds_frames_in_flight() {
        let (device, bundle, mut sync) = setup(2);
        for _ in 0..20 {
            run_frame(&mut sync, bundle.swapchain());
            assert!(device.outstanding() <= 2);
        }
        assert_eq!(device.max_outstanding(), 2);
        assert_eq!(device.submits(), 20);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn third_frame_waits_on_first_frames_fence() {
        let (device, bundle, mut sync) = setup(2);
        let sc = bundle.swapchain();
        let fence0 = sync.slots[0].fence();
        let fence1 = sync.slots[1].fence();

        run_frame(&mut sync, sc);
        run_frame(&mut sync, sc);
        assert!(!device.is_signaled(fence0));
        assert!(!device.is_signaled(fence1));

        sync.acquire(sc).unwrap();
        assert_eq!(device.fence_waits(), vec![fence0, fence1, fence0]);
        // Frame 1's work is still in flight; only frame 0's was retired.
        assert_eq!(device.outstanding(), 1);
        assert!(!device.is_signaled(fence1));
    }

    #[test]
    fn out_of_order_images_never_reuse_a_pending_semaphore() {
        let (device, bundle, mut sync) = setup(2);
        device.script_image_order(&[2, 0, 0, 1, 2, 2, 1, 0, 1, 2, 0, 2]);
        for _ in 0..12 {
            run_frame(&mut sync, bundle.swapchain());
        }
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn acquire_out_of_date_leaves_fence_signaled() {
        let (device, bundle, mut sync) = setup(2);
        let fence0 = sync.slots[0].fence();
        device.script_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert_eq!(sync.acquire(bundle.swapchain()).unwrap(), AcquireOutcome::OutOfDate);
        assert!(device.is_signaled(fence0));
        assert_eq!(sync.counters().semaphore(), 0);

        // The same slot can be used again without deadlocking on its fence.
        run_frame(&mut sync, bundle.swapchain());
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn present_results_map_to_outcomes() {
        let (device, bundle, mut sync) = setup(2);
        let sc = bundle.swapchain();
        device.script_present(Ok(true));
        device.script_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        for expected in [PresentOutcome::Suboptimal, PresentOutcome::OutOfDate] {
            sync.acquire(sc).unwrap();
            sync.submit().unwrap();
            assert_eq!(sync.present(sc).unwrap(), expected);
            sync.advance_frame();
        }
    }

    #[test]
    fn rebuild_replaces_every_semaphore() {
        let (device, bundle, mut sync) = setup(2);
        run_frame(&mut sync, bundle.swapchain());
        device.wait_idle().unwrap();
        sync.rebuild_semaphores(5).unwrap();
        assert_eq!(sync.pool_size(), 6);
        assert_eq!(sync.counters().semaphore(), 0);
        assert_eq!(device.destroyed("semaphore"), 8);
        assert_eq!(device.live("semaphore"), 12);
    }

    #[test]
    fn frames_in_flight_is_clamped_to_the_pool() {
        let (device, bundle, mut sync) = setup(5);
        assert_eq!(sync.pool_size(), 4);
        assert_eq!(sync.counters().frames_in_flight(), 4);
        let unused = sync.slots[4].fence();
        for _ in 0..10 {
            run_frame(&mut sync, bundle.swapchain());
        }
        assert!(device.violations().is_empty(), "{:?}", device.violations());
        assert!(device.max_outstanding() <= 4);
        assert!(!device.fence_waits().contains(&unused));
    }

    #[test]
    fn shrinking_rebuild_lowers_frames_in_flight() {
        let (device, bundle, mut sync) = setup(4);
        assert_eq!(sync.counters().frames_in_flight(), 4);
        for _ in 0..3 {
            run_frame(&mut sync, bundle.swapchain());
        }
        device.wait_idle().unwrap();
        sync.rebuild_semaphores(2).unwrap();
        assert_eq!(sync.pool_size(), 3);
        assert_eq!(sync.counters().frames_in_flight(), 3);
        assert_eq!(sync.current_frame(), 0);
        for _ in 0..10 {
            run_frame(&mut sync, bundle.swapchain());
        }
        assert!(device.violations().is_empty(), "{:?}", device.violations());
        assert!(device.outstanding() <= 3);

        // Growing again restores the requested count.
        device.wait_idle().unwrap();
        sync.rebuild_semaphores(5).unwrap();
        assert_eq!(sync.counters().frames_in_flight(), 4);
    }

    #[test]
    fn drop_releases_slots_and_pool() {
        let (device, bundle, sync) = setup(3);
        drop(sync);
        drop(bundle);
        assert_eq!(device.live_total(), 0);
        assert_eq!(device.created("command_buffer"), 3);
    }
}
