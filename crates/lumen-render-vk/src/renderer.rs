// SPDX-License-Identifier: CEPL-1.0
use anyhow::{anyhow, ensure, Context, Result};
use ash::vk;
use lumen_render::{
    FrameRenderer, RecreateReasons, RecreateTracker, RenderSize, SurfaceHost, SwapchainState,
};
use std::rc::Rc;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RenderError, VkResultExt};
use crate::swapchain::{pick_depth_format, SwapchainBundle, SwapchainSettings};
use crate::sync::{AcquireOutcome, FrameSync, PresentOutcome};

#[derive(Clone, Copy, Debug)]
pub struct RendererConfig {
    pub vsync: bool,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            vsync: true,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 2,
        }
    }
}

/// Block until the window has a drawable area again. `None` when the window
/// starts closing first.
fn wait_for_surface(host: &mut dyn SurfaceHost) -> Option<RenderSize> {
    loop {
        let size = host.framebuffer_size();
        if !size.is_zero() {
            return Some(size);
        }
        if host.should_close() {
            return None;
        }
        host.wait_events();
    }
}

/// Swapchain-backed frame renderer: acquire, record inside the main render
/// pass, submit, present, and rebuild the swapchain when the surface changes.
pub struct Renderer<D: Device> {
    sync: FrameSync<D>,
    swapchain: Option<SwapchainBundle<D>>,
    tracker: RecreateTracker,
    settings: SwapchainSettings,
    clear_color: [f32; 4],
    frame_active: bool,
    generation: u64,
    device: Rc<D>,
}

impl<D: Device> Renderer<D> {
    pub fn new(device: &Rc<D>, host: &mut dyn SurfaceHost, config: RendererConfig) -> Result<Self> {
        let depth_format = pick_depth_format(&**device).context("pick depth format")?;
        debug!(?depth_format, "depth format");
        let settings = SwapchainSettings {
            vsync: config.vsync,
            depth_format,
        };

        let size = wait_for_surface(host)
            .ok_or_else(|| anyhow!("window closed before it had a drawable area"))?;
        let bundle = SwapchainBundle::new(device, settings, size).context("create swapchain")?;
        let sync = FrameSync::new(device, config.max_frames_in_flight, bundle.image_count())
            .context("create frame sync objects")?;

        Ok(Self {
            sync,
            swapchain: Some(bundle),
            tracker: RecreateTracker::new(),
            settings,
            clear_color: config.clear_color,
            frame_active: false,
            generation: 0,
            device: Rc::clone(device),
        })
    }

    pub fn device(&self) -> &Rc<D> {
        &self.device
    }

    pub fn swapchain(&self) -> Option<&SwapchainBundle<D>> {
        self.swapchain.as_ref()
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.swapchain
            .as_ref()
            .map_or(vk::RenderPass::null(), SwapchainBundle::render_pass)
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain
            .as_ref()
            .map_or(vk::Extent2D::default(), SwapchainBundle::extent)
    }

    pub fn color_format(&self) -> vk::Format {
        self.swapchain
            .as_ref()
            .map_or(vk::Format::UNDEFINED, SwapchainBundle::format)
    }

    pub fn depth_format(&self) -> vk::Format {
        self.settings.depth_format
    }

    pub fn image_count(&self) -> usize {
        self.swapchain
            .as_ref()
            .map_or(0, SwapchainBundle::image_count)
    }

    pub fn image_index(&self) -> u32 {
        self.sync.image_index()
    }

    pub fn current_frame(&self) -> usize {
        self.sync.current_frame()
    }

    pub fn semaphore_pool_size(&self) -> usize {
        self.sync.pool_size()
    }

    pub fn clear_color(&self) -> [f32; 4] {
        self.clear_color
    }

    pub fn state(&self) -> SwapchainState {
        self.tracker.state()
    }

    /// Bumped on every swapchain rebuild. Anything caching swapchain-derived
    /// handles (render pass, image count) compares against it.
    pub fn swapchain_generation(&self) -> u64 {
        self.generation
    }

    /// Returns false, with the current swapchain untouched, when the window
    /// closed while it had no drawable area.
    fn rebuild(&mut self, host: &mut dyn SurfaceHost) -> Result<bool> {
        let Some(size) = wait_for_surface(host) else {
            return Ok(false);
        };
        self.device.wait_idle().call("vkDeviceWaitIdle")?;

        // Destroy-then-create; the old bundle never coexists with the new one.
        self.swapchain = None;
        let bundle = SwapchainBundle::new(&self.device, self.settings, size)
            .context("recreate swapchain")?;
        self.sync
            .rebuild_semaphores(bundle.image_count())
            .context("recreate semaphore pool")?;
        self.swapchain = Some(bundle);
        self.generation += 1;
        Ok(true)
    }

    /// Drain a pending recreate, if any. Called only between frames.
    fn process_pending(&mut self, host: &mut dyn SurfaceHost) -> Result<()> {
        let Some(reasons) = self.tracker.begin() else {
            return Ok(());
        };
        match self.rebuild(host) {
            Ok(false) => {
                debug!(?reasons, "window closing; swapchain rebuild dropped");
                self.tracker.abort(reasons);
                Ok(())
            }
            Ok(true) => {
                self.tracker.finish();
                info!(
                    ?reasons,
                    generation = self.generation,
                    "swapchain recreated"
                );
                Ok(())
            }
            Err(e) => {
                self.tracker.abort(reasons);
                Err(e)
            }
        }
    }

    fn begin_render_pass(&self, bundle: &SwapchainBundle<D>, image_index: u32) -> Result<()> {
        let framebuffer = bundle
            .framebuffer(image_index)
            .with_context(|| format!("no framebuffer for image {image_index}"))?;
        let extent = bundle.extent();
        let cmd = self.sync.command_buffer();

        let clears = [
            vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: self.clear_color,
                },
            },
            vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: 1.0,
                    stencil: 0,
                },
            },
        ];
        let rp_begin = vk::RenderPassBeginInfo {
            s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
            render_pass: bundle.render_pass(),
            framebuffer,
            render_area: vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
            clear_value_count: clears.len() as u32,
            p_clear_values: clears.as_ptr(),
            ..Default::default()
        };
        self.device.cmd_begin_render_pass(cmd, &rp_begin);
        self.device.cmd_set_viewport(
            cmd,
            vk::Viewport {
                x: 0.0,
                y: 0.0,
                width: extent.width as f32,
                height: extent.height as f32,
                min_depth: 0.0,
                max_depth: 1.0,
            },
        );
        self.device.cmd_set_scissor(
            cmd,
            vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            },
        );
        Ok(())
    }

    fn submit_and_present(&mut self, host: &mut dyn SurfaceHost) -> Result<()> {
        let cmd = self.sync.command_buffer();
        self.device.cmd_end_render_pass(cmd);
        self.sync.submit()?;

        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or(RenderError::NoSwapchain)?
            .swapchain();
        match self.sync.present(swapchain)? {
            PresentOutcome::Presented => {}
            PresentOutcome::Suboptimal => self.tracker.request(RecreateReasons::SUBOPTIMAL),
            PresentOutcome::OutOfDate => self.tracker.request(RecreateReasons::OUT_OF_DATE),
        }
        self.process_pending(host)
    }
}

impl<D: Device> FrameRenderer for Renderer<D> {
    type CommandBuffer = vk::CommandBuffer;

    fn begin_frame(&mut self, host: &mut dyn SurfaceHost) -> Result<bool> {
        ensure!(!self.frame_active, "begin_frame called while a frame is open");

        // A previous rebuild failed; retry before touching the swapchain.
        if self.swapchain.is_none() {
            self.process_pending(host)?;
            if self.swapchain.is_none() {
                return Ok(false);
            }
        }
        let swapchain = self
            .swapchain
            .as_ref()
            .ok_or(RenderError::NoSwapchain)?
            .swapchain();

        match self.sync.acquire(swapchain)? {
            AcquireOutcome::OutOfDate => {
                self.tracker.request(RecreateReasons::OUT_OF_DATE);
                self.process_pending(host)?;
                Ok(false)
            }
            AcquireOutcome::Acquired { image_index, .. } => {
                let bundle = self.swapchain.as_ref().ok_or(RenderError::NoSwapchain)?;
                self.begin_render_pass(bundle, image_index)?;
                self.frame_active = true;
                Ok(true)
            }
        }
    }

    fn end_frame(&mut self, host: &mut dyn SurfaceHost) -> Result<()> {
        ensure!(self.frame_active, "end_frame without a successful begin_frame");
        self.frame_active = false;

        let result = self.submit_and_present(host);
        // Advances even when the swapchain was rebuilt or present failed.
        self.sync.advance_frame();
        result
    }

    fn command_buffer(&self) -> vk::CommandBuffer {
        self.sync.command_buffer()
    }

    fn on_resize(&mut self, size: RenderSize) {
        debug!(width = size.width, height = size.height, "resize flagged");
        self.tracker.request(RecreateReasons::RESIZED);
    }

    fn set_clear_color(&mut self, rgba: [f32; 4]) {
        self.clear_color = rgba;
    }

    fn set_vsync(&mut self, on: bool) {
        if self.settings.vsync != on {
            self.settings.vsync = on;
            self.tracker.request(RecreateReasons::SETTINGS_CHANGED);
        }
    }

    fn wait_idle(&self) -> Result<()> {
        self.device.wait_idle().call("vkDeviceWaitIdle")?;
        Ok(())
    }
}

impl<D: Device> Drop for Renderer<D> {
    fn drop(&mut self) {
        let _ = self.device.wait_idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockDevice, MockHost};

    fn renderer(device: &Rc<MockDevice>, host: &mut MockHost) -> Renderer<MockDevice> {
        Renderer::new(device, host, RendererConfig::default()).unwrap()
    }

    fn frame(r: &mut Renderer<MockDevice>, host: &mut MockHost) -> bool {
        if !r.begin_frame(host).unwrap() {
            return false;
        }
        r.end_frame(host).unwrap();
        true
    }

    #[test]
    fn acquire_out_of_date_skips_frame_and_rebuilds_for_new_image_count() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(800, 600);
        let mut r = renderer(&device, &mut host);
        assert!(frame(&mut r, &mut host));
        assert_eq!(r.image_count(), 3);

        device.set_image_count_range(4, 8);
        device.script_acquire(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert!(!r.begin_frame(&mut host).unwrap());

        let queried = device.last_swapchain().unwrap().images.len();
        let bundle = r.swapchain().unwrap();
        assert_eq!(queried, 5);
        assert_eq!(bundle.image_count(), queried);
        assert_eq!(bundle.image_view_count(), queried);
        assert_eq!(bundle.framebuffer_count(), queried);
        assert_eq!(r.semaphore_pool_size(), queried + 1);
        assert_eq!(r.swapchain_generation(), 1);
        assert_eq!(r.state(), SwapchainState::Active);

        assert!(frame(&mut r, &mut host));
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn minimize_restore_round_trip_leaks_nothing() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(800, 600);
        {
            let mut r = renderer(&device, &mut host);
            assert!(frame(&mut r, &mut host));

            host.set_size(0, 0);
            r.on_resize(RenderSize::new(0, 0));
            host.queue_size_after_wait(0, 0);
            host.queue_size_after_wait(800, 600);
            assert!(frame(&mut r, &mut host));
            assert_eq!(host.waits, 2);
            assert_eq!(r.swapchain_generation(), 1);
            assert_eq!((r.extent().width, r.extent().height), (800, 600));

            assert!(frame(&mut r, &mut host));
        }
        for kind in ["swapchain", "semaphore", "fence", "framebuffer", "image_view", "image"] {
            assert_eq!(device.created(kind), device.destroyed(kind), "{kind} leaked");
        }
        assert_eq!(device.live_total(), 0);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn creation_waits_out_a_minimized_window() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(0, 0);
        host.queue_size_after_wait(320, 200);
        let r = renderer(&device, &mut host);
        assert_eq!(host.waits, 1);
        assert_eq!((r.extent().width, r.extent().height), (320, 200));
    }

    #[test]
    fn same_size_resizes_keep_count_and_format() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(1024, 768);
        let mut r = renderer(&device, &mut host);
        let (count, format) = (r.image_count(), r.color_format());
        for i in 1..=4 {
            r.on_resize(RenderSize::new(1024, 768));
            assert!(frame(&mut r, &mut host));
            assert_eq!(r.image_count(), count);
            assert_eq!(r.color_format(), format);
            assert_eq!(r.swapchain_generation(), i);
        }
    }

    #[test]
    fn triggers_in_one_frame_rebuild_once() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(800, 600);
        let mut r = renderer(&device, &mut host);
        r.on_resize(RenderSize::new(800, 600));
        r.on_resize(RenderSize::new(800, 600));
        device.script_present(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
        assert!(frame(&mut r, &mut host));
        assert_eq!(r.swapchain_generation(), 1);
        assert_eq!(device.created("swapchain"), 2);
    }

    #[test]
    fn suboptimal_present_rebuilds_at_frame_end() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(800, 600);
        let mut r = renderer(&device, &mut host);
        device.script_acquire(Ok(true));
        assert!(r.begin_frame(&mut host).unwrap());
        assert_eq!(r.swapchain_generation(), 0);
        device.script_present(Ok(true));
        r.end_frame(&mut host).unwrap();
        assert_eq!(r.swapchain_generation(), 1);
        assert_eq!(r.current_frame(), 1);
    }

    #[test]
    fn frame_index_advances_through_recreate() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(800, 600);
        let mut r = renderer(&device, &mut host);
        let mut seen = Vec::new();
        for i in 0..5 {
            seen.push(r.current_frame());
            if i == 2 {
                r.on_resize(RenderSize::new(640, 480));
                host.set_size(640, 480);
            }
            assert!(frame(&mut r, &mut host));
        }
        assert_eq!(seen, vec![0, 1, 0, 1, 0]);
        assert_eq!((r.extent().width, r.extent().height), (640, 480));
    }

    #[test]
    fn vsync_toggle_switches_present_mode() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(800, 600);
        let mut r = renderer(&device, &mut host);
        assert_eq!(r.swapchain().unwrap().present_mode(), vk::PresentModeKHR::FIFO);
        r.set_vsync(false);
        assert_eq!(r.state(), SwapchainState::PendingRecreate);
        assert!(frame(&mut r, &mut host));
        assert_eq!(r.swapchain().unwrap().present_mode(), vk::PresentModeKHR::MAILBOX);
        r.set_vsync(false);
        assert_eq!(r.state(), SwapchainState::Active);
    }

    #[test]
    fn render_pass_targets_acquired_image() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(800, 600);
        let mut r = renderer(&device, &mut host);
        device.script_image_order(&[2, 0]);
        for expected in [2, 0] {
            assert!(r.begin_frame(&mut host).unwrap());
            assert_eq!(r.image_index(), expected);
            let (pass, fb, extent) = *device.render_pass_begins().last().unwrap();
            let bundle = r.swapchain().unwrap();
            assert_eq!(pass, bundle.render_pass());
            assert_eq!(Some(fb), bundle.framebuffer(expected));
            assert_eq!((extent.width, extent.height), (800, 600));
            r.end_frame(&mut host).unwrap();
        }
    }

    #[test]
    fn steady_state_respects_fence_bound() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(800, 600);
        let mut r = renderer(&device, &mut host);
        for _ in 0..32 {
            assert!(frame(&mut r, &mut host));
        }
        assert!(device.max_outstanding() <= 2);
        assert_eq!(device.presents(), 32);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn failed_rebuild_is_retried_next_frame() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(800, 600);
        let mut r = renderer(&device, &mut host);
        assert!(frame(&mut r, &mut host));

        r.on_resize(RenderSize::new(800, 600));
        device.fail_next("swapchain");
        assert!(r.begin_frame(&mut host).unwrap());
        assert!(r.end_frame(&mut host).is_err());
        assert_eq!(r.state(), SwapchainState::PendingRecreate);
        assert!(r.swapchain().is_none());
        assert_eq!(r.swapchain_generation(), 0);

        assert!(frame(&mut r, &mut host));
        assert_eq!(r.state(), SwapchainState::Active);
        assert_eq!(r.swapchain_generation(), 1);
        assert!(frame(&mut r, &mut host));
        drop(r);
        assert_eq!(device.live_total(), 0);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn failed_semaphore_rebuild_is_retried() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(800, 600);
        let mut r = renderer(&device, &mut host);
        r.on_resize(RenderSize::new(800, 600));
        device.fail_next("semaphore");
        assert!(r.begin_frame(&mut host).unwrap());
        assert!(r.end_frame(&mut host).is_err());
        assert_eq!(r.state(), SwapchainState::PendingRecreate);

        assert!(frame(&mut r, &mut host));
        assert_eq!(r.semaphore_pool_size(), r.image_count() + 1);
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn closing_while_minimized_stops_waiting() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(800, 600);
        let mut r = renderer(&device, &mut host);
        assert!(frame(&mut r, &mut host));

        host.set_size(0, 0);
        r.on_resize(RenderSize::new(0, 0));
        host.close_after_waits(2);
        assert!(r.begin_frame(&mut host).unwrap());
        r.end_frame(&mut host).unwrap();
        assert_eq!(host.waits, 2);
        // The old swapchain is kept; nothing was torn down for a closing window.
        assert!(r.swapchain().is_some());
        assert_eq!(r.swapchain_generation(), 0);
        assert_eq!(r.state(), SwapchainState::PendingRecreate);
    }

    #[test]
    fn creation_fails_when_closed_before_drawable() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(0, 0);
        host.close_after_waits(1);
        assert!(Renderer::new(&device, &mut host, RendererConfig::default()).is_err());
        assert_eq!(host.waits, 1);
        assert_eq!(device.created("swapchain"), 0);
    }

    #[test]
    fn oversized_frames_in_flight_never_reuse_a_pending_semaphore() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(800, 600);
        let config = RendererConfig {
            max_frames_in_flight: 8,
            ..RendererConfig::default()
        };
        let mut r = Renderer::new(&device, &mut host, config).unwrap();
        for _ in 0..24 {
            assert!(frame(&mut r, &mut host));
        }
        assert!(device.max_outstanding() <= r.semaphore_pool_size());
        assert!(device.violations().is_empty(), "{:?}", device.violations());
    }

    #[test]
    fn unbalanced_frame_calls_are_errors() {
        let device = Rc::new(MockDevice::new());
        let mut host = MockHost::new(800, 600);
        let mut r = renderer(&device, &mut host);
        assert!(r.end_frame(&mut host).is_err());
        assert!(r.begin_frame(&mut host).unwrap());
        assert!(r.begin_frame(&mut host).is_err());
        r.end_frame(&mut host).unwrap();
    }
}
