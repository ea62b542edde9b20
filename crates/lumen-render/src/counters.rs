// SPDX-License-Identifier: CEPL-1.0

/// The three indices a frame needs.
///
/// * `frame` picks the fence and command buffer, modulo frames in flight.
/// * `image` is whatever the presentation engine handed back on acquire.
/// * `semaphore` rotates over the semaphore pool on its own schedule, since
///   acquire may return images out of order.
#[derive(Debug, Clone)]
pub struct FrameCounters {
    frames_in_flight: usize,
    frame: usize,
    image: u32,
    semaphore: usize,
    pool_size: usize,
}

impl FrameCounters {
    pub fn new(frames_in_flight: usize, pool_size: usize) -> Self {
        Self {
            frames_in_flight: frames_in_flight.max(1),
            frame: 0,
            image: 0,
            semaphore: 0,
            pool_size: pool_size.max(1),
        }
    }

    pub fn frame(&self) -> usize {
        self.frame
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames_in_flight
    }

    pub fn image(&self) -> u32 {
        self.image
    }

    pub fn set_image(&mut self, index: u32) {
        self.image = index;
    }

    pub fn semaphore(&self) -> usize {
        self.semaphore
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Hand out the current semaphore slot and rotate.
    pub fn take_semaphore(&mut self) -> usize {
        let slot = self.semaphore;
        self.semaphore = (self.semaphore + 1) % self.pool_size;
        slot
    }

    pub fn advance_frame(&mut self) {
        self.frame = (self.frame + 1) % self.frames_in_flight;
    }

    /// Change how many frames may be in flight. The frame index wraps into
    /// the new range; callers do this only with the device idle.
    pub fn set_frames_in_flight(&mut self, frames_in_flight: usize) {
        self.frames_in_flight = frames_in_flight.max(1);
        self.frame %= self.frames_in_flight;
    }

    /// The pool was rebuilt with a new size; start rotating from zero again.
    pub fn reset_pool(&mut self, pool_size: usize) {
        self.pool_size = pool_size.max(1);
        self.semaphore = 0;
    }
}
