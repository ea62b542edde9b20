// SPDX-License-Identifier: CEPL-1.0
use std::time::{Duration, Instant};

/// Per-frame timing: delta, total elapsed and a once-a-second FPS sample.
#[derive(Debug, Clone)]
pub struct FrameClock {
    start: Instant,
    last: Instant,
    delta: Duration,
    frames: u32,
    window_start: Instant,
    fps: f32,
    frame_count: u64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(now: Instant) -> Self {
        Self {
            start: now,
            last: now,
            delta: Duration::ZERO,
            frames: 0,
            window_start: now,
            fps: 0.0,
            frame_count: 0,
        }
    }

    pub fn tick(&mut self) -> f32 {
        self.tick_at(Instant::now())
    }

    /// Advance to `now` and return the delta in seconds.
    pub fn tick_at(&mut self, now: Instant) -> f32 {
        self.delta = now.saturating_duration_since(self.last);
        self.last = now;
        self.frames = self.frames.saturating_add(1);
        self.frame_count += 1;

        let window = now.saturating_duration_since(self.window_start);
        if window >= Duration::from_secs(1) {
            self.fps = self.frames as f32 / window.as_secs_f32();
            self.frames = 0;
            self.window_start = now;
        }
        self.delta.as_secs_f32()
    }

    pub fn delta(&self) -> f32 {
        self.delta.as_secs_f32()
    }

    pub fn elapsed(&self) -> f32 {
        self.last.saturating_duration_since(self.start).as_secs_f32()
    }

    /// Last completed one-second sample; 0 until the first second has passed.
    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }
}

impl Default for FrameClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_is_time_since_previous_tick() {
        let t0 = Instant::now();
        let mut clock = FrameClock::starting_at(t0);
        let dt = clock.tick_at(t0 + Duration::from_millis(16));
        assert!((dt - 0.016).abs() < 1e-6);
        let dt = clock.tick_at(t0 + Duration::from_millis(48));
        assert!((dt - 0.032).abs() < 1e-6);
        assert!((clock.elapsed() - 0.048).abs() < 1e-6);
        assert_eq!(clock.frame_count(), 2);
    }

    #[test]
    fn fps_sampled_once_per_second() {
        let t0 = Instant::now();
        let mut clock = FrameClock::starting_at(t0);
        for i in 1..=59 {
            clock.tick_at(t0 + Duration::from_millis(i * 16));
        }
        assert_eq!(clock.fps(), 0.0);

        clock.tick_at(t0 + Duration::from_millis(1000));
        assert!((clock.fps() - 60.0).abs() < 0.01);
    }
}
