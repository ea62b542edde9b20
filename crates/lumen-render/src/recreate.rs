// SPDX-License-Identifier: CEPL-1.0
use bitflags::bitflags;
use tracing::debug;

bitflags! {
    /// Why the swapchain has to be rebuilt. Several can pile up between two
    /// frame boundaries; they are handled by a single rebuild.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RecreateReasons: u8 {
        const RESIZED = 1 << 0;
        const OUT_OF_DATE = 1 << 1;
        const SUBOPTIMAL = 1 << 2;
        const SETTINGS_CHANGED = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainState {
    Active,
    PendingRecreate,
    Recreating,
}

/// Active -> PendingRecreate -> Recreating -> Active.
///
/// Every trigger (window resize, acquire out-of-date, present
/// out-of-date/suboptimal, settings change) goes through `request`, and the
/// owner drains it once per frame boundary with `begin`/`finish`.
#[derive(Debug, Clone)]
pub struct RecreateTracker {
    state: SwapchainState,
    pending: RecreateReasons,
    rebuilds: u64,
}

impl RecreateTracker {
    pub fn new() -> Self {
        Self {
            state: SwapchainState::Active,
            pending: RecreateReasons::empty(),
            rebuilds: 0,
        }
    }

    pub fn state(&self) -> SwapchainState {
        self.state
    }

    pub fn is_pending(&self) -> bool {
        self.state == SwapchainState::PendingRecreate
    }

    pub fn pending_reasons(&self) -> RecreateReasons {
        self.pending
    }

    /// Completed rebuilds since construction.
    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    pub fn request(&mut self, reasons: RecreateReasons) {
        if reasons.is_empty() {
            return;
        }
        self.pending |= reasons;
        match self.state {
            SwapchainState::Active => {
                debug!(?reasons, "swapchain recreate requested");
                self.state = SwapchainState::PendingRecreate;
            }
            // Coalesce. A request that lands mid-rebuild is kept for the next boundary.
            SwapchainState::PendingRecreate | SwapchainState::Recreating => {}
        }
    }

    /// Enter Recreating if something is pending and hand back the reasons.
    pub fn begin(&mut self) -> Option<RecreateReasons> {
        if self.state != SwapchainState::PendingRecreate {
            return None;
        }
        self.state = SwapchainState::Recreating;
        Some(std::mem::take(&mut self.pending))
    }

    pub fn finish(&mut self) {
        if self.state != SwapchainState::Recreating {
            return;
        }
        self.rebuilds += 1;
        self.state = if self.pending.is_empty() {
            SwapchainState::Active
        } else {
            SwapchainState::PendingRecreate
        };
    }

    /// The rebuild failed; keep it pending so the next boundary retries.
    pub fn abort(&mut self, reasons: RecreateReasons) {
        if self.state != SwapchainState::Recreating {
            return;
        }
        self.pending |= reasons;
        self.state = SwapchainState::PendingRecreate;
    }
}

impl Default for RecreateTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn triggers_coalesce_into_one_rebuild() {
        let mut t = RecreateTracker::new();
        t.request(RecreateReasons::RESIZED);
        t.request(RecreateReasons::SUBOPTIMAL);
        t.request(RecreateReasons::RESIZED);
        assert_eq!(t.state(), SwapchainState::PendingRecreate);

        let reasons = t.begin().unwrap();
        assert_eq!(reasons, RecreateReasons::RESIZED | RecreateReasons::SUBOPTIMAL);
        assert_eq!(t.state(), SwapchainState::Recreating);
        assert!(t.begin().is_none());

        t.finish();
        assert_eq!(t.state(), SwapchainState::Active);
        assert_eq!(t.rebuilds(), 1);
        assert!(t.begin().is_none());
    }

    #[test]
    fn request_during_rebuild_stays_pending() {
        let mut t = RecreateTracker::new();
        t.request(RecreateReasons::OUT_OF_DATE);
        t.begin();
        t.request(RecreateReasons::RESIZED);
        t.finish();
        assert_eq!(t.state(), SwapchainState::PendingRecreate);
        assert_eq!(t.pending_reasons(), RecreateReasons::RESIZED);
    }

    #[test]
    fn abort_returns_to_pending() {
        let mut t = RecreateTracker::new();
        t.request(RecreateReasons::SETTINGS_CHANGED);
        let reasons = t.begin().unwrap();
        t.abort(reasons);
        assert!(t.is_pending());
        assert_eq!(t.rebuilds(), 0);
        assert_eq!(t.begin(), Some(RecreateReasons::SETTINGS_CHANGED));
    }

    #[test]
    fn empty_request_is_ignored() {
        let mut t = RecreateTracker::new();
        t.request(RecreateReasons::empty());
        assert_eq!(t.state(), SwapchainState::Active);
    }
}
