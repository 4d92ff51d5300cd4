// SPDX-License-Identifier: CEPL-1.0
use crate::RenderSize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Observation {
    /// Zero-area or iconified drawable: do not touch the swapchain this iteration.
    Minimized,
    /// Swapchain must be rebuilt before acquiring.
    Rebuild,
    /// Current swapchain is still valid.
    Ready,
}

/// Decides, once per iteration and before acquiring, whether the swapchain
/// still matches the window.
#[derive(Debug, Default)]
pub struct InvalidationDetector {
    last_size: Option<RenderSize>,
    built_vsync: Option<bool>,
    pending: bool,
}

impl InvalidationDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, size: RenderSize, iconified: bool, vsync: bool) -> Observation {
        if iconified || size.is_empty() {
            // The surface extent collapsed; whatever swapchain exists is stale
            // once the window comes back.
            if self.last_size.is_some() {
                self.pending = true;
            }
            return Observation::Minimized;
        }

        if self.pending || self.last_size != Some(size) || self.built_vsync != Some(vsync) {
            Observation::Rebuild
        } else {
            Observation::Ready
        }
    }

    /// Record a completed rebuild.
    pub fn rebuilt(&mut self, size: RenderSize, vsync: bool) {
        self.last_size = Some(size);
        self.built_vsync = Some(vsync);
        self.pending = false;
    }

    /// Request a rebuild at the top of the next iteration.
    pub fn invalidate(&mut self) {
        self.pending = true;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn last_size(&self) -> Option<RenderSize> {
        self.last_size
    }
}
