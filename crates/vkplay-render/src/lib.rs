// SPDX-License-Identifier: CEPL-1.0
//! Backend-agnostic half of the renderer: the per-frame state machine, the
//! invalidation detector, and the seams a GPU backend and a window provider
//! plug into.

pub mod backend;
pub mod detector;
pub mod frame;
pub mod presenter;
pub mod scheduler;
pub mod vertex;
pub mod window;

#[cfg(test)]
pub(crate) mod mock;

pub use backend::{Acquire, FrameBackend, Present, SwapchainInfo, SwapchainRequest};
pub use detector::{InvalidationDetector, Observation};
pub use frame::{FrameRequest, VsyncToggle};
pub use presenter::{Presenter, PresenterConfig, TickOutcome};
pub use scheduler::{FrameError, FrameOutcome, FrameScheduler, FrameState, SuboptimalPolicy};
pub use vertex::{AttributeFormat, Vertex, VertexAttribute, VertexLayout, TRIANGLE};
pub use window::WindowSource;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RenderSize {
    pub width: u32,
    pub height: u32,
}

impl RenderSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// A zero-area drawable (minimized window) cannot back a swapchain.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for RenderSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}
