// SPDX-License-Identifier: CEPL-1.0
//! The GPU seam. The scheduler and presenter only ever talk to a backend
//! through this trait; the Vulkan implementation lives in `vkplay-render-vk`.

use anyhow::Result;

use crate::{FrameRequest, RenderSize};

/// Result of asking the swapchain for the next image.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Acquire {
    /// Image is usable. `suboptimal` means the surface changed and a rebuild
    /// is due, but this image may still be rendered.
    Ready { image: u32, suboptimal: bool },
    /// Surface no longer matches the swapchain; nothing was acquired.
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Present {
    Done,
    Suboptimal,
    OutOfDate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainRequest {
    pub size: RenderSize,
    pub vsync: bool,
    pub min_image_count: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapchainInfo {
    /// Extent the swapchain was actually built with.
    pub extent: RenderSize,
    pub image_count: u32,
    /// Number of frame slots (sync + command resources) in the ring.
    pub slot_count: usize,
}

/// Frame-slot indexed GPU operations. `slot` is always below the
/// `slot_count` returned by the last successful `rebuild`.
pub trait FrameBackend {
    /// Drain GPU work, destroy the current swapchain resources (if any) and
    /// build new ones.
    fn rebuild(&mut self, request: SwapchainRequest) -> Result<SwapchainInfo>;

    /// Acquire the next image, signalling the slot's image-acquired semaphore.
    fn acquire(&mut self, slot: usize) -> Result<Acquire>;

    /// Block until the slot's previous submission finished, then reset its fence.
    fn wait_slot(&mut self, slot: usize) -> Result<()>;

    fn record(&mut self, slot: usize, image: u32, frame: &FrameRequest<'_>) -> Result<()>;

    fn submit(&mut self, slot: usize) -> Result<()>;

    fn present(&mut self, slot: usize, image: u32) -> Result<Present>;

    /// Wait until the device has no outstanding work.
    fn drain(&mut self) -> Result<()>;
}
