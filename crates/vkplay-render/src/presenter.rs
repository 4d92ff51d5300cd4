// SPDX-License-Identifier: CEPL-1.0
//! Ties the detector and the scheduler to a backend: one `tick` per loop
//! iteration, rebuilding in place whenever the detector asks for it.

use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, info};

use crate::backend::{FrameBackend, SwapchainInfo, SwapchainRequest};
use crate::detector::{InvalidationDetector, Observation};
use crate::scheduler::{FrameOutcome, FrameScheduler, SuboptimalPolicy};
use crate::{FrameRequest, RenderSize, VsyncToggle, WindowSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PresenterConfig {
    /// Requested swapchain image count; clamped to at least 2 by the backend.
    pub min_image_count: u32,
    /// Sleep substituted for a frame while the window is minimized.
    pub idle_pause: Duration,
    pub suboptimal: SuboptimalPolicy,
}

impl Default for PresenterConfig {
    fn default() -> Self {
        Self {
            min_image_count: 2,
            idle_pause: Duration::from_millis(10),
            suboptimal: SuboptimalPolicy::default(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    /// Nothing drawable; the caller should idle for `idle_pause`.
    Idle,
    Frame(FrameOutcome),
}

pub struct Presenter<B: FrameBackend> {
    backend: B,
    detector: InvalidationDetector,
    scheduler: FrameScheduler,
    vsync: VsyncToggle,
    config: PresenterConfig,
    swapchain: Option<SwapchainInfo>,
    rebuilds: u64,
}

impl<B: FrameBackend> Presenter<B> {
    pub fn new(backend: B, vsync: VsyncToggle, config: PresenterConfig) -> Self {
        Self {
            backend,
            detector: InvalidationDetector::new(),
            scheduler: FrameScheduler::new(config.suboptimal),
            vsync,
            config,
            swapchain: None,
            rebuilds: 0,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn scheduler(&self) -> &FrameScheduler {
        &self.scheduler
    }

    pub fn vsync(&self) -> &VsyncToggle {
        &self.vsync
    }

    /// Last successful build, if any.
    pub fn swapchain(&self) -> Option<SwapchainInfo> {
        self.swapchain
    }

    /// Drawable size the current swapchain was requested for.
    pub fn swapchain_size(&self) -> Option<RenderSize> {
        self.detector.last_size()
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds
    }

    /// One loop iteration minus event polling: detect invalidation, rebuild if
    /// needed, then run the frame state machine.
    pub fn tick<W>(&mut self, window: &W, frame: &FrameRequest<'_>) -> Result<TickOutcome>
    where
        W: WindowSource + ?Sized,
    {
        let size = window.framebuffer_size();
        let vsync = self.vsync.get();

        match self.detector.observe(size, window.is_iconified(), vsync) {
            Observation::Minimized => return Ok(TickOutcome::Idle),
            Observation::Rebuild => self.rebuild(size, vsync)?,
            Observation::Ready => {}
        }

        let outcome = self
            .scheduler
            .run_frame(&mut self.backend, frame)
            .context("frame")?;
        if outcome.needs_rebuild() {
            self.detector.invalidate();
        }
        Ok(TickOutcome::Frame(outcome))
    }

    /// Poll → detect → render until the window asks to close, then drain the
    /// device. `on_tick` sees every iteration's outcome.
    pub fn run<W>(
        &mut self,
        window: &mut W,
        frame: &FrameRequest<'_>,
        mut on_tick: impl FnMut(TickOutcome),
    ) -> Result<()>
    where
        W: WindowSource + ?Sized,
    {
        loop {
            window.poll_events();
            if window.should_close() {
                break;
            }
            let outcome = self.tick(window, frame)?;
            if outcome == TickOutcome::Idle && !self.config.idle_pause.is_zero() {
                std::thread::sleep(self.config.idle_pause);
            }
            on_tick(outcome);
        }
        self.backend.drain().context("drain on shutdown")
    }

    fn rebuild(&mut self, size: RenderSize, vsync: bool) -> Result<()> {
        let request = SwapchainRequest {
            size,
            vsync,
            min_image_count: self.config.min_image_count.max(2),
        };
        debug!(?request, "rebuilding swapchain");
        let info = self.backend.rebuild(request).context("swapchain rebuild")?;
        self.scheduler.reset(info.slot_count);
        self.detector.rebuilt(size, vsync);
        self.swapchain = Some(info);
        self.rebuilds += 1;
        info!(
            "swapchain ready ({}, {} images, vsync={})",
            info.extent, info.image_count, vsync
        );
        Ok(())
    }
}
