// SPDX-License-Identifier: CEPL-1.0
//! In-memory backend and window used by the state-machine tests.

use std::collections::VecDeque;

use anyhow::{bail, Result};

use crate::backend::{Acquire, FrameBackend, Present, SwapchainInfo, SwapchainRequest};
use crate::{FrameRequest, RenderSize, WindowSource};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    Rebuild(SwapchainRequest),
    Acquire(usize),
    WaitSlot(usize),
    Record(usize, u32),
    Submit(usize),
    Present(usize, u32),
    Drain,
}

pub(crate) struct MockBackend {
    pub image_count: u32,
    pub calls: Vec<Call>,
    pub built: Option<SwapchainInfo>,
    /// Submitted but not yet waited on, per slot.
    pub outstanding: Vec<u32>,
    pub max_outstanding: u32,
    pub fail_submit: bool,
    pub last_clear: Option<[f32; 4]>,
    acquire_script: VecDeque<Acquire>,
    present_script: VecDeque<Present>,
    next_image: u32,
}

impl MockBackend {
    pub fn new(image_count: u32) -> Self {
        Self {
            image_count,
            calls: Vec::new(),
            built: None,
            outstanding: Vec::new(),
            max_outstanding: 0,
            fail_submit: false,
            last_clear: None,
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            next_image: 0,
        }
    }

    pub fn script_acquire(&mut self, a: Acquire) {
        self.acquire_script.push_back(a);
    }

    pub fn script_present(&mut self, p: Present) {
        self.present_script.push_back(p);
    }

    pub fn count(&self, pred: impl Fn(&Call) -> bool) -> usize {
        self.calls.iter().filter(|c| pred(c)).count()
    }

    pub fn rebuilds(&self) -> Vec<SwapchainRequest> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                Call::Rebuild(r) => Some(*r),
                _ => None,
            })
            .collect()
    }

    fn slots(&self) -> usize {
        self.built.map(|b| b.slot_count).unwrap_or(0)
    }
}

impl FrameBackend for MockBackend {
    fn rebuild(&mut self, request: SwapchainRequest) -> Result<SwapchainInfo> {
        self.calls.push(Call::Rebuild(request));
        let image_count = self.image_count.max(request.min_image_count).max(2);
        let info = SwapchainInfo {
            extent: request.size,
            image_count,
            slot_count: image_count as usize,
        };
        self.outstanding = vec![0; info.slot_count];
        self.next_image = 0;
        self.built = Some(info);
        Ok(info)
    }

    fn acquire(&mut self, slot: usize) -> Result<Acquire> {
        assert!(slot < self.slots(), "slot {slot} outside ring");
        self.calls.push(Call::Acquire(slot));
        if let Some(a) = self.acquire_script.pop_front() {
            return Ok(a);
        }
        let image = self.next_image;
        self.next_image = (self.next_image + 1) % self.built.map_or(1, |b| b.image_count);
        Ok(Acquire::Ready {
            image,
            suboptimal: false,
        })
    }

    fn wait_slot(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::WaitSlot(slot));
        self.outstanding[slot] = 0;
        Ok(())
    }

    fn record(&mut self, slot: usize, image: u32, frame: &FrameRequest<'_>) -> Result<()> {
        assert_eq!(self.outstanding[slot], 0, "recording into a busy slot");
        self.calls.push(Call::Record(slot, image));
        self.last_clear = Some(frame.clear_color);
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        if self.fail_submit {
            bail!("VK_ERROR_DEVICE_LOST");
        }
        self.calls.push(Call::Submit(slot));
        self.outstanding[slot] += 1;
        self.max_outstanding = self.max_outstanding.max(self.outstanding[slot]);
        Ok(())
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<Present> {
        self.calls.push(Call::Present(slot, image));
        Ok(self.present_script.pop_front().unwrap_or(Present::Done))
    }

    fn drain(&mut self) -> Result<()> {
        self.calls.push(Call::Drain);
        self.outstanding.iter_mut().for_each(|n| *n = 0);
        Ok(())
    }
}

#[derive(Debug)]
pub(crate) struct MockWindow {
    pub size: RenderSize,
    pub iconified: bool,
    pub close_requested: bool,
    pub polls: usize,
}

impl MockWindow {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: RenderSize::new(width, height),
            iconified: false,
            close_requested: false,
            polls: 0,
        }
    }
}

impl WindowSource for MockWindow {
    fn framebuffer_size(&self) -> RenderSize {
        self.size
    }

    fn should_close(&self) -> bool {
        self.close_requested
    }

    fn poll_events(&mut self) {
        self.polls += 1;
    }

    fn is_iconified(&self) -> bool {
        self.iconified
    }
}
