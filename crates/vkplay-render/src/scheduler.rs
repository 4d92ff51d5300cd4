// SPDX-License-Identifier: CEPL-1.0
//! Per-frame state machine.
//!
//! Idle → Acquiring → Recording → Submitting → Presenting → Idle, with
//! Invalidated reachable from Acquiring and Presenting. Frame slots form a
//! ring that is indexed independently of the swapchain image index.

use anyhow::Result;
use thiserror::Error;
use tracing::debug;

use crate::backend::{Acquire, FrameBackend, Present};
use crate::FrameRequest;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FrameState {
    #[default]
    Idle,
    Acquiring,
    Recording,
    Submitting,
    Presenting,
    Invalidated,
}

/// What to do with a frame whose image was acquired as suboptimal.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SuboptimalPolicy {
    /// Record and submit, but do not present against the stale surface.
    #[default]
    SkipPresent,
    /// Record, submit and present; rebuild before the next acquire.
    Present,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Image presented and the ring advanced. `stale` asks for a rebuild.
    Presented { stale: bool },
    /// Work was submitted but presentation was skipped; ring not advanced.
    PresentSkipped,
    /// Present reported out-of-date; ring not advanced.
    PresentOutOfDate,
    /// Nothing was recorded or submitted.
    AcquireOutOfDate,
}

impl FrameOutcome {
    pub fn needs_rebuild(self) -> bool {
        match self {
            FrameOutcome::Presented { stale } => stale,
            _ => true,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame scheduled before the swapchain was built")]
    NotBuilt,
}

#[derive(Debug)]
pub struct FrameScheduler {
    policy: SuboptimalPolicy,
    slot_count: usize,
    slot: usize,
    image: Option<u32>,
    state: FrameState,
    presented: u64,
}

impl FrameScheduler {
    pub fn new(policy: SuboptimalPolicy) -> Self {
        Self {
            policy,
            slot_count: 0,
            slot: 0,
            image: None,
            state: FrameState::Idle,
            presented: 0,
        }
    }

    /// Called after every swapchain rebuild: new ring size, index back to 0.
    pub fn reset(&mut self, slot_count: usize) {
        self.slot_count = slot_count;
        self.slot = 0;
        self.image = None;
        self.state = FrameState::Idle;
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn slot_count(&self) -> usize {
        self.slot_count
    }

    pub fn state(&self) -> FrameState {
        self.state
    }

    /// Image acquired by the most recent frame, if it got that far.
    pub fn acquired_image(&self) -> Option<u32> {
        self.image
    }

    pub fn presented_frames(&self) -> u64 {
        self.presented
    }

    pub fn run_frame<B>(&mut self, backend: &mut B, frame: &FrameRequest<'_>) -> Result<FrameOutcome>
    where
        B: FrameBackend + ?Sized,
    {
        if self.slot_count == 0 {
            return Err(FrameError::NotBuilt.into());
        }
        let slot = self.slot;

        self.state = FrameState::Acquiring;
        self.image = None;
        let (image, suboptimal) = match backend.acquire(slot)? {
            Acquire::Ready { image, suboptimal } => (image, suboptimal),
            Acquire::OutOfDate => {
                debug!("acquire: out of date (slot {slot})");
                self.state = FrameState::Invalidated;
                return Ok(FrameOutcome::AcquireOutOfDate);
            }
        };
        self.image = Some(image);
        if suboptimal {
            debug!("acquire: suboptimal (slot {slot}, image {image})");
        }

        // One outstanding submission per slot: the CPU must not touch the
        // slot's command buffer before the GPU is done with it.
        backend.wait_slot(slot)?;

        self.state = FrameState::Recording;
        backend.record(slot, image, frame)?;

        self.state = FrameState::Submitting;
        backend.submit(slot)?;

        self.state = FrameState::Presenting;
        if suboptimal && self.policy == SuboptimalPolicy::SkipPresent {
            self.state = FrameState::Idle;
            return Ok(FrameOutcome::PresentSkipped);
        }

        let outcome = match backend.present(slot, image)? {
            Present::Done => FrameOutcome::Presented { stale: suboptimal },
            Present::Suboptimal => FrameOutcome::Presented { stale: true },
            Present::OutOfDate => {
                debug!("present: out of date (slot {slot}, image {image})");
                self.state = FrameState::Invalidated;
                return Ok(FrameOutcome::PresentOutOfDate);
            }
        };

        self.presented += 1;
        self.slot = (self.slot + 1) % self.slot_count;
        self.state = if outcome.needs_rebuild() {
            FrameState::Invalidated
        } else {
            FrameState::Idle
        };
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SwapchainRequest;
    use crate::mock::{Call, MockBackend};
    use crate::RenderSize;

    fn built(slots: usize) -> (MockBackend, FrameScheduler) {
        let mut backend = MockBackend::new(slots as u32);
        let info = backend
            .rebuild(SwapchainRequest {
                size: RenderSize::new(800, 600),
                vsync: true,
                min_image_count: 2,
            })
            .unwrap();
        let mut s = FrameScheduler::new(SuboptimalPolicy::default());
        s.reset(info.slot_count);
        backend.calls.clear();
        (backend, s)
    }

    fn frame() -> FrameRequest<'static> {
        FrameRequest::triangle([0.0, 0.0, 0.0, 1.0])
    }

    #[test]
    fn refuses_to_run_before_first_build() {
        let mut backend = MockBackend::new(2);
        let mut s = FrameScheduler::new(SuboptimalPolicy::default());
        let err = s.run_frame(&mut backend, &frame()).unwrap_err();
        assert_eq!(err.downcast_ref::<FrameError>(), Some(&FrameError::NotBuilt));
        assert!(backend.calls.is_empty());
    }

    #[test]
    fn happy_path_runs_stages_in_order() {
        let (mut backend, mut s) = built(3);
        let out = s.run_frame(&mut backend, &frame()).unwrap();
        assert_eq!(out, FrameOutcome::Presented { stale: false });
        assert_eq!(
            backend.calls,
            vec![
                Call::Acquire(0),
                Call::WaitSlot(0),
                Call::Record(0, 0),
                Call::Submit(0),
                Call::Present(0, 0),
            ]
        );
        assert_eq!(s.slot(), 1);
        assert_eq!(s.state(), FrameState::Idle);
        assert_eq!(s.acquired_image(), Some(0));
    }

    #[test]
    fn ring_wraps_and_stays_in_range() {
        let (mut backend, mut s) = built(3);
        let mut seen = Vec::new();
        for _ in 0..10 {
            seen.push(s.slot());
            s.run_frame(&mut backend, &frame()).unwrap();
            assert!(s.slot() < s.slot_count());
        }
        assert_eq!(seen, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(s.presented_frames(), 10);
    }

    #[test]
    fn out_of_date_acquire_records_nothing() {
        let (mut backend, mut s) = built(2);
        backend.script_acquire(Acquire::OutOfDate);
        let out = s.run_frame(&mut backend, &frame()).unwrap();
        assert_eq!(out, FrameOutcome::AcquireOutOfDate);
        assert_eq!(backend.calls, vec![Call::Acquire(0)]);
        assert_eq!(s.state(), FrameState::Invalidated);
        assert_eq!(s.slot(), 0);
        assert_eq!(s.acquired_image(), None);
    }

    #[test]
    fn suboptimal_acquire_submits_but_skips_present_by_default() {
        let (mut backend, mut s) = built(2);
        backend.script_acquire(Acquire::Ready {
            image: 1,
            suboptimal: true,
        });
        let out = s.run_frame(&mut backend, &frame()).unwrap();
        assert_eq!(out, FrameOutcome::PresentSkipped);
        assert!(out.needs_rebuild());
        assert_eq!(
            backend.calls,
            vec![
                Call::Acquire(0),
                Call::WaitSlot(0),
                Call::Record(0, 1),
                Call::Submit(0),
            ]
        );
        assert_eq!(s.slot(), 0, "skipped present must not advance the ring");
        assert_eq!(s.presented_frames(), 0);
    }

    #[test]
    fn suboptimal_acquire_presents_under_present_policy() {
        let (mut backend, _) = built(2);
        let mut s = FrameScheduler::new(SuboptimalPolicy::Present);
        s.reset(2);
        backend.script_acquire(Acquire::Ready {
            image: 1,
            suboptimal: true,
        });
        let out = s.run_frame(&mut backend, &frame()).unwrap();
        assert_eq!(out, FrameOutcome::Presented { stale: true });
        assert_eq!(backend.calls.last(), Some(&Call::Present(0, 1)));
        assert_eq!(s.slot(), 1);
        assert_eq!(s.state(), FrameState::Invalidated);
    }

    #[test]
    fn present_results_mark_invalidation() {
        let (mut backend, mut s) = built(2);
        backend.script_present(Present::Suboptimal);
        let out = s.run_frame(&mut backend, &frame()).unwrap();
        assert_eq!(out, FrameOutcome::Presented { stale: true });
        assert_eq!(s.slot(), 1);

        backend.script_present(Present::OutOfDate);
        let out = s.run_frame(&mut backend, &frame()).unwrap();
        assert_eq!(out, FrameOutcome::PresentOutOfDate);
        assert_eq!(s.slot(), 1);
        assert_eq!(s.state(), FrameState::Invalidated);
    }

    #[test]
    fn never_more_than_one_submission_per_slot() {
        let (mut backend, mut s) = built(2);
        for i in 0..20 {
            if i % 7 == 3 {
                backend.script_acquire(Acquire::Ready {
                    image: 0,
                    suboptimal: true,
                });
            }
            s.run_frame(&mut backend, &frame()).unwrap();
            assert!(backend.outstanding.iter().all(|&n| n <= 1));
        }
        assert!(backend.max_outstanding <= 1);
    }

    #[test]
    fn reset_returns_ring_to_zero() {
        let (mut backend, mut s) = built(3);
        s.run_frame(&mut backend, &frame()).unwrap();
        s.run_frame(&mut backend, &frame()).unwrap();
        assert_eq!(s.slot(), 2);
        s.reset(2);
        assert_eq!(s.slot(), 0);
        assert_eq!(s.slot_count(), 2);
    }

    #[test]
    fn backend_errors_propagate() {
        let (mut backend, mut s) = built(2);
        backend.fail_submit = true;
        assert!(s.run_frame(&mut backend, &frame()).is_err());
        assert_eq!(s.slot(), 0);
    }
}
