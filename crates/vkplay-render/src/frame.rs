// SPDX-License-Identifier: CEPL-1.0
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::vertex::{Vertex, TRIANGLE};

/// What one loop iteration draws. Borrowed for the iteration only.
#[derive(Clone, Copy, Debug)]
pub struct FrameRequest<'a> {
    pub clear_color: [f32; 4],
    pub vertices: &'a [Vertex],
}

impl<'a> FrameRequest<'a> {
    pub fn new(clear_color: [f32; 4], vertices: &'a [Vertex]) -> Self {
        Self {
            clear_color,
            vertices,
        }
    }
}

impl FrameRequest<'static> {
    pub fn triangle(clear_color: [f32; 4]) -> Self {
        Self::new(clear_color, &TRIANGLE)
    }
}

/// The one piece of state the UI/input side may change. The presenter reads
/// it once per iteration and rebuilds the swapchain when it flips.
#[derive(Clone, Debug, Default)]
pub struct VsyncToggle(Arc<AtomicBool>);

impl VsyncToggle {
    pub fn new(on: bool) -> Self {
        Self(Arc::new(AtomicBool::new(on)))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Flips the value and returns the new one.
    pub fn toggle(&self) -> bool {
        !self.0.fetch_xor(true, Ordering::Relaxed)
    }
}
