// SPDX-License-Identifier: CEPL-1.0
use crate::RenderSize;

/// What the frame loop needs from the window system. One `poll_events` per
/// loop iteration; everything else is a cheap query.
pub trait WindowSource {
    fn framebuffer_size(&self) -> RenderSize;
    fn should_close(&self) -> bool;
    fn poll_events(&mut self);
    fn is_iconified(&self) -> bool;
}
