// SPDX-License-Identifier: CEPL-1.0
//! winit window provider driven by event pumping, so the render loop owns
//! control flow instead of winit's callback loop.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use tracing::{debug, info};
use vkplay_render::{RenderSize, VsyncToggle, WindowSource};
use winit::application::ApplicationHandler;
use winit::dpi::{LogicalSize, PhysicalSize};
use winit::event::{ElementState, KeyEvent, WindowEvent};
use winit::event_loop::{ActiveEventLoop, EventLoop};
use winit::keyboard::{KeyCode, PhysicalKey};
use winit::platform::pump_events::{EventLoopExtPumpEvents, PumpStatus};
use winit::window::{Window, WindowAttributes, WindowId};

pub use winit;

/// Pumps allowed while waiting for the platform to hand out the window.
const CREATE_PUMPS: usize = 200;

pub fn render_size(size: PhysicalSize<u32>) -> RenderSize {
    RenderSize::new(size.width, size.height)
}

/// `V` pressed, ignoring auto-repeat.
pub fn toggles_vsync(key: PhysicalKey, state: ElementState, repeat: bool) -> bool {
    key == PhysicalKey::Code(KeyCode::KeyV) && state == ElementState::Pressed && !repeat
}

struct Handler {
    pending: Option<WindowAttributes>,
    created: Option<Window>,
    create_error: Option<String>,
    close_requested: bool,
    vsync: VsyncToggle,
}

impl ApplicationHandler for Handler {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(attrs) = self.pending.take() {
            match event_loop.create_window(attrs) {
                Ok(w) => self.created = Some(w),
                Err(e) => self.create_error = Some(e.to_string()),
            }
        }
    }

    fn window_event(&mut self, _event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("CloseRequested");
                self.close_requested = true;
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key,
                        state,
                        repeat,
                        ..
                    },
                ..
            } if toggles_vsync(physical_key, state, repeat) => {
                let on = self.vsync.toggle();
                info!("vsync → {on}");
            }
            WindowEvent::Resized(size) => debug!("Resized → {}x{}", size.width, size.height),
            _ => {}
        }
    }
}

// Field order: the window must drop before its event loop.
pub struct PlatformWindow {
    window: Window,
    event_loop: EventLoop<()>,
    handler: Handler,
}

impl PlatformWindow {
    /// Open a `width`×`height` (logical) window titled `title`. Pressing `V`
    /// flips `vsync`.
    pub fn create(width: u32, height: u32, title: &str, vsync: VsyncToggle) -> Result<Self> {
        let mut event_loop = EventLoop::new()?;
        let attrs = Window::default_attributes()
            .with_title(title)
            .with_inner_size(LogicalSize::new(width as f64, height as f64));
        let mut handler = Handler {
            pending: Some(attrs),
            created: None,
            create_error: None,
            close_requested: false,
            vsync,
        };

        for _ in 0..CREATE_PUMPS {
            let status = event_loop.pump_app_events(Some(Duration::from_millis(5)), &mut handler);
            if let Some(err) = handler.create_error.take() {
                bail!("create_window: {err}");
            }
            if let Some(window) = handler.created.take() {
                let size = window.inner_size();
                info!("window {}x{} \"{title}\"", size.width, size.height);
                return Ok(Self {
                    window,
                    event_loop,
                    handler,
                });
            }
            if let PumpStatus::Exit(code) = status {
                bail!("event loop exited ({code}) before the window was created");
            }
        }
        Err(anyhow!("platform never resumed the event loop"))
    }

    /// Raw-window-handle source for surface creation.
    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl WindowSource for PlatformWindow {
    fn framebuffer_size(&self) -> RenderSize {
        render_size(self.window.inner_size())
    }

    fn should_close(&self) -> bool {
        self.handler.close_requested
    }

    fn poll_events(&mut self) {
        let status = self
            .event_loop
            .pump_app_events(Some(Duration::ZERO), &mut self.handler);
        if let PumpStatus::Exit(_) = status {
            self.handler.close_requested = true;
        }
    }

    fn is_iconified(&self) -> bool {
        self.window.is_minimized().unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fresh_v_press_toggles() {
        let v = PhysicalKey::Code(KeyCode::KeyV);
        assert!(toggles_vsync(v, ElementState::Pressed, false));
        assert!(!toggles_vsync(v, ElementState::Pressed, true));
        assert!(!toggles_vsync(v, ElementState::Released, false));
        assert!(!toggles_vsync(
            PhysicalKey::Code(KeyCode::KeyB),
            ElementState::Pressed,
            false
        ));
    }

    #[test]
    fn zero_physical_size_is_empty() {
        assert!(render_size(PhysicalSize::new(0, 900)).is_empty());
        assert_eq!(
            render_size(PhysicalSize::new(1000, 900)),
            RenderSize::new(1000, 900)
        );
    }
}
