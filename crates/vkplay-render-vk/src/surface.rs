// SPDX-License-Identifier: CEPL-1.0
//! Window surface and the format / present-mode policies applied to it.

use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::info;

use crate::device::DeviceContext;
use crate::error::{InitError, UnsupportedSurfaceError, VkCallError, VkResultExt};

/// Tried in order, each in [`PREFERRED_COLOR_SPACE`].
pub const PREFERRED_FORMATS: [vk::Format; 4] = [
    vk::Format::B8G8R8A8_UNORM,
    vk::Format::R8G8B8A8_UNORM,
    vk::Format::B8G8R8_UNORM,
    vk::Format::R8G8B8_UNORM,
];
pub const PREFERRED_COLOR_SPACE: vk::ColorSpaceKHR = vk::ColorSpaceKHR::SRGB_NONLINEAR;

pub fn choose_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    let first = *available.first()?;
    // A lone UNDEFINED entry means the surface has no preference.
    if available.len() == 1 && first.format == vk::Format::UNDEFINED {
        return Some(vk::SurfaceFormatKHR {
            format: PREFERRED_FORMATS[0],
            color_space: PREFERRED_COLOR_SPACE,
        });
    }
    let preferred = PREFERRED_FORMATS.iter().find_map(|&want| {
        available
            .iter()
            .copied()
            .find(|f| f.format == want && f.color_space == PREFERRED_COLOR_SPACE)
    });
    Some(preferred.unwrap_or(first))
}

/// FIFO under vsync. Otherwise MAILBOX, then IMMEDIATE, with FIFO (always
/// supported) as the fallback.
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|m| modes.contains(m))
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

pub struct SurfaceBinding {
    surface: vk::SurfaceKHR,
    format: vk::SurfaceFormatKHR,
}

impl SurfaceBinding {
    /// Create the surface for `window` and fix its format. The context's
    /// queue family must be able to present to it; there is no fallback
    /// device selection.
    pub fn bind(
        ctx: &DeviceContext,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
    ) -> Result<Self, InitError> {
        let dh = display.display_handle()?.as_raw();
        let wh = window.window_handle()?.as_raw();

        unsafe {
            let surface = ash_window::create_surface(ctx.entry(), ctx.instance(), dh, wh, None)
                .vk("create_surface")?;
            match Self::check(ctx, surface) {
                Ok(format) => {
                    info!(
                        "vk: surface format {:?} / {:?}",
                        format.format, format.color_space
                    );
                    Ok(Self { surface, format })
                }
                Err(e) => {
                    ctx.surface_loader().destroy_surface(surface, None);
                    Err(e)
                }
            }
        }
    }

    unsafe fn check(
        ctx: &DeviceContext,
        surface: vk::SurfaceKHR,
    ) -> Result<vk::SurfaceFormatKHR, InitError> {
        let loader = ctx.surface_loader();
        let supported = loader
            .get_physical_device_surface_support(
                ctx.physical_device(),
                ctx.queue_family(),
                surface,
            )
            .vk("get_physical_device_surface_support")?;
        if !supported {
            return Err(UnsupportedSurfaceError {
                device: ctx.selected().name.clone(),
                queue_family: ctx.queue_family(),
            }
            .into());
        }
        let formats = loader
            .get_physical_device_surface_formats(ctx.physical_device(), surface)
            .vk("get_physical_device_surface_formats")?;
        choose_surface_format(&formats).ok_or(InitError::NoSurfaceFormat)
    }

    pub fn surface(&self) -> vk::SurfaceKHR {
        self.surface
    }

    pub fn format(&self) -> vk::SurfaceFormatKHR {
        self.format
    }

    pub fn capabilities(
        &self,
        ctx: &DeviceContext,
    ) -> Result<vk::SurfaceCapabilitiesKHR, VkCallError> {
        unsafe {
            ctx.surface_loader()
                .get_physical_device_surface_capabilities(ctx.physical_device(), self.surface)
        }
        .vk("get_physical_device_surface_capabilities")
    }

    pub fn present_modes(&self, ctx: &DeviceContext) -> Result<Vec<vk::PresentModeKHR>, VkCallError> {
        unsafe {
            ctx.surface_loader()
                .get_physical_device_surface_present_modes(ctx.physical_device(), self.surface)
        }
        .vk("get_physical_device_surface_present_modes")
    }

    /// # Safety
    /// The swapchain built on this surface must already be destroyed.
    pub unsafe fn destroy(&mut self, ctx: &DeviceContext) {
        if self.surface != vk::SurfaceKHR::null() {
            ctx.surface_loader().destroy_surface(self.surface, None);
            self.surface = vk::SurfaceKHR::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sf(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space,
        }
    }

    #[test]
    fn preference_order_beats_report_order() {
        let avail = [
            sf(vk::Format::R8G8B8A8_UNORM, PREFERRED_COLOR_SPACE),
            sf(vk::Format::B8G8R8A8_UNORM, PREFERRED_COLOR_SPACE),
        ];
        assert_eq!(
            choose_surface_format(&avail).unwrap().format,
            vk::Format::B8G8R8A8_UNORM
        );
    }

    #[test]
    fn preferred_format_in_wrong_color_space_is_skipped() {
        let avail = [
            sf(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
            sf(vk::Format::R8G8B8_UNORM, PREFERRED_COLOR_SPACE),
        ];
        assert_eq!(choose_surface_format(&avail), Some(avail[1]));
    }

    #[test]
    fn falls_back_to_first_reported() {
        let avail = [
            sf(vk::Format::A2B10G10R10_UNORM_PACK32, vk::ColorSpaceKHR::HDR10_ST2084_EXT),
            sf(vk::Format::R16G16B16A16_SFLOAT, PREFERRED_COLOR_SPACE),
        ];
        assert_eq!(choose_surface_format(&avail), Some(avail[0]));
    }

    #[test]
    fn lone_rgb8_keeps_its_reported_color_space() {
        let only = sf(vk::Format::R8G8B8_UNORM, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT);
        assert_eq!(choose_surface_format(&[only]), Some(only));
    }

    #[test]
    fn undefined_means_free_choice() {
        let avail = [sf(vk::Format::UNDEFINED, PREFERRED_COLOR_SPACE)];
        assert_eq!(
            choose_surface_format(&avail),
            Some(sf(vk::Format::B8G8R8A8_UNORM, PREFERRED_COLOR_SPACE))
        );
        assert_eq!(choose_surface_format(&[]), None);
    }

    #[test]
    fn vsync_forces_fifo() {
        let all = [
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
            vk::PresentModeKHR::FIFO,
        ];
        assert_eq!(choose_present_mode(&all, true), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn unsynced_prefers_mailbox_then_immediate() {
        use vk::PresentModeKHR as P;
        assert_eq!(choose_present_mode(&[P::IMMEDIATE, P::MAILBOX, P::FIFO], false), P::MAILBOX);
        assert_eq!(choose_present_mode(&[P::FIFO, P::IMMEDIATE], false), P::IMMEDIATE);
        assert_eq!(choose_present_mode(&[P::FIFO, P::FIFO_RELAXED], false), P::FIFO);
        assert_eq!(choose_present_mode(&[], false), P::FIFO);
    }
}
