// SPDX-License-Identifier: CEPL-1.0
//! Swapchain images and the per-slot sync/command resources built with them.

use anyhow::{Context, Result};
use ash::vk;
use tracing::info;
use vkplay_render::RenderSize;

use crate::buffer::HostBuffer;
use crate::device::DeviceContext;
use crate::error::VkResultExt;
use crate::surface::{choose_present_mode, SurfaceBinding};

/// At least two images, inside the surface's `[min, max]` (max 0 = unbounded).
pub fn clamp_image_count(requested: u32, caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let n = requested.max(2).max(caps.min_image_count);
    if caps.max_image_count == 0 {
        n
    } else {
        n.min(caps.max_image_count)
    }
}

/// The surface's current extent, or `want` clamped to its limits when the
/// surface leaves sizing to the swapchain (`current_extent.width == u32::MAX`).
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, want: RenderSize) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: want
                .width
                .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: want
                .height
                .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

pub struct SwapchainImage {
    pub image: vk::Image,
    pub view: vk::ImageView,
    pub framebuffer: vk::Framebuffer,
}

/// One entry of the semaphore ring.
pub struct FrameSlot {
    pub image_acquired: vk::Semaphore,
    pub render_complete: vk::Semaphore,
    pub command_pool: vk::CommandPool,
    pub command_buffer: vk::CommandBuffer,
    /// Created signaled so the first wait returns immediately.
    pub in_flight: vk::Fence,
    /// Grown on demand by the recorder.
    pub vertices: Option<HostBuffer>,
}

impl FrameSlot {
    unsafe fn new(device: &ash::Device, queue_family: u32) -> Result<Self> {
        let mut slot = FrameSlot {
            image_acquired: vk::Semaphore::null(),
            render_complete: vk::Semaphore::null(),
            command_pool: vk::CommandPool::null(),
            command_buffer: vk::CommandBuffer::null(),
            in_flight: vk::Fence::null(),
            vertices: None,
        };
        if let Err(e) = slot.init(device, queue_family) {
            slot.destroy(device);
            return Err(e);
        }
        Ok(slot)
    }

    unsafe fn init(&mut self, device: &ash::Device, queue_family: u32) -> Result<()> {
        let sem_ci = vk::SemaphoreCreateInfo::default();
        self.image_acquired = device
            .create_semaphore(&sem_ci, None)
            .vk("create_semaphore")?;
        self.render_complete = device
            .create_semaphore(&sem_ci, None)
            .vk("create_semaphore")?;

        let fence_ci = vk::FenceCreateInfo {
            s_type: vk::StructureType::FENCE_CREATE_INFO,
            flags: vk::FenceCreateFlags::SIGNALED,
            ..Default::default()
        };
        self.in_flight = device.create_fence(&fence_ci, None).vk("create_fence")?;

        let pool_info = vk::CommandPoolCreateInfo {
            s_type: vk::StructureType::COMMAND_POOL_CREATE_INFO,
            queue_family_index: queue_family,
            flags: vk::CommandPoolCreateFlags::TRANSIENT,
            ..Default::default()
        };
        self.command_pool = device
            .create_command_pool(&pool_info, None)
            .vk("create_command_pool")?;
        let alloc_info = vk::CommandBufferAllocateInfo {
            s_type: vk::StructureType::COMMAND_BUFFER_ALLOCATE_INFO,
            command_pool: self.command_pool,
            level: vk::CommandBufferLevel::PRIMARY,
            command_buffer_count: 1,
            ..Default::default()
        };
        self.command_buffer = device
            .allocate_command_buffers(&alloc_info)
            .vk("allocate_command_buffers")?[0];
        Ok(())
    }

    unsafe fn destroy(self, device: &ash::Device) {
        if let Some(buf) = self.vertices {
            buf.destroy(device);
        }
        if self.command_pool != vk::CommandPool::null() {
            // Frees the command buffer with it.
            device.destroy_command_pool(self.command_pool, None);
        }
        if self.in_flight != vk::Fence::null() {
            device.destroy_fence(self.in_flight, None);
        }
        for sem in [self.render_complete, self.image_acquired] {
            if sem != vk::Semaphore::null() {
                device.destroy_semaphore(sem, None);
            }
        }
    }
}

pub struct SwapchainState {
    swapchain: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<SwapchainImage>,
    slots: Vec<FrameSlot>,
}

impl SwapchainState {
    /// Build a swapchain for `size` plus its views, framebuffers and one frame
    /// slot per image. `old` is handed to the driver for resource reuse; the
    /// caller destroys it afterwards.
    ///
    /// # Safety
    /// The device must be idle with respect to `old`.
    pub unsafe fn new(
        ctx: &DeviceContext,
        surface: &SurfaceBinding,
        render_pass: vk::RenderPass,
        size: RenderSize,
        vsync: bool,
        min_image_count: u32,
        old: vk::SwapchainKHR,
    ) -> Result<Self> {
        let caps = surface.capabilities(ctx)?;
        let modes = surface.present_modes(ctx)?;
        let present_mode = choose_present_mode(&modes, vsync);
        let extent = choose_extent(&caps, size);
        let image_count = clamp_image_count(min_image_count, &caps);
        let format = surface.format();

        let pre_transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let swap_info = vk::SwapchainCreateInfoKHR {
            s_type: vk::StructureType::SWAPCHAIN_CREATE_INFO_KHR,
            surface: surface.surface(),
            min_image_count: image_count,
            image_format: format.format,
            image_color_space: format.color_space,
            image_extent: extent,
            image_array_layers: 1,
            image_usage: vk::ImageUsageFlags::COLOR_ATTACHMENT,
            image_sharing_mode: vk::SharingMode::EXCLUSIVE,
            pre_transform,
            composite_alpha: vk::CompositeAlphaFlagsKHR::OPAQUE,
            present_mode,
            clipped: vk::TRUE,
            old_swapchain: old,
            ..Default::default()
        };
        let swapchain = ctx
            .swapchain_loader()
            .create_swapchain(&swap_info, None)
            .vk("create_swapchain")?;

        let mut state = SwapchainState {
            swapchain,
            format: format.format,
            extent,
            images: Vec::new(),
            slots: Vec::new(),
        };
        if let Err(e) = state.populate(ctx, render_pass) {
            state.destroy(ctx);
            return Err(e);
        }

        info!(
            "vk: swapchain {}x{} images={} (requested {}) present_mode={:?}",
            extent.width,
            extent.height,
            state.images.len(),
            image_count,
            present_mode
        );
        Ok(state)
    }

    unsafe fn populate(&mut self, ctx: &DeviceContext, render_pass: vk::RenderPass) -> Result<()> {
        let device = ctx.device();
        let images = ctx
            .swapchain_loader()
            .get_swapchain_images(self.swapchain)
            .vk("get_swapchain_images")?;

        for image in images {
            let iv_info = vk::ImageViewCreateInfo {
                s_type: vk::StructureType::IMAGE_VIEW_CREATE_INFO,
                image,
                view_type: vk::ImageViewType::TYPE_2D,
                format: self.format,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                },
                ..Default::default()
            };
            let view = device
                .create_image_view(&iv_info, None)
                .vk("create_image_view")?;
            // Pushed before the framebuffer so a failure below still frees the view.
            self.images.push(SwapchainImage {
                image,
                view,
                framebuffer: vk::Framebuffer::null(),
            });

            let fb_info = vk::FramebufferCreateInfo {
                s_type: vk::StructureType::FRAMEBUFFER_CREATE_INFO,
                render_pass,
                attachment_count: 1,
                p_attachments: &view,
                width: self.extent.width,
                height: self.extent.height,
                layers: 1,
                ..Default::default()
            };
            let framebuffer = device
                .create_framebuffer(&fb_info, None)
                .vk("create_framebuffer")?;
            if let Some(last) = self.images.last_mut() {
                last.framebuffer = framebuffer;
            }
        }

        for i in 0..self.images.len() {
            let slot = FrameSlot::new(device, ctx.queue_family())
                .with_context(|| format!("frame slot {i}"))?;
            self.slots.push(slot);
        }
        Ok(())
    }

    pub fn handle(&self) -> vk::SwapchainKHR {
        self.swapchain
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub fn images(&self) -> &[SwapchainImage] {
        &self.images
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    pub fn slot_mut(&mut self, slot: usize) -> &mut FrameSlot {
        &mut self.slots[slot]
    }

    /// Destroy everything except the swapchain handle, which is returned so
    /// it can be passed as `old_swapchain` to the replacement.
    ///
    /// # Safety
    /// The device must be idle.
    pub unsafe fn retire(mut self, device: &ash::Device) -> vk::SwapchainKHR {
        for slot in self.slots.drain(..) {
            slot.destroy(device);
        }
        for img in self.images.drain(..) {
            if img.framebuffer != vk::Framebuffer::null() {
                device.destroy_framebuffer(img.framebuffer, None);
            }
            device.destroy_image_view(img.view, None);
        }
        self.swapchain
    }

    /// # Safety
    /// The device must be idle.
    pub unsafe fn destroy(self, ctx: &DeviceContext) {
        let handle = self.retire(ctx.device());
        ctx.swapchain_loader().destroy_swapchain(handle, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2160,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_never_below_two() {
        assert_eq!(clamp_image_count(0, &caps(1, 0)), 2);
        assert_eq!(clamp_image_count(1, &caps(1, 8)), 2);
    }

    #[test]
    fn image_count_respects_surface_bounds() {
        assert_eq!(clamp_image_count(2, &caps(3, 8)), 3);
        assert_eq!(clamp_image_count(10, &caps(2, 4)), 4);
        assert_eq!(clamp_image_count(10, &caps(2, 0)), 10);
    }

    #[test]
    fn fixed_surface_extent_wins() {
        let mut c = caps(2, 0);
        c.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let e = choose_extent(&c, RenderSize::new(1000, 900));
        assert_eq!((e.width, e.height), (800, 600));
    }

    #[test]
    fn free_extent_is_clamped_request() {
        let e = choose_extent(&caps(2, 0), RenderSize::new(1000, 900));
        assert_eq!((e.width, e.height), (1000, 900));
        let e = choose_extent(&caps(2, 0), RenderSize::new(8000, 0));
        assert_eq!((e.width, e.height), (4096, 1));
    }
}
