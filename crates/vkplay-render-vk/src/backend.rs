// SPDX-License-Identifier: CEPL-1.0
//! `FrameBackend` over ash: the GPU half of the frame loop.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use tracing::{debug, warn};
use vkplay_render::{
    Acquire, FrameBackend, FrameError, FrameRequest, Present, RenderSize, SwapchainInfo,
    SwapchainRequest, Vertex,
};

use crate::buffer::HostBuffer;
use crate::device::DeviceContext;
use crate::error::{VkCallError, VkResultExt, VkStatusExt};
use crate::pipeline::{ShaderSet, TrianglePass};
use crate::surface::SurfaceBinding;
use crate::swapchain::SwapchainState;

/// Smallest vertex buffer a slot allocates, in bytes.
const MIN_VERTEX_BYTES: vk::DeviceSize = 256;

fn built(swapchain: &mut Option<SwapchainState>) -> Result<&mut SwapchainState, FrameError> {
    swapchain.as_mut().ok_or(FrameError::NotBuilt)
}

// Field order is drop order for the context: it must go last.
pub struct VkBackend {
    swapchain: Option<SwapchainState>,
    pass: TrianglePass,
    surface: SurfaceBinding,
    ctx: DeviceContext,
}

impl VkBackend {
    /// Bind `window` to the context's device and build the triangle pipeline.
    /// No swapchain exists until the first [`FrameBackend::rebuild`].
    pub fn new(
        ctx: DeviceContext,
        window: &dyn HasWindowHandle,
        display: &dyn HasDisplayHandle,
        shaders: &ShaderSet,
    ) -> Result<Self> {
        let mut surface = SurfaceBinding::bind(&ctx, window, display).context("surface binding")?;
        let pass = unsafe {
            TrianglePass::new(
                ctx.device(),
                surface.format().format,
                shaders,
                &Vertex::layout(),
            )
        };
        match pass {
            Ok(pass) => Ok(Self {
                swapchain: None,
                pass,
                surface,
                ctx,
            }),
            Err(e) => {
                unsafe { surface.destroy(&ctx) };
                Err(e.context("triangle pipeline"))
            }
        }
    }

    unsafe fn upload_vertices(
        ctx: &DeviceContext,
        slot: &mut Option<HostBuffer>,
        vertices: &[Vertex],
    ) -> Result<()> {
        let needed = std::mem::size_of_val(vertices) as vk::DeviceSize;
        if slot.as_ref().map_or(true, |b| b.capacity() < needed) {
            if let Some(old) = slot.take() {
                old.destroy(ctx.device());
            }
            *slot = Some(HostBuffer::new(
                ctx,
                needed.max(MIN_VERTEX_BYTES),
                vk::BufferUsageFlags::VERTEX_BUFFER,
            )?);
        }
        if let Some(buf) = slot.as_mut() {
            buf.write(vertices)?;
        }
        Ok(())
    }
}

// Every entry point first re-raises a fatal error parked by the debug callback.
impl FrameBackend for VkBackend {
    fn rebuild(&mut self, request: SwapchainRequest) -> Result<SwapchainInfo> {
        self.ctx.check_fatal();
        self.ctx.wait_idle()?;
        let device = self.ctx.device();
        let old = match self.swapchain.take() {
            Some(state) => unsafe { state.retire(device) },
            None => vk::SwapchainKHR::null(),
        };
        let created = unsafe {
            SwapchainState::new(
                &self.ctx,
                &self.surface,
                self.pass.render_pass(),
                request.size,
                request.vsync,
                request.min_image_count,
                old,
            )
        };
        if old != vk::SwapchainKHR::null() {
            unsafe { self.ctx.swapchain_loader().destroy_swapchain(old, None) };
        }
        let state = created.context("swapchain creation")?;

        let extent = state.extent();
        let info = SwapchainInfo {
            extent: RenderSize::new(extent.width, extent.height),
            image_count: state.images().len() as u32,
            slot_count: state.slots().len(),
        };
        self.swapchain = Some(state);
        Ok(info)
    }

    fn acquire(&mut self, slot: usize) -> Result<Acquire> {
        self.ctx.check_fatal();
        let state = built(&mut self.swapchain)?;
        let semaphore = state.slots()[slot].image_acquired;
        let acquired = unsafe {
            self.ctx.swapchain_loader().acquire_next_image(
                state.handle(),
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };
        match acquired {
            Ok((image, suboptimal)) => Ok(Acquire::Ready { image, suboptimal }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                debug!("vk: acquire out of date");
                Ok(Acquire::OutOfDate)
            }
            Err(result) => Err(VkCallError {
                call: "acquire_next_image",
                result,
            }
            .into()),
        }
    }

    fn wait_slot(&mut self, slot: usize) -> Result<()> {
        self.ctx.check_fatal();
        let state = built(&mut self.swapchain)?;
        let fence = state.slots()[slot].in_flight;
        let device = self.ctx.device();
        unsafe {
            device
                .wait_for_fences(&[fence], true, u64::MAX)
                .status("wait_for_fences")?;
            device.reset_fences(&[fence]).vk("reset_fences")?;
        }
        Ok(())
    }

    fn record(&mut self, slot: usize, image: u32, frame: &FrameRequest<'_>) -> Result<()> {
        self.ctx.check_fatal();
        let ctx = &self.ctx;
        let device = ctx.device();
        let state = built(&mut self.swapchain)?;
        let extent = state.extent();
        let framebuffer = state.images()[image as usize].framebuffer;
        let pipeline = self.pass.pipeline();
        let render_pass = self.pass.render_pass();
        let fs = state.slot_mut(slot);
        let cmd = fs.command_buffer;

        unsafe {
            device
                .reset_command_pool(fs.command_pool, vk::CommandPoolResetFlags::empty())
                .vk("reset_command_pool")?;
            let begin = vk::CommandBufferBeginInfo {
                s_type: vk::StructureType::COMMAND_BUFFER_BEGIN_INFO,
                flags: vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
                ..Default::default()
            };
            device
                .begin_command_buffer(cmd, &begin)
                .vk("begin_command_buffer")?;

            if !frame.vertices.is_empty() {
                Self::upload_vertices(ctx, &mut fs.vertices, frame.vertices)?;
            }

            let clear = vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: frame.clear_color,
                },
            };
            let area = vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent,
            };
            let rp_begin = vk::RenderPassBeginInfo {
                s_type: vk::StructureType::RENDER_PASS_BEGIN_INFO,
                render_pass,
                framebuffer,
                render_area: area,
                clear_value_count: 1,
                p_clear_values: &clear,
                ..Default::default()
            };
            device.cmd_begin_render_pass(cmd, &rp_begin, vk::SubpassContents::INLINE);

            if let Some(buf) = fs.vertices.as_ref().filter(|_| !frame.vertices.is_empty()) {
                device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, pipeline);
                let vp = vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: extent.width as f32,
                    height: extent.height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                };
                device.cmd_set_viewport(cmd, 0, std::slice::from_ref(&vp));
                device.cmd_set_scissor(cmd, 0, std::slice::from_ref(&area));
                device.cmd_bind_vertex_buffers(cmd, 0, &[buf.buffer()], &[0]);
                device.cmd_draw(cmd, frame.vertices.len() as u32, 1, 0, 0);
            }

            device.cmd_end_render_pass(cmd);
            device.end_command_buffer(cmd).vk("end_command_buffer")?;
        }
        Ok(())
    }

    fn submit(&mut self, slot: usize) -> Result<()> {
        self.ctx.check_fatal();
        let state = built(&mut self.swapchain)?;
        let fs = &state.slots()[slot];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let submit = vk::SubmitInfo {
            s_type: vk::StructureType::SUBMIT_INFO,
            wait_semaphore_count: 1,
            p_wait_semaphores: &fs.image_acquired,
            p_wait_dst_stage_mask: wait_stages.as_ptr(),
            command_buffer_count: 1,
            p_command_buffers: &fs.command_buffer,
            signal_semaphore_count: 1,
            p_signal_semaphores: &fs.render_complete,
            ..Default::default()
        };
        unsafe {
            self.ctx
                .device()
                .queue_submit(self.ctx.queue(), std::slice::from_ref(&submit), fs.in_flight)
                .vk("queue_submit")?;
        }
        Ok(())
    }

    fn present(&mut self, slot: usize, image: u32) -> Result<Present> {
        self.ctx.check_fatal();
        let state = built(&mut self.swapchain)?;
        let swapchain = state.handle();
        let fs = &state.slots()[slot];
        let present = vk::PresentInfoKHR {
            s_type: vk::StructureType::PRESENT_INFO_KHR,
            wait_semaphore_count: 1,
            p_wait_semaphores: &fs.render_complete,
            swapchain_count: 1,
            p_swapchains: &swapchain,
            p_image_indices: &image,
            ..Default::default()
        };
        let presented = unsafe {
            self.ctx
                .swapchain_loader()
                .queue_present(self.ctx.queue(), &present)
        };
        match presented {
            Ok(false) => Ok(Present::Done),
            Ok(true) => Ok(Present::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(Present::OutOfDate),
            Err(result) => Err(VkCallError {
                call: "queue_present",
                result,
            }
            .into()),
        }
    }

    fn drain(&mut self) -> Result<()> {
        self.ctx.wait_idle()?;
        self.ctx.check_fatal();
        Ok(())
    }
}

// Teardown: drain, swapchain resources, pipeline, surface; the context
// (device, messenger, instance) drops after this.
impl Drop for VkBackend {
    fn drop(&mut self) {
        if let Err(e) = self.ctx.wait_idle() {
            warn!("vk: {e} during teardown");
        }
        unsafe {
            if let Some(state) = self.swapchain.take() {
                state.destroy(&self.ctx);
            }
            self.pass.destroy(self.ctx.device());
            self.surface.destroy(&self.ctx);
        }
    }
}
