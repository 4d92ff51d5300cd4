// SPDX-License-Identifier: CEPL-1.0
//! Persistently mapped, host-coherent buffers for per-frame vertex uploads.

use anyhow::{bail, Context, Result};
use ash::vk;
use bytemuck::Pod;

use crate::device::DeviceContext;
use crate::error::VkResultExt;

/// First memory type allowed by `type_bits` that has all of `required`.
pub fn find_memory_type(
    props: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Option<u32> {
    (0..props.memory_type_count).find(|&i| {
        (type_bits & (1 << i)) != 0
            && props.memory_types[i as usize]
                .property_flags
                .contains(required)
    })
}

pub struct HostBuffer {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    mapped: *mut u8,
    capacity: vk::DeviceSize,
}

impl HostBuffer {
    /// # Safety
    /// Must be destroyed with [`HostBuffer::destroy`] on the same device.
    pub unsafe fn new(
        ctx: &DeviceContext,
        capacity: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
    ) -> Result<Self> {
        let device = ctx.device();
        let bci = vk::BufferCreateInfo {
            s_type: vk::StructureType::BUFFER_CREATE_INFO,
            size: capacity,
            usage,
            sharing_mode: vk::SharingMode::EXCLUSIVE,
            ..Default::default()
        };
        let buffer = device.create_buffer(&bci, None).vk("create_buffer")?;

        let req = device.get_buffer_memory_requirements(buffer);
        let Some(memory_type_index) = find_memory_type(
            &ctx.memory_properties(),
            req.memory_type_bits,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ) else {
            device.destroy_buffer(buffer, None);
            bail!("no host-visible coherent memory type for a {capacity}-byte buffer");
        };

        let mai = vk::MemoryAllocateInfo {
            s_type: vk::StructureType::MEMORY_ALLOCATE_INFO,
            allocation_size: req.size,
            memory_type_index,
            ..Default::default()
        };
        let memory = match device.allocate_memory(&mai, None) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_buffer(buffer, None);
                return Err(e).vk("allocate_memory").context("host buffer");
            }
        };
        let mapped = device
            .bind_buffer_memory(buffer, memory, 0)
            .and_then(|()| device.map_memory(memory, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty()));
        match mapped {
            Ok(ptr) => Ok(Self {
                buffer,
                memory,
                mapped: ptr.cast(),
                capacity,
            }),
            Err(e) => {
                device.free_memory(memory, None);
                device.destroy_buffer(buffer, None);
                Err(e).vk("bind_buffer_memory/map_memory").context("host buffer")
            }
        }
    }

    pub fn buffer(&self) -> vk::Buffer {
        self.buffer
    }

    pub fn capacity(&self) -> vk::DeviceSize {
        self.capacity
    }

    /// Copy `data` to the start of the buffer. The GPU must not be reading
    /// it (the owning frame slot's fence has been waited on).
    pub fn write<T: Pod>(&mut self, data: &[T]) -> Result<()> {
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if bytes.len() as vk::DeviceSize > self.capacity {
            bail!(
                "upload of {} bytes exceeds buffer capacity {}",
                bytes.len(),
                self.capacity
            );
        }
        // SAFETY: mapped points at `capacity` bytes of host-coherent memory.
        unsafe { std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.mapped, bytes.len()) };
        Ok(())
    }

    /// # Safety
    /// No pending GPU work may reference the buffer.
    pub unsafe fn destroy(self, device: &ash::Device) {
        device.unmap_memory(self.memory);
        device.destroy_buffer(self.buffer, None);
        device.free_memory(self.memory, None);
    }
}
