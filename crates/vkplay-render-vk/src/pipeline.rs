// SPDX-License-Identifier: CEPL-1.0
//! Shader loading, the single-subpass render pass and the triangle pipeline.

use std::io::Cursor;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use ash::util::read_spv;
use ash::vk;
use vkplay_render::{AttributeFormat, VertexLayout};

use crate::error::{ShaderError, VkResultExt};

static BUILTIN_VERT: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/tri.vert.spv"));
static BUILTIN_FRAG: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/tri.frag.spv"));

/// Validate and decode a SPIR-V blob (word-aligned length, magic number).
pub fn parse_spirv(name: &str, bytes: &[u8]) -> Result<Vec<u32>, ShaderError> {
    read_spv(&mut Cursor::new(bytes)).map_err(|source| ShaderError::InvalidSpirv {
        name: name.to_owned(),
        source,
    })
}

#[derive(Clone, Debug)]
pub struct ShaderSet {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderSet {
    /// Triangle shaders compiled into the binary by the build script.
    pub fn builtin() -> Result<Self, ShaderError> {
        Ok(Self {
            vertex: parse_spirv("tri.vert", BUILTIN_VERT)?,
            fragment: parse_spirv("tri.frag", BUILTIN_FRAG)?,
        })
    }

    pub fn from_files(vertex: &Path, fragment: &Path) -> Result<Self, ShaderError> {
        let load = |path: &Path| {
            let bytes = std::fs::read(path).map_err(|source| ShaderError::Io {
                path: path.to_owned(),
                source,
            })?;
            parse_spirv(&path.display().to_string(), &bytes)
        };
        Ok(Self {
            vertex: load(vertex)?,
            fragment: load(fragment)?,
        })
    }
}

pub fn attribute_format(format: AttributeFormat) -> vk::Format {
    match format {
        AttributeFormat::Float2 => vk::Format::R32G32_SFLOAT,
        AttributeFormat::Float3 => vk::Format::R32G32B32_SFLOAT,
        AttributeFormat::Float4 => vk::Format::R32G32B32A32_SFLOAT,
    }
}

/// Binding 0, per-vertex rate.
pub fn vertex_input(
    layout: &VertexLayout,
) -> (
    vk::VertexInputBindingDescription,
    Vec<vk::VertexInputAttributeDescription>,
) {
    let binding = vk::VertexInputBindingDescription {
        binding: 0,
        stride: layout.stride,
        input_rate: vk::VertexInputRate::VERTEX,
    };
    let attributes = layout
        .attributes
        .iter()
        .map(|a| vk::VertexInputAttributeDescription {
            location: a.location,
            binding: 0,
            format: attribute_format(a.format),
            offset: a.offset,
        })
        .collect();
    (binding, attributes)
}

unsafe fn create_render_pass(device: &ash::Device, format: vk::Format) -> Result<vk::RenderPass> {
    let attachment = vk::AttachmentDescription {
        format,
        samples: vk::SampleCountFlags::TYPE_1,
        load_op: vk::AttachmentLoadOp::CLEAR,
        store_op: vk::AttachmentStoreOp::STORE,
        stencil_load_op: vk::AttachmentLoadOp::DONT_CARE,
        stencil_store_op: vk::AttachmentStoreOp::DONT_CARE,
        initial_layout: vk::ImageLayout::UNDEFINED,
        final_layout: vk::ImageLayout::PRESENT_SRC_KHR,
        ..Default::default()
    };
    let color_ref = vk::AttachmentReference {
        attachment: 0,
        layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    };
    let subpass = vk::SubpassDescription {
        pipeline_bind_point: vk::PipelineBindPoint::GRAPHICS,
        color_attachment_count: 1,
        p_color_attachments: &color_ref,
        ..Default::default()
    };
    // Layout transition waits for the acquire semaphore's stage.
    let dependency = vk::SubpassDependency {
        src_subpass: vk::SUBPASS_EXTERNAL,
        dst_subpass: 0,
        src_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        dst_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        src_access_mask: vk::AccessFlags::empty(),
        dst_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ..Default::default()
    };
    let ci = vk::RenderPassCreateInfo {
        s_type: vk::StructureType::RENDER_PASS_CREATE_INFO,
        attachment_count: 1,
        p_attachments: &attachment,
        subpass_count: 1,
        p_subpasses: &subpass,
        dependency_count: 1,
        p_dependencies: &dependency,
        ..Default::default()
    };
    Ok(device
        .create_render_pass(&ci, None)
        .vk("create_render_pass")?)
}

unsafe fn shader_module(device: &ash::Device, code: &[u32]) -> Result<vk::ShaderModule> {
    let ci = vk::ShaderModuleCreateInfo {
        s_type: vk::StructureType::SHADER_MODULE_CREATE_INFO,
        p_code: code.as_ptr(),
        code_size: code.len() * 4,
        ..Default::default()
    };
    Ok(device
        .create_shader_module(&ci, None)
        .vk("create_shader_module")?)
}

/// Render pass, layout and pipeline for the colored triangle. Depends only on
/// the surface format, so it outlives swapchain rebuilds.
pub struct TrianglePass {
    render_pass: vk::RenderPass,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

impl TrianglePass {
    /// # Safety
    /// Destroy with [`TrianglePass::destroy`] before the device.
    pub unsafe fn new(
        device: &ash::Device,
        format: vk::Format,
        shaders: &ShaderSet,
        vertex_layout: &VertexLayout,
    ) -> Result<Self> {
        let render_pass = create_render_pass(device, format)?;
        let layout_info = vk::PipelineLayoutCreateInfo {
            s_type: vk::StructureType::PIPELINE_LAYOUT_CREATE_INFO,
            ..Default::default()
        };
        let layout = match device.create_pipeline_layout(&layout_info, None) {
            Ok(l) => l,
            Err(e) => {
                device.destroy_render_pass(render_pass, None);
                return Err(e).vk("create_pipeline_layout").map_err(Into::into);
            }
        };
        let mut pass = Self {
            render_pass,
            layout,
            pipeline: vk::Pipeline::null(),
        };
        match pass.build_pipeline(device, shaders, vertex_layout) {
            Ok(p) => {
                pass.pipeline = p;
                Ok(pass)
            }
            Err(e) => {
                pass.destroy(device);
                Err(e)
            }
        }
    }

    unsafe fn build_pipeline(
        &self,
        device: &ash::Device,
        shaders: &ShaderSet,
        vertex_layout: &VertexLayout,
    ) -> Result<vk::Pipeline> {
        let vs = shader_module(device, &shaders.vertex).context("vertex shader")?;
        let fs = match shader_module(device, &shaders.fragment) {
            Ok(m) => m,
            Err(e) => {
                device.destroy_shader_module(vs, None);
                return Err(e.context("fragment shader"));
            }
        };
        let entry = c"main";

        let stages = [
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::VERTEX,
                module: vs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
            vk::PipelineShaderStageCreateInfo {
                s_type: vk::StructureType::PIPELINE_SHADER_STAGE_CREATE_INFO,
                stage: vk::ShaderStageFlags::FRAGMENT,
                module: fs,
                p_name: entry.as_ptr(),
                ..Default::default()
            },
        ];

        let (binding, attributes) = vertex_input(vertex_layout);
        let vertex_input = vk::PipelineVertexInputStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VERTEX_INPUT_STATE_CREATE_INFO,
            vertex_binding_description_count: 1,
            p_vertex_binding_descriptions: &binding,
            vertex_attribute_description_count: attributes.len() as u32,
            p_vertex_attribute_descriptions: attributes.as_ptr(),
            ..Default::default()
        };
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_INPUT_ASSEMBLY_STATE_CREATE_INFO,
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            ..Default::default()
        };
        let dyn_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_DYNAMIC_STATE_CREATE_INFO,
            dynamic_state_count: dyn_states.len() as u32,
            p_dynamic_states: dyn_states.as_ptr(),
            ..Default::default()
        };
        let viewport_state = vk::PipelineViewportStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_VIEWPORT_STATE_CREATE_INFO,
            viewport_count: 1,
            scissor_count: 1,
            ..Default::default()
        };
        let raster = vk::PipelineRasterizationStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_RASTERIZATION_STATE_CREATE_INFO,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::NONE,
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            line_width: 1.0,
            ..Default::default()
        };
        let multisample = vk::PipelineMultisampleStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_MULTISAMPLE_STATE_CREATE_INFO,
            rasterization_samples: vk::SampleCountFlags::TYPE_1,
            ..Default::default()
        };
        let color_blend_att = vk::PipelineColorBlendAttachmentState {
            color_write_mask: vk::ColorComponentFlags::R
                | vk::ColorComponentFlags::G
                | vk::ColorComponentFlags::B
                | vk::ColorComponentFlags::A,
            blend_enable: vk::FALSE,
            ..Default::default()
        };
        let color_blend = vk::PipelineColorBlendStateCreateInfo {
            s_type: vk::StructureType::PIPELINE_COLOR_BLEND_STATE_CREATE_INFO,
            attachment_count: 1,
            p_attachments: &color_blend_att,
            ..Default::default()
        };

        let pipeline_info = vk::GraphicsPipelineCreateInfo {
            s_type: vk::StructureType::GRAPHICS_PIPELINE_CREATE_INFO,
            stage_count: stages.len() as u32,
            p_stages: stages.as_ptr(),
            p_vertex_input_state: &vertex_input,
            p_input_assembly_state: &input_assembly,
            p_viewport_state: &viewport_state,
            p_rasterization_state: &raster,
            p_multisample_state: &multisample,
            p_color_blend_state: &color_blend,
            p_dynamic_state: &dynamic_state,
            layout: self.layout,
            render_pass: self.render_pass,
            subpass: 0,
            ..Default::default()
        };

        let created = device.create_graphics_pipelines(
            vk::PipelineCache::null(),
            std::slice::from_ref(&pipeline_info),
            None,
        );
        device.destroy_shader_module(vs, None);
        device.destroy_shader_module(fs, None);
        match created {
            Ok(p) => p
                .first()
                .copied()
                .ok_or_else(|| anyhow!("create_graphics_pipelines returned nothing")),
            Err((_, err)) => Err(anyhow!("create_graphics_pipelines failed: {err:?}")),
        }
    }

    pub fn render_pass(&self) -> vk::RenderPass {
        self.render_pass
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    /// # Safety
    /// No pending GPU work may reference the pipeline or render pass.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        if self.pipeline != vk::Pipeline::null() {
            device.destroy_pipeline(self.pipeline, None);
            self.pipeline = vk::Pipeline::null();
        }
        if self.layout != vk::PipelineLayout::null() {
            device.destroy_pipeline_layout(self.layout, None);
            self.layout = vk::PipelineLayout::null();
        }
        if self.render_pass != vk::RenderPass::null() {
            device.destroy_render_pass(self.render_pass, None);
            self.render_pass = vk::RenderPass::null();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use vkplay_render::Vertex;

    #[test]
    fn builtin_shaders_are_valid_spirv() {
        let set = ShaderSet::builtin().unwrap();
        assert_eq!(set.vertex[0], 0x0723_0203);
        assert_eq!(set.fragment[0], 0x0723_0203);
    }

    #[test]
    fn rejects_unaligned_blob() {
        let err = parse_spirv("odd", &[0x03, 0x02, 0x23, 0x07, 0x00]).unwrap_err();
        assert!(matches!(err, ShaderError::InvalidSpirv { ref name, .. } if name == "odd"));
    }

    #[test]
    fn rejects_missing_magic() {
        assert!(parse_spirv("zeros", &[0u8; 16]).is_err());
    }

    #[test]
    fn loads_from_files_and_reports_missing_ones() {
        let dir = tempfile::tempdir().unwrap();
        let vert = dir.path().join("tri.vert.spv");
        let frag = dir.path().join("tri.frag.spv");
        std::fs::File::create(&vert)
            .unwrap()
            .write_all(BUILTIN_VERT)
            .unwrap();
        std::fs::write(&frag, BUILTIN_FRAG).unwrap();

        let set = ShaderSet::from_files(&vert, &frag).unwrap();
        assert_eq!(set.vertex, ShaderSet::builtin().unwrap().vertex);

        let missing = dir.path().join("nope.spv");
        let err = ShaderSet::from_files(&vert, &missing).unwrap_err();
        assert!(matches!(err, ShaderError::Io { ref path, .. } if path == &missing));
    }

    #[test]
    fn triangle_layout_maps_to_vk_formats() {
        let (binding, attrs) = vertex_input(&Vertex::layout());
        assert_eq!(binding.stride, 20);
        assert_eq!(attrs.len(), 2);
        assert_eq!(attrs[0].format, vk::Format::R32G32_SFLOAT);
        assert_eq!(attrs[0].offset, 0);
        assert_eq!(attrs[1].format, vk::Format::R32G32B32_SFLOAT);
        assert_eq!(attrs[1].offset, 8);
        assert_eq!(attrs[1].location, 1);
    }
}
