// SPDX-License-Identifier: CEPL-1.0
use bytemuck::{Pod, Zeroable};

#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub pos: [f32; 2],
    pub color: [f32; 3],
}

pub const TRIANGLE: [Vertex; 3] = [
    // top (red)
    Vertex {
        pos: [0.0, -0.5],
        color: [1.0, 0.0, 0.0],
    },
    // right (green)
    Vertex {
        pos: [0.5, 0.5],
        color: [0.0, 1.0, 0.0],
    },
    // left (blue)
    Vertex {
        pos: [-0.5, 0.5],
        color: [0.0, 0.0, 1.0],
    },
];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttributeFormat {
    Float2,
    Float3,
    Float4,
}

impl AttributeFormat {
    pub fn size(self) -> u32 {
        match self {
            AttributeFormat::Float2 => 8,
            AttributeFormat::Float3 => 12,
            AttributeFormat::Float4 => 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VertexAttribute {
    pub location: u32,
    pub format: AttributeFormat,
    pub offset: u32,
}

/// Single interleaved binding; what the pipeline's vertex input state needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VertexLayout {
    pub stride: u32,
    pub attributes: Vec<VertexAttribute>,
}

impl Vertex {
    pub fn layout() -> VertexLayout {
        VertexLayout {
            stride: std::mem::size_of::<Vertex>() as u32,
            attributes: vec![
                VertexAttribute {
                    location: 0,
                    format: AttributeFormat::Float2,
                    offset: std::mem::offset_of!(Vertex, pos) as u32,
                },
                VertexAttribute {
                    location: 1,
                    format: AttributeFormat::Float3,
                    offset: std::mem::offset_of!(Vertex, color) as u32,
                },
            ],
        }
    }
}
