//! Vertex format accepted by the geometry-encode program and procedural meshes.

use bytemuck::{Pod, Zeroable};
use std::f32::consts::PI;
use wgpu::util::DeviceExt;

/// Vertex with position, normal, flat color and texture coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct GeometryVertex {
    /// Position in local space.
    pub position: [f32; 3],
    /// Normal vector in local space.
    pub normal: [f32; 3],
    /// Flat vertex color (linear RGBA).
    pub color: [f32; 4],
    /// Texture coordinates.
    pub uv: [f32; 2],
}

impl GeometryVertex {
    /// Vertex attributes.
    const ATTRIBUTES: [wgpu::VertexAttribute; 4] = wgpu::vertex_attr_array![
        0 => Float32x3,
        1 => Float32x3,
        2 => Float32x4,
        3 => Float32x2,
    ];

    /// Get the vertex buffer layout for this vertex type.
    pub fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Self>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// CPU-side indexed triangle list.
#[derive(Debug, Clone, Default)]
pub struct MeshData {
    /// Vertices.
    pub vertices: Vec<GeometryVertex>,
    /// Triangle indices.
    pub indices: Vec<u32>,
}

impl MeshData {
    /// UV sphere centered at the origin.
    pub fn sphere(radius: f32, width_segments: u32, height_segments: u32, color: [f32; 4]) -> Self {
        let width_segments = width_segments.max(3);
        let height_segments = height_segments.max(2);
        let mut data = Self::default();
        let row_len = width_segments + 1;

        for iy in 0..=height_segments {
            let v = iy as f32 / height_segments as f32;
            let theta = v * PI;

            for ix in 0..=width_segments {
                let u = ix as f32 / width_segments as f32;
                let phi = u * PI * 2.0;

                let normal = [-theta.sin() * phi.cos(), theta.cos(), theta.sin() * phi.sin()];
                data.vertices.push(GeometryVertex {
                    position: normal.map(|n| n * radius),
                    normal,
                    color,
                    uv: [u, 1.0 - v],
                });
            }
        }

        for iy in 0..height_segments {
            for ix in 0..width_segments {
                let a = iy * row_len + ix + 1;
                let b = iy * row_len + ix;
                let c = (iy + 1) * row_len + ix;
                let d = (iy + 1) * row_len + ix + 1;

                // Skip degenerate triangles at the poles.
                if iy != 0 {
                    data.indices.extend_from_slice(&[a, b, d]);
                }
                if iy != height_segments - 1 {
                    data.indices.extend_from_slice(&[b, c, d]);
                }
            }
        }

        data
    }

    /// Axis-aligned box centered at the origin.
    pub fn cuboid(width: f32, height: f32, depth: f32, color: [f32; 4]) -> Self {
        let half = [width / 2.0, height / 2.0, depth / 2.0];
        let mut data = Self::default();

        // (normal axis, sign, u axis, v axis)
        let faces: [(usize, f32, usize, usize); 6] = [
            (0, 1.0, 2, 1),
            (0, -1.0, 2, 1),
            (1, 1.0, 0, 2),
            (1, -1.0, 0, 2),
            (2, 1.0, 0, 1),
            (2, -1.0, 0, 1),
        ];

        for (w, sign, u, v) in faces {
            let base = data.vertices.len() as u32;
            let mut normal = [0.0; 3];
            normal[w] = sign;

            for (cu, cv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
                let mut position = [0.0; 3];
                position[w] = half[w] * sign;
                position[u] = half[u] * cu;
                position[v] = half[v] * cv;
                data.vertices.push(GeometryVertex {
                    position,
                    normal,
                    color,
                    uv: [(cu + 1.0) * 0.5, 1.0 - (cv + 1.0) * 0.5],
                });
            }

            data.indices
                .extend_from_slice(&[base, base + 1, base + 2, base, base + 2, base + 3]);
        }

        data
    }
}

/// GPU vertex and index buffers for a [`MeshData`].
pub struct Mesh {
    vertex_buffer: wgpu::Buffer,
    index_buffer: wgpu::Buffer,
    index_count: u32,
}

impl Mesh {
    /// Upload mesh data.
    pub fn new(device: &wgpu::Device, data: &MeshData, label: &str) -> Self {
        let vertex_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(&data.vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });

        let index_buffer = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(&data.indices),
            usage: wgpu::BufferUsages::INDEX,
        });

        Self {
            vertex_buffer,
            index_buffer,
            index_count: data.indices.len() as u32,
        }
    }

    /// Number of indices.
    #[inline]
    pub fn index_count(&self) -> u32 {
        self.index_count
    }

    /// Record an indexed draw of the whole mesh.
    pub fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
        pass.set_index_buffer(self.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
        pass.draw_indexed(0..self.index_count, 0, 0..1);
    }
}
