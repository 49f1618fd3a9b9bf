//! Debug tiles: draw textures into sub-rectangles of an output view.

use crate::core::{
    capture_pipeline_errors, compile_program, texture_entry, uniform_entry, unfilterable_texture_entry,
    with_fullscreen_vertex, ShaderError,
};
use wgpu::util::DeviceExt;

const DEBUG_TILE_WGSL: &str = include_str!("../shaders/debug_tile.wgsl");

/// What a tile shows.
#[derive(Clone, Copy)]
pub enum TileSource<'a> {
    /// RGB of a float-readable texture.
    Color(&'a wgpu::TextureView),
    /// Alpha of a float-readable texture as grayscale.
    Alpha(&'a wgpu::TextureView),
    /// Depth aspect of a depth texture as grayscale.
    Depth(&'a wgpu::TextureView),
}

/// Tile rectangle in output pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileRect {
    /// Left edge.
    pub x: f32,
    /// Top edge.
    pub y: f32,
    /// Width in pixels.
    pub width: f32,
    /// Height in pixels.
    pub height: f32,
}

impl TileRect {
    /// Quarter-size tiles left to right along the bottom of the output.
    pub fn bottom_row(output_size: (u32, u32), count: u32) -> Vec<TileRect> {
        let width = output_size.0 as f32 * 0.25;
        let height = output_size.1 as f32 * 0.25;
        (0..count)
            .map(|i| TileRect {
                x: width * i as f32,
                y: height * 3.0,
                width,
                height,
            })
            .collect()
    }

    /// Square tiles of `size` pixels separated by `gap`, starting at `(gap, gap)`.
    pub fn top_row(size: f32, gap: f32, count: u32) -> Vec<TileRect> {
        (0..count)
            .map(|i| TileRect {
                x: gap + (size + gap) * i as f32,
                y: gap,
                width: size,
                height: size,
            })
            .collect()
    }

    /// Clip to an output of `output_size`; `None` when nothing is visible.
    fn clipped(&self, output_size: (u32, u32)) -> Option<TileRect> {
        let right = (self.x + self.width).min(output_size.0 as f32);
        let bottom = (self.y + self.height).min(output_size.1 as f32);
        let x = self.x.max(0.0);
        let y = self.y.max(0.0);
        (right > x && bottom > y).then_some(TileRect {
            x,
            y,
            width: right - x,
            height: bottom - y,
        })
    }
}

/// Pipelines for drawing debug tiles into one output format.
pub struct DebugTiles {
    color_pipeline: wgpu::RenderPipeline,
    depth_pipeline: wgpu::RenderPipeline,
    color_layout: wgpu::BindGroupLayout,
    depth_layout: wgpu::BindGroupLayout,
    color_params: wgpu::Buffer,
    alpha_params: wgpu::Buffer,
}

impl DebugTiles {
    /// Build tile pipelines writing `format`.
    pub fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Result<Self, ShaderError> {
        let source = with_fullscreen_vertex(DEBUG_TILE_WGSL);
        let module = compile_program(device, "Debug Tile Shader", &source)?;

        let color_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Debug Tile Layout"),
            entries: &[unfilterable_texture_entry(0), uniform_entry(1, false)],
        });
        let depth_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Debug Depth Tile Layout"),
            entries: &[texture_entry(2, wgpu::TextureSampleType::Depth)],
        });

        let (color_pipeline, depth_pipeline) = capture_pipeline_errors(device, "Debug Tile Pipelines", || {
            let build = |label: &str, layout: &wgpu::BindGroupLayout, entry_point: &str| {
                let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                    label: Some(label),
                    bind_group_layouts: &[layout],
                    push_constant_ranges: &[],
                });
                device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                    label: Some(label),
                    layout: Some(&pipeline_layout),
                    vertex: wgpu::VertexState {
                        module: &module,
                        entry_point: Some("vs_main"),
                        buffers: &[],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    },
                    fragment: Some(wgpu::FragmentState {
                        module: &module,
                        entry_point: Some(entry_point),
                        targets: &[Some(wgpu::ColorTargetState {
                            format,
                            blend: None,
                            write_mask: wgpu::ColorWrites::ALL,
                        })],
                        compilation_options: wgpu::PipelineCompilationOptions::default(),
                    }),
                    primitive: wgpu::PrimitiveState::default(),
                    depth_stencil: None,
                    multisample: wgpu::MultisampleState::default(),
                    multiview: None,
                    cache: None,
                })
            };
            (
                build("Debug Tile Pipeline", &color_layout, "fs_main"),
                build("Debug Depth Tile Pipeline", &depth_layout, "fs_depth"),
            )
        })?;

        let params = |label: &str, alpha: f32| {
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some(label),
                contents: bytemuck::cast_slice(&[alpha, 0.0f32, 0.0, 0.0]),
                usage: wgpu::BufferUsages::UNIFORM,
            })
        };

        Ok(Self {
            color_pipeline,
            depth_pipeline,
            color_layout,
            depth_layout,
            color_params: params("Debug Tile Color Params", 0.0),
            alpha_params: params("Debug Tile Alpha Params", 1.0),
        })
    }

    /// Draw each tile over the existing contents of `output`.
    pub fn draw(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        output: &wgpu::TextureView,
        output_size: (u32, u32),
        tiles: &[(TileSource<'_>, TileRect)],
    ) {
        let bind_groups = tiles
            .iter()
            .map(|(source, _)| self.bind_group(device, *source))
            .collect::<Vec<_>>();

        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Debug Tile Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: output,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        for ((source, rect), bind_group) in tiles.iter().zip(&bind_groups) {
            let Some(rect) = rect.clipped(output_size) else {
                continue;
            };
            let pipeline = match source {
                TileSource::Depth(_) => &self.depth_pipeline,
                _ => &self.color_pipeline,
            };
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.set_viewport(rect.x, rect.y, rect.width, rect.height, 0.0, 1.0);
            pass.draw(0..3, 0..1);
        }
    }

    fn bind_group(&self, device: &wgpu::Device, source: TileSource<'_>) -> wgpu::BindGroup {
        match source {
            TileSource::Color(view) | TileSource::Alpha(view) => {
                let params = match source {
                    TileSource::Alpha(_) => &self.alpha_params,
                    _ => &self.color_params,
                };
                device.create_bind_group(&wgpu::BindGroupDescriptor {
                    label: Some("Debug Tile Bind Group"),
                    layout: &self.color_layout,
                    entries: &[
                        wgpu::BindGroupEntry {
                            binding: 0,
                            resource: wgpu::BindingResource::TextureView(view),
                        },
                        wgpu::BindGroupEntry {
                            binding: 1,
                            resource: params.as_entire_binding(),
                        },
                    ],
                })
            }
            TileSource::Depth(view) => device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Debug Depth Tile Bind Group"),
                layout: &self.depth_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(view),
                }],
            }),
        }
    }
}
