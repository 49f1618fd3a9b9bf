//! # G-Buffer
//!
//! Four fixed channels written by one geometry-encode program:
//!
//! | Channel        | Format        | Contents                                   |
//! |----------------|---------------|--------------------------------------------|
//! | `Albedo`       | `Rgba8Unorm`  | vertex color mixed with the albedo texture |
//! | `NormalDepth`  | `Rgba32Float` | view-space normal, linear depth in alpha   |
//! | `Velocity`     | `Rg8Unorm`    | encoded half-NDC motion vector             |
//! | `LightAccum`   | `Rgba16Float` | additive light written in [`Mode::Light`]  |
//!
//! Every consumer reads the channels with `textureLoad`, so values are never
//! filtered or interpolated.
//!
//! A frame is opened with [`GBuffer::begin`], which returns a
//! [`GBufferFrame`]: the frame owns the render pass and the bound program,
//! and dropping it ends the pass.

mod debug;
mod frame;
pub mod velocity;

pub use debug::{DebugTiles, TileRect, TileSource};
pub use frame::GBufferFrame;

use crate::camera::{CameraState, FrameState, Viewport};
use crate::core::{
    aligned_uniform_stride, capture_pipeline_errors, compile_program, sampler_entry, texture_entry,
    uniform_entry, DepthAttachment, RenderTarget, ShaderError, DEPTH_STENCIL_FORMAT,
};
use crate::scene::{GeometryVertex, Mesh, MeshData, TransformHistory};
use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Quat, Vec3};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use wgpu::util::DeviceExt;

const GEOMETRY_WGSL: &str = include_str!("../shaders/geometry.wgsl");

/// Clear color of every channel. Decodes to zero velocity.
pub const NEUTRAL_CLEAR: wgpu::Color = wgpu::Color {
    r: 127.0 / 255.0,
    g: 127.0 / 255.0,
    b: 127.0 / 255.0,
    a: 1.0,
};

/// Errors raised by the G-Buffer.
#[derive(Error, Debug)]
pub enum GBufferError {
    /// More draws were issued in one frame than the per-draw uniform buffer holds.
    #[error("G-Buffer draw capacity of {capacity} per frame exceeded")]
    DrawCapacityExceeded {
        /// Configured `max_draws_per_frame`.
        capacity: u32,
    },

    /// An operation was used in a frame opened with the wrong mode.
    #[error("{operation} requires {expected:?} mode, frame is in {actual:?} mode")]
    WrongMode {
        /// Operation name.
        operation: &'static str,
        /// Mode the operation needs.
        expected: Mode,
        /// Mode of the open frame.
        actual: Mode,
    },

    /// A G-Buffer program failed to build.
    #[error(transparent)]
    Shader(#[from] ShaderError),
}

/// G-Buffer channel index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Albedo color.
    Albedo = 0,
    /// View-space normal and linear depth.
    NormalDepth = 1,
    /// Encoded velocity.
    Velocity = 2,
    /// Light accumulation.
    LightAccum = 3,
}

impl Channel {
    /// All channels in index order.
    pub const ALL: [Channel; 4] = [
        Channel::Albedo,
        Channel::NormalDepth,
        Channel::Velocity,
        Channel::LightAccum,
    ];

    /// Channel index.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Texture format of the channel.
    pub const fn format(self) -> wgpu::TextureFormat {
        match self {
            Channel::Albedo => wgpu::TextureFormat::Rgba8Unorm,
            Channel::NormalDepth => wgpu::TextureFormat::Rgba32Float,
            Channel::Velocity => wgpu::TextureFormat::Rg8Unorm,
            Channel::LightAccum => wgpu::TextureFormat::Rgba16Float,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Channel::Albedo => "G-Buffer Albedo",
            Channel::NormalDepth => "G-Buffer Normal Depth",
            Channel::Velocity => "G-Buffer Velocity",
            Channel::LightAccum => "G-Buffer Light Accumulation",
        }
    }
}

/// Write mode of a G-Buffer frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    /// Write albedo, normal-depth and velocity.
    Geometry,
    /// Accumulate into the light channel.
    Light,
}

impl Mode {
    /// Channels written in this mode.
    pub fn channels(self) -> &'static [Channel] {
        match self {
            Mode::Geometry => &[Channel::Albedo, Channel::NormalDepth, Channel::Velocity],
            Mode::Light => &[Channel::LightAccum],
        }
    }

    fn index(self) -> usize {
        match self {
            Mode::Geometry => 0,
            Mode::Light => 1,
        }
    }
}

/// G-Buffer settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GBufferSettings {
    /// Draws (including the camera proxy) one frame may issue.
    pub max_draws_per_frame: u32,
    /// Draw a camera-centered sphere into the velocity channel first.
    pub camera_motion_proxy: bool,
    /// Proxy sphere radius as a fraction of the far clip distance.
    pub proxy_radius_factor: f32,
}

impl Default for GBufferSettings {
    fn default() -> Self {
        Self {
            max_draws_per_frame: 1024,
            camera_motion_proxy: true,
            proxy_radius_factor: 0.5,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct FrameUniform {
    view_projection: [[f32; 4]; 4],
    inverse_view_projection: [[f32; 4]; 4],
    previous_view_projection: [[f32; 4]; 4],
    view: [[f32; 4]; 4],
    /// x: far clip
    params: [f32; 4],
}

impl FrameUniform {
    fn new(frame: &FrameState, previous_view_projection: Mat4) -> Self {
        Self {
            view_projection: frame.view_projection.to_cols_array_2d(),
            inverse_view_projection: frame.inverse_view_projection.to_cols_array_2d(),
            previous_view_projection: previous_view_projection.to_cols_array_2d(),
            view: frame.view.to_cols_array_2d(),
            params: [frame.far_clip, frame.viewport.width, frame.viewport.height, 0.0],
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DrawUniform {
    model: [[f32; 4]; 4],
    previous_model: [[f32; 4]; 4],
    inverse_model: [[f32; 4]; 4],
    normal_matrix: [[f32; 4]; 4],
    /// x: has texture
    params: [f32; 4],
}

impl DrawUniform {
    fn new(frame: &FrameState, model: Mat4, previous_model: Mat4, textured: bool) -> Self {
        let normal_matrix = (frame.view * model).inverse().transpose();
        Self {
            model: model.to_cols_array_2d(),
            previous_model: previous_model.to_cols_array_2d(),
            inverse_model: model.inverse().to_cols_array_2d(),
            normal_matrix: normal_matrix.to_cols_array_2d(),
            params: [if textured { 1.0 } else { 0.0 }, 0.0, 0.0, 0.0],
        }
    }
}

/// Albedo texture bound while encoding a drawable.
pub struct AlbedoTexture {
    bind_group: wgpu::BindGroup,
}

impl AlbedoTexture {
    pub(crate) fn bind_group(&self) -> &wgpu::BindGroup {
        &self.bind_group
    }
}

/// Per-mode cursor into the dynamic draw uniform buffers.
#[derive(Debug, Clone, Copy)]
struct DrawSlots {
    capacity: u32,
    stride: u64,
    next: [u32; 2],
}

impl DrawSlots {
    fn new(capacity: u32, stride: u64) -> Self {
        Self {
            capacity,
            stride,
            next: [0; 2],
        }
    }

    /// Start a new frame of `mode`.
    fn reset(&mut self, mode: Mode) {
        self.next[mode.index()] = 0;
    }

    fn allocate(&mut self, mode: Mode) -> Result<u32, GBufferError> {
        let next = &mut self.next[mode.index()];
        if *next >= self.capacity {
            log::warn!("G-Buffer draw capacity of {} exceeded", self.capacity);
            return Err(GBufferError::DrawCapacityExceeded {
                capacity: self.capacity,
            });
        }
        let offset = *next as u64 * self.stride;
        *next += 1;
        Ok(offset as u32)
    }
}

/// The multi-channel intermediate buffer.
pub struct GBuffer {
    width: u32,
    height: u32,
    settings: GBufferSettings,
    channels: [RenderTarget; 4],
    depth: DepthAttachment,
    geometry_pipeline: wgpu::RenderPipeline,
    proxy_pipeline: wgpu::RenderPipeline,
    light_pipeline: wgpu::RenderPipeline,
    texture_layout: wgpu::BindGroupLayout,
    albedo_sampler: wgpu::Sampler,
    frame_buffers: [wgpu::Buffer; 2],
    frame_bind_groups: [wgpu::BindGroup; 2],
    draw_buffers: [wgpu::Buffer; 2],
    draw_bind_groups: [wgpu::BindGroup; 2],
    draw_slots: DrawSlots,
    default_texture: AlbedoTexture,
    previous_view_projection: Option<Mat4>,
    proxy_mesh: Mesh,
    proxy: Option<TransformHistory>,
}

impl GBuffer {
    /// Build the programs and allocate a `width` x `height` buffer.
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        width: u32,
        height: u32,
        settings: GBufferSettings,
    ) -> Result<Self, GBufferError> {
        let mut settings = settings;
        if settings.max_draws_per_frame == 0 {
            log::warn!("G-Buffer max_draws_per_frame of 0 raised to 1");
            settings.max_draws_per_frame = 1;
        }

        let module = compile_program(device, "G-Buffer Geometry Shader", GEOMETRY_WGSL)?;

        let frame_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("G-Buffer Frame Layout"),
            entries: &[uniform_entry(0, false)],
        });
        let draw_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("G-Buffer Draw Layout"),
            entries: &[uniform_entry(0, true)],
        });
        let texture_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("G-Buffer Albedo Texture Layout"),
            entries: &[
                texture_entry(0, wgpu::TextureSampleType::Float { filterable: true }),
                sampler_entry(1, wgpu::SamplerBindingType::Filtering),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("G-Buffer Pipeline Layout"),
            bind_group_layouts: &[&frame_layout, &draw_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let geometry_targets = Mode::Geometry
            .channels()
            .iter()
            .map(|channel| {
                Some(wgpu::ColorTargetState {
                    format: channel.format(),
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })
            })
            .collect::<Vec<_>>();

        // The proxy only contributes camera motion.
        let proxy_targets = Mode::Geometry
            .channels()
            .iter()
            .map(|&channel| {
                Some(wgpu::ColorTargetState {
                    format: channel.format(),
                    blend: None,
                    write_mask: if channel == Channel::Velocity {
                        wgpu::ColorWrites::ALL
                    } else {
                        wgpu::ColorWrites::empty()
                    },
                })
            })
            .collect::<Vec<_>>();

        let additive = wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::One,
            operation: wgpu::BlendOperation::Add,
        };
        let light_targets = [Some(wgpu::ColorTargetState {
            format: Channel::LightAccum.format(),
            blend: Some(wgpu::BlendState {
                color: additive,
                alpha: additive,
            }),
            write_mask: wgpu::ColorWrites::ALL,
        })];

        let (geometry_pipeline, proxy_pipeline, light_pipeline) =
            capture_pipeline_errors(device, "G-Buffer Pipelines", || {
                let build = |label: &str,
                             entry_point: &str,
                             targets: &[Option<wgpu::ColorTargetState>],
                             depth_write: bool,
                             compare: wgpu::CompareFunction| {
                    device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                        label: Some(label),
                        layout: Some(&pipeline_layout),
                        vertex: wgpu::VertexState {
                            module: &module,
                            entry_point: Some("vs_main"),
                            buffers: &[GeometryVertex::layout()],
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        },
                        fragment: Some(wgpu::FragmentState {
                            module: &module,
                            entry_point: Some(entry_point),
                            targets,
                            compilation_options: wgpu::PipelineCompilationOptions::default(),
                        }),
                        primitive: wgpu::PrimitiveState {
                            topology: wgpu::PrimitiveTopology::TriangleList,
                            cull_mode: None,
                            ..Default::default()
                        },
                        depth_stencil: Some(wgpu::DepthStencilState {
                            format: DEPTH_STENCIL_FORMAT,
                            depth_write_enabled: depth_write,
                            depth_compare: compare,
                            stencil: wgpu::StencilState::default(),
                            bias: wgpu::DepthBiasState::default(),
                        }),
                        multisample: wgpu::MultisampleState::default(),
                        multiview: None,
                        cache: None,
                    })
                };
                (
                    build("G-Buffer Geometry Pipeline", "fs_main", &geometry_targets, true, wgpu::CompareFunction::Less),
                    build("G-Buffer Proxy Pipeline", "fs_proxy", &proxy_targets, false, wgpu::CompareFunction::Always),
                    build("G-Buffer Light Pipeline", "fs_light", &light_targets, false, wgpu::CompareFunction::LessEqual),
                )
            })?;

        let frame_buffers = [Mode::Geometry, Mode::Light].map(|mode| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(match mode {
                    Mode::Geometry => "G-Buffer Geometry Frame Uniforms",
                    Mode::Light => "G-Buffer Light Frame Uniforms",
                }),
                size: std::mem::size_of::<FrameUniform>() as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        let frame_bind_groups = [0, 1].map(|i| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("G-Buffer Frame Bind Group"),
                layout: &frame_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: frame_buffers[i].as_entire_binding(),
                }],
            })
        });

        let draw_size = std::mem::size_of::<DrawUniform>() as u64;
        let draw_stride = aligned_uniform_stride(device, draw_size);
        // One buffer per mode, so a light frame never overwrites the slots of
        // a geometry frame recorded into the same submission.
        let draw_buffers: [wgpu::Buffer; 2] = std::array::from_fn(|_| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("G-Buffer Draw Uniforms"),
                size: draw_stride * settings.max_draws_per_frame as u64,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        });
        let draw_bind_groups: [wgpu::BindGroup; 2] = std::array::from_fn(|i| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("G-Buffer Draw Bind Group"),
                layout: &draw_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                        buffer: &draw_buffers[i],
                        offset: 0,
                        size: wgpu::BufferSize::new(draw_size),
                    }),
                }],
            })
        });

        let albedo_sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("G-Buffer Albedo Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let proxy_mesh = Mesh::new(
            device,
            &MeshData::sphere(1.0, 24, 16, [0.0; 4]),
            "G-Buffer Camera Proxy",
        );

        let default_view = upload_rgba_texture(device, queue, 1, 1, &[255; 4]);
        let default_texture = AlbedoTexture {
            bind_group: albedo_bind_group(device, &texture_layout, &albedo_sampler, &default_view),
        };

        let (channels, depth) = allocate(device, width, height);

        log::info!(
            "G-Buffer created: {}x{}, {} draws per frame",
            width,
            height,
            settings.max_draws_per_frame
        );

        Ok(Self {
            width,
            height,
            settings,
            channels,
            depth,
            geometry_pipeline,
            proxy_pipeline,
            light_pipeline,
            texture_layout,
            albedo_sampler,
            frame_buffers,
            frame_bind_groups,
            draw_buffers,
            draw_bind_groups,
            draw_slots: DrawSlots::new(settings.max_draws_per_frame, draw_stride),
            default_texture,
            previous_view_projection: None,
            proxy_mesh,
            proxy: None,
        })
    }

    /// Reallocate the channels at a new resolution.
    ///
    /// Cross-frame history is kept; programs are not rebuilt.
    pub fn setup(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        let (channels, depth) = allocate(device, width, height);
        self.channels = channels;
        self.depth = depth;
        self.width = width;
        self.height = height;
        log::info!("G-Buffer resized to {}x{}", width, height);
    }

    /// Open a frame in `mode`.
    ///
    /// The camera is snapshotted and every channel written by `mode` is
    /// cleared to [`NEUTRAL_CLEAR`]. A geometry frame also clears depth,
    /// consumes and replaces the previous view-projection, and draws the
    /// camera-motion proxy when enabled. A light frame keeps the geometry
    /// depth for testing.
    pub fn begin<'a>(
        &'a mut self,
        encoder: &'a mut wgpu::CommandEncoder,
        queue: &'a wgpu::Queue,
        camera: &dyn CameraState,
        mode: Mode,
    ) -> GBufferFrame<'a> {
        let viewport = Viewport::from_size(self.width, self.height);
        // Frame rate is not read by the encode programs.
        let frame = FrameState::capture(camera, viewport, 0.0);

        let previous_view_projection = match mode {
            Mode::Geometry => self.previous_view_projection.unwrap_or(frame.view_projection),
            Mode::Light => frame.view_projection,
        };
        queue.write_buffer(
            &self.frame_buffers[mode.index()],
            0,
            bytemuck::bytes_of(&FrameUniform::new(&frame, previous_view_projection)),
        );
        if mode == Mode::Geometry {
            self.previous_view_projection = Some(frame.view_projection);
        }
        self.draw_slots.reset(mode);

        let pass = {
            let color_attachments = mode
                .channels()
                .iter()
                .map(|&channel| Some(self.channels[channel.index()].clearing_attachment(NEUTRAL_CLEAR)))
                .collect::<Vec<_>>();
            let depth_stencil_attachment = match mode {
                Mode::Geometry => self.depth.clearing_attachment(),
                Mode::Light => wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                },
            };

            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(match mode {
                    Mode::Geometry => "G-Buffer Geometry Pass",
                    Mode::Light => "G-Buffer Light Pass",
                }),
                color_attachments: &color_attachments,
                depth_stencil_attachment: Some(depth_stencil_attachment),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_viewport(0.0, 0.0, viewport.width.max(1.0), viewport.height.max(1.0), 0.0, 1.0);
            pass.set_bind_group(0, &self.frame_bind_groups[mode.index()], &[]);
            pass
        };

        let draw_proxy = mode == Mode::Geometry && self.settings.camera_motion_proxy;
        let mut gbuffer_frame = GBufferFrame::new(self, queue, pass, mode, frame);
        if draw_proxy {
            gbuffer_frame.draw_camera_proxy();
        }
        gbuffer_frame.bind_mode_pipeline();
        gbuffer_frame
    }

    /// Reserve the next per-draw uniform slot of `mode`, returning its byte offset.
    fn allocate_draw_slot(&mut self, mode: Mode) -> Result<u32, GBufferError> {
        self.draw_slots.allocate(mode)
    }

    fn draw_buffer(&self, mode: Mode) -> &wgpu::Buffer {
        &self.draw_buffers[mode.index()]
    }

    fn draw_bind_group(&self, mode: Mode) -> &wgpu::BindGroup {
        &self.draw_bind_groups[mode.index()]
    }

    /// Camera proxy transform for this frame, with its history advanced.
    fn advance_proxy(&mut self, frame: &FrameState) -> TransformHistory {
        let radius = self.settings.proxy_radius_factor * frame.far_clip;
        let transform = Mat4::from_scale_rotation_translation(Vec3::splat(radius), Quat::IDENTITY, frame.position);
        let history = match self.proxy {
            Some(mut history) => {
                history.set(transform);
                history
            }
            None => TransformHistory::new(transform),
        };
        let mut flushed = history;
        flushed.flush();
        self.proxy = Some(flushed);
        history
    }

    /// Wrap a texture view for use as a drawable's albedo texture.
    pub fn create_albedo_texture(&self, device: &wgpu::Device, view: &wgpu::TextureView) -> AlbedoTexture {
        AlbedoTexture {
            bind_group: albedo_bind_group(device, &self.texture_layout, &self.albedo_sampler, view),
        }
    }

    /// Upload tightly packed RGBA8 pixels as an albedo texture.
    pub fn upload_albedo_texture(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        width: u32,
        height: u32,
        rgba: &[u8],
    ) -> AlbedoTexture {
        let view = upload_rgba_texture(device, queue, width, height, rgba);
        self.create_albedo_texture(device, &view)
    }

    /// Draw every channel as a tile along the bottom quarter of `output`.
    ///
    /// Tiles, left to right: albedo, normal-depth, velocity, and the
    /// normal-depth alpha (linear depth) as grayscale.
    pub fn debug_draw(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        tiles: &DebugTiles,
        output: &wgpu::TextureView,
        output_size: (u32, u32),
    ) {
        let rects = TileRect::bottom_row(output_size, 4);
        let sources = [
            TileSource::Color(self.view(Channel::Albedo)),
            TileSource::Color(self.view(Channel::NormalDepth)),
            TileSource::Color(self.view(Channel::Velocity)),
            TileSource::Alpha(self.view(Channel::NormalDepth)),
        ];
        let entries = sources.into_iter().zip(rects).collect::<Vec<_>>();
        tiles.draw(device, encoder, output, output_size, &entries);
    }

    /// Width in pixels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Settings in effect.
    #[inline]
    pub fn settings(&self) -> &GBufferSettings {
        &self.settings
    }

    /// Texture backing `channel`.
    #[inline]
    pub fn texture(&self, channel: Channel) -> &wgpu::Texture {
        &self.channels[channel.index()].texture
    }

    /// View of `channel`.
    #[inline]
    pub fn view(&self, channel: Channel) -> &wgpu::TextureView {
        &self.channels[channel.index()].view
    }

    /// Depth/stencil attachment.
    #[inline]
    pub fn depth(&self) -> &DepthAttachment {
        &self.depth
    }

    /// View-projection the next geometry frame will compute velocity against.
    #[inline]
    pub fn previous_view_projection(&self) -> Option<Mat4> {
        self.previous_view_projection
    }
}

fn albedo_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    sampler: &wgpu::Sampler,
    view: &wgpu::TextureView,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("G-Buffer Albedo Texture"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

fn upload_rgba_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    width: u32,
    height: u32,
    rgba: &[u8],
) -> wgpu::TextureView {
    let texture = device.create_texture_with_data(
        queue,
        &wgpu::TextureDescriptor {
            label: Some("Albedo Texture"),
            size: wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        },
        wgpu::util::TextureDataOrder::LayerMajor,
        rgba,
    );
    texture.create_view(&wgpu::TextureViewDescriptor::default())
}

fn allocate(device: &wgpu::Device, width: u32, height: u32) -> ([RenderTarget; 4], DepthAttachment) {
    let channels = Channel::ALL.map(|channel| RenderTarget::new(device, width, height, channel.format(), channel.label()));
    let depth = DepthAttachment::new(device, width, height, "G-Buffer Depth");
    (channels, depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validate_wgsl;

    #[test]
    fn test_channel_indices_are_fixed() {
        assert_eq!(Channel::Albedo.index(), 0);
        assert_eq!(Channel::NormalDepth.index(), 1);
        assert_eq!(Channel::Velocity.index(), 2);
        assert_eq!(Channel::LightAccum.index(), 3);
        for (i, channel) in Channel::ALL.iter().enumerate() {
            assert_eq!(channel.index(), i);
        }
    }

    #[test]
    fn test_modes_write_disjoint_channels() {
        let geometry = Mode::Geometry.channels();
        let light = Mode::Light.channels();
        assert_eq!(geometry.len(), 3);
        assert_eq!(light, &[Channel::LightAccum]);
        assert!(geometry.iter().all(|c| !light.contains(c)));
    }

    #[test]
    fn test_neutral_clear_decodes_to_zero_velocity() {
        let encoded = glam::Vec2::new(NEUTRAL_CLEAR.r as f32, NEUTRAL_CLEAR.g as f32);
        assert_eq!(velocity::quantize(encoded), velocity::NEUTRAL_TEXEL);
        assert!(velocity::decode_velocity(encoded).length() < 1e-6);
    }

    #[test]
    fn test_geometry_program_is_valid() {
        let module = validate_wgsl("geometry", GEOMETRY_WGSL).unwrap();
        let entry_points = module.entry_points.iter().map(|e| e.name.as_str()).collect::<Vec<_>>();
        for name in ["vs_main", "fs_main", "fs_proxy", "fs_light"] {
            assert!(entry_points.contains(&name), "missing {name}");
        }
    }

    #[test]
    fn test_uniform_layouts_match_wgsl() {
        assert_eq!(std::mem::size_of::<FrameUniform>(), 4 * 64 + 16);
        assert_eq!(std::mem::size_of::<DrawUniform>(), 4 * 64 + 16);
    }

    #[test]
    fn test_draw_uniform_flags_texture() {
        let frame = FrameState::capture(
            &crate::camera::PerspectiveCamera::default(),
            Viewport::from_size(64, 64),
            60.0,
        );
        let untextured = DrawUniform::new(&frame, Mat4::IDENTITY, Mat4::IDENTITY, false);
        let textured = DrawUniform::new(&frame, Mat4::IDENTITY, Mat4::IDENTITY, true);
        assert_eq!(untextured.params[0], 0.0);
        assert_eq!(textured.params[0], 1.0);
    }

    #[test]
    fn test_light_frames_reuse_draw_slots() {
        let mut slots = DrawSlots::new(2, 256);
        slots.reset(Mode::Geometry);
        for _ in 0..5 {
            slots.reset(Mode::Light);
            assert_eq!(slots.allocate(Mode::Light).unwrap(), 0);
        }
    }

    #[test]
    fn test_draw_slots_are_tracked_per_mode() {
        let mut slots = DrawSlots::new(2, 256);
        slots.reset(Mode::Geometry);
        assert_eq!(slots.allocate(Mode::Geometry).unwrap(), 0);
        assert_eq!(slots.allocate(Mode::Geometry).unwrap(), 256);
        slots.reset(Mode::Light);
        assert_eq!(slots.allocate(Mode::Light).unwrap(), 0);
        assert!(matches!(
            slots.allocate(Mode::Geometry),
            Err(GBufferError::DrawCapacityExceeded { capacity: 2 })
        ));
    }

    #[test]
    fn test_settings_defaults() {
        let settings = GBufferSettings::default();
        assert_eq!(settings.max_draws_per_frame, 1024);
        assert!(settings.camera_motion_proxy);
        assert_eq!(settings.proxy_radius_factor, 0.5);
    }
}
