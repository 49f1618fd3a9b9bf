//! Reconstruction-filter motion blur.
//!
//! Three full-screen stages per frame:
//!
//! 1. tile-max: the dominant velocity of each `k` x `k` tile,
//! 2. neighbor-max: the dominant velocity of each 3x3 tile neighborhood,
//! 3. reconstruction: a jittered gather along the neighborhood velocity,
//!    weighted by soft depth, cone and cylinder tests.
//!
//! [`filter`] holds a CPU version of the same math.

pub mod filter;

use super::pass::{Pass, PassContext, PassKind};
use crate::camera::FrameState;
use crate::config::ConfigError;
use crate::core::{
    capture_pipeline_errors, compile_program, unfilterable_texture_entry, uniform_entry,
    with_fullscreen_vertex, RenderTarget, ShaderError,
};
use crate::gbuffer::{Channel, GBuffer};
use filter::{tile_count, FilterParams};
use glam::Vec2;
use serde::{Deserialize, Serialize};
use std::any::Any;

const COMMON_WGSL: &str = include_str!("common.wgsl");
const TILE_MAX_WGSL: &str = include_str!("tile_max.wgsl");
const NEIGHBOR_MAX_WGSL: &str = include_str!("neighbor_max.wgsl");
const RECONSTRUCTION_WGSL: &str = include_str!("reconstruction.wgsl");

/// Format of the tile-max and neighbor-max targets; same as the velocity channel.
const TILE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rg8Unorm;

/// Motion blur settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionBlurSettings {
    /// Simulated shutter time in seconds.
    pub exposure_time: f32,
    /// Samples per pixel, must be odd.
    pub samples: u32,
    /// Tile size `k` in pixels; also the largest blur radius.
    pub tile_size: u32,
    /// Depth range over which foreground and background blend.
    pub soft_z_extent: f32,
}

impl Default for MotionBlurSettings {
    fn default() -> Self {
        Self {
            exposure_time: 0.03,
            samples: 9,
            tile_size: 20,
            soft_z_extent: 0.1,
        }
    }
}

impl MotionBlurSettings {
    /// Check the sample and tile rules.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.samples == 0 || self.samples % 2 == 0 {
            return Err(ConfigError::Invalid(format!(
                "motion blur samples must be odd, got {}",
                self.samples
            )));
        }
        if self.tile_size == 0 {
            return Err(ConfigError::Invalid("motion blur tile size must be non-zero".into()));
        }
        if self.exposure_time < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "motion blur exposure time must not be negative, got {}",
                self.exposure_time
            )));
        }
        if self.soft_z_extent <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "motion blur soft depth extent must be positive, got {}",
                self.soft_z_extent
            )));
        }
        Ok(())
    }

    /// Copy with an odd sample count and non-zero tile size.
    pub fn sanitized(mut self) -> Self {
        self.samples = odd_samples(self.samples);
        if self.tile_size == 0 {
            log::warn!("Motion blur tile size 0 replaced by 1");
            self.tile_size = 1;
        }
        self
    }

    /// Filter parameters for one frame.
    pub fn filter_params(&self, far_clip: f32, frame_rate: f32, viewport: Vec2) -> FilterParams {
        FilterParams {
            tile_size: self.tile_size,
            samples: self.samples,
            exposure_scale: self.exposure_time * frame_rate,
            far_clip,
            soft_z_extent: self.soft_z_extent,
            viewport,
        }
    }
}

fn odd_samples(samples: u32) -> u32 {
    if samples % 2 == 1 {
        return samples;
    }
    let bumped = samples + 1;
    log::warn!("Motion blur samples must be odd, using {} instead of {}", bumped, samples);
    bumped
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct MotionBlurUniform {
    /// x: tile size, y: samples, z: exposure * fps, w: far clip
    params: [f32; 4],
    /// xy: viewport size, z: soft depth extent
    viewport: [f32; 4],
}

impl From<&FilterParams> for MotionBlurUniform {
    fn from(p: &FilterParams) -> Self {
        Self {
            params: [p.tile_size as f32, p.samples as f32, p.exposure_scale, p.far_clip],
            viewport: [p.viewport.x, p.viewport.y, p.soft_z_extent, 0.0],
        }
    }
}

/// Motion blur pass.
pub struct MotionBlurPass {
    tile_max_pipeline: wgpu::RenderPipeline,
    neighbor_max_pipeline: wgpu::RenderPipeline,
    reconstruction_pipeline: wgpu::RenderPipeline,
    single_input_layout: wgpu::BindGroupLayout,
    reconstruction_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    tile_max: RenderTarget,
    neighbor_max: RenderTarget,
    settings: MotionBlurSettings,
    enabled: bool,
    width: u32,
    height: u32,
    far_clip: f32,
    frame_rate: f32,
}

impl MotionBlurPass {
    /// Build the three stage pipelines and the tile targets.
    pub fn new(ctx: &PassContext<'_>) -> Result<Self, ShaderError> {
        let device = ctx.device;
        let settings = ctx.config.motion_blur.sanitized();

        let single_input_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Motion Blur Tile Bind Group Layout"),
            entries: &[uniform_entry(0, false), unfilterable_texture_entry(1)],
        });
        let reconstruction_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Motion Blur Reconstruction Bind Group Layout"),
            entries: &[
                uniform_entry(0, false),
                // Velocity
                unfilterable_texture_entry(1),
                // Source color
                unfilterable_texture_entry(2),
                // Normal + linear depth
                unfilterable_texture_entry(3),
                // Neighbor max
                unfilterable_texture_entry(4),
            ],
        });

        let tile_max_pipeline = create_stage(
            device,
            "Motion Blur Tile Max",
            TILE_MAX_WGSL,
            &single_input_layout,
            TILE_FORMAT,
        )?;
        let neighbor_max_pipeline = create_stage(
            device,
            "Motion Blur Neighbor Max",
            NEIGHBOR_MAX_WGSL,
            &single_input_layout,
            TILE_FORMAT,
        )?;
        let reconstruction_pipeline = create_stage(
            device,
            "Motion Blur Reconstruction",
            RECONSTRUCTION_WGSL,
            &reconstruction_layout,
            ctx.format,
        )?;

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Motion Blur Uniform Buffer"),
            size: std::mem::size_of::<MotionBlurUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let (tile_max, neighbor_max) = create_tile_targets(device, ctx.width, ctx.height, settings.tile_size);

        log::info!(
            "Motion blur pass created: {}x{}, {} tiles of {}px",
            ctx.width,
            ctx.height,
            tile_max.width() * tile_max.height(),
            settings.tile_size
        );

        Ok(Self {
            tile_max_pipeline,
            neighbor_max_pipeline,
            reconstruction_pipeline,
            single_input_layout,
            reconstruction_layout,
            uniform_buffer,
            tile_max,
            neighbor_max,
            settings,
            enabled: true,
            width: ctx.width,
            height: ctx.height,
            far_clip: 1000.0,
            frame_rate: crate::core::DEFAULT_FRAME_RATE,
        })
    }

    /// Get settings.
    pub fn settings(&self) -> &MotionBlurSettings {
        &self.settings
    }

    /// Update settings. Even sample counts are bumped to the next odd value.
    ///
    /// A new tile size takes effect on the next render.
    pub fn set_settings(&mut self, settings: MotionBlurSettings) {
        self.settings = settings.sanitized();
    }

    /// Set the shutter time in seconds.
    pub fn set_exposure_time(&mut self, exposure_time: f32) {
        self.settings.exposure_time = exposure_time.max(0.0);
    }

    /// Set samples per pixel. Even counts are bumped to the next odd value.
    pub fn set_samples(&mut self, samples: u32) {
        self.settings.samples = odd_samples(samples);
    }

    /// Set the tile size used from the next render.
    pub fn set_tile_size(&mut self, tile_size: u32) {
        self.settings = MotionBlurSettings {
            tile_size,
            ..self.settings
        }
        .sanitized();
    }

    /// Dominant velocity per tile from the last render.
    pub fn tile_max_target(&self) -> &RenderTarget {
        &self.tile_max
    }

    /// Dilated velocity per tile from the last render.
    pub fn neighbor_max_target(&self) -> &RenderTarget {
        &self.neighbor_max
    }

    /// Filter parameters for the captured frame.
    pub fn filter_params(&self) -> FilterParams {
        self.settings.filter_params(
            self.far_clip,
            self.frame_rate,
            Vec2::new(self.width as f32, self.height as f32),
        )
    }

    fn ensure_tile_targets(&mut self, device: &wgpu::Device) {
        let tiles = tile_count(self.width, self.height, self.settings.tile_size);
        if self.tile_max.dimensions() == tiles {
            return;
        }
        let (tile_max, neighbor_max) = create_tile_targets(device, self.width, self.height, self.settings.tile_size);
        self.tile_max = tile_max;
        self.neighbor_max = neighbor_max;
        log::debug!("Motion blur tile targets reallocated: {}x{}", tiles.0, tiles.1);
    }

    fn single_input_bind_group(
        &self,
        device: &wgpu::Device,
        label: &str,
        input: &wgpu::TextureView,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(label),
            layout: &self.single_input_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(input),
                },
            ],
        })
    }
}

fn create_tile_targets(device: &wgpu::Device, width: u32, height: u32, tile_size: u32) -> (RenderTarget, RenderTarget) {
    let (tiles_x, tiles_y) = tile_count(width, height, tile_size);
    (
        RenderTarget::new(device, tiles_x, tiles_y, TILE_FORMAT, "Motion Blur Tile Max"),
        RenderTarget::new(device, tiles_x, tiles_y, TILE_FORMAT, "Motion Blur Neighbor Max"),
    )
}

fn stage_source(stage: &str) -> String {
    with_fullscreen_vertex(&format!("{COMMON_WGSL}\n{stage}"))
}

fn create_stage(
    device: &wgpu::Device,
    label: &str,
    stage: &str,
    layout: &wgpu::BindGroupLayout,
    format: wgpu::TextureFormat,
) -> Result<wgpu::RenderPipeline, ShaderError> {
    let shader = compile_program(device, label, &stage_source(stage))?;
    let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(label),
        bind_group_layouts: &[layout],
        push_constant_ranges: &[],
    });

    capture_pipeline_errors(device, label, || {
        device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(label),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: wgpu::PipelineCompilationOptions::default(),
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                ..Default::default()
            },
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
            cache: None,
        })
    })
}

fn draw_fullscreen(
    encoder: &mut wgpu::CommandEncoder,
    label: &str,
    target: &RenderTarget,
    pipeline: &wgpu::RenderPipeline,
    bind_group: &wgpu::BindGroup,
) {
    let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(target.clearing_attachment(wgpu::Color::BLACK))],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
    render_pass.set_pipeline(pipeline);
    render_pass.set_bind_group(0, bind_group, &[]);
    render_pass.draw(0..3, 0..1);
}

impl Pass for MotionBlurPass {
    fn name(&self) -> &str {
        PassKind::MotionBlur.name()
    }

    fn kind(&self) -> PassKind {
        PassKind::MotionBlur
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn update(&mut self, frame: &FrameState) {
        self.far_clip = frame.far_clip;
        self.frame_rate = frame.frame_rate;
    }

    fn render(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        source: &RenderTarget,
        destination: &RenderTarget,
        gbuffer: &GBuffer,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) {
        self.ensure_tile_targets(device);

        let uniform = MotionBlurUniform::from(&self.filter_params());
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniform]));

        let velocity = gbuffer.view(Channel::Velocity);

        let tile_bind_group = self.single_input_bind_group(device, "Motion Blur Tile Max Bind Group", velocity);
        draw_fullscreen(
            encoder,
            "Motion Blur Tile Max Pass",
            &self.tile_max,
            &self.tile_max_pipeline,
            &tile_bind_group,
        );

        let neighbor_bind_group =
            self.single_input_bind_group(device, "Motion Blur Neighbor Max Bind Group", &self.tile_max.view);
        draw_fullscreen(
            encoder,
            "Motion Blur Neighbor Max Pass",
            &self.neighbor_max,
            &self.neighbor_max_pipeline,
            &neighbor_bind_group,
        );

        let reconstruction_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Motion Blur Reconstruction Bind Group"),
            layout: &self.reconstruction_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(velocity),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&source.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::TextureView(gbuffer.view(Channel::NormalDepth)),
                },
                wgpu::BindGroupEntry {
                    binding: 4,
                    resource: wgpu::BindingResource::TextureView(&self.neighbor_max.view),
                },
            ],
        });
        draw_fullscreen(
            encoder,
            "Motion Blur Reconstruction Pass",
            destination,
            &self.reconstruction_pipeline,
            &reconstruction_bind_group,
        );
    }

    fn resize(&mut self, width: u32, height: u32, device: &wgpu::Device) {
        self.width = width;
        self.height = height;
        self.ensure_tile_targets(device);
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::validate_wgsl;

    #[test]
    fn test_stage_programs_are_valid() {
        for (label, stage) in [
            ("tile_max", TILE_MAX_WGSL),
            ("neighbor_max", NEIGHBOR_MAX_WGSL),
            ("reconstruction", RECONSTRUCTION_WGSL),
        ] {
            let module = validate_wgsl(label, &stage_source(stage)).unwrap();
            assert!(module.entry_points.iter().any(|e| e.name == "fs_main"), "{label}");
        }
    }

    #[test]
    fn test_default_settings() {
        let settings = MotionBlurSettings::default();
        assert_eq!(settings.samples, 9);
        assert_eq!(settings.tile_size, 20);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_even_samples_are_rejected_and_bumped() {
        let settings = MotionBlurSettings {
            samples: 10,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        assert_eq!(settings.sanitized().samples, 11);
        assert_eq!(odd_samples(0), 1);
        assert_eq!(odd_samples(15), 15);
    }

    #[test]
    fn test_zero_tile_size_is_rejected() {
        let settings = MotionBlurSettings {
            tile_size: 0,
            ..Default::default()
        };
        assert!(settings.validate().is_err());
        assert_eq!(settings.sanitized().tile_size, 1);
    }

    #[test]
    fn test_uniform_packs_filter_params() {
        let params = MotionBlurSettings::default().filter_params(500.0, 60.0, Vec2::new(640.0, 480.0));
        let uniform = MotionBlurUniform::from(&params);
        assert_eq!(uniform.params[0], 20.0);
        assert_eq!(uniform.params[1], 9.0);
        assert!((uniform.params[2] - 1.8).abs() < 1e-5);
        assert_eq!(uniform.params[3], 500.0);
        assert_eq!(uniform.viewport, [640.0, 480.0, 0.1, 0.0]);
        assert_eq!(std::mem::size_of::<MotionBlurUniform>(), 32);
    }
}
