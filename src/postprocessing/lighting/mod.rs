//! Deferred point-light accumulation.
//!
//! Each pixel's view-space position is rebuilt from the G-Buffer linear
//! depth, then every light is drawn as one full-screen triangle whose
//! output is additively blended into the destination.

mod light;

pub use light::{
    attenuation, light_contribution, reconstruct_view_position, shade_pixel, DeferredLight,
    LightingSettings, Material, DEFAULT_INTENSITY, DEFAULT_RADIUS,
};

use super::pass::{Pass, PassContext, PassKind};
use crate::camera::FrameState;
use crate::core::{
    aligned_uniform_stride, capture_pipeline_errors, compile_program, unfilterable_texture_entry,
    uniform_entry, with_fullscreen_vertex, RenderTarget, ShaderError,
};
use crate::gbuffer::{Channel, GBuffer};
use glam::{Mat4, Vec3};
use std::any::Any;

const LIGHTING_WGSL: &str = include_str!("lighting.wgsl");

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct LightingUniform {
    inverse_projection: [[f32; 4]; 4],
    viewport: [f32; 4],
    material_diffuse: [f32; 4],
    material_specular: [f32; 4],
    /// xyz: attenuation coefficients, w: shininess
    attenuation: [f32; 4],
    /// x: far clip
    params: [f32; 4],
}

#[repr(C)]
#[derive(Debug, Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct LightUniform {
    /// xyz: view-space position, w: radius
    position: [f32; 4],
    diffuse: [f32; 4],
    specular: [f32; 4],
    /// x: intensity
    params: [f32; 4],
}

impl LightUniform {
    fn new(light: &DeferredLight, view: Mat4) -> Self {
        let position = view.transform_point3(light.position);
        Self {
            position: position.extend(light.radius).to_array(),
            diffuse: light.diffuse.to_array(),
            specular: light.specular.to_array(),
            params: [light.intensity, 0.0, 0.0, 0.0],
        }
    }
}

/// Deferred lighting pass.
pub struct LightingPass {
    pipeline: wgpu::RenderPipeline,
    gbuffer_layout: wgpu::BindGroupLayout,
    light_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    light_buffer: wgpu::Buffer,
    light_bind_group: wgpu::BindGroup,
    light_stride: u64,
    light_capacity: usize,
    lights: Vec<DeferredLight>,
    settings: LightingSettings,
    enabled: bool,
    width: u32,
    height: u32,
    inverse_projection: Mat4,
    view: Mat4,
    far_clip: f32,
    v_flipped: bool,
}

impl LightingPass {
    /// Build the lighting pipeline.
    pub fn new(ctx: &PassContext<'_>) -> Result<Self, ShaderError> {
        let device = ctx.device;
        let source = with_fullscreen_vertex(LIGHTING_WGSL);
        let shader = compile_program(device, "Deferred Lighting Shader", &source)?;

        let gbuffer_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Deferred Lighting Bind Group Layout"),
            entries: &[
                uniform_entry(0, false),
                // Albedo
                unfilterable_texture_entry(1),
                // Normal + linear depth
                unfilterable_texture_entry(2),
            ],
        });
        let light_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Deferred Light Bind Group Layout"),
            entries: &[uniform_entry(0, true)],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Deferred Lighting Pipeline Layout"),
            bind_group_layouts: &[&gbuffer_layout, &light_layout],
            push_constant_ranges: &[],
        });

        let additive = wgpu::BlendComponent {
            src_factor: wgpu::BlendFactor::One,
            dst_factor: wgpu::BlendFactor::One,
            operation: wgpu::BlendOperation::Add,
        };

        let pipeline = capture_pipeline_errors(device, "Deferred Lighting Pipeline", || {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Deferred Lighting Pipeline"),
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
                        format: ctx.format,
                        blend: Some(wgpu::BlendState {
                            color: additive,
                            alpha: additive,
                        }),
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
        })?;

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Deferred Lighting Uniform Buffer"),
            size: std::mem::size_of::<LightingUniform>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let light_stride = aligned_uniform_stride(device, std::mem::size_of::<LightUniform>() as u64);
        let light_capacity = 8;
        let (light_buffer, light_bind_group) =
            create_light_buffer(device, &light_layout, light_stride, light_capacity);

        log::info!("Deferred lighting pass created: {}x{}", ctx.width, ctx.height);

        Ok(Self {
            pipeline,
            gbuffer_layout,
            light_layout,
            uniform_buffer,
            light_buffer,
            light_bind_group,
            light_stride,
            light_capacity,
            lights: Vec::new(),
            settings: ctx.config.lighting,
            enabled: true,
            width: ctx.width,
            height: ctx.height,
            inverse_projection: Mat4::IDENTITY,
            view: Mat4::IDENTITY,
            far_clip: 1000.0,
            v_flipped: false,
        })
    }

    /// Add a point light.
    pub fn add_light(&mut self, light: DeferredLight) {
        self.lights.push(light);
    }

    /// Mutable access to one light.
    pub fn light_mut(&mut self, index: usize) -> Option<&mut DeferredLight> {
        self.lights.get_mut(index)
    }

    /// All lights.
    pub fn lights(&self) -> &[DeferredLight] {
        &self.lights
    }

    /// Mutable light list.
    pub fn lights_mut(&mut self) -> &mut Vec<DeferredLight> {
        &mut self.lights
    }

    /// Remove every light.
    pub fn clear_lights(&mut self) {
        self.lights.clear();
    }

    /// Number of lights.
    pub fn light_count(&self) -> usize {
        self.lights.len()
    }

    /// Get settings.
    pub fn settings(&self) -> &LightingSettings {
        &self.settings
    }

    /// Update settings.
    pub fn set_settings(&mut self, settings: LightingSettings) {
        self.settings = settings;
    }

    /// Vertical flip flag captured at the last update.
    pub fn is_v_flipped(&self) -> bool {
        self.v_flipped
    }

    /// Light positions in the view space captured at the last update.
    pub fn view_space_lights(&self) -> Vec<(DeferredLight, Vec3)> {
        self.lights
            .iter()
            .map(|light| (*light, self.view.transform_point3(light.position)))
            .collect()
    }

    fn ensure_light_capacity(&mut self, device: &wgpu::Device) {
        if self.lights.len() <= self.light_capacity {
            return;
        }
        self.light_capacity = self.lights.len().next_power_of_two();
        let (buffer, bind_group) =
            create_light_buffer(device, &self.light_layout, self.light_stride, self.light_capacity);
        self.light_buffer = buffer;
        self.light_bind_group = bind_group;
        log::debug!("Deferred light buffer grown to {} lights", self.light_capacity);
    }
}

fn create_light_buffer(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    stride: u64,
    capacity: usize,
) -> (wgpu::Buffer, wgpu::BindGroup) {
    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Deferred Light Uniform Buffer"),
        size: stride * capacity as u64,
        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });
    let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("Deferred Light Bind Group"),
        layout,
        entries: &[wgpu::BindGroupEntry {
            binding: 0,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &buffer,
                offset: 0,
                size: wgpu::BufferSize::new(std::mem::size_of::<LightUniform>() as u64),
            }),
        }],
    });
    (buffer, bind_group)
}

impl Pass for LightingPass {
    fn name(&self) -> &str {
        PassKind::Lighting.name()
    }

    fn kind(&self) -> PassKind {
        PassKind::Lighting
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn update(&mut self, frame: &FrameState) {
        self.far_clip = frame.far_clip;
        self.v_flipped = frame.v_flipped;
        self.inverse_projection = frame.inverse_projection;
        self.view = frame.view;
    }

    fn render(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        _source: &RenderTarget,
        destination: &RenderTarget,
        gbuffer: &GBuffer,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) {
        self.ensure_light_capacity(device);

        let material = &self.settings.material;
        let uniform = LightingUniform {
            inverse_projection: self.inverse_projection.to_cols_array_2d(),
            viewport: [0.0, 0.0, self.width as f32, self.height as f32],
            material_diffuse: material.diffuse.to_array(),
            material_specular: material.specular.to_array(),
            attenuation: self.settings.attenuation.extend(material.shininess).to_array(),
            params: [self.far_clip, 0.0, 0.0, 0.0],
        };
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::cast_slice(&[uniform]));

        for (i, light) in self.lights.iter().enumerate() {
            let light_uniform = LightUniform::new(light, self.view);
            queue.write_buffer(
                &self.light_buffer,
                i as u64 * self.light_stride,
                bytemuck::bytes_of(&light_uniform),
            );
        }

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Deferred Lighting Bind Group"),
            layout: &self.gbuffer_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(gbuffer.view(Channel::Albedo)),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(gbuffer.view(Channel::NormalDepth)),
                },
            ],
        });

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Deferred Lighting Pass"),
            color_attachments: &[Some(destination.clearing_attachment(wgpu::Color::TRANSPARENT))],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });

        render_pass.set_pipeline(&self.pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        for i in 0..self.lights.len() {
            let offset = (i as u64 * self.light_stride) as u32;
            render_pass.set_bind_group(1, &self.light_bind_group, &[offset]);
            render_pass.draw(0..3, 0..1);
        }

        log::debug!("Deferred lighting rendered {} lights", self.lights.len());
    }

    fn resize(&mut self, width: u32, height: u32, _device: &wgpu::Device) {
        self.width = width;
        self.height = height;
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
    fn test_lighting_program_is_valid() {
        validate_wgsl("lighting", &with_fullscreen_vertex(LIGHTING_WGSL)).unwrap();
    }

    #[test]
    fn test_light_uniform_is_view_space() {
        let view = Mat4::from_translation(Vec3::new(0.0, 0.0, -10.0));
        let light = DeferredLight::new(Vec3::new(1.0, 2.0, 3.0)).with_radius(50.0);
        let uniform = LightUniform::new(&light, view);
        assert_eq!(uniform.position, [1.0, 2.0, -7.0, 50.0]);
        assert_eq!(uniform.params[0], DEFAULT_INTENSITY);
    }
}
