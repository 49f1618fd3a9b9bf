//! Pipeline driver: raw capture, G-Buffer and the pass chain.

use super::chain::{ChainPlan, Slot};
use super::pass::{Pass, PassContext, PassKind};
use crate::camera::{CameraState, FrameState, Viewport};
use crate::config::{ConfigError, PipelineConfig};
use crate::core::{
    capture_pipeline_errors, compile_program, sampler_entry, texture_entry, with_fullscreen_vertex, Clock,
    RenderTarget, ShaderError,
};
use crate::gbuffer::{DebugTiles, GBuffer, GBufferError, TileRect, TileSource};
use thiserror::Error;

const BLIT_WGSL: &str = include_str!("../shaders/blit.wgsl");

/// Errors raised by the processor.
#[derive(Error, Debug)]
pub enum ProcessorError {
    /// An operation was called in a state that does not allow it.
    #[error("Processor::{operation} called in {state:?} state")]
    InvalidState {
        /// Operation name.
        operation: &'static str,
        /// State at the time of the call.
        state: ProcessorState,
    },

    /// A pass or driver program failed to build.
    #[error(transparent)]
    Shader(#[from] ShaderError),

    /// The G-Buffer failed to build.
    #[error(transparent)]
    GBuffer(#[from] GBufferError),

    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No pass is registered at this index.
    #[error("No pass registered at index {0}")]
    UnknownPass(usize),
}

/// Frame state of the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessorState {
    /// No frame has been started.
    Idle,
    /// Between `begin` and `end`: the raw capture may be drawn into.
    GeometryCapture,
    /// Passes are being recorded.
    PassChain,
    /// The chain has run; the processed texture is ready.
    Composited,
}

impl ProcessorState {
    /// Whether the raw target holds a finished capture that the chain may rerun over.
    pub fn has_raw_capture(self) -> bool {
        self == ProcessorState::Composited
    }
}

/// Scoped render pass into the raw capture target.
///
/// Dropping it ends the pass.
pub struct RawCapture<'a> {
    pass: wgpu::RenderPass<'a>,
    frame: FrameState,
}

impl<'a> RawCapture<'a> {
    /// Render pass with the capture viewport set.
    pub fn pass_mut(&mut self) -> &mut wgpu::RenderPass<'a> {
        &mut self.pass
    }

    /// Camera snapshot of the frame being captured.
    pub fn frame_state(&self) -> &FrameState {
        &self.frame
    }
}

struct Blit {
    pipeline: wgpu::RenderPipeline,
    layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
}

impl Blit {
    fn new(device: &wgpu::Device, format: wgpu::TextureFormat) -> Result<Self, ShaderError> {
        let shader = compile_program(device, "Processor Blit Shader", &with_fullscreen_vertex(BLIT_WGSL))?;
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Processor Blit Bind Group Layout"),
            entries: &[
                texture_entry(0, wgpu::TextureSampleType::Float { filterable: true }),
                sampler_entry(1, wgpu::SamplerBindingType::Filtering),
            ],
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Processor Blit Pipeline Layout"),
            bind_group_layouts: &[&layout],
            push_constant_ranges: &[],
        });
        let pipeline = capture_pipeline_errors(device, "Processor Blit Pipeline", || {
            device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some("Processor Blit Pipeline"),
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
        })?;
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Processor Blit Sampler"),
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });
        Ok(Self {
            pipeline,
            layout,
            sampler,
        })
    }
}

/// Drives one frame: camera snapshot, raw capture, pass chain, output.
///
/// ```text
/// begin(camera) -> capture(encoder) / gbuffer_mut().begin(..) -> end(..) -> draw(..)
/// ```
pub struct Processor {
    config: PipelineConfig,
    format: wgpu::TextureFormat,
    gbuffer: GBuffer,
    raw: RenderTarget,
    ping_pong: [RenderTarget; 2],
    passes: Vec<Box<dyn Pass>>,
    plan: ChainPlan,
    state: ProcessorState,
    clock: Clock,
    frame_rate_override: Option<f32>,
    frame: Option<FrameState>,
    raw_captured: bool,
    blit: Blit,
}

impl Processor {
    /// Validate `config`, then allocate the G-Buffer and every target.
    pub fn new(device: &wgpu::Device, queue: &wgpu::Queue, config: PipelineConfig) -> Result<Self, ProcessorError> {
        config.validate()?;
        let (width, height) = (config.width, config.height);
        let format = config.output_format.texture_format();

        let gbuffer = GBuffer::new(device, queue, width, height, config.gbuffer)?;
        let (raw, ping_pong) = allocate_targets(device, width, height, format);
        let blit = Blit::new(device, format)?;

        log::info!("Processor initialized: {}x{} {:?}", width, height, format);

        Ok(Self {
            config,
            format,
            gbuffer,
            raw,
            ping_pong,
            passes: Vec::new(),
            plan: ChainPlan::default(),
            state: ProcessorState::Idle,
            clock: Clock::new(),
            frame_rate_override: None,
            frame: None,
            raw_captured: false,
            blit,
        })
    }

    /// Build a pass of `kind` and append it to the chain. Returns its index.
    ///
    /// A pass whose programs fail to build is not registered.
    pub fn create_pass(&mut self, device: &wgpu::Device, kind: PassKind) -> Result<usize, ProcessorError> {
        let ctx = PassContext {
            device,
            width: self.config.width,
            height: self.config.height,
            format: self.format,
            config: &self.config,
        };
        let pass = kind.create(&ctx)?;
        Ok(self.add_pass(pass))
    }

    /// Append an already built pass. Returns its index.
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) -> usize {
        log::info!("Processor added pass {} at {}", pass.name(), self.passes.len());
        self.passes.push(pass);
        self.passes.len() - 1
    }

    /// Open a frame.
    ///
    /// Measures the frame rate, snapshots `camera` and hands the snapshot to
    /// every enabled pass. No GPU work is recorded.
    pub fn begin(&mut self, camera: &dyn CameraState) -> Result<FrameState, ProcessorError> {
        match self.state {
            ProcessorState::Idle | ProcessorState::Composited => {}
            state => {
                return Err(ProcessorError::InvalidState {
                    operation: "begin",
                    state,
                })
            }
        }

        self.clock.tick();
        let frame_rate = self.frame_rate_override.unwrap_or_else(|| self.clock.frame_rate());
        let viewport = Viewport::from_size(self.raw.width(), self.raw.height());
        let frame = FrameState::capture(camera, viewport, frame_rate);

        for pass in self.passes.iter_mut().filter(|p| p.enabled()) {
            pass.update(&frame);
        }

        self.frame = Some(frame);
        self.raw_captured = false;
        self.state = ProcessorState::GeometryCapture;
        Ok(frame)
    }

    /// Open a render pass into the raw capture target.
    ///
    /// The first capture of a frame clears color to black and depth to the
    /// far plane; later captures in the same frame draw over it.
    pub fn capture<'a>(
        &'a mut self,
        encoder: &'a mut wgpu::CommandEncoder,
    ) -> Result<RawCapture<'a>, ProcessorError> {
        let frame = match (self.state, self.frame) {
            (ProcessorState::GeometryCapture, Some(frame)) => frame,
            (state, _) => {
                return Err(ProcessorError::InvalidState {
                    operation: "capture",
                    state,
                })
            }
        };

        let clear = !self.raw_captured;
        self.raw_captured = true;
        let pass = begin_raw_pass(encoder, &self.raw, clear, "Processor Raw Capture");

        let mut capture = RawCapture { pass, frame };
        let viewport = frame.viewport;
        capture
            .pass
            .set_viewport(viewport.x, viewport.y, viewport.width, viewport.height, 0.0, 1.0);
        Ok(capture)
    }

    /// Close the frame and run every enabled pass in registration order.
    pub fn end(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<(), ProcessorError> {
        if self.state != ProcessorState::GeometryCapture {
            return Err(ProcessorError::InvalidState {
                operation: "end",
                state: self.state,
            });
        }
        if !self.raw_captured {
            drop(begin_raw_pass(encoder, &self.raw, true, "Processor Raw Clear"));
            self.raw_captured = true;
        }
        self.run_chain(encoder, device, queue);
        Ok(())
    }

    /// Run the chain over the current raw capture without opening a frame.
    ///
    /// Only valid once a frame has been composited. Passes keep the camera
    /// state from their last update.
    pub fn process_raw(
        &mut self,
        encoder: &mut wgpu::CommandEncoder,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    ) -> Result<(), ProcessorError> {
        if !self.state.has_raw_capture() {
            return Err(ProcessorError::InvalidState {
                operation: "process_raw",
                state: self.state,
            });
        }
        self.run_chain(encoder, device, queue);
        Ok(())
    }

    fn run_chain(&mut self, encoder: &mut wgpu::CommandEncoder, device: &wgpu::Device, queue: &wgpu::Queue) {
        self.state = ProcessorState::PassChain;
        self.plan = ChainPlan::new(self.passes.iter().map(|p| p.enabled()));

        for step in self.plan.steps() {
            let source = match step.source {
                Slot::Raw => &self.raw,
                Slot::PingPong(index) => &self.ping_pong[index],
            };
            let destination = &self.ping_pong[step.destination];
            self.passes[step.pass_index].render(encoder, source, destination, &self.gbuffer, device, queue);
        }

        log::debug!(
            "Processor chain ran {} of {} passes, output {:?}",
            self.plan.len(),
            self.passes.len(),
            self.plan.output()
        );
        self.state = ProcessorState::Composited;
    }

    /// Copy the processed texture into `output`, scaled to fill it.
    ///
    /// `output` must have the processor's output format.
    pub fn draw(&self, device: &wgpu::Device, encoder: &mut wgpu::CommandEncoder, output: &wgpu::TextureView) {
        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Processor Blit Bind Group"),
            layout: &self.blit.layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&self.processed_target().view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.blit.sampler),
                },
            ],
        });

        let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("Processor Blit Pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: output,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        render_pass.set_pipeline(&self.blit.pipeline);
        render_pass.set_bind_group(0, &bind_group, &[]);
        render_pass.draw(0..3, 0..1);
    }

    /// Draw the raw capture, its depth and the current ping-pong slot as
    /// 300px tiles along the top of `output`.
    pub fn debug_draw(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        tiles: &DebugTiles,
        output: &wgpu::TextureView,
        output_size: (u32, u32),
    ) {
        let mut sources = vec![TileSource::Color(&self.raw.view)];
        if let Some(depth) = &self.raw.depth {
            sources.push(TileSource::Depth(&depth.depth_view));
        }
        sources.push(TileSource::Color(&self.ping_pong[self.plan.current_read()].view));

        let rects = TileRect::top_row(300.0, 10.0, sources.len() as u32);
        let entries = sources.into_iter().zip(rects).collect::<Vec<_>>();
        tiles.draw(device, encoder, output, output_size, &entries);
    }

    /// Reallocate the G-Buffer and every target, then notify each pass.
    ///
    /// Zero sizes are ignored.
    pub fn resize(&mut self, device: &wgpu::Device, width: u32, height: u32) {
        if width == 0 || height == 0 {
            return;
        }
        self.config.width = width;
        self.config.height = height;
        self.gbuffer.setup(device, width, height);
        let (raw, ping_pong) = allocate_targets(device, width, height, self.format);
        self.raw = raw;
        self.ping_pong = ping_pong;
        self.plan = ChainPlan::default();
        self.raw_captured = false;
        if self.state == ProcessorState::Composited {
            self.state = ProcessorState::Idle;
        }
        for pass in &mut self.passes {
            pass.resize(width, height, device);
        }
        log::info!("Processor resized to {}x{}", width, height);
    }

    /// Use a fixed frame rate instead of the measured one. `None` restores measuring.
    pub fn set_frame_rate(&mut self, frame_rate: Option<f32>) {
        self.frame_rate_override = frame_rate;
    }

    /// Frame rate the current frame was captured with.
    pub fn frame_rate(&self) -> f32 {
        self.frame
            .map(|frame| frame.frame_rate)
            .or(self.frame_rate_override)
            .unwrap_or_else(|| self.clock.frame_rate())
    }

    /// Enable or disable the pass at `index`.
    pub fn set_pass_enabled(&mut self, index: usize, enabled: bool) -> Result<(), ProcessorError> {
        self.passes
            .get_mut(index)
            .ok_or(ProcessorError::UnknownPass(index))?
            .set_enabled(enabled);
        Ok(())
    }

    /// Number of registered passes.
    #[inline]
    pub fn len(&self) -> usize {
        self.passes.len()
    }

    /// True when no pass is registered.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Pass at `index`.
    pub fn pass(&self, index: usize) -> Option<&dyn Pass> {
        self.passes.get(index).map(|p| p.as_ref())
    }

    /// Mutable pass at `index`.
    pub fn pass_mut(&mut self, index: usize) -> Option<&mut dyn Pass> {
        match self.passes.get_mut(index) {
            Some(pass) => Some(pass.as_mut()),
            None => None,
        }
    }

    /// First pass of type `T`.
    pub fn pass_of<T: Pass>(&self) -> Option<&T> {
        self.passes.iter().find_map(|p| p.downcast_ref::<T>())
    }

    /// First pass of type `T`, mutably.
    pub fn pass_of_mut<T: Pass>(&mut self) -> Option<&mut T> {
        self.passes.iter_mut().find_map(|p| p.downcast_mut::<T>())
    }

    /// All registered passes in order.
    pub fn passes(&self) -> impl Iterator<Item = &dyn Pass> + '_ {
        self.passes.iter().map(|p| p.as_ref())
    }

    /// Passes that ran in the last chain.
    #[inline]
    pub fn num_processed_passes(&self) -> usize {
        self.plan.len()
    }

    /// Ping-pong slot holding the last output.
    #[inline]
    pub fn current_read(&self) -> usize {
        self.plan.current_read()
    }

    /// Processor state.
    #[inline]
    pub fn state(&self) -> ProcessorState {
        self.state
    }

    /// Camera snapshot of the current or last frame.
    #[inline]
    pub fn frame_state(&self) -> Option<&FrameState> {
        self.frame.as_ref()
    }

    /// Raw capture target with depth.
    #[inline]
    pub fn raw_target(&self) -> &RenderTarget {
        &self.raw
    }

    /// Processed output: the raw capture when no pass ran, otherwise the
    /// ping-pong slot last written.
    pub fn processed_target(&self) -> &RenderTarget {
        match self.plan.output() {
            Slot::Raw => &self.raw,
            Slot::PingPong(index) => &self.ping_pong[index],
        }
    }

    /// The shared G-Buffer.
    #[inline]
    pub fn gbuffer(&self) -> &GBuffer {
        &self.gbuffer
    }

    /// The shared G-Buffer, mutably, for opening geometry and light frames.
    #[inline]
    pub fn gbuffer_mut(&mut self) -> &mut GBuffer {
        &mut self.gbuffer
    }

    /// Configuration the processor was built with, with the current size.
    #[inline]
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Format of the raw capture and ping-pong targets.
    #[inline]
    pub fn format(&self) -> wgpu::TextureFormat {
        self.format
    }

    /// Current size in pixels.
    #[inline]
    pub fn size(&self) -> (u32, u32) {
        self.raw.dimensions()
    }
}

fn allocate_targets(
    device: &wgpu::Device,
    width: u32,
    height: u32,
    format: wgpu::TextureFormat,
) -> (RenderTarget, [RenderTarget; 2]) {
    let raw = RenderTarget::with_depth(device, width, height, format, "Processor Raw Capture");
    let ping_pong = [
        RenderTarget::new(device, width, height, format, "Processor Ping"),
        RenderTarget::new(device, width, height, format, "Processor Pong"),
    ];
    (raw, ping_pong)
}

fn begin_raw_pass<'a>(
    encoder: &'a mut wgpu::CommandEncoder,
    raw: &'a RenderTarget,
    clear: bool,
    label: &str,
) -> wgpu::RenderPass<'a> {
    let (color_load, depth_load) = if clear {
        (wgpu::LoadOp::Clear(wgpu::Color::BLACK), wgpu::LoadOp::Clear(1.0))
    } else {
        (wgpu::LoadOp::Load, wgpu::LoadOp::Load)
    };
    let stencil_load = if clear { wgpu::LoadOp::Clear(0) } else { wgpu::LoadOp::Load };

    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some(label),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view: &raw.view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: color_load,
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: raw.depth.as_ref().map(|depth| wgpu::RenderPassDepthStencilAttachment {
            view: &depth.view,
            depth_ops: Some(wgpu::Operations {
                load: depth_load,
                store: wgpu::StoreOp::Store,
            }),
            stencil_ops: Some(wgpu::Operations {
                load: stencil_load,
                store: wgpu::StoreOp::Store,
            }),
        }),
        timestamp_writes: None,
        occlusion_query_set: None,
    })
}
