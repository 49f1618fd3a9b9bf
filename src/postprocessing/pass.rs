//! Pass contract and the pass registry.

use super::lighting::LightingPass;
use super::motion_blur::MotionBlurPass;
use crate::camera::FrameState;
use crate::config::PipelineConfig;
use crate::core::{RenderTarget, ShaderError};
use crate::gbuffer::GBuffer;
use std::any::Any;
use wgpu::CommandEncoder;

/// A screen-space pass in the processing chain.
pub trait Pass: Any {
    /// Get the name of this pass.
    fn name(&self) -> &str;

    /// Registry kind this pass was built as.
    fn kind(&self) -> PassKind;

    /// Check if this pass is enabled.
    fn enabled(&self) -> bool;

    /// Set whether this pass is enabled.
    fn set_enabled(&mut self, enabled: bool);

    /// Capture camera state for the coming frame.
    ///
    /// Called once per frame on enabled passes, before any pass renders.
    /// Must not record GPU work.
    fn update(&mut self, frame: &FrameState);

    /// Render this pass.
    ///
    /// Must clear and fully write `destination` and must not read it.
    ///
    /// # Arguments
    /// * `encoder` - Command encoder to record commands
    /// * `source` - Output of the previous pass, or the raw capture
    /// * `destination` - Target to render to
    /// * `gbuffer` - The frame's G-Buffer
    /// * `device` - wgpu device for resource creation
    /// * `queue` - wgpu queue for buffer updates
    fn render(
        &mut self,
        encoder: &mut CommandEncoder,
        source: &RenderTarget,
        destination: &RenderTarget,
        gbuffer: &GBuffer,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
    );

    /// Called when the render target size changes.
    fn resize(&mut self, width: u32, height: u32, device: &wgpu::Device);

    /// Upcast for typed lookup.
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for typed lookup.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Everything a pass constructor needs.
pub struct PassContext<'a> {
    /// Device to build pipelines on.
    pub device: &'a wgpu::Device,
    /// Target width.
    pub width: u32,
    /// Target height.
    pub height: u32,
    /// Format of the ping-pong targets the pass renders into.
    pub format: wgpu::TextureFormat,
    /// Pipeline configuration.
    pub config: &'a PipelineConfig,
}

/// Constructor stored in the registry.
pub type PassConstructor = fn(&PassContext<'_>) -> Result<Box<dyn Pass>, ShaderError>;

/// Closed set of pass kinds the processor can build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PassKind {
    /// Deferred point-light accumulation.
    Lighting,
    /// Reconstruction-filter motion blur.
    MotionBlur,
}

impl PassKind {
    /// Every registered kind.
    pub const ALL: [PassKind; 2] = [PassKind::Lighting, PassKind::MotionBlur];

    /// Display name; also the default pass name.
    pub fn name(self) -> &'static str {
        match self {
            PassKind::Lighting => "DeferredLightingPass",
            PassKind::MotionBlur => "MotionBlurPass",
        }
    }

    /// Constructor for this kind.
    pub fn constructor(self) -> PassConstructor {
        match self {
            PassKind::Lighting => create_lighting,
            PassKind::MotionBlur => create_motion_blur,
        }
    }

    /// Build a pass of this kind.
    pub fn create(self, ctx: &PassContext<'_>) -> Result<Box<dyn Pass>, ShaderError> {
        (self.constructor())(ctx)
    }
}

fn create_lighting(ctx: &PassContext<'_>) -> Result<Box<dyn Pass>, ShaderError> {
    Ok(Box::new(LightingPass::new(ctx)?))
}

fn create_motion_blur(ctx: &PassContext<'_>) -> Result<Box<dyn Pass>, ShaderError> {
    Ok(Box::new(MotionBlurPass::new(ctx)?))
}

impl dyn Pass {
    /// Downcast to a concrete pass type.
    pub fn downcast_ref<T: Pass>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Mutable downcast to a concrete pass type.
    pub fn downcast_mut<T: Pass>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}
