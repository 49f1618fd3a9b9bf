//! # Core Module
//!
//! GPU context acquisition, frame timing, render targets, shader program
//! compilation and texture readback.

mod binding;
mod clock;
mod context;
mod readback;
mod shader;
mod target;

pub use binding::{sampler_entry, texture_entry, uniform_entry, unfilterable_texture_entry};
pub use clock::{Clock, DEFAULT_FRAME_RATE};
pub use context::{ContextError, GpuContext};
pub use readback::{read_texture, ReadbackError};
pub use shader::{
    capture_pipeline_errors, compile_program, validate_wgsl, with_fullscreen_vertex, ShaderError,
    FULLSCREEN_VERTEX_WGSL,
};
pub use target::{create_color_texture, DepthAttachment, RenderTarget, DEPTH_STENCIL_FORMAT};

/// Round `size` up to the device's dynamic uniform offset alignment.
pub fn aligned_uniform_stride(device: &wgpu::Device, size: u64) -> u64 {
    let align = device.limits().min_uniform_buffer_offset_alignment as u64;
    size.div_ceil(align) * align
}
