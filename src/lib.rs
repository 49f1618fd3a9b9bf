//! # Ren Deferred - Deferred Shading and Motion Blur for wgpu
//!
//! A deferred post-process pipeline: scene attributes are encoded into a
//! four-channel G-Buffer, then a chain of full-screen passes runs over it
//! through a pair of ping-pong targets.
//!
//! ## Features
//!
//! - **G-Buffer**: albedo, view-space normal + linear depth, encoded velocity
//!   and light accumulation, written by one geometry-encode program
//! - **Lighting**: additive deferred point lights reconstructed from depth
//! - **Motion Blur**: tile-max / neighbor-max / reconstruction filter
//! - **Processor**: raw capture, pass registry and ping-pong chaining
//!
//! ## Example
//!
//! ```ignore
//! use ren_deferred::prelude::*;
//!
//! let ctx = GpuContext::new_headless_blocking(wgpu::PowerPreference::default())?;
//! let mut processor = Processor::new(&ctx.device, &ctx.queue, PipelineConfig::with_size(1280, 720))?;
//! processor.create_pass(&ctx.device, PassKind::Lighting)?;
//! processor.create_pass(&ctx.device, PassKind::MotionBlur)?;
//!
//! let mut encoder = ctx.create_command_encoder();
//! processor.begin(&camera)?;
//! {
//!     let mut frame = processor.gbuffer_mut().begin(&mut encoder, &ctx.queue, &camera, Mode::Geometry);
//!     frame.draw(&mut node)?;
//! }
//! processor.end(&mut encoder, &ctx.device, &ctx.queue)?;
//! processor.draw(&ctx.device, &mut encoder, &output_view);
//! ctx.submit([encoder.finish()]);
//! ```

#![warn(missing_docs)]

pub mod camera;
pub mod config;
pub mod core;
pub mod gbuffer;
pub mod postprocessing;
pub mod scene;

// Re-export commonly used types
pub mod prelude {
    //! Convenient re-exports of commonly used types.

    pub use crate::camera::*;
    pub use crate::config::*;
    pub use crate::core::*;
    pub use crate::gbuffer::*;
    pub use crate::postprocessing::*;
    pub use crate::scene::*;
}

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = "Ren Deferred";
