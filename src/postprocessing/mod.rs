//! Screen-space passes and the driver that chains them.
//!
//! A [`Processor`] owns the raw capture target, two ping-pong targets and
//! the shared [`GBuffer`](crate::gbuffer::GBuffer). Every enabled [`Pass`]
//! reads the previous output and writes the other ping-pong slot.

mod chain;
mod pass;
mod processor;
pub mod lighting;
pub mod motion_blur;

pub use chain::{ChainPlan, ChainStep, Slot};
pub use lighting::{DeferredLight, LightingPass, LightingSettings, Material};
pub use motion_blur::{MotionBlurPass, MotionBlurSettings};
pub use pass::{Pass, PassConstructor, PassContext, PassKind};
pub use processor::{Processor, ProcessorError, ProcessorState, RawCapture};
