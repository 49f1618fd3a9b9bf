//! Drawable capability consumed by the G-Buffer geometry pass.

mod geometry;
mod node;

pub use geometry::{GeometryVertex, Mesh, MeshData};
pub use node::{MeshNode, TransformHistory};

use crate::gbuffer::AlbedoTexture;
use glam::Mat4;

/// Anything the G-Buffer can encode.
///
/// The G-Buffer binds the geometry-encode program and this drawable's
/// per-draw transforms before calling [`Drawable::draw`]; the drawable only
/// records its vertex/index buffers and draw calls using [`GeometryVertex`].
pub trait Drawable {
    /// Current global transform.
    fn global_transform(&self) -> Mat4;

    /// Global transform captured at the last [`Drawable::flush`].
    fn previous_global_transform(&self) -> Mat4;

    /// Albedo texture mixed with the vertex color, if any.
    fn albedo_texture(&self) -> Option<&AlbedoTexture> {
        None
    }

    /// Record draw calls.
    fn draw(&self, pass: &mut wgpu::RenderPass<'_>);

    /// Advance the previous transform to the current one.
    ///
    /// Must run exactly once per frame, after the frame's geometry pass.
    fn flush(&mut self);
}
