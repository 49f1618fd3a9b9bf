//! Concrete drawables.

use super::{Drawable, Mesh};
use crate::gbuffer::AlbedoTexture;
use glam::{Mat4, Quat, Vec3};
use std::sync::Arc;

/// Current and previous global transform of a moving node.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformHistory {
    current: Mat4,
    previous: Mat4,
}

impl Default for TransformHistory {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY)
    }
}

impl TransformHistory {
    /// History whose previous and current transforms are both `transform`.
    pub fn new(transform: Mat4) -> Self {
        Self {
            current: transform,
            previous: transform,
        }
    }

    /// Current global transform.
    #[inline]
    pub fn current(&self) -> Mat4 {
        self.current
    }

    /// Global transform at the last flush.
    #[inline]
    pub fn previous(&self) -> Mat4 {
        self.previous
    }

    /// Replace the current transform.
    #[inline]
    pub fn set(&mut self, transform: Mat4) {
        self.current = transform;
    }

    /// Advance previous to current.
    #[inline]
    pub fn flush(&mut self) {
        self.previous = self.current;
    }
}

/// A mesh placed in the world.
pub struct MeshNode {
    mesh: Arc<Mesh>,
    transform: TransformHistory,
    texture: Option<Arc<AlbedoTexture>>,
}

impl MeshNode {
    /// Place `mesh` at the identity transform.
    pub fn new(mesh: Arc<Mesh>) -> Self {
        Self {
            mesh,
            transform: TransformHistory::default(),
            texture: None,
        }
    }

    /// Attach an albedo texture.
    pub fn with_texture(mut self, texture: Arc<AlbedoTexture>) -> Self {
        self.texture = Some(texture);
        self
    }

    /// Transform history.
    #[inline]
    pub fn transform(&self) -> &TransformHistory {
        &self.transform
    }

    /// Set the current global transform.
    pub fn set_transform(&mut self, transform: Mat4) {
        self.transform.set(transform);
    }

    /// Set the current translation, keeping rotation and scale.
    pub fn set_position(&mut self, position: Vec3) {
        let (scale, rotation, _) = self.transform.current().to_scale_rotation_translation();
        self.transform
            .set(Mat4::from_scale_rotation_translation(scale, rotation, position));
    }

    /// Rotate the node by `angle` radians about `axis` through `center`.
    pub fn rotate_around(&mut self, angle: f32, axis: Vec3, center: Vec3) {
        let Some(axis) = axis.try_normalize() else {
            return;
        };
        let orbit = Mat4::from_translation(center)
            * Mat4::from_quat(Quat::from_axis_angle(axis, angle))
            * Mat4::from_translation(-center);
        self.transform.set(orbit * self.transform.current());
    }
}

impl Drawable for MeshNode {
    fn global_transform(&self) -> Mat4 {
        self.transform.current()
    }

    fn previous_global_transform(&self) -> Mat4 {
        self.transform.previous()
    }

    fn albedo_texture(&self) -> Option<&AlbedoTexture> {
        self.texture.as_deref()
    }

    fn draw(&self, pass: &mut wgpu::RenderPass<'_>) {
        self.mesh.draw(pass);
    }

    fn flush(&mut self) {
        self.transform.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_history_flush_advances_previous() {
        let mut history = TransformHistory::default();
        let moved = Mat4::from_translation(Vec3::X);
        history.set(moved);
        assert_eq!(history.previous(), Mat4::IDENTITY);
        history.flush();
        assert_eq!(history.previous(), moved);
    }
}
