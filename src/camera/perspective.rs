//! Perspective camera.

use super::{CameraState, Viewport};
use glam::{Mat4, Vec3};

/// A perspective projection camera.
///
/// The aspect ratio is taken from the viewport handed to
/// [`CameraState::projection_matrix`], so the G-Buffer and the raw capture
/// always build identical projections.
#[derive(Debug, Clone)]
pub struct PerspectiveCamera {
    /// Vertical field of view in degrees.
    pub fov: f32,
    /// Near clipping plane.
    pub near: f32,
    /// Far clipping plane.
    pub far: f32,
    /// Camera position.
    pub position: Vec3,
    /// Camera target (look-at point).
    pub target: Vec3,
    /// Up vector.
    pub up: Vec3,
    /// Render with a vertically flipped orientation.
    pub v_flipped: bool,
}

impl Default for PerspectiveCamera {
    fn default() -> Self {
        Self::new(60.0, 0.1, 1000.0)
    }
}

impl PerspectiveCamera {
    /// Create a new perspective camera looking down -Z from `(0, 0, 5)`.
    pub fn new(fov: f32, near: f32, far: f32) -> Self {
        Self {
            fov,
            near,
            far,
            position: Vec3::new(0.0, 0.0, 5.0),
            target: Vec3::ZERO,
            up: Vec3::Y,
            v_flipped: false,
        }
    }

    /// Set the camera position.
    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
    }

    /// Look at a target from the current position.
    pub fn look_at(&mut self, target: Vec3) {
        self.target = target;
    }

    /// Set near and far planes.
    pub fn set_clip_planes(&mut self, near: f32, far: f32) {
        self.near = near;
        self.far = far;
    }

    /// Get the forward direction.
    pub fn forward(&self) -> Vec3 {
        (self.target - self.position).normalize_or_zero()
    }

    /// Orbit around the target.
    pub fn orbit(&mut self, delta_phi: f32, delta_theta: f32) {
        let offset = self.position - self.target;
        let radius = offset.length();
        if radius <= f32::EPSILON {
            return;
        }

        let mut theta = offset.z.atan2(offset.x);
        let mut phi = (offset.y / radius).acos();

        theta += delta_phi;
        phi = (phi + delta_theta).clamp(0.01, std::f32::consts::PI - 0.01);

        self.position = self.target
            + Vec3::new(
                radius * phi.sin() * theta.cos(),
                radius * phi.cos(),
                radius * phi.sin() * theta.sin(),
            );
    }

    /// Dolly (move forward/backward).
    pub fn dolly(&mut self, distance: f32) {
        self.position += self.forward() * distance;
    }
}

impl CameraState for PerspectiveCamera {
    fn projection_matrix(&self, viewport: Viewport) -> Mat4 {
        let projection = Mat4::perspective_rh(self.fov.to_radians(), viewport.aspect(), self.near, self.far);
        if self.v_flipped {
            Mat4::from_scale(Vec3::new(1.0, -1.0, 1.0)) * projection
        } else {
            projection
        }
    }

    fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.position, self.target, self.up)
    }

    fn far_clip(&self) -> f32 {
        self.far
    }

    fn position(&self) -> Vec3 {
        self.position
    }

    fn is_v_flipped(&self) -> bool {
        self.v_flipped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_projects_to_center() {
        let camera = PerspectiveCamera::default();
        let viewport = Viewport::from_size(800, 600);
        let clip = camera.projection_matrix(viewport) * camera.view_matrix() * camera.target.extend(1.0);
        let ndc = clip.truncate() / clip.w;
        assert!(ndc.x.abs() < 1e-5 && ndc.y.abs() < 1e-5);
    }

    #[test]
    fn test_orbit_keeps_radius() {
        let mut camera = PerspectiveCamera::default();
        let before = (camera.position - camera.target).length();
        camera.orbit(0.5, 0.2);
        let after = (camera.position - camera.target).length();
        assert!((before - after).abs() < 1e-4);
    }

    #[test]
    fn test_v_flip_negates_clip_y() {
        let mut camera = PerspectiveCamera::default();
        let viewport = Viewport::from_size(100, 100);
        let point = Vec3::new(0.5, 0.5, 0.0).extend(1.0);
        let upright = camera.projection_matrix(viewport) * camera.view_matrix() * point;
        camera.v_flipped = true;
        let flipped = camera.projection_matrix(viewport) * camera.view_matrix() * point;
        assert!((upright.y + flipped.y).abs() < 1e-5);
    }
}
