//! Camera state consumed by the G-Buffer and the post-processing passes.

mod perspective;

pub use perspective::PerspectiveCamera;

use glam::{Mat4, Vec3};

/// Pixel rectangle the pipeline renders into.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    /// Left edge in pixels.
    pub x: f32,
    /// Top edge in pixels.
    pub y: f32,
    /// Width in pixels.
    pub width: f32,
    /// Height in pixels.
    pub height: f32,
}

impl Viewport {
    /// Viewport covering a `width` x `height` target from the origin.
    pub fn from_size(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
        }
    }

    /// Width over height.
    #[inline]
    pub fn aspect(&self) -> f32 {
        if self.height > 0.0 {
            self.width / self.height
        } else {
            1.0
        }
    }

    /// Packed as `[x, y, width, height]` for uniforms.
    #[inline]
    pub fn to_array(&self) -> [f32; 4] {
        [self.x, self.y, self.width, self.height]
    }
}

/// Camera accessor supplied by the host.
///
/// All values returned for one frame must be mutually consistent.
pub trait CameraState {
    /// Projection matrix for the given viewport.
    fn projection_matrix(&self, viewport: Viewport) -> Mat4;

    /// World-to-view matrix.
    fn view_matrix(&self) -> Mat4;

    /// Distance to the far clip plane.
    fn far_clip(&self) -> f32;

    /// World-space camera position.
    fn position(&self) -> Vec3;

    /// Whether the host renders with a vertically flipped orientation.
    fn is_v_flipped(&self) -> bool {
        false
    }
}

/// Immutable per-frame snapshot of everything the passes read from the camera.
#[derive(Debug, Clone, Copy)]
pub struct FrameState {
    /// Viewport the matrices were built for.
    pub viewport: Viewport,
    /// Projection matrix.
    pub projection: Mat4,
    /// View matrix.
    pub view: Mat4,
    /// `projection * view`.
    pub view_projection: Mat4,
    /// Inverse of `projection`.
    pub inverse_projection: Mat4,
    /// Inverse of `view_projection`.
    pub inverse_view_projection: Mat4,
    /// Far clip distance.
    pub far_clip: f32,
    /// Camera position in world space.
    pub position: Vec3,
    /// Vertical flip flag, passed through from the camera.
    pub v_flipped: bool,
    /// Frames per second measured for this frame.
    pub frame_rate: f32,
}

impl FrameState {
    /// Snapshot `camera` for a frame rendered into `viewport`.
    pub fn capture(camera: &dyn CameraState, viewport: Viewport, frame_rate: f32) -> Self {
        let projection = camera.projection_matrix(viewport);
        let view = camera.view_matrix();
        let view_projection = projection * view;
        Self {
            viewport,
            projection,
            view,
            view_projection,
            inverse_projection: projection.inverse(),
            inverse_view_projection: view_projection.inverse(),
            far_clip: camera.far_clip(),
            position: camera.position(),
            v_flipped: camera.is_v_flipped(),
            frame_rate,
        }
    }
}
