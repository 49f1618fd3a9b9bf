//! Screen-space velocity encoding.
//!
//! Velocities are stored in an 8-bit two-channel texture. Each axis is
//! square-root compressed around a neutral value so that small motions,
//! where blur artifacts are most visible, get most of the precision:
//!
//! `encoded = sign(v) * sqrt(|v|) * 127/255 + 127/255`
//!
//! `v` is half the NDC displacement between the previous and the current
//! frame with +Y pointing down the texture, so multiplying a decoded value
//! by the viewport size yields a displacement in pixels. These functions are
//! the CPU counterparts of the WGSL in `geometry.wgsl` and the motion blur
//! programs and must stay in sync with them.

use glam::{Mat4, Vec2, Vec3, Vec4};

/// Encoded value of zero motion.
pub const NEUTRAL: f32 = 127.0 / 255.0;

/// Scale applied to the square-rooted magnitude.
pub const ENCODE_SCALE: f32 = 127.0 / 255.0;

/// Neutral velocity as stored in an 8-bit texel.
pub const NEUTRAL_TEXEL: [u8; 2] = [127, 127];

/// Encode a half-NDC displacement.
pub fn encode_velocity(velocity: Vec2) -> Vec2 {
    Vec2::new(encode_axis(velocity.x), encode_axis(velocity.y))
}

/// Decode a value produced by [`encode_velocity`].
pub fn decode_velocity(encoded: Vec2) -> Vec2 {
    Vec2::new(decode_axis(encoded.x), decode_axis(encoded.y))
}

fn encode_axis(v: f32) -> f32 {
    if v == 0.0 {
        return NEUTRAL;
    }
    v.signum() * v.abs().sqrt() * ENCODE_SCALE + NEUTRAL
}

fn decode_axis(e: f32) -> f32 {
    let d = (e - NEUTRAL) / ENCODE_SCALE;
    d * d.abs()
}

/// Store an encoded velocity the way an `Rg8Unorm` target does.
pub fn quantize(encoded: Vec2) -> [u8; 2] {
    let q = |e: f32| (e.clamp(0.0, 1.0) * 255.0).round() as u8;
    [q(encoded.x), q(encoded.y)]
}

/// Read back an `Rg8Unorm` texel.
pub fn dequantize(texel: [u8; 2]) -> Vec2 {
    Vec2::new(texel[0] as f32 / 255.0, texel[1] as f32 / 255.0)
}

/// Decoded half-NDC displacement stored in an 8-bit texel.
pub fn texel_velocity(texel: [u8; 2]) -> Vec2 {
    decode_velocity(dequantize(texel))
}

/// Half-NDC displacement between two clip-space positions, +Y down.
pub fn screen_velocity(current_clip: Vec4, previous_clip: Vec4) -> Vec2 {
    let current = current_clip.truncate().truncate() / current_clip.w;
    let previous = previous_clip.truncate().truncate() / previous_clip.w;
    let half = (current - previous) * 0.5;
    Vec2::new(half.x, -half.y)
}

/// Matrix taking a current clip-space position back to the previous frame.
///
/// `current_mvp` is undone through the inverse of the current
/// view-projection and the inverse of the node's current transform, then
/// re-applied with the previous transform and previous view-projection.
pub fn reprojection_matrix(
    current_mvp: Mat4,
    inverse_view_projection: Mat4,
    inverse_model: Mat4,
    previous_model: Mat4,
    previous_view_projection: Mat4,
) -> Mat4 {
    let post_transform = inverse_model * inverse_view_projection * current_mvp;
    previous_view_projection * previous_model * post_transform
}

/// Velocity of a local-space vertex, matching the geometry-encode program.
pub fn vertex_velocity(
    local: Vec3,
    model: Mat4,
    previous_model: Mat4,
    view_projection: Mat4,
    previous_view_projection: Mat4,
) -> Vec2 {
    let current_mvp = view_projection * model;
    let reprojection = reprojection_matrix(
        current_mvp,
        view_projection.inverse(),
        model.inverse(),
        previous_model,
        previous_view_projection,
    );
    let position = local.extend(1.0);
    screen_velocity(current_mvp * position, reprojection * position)
}

/// Convert a half-NDC displacement to pixels.
#[inline]
pub fn to_pixels(velocity: Vec2, viewport_size: Vec2) -> Vec2 {
    velocity * viewport_size
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_zero_encodes_to_neutral() {
        assert_eq!(encode_velocity(Vec2::ZERO), Vec2::splat(NEUTRAL));
        assert_eq!(quantize(encode_velocity(Vec2::ZERO)), NEUTRAL_TEXEL);
        assert_eq!(texel_velocity(NEUTRAL_TEXEL), Vec2::ZERO);
    }

    #[test]
    fn test_sign_is_preserved() {
        let decoded = decode_velocity(encode_velocity(Vec2::new(-0.25, 0.04)));
        assert!((decoded.x + 0.25).abs() < 1e-6);
        assert!((decoded.y - 0.04).abs() < 1e-6);
    }

    #[test]
    fn test_static_vertex_has_no_velocity() {
        let vp = Mat4::perspective_rh(1.0, 1.5, 0.1, 100.0)
            * Mat4::look_at_rh(Vec3::new(0.0, 1.0, 5.0), Vec3::ZERO, Vec3::Y);
        let model = Mat4::from_translation(Vec3::new(0.5, 0.0, -1.0));
        let v = vertex_velocity(Vec3::new(0.2, 0.3, 0.1), model, model, vp, vp);
        assert!(v.length() < 1e-5);
    }

    #[test]
    fn test_rightward_motion_is_positive_x() {
        let vp = Mat4::perspective_rh(1.0, 1.0, 0.1, 100.0)
            * Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let previous = Mat4::IDENTITY;
        let current = Mat4::from_translation(Vec3::new(0.1, 0.1, 0.0));
        let v = vertex_velocity(Vec3::ZERO, current, previous, vp, vp);
        assert!(v.x > 0.0);
        // Moving up in the world moves up the screen, which is -Y in texels.
        assert!(v.y < 0.0);
    }

    #[test]
    fn test_pixels_scale_with_viewport() {
        let px = to_pixels(Vec2::new(0.5, -0.25), Vec2::new(200.0, 100.0));
        assert_eq!(px, Vec2::new(100.0, -25.0));
    }

    proptest! {
        #[test]
        fn prop_round_trip_is_exact_before_quantization(x in -1.0f32..1.0, y in -1.0f32..1.0) {
            let decoded = decode_velocity(encode_velocity(Vec2::new(x, y)));
            prop_assert!((decoded.x - x).abs() < 1e-5);
            prop_assert!((decoded.y - y).abs() < 1e-5);
        }

        #[test]
        fn prop_quantized_round_trip_within_one_step(x in -1.0f32..1.0, y in -1.0f32..1.0) {
            let v = Vec2::new(x, y);
            let texel = quantize(encode_velocity(v));
            let reencoded = encode_velocity(texel_velocity(texel));
            let original = encode_velocity(v);
            // One 8-bit step in the encoded domain.
            prop_assert!((reencoded - original).abs().max_element() <= 0.5 / 255.0 + 1e-6);
        }
    }
}
