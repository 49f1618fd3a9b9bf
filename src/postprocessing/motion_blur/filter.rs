//! CPU reference of the reconstruction filter.
//!
//! Mirrors the three WGSL stages texel for texel so the filter's properties
//! can be checked without a device.

use crate::gbuffer::velocity::{texel_velocity, NEUTRAL_TEXEL};
use glam::{IVec2, Vec2, Vec4};

/// Neighborhood velocities below this many pixels leave a pixel untouched.
pub const PASS_THROUGH_THRESHOLD: f32 = 0.5;

/// Row-major 2D image.
#[derive(Debug, Clone, PartialEq)]
pub struct Image<T> {
    width: u32,
    height: u32,
    data: Vec<T>,
}

impl<T: Copy> Image<T> {
    /// Image filled with `value`.
    pub fn new(width: u32, height: u32, value: T) -> Self {
        Self {
            width,
            height,
            data: vec![value; width as usize * height as usize],
        }
    }

    /// Image whose texels are produced by `f(x, y)`.
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> T) -> Self {
        let mut data = Vec::with_capacity(width as usize * height as usize);
        for y in 0..height {
            for x in 0..width {
                data.push(f(x, y));
            }
        }
        Self { width, height, data }
    }

    /// Wrap row-major texels. Returns `None` if the length does not match.
    pub fn from_vec(width: u32, height: u32, data: Vec<T>) -> Option<Self> {
        (data.len() == width as usize * height as usize).then_some(Self { width, height, data })
    }

    /// Width in texels.
    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in texels.
    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Texel at `(x, y)`.
    #[inline]
    pub fn get(&self, x: u32, y: u32) -> T {
        self.data[(y * self.width + x) as usize]
    }

    /// Replace the texel at `(x, y)`.
    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: T) {
        let index = (y * self.width + x) as usize;
        self.data[index] = value;
    }

    /// Texel at `p` with coordinates clamped to the image.
    pub fn clamped(&self, p: IVec2) -> T {
        let x = p.x.clamp(0, self.width as i32 - 1) as u32;
        let y = p.y.clamp(0, self.height as i32 - 1) as u32;
        self.get(x, y)
    }

    /// Row-major texels.
    pub fn texels(&self) -> &[T] {
        &self.data
    }
}

/// Reconstruction parameters for one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FilterParams {
    /// Tile size `k` in pixels; also the maximum blur radius.
    pub tile_size: u32,
    /// Samples per pixel, odd.
    pub samples: u32,
    /// `exposure_time * frames_per_second`.
    pub exposure_scale: f32,
    /// Far clip distance, turns linear depth back into view distance.
    pub far_clip: f32,
    /// Distance over which the soft depth comparison ramps.
    pub soft_z_extent: f32,
    /// Viewport size in pixels.
    pub viewport: Vec2,
}

/// Tile grid size covering a `width` x `height` image.
pub fn tile_count(width: u32, height: u32, tile_size: u32) -> (u32, u32) {
    let k = tile_size.max(1);
    (width.div_ceil(k).max(1), height.div_ceil(k).max(1))
}

/// Encoded texel with the largest decoded magnitude in each `k` x `k` tile.
///
/// Tiles on the right and bottom edges only scan the texels inside the image.
pub fn tile_max(velocity: &Image<[u8; 2]>, tile_size: u32) -> Image<[u8; 2]> {
    let k = tile_size.max(1);
    let (tiles_x, tiles_y) = tile_count(velocity.width(), velocity.height(), k);
    Image::from_fn(tiles_x, tiles_y, |tx, ty| {
        let end_x = ((tx + 1) * k).min(velocity.width());
        let end_y = ((ty + 1) * k).min(velocity.height());
        let mut best = NEUTRAL_TEXEL;
        let mut best_length = 0.0;
        for y in ty * k..end_y {
            for x in tx * k..end_x {
                let texel = velocity.get(x, y);
                let length = texel_velocity(texel).length();
                if length > best_length {
                    best_length = length;
                    best = texel;
                }
            }
        }
        best
    })
}

/// Largest tile velocity in each 3x3 tile neighborhood.
pub fn neighbor_max(tiles: &Image<[u8; 2]>) -> Image<[u8; 2]> {
    Image::from_fn(tiles.width(), tiles.height(), |tx, ty| {
        let center = IVec2::new(tx as i32, ty as i32);
        let mut best = NEUTRAL_TEXEL;
        let mut best_length = 0.0;
        for dy in -1..=1 {
            for dx in -1..=1 {
                let texel = tiles.clamped(center + IVec2::new(dx, dy));
                let length = texel_velocity(texel).length();
                if length > best_length {
                    best_length = length;
                    best = texel;
                }
            }
        }
        best
    })
}

/// Blur vector in pixels for an encoded texel, clamped to `[0, k]`.
pub fn pixel_velocity(texel: [u8; 2], params: &FilterParams) -> Vec2 {
    let v = texel_velocity(texel) * params.viewport;
    let length = v.length();
    if length <= 0.0 {
        return Vec2::ZERO;
    }
    let clamped = (params.exposure_scale * length).clamp(0.0, params.tile_size as f32);
    v / length * clamped
}

/// Per-pixel jitter in `[0, 1)`.
pub fn jitter(p: Vec2) -> f32 {
    let s = (p.dot(Vec2::new(12.9898, 78.233))).sin() * 43758.5453;
    s - s.floor()
}

fn soft_depth_compare(a: f32, b: f32, extent: f32) -> f32 {
    (1.0 - (a - b) / extent).clamp(0.0, 1.0)
}

fn cone(distance: f32, velocity: Vec2) -> f32 {
    let length = velocity.length();
    if length <= 0.0 {
        return 0.0;
    }
    (1.0 - distance / length).clamp(0.0, 1.0)
}

fn cylinder(distance: f32, velocity: Vec2) -> f32 {
    let length = velocity.length();
    if length <= 0.0 {
        return if distance <= 0.0 { 1.0 } else { 0.0 };
    }
    1.0 - smoothstep(0.95 * length, 1.05 * length, distance)
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// Gather-blur `color` along the neighborhood velocity.
///
/// `depth` holds linear depth in `[0, 1]`; `neighbors` is the output of
/// [`neighbor_max`] for `velocity`.
pub fn reconstruct(
    color: &Image<Vec4>,
    velocity: &Image<[u8; 2]>,
    depth: &Image<f32>,
    neighbors: &Image<[u8; 2]>,
    params: &FilterParams,
) -> Image<Vec4> {
    let k = params.tile_size.max(1);
    let samples = params.samples as i32;
    let center_sample = (samples - 1) / 2;
    let max_blur = k as f32;

    Image::from_fn(color.width(), color.height(), |x, y| {
        let center = color.get(x, y);
        let tile = IVec2::new((x / k) as i32, (y / k) as i32);
        let vmax = pixel_velocity(neighbors.clamped(tile), params);
        if vmax.length() < PASS_THROUGH_THRESHOLD {
            return center;
        }

        let position = Vec2::new(x as f32, y as f32);
        let v = pixel_velocity(velocity.get(x, y), params);
        let mut weight = 1.0 / v.length().clamp(1.0, max_blur);
        let mut sum = center * weight;
        let j = jitter(position) - 0.5;
        let zx = params.far_clip * depth.get(x, y);

        for i in 0..samples {
            if i == center_sample {
                continue;
            }
            let t = -1.0 + 2.0 * ((i as f32 + j + 1.0) / (samples as f32 + 1.0));
            let offset = (position + vmax * t + Vec2::splat(0.5)).floor();
            let sample = IVec2::new(
                (offset.x as i32).clamp(0, color.width() as i32 - 1),
                (offset.y as i32).clamp(0, color.height() as i32 - 1),
            );
            let sample_position = sample.as_vec2();
            let zy = params.far_clip * depth.clamped(sample);
            let vy = pixel_velocity(velocity.clamped(sample), params);
            let distance = position.distance(sample_position);

            let foreground = soft_depth_compare(zy, zx, params.soft_z_extent);
            let background = soft_depth_compare(zx, zy, params.soft_z_extent);
            let ay = foreground * cone(distance, vy)
                + background * cone(distance, v)
                + 2.0 * cylinder(distance, vy) * cylinder(distance, v);

            weight += ay;
            sum += color.clamped(sample) * ay;
        }

        sum / weight
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gbuffer::velocity::{encode_velocity, quantize};
    use proptest::prelude::*;

    fn params(width: u32, height: u32) -> FilterParams {
        FilterParams {
            tile_size: 4,
            samples: 9,
            exposure_scale: 1.0,
            far_clip: 100.0,
            soft_z_extent: 0.1,
            viewport: Vec2::new(width as f32, height as f32),
        }
    }

    fn moving(pixels: Vec2, viewport: Vec2) -> [u8; 2] {
        quantize(encode_velocity(pixels / viewport))
    }

    fn gradient(width: u32, height: u32) -> Image<Vec4> {
        Image::from_fn(width, height, |x, y| {
            Vec4::new(x as f32 / width as f32, y as f32 / height as f32, 0.5, 1.0)
        })
    }

    #[test]
    fn test_static_scene_is_identity() {
        let (w, h) = (16, 12);
        let color = gradient(w, h);
        let velocity = Image::new(w, h, NEUTRAL_TEXEL);
        let depth = Image::new(w, h, 0.5);
        let neighbors = neighbor_max(&tile_max(&velocity, 4));
        let output = reconstruct(&color, &velocity, &depth, &neighbors, &params(w, h));
        assert_eq!(output, color);
    }

    #[test]
    fn test_tile_grid_covers_partial_tiles() {
        assert_eq!(tile_count(16, 12, 4), (4, 3));
        assert_eq!(tile_count(17, 13, 4), (5, 4));
        assert_eq!(tile_count(3, 3, 20), (1, 1));
    }

    #[test]
    fn test_tile_max_keeps_fastest_texel() {
        let (w, h) = (8, 8);
        let viewport = Vec2::new(w as f32, h as f32);
        let slow = moving(Vec2::new(1.0, 0.0), viewport);
        let fast = moving(Vec2::new(-3.0, 2.0), viewport);
        let mut velocity = Image::new(w, h, slow);
        velocity.set(2, 1, fast);
        let tiles = tile_max(&velocity, 4);
        assert_eq!(tiles.get(0, 0), fast);
        assert_eq!(tiles.get(1, 0), slow);
    }

    #[test]
    fn test_edge_tile_ignores_out_of_image_texels() {
        let velocity = Image::new(5, 5, NEUTRAL_TEXEL);
        let tiles = tile_max(&velocity, 4);
        assert_eq!((tiles.width(), tiles.height()), (2, 2));
        assert_eq!(tiles.get(1, 1), NEUTRAL_TEXEL);
    }

    #[test]
    fn test_neighbor_max_dilates_one_tile() {
        let fast = [200, 127];
        let mut tiles = Image::new(5, 5, NEUTRAL_TEXEL);
        tiles.set(2, 2, fast);
        let neighbors = neighbor_max(&tiles);
        for y in 0..5 {
            for x in 0..5 {
                let near = (x as i32 - 2).abs() <= 1 && (y as i32 - 2).abs() <= 1;
                let expected = if near { fast } else { NEUTRAL_TEXEL };
                assert_eq!(neighbors.get(x, y), expected, "tile ({x}, {y})");
            }
        }
    }

    #[test]
    fn test_below_threshold_passes_through() {
        let (w, h) = (8, 8);
        let p = params(w, h);
        // A quarter pixel of motion everywhere.
        let velocity = Image::new(w, h, moving(Vec2::new(0.25, 0.0), p.viewport));
        let neighbors = neighbor_max(&tile_max(&velocity, p.tile_size));
        assert!(pixel_velocity(neighbors.get(0, 0), &p).length() < PASS_THROUGH_THRESHOLD);
        let color = gradient(w, h);
        let output = reconstruct(&color, &velocity, &Image::new(w, h, 0.5), &neighbors, &p);
        assert_eq!(output, color);
    }

    #[test]
    fn test_pixel_velocity_is_clamped_to_tile_size() {
        let p = params(64, 64);
        let v = pixel_velocity(moving(Vec2::new(30.0, 0.0), p.viewport), &p);
        assert!((v.length() - p.tile_size as f32).abs() < 1e-4);
        assert!(v.x > 0.0);
        assert_eq!(pixel_velocity(NEUTRAL_TEXEL, &p), Vec2::ZERO);
    }

    #[test]
    fn test_exposure_scales_blur_length() {
        let mut p = params(64, 64);
        let texel = moving(Vec2::new(1.0, 0.0), p.viewport);
        let base = pixel_velocity(texel, &p).length();
        p.exposure_scale = 2.0;
        let doubled = pixel_velocity(texel, &p).length();
        assert!((doubled - 2.0 * base).abs() < 1e-4);
    }

    #[test]
    fn test_moving_edge_is_blurred() {
        let (w, h) = (16, 4);
        let p = params(w, h);
        let color = Image::from_fn(w, h, |x, _| if x < 8 { Vec4::ONE } else { Vec4::new(0.0, 0.0, 0.0, 1.0) });
        let velocity = Image::new(w, h, moving(Vec2::new(4.0, 0.0), p.viewport));
        let depth = Image::new(w, h, 0.5);
        let neighbors = neighbor_max(&tile_max(&velocity, p.tile_size));
        let output = reconstruct(&color, &velocity, &depth, &neighbors, &p);

        let left = output.get(7, 1).x;
        let right = output.get(8, 1).x;
        assert!(left < 1.0 && left > 0.0, "left of edge: {left}");
        assert!(right > 0.0 && right < 1.0, "right of edge: {right}");
        // Far from the edge the image stays flat.
        assert!((output.get(1, 1).x - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_jitter_is_unit_range() {
        for y in 0..32 {
            for x in 0..32 {
                let j = jitter(Vec2::new(x as f32, y as f32));
                assert!((0.0..1.0).contains(&j));
            }
        }
    }

    proptest! {
        #[test]
        fn test_tile_max_dominates_every_texel(
            texels in proptest::collection::vec(any::<[u8; 2]>(), 64),
            edge_texels in proptest::collection::vec(any::<[u8; 2]>(), 16),
        ) {
            let block = Image::from_vec(8, 8, texels).unwrap();
            // Two extra rows leave the bottom tiles partially filled.
            let velocity = Image::from_fn(8, 10, |x, y| {
                if y < 8 { block.get(x, y) } else { edge_texels[(x + (y - 8) * 8) as usize] }
            });
            let tiles = tile_max(&velocity, 4);
            for y in 0..velocity.height() {
                for x in 0..velocity.width() {
                    let tile = texel_velocity(tiles.get(x / 4, y / 4)).length();
                    prop_assert!(tile >= texel_velocity(velocity.get(x, y)).length());
                }
            }
            let neighbors = neighbor_max(&tiles);
            for ty in 0..tiles.height() {
                for tx in 0..tiles.width() {
                    let own = texel_velocity(tiles.get(tx, ty)).length();
                    prop_assert!(texel_velocity(neighbors.get(tx, ty)).length() >= own);
                }
            }
        }
    }
}
