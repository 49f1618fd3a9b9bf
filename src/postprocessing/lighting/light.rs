//! Point lights, material constants and the CPU lighting model.

use crate::config::ConfigError;
use glam::{Mat4, Vec2, Vec3, Vec4, Vec4Swizzles};
use serde::{Deserialize, Serialize};

/// Default light intensity.
pub const DEFAULT_INTENSITY: f32 = 1.0;

/// Default light radius.
pub const DEFAULT_RADIUS: f32 = 200.0;

/// A point light.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeferredLight {
    /// Ambient color. Carried for hosts, not added by the pass.
    pub ambient: Vec4,
    /// Diffuse color.
    pub diffuse: Vec4,
    /// Specular color.
    pub specular: Vec4,
    /// World-space position.
    pub position: Vec3,
    /// Scale applied to diffuse and specular.
    pub intensity: f32,
    /// Distance at which the light's contribution reaches zero.
    pub radius: f32,
}

impl Default for DeferredLight {
    fn default() -> Self {
        Self {
            ambient: Vec4::new(0.0, 0.0, 0.0, 1.0),
            diffuse: Vec4::ONE,
            specular: Vec4::ONE,
            position: Vec3::ZERO,
            intensity: DEFAULT_INTENSITY,
            radius: DEFAULT_RADIUS,
        }
    }
}

impl DeferredLight {
    /// White light at `position` with default intensity and radius.
    pub fn new(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    /// Build from a point-light description.
    pub fn from_point_light(color: Vec3, intensity: f32, position: Vec3, radius: f32) -> Self {
        Self {
            ambient: Vec4::new(0.0, 0.0, 0.0, 1.0),
            diffuse: color.extend(1.0),
            specular: color.extend(1.0),
            position,
            intensity,
            radius,
        }
    }

    /// Set intensity.
    pub fn with_intensity(mut self, intensity: f32) -> Self {
        self.intensity = intensity;
        self
    }

    /// Set radius.
    pub fn with_radius(mut self, radius: f32) -> Self {
        self.radius = radius;
        self
    }
}

/// Surface response shared by every pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Material {
    /// Ambient reflectance. Not added by the pass.
    pub ambient: Vec4,
    /// Diffuse reflectance.
    pub diffuse: Vec4,
    /// Specular reflectance.
    pub specular: Vec4,
    /// Specular exponent.
    pub shininess: f32,
}

impl Default for Material {
    fn default() -> Self {
        Self {
            ambient: Vec4::new(0.1, 0.1, 0.1, 1.0),
            diffuse: Vec4::ONE,
            specular: Vec4::ONE,
            shininess: 127.0,
        }
    }
}

/// Lighting pass settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LightingSettings {
    /// Material constants.
    pub material: Material,
    /// Constant, linear and quadratic attenuation coefficients.
    pub attenuation: Vec3,
}

impl Default for LightingSettings {
    fn default() -> Self {
        Self {
            material: Material::default(),
            attenuation: Vec3::new(1.0, 0.0, 0.0),
        }
    }
}

impl LightingSettings {
    /// Check the material and attenuation ranges.
    ///
    /// Coefficients must be finite and non-negative with at least one of
    /// them positive, so the falloff only reaches zero at distance zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.material.shininess.is_finite() || self.material.shininess < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "lighting.material.shininess must be finite and non-negative, got {}",
                self.material.shininess
            )));
        }
        let coefficients = self.attenuation.to_array();
        if coefficients.iter().any(|c| !c.is_finite() || *c < 0.0) {
            return Err(ConfigError::Invalid(format!(
                "lighting.attenuation coefficients must be finite and non-negative, got {:?}",
                coefficients
            )));
        }
        if coefficients.iter().all(|c| *c == 0.0) {
            return Err(ConfigError::Invalid(
                "lighting.attenuation must have a positive coefficient".into(),
            ));
        }
        Ok(())
    }
}

/// Distance attenuation with cubic damping.
///
/// `1 / (a0 + a1*d + a2*d²) * (1 - (d/r)³)`, exactly zero at and beyond `r`.
pub fn attenuation(distance: f32, radius: f32, coefficients: Vec3) -> f32 {
    if radius <= 0.0 || distance >= radius {
        return 0.0;
    }
    let falloff = coefficients.x + coefficients.y * distance + coefficients.z * distance * distance;
    if falloff <= 0.0 {
        return 0.0;
    }
    let damping = 1.0 - (distance / radius).powi(3);
    damping / falloff
}

/// View-space position of a pixel from its linear depth.
///
/// `pixel` is in target pixels with the origin at the top-left.
pub fn reconstruct_view_position(
    inverse_projection: Mat4,
    pixel: Vec2,
    viewport: Vec2,
    far_clip: f32,
    linear_depth: f32,
) -> Vec3 {
    let ndc = Vec4::new(
        2.0 * pixel.x / viewport.x - 1.0,
        1.0 - 2.0 * pixel.y / viewport.y,
        1.0,
        1.0,
    );
    let v = inverse_projection * ndc;
    let far_ray = (v.xy() * (-far_clip / v.z)).extend(-far_clip);
    far_ray * linear_depth
}

/// Light contribution at a surface point, before multiplying by albedo.
///
/// `light_position` is in view space.
pub fn light_contribution(
    light: &DeferredLight,
    light_position: Vec3,
    settings: &LightingSettings,
    position: Vec3,
    normal: Vec3,
) -> Vec3 {
    let to_light = light_position - position;
    let lambert = normal.dot(to_light.normalize_or_zero()).max(0.0);
    if lambert <= 0.0 {
        return Vec3::ZERO;
    }
    let distance = to_light.length();
    if distance > light.radius {
        return Vec3::ZERO;
    }

    let falloff = attenuation(distance, light.radius, settings.attenuation) * light.intensity;
    let material = &settings.material;

    let diffuse = material.diffuse.truncate() * light.diffuse.truncate() * lambert;

    let reflected = reflect(to_light, normal).normalize_or_zero();
    let view = position.normalize_or_zero();
    let highlight = reflected.dot(view).max(0.0).powf(material.shininess);
    let specular = material.specular.truncate() * light.specular.truncate() * highlight;

    (diffuse + specular) * falloff
}

/// Final color of a pixel lit by `lights`, summed as the additive blend does.
pub fn shade_pixel(
    lights: &[(DeferredLight, Vec3)],
    settings: &LightingSettings,
    position: Vec3,
    normal: Vec3,
    albedo: Vec3,
) -> Vec3 {
    lights
        .iter()
        .map(|(light, view_position)| {
            light_contribution(light, *view_position, settings, position, normal) * albedo
        })
        .sum()
}

fn reflect(incident: Vec3, normal: Vec3) -> Vec3 {
    incident - 2.0 * normal.dot(incident) * normal
}
