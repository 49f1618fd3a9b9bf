//! Pipeline configuration.
//!
//! Every section has serde defaults, so a JSON document only needs the keys
//! it changes:
//!
//! ```json
//! { "width": 1280, "height": 720, "motion_blur": { "samples": 15 } }
//! ```

use crate::gbuffer::GBufferSettings;
use crate::postprocessing::{LightingSettings, MotionBlurSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised while loading or checking a configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The document is not valid JSON for [`PipelineConfig`].
    #[error("Failed to parse pipeline config: {0}")]
    Json(#[from] serde_json::Error),

    /// A value is outside its allowed range.
    #[error("Invalid pipeline config: {0}")]
    Invalid(String),
}

/// Color format of the raw capture and ping-pong targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    /// 8-bit linear RGBA.
    #[default]
    Rgba8Unorm,
    /// 8-bit sRGB RGBA.
    Rgba8UnormSrgb,
    /// 8-bit linear BGRA.
    Bgra8Unorm,
    /// 8-bit sRGB BGRA.
    Bgra8UnormSrgb,
    /// 16-bit float RGBA.
    Rgba16Float,
}

impl OutputFormat {
    /// Matching wgpu format.
    pub fn texture_format(self) -> wgpu::TextureFormat {
        match self {
            OutputFormat::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
            OutputFormat::Rgba8UnormSrgb => wgpu::TextureFormat::Rgba8UnormSrgb,
            OutputFormat::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            OutputFormat::Bgra8UnormSrgb => wgpu::TextureFormat::Bgra8UnormSrgb,
            OutputFormat::Rgba16Float => wgpu::TextureFormat::Rgba16Float,
        }
    }
}

/// Full pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Target width in pixels.
    pub width: u32,
    /// Target height in pixels.
    pub height: u32,
    /// Format of the processed output.
    pub output_format: OutputFormat,
    /// G-Buffer settings.
    pub gbuffer: GBufferSettings,
    /// Lighting pass settings.
    pub lighting: LightingSettings,
    /// Motion blur pass settings.
    pub motion_blur: MotionBlurSettings,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            output_format: OutputFormat::default(),
            gbuffer: GBufferSettings::default(),
            lighting: LightingSettings::default(),
            motion_blur: MotionBlurSettings::default(),
        }
    }
}

impl PipelineConfig {
    /// Default configuration at `width` x `height`.
    pub fn with_size(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize to pretty JSON.
    pub fn to_json_string(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.width == 0 || self.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "target size must be non-zero, got {}x{}",
                self.width, self.height
            )));
        }
        if self.gbuffer.max_draws_per_frame == 0 {
            return Err(ConfigError::Invalid("gbuffer.max_draws_per_frame must be non-zero".into()));
        }
        if self.gbuffer.proxy_radius_factor <= 0.0 || self.gbuffer.proxy_radius_factor > 1.0 {
            return Err(ConfigError::Invalid(format!(
                "gbuffer.proxy_radius_factor must be in (0, 1], got {}",
                self.gbuffer.proxy_radius_factor
            )));
        }
        self.lighting.validate()?;
        self.motion_blur.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = PipelineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.motion_blur.tile_size, 20);
        assert_eq!(config.lighting.material.shininess, 127.0);
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{ "width": 640, "height": 480, "output_format": "rgba16_float", "motion_blur": { "samples": 15 } }"#,
        )
        .unwrap();
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.output_format.texture_format(), wgpu::TextureFormat::Rgba16Float);
        assert_eq!(config.motion_blur.samples, 15);
        assert_eq!(config.motion_blur.exposure_time, 0.03);
        assert_eq!(config.gbuffer, GBufferSettings::default());
    }

    #[test]
    fn test_even_samples_are_rejected() {
        let err = PipelineConfig::from_json_str(r#"{ "motion_blur": { "samples": 8 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_tile_size_is_rejected() {
        let mut config = PipelineConfig::default();
        config.motion_blur.tile_size = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_attenuation_is_rejected() {
        let err = PipelineConfig::from_json_str(r#"{ "lighting": { "attenuation": [0.0, 0.0, 0.0] } }"#)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let mut config = PipelineConfig::default();
        config.lighting.attenuation = glam::Vec3::new(1.0, -1.0, 0.0);
        assert!(config.validate().is_err());
        config.lighting.attenuation = glam::Vec3::new(0.0, 0.0, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_malformed_json_is_a_parse_error() {
        let err = PipelineConfig::from_json_str("{ width: ").unwrap_err();
        assert!(matches!(err, ConfigError::Json(_)));
    }

    #[test]
    fn test_json_round_trip() {
        let config = PipelineConfig::with_size(320, 200);
        let json = config.to_json_string().unwrap();
        assert_eq!(PipelineConfig::from_json_str(&json).unwrap(), config);
    }
}
