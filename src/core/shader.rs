//! Shader program compilation.
//!
//! WGSL is parsed and validated with naga before it reaches the device so a
//! broken program is reported to the caller at setup time, with source
//! context, instead of surfacing later through the uncaptured error handler.

use std::borrow::Cow;
use thiserror::Error;

/// Full-screen vertex stage shared by every screen-space program.
///
/// Emits one oversized triangle from `vertex_index`; no vertex buffer is bound.
pub const FULLSCREEN_VERTEX_WGSL: &str = include_str!("../shaders/fullscreen.wgsl");

/// Errors raised while building a shader program or its pipelines.
#[derive(Error, Debug)]
pub enum ShaderError {
    /// The WGSL source did not parse.
    #[error("Shader `{label}` failed to parse:\n{message}")]
    Parse {
        /// Program label.
        label: String,
        /// Rendered parse diagnostic.
        message: String,
    },

    /// The module parsed but failed validation.
    #[error("Shader `{label}` failed validation:\n{message}")]
    Validation {
        /// Program label.
        label: String,
        /// Rendered validation diagnostic.
        message: String,
    },

    /// The device rejected a pipeline built from the program.
    #[error("Pipeline `{label}` could not be created: {message}")]
    Pipeline {
        /// Pipeline label.
        label: String,
        /// Device error text.
        message: String,
    },
}

/// Parse and validate WGSL source.
pub fn validate_wgsl(label: &str, source: &str) -> Result<naga::Module, ShaderError> {
    let module = naga::front::wgsl::parse_str(source).map_err(|e| ShaderError::Parse {
        label: label.to_string(),
        message: e.emit_to_string(source),
    })?;

    naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::empty(),
    )
    .validate(&module)
    .map_err(|e| ShaderError::Validation {
        label: label.to_string(),
        message: e.emit_to_string(source),
    })?;

    Ok(module)
}

/// Prepend the shared full-screen vertex stage to a fragment program.
pub fn with_fullscreen_vertex(fragment_source: &str) -> String {
    format!("{FULLSCREEN_VERTEX_WGSL}\n{fragment_source}")
}

/// Validate `source` and create a device shader module from it.
pub fn compile_program(
    device: &wgpu::Device,
    label: &str,
    source: &str,
) -> Result<wgpu::ShaderModule, ShaderError> {
    validate_wgsl(label, source)?;
    log::debug!("Compiled shader program `{}`", label);
    Ok(device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(Cow::Owned(source.to_string())),
    }))
}

/// Run `create` inside a validation error scope.
///
/// Pipelines and layouts created in the closure that the device rejects are
/// turned into [`ShaderError::Pipeline`].
pub fn capture_pipeline_errors<T>(
    device: &wgpu::Device,
    label: &str,
    create: impl FnOnce() -> T,
) -> Result<T, ShaderError> {
    device.push_error_scope(wgpu::ErrorFilter::Validation);
    let value = create();
    match pollster::block_on(device.pop_error_scope()) {
        Some(error) => Err(ShaderError::Pipeline {
            label: label.to_string(),
            message: error.to_string(),
        }),
        None => Ok(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fullscreen_vertex_is_valid() {
        let source = with_fullscreen_vertex(
            "@fragment\nfn fs_main(in: FullscreenOutput) -> @location(0) vec4<f32> { return vec4<f32>(in.uv, 0.0, 1.0); }",
        );
        assert!(validate_wgsl("fullscreen", &source).is_ok());
    }

    #[test]
    fn test_parse_error_names_program() {
        let err = validate_wgsl("broken", "fn main( {").unwrap_err();
        match err {
            ShaderError::Parse { label, .. } => assert_eq!(label, "broken"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_type_error_is_rejected() {
        let source = "fn f() -> f32 { return vec2<f32>(1.0, 2.0); }";
        assert!(matches!(
            validate_wgsl("mistyped", source),
            Err(ShaderError::Parse { .. }) | Err(ShaderError::Validation { .. })
        ));
    }
}
