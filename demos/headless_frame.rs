//! Renders a few frames of a spinning box with deferred lights and motion
//! blur on a headless adapter, then writes the last frame as a PPM image.
//!
//! ```text
//! cargo run --example headless_frame -- [output.ppm] [config.json]
//! ```

use glam::Vec3;
use ren_deferred::prelude::*;
use std::error::Error;
use std::sync::Arc;

const FRAMES: u32 = 8;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let output_path = args.next().unwrap_or_else(|| "headless_frame.ppm".to_string());
    let config = match args.next() {
        Some(path) => PipelineConfig::from_json_str(&std::fs::read_to_string(path)?)?,
        None => PipelineConfig::with_size(640, 360),
    };
    let (width, height) = (config.width, config.height);

    let ctx = GpuContext::new_headless_blocking(wgpu::PowerPreference::HighPerformance)?;
    let mut processor = Processor::new(&ctx.device, &ctx.queue, config)?;
    // Fixed rate keeps the blur length independent of how fast frames are produced here.
    processor.set_frame_rate(Some(60.0));
    processor.create_pass(&ctx.device, PassKind::Lighting)?;
    processor.create_pass(&ctx.device, PassKind::MotionBlur)?;

    if let Some(lighting) = processor.pass_of_mut::<LightingPass>() {
        lighting.add_light(DeferredLight::from_point_light(
            Vec3::new(1.0, 0.9, 0.8),
            1.5,
            Vec3::new(3.0, 3.0, 4.0),
            50.0,
        ));
        lighting.add_light(DeferredLight::from_point_light(
            Vec3::new(0.3, 0.4, 1.0),
            1.0,
            Vec3::new(-4.0, -1.0, 2.0),
            30.0,
        ));
    }

    let mut camera = PerspectiveCamera::new(50.0, 0.1, 100.0);
    camera.set_position(Vec3::new(0.0, 1.5, 6.0));
    camera.look_at(Vec3::ZERO);

    let box_mesh = Arc::new(Mesh::new(
        &ctx.device,
        &MeshData::cuboid(1.5, 1.5, 1.5, [0.9, 0.3, 0.2, 1.0]),
        "Demo Box",
    ));
    let sphere_mesh = Arc::new(Mesh::new(
        &ctx.device,
        &MeshData::sphere(0.6, 32, 16, [0.2, 0.8, 0.3, 1.0]),
        "Demo Sphere",
    ));
    let mut spinning = MeshNode::new(box_mesh);
    let mut orbiting = MeshNode::new(sphere_mesh);
    orbiting.set_position(Vec3::new(2.5, 0.0, 0.0));

    for frame_index in 0..FRAMES {
        spinning.rotate_around(0.25, Vec3::Y, Vec3::ZERO);
        orbiting.rotate_around(0.4, Vec3::Y, Vec3::ZERO);

        let mut encoder = ctx.create_command_encoder();
        processor.begin(&camera)?;
        {
            let mut frame = processor
                .gbuffer_mut()
                .begin(&mut encoder, &ctx.queue, &camera, Mode::Geometry);
            frame.draw(&mut spinning)?;
            frame.draw(&mut orbiting)?;
            frame.end();
        }
        processor.end(&mut encoder, &ctx.device, &ctx.queue)?;
        ctx.submit([encoder.finish()]);
        log::info!("Rendered frame {}", frame_index);
    }

    let pixels = read_texture(&ctx.device, &ctx.queue, &processor.processed_target().texture)?;
    write_ppm(&output_path, width, height, &pixels)?;
    log::info!("Wrote {}", output_path);
    Ok(())
}

fn write_ppm(path: &str, width: u32, height: u32, rgba: &[u8]) -> std::io::Result<()> {
    let mut data = format!("P6\n{} {}\n255\n", width, height).into_bytes();
    for texel in rgba.chunks_exact(4) {
        data.extend_from_slice(&texel[..3]);
    }
    std::fs::write(path, data)
}
