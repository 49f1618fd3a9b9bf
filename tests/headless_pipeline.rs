//! End-to-end frames on a headless adapter.
//!
//! These need a GPU adapter and are ignored by default:
//!
//! ```text
//! cargo test --test headless_pipeline -- --ignored
//! ```

use glam::{Mat4, Vec2, Vec3, Vec3Swizzles};
use ren_deferred::gbuffer::velocity::{encode_velocity, quantize, vertex_velocity};
use ren_deferred::prelude::*;
use std::sync::Arc;

const SIZE: u32 = 64;

fn context() -> GpuContext {
    let _ = env_logger::builder().is_test(true).try_init();
    match GpuContext::new_headless_blocking(wgpu::PowerPreference::LowPower) {
        Ok(ctx) => ctx,
        Err(err) => {
            log::warn!("No GPU adapter for headless pipeline tests: {err}");
            panic!("headless pipeline tests need a GPU adapter: {err}");
        }
    }
}

fn camera() -> PerspectiveCamera {
    let mut camera = PerspectiveCamera::new(60.0, 0.1, 100.0);
    camera.set_position(Vec3::new(0.0, 0.0, 5.0));
    camera.look_at(Vec3::ZERO);
    camera
}

fn red_cube(ctx: &GpuContext) -> MeshNode {
    let mesh = Mesh::new(&ctx.device, &MeshData::cuboid(2.0, 2.0, 2.0, [1.0, 0.0, 0.0, 1.0]), "Test Cube");
    MeshNode::new(Arc::new(mesh))
}

/// One frame: geometry into the G-Buffer, albedo copied into the raw capture, then the chain.
fn render_frame(
    ctx: &GpuContext,
    processor: &mut Processor,
    tiles: &DebugTiles,
    camera: &PerspectiveCamera,
    node: &mut MeshNode,
) {
    let mut encoder = ctx.create_command_encoder();
    processor.begin(camera).unwrap();
    drop(processor.capture(&mut encoder).unwrap());

    {
        let mut frame = processor
            .gbuffer_mut()
            .begin(&mut encoder, &ctx.queue, camera, Mode::Geometry);
        frame.draw(node).unwrap();
        // Camera proxy plus the node.
        assert_eq!(frame.end(), 2);
    }

    let full = TileRect {
        x: 0.0,
        y: 0.0,
        width: SIZE as f32,
        height: SIZE as f32,
    };
    tiles.draw(
        &ctx.device,
        &mut encoder,
        &processor.raw_target().view,
        (SIZE, SIZE),
        &[(TileSource::Color(processor.gbuffer().view(Channel::Albedo)), full)],
    );

    processor.end(&mut encoder, &ctx.device, &ctx.queue).unwrap();
    ctx.submit([encoder.finish()]);
}

fn pixel(pixels: &[u8], x: u32, y: u32) -> [u8; 4] {
    let i = ((y * SIZE + x) * 4) as usize;
    [pixels[i], pixels[i + 1], pixels[i + 2], pixels[i + 3]]
}

fn velocity_texel(texels: &[u8], x: u32, y: u32) -> [u8; 2] {
    let i = ((y * SIZE + x) * 2) as usize;
    [texels[i], texels[i + 1]]
}

/// Within one quantization step of the expected texel.
fn near_texel(actual: [u8; 2], expected: [u8; 2]) -> bool {
    actual[0].abs_diff(expected[0]) <= 1 && actual[1].abs_diff(expected[1]) <= 1
}

/// One geometry frame straight into a G-Buffer, then its velocity channel.
fn geometry_velocity(
    ctx: &GpuContext,
    gbuffer: &mut GBuffer,
    camera: &PerspectiveCamera,
    nodes: &mut [&mut MeshNode],
) -> Vec<u8> {
    let mut encoder = ctx.create_command_encoder();
    {
        let mut frame = gbuffer.begin(&mut encoder, &ctx.queue, camera, Mode::Geometry);
        for node in nodes.iter_mut() {
            frame.draw(&mut **node).unwrap();
        }
    }
    ctx.submit([encoder.finish()]);
    read_texture(&ctx.device, &ctx.queue, gbuffer.texture(Channel::Velocity)).unwrap()
}

fn view_projection(camera: &PerspectiveCamera) -> Mat4 {
    FrameState::capture(camera, Viewport::from_size(SIZE, SIZE), 0.0).view_projection
}

#[test]
#[ignore = "requires a GPU adapter; run with --ignored"]
fn test_static_scene_motion_blur_is_identity() {
    let ctx = context();
    let mut processor = Processor::new(&ctx.device, &ctx.queue, PipelineConfig::with_size(SIZE, SIZE)).unwrap();
    processor.set_frame_rate(Some(60.0));
    processor.create_pass(&ctx.device, PassKind::MotionBlur).unwrap();
    let tiles = DebugTiles::new(&ctx.device, processor.format()).unwrap();

    let camera = camera();
    let mut cube = red_cube(&ctx);
    for _ in 0..2 {
        render_frame(&ctx, &mut processor, &tiles, &camera, &mut cube);
    }

    assert_eq!(processor.num_processed_passes(), 1);
    assert_eq!(processor.current_read(), 1);
    let raw = read_texture(&ctx.device, &ctx.queue, &processor.raw_target().texture).unwrap();
    let processed = read_texture(&ctx.device, &ctx.queue, &processor.processed_target().texture).unwrap();

    let center = pixel(&raw, SIZE / 2, SIZE / 2);
    assert_eq!(center[0], 255);
    assert_eq!(center[1], 0);
    assert_eq!(processed, raw);
}

#[test]
#[ignore = "requires a GPU adapter; run with --ignored"]
fn test_no_lights_is_black() {
    let ctx = context();
    let mut processor = Processor::new(&ctx.device, &ctx.queue, PipelineConfig::with_size(SIZE, SIZE)).unwrap();
    processor.create_pass(&ctx.device, PassKind::Lighting).unwrap();
    let tiles = DebugTiles::new(&ctx.device, processor.format()).unwrap();

    let camera = camera();
    let mut cube = red_cube(&ctx);
    render_frame(&ctx, &mut processor, &tiles, &camera, &mut cube);

    let processed = read_texture(&ctx.device, &ctx.queue, &processor.processed_target().texture).unwrap();
    assert!(processed.iter().all(|&b| b == 0));
}

#[test]
#[ignore = "requires a GPU adapter; run with --ignored"]
fn test_point_light_lights_facing_surface() {
    let ctx = context();
    let mut processor = Processor::new(&ctx.device, &ctx.queue, PipelineConfig::with_size(SIZE, SIZE)).unwrap();
    processor.create_pass(&ctx.device, PassKind::Lighting).unwrap();
    processor
        .pass_of_mut::<LightingPass>()
        .unwrap()
        .add_light(DeferredLight::new(Vec3::new(0.0, 0.0, 5.0)));
    let tiles = DebugTiles::new(&ctx.device, processor.format()).unwrap();

    let camera = camera();
    let mut cube = red_cube(&ctx);
    render_frame(&ctx, &mut processor, &tiles, &camera, &mut cube);

    let processed = read_texture(&ctx.device, &ctx.queue, &processor.processed_target().texture).unwrap();
    let center = pixel(&processed, SIZE / 2, SIZE / 2);
    assert!(center[0] > 0, "center {center:?}");
    assert_eq!(center[1], 0);
    assert_eq!(center[2], 0);
}

#[test]
#[ignore = "requires a GPU adapter; run with --ignored"]
fn test_disabled_pass_leaves_chain() {
    let ctx = context();
    let mut processor = Processor::new(&ctx.device, &ctx.queue, PipelineConfig::with_size(SIZE, SIZE)).unwrap();
    processor.create_pass(&ctx.device, PassKind::MotionBlur).unwrap();
    let lighting = processor.create_pass(&ctx.device, PassKind::Lighting).unwrap();
    processor.create_pass(&ctx.device, PassKind::MotionBlur).unwrap();
    processor.set_pass_enabled(lighting, false).unwrap();
    assert!(processor.set_pass_enabled(7, false).is_err());
    let tiles = DebugTiles::new(&ctx.device, processor.format()).unwrap();

    let camera = camera();
    let mut cube = red_cube(&ctx);
    render_frame(&ctx, &mut processor, &tiles, &camera, &mut cube);

    assert_eq!(processor.len(), 3);
    assert_eq!(processor.num_processed_passes(), 2);
    assert_eq!(processor.current_read(), 0);
    assert_eq!(processor.processed_target().dimensions(), (SIZE, SIZE));
}

#[test]
#[ignore = "requires a GPU adapter; run with --ignored"]
fn test_state_machine_rejects_misuse() {
    let ctx = context();
    let mut processor = Processor::new(&ctx.device, &ctx.queue, PipelineConfig::with_size(SIZE, SIZE)).unwrap();
    let camera = camera();
    let mut encoder = ctx.create_command_encoder();

    assert!(matches!(
        processor.end(&mut encoder, &ctx.device, &ctx.queue),
        Err(ProcessorError::InvalidState { operation: "end", .. })
    ));
    assert!(processor.capture(&mut encoder).is_err());

    processor.begin(&camera).unwrap();
    assert!(matches!(
        processor.begin(&camera),
        Err(ProcessorError::InvalidState { operation: "begin", .. })
    ));
    processor.end(&mut encoder, &ctx.device, &ctx.queue).unwrap();
    assert_eq!(processor.state(), ProcessorState::Composited);

    // No passes: the raw capture is the output.
    assert_eq!(processor.num_processed_passes(), 0);
    assert!(std::ptr::eq(processor.processed_target(), processor.raw_target()));
    ctx.submit([encoder.finish()]);
}

#[test]
#[ignore = "requires a GPU adapter; run with --ignored"]
fn test_light_mode_accumulates_over_geometry_depth() {
    let ctx = context();
    let mut gbuffer = GBuffer::new(&ctx.device, &ctx.queue, SIZE, SIZE, GBufferSettings::default()).unwrap();
    let camera = camera();
    let mut cube = red_cube(&ctx);

    let mut encoder = ctx.create_command_encoder();
    {
        let mut frame = gbuffer.begin(&mut encoder, &ctx.queue, &camera, Mode::Geometry);
        frame.draw_without_flush(&cube).unwrap();
        // Camera proxy plus the cube.
        assert_eq!(frame.end(), 2);
    }
    {
        let mut frame = gbuffer.begin(&mut encoder, &ctx.queue, &camera, Mode::Light);
        assert!(matches!(
            frame.draw_proxy(&mut cube),
            Err(GBufferError::WrongMode { operation: "draw_proxy", .. })
        ));
        frame.draw(&mut cube).unwrap();
        assert_eq!(frame.end(), 1);
    }
    ctx.submit([encoder.finish()]);

    let light = read_texture(&ctx.device, &ctx.queue, gbuffer.texture(Channel::LightAccum)).unwrap();
    let texel = |x: u32, y: u32| {
        let i = ((y * SIZE + x) * 8) as usize;
        light[i..i + 8].to_vec()
    };
    assert_ne!(texel(SIZE / 2, SIZE / 2), texel(0, 0));
    assert!(gbuffer.previous_view_projection().is_some());
}

#[test]
#[ignore = "requires a GPU adapter; run with --ignored"]
fn test_light_frames_reuse_draw_slots() {
    let ctx = context();
    let settings = GBufferSettings {
        max_draws_per_frame: 2,
        ..Default::default()
    };
    let mut gbuffer = GBuffer::new(&ctx.device, &ctx.queue, SIZE, SIZE, settings).unwrap();
    let camera = camera();
    let mut cube = red_cube(&ctx);

    let mut encoder = ctx.create_command_encoder();
    drop(gbuffer.begin(&mut encoder, &ctx.queue, &camera, Mode::Geometry));
    for _ in 0..5 {
        let mut frame = gbuffer.begin(&mut encoder, &ctx.queue, &camera, Mode::Light);
        frame.draw(&mut cube).unwrap();
        assert_eq!(frame.end(), 1);
    }
    ctx.submit([encoder.finish()]);
}

#[test]
#[ignore = "requires a GPU adapter; run with --ignored"]
fn test_moving_object_is_blurred() {
    let ctx = context();
    let mut processor = Processor::new(&ctx.device, &ctx.queue, PipelineConfig::with_size(SIZE, SIZE)).unwrap();
    processor.set_frame_rate(Some(60.0));
    processor.create_pass(&ctx.device, PassKind::MotionBlur).unwrap();
    let tiles = DebugTiles::new(&ctx.device, processor.format()).unwrap();

    let camera = camera();
    let mut cube = red_cube(&ctx);
    render_frame(&ctx, &mut processor, &tiles, &camera, &mut cube);
    cube.set_position(Vec3::new(0.6, 0.0, 0.0));
    render_frame(&ctx, &mut processor, &tiles, &camera, &mut cube);

    let raw = read_texture(&ctx.device, &ctx.queue, &processor.raw_target().texture).unwrap();
    let processed = read_texture(&ctx.device, &ctx.queue, &processor.processed_target().texture).unwrap();
    assert_ne!(processed, raw);

    // Gray background next to the cube picks up its red.
    let mut smeared = 0;
    for y in 0..SIZE {
        for x in 0..SIZE {
            let before = pixel(&raw, x, y);
            let after = pixel(&processed, x, y);
            let background = before[0] < 140 && before[1] > 100;
            if background && after[0] > before[0] + 8 {
                smeared += 1;
            }
        }
    }
    assert!(smeared > 0);
}

#[test]
#[ignore = "requires a GPU adapter; run with --ignored"]
fn test_camera_rotation_moves_uncovered_background() {
    let ctx = context();
    let mut gbuffer =
        GBuffer::new(&ctx.device, &ctx.queue, SIZE, SIZE, GBufferSettings::default()).unwrap();
    let mut camera = camera();

    let first = geometry_velocity(&ctx, &mut gbuffer, &camera, &mut []);
    assert!(first.chunks_exact(2).all(|t| near_texel([t[0], t[1]], [127, 127])));

    // Turning right drags the background left across the screen.
    camera.look_at(Vec3::new(0.5, 0.0, 0.0));
    let second = geometry_velocity(&ctx, &mut gbuffer, &camera, &mut []);
    for (x, y) in [(4, 4), (SIZE / 2, SIZE / 2), (SIZE - 4, SIZE - 4)] {
        let texel = velocity_texel(&second, x, y);
        assert!(texel[0] < 120, "({x}, {y}): {texel:?}");
    }
}

#[test]
#[ignore = "requires a GPU adapter; run with --ignored"]
fn test_previous_view_projection_hands_off() {
    let ctx = context();
    let settings = GBufferSettings {
        camera_motion_proxy: false,
        ..Default::default()
    };
    let mut gbuffer = GBuffer::new(&ctx.device, &ctx.queue, SIZE, SIZE, settings).unwrap();
    let mut camera = camera();
    let mut cube = red_cube(&ctx);
    assert!(gbuffer.previous_view_projection().is_none());

    let first_view_projection = view_projection(&camera);
    let first = geometry_velocity(&ctx, &mut gbuffer, &camera, &mut [&mut cube]);
    let center = velocity_texel(&first, SIZE / 2, SIZE / 2);
    assert!(near_texel(center, [127, 127]), "{center:?}");
    assert!(gbuffer
        .previous_view_projection()
        .unwrap()
        .abs_diff_eq(first_view_projection, 1e-5));

    camera.look_at(Vec3::new(0.5, 0.0, 0.0));
    let second_view_projection = view_projection(&camera);
    let second = geometry_velocity(&ctx, &mut gbuffer, &camera, &mut [&mut cube]);
    assert!(gbuffer
        .previous_view_projection()
        .unwrap()
        .abs_diff_eq(second_view_projection, 1e-5));

    // Surface point under the center pixel, on the cube's front face z = 1.
    let texel_center = Vec2::splat(SIZE as f32 / 2.0 + 0.5);
    let ndc = Vec2::new(2.0 * texel_center.x / SIZE as f32 - 1.0, 1.0 - 2.0 * texel_center.y / SIZE as f32);
    let inverse = second_view_projection.inverse();
    let near = inverse.project_point3(ndc.extend(0.0));
    let far = inverse.project_point3(ndc.extend(1.0));
    let t = (1.0 - near.z) / (far.z - near.z);
    let surface = near + (far - near) * t;
    assert!(surface.xy().abs().max_element() < 1.0);

    let expected = vertex_velocity(
        surface,
        Mat4::IDENTITY,
        Mat4::IDENTITY,
        second_view_projection,
        first_view_projection,
    );
    assert!(expected.x < 0.0);
    let actual = velocity_texel(&second, SIZE / 2, SIZE / 2);
    let expected = quantize(encode_velocity(expected));
    assert!(
        actual[0].abs_diff(expected[0]) <= 2 && actual[1].abs_diff(expected[1]) <= 2,
        "{actual:?} vs {expected:?}"
    );
}

#[test]
#[ignore = "requires a GPU adapter; run with --ignored"]
fn test_process_raw_requires_composited_frame() {
    let ctx = context();
    let mut processor = Processor::new(&ctx.device, &ctx.queue, PipelineConfig::with_size(SIZE, SIZE)).unwrap();
    processor.create_pass(&ctx.device, PassKind::MotionBlur).unwrap();
    let camera = camera();
    let mut encoder = ctx.create_command_encoder();

    assert!(matches!(
        processor.process_raw(&mut encoder, &ctx.device, &ctx.queue),
        Err(ProcessorError::InvalidState { operation: "process_raw", state: ProcessorState::Idle })
    ));

    processor.begin(&camera).unwrap();
    assert!(processor.process_raw(&mut encoder, &ctx.device, &ctx.queue).is_err());
    processor.end(&mut encoder, &ctx.device, &ctx.queue).unwrap();
    processor.process_raw(&mut encoder, &ctx.device, &ctx.queue).unwrap();
    assert_eq!(processor.state(), ProcessorState::Composited);
    ctx.submit([encoder.finish()]);

    processor.resize(&ctx.device, SIZE * 2, SIZE * 2);
    let mut encoder = ctx.create_command_encoder();
    assert!(processor.process_raw(&mut encoder, &ctx.device, &ctx.queue).is_err());
}
