//! Scoped G-Buffer frame.

use super::{AlbedoTexture, DrawUniform, GBuffer, GBufferError, Mode};
use crate::camera::FrameState;
use crate::scene::Drawable;
use glam::Mat4;

/// An open G-Buffer render pass.
///
/// Holds the G-Buffer mutably, so only one frame can be open at a time and
/// the geometry and light modes never overlap. Dropping the frame ends the
/// pass, including when a drawable's draw panics or the caller returns
/// early with `?`.
pub struct GBufferFrame<'a> {
    gbuffer: &'a mut GBuffer,
    queue: &'a wgpu::Queue,
    pass: Option<wgpu::RenderPass<'a>>,
    mode: Mode,
    frame: FrameState,
    draws: u32,
}

impl<'a> GBufferFrame<'a> {
    pub(super) fn new(
        gbuffer: &'a mut GBuffer,
        queue: &'a wgpu::Queue,
        pass: wgpu::RenderPass<'a>,
        mode: Mode,
        frame: FrameState,
    ) -> Self {
        Self {
            gbuffer,
            queue,
            pass: Some(pass),
            mode,
            frame,
            draws: 0,
        }
    }

    /// Mode the frame was opened with.
    #[inline]
    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Camera snapshot taken at [`GBuffer::begin`].
    #[inline]
    pub fn frame_state(&self) -> &FrameState {
        &self.frame
    }

    /// Draws recorded so far, including the camera proxy.
    #[inline]
    pub fn draw_count(&self) -> u32 {
        self.draws
    }

    /// Encode `node`, then flush its transform history in geometry mode.
    pub fn draw(&mut self, node: &mut dyn Drawable) -> Result<(), GBufferError> {
        self.draw_without_flush(node)?;
        if self.mode == Mode::Geometry {
            node.flush();
        }
        Ok(())
    }

    /// Encode `node` without touching its transform history.
    ///
    /// The caller must flush the node once this frame's geometry pass is done.
    pub fn draw_without_flush(&mut self, node: &dyn Drawable) -> Result<(), GBufferError> {
        self.bind_draw(
            node.global_transform(),
            node.previous_global_transform(),
            node.albedo_texture(),
        )?;
        if let Some(pass) = self.pass.as_mut() {
            node.draw(pass);
        }
        Ok(())
    }

    /// Encode `node` into the velocity channel only, without depth testing.
    ///
    /// Used for extra camera-motion proxies. The node is flushed.
    pub fn draw_proxy(&mut self, node: &mut dyn Drawable) -> Result<(), GBufferError> {
        if self.mode != Mode::Geometry {
            return Err(GBufferError::WrongMode {
                operation: "draw_proxy",
                expected: Mode::Geometry,
                actual: self.mode,
            });
        }
        self.set_pipeline_proxy();
        let bound = self.bind_draw(node.global_transform(), node.previous_global_transform(), None);
        if bound.is_ok() {
            if let Some(pass) = self.pass.as_mut() {
                node.draw(pass);
            }
        }
        self.bind_mode_pipeline();
        bound?;
        node.flush();
        Ok(())
    }

    /// End the pass and return the number of draws recorded.
    pub fn end(self) -> u32 {
        self.draws
    }

    pub(super) fn draw_camera_proxy(&mut self) {
        let history = self.gbuffer.advance_proxy(&self.frame);
        self.set_pipeline_proxy();
        match self.bind_draw(history.current(), history.previous(), None) {
            Ok(()) => {
                if let Some(pass) = self.pass.as_mut() {
                    self.gbuffer.proxy_mesh.draw(pass);
                }
            }
            Err(e) => log::warn!("Camera proxy skipped: {}", e),
        }
    }

    pub(super) fn bind_mode_pipeline(&mut self) {
        let pipeline = match self.mode {
            Mode::Geometry => &self.gbuffer.geometry_pipeline,
            Mode::Light => &self.gbuffer.light_pipeline,
        };
        if let Some(pass) = self.pass.as_mut() {
            pass.set_pipeline(pipeline);
        }
    }

    fn set_pipeline_proxy(&mut self) {
        if let Some(pass) = self.pass.as_mut() {
            pass.set_pipeline(&self.gbuffer.proxy_pipeline);
        }
    }

    /// Upload per-draw uniforms into the next slot and bind them.
    fn bind_draw(
        &mut self,
        model: Mat4,
        previous_model: Mat4,
        texture: Option<&AlbedoTexture>,
    ) -> Result<(), GBufferError> {
        let offset = self.gbuffer.allocate_draw_slot(self.mode)?;
        let uniform = DrawUniform::new(&self.frame, model, previous_model, texture.is_some());
        self.queue
            .write_buffer(self.gbuffer.draw_buffer(self.mode), offset as u64, bytemuck::bytes_of(&uniform));

        let texture = texture.unwrap_or(&self.gbuffer.default_texture);
        if let Some(pass) = self.pass.as_mut() {
            pass.set_bind_group(1, self.gbuffer.draw_bind_group(self.mode), &[offset]);
            pass.set_bind_group(2, texture.bind_group(), &[]);
        }
        self.draws += 1;
        Ok(())
    }
}

impl Drop for GBufferFrame<'_> {
    fn drop(&mut self) {
        drop(self.pass.take());
        log::debug!("G-Buffer {:?} frame ended after {} draws", self.mode, self.draws);
    }
}
