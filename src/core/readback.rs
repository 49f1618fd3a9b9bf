//! Texture readback into tightly packed CPU buffers.

use thiserror::Error;

/// Errors raised while downloading a texture.
#[derive(Error, Debug)]
pub enum ReadbackError {
    /// The texture format has no fixed texel size (depth, compressed).
    #[error("Texture format {0:?} cannot be read back")]
    UnsupportedFormat(wgpu::TextureFormat),

    /// Mapping the staging buffer failed.
    #[error("Failed to map readback buffer: {0}")]
    Map(#[from] wgpu::BufferAsyncError),

    /// The map callback never fired.
    #[error("Readback callback was dropped before completing")]
    Disconnected,
}

/// Align a row size to WebGPU's copy row alignment.
fn align_bytes_per_row(unpadded: u32) -> u32 {
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Download the first mip of a 2D texture, stripping row padding.
///
/// Blocks until the copy has completed.
pub fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
) -> Result<Vec<u8>, ReadbackError> {
    let format = texture.format();
    let texel_size = format
        .block_copy_size(None)
        .ok_or(ReadbackError::UnsupportedFormat(format))?;
    let width = texture.width();
    let height = texture.height();

    let tight_row = texel_size * width;
    let padded_row = align_bytes_per_row(tight_row);

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("Readback Staging Buffer"),
        size: padded_row as u64 * height as u64,
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("Readback Encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer: &staging,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(height),
            },
        },
        texture.size(),
    );
    queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (sender, receiver) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = sender.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    receiver.recv().map_err(|_| ReadbackError::Disconnected)??;

    let mapped = slice.get_mapped_range();
    let mut pixels = Vec::with_capacity((tight_row * height) as usize);
    for row in mapped.chunks(padded_row as usize) {
        pixels.extend_from_slice(&row[..tight_row as usize]);
    }
    drop(mapped);
    staging.unmap();

    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_alignment() {
        assert_eq!(align_bytes_per_row(4), 256);
        assert_eq!(align_bytes_per_row(256), 256);
        assert_eq!(align_bytes_per_row(257), 512);
    }
}
