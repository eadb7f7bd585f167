//! Blocking GPU-to-CPU texture readback.
//!
//! Texture-to-buffer copies need every row padded to
//! [`wgpu::COPY_BYTES_PER_ROW_ALIGNMENT`]; [`ReadbackLayout`] describes that
//! padding and removes it again once the buffer is mapped.

use petal_core::profiling::profile_function;
use petal_test_utils::GpuError;

/// Row layout of a readback buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadbackLayout {
    pub width: u32,
    pub height: u32,
    pub bytes_per_pixel: u32,
    /// Row stride in the staging buffer, padded to the copy alignment.
    pub padded_bytes_per_row: u32,
}

impl ReadbackLayout {
    pub fn new(width: u32, height: u32, bytes_per_pixel: u32) -> Self {
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        Self {
            width,
            height,
            bytes_per_pixel,
            padded_bytes_per_row: (width * bytes_per_pixel).div_ceil(align) * align,
        }
    }

    pub fn unpadded_bytes_per_row(&self) -> u32 {
        self.width * self.bytes_per_pixel
    }

    pub fn buffer_size(&self) -> wgpu::BufferAddress {
        self.padded_bytes_per_row as wgpu::BufferAddress * self.height as wgpu::BufferAddress
    }

    /// Tightly packed rows from a padded buffer.
    pub fn strip_padding(&self, padded: &[u8]) -> Vec<u8> {
        let row = self.unpadded_bytes_per_row() as usize;
        padded
            .chunks(self.padded_bytes_per_row as usize)
            .take(self.height as usize)
            .flat_map(|chunk| &chunk[..row])
            .copied()
            .collect()
    }
}

/// Copy mip level 0 of `texture` to the CPU, blocking until the GPU is done.
pub fn read_texture(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    bytes_per_pixel: u32,
) -> Result<Vec<u8>, GpuError> {
    profile_function!();
    let size = texture.size();
    if size.width == 0 || size.height == 0 {
        return Err(GpuError::Backend("cannot read back an empty texture".to_string()));
    }
    let layout = ReadbackLayout::new(size.width, size.height, bytes_per_pixel);

    let buffer = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("petal_readback_buffer"),
        size: layout.buffer_size(),
        usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("petal_readback_encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(layout.padded_bytes_per_row),
                rows_per_image: Some(size.height),
            },
        },
        wgpu::Extent3d {
            width: size.width,
            height: size.height,
            depth_or_array_layers: 1,
        },
    );
    let submission = queue.submit(Some(encoder.finish()));

    let slice = buffer.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });

    device
        .poll(wgpu::PollType::Wait {
            submission_index: Some(submission),
            timeout: None,
        })
        .map_err(|err| GpuError::Backend(format!("readback poll failed: {err}")))?;

    match rx.recv() {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(GpuError::Backend(format!("readback map failed: {err}"))),
        Err(_) => return Err(GpuError::ContextLost),
    }

    let data = slice.get_mapped_range();
    let pixels = layout.strip_padding(&data);
    drop(data);
    buffer.unmap();
    Ok(pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_row_alignment() {
        let layout = ReadbackLayout::new(100, 3, 4);
        assert_eq!(layout.unpadded_bytes_per_row(), 400);
        assert_eq!(layout.padded_bytes_per_row, 512);
        assert_eq!(layout.buffer_size(), 1536);

        // Single-byte formats pad too.
        assert_eq!(ReadbackLayout::new(3, 1, 1).padded_bytes_per_row, 256);
    }

    #[test]
    fn test_strip_padding() {
        let layout = ReadbackLayout::new(2, 2, 1);
        let mut padded = vec![0u8; layout.buffer_size() as usize];
        padded[0..2].copy_from_slice(&[1, 2]);
        padded[256..258].copy_from_slice(&[3, 4]);
        assert_eq!(layout.strip_padding(&padded), vec![1, 2, 3, 4]);
    }
}
