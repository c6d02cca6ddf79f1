//! Blocking GPU to CPU copies for tooling and tests

use glam::UVec3;

use crate::core::error::Error;
use crate::core::types::Result;

/// Round a row of `width` texels up to the copy row alignment
pub fn padded_bytes_per_row(width: u32, bytes_per_texel: u32) -> u32 {
    let unpadded = width * bytes_per_texel;
    unpadded.div_ceil(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT) * wgpu::COPY_BYTES_PER_ROW_ALIGNMENT
}

/// Drop the row padding of a copied image
pub fn unpad_rows(data: &[u8], row_bytes: usize, padded_row_bytes: usize, rows: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(row_bytes * rows);
    for row in 0..rows {
        let start = row * padded_row_bytes;
        out.extend_from_slice(&data[start..start + row_bytes]);
    }
    out
}

fn staging(device: &wgpu::Device, size: u64) -> wgpu::Buffer {
    device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("readback_staging"),
        size,
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    })
}

/// Submit `encoder`, wait for it and copy the mapped staging buffer out
fn finish(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    encoder: wgpu::CommandEncoder,
    staging: wgpu::Buffer,
) -> Result<Vec<u8>> {
    let submission = queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        tx.send(result).ok();
    });
    device
        .poll(wgpu::PollType::Wait { submission_index: Some(submission), timeout: None })
        .map_err(|e| Error::Gpu(format!("Readback poll failed: {e}")))?;

    rx.recv()
        .map_err(|_| Error::Gpu("Readback callback dropped".into()))?
        .map_err(|e| Error::Gpu(format!("Readback map failed: {e}")))?;

    let bytes = slice.get_mapped_range().to_vec();
    staging.unmap();
    staging.destroy();
    Ok(bytes)
}

/// Copy `size` bytes at `offset` out of a `COPY_SRC` buffer
pub fn read_buffer(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    buffer: &wgpu::Buffer,
    offset: u64,
    size: u64,
) -> Result<Vec<u8>> {
    if size == 0 {
        return Ok(Vec::new());
    }
    // copy sizes must be multiples of 4
    let copy_size = size.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
    let staging = staging(device, copy_size);
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback_buffer_encoder"),
    });
    encoder.copy_buffer_to_buffer(buffer, offset, &staging, 0, copy_size);
    let mut bytes = finish(device, queue, encoder, staging)?;
    bytes.truncate(size as usize);
    Ok(bytes)
}

/// Copy one mip of a 3D texture, tightly packed x fastest
pub fn read_texture_3d(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    mip_level: u32,
    extent: UVec3,
    bytes_per_texel: u32,
) -> Result<Vec<u8>> {
    let padded = padded_bytes_per_row(extent.x, bytes_per_texel);
    let rows = extent.y * extent.z;
    let staging = staging(device, padded as u64 * rows as u64);

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback_texture_encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded),
                rows_per_image: Some(extent.y),
            },
        },
        wgpu::Extent3d {
            width: extent.x,
            height: extent.y,
            depth_or_array_layers: extent.z,
        },
    );

    let data = finish(device, queue, encoder, staging)?;
    Ok(unpad_rows(&data, (extent.x * bytes_per_texel) as usize, padded as usize, rows as usize))
}

/// Reinterpret tightly packed little-endian words
pub fn words(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_padding() {
        assert_eq!(padded_bytes_per_row(64, 4), 256);
        assert_eq!(padded_bytes_per_row(65, 4), 512);
        assert_eq!(padded_bytes_per_row(384, 4), 1536);
        assert_eq!(padded_bytes_per_row(1, 4), 256);
    }

    #[test]
    fn test_unpad_rows() {
        let mut data = vec![0u8; 3 * 8];
        for row in 0..3 {
            data[row * 8] = row as u8 + 1;
            data[row * 8 + 1] = row as u8 + 10;
        }
        assert_eq!(unpad_rows(&data, 2, 8, 3), vec![1, 10, 2, 11, 3, 12]);
    }

    #[test]
    fn test_words_little_endian() {
        assert_eq!(words(&[1, 0, 0, 0, 0, 1, 0, 0]), vec![1, 256]);
    }
}
