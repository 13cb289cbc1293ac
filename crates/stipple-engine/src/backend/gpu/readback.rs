use crate::backend::PixelRect;
use crate::error::{RenderError, RenderResult};

/// Uploads tightly packed RGBA8 rows into `texture` at `rect`.
pub(super) fn upload_rows(queue: &wgpu::Queue, texture: &wgpu::Texture, rect: PixelRect, data: &[u8]) {
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d { x: rect.x, y: rect.y, z: 0 },
            aspect: wgpu::TextureAspect::All,
        },
        data,
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(rect.width * 4),
            rows_per_image: Some(rect.height),
        },
        wgpu::Extent3d {
            width: rect.width,
            height: rect.height,
            depth_or_array_layers: 1,
        },
    );
}

/// Copies `rect` of `texture` back to the CPU as tightly packed RGBA8 rows.
///
/// Blocks until the GPU has finished the copy.
pub(super) fn read_rows(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    texture: &wgpu::Texture,
    rect: PixelRect,
    out: &mut Vec<u8>,
) -> RenderResult<()> {
    out.clear();
    if rect.is_empty() {
        return Ok(());
    }

    let row_bytes = rect.width * 4;
    let padded_row = row_bytes.next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);

    let staging = device.create_buffer(&wgpu::BufferDescriptor {
        label: Some("stipple readback"),
        size: u64::from(padded_row) * u64::from(rect.height),
        usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
        mapped_at_creation: false,
    });

    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("stipple readback encoder"),
    });
    encoder.copy_texture_to_buffer(
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d { x: rect.x, y: rect.y, z: 0 },
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::TexelCopyBufferInfo {
            buffer: &staging,
            layout: wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(padded_row),
                rows_per_image: Some(rect.height),
            },
        },
        wgpu::Extent3d {
            width: rect.width,
            height: rect.height,
            depth_or_array_layers: 1,
        },
    );
    let submission_index = queue.submit(std::iter::once(encoder.finish()));

    let slice = staging.slice(..);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device
        .poll(wgpu::PollType::Wait { timeout: None, submission_index: Some(submission_index) })
        .map_err(|e| RenderError::Backend(format!("readback poll failed: {e}")))?;
    rx.recv()
        .map_err(|_| RenderError::Backend("readback callback dropped".to_owned()))?
        .map_err(|e| RenderError::Backend(format!("readback map failed: {e}")))?;

    {
        let data = slice.get_mapped_range();
        out.reserve(rect.byte_len());
        for row in 0..rect.height as usize {
            let start = row * padded_row as usize;
            out.extend_from_slice(&data[start..start + row_bytes as usize]);
        }
    }
    staging.unmap();
    Ok(())
}
