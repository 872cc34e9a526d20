use crate::backend::wgpu::resource::WgpuResource;
use crate::error::{RenderError, RenderResult};
use crate::gpu::{CommandRecorder, GpuResource, ResourceState, SubresourceFootprint, TextureSubresource};

/// Records into a wgpu command encoder.
///
/// wgpu tracks resource states itself; transitions are only logged.
pub struct WgpuRecorder {
    encoder: wgpu::CommandEncoder,
    commands: usize,
}

impl WgpuRecorder {
    pub fn new(device: &wgpu::Device, label: &str) -> Self {
        let encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        Self { encoder, commands: 0 }
    }

    pub fn command_count(&self) -> usize {
        self.commands
    }

    /// Clears `view` with a render pass that does nothing else.
    pub fn clear(&mut self, view: &wgpu::TextureView, color: [f32; 4]) {
        let [r, g, b, a] = color.map(f64::from);
        let _pass = self.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("kiln clear pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view,
                resolve_target: None,
                depth_slice: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        self.commands += 1;
    }

    pub fn finish(self) -> wgpu::CommandBuffer {
        self.encoder.finish()
    }

    fn texture_copy<'a>(texture: &'a wgpu::Texture, sub: TextureSubresource) -> wgpu::TexelCopyTextureInfo<'a> {
        wgpu::TexelCopyTextureInfo {
            texture,
            mip_level: sub.mip_level,
            origin: wgpu::Origin3d {
                x: 0,
                y: 0,
                z: sub.array_slice,
            },
            aspect: wgpu::TextureAspect::All,
        }
    }

    fn buffer_copy<'a>(buffer: &'a wgpu::Buffer, footprint: &SubresourceFootprint) -> wgpu::TexelCopyBufferInfo<'a> {
        wgpu::TexelCopyBufferInfo {
            buffer,
            layout: wgpu::TexelCopyBufferLayout {
                offset: footprint.offset,
                bytes_per_row: Some(footprint.row_pitch),
                rows_per_image: Some(footprint.height),
            },
        }
    }

    fn extent(footprint: &SubresourceFootprint) -> wgpu::Extent3d {
        wgpu::Extent3d {
            width: footprint.width,
            height: footprint.height,
            depth_or_array_layers: 1,
        }
    }
}

fn check_aligned(what: &str, value: u64) -> RenderResult<()> {
    if value % wgpu::COPY_BUFFER_ALIGNMENT != 0 {
        return Err(RenderError::usage(format!(
            "{what} {value} is not a multiple of {}",
            wgpu::COPY_BUFFER_ALIGNMENT
        )));
    }
    Ok(())
}

impl CommandRecorder for WgpuRecorder {
    fn transition(&mut self, resource: &dyn GpuResource, before: ResourceState, after: ResourceState) {
        log::trace!("{} {}: {before:?} -> {after:?}", resource.id(), resource.desc().label);
    }

    fn copy_resource(&mut self, dst: &dyn GpuResource, src: &dyn GpuResource) -> RenderResult<()> {
        let (Some(dst_size), Some(src_size)) = (dst.desc().buffer_size(), src.desc().buffer_size()) else {
            return Err(RenderError::usage("whole-resource copies are only supported between buffers"));
        };
        if dst_size != src_size {
            return Err(RenderError::usage(format!(
                "copy {} -> {}: sizes differ ({src_size} vs {dst_size})",
                src.desc().label,
                dst.desc().label
            )));
        }
        let dst = WgpuResource::downcast(dst)?.buffer()?;
        let src = WgpuResource::downcast(src)?.buffer()?;
        // Both allocations are padded to the copy alignment.
        self.encoder.copy_buffer_to_buffer(src, 0, dst, 0, dst.size());
        self.commands += 1;
        Ok(())
    }

    fn copy_buffer_region(
        &mut self,
        dst: &dyn GpuResource,
        dst_offset: u64,
        src: &dyn GpuResource,
        src_offset: u64,
        size: u64,
    ) -> RenderResult<()> {
        check_aligned("destination offset", dst_offset)?;
        check_aligned("source offset", src_offset)?;
        check_aligned("copy size", size)?;
        let dst = WgpuResource::downcast(dst)?.buffer()?;
        let src = WgpuResource::downcast(src)?.buffer()?;
        self.encoder.copy_buffer_to_buffer(src, src_offset, dst, dst_offset, size);
        self.commands += 1;
        Ok(())
    }

    fn copy_buffer_to_texture(
        &mut self,
        dst: &dyn GpuResource,
        subresource: TextureSubresource,
        src: &dyn GpuResource,
        footprint: &SubresourceFootprint,
    ) -> RenderResult<()> {
        let texture = WgpuResource::downcast(dst)?.texture()?;
        let buffer = WgpuResource::downcast(src)?.buffer()?;
        self.encoder.copy_buffer_to_texture(
            Self::buffer_copy(buffer, footprint),
            Self::texture_copy(texture, subresource),
            Self::extent(footprint),
        );
        self.commands += 1;
        Ok(())
    }

    fn copy_texture_to_buffer(
        &mut self,
        dst: &dyn GpuResource,
        footprint: &SubresourceFootprint,
        src: &dyn GpuResource,
        subresource: TextureSubresource,
    ) -> RenderResult<()> {
        let buffer = WgpuResource::downcast(dst)?.buffer()?;
        let texture = WgpuResource::downcast(src)?.texture()?;
        self.encoder.copy_texture_to_buffer(
            Self::texture_copy(texture, subresource),
            Self::buffer_copy(buffer, footprint),
            Self::extent(footprint),
        );
        self.commands += 1;
        Ok(())
    }
}
