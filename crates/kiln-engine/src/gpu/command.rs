use crate::error::RenderResult;
use crate::gpu::resource::{GpuResource, ResourceState};
use crate::gpu::texture::SubresourceFootprint;

/// Addresses one mip level of one array slice of a texture.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TextureSubresource {
    pub mip_level: u32,
    pub array_slice: u32,
}

/// Records GPU commands into a backend command list.
///
/// Implemented once per backend; the staging copy pass only talks to this trait.
pub trait CommandRecorder {
    /// Transitions every subresource of `resource` from `before` to `after`.
    fn transition(&mut self, resource: &dyn GpuResource, before: ResourceState, after: ResourceState);

    /// Copies a whole buffer. Both buffers must have the same size.
    fn copy_resource(&mut self, dst: &dyn GpuResource, src: &dyn GpuResource) -> RenderResult<()>;

    fn copy_buffer_region(
        &mut self,
        dst: &dyn GpuResource,
        dst_offset: u64,
        src: &dyn GpuResource,
        src_offset: u64,
        size: u64,
    ) -> RenderResult<()>;

    /// Copies one footprint of a linear buffer into a texture subresource.
    fn copy_buffer_to_texture(
        &mut self,
        dst: &dyn GpuResource,
        subresource: TextureSubresource,
        src: &dyn GpuResource,
        footprint: &SubresourceFootprint,
    ) -> RenderResult<()>;

    /// Copies a texture subresource into one footprint of a linear buffer.
    fn copy_texture_to_buffer(
        &mut self,
        dst: &dyn GpuResource,
        footprint: &SubresourceFootprint,
        src: &dyn GpuResource,
        subresource: TextureSubresource,
    ) -> RenderResult<()>;
}
