use std::sync::{Arc, Weak};

use crate::backend::soft::resource::SoftResource;
use crate::error::{RenderError, RenderResult};
use crate::gpu::{
    CommandRecorder, GpuResource, ResourceId, ResourceState, SubresourceFootprint, TextureSubresource,
};

/// A resource reference inside a recorded command.
///
/// Commands do not keep resources alive, like real command lists; executing a
/// command whose resource was destroyed is reported as a device fault.
#[derive(Clone)]
pub(crate) struct ResourceRef {
    id: ResourceId,
    weak: Weak<SoftResource>,
}

impl ResourceRef {
    fn new(resource: &SoftResource) -> Self {
        Self {
            id: resource.id(),
            weak: resource.weak(),
        }
    }

    fn upgrade(&self) -> Result<Arc<SoftResource>, String> {
        self.weak
            .upgrade()
            .ok_or_else(|| format!("use after free: resource {} destroyed before GPU execution", self.id))
    }
}

pub(crate) enum Command {
    Transition {
        resource: ResourceRef,
        before: ResourceState,
        after: ResourceState,
    },
    CopyBuffer {
        dst: ResourceRef,
        dst_offset: u64,
        src: ResourceRef,
        src_offset: u64,
        size: u64,
    },
    BufferToTexture {
        dst: ResourceRef,
        subresource: TextureSubresource,
        src: ResourceRef,
        footprint: SubresourceFootprint,
    },
    TextureToBuffer {
        dst: ResourceRef,
        footprint: SubresourceFootprint,
        src: ResourceRef,
        subresource: TextureSubresource,
    },
    Clear {
        target: ResourceRef,
        texel: Vec<u8>,
    },
}

impl Command {
    pub(crate) fn execute(&self) -> Result<(), String> {
        match self {
            Command::Transition { resource, before, after } => resource.upgrade()?.apply_transition(*before, *after),
            Command::CopyBuffer {
                dst,
                dst_offset,
                src,
                src_offset,
                size,
            } => {
                let (dst, src) = (dst.upgrade()?, src.upgrade()?);
                dst.expect_state(ResourceState::CopyDest)?;
                src.expect_state(ResourceState::CopySource)?;
                let (d, s, n) = (*dst_offset as usize, *src_offset as usize, *size as usize);
                let src_memory = src.memory();
                dst.memory()[d..d + n].copy_from_slice(&src_memory[s..s + n]);
                Ok(())
            }
            Command::BufferToTexture {
                dst,
                subresource,
                src,
                footprint,
            } => {
                let (dst, src) = (dst.upgrade()?, src.upgrade()?);
                dst.expect_state(ResourceState::CopyDest)?;
                src.expect_state(ResourceState::CopySource)?;
                let (base, _) = dst
                    .subresource_span(subresource.mip_level, subresource.array_slice)
                    .ok_or_else(|| format!("{subresource:?} out of range"))?;
                let src_memory = src.memory();
                let mut dst_memory = dst.memory();
                let row = footprint.packed_row_size as usize;
                for y in 0..footprint.height as usize {
                    let from = footprint.offset as usize + y * footprint.row_pitch as usize;
                    let to = base as usize + y * row;
                    dst_memory[to..to + row].copy_from_slice(&src_memory[from..from + row]);
                }
                Ok(())
            }
            Command::TextureToBuffer {
                dst,
                footprint,
                src,
                subresource,
            } => {
                let (dst, src) = (dst.upgrade()?, src.upgrade()?);
                dst.expect_state(ResourceState::CopyDest)?;
                src.expect_state(ResourceState::CopySource)?;
                let (base, _) = src
                    .subresource_span(subresource.mip_level, subresource.array_slice)
                    .ok_or_else(|| format!("{subresource:?} out of range"))?;
                let src_memory = src.memory();
                let mut dst_memory = dst.memory();
                let row = footprint.packed_row_size as usize;
                for y in 0..footprint.height as usize {
                    let from = base as usize + y * row;
                    let to = footprint.offset as usize + y * footprint.row_pitch as usize;
                    dst_memory[to..to + row].copy_from_slice(&src_memory[from..from + row]);
                }
                Ok(())
            }
            Command::Clear { target, texel } => {
                let target = target.upgrade()?;
                target.expect_state(ResourceState::RenderTarget)?;
                let (base, size) = target
                    .subresource_span(0, 0)
                    .ok_or_else(|| format!("{} is not a texture", target.label()))?;
                let mut memory = target.memory();
                for pixel in memory[base as usize..(base + size) as usize].chunks_exact_mut(texel.len()) {
                    pixel.copy_from_slice(texel);
                }
                Ok(())
            }
        }
    }
}

/// Command list of the software GPU.
///
/// Copies are bounds-checked while recording; resource liveness and barrier
/// states are checked when the queue executes the list.
#[derive(Default)]
pub struct SoftCommandList {
    pub(crate) commands: Vec<Command>,
}

impl SoftCommandList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Fills mip 0 of array slice 0 of `target` with `texel`.
    pub fn clear(&mut self, target: &dyn GpuResource, texel: &[u8]) -> RenderResult<()> {
        let target = SoftResource::downcast(target)?;
        let pixel_size = target
            .texture_info()
            .map(|info| info.format.pixel_size() as usize)
            .ok_or_else(|| RenderError::usage(format!("{}: clear needs a texture", target.label())))?;
        if texel.len() != pixel_size {
            return Err(RenderError::usage(format!(
                "{}: clear texel is {} bytes, format has {pixel_size}",
                target.label(),
                texel.len()
            )));
        }
        self.commands.push(Command::Clear {
            target: ResourceRef::new(target),
            texel: texel.to_vec(),
        });
        Ok(())
    }
}

fn distinct<'a>(dst: &'a dyn GpuResource, src: &'a dyn GpuResource) -> RenderResult<(&'a SoftResource, &'a SoftResource)> {
    let (dst, src) = (SoftResource::downcast(dst)?, SoftResource::downcast(src)?);
    if dst.id() == src.id() {
        return Err(RenderError::usage(format!("{}: copy onto itself", dst.label())));
    }
    Ok((dst, src))
}

fn footprint_fits(buffer: &SoftResource, footprint: &SubresourceFootprint) -> bool {
    footprint.height > 0
        && footprint.offset + u64::from(footprint.row_pitch) * u64::from(footprint.height - 1)
            + u64::from(footprint.packed_row_size)
            <= buffer.size()
}

fn check_subresource(
    texture: &SoftResource,
    subresource: TextureSubresource,
    footprint: &SubresourceFootprint,
) -> RenderResult<()> {
    let info = texture
        .texture_info()
        .ok_or_else(|| RenderError::usage(format!("{}: not a texture", texture.label())))?;
    if texture
        .subresource_span(subresource.mip_level, subresource.array_slice)
        .is_none()
    {
        return Err(RenderError::usage(format!(
            "{}: {subresource:?} out of range",
            texture.label()
        )));
    }
    let (width, height) = info.mip_extent(subresource.mip_level);
    if (footprint.width, footprint.height) != (width, height)
        || footprint.packed_row_size != width * info.format.pixel_size()
    {
        return Err(RenderError::usage(format!(
            "{}: footprint {}x{} does not match mip {} ({width}x{height})",
            texture.label(),
            footprint.width,
            footprint.height,
            subresource.mip_level
        )));
    }
    Ok(())
}

impl CommandRecorder for SoftCommandList {
    fn transition(&mut self, resource: &dyn GpuResource, before: ResourceState, after: ResourceState) {
        match SoftResource::downcast(resource) {
            Ok(resource) => self.commands.push(Command::Transition {
                resource: ResourceRef::new(resource),
                before,
                after,
            }),
            Err(err) => log::error!("dropping barrier: {err}"),
        }
    }

    fn copy_resource(&mut self, dst: &dyn GpuResource, src: &dyn GpuResource) -> RenderResult<()> {
        let (dst_size, src_size) = (dst.desc().buffer_size(), src.desc().buffer_size());
        match (dst_size, src_size) {
            (Some(d), Some(s)) if d == s => self.copy_buffer_region(dst, 0, src, 0, d),
            _ => Err(RenderError::usage(format!(
                "copy_resource needs two buffers of equal size ({} {dst_size:?}, {} {src_size:?})",
                dst.desc().label,
                src.desc().label
            ))),
        }
    }

    fn copy_buffer_region(
        &mut self,
        dst: &dyn GpuResource,
        dst_offset: u64,
        src: &dyn GpuResource,
        src_offset: u64,
        size: u64,
    ) -> RenderResult<()> {
        let (dst, src) = distinct(dst, src)?;
        if dst_offset + size > dst.size() || src_offset + size > src.size() {
            return Err(RenderError::usage(format!(
                "copy of {size} bytes {} @{src_offset} -> {} @{dst_offset} out of bounds",
                src.label(),
                dst.label()
            )));
        }
        self.commands.push(Command::CopyBuffer {
            dst: ResourceRef::new(dst),
            dst_offset,
            src: ResourceRef::new(src),
            src_offset,
            size,
        });
        Ok(())
    }

    fn copy_buffer_to_texture(
        &mut self,
        dst: &dyn GpuResource,
        subresource: TextureSubresource,
        src: &dyn GpuResource,
        footprint: &SubresourceFootprint,
    ) -> RenderResult<()> {
        let (dst, src) = distinct(dst, src)?;
        check_subresource(dst, subresource, footprint)?;
        if !footprint_fits(src, footprint) {
            return Err(RenderError::usage(format!("{}: footprint exceeds the buffer", src.label())));
        }
        self.commands.push(Command::BufferToTexture {
            dst: ResourceRef::new(dst),
            subresource,
            src: ResourceRef::new(src),
            footprint: *footprint,
        });
        Ok(())
    }

    fn copy_texture_to_buffer(
        &mut self,
        dst: &dyn GpuResource,
        footprint: &SubresourceFootprint,
        src: &dyn GpuResource,
        subresource: TextureSubresource,
    ) -> RenderResult<()> {
        let (dst, src) = distinct(dst, src)?;
        check_subresource(src, subresource, footprint)?;
        if !footprint_fits(dst, footprint) {
            return Err(RenderError::usage(format!("{}: footprint exceeds the buffer", dst.label())));
        }
        self.commands.push(Command::TextureToBuffer {
            dst: ResourceRef::new(dst),
            footprint: *footprint,
            src: ResourceRef::new(src),
            subresource,
        });
        Ok(())
    }
}
