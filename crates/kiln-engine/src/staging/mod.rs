//! CPU → GPU data staging.
//!
//! A [`StagedBuffer`] is one GPU resource plus, for GPU-local memory, the
//! upload-heap companions its CPU writes go through. Writes to a local
//! resource land in a companion and register the buffer in the context's
//! [`UploadQueue`]; worker 0 records the copies once per frame with
//! [`StagedBuffer::gpu_copy`]. Companions are never destroyed while a copy
//! may still read them: they go through the deferred release queue.

mod upload;

pub use upload::UploadQueue;
pub(crate) use upload::DirtyEntry;

use std::fmt;
use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use bytemuck::Pod;

use crate::context::RenderContext;
use crate::descriptor::ViewDesc;
use crate::error::{RenderError, RenderResult};
use crate::gpu::texture::align_up;
use crate::gpu::{
    CommandRecorder, ContentKind, GpuResource, HeapKind, ResourceDesc, ResourceId, ResourceState,
    SharedResource, SliceLayout, TextureInfo, TextureSubresource,
};
use crate::sync::lock;

/// What happens to a staging companion after its copy was recorded.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub enum StagingPolicy {
    /// Hand the companion to the release queue; the next write allocates a new one.
    #[default]
    Transient,
    /// Keep the companion and reuse it once its copy has completed.
    Retained,
}

#[derive(Debug, Clone)]
pub struct StagedBufferDesc {
    pub label: String,
    pub heap: HeapKind,
    pub content: ContentKind,
    /// Bytes per element as written by the caller.
    pub stride: u32,
    pub count: u32,
    /// Required for texture content, ignored otherwise.
    pub texture: Option<TextureInfo>,
    pub policy: StagingPolicy,
}

impl StagedBufferDesc {
    pub fn scalar(label: impl Into<String>, heap: HeapKind, content: ContentKind, stride: u32, count: u32) -> Self {
        Self {
            label: label.into(),
            heap,
            content,
            stride,
            count,
            texture: None,
            policy: StagingPolicy::default(),
        }
    }

    pub fn constant(label: impl Into<String>, heap: HeapKind, stride: u32, count: u32) -> Self {
        Self::scalar(label, heap, ContentKind::Constant, stride, count)
    }

    pub fn vertex(label: impl Into<String>, heap: HeapKind, stride: u32, count: u32) -> Self {
        Self::scalar(label, heap, ContentKind::Vertex, stride, count)
    }

    pub fn texture(label: impl Into<String>, heap: HeapKind, info: TextureInfo) -> Self {
        Self {
            label: label.into(),
            heap,
            content: ContentKind::Texture,
            stride: info.format.pixel_size(),
            count: info.array_count,
            texture: Some(info),
            policy: StagingPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: StagingPolicy) -> Self {
        self.policy = policy;
        self
    }
}

struct Companion {
    resource: SharedResource,
    array_slice: u32,
    /// Written but not yet copied.
    pending: bool,
    /// Fence value after which the last recorded copy has finished reading it.
    busy_until: u64,
}

#[derive(Default)]
struct StagingState {
    companions: Vec<Companion>,
    /// Disjoint, sorted byte ranges of scalar data written since the last copy.
    dirty: Vec<Range<u64>>,
}

struct StagedInner {
    desc: StagedBufferDesc,
    element_size: u64,
    /// Linear layout of one texture array slice.
    layout: Option<SliceLayout>,
    resource: SharedResource,
    state: Mutex<StagingState>,
    retired: AtomicBool,
}

/// A GPU resource with CPU write access, staged through the upload heap when
/// it lives in GPU-local memory.
///
/// Cloning is cheap and yields another handle to the same resource.
#[derive(Clone)]
pub struct StagedBuffer {
    inner: Arc<StagedInner>,
}

impl fmt::Debug for StagedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedBuffer")
            .field("label", &self.inner.desc.label)
            .field("heap", &self.inner.desc.heap)
            .field("content", &self.inner.desc.content)
            .field("resource", &self.inner.resource.id())
            .finish()
    }
}

impl StagedBuffer {
    pub fn new(ctx: &RenderContext, desc: StagedBufferDesc) -> RenderResult<Self> {
        let element_size = match desc.content {
            ContentKind::Texture => {
                let info = desc
                    .texture
                    .as_ref()
                    .ok_or_else(|| RenderError::usage(format!("{}: texture content needs a TextureInfo", desc.label)))?;
                info.validate()?;
                if desc.heap == HeapKind::Readback && info.mip_count > 1 {
                    return Err(RenderError::usage(format!(
                        "{}: readback textures cannot have mip chains",
                        desc.label
                    )));
                }
                u64::from(info.format.pixel_size())
            }
            ContentKind::Constant => align_up(u64::from(desc.stride), ctx.device().constant_alignment()),
            ContentKind::Vertex => u64::from(desc.stride),
        };
        if desc.content != ContentKind::Texture && (desc.stride == 0 || desc.count == 0) {
            return Err(RenderError::usage(format!(
                "{}: stride and count must be non-zero",
                desc.label
            )));
        }

        let layout = desc.texture.as_ref().map(TextureInfo::slice_layout);
        let resource_desc = match (&desc.texture, &layout) {
            (Some(info), _) if desc.heap == HeapKind::Local => ResourceDesc::texture(desc.label.clone(), info.clone()),
            (Some(info), Some(layout)) => ResourceDesc::buffer(
                desc.label.clone(),
                desc.heap,
                ContentKind::Texture,
                layout.size * u64::from(info.array_count),
            ),
            _ => ResourceDesc::buffer(
                desc.label.clone(),
                desc.heap,
                desc.content,
                element_size * u64::from(desc.count),
            ),
        };
        let resource = ctx.device().create_resource(&resource_desc)?;
        log::debug!(
            "staged {} {:?}/{:?} as {} (element {element_size} bytes)",
            desc.label,
            desc.heap,
            desc.content,
            resource.id()
        );

        Ok(Self {
            inner: Arc::new(StagedInner {
                desc,
                element_size,
                layout,
                resource,
                state: Mutex::new(StagingState::default()),
                retired: AtomicBool::new(false),
            }),
        })
    }

    pub fn desc(&self) -> &StagedBufferDesc {
        &self.inner.desc
    }

    pub fn label(&self) -> &str {
        &self.inner.desc.label
    }

    pub fn heap(&self) -> HeapKind {
        self.inner.desc.heap
    }

    pub fn content(&self) -> ContentKind {
        self.inner.desc.content
    }

    /// Stride of one element in GPU memory (constant data is padded).
    pub fn element_size(&self) -> u64 {
        self.inner.element_size
    }

    pub fn element_count(&self) -> u32 {
        self.inner.desc.count
    }

    pub fn texture_info(&self) -> Option<&TextureInfo> {
        self.inner.desc.texture.as_ref()
    }

    pub fn resource(&self) -> &SharedResource {
        &self.inner.resource
    }

    /// Size of the linear staging image of one texture array slice.
    pub fn slice_size(&self) -> Option<u64> {
        self.inner.layout.as_ref().map(|l| l.size)
    }

    /// Byte size of the scalar buffer, or of the linear image of every slice.
    pub fn byte_size(&self) -> u64 {
        self.inner
            .resource
            .desc()
            .buffer_size()
            .unwrap_or_else(|| self.slice_size().unwrap_or(0) * u64::from(self.inner.desc.count))
    }

    /// GPU address of element `index`, when the backend exposes addresses.
    pub fn gpu_address(&self, index: u32) -> Option<u64> {
        if index >= self.inner.desc.count {
            return None;
        }
        self.inner
            .resource
            .gpu_address()
            .map(|base| base + u64::from(index) * self.inner.element_size)
    }

    /// Constant-buffer view over element `index`.
    pub fn constant_view(&self, index: u32) -> ViewDesc {
        ViewDesc::Constant {
            offset: u64::from(index) * self.inner.element_size,
            size: self.inner.element_size,
        }
    }

    /// Number of staging companions currently owned.
    pub fn staging_count(&self) -> usize {
        lock(&self.inner.state).companions.len()
    }

    pub fn is_retired(&self) -> bool {
        self.inner.retired.load(Ordering::Acquire)
    }

    /// Writes `count` elements starting at element `offset`.
    ///
    /// `bytes` holds the elements back to back at the caller's stride.
    pub fn write_scalar(&self, ctx: &RenderContext, bytes: &[u8], offset: u32, count: u32) -> RenderResult<()> {
        let desc = &self.inner.desc;
        if desc.content == ContentKind::Texture {
            return Err(RenderError::usage(format!("{}: use write_texture for texture data", desc.label)));
        }
        let end = u64::from(offset) + u64::from(count);
        if end > u64::from(desc.count) {
            return Err(RenderError::usage(format!(
                "{}: elements {offset}..{end} out of range (count {})",
                desc.label, desc.count
            )));
        }
        let needed = count as usize * desc.stride as usize;
        if bytes.len() < needed {
            return Err(RenderError::usage(format!(
                "{}: {} bytes given, {needed} needed",
                desc.label,
                bytes.len()
            )));
        }
        let bytes = &bytes[..needed];

        match desc.heap {
            HeapKind::Upload => self.store_elements(self.inner.resource.as_ref(), bytes, offset, count),
            HeapKind::Readback => Err(RenderError::usage(format!(
                "{}: readback resources are not CPU-writable",
                desc.label
            ))),
            HeapKind::Local => {
                let mut state = lock(&self.inner.state);
                let idx = self.scalar_companion(ctx, &mut state)?;
                self.store_elements(state.companions[idx].resource.as_ref(), bytes, offset, count)?;

                let written = u64::from(offset) * self.inner.element_size..end * self.inner.element_size;
                merge_dirty(&mut state.dirty, written);
                self.mark_pending(ctx, &mut state.companions[idx]);
                Ok(())
            }
        }
    }

    /// Writes a slice of `T` starting at element `offset`. `T` must match the stride.
    pub fn write_typed<T: Pod>(&self, ctx: &RenderContext, data: &[T], offset: u32) -> RenderResult<()> {
        if std::mem::size_of::<T>() != self.inner.desc.stride as usize {
            return Err(RenderError::usage(format!(
                "{}: element type is {} bytes, stride is {}",
                self.inner.desc.label,
                std::mem::size_of::<T>(),
                self.inner.desc.stride
            )));
        }
        let count = u32::try_from(data.len())
            .map_err(|_| RenderError::usage(format!("{}: too many elements", self.inner.desc.label)))?;
        self.write_scalar(ctx, bytemuck::cast_slice(data), offset, count)
    }

    /// Writes one texture array slice.
    ///
    /// `bytes` holds every mip level of the slice tightly packed, largest first.
    pub fn write_texture(&self, ctx: &RenderContext, bytes: &[u8], array_slice: u32) -> RenderResult<()> {
        let (info, layout) = self.texture_parts()?;
        if array_slice >= info.array_count {
            return Err(RenderError::usage(format!(
                "{}: array slice {array_slice} out of range (count {})",
                self.inner.desc.label, info.array_count
            )));
        }
        let packed = info.packed_slice_size();
        if (bytes.len() as u64) < packed {
            return Err(RenderError::usage(format!(
                "{}: {} bytes given, slice needs {packed}",
                self.inner.desc.label,
                bytes.len()
            )));
        }
        let mut linear = vec![0u8; layout.size as usize];
        layout.scatter_rows(bytes, &mut linear);

        match self.inner.desc.heap {
            HeapKind::Upload => self
                .inner
                .resource
                .write_mapped(u64::from(array_slice) * layout.size, &linear),
            HeapKind::Readback => Err(RenderError::usage(format!(
                "{}: readback resources are not CPU-writable",
                self.inner.desc.label
            ))),
            HeapKind::Local => {
                let mut state = lock(&self.inner.state);
                if cfg!(debug_assertions)
                    && state
                        .companions
                        .iter()
                        .any(|c| c.pending && c.array_slice == array_slice)
                {
                    return Err(RenderError::usage(format!(
                        "{}: array slice {array_slice} written twice in one frame",
                        self.inner.desc.label
                    )));
                }
                let idx = self.slice_companion(ctx, &mut state, array_slice)?;
                let companion = &mut state.companions[idx];
                companion.resource.write_mapped(0, &linear)?;
                companion.array_slice = array_slice;
                self.mark_pending(ctx, companion);
                Ok(())
            }
        }
    }

    /// Copies CPU-visible memory of a readback resource into `out`.
    pub fn read_back(&self, out: &mut [u8]) -> RenderResult<()> {
        if self.inner.desc.heap != HeapKind::Readback {
            return Err(RenderError::usage(format!(
                "{}: read_back needs a readback resource",
                self.inner.desc.label
            )));
        }
        self.inner.resource.read_mapped(0, out)
    }

    /// Reads `out.len()` bytes at `offset` from an upload or readback resource.
    pub fn read_mapped(&self, offset: u64, out: &mut [u8]) -> RenderResult<()> {
        if !self.inner.desc.heap.is_cpu_visible() {
            return Err(RenderError::usage(format!(
                "{}: GPU-local memory is not CPU-visible",
                self.inner.desc.label
            )));
        }
        self.inner.resource.read_mapped(offset, out)
    }

    /// Reads one array slice of a readback texture back into packed rows.
    pub fn read_texture(&self, array_slice: u32, out: &mut [u8]) -> RenderResult<()> {
        let (info, layout) = self.texture_parts()?;
        if array_slice >= info.array_count || (out.len() as u64) < info.packed_slice_size() {
            return Err(RenderError::usage(format!(
                "{}: cannot read array slice {array_slice} into {} bytes",
                self.inner.desc.label,
                out.len()
            )));
        }
        let mut linear = vec![0u8; layout.size as usize];
        self.read_mapped(u64::from(array_slice) * layout.size, &mut linear)?;
        layout.gather_rows(&linear, out);
        Ok(())
    }

    /// Records every pending staging copy into `recorder`.
    ///
    /// Called once per frame by the worker whose command list is submitted
    /// first, so the copies land before any draw of the same frame. Returns
    /// the number of copies recorded.
    pub fn gpu_copy(ctx: &RenderContext, recorder: &mut dyn CommandRecorder) -> RenderResult<usize> {
        let entries = ctx.uploads().take();
        if entries.is_empty() {
            return Ok(0);
        }
        let target_fence = ctx.target_fence();
        let mut copies = 0;
        for entry in entries {
            if entry.buffer.record_upload(ctx, recorder, entry.companion, target_fence)? {
                copies += 1;
            }
        }
        log::trace!("recorded {copies} staging copies for fence {target_fence}");
        Ok(copies)
    }

    /// Records a copy of this resource into `readback`.
    pub fn record_readback(&self, recorder: &mut dyn CommandRecorder, readback: &StagedBuffer) -> RenderResult<()> {
        if readback.heap() != HeapKind::Readback {
            return Err(RenderError::usage(format!("{}: not a readback resource", readback.label())));
        }
        if self.heap() == HeapKind::Readback {
            return Err(RenderError::usage(format!("{}: cannot read back a readback resource", self.label())));
        }
        let src = self.inner.resource.as_ref();
        let dst = readback.inner.resource.as_ref();
        let mismatch = || {
            RenderError::usage(format!(
                "{}: readback target {} does not match the source",
                self.label(),
                readback.label()
            ))
        };

        // Nothing is recorded for a rejected readback.
        let texture = match (self.texture_info(), src.desc().buffer_size()) {
            (Some(info), None) => {
                let (dst_info, dst_layout) = readback.texture_parts()?;
                if dst_info.format != info.format
                    || (dst_info.width, dst_info.height) != (info.width, info.height)
                    || dst_info.array_count != info.array_count
                {
                    return Err(mismatch());
                }
                Some((info.array_count, dst_layout.footprints[0], dst_layout.size))
            }
            (_, size) => {
                if size.is_none() || dst.desc().buffer_size() != size {
                    return Err(mismatch());
                }
                None
            }
        };

        recorder.transition(src, ResourceState::GenericRead, ResourceState::CopySource);
        recorder.transition(dst, ResourceState::GenericRead, ResourceState::CopyDest);
        match texture {
            Some((array_count, footprint, slice_size)) => {
                for array_slice in 0..array_count {
                    recorder.copy_texture_to_buffer(
                        dst,
                        &footprint.shifted(u64::from(array_slice) * slice_size),
                        src,
                        TextureSubresource {
                            mip_level: 0,
                            array_slice,
                        },
                    )?;
                }
            }
            None => recorder.copy_resource(dst, src)?,
        }
        recorder.transition(dst, ResourceState::CopyDest, ResourceState::GenericRead);
        recorder.transition(src, ResourceState::CopySource, ResourceState::GenericRead);
        Ok(())
    }

    /// Hands the resource and its companions to the deferred release queue.
    ///
    /// Pending writes that were not copied yet are dropped.
    pub fn retire(&self, ctx: &RenderContext) {
        if self.inner.retired.swap(true, Ordering::AcqRel) {
            return;
        }
        let companions = std::mem::take(&mut lock(&self.inner.state).companions);
        for companion in companions {
            ctx.defer_release(companion.resource);
        }
        ctx.defer_release(self.inner.resource.clone());
        log::debug!("retired {}", self.inner.desc.label);
    }

    fn texture_parts(&self) -> RenderResult<(&TextureInfo, &SliceLayout)> {
        match (&self.inner.desc.texture, &self.inner.layout) {
            (Some(info), Some(layout)) => Ok((info, layout)),
            _ => Err(RenderError::usage(format!("{}: not a texture", self.inner.desc.label))),
        }
    }

    fn store_elements(&self, target: &dyn GpuResource, bytes: &[u8], offset: u32, count: u32) -> RenderResult<()> {
        let stride = self.inner.desc.stride as usize;
        let element_size = self.inner.element_size;
        if element_size == stride as u64 {
            return target.write_mapped(u64::from(offset) * element_size, bytes);
        }
        for i in 0..count as usize {
            let at = (u64::from(offset) + i as u64) * element_size;
            target.write_mapped(at, &bytes[i * stride..(i + 1) * stride])?;
        }
        Ok(())
    }

    fn mark_pending(&self, ctx: &RenderContext, companion: &mut Companion) {
        if !companion.pending {
            companion.pending = true;
            ctx.uploads().register(DirtyEntry {
                buffer: self.clone(),
                companion: companion.resource.id(),
            });
        }
    }

    fn create_companion(&self, ctx: &RenderContext, size: u64) -> RenderResult<SharedResource> {
        let desc = ResourceDesc::buffer(
            format!("{} (staging)", self.inner.desc.label),
            HeapKind::Upload,
            self.inner.desc.content,
            size,
        );
        ctx.device().create_resource(&desc)
    }

    /// The companion scalar writes go to, replacing one a copy may still read.
    fn scalar_companion(&self, ctx: &RenderContext, state: &mut StagingState) -> RenderResult<usize> {
        if let Some(companion) = state.companions.first() {
            if companion.pending || companion.busy_until <= ctx.completed_fence() {
                return Ok(0);
            }
            let stale = state.companions.remove(0);
            log::trace!("{}: staging {} still in flight, rotating", self.label(), stale.resource.id());
            ctx.defer_release(stale.resource);
        }
        let size = self.inner.element_size * u64::from(self.inner.desc.count);
        let resource = self.create_companion(ctx, size)?;
        state.companions.push(Companion {
            resource,
            array_slice: 0,
            pending: false,
            busy_until: 0,
        });
        Ok(0)
    }

    /// A free companion for one texture array slice.
    fn slice_companion(&self, ctx: &RenderContext, state: &mut StagingState, array_slice: u32) -> RenderResult<usize> {
        let limit = ctx.config().texture_staging_limit;
        if state.companions.iter().filter(|c| c.pending).count() >= limit {
            return Err(RenderError::StagingPoolExhausted { limit });
        }
        let completed = ctx.completed_fence();
        if let Some(idx) = state
            .companions
            .iter()
            .position(|c| !c.pending && c.busy_until <= completed)
        {
            state.companions[idx].array_slice = array_slice;
            return Ok(idx);
        }
        while state.companions.len() >= limit {
            let Some(idx) = state.companions.iter().position(|c| !c.pending) else {
                break;
            };
            let stale = state.companions.swap_remove(idx);
            ctx.defer_release(stale.resource);
        }
        let size = self.slice_size().unwrap_or(0);
        let resource = self.create_companion(ctx, size)?;
        state.companions.push(Companion {
            resource,
            array_slice,
            pending: false,
            busy_until: 0,
        });
        Ok(state.companions.len() - 1)
    }

    /// Records the copy of one pending companion. Returns `false` if the
    /// buffer was retired before the copy pass reached it.
    fn record_upload(
        &self,
        ctx: &RenderContext,
        recorder: &mut dyn CommandRecorder,
        companion: ResourceId,
        target_fence: u64,
    ) -> RenderResult<bool> {
        let mut state = lock(&self.inner.state);
        let Some(idx) = state.companions.iter().position(|c| c.resource.id() == companion) else {
            if self.is_retired() {
                return Ok(false);
            }
            return Err(RenderError::usage(format!(
                "{}: staging {companion} vanished before its copy",
                self.label()
            )));
        };
        let src = state.companions[idx].resource.clone();
        let dst = self.inner.resource.as_ref();

        recorder.transition(src.as_ref(), ResourceState::GenericRead, ResourceState::CopySource);
        recorder.transition(dst, ResourceState::GenericRead, ResourceState::CopyDest);
        match &self.inner.layout {
            Some(layout) => {
                let array_slice = state.companions[idx].array_slice;
                for footprint in &layout.footprints {
                    recorder.copy_buffer_to_texture(
                        dst,
                        TextureSubresource {
                            mip_level: footprint.mip_level,
                            array_slice,
                        },
                        src.as_ref(),
                        footprint,
                    )?;
                }
            }
            None => {
                let size = self.byte_size();
                let dirty = std::mem::take(&mut state.dirty);
                match dirty.as_slice() {
                    [] => recorder.copy_resource(dst, src.as_ref())?,
                    [whole] if whole.start == 0 && whole.end >= size => recorder.copy_resource(dst, src.as_ref())?,
                    ranges => {
                        // Bytes between ranges are stale in the companion.
                        for range in ranges {
                            recorder.copy_buffer_region(
                                dst,
                                range.start,
                                src.as_ref(),
                                range.start,
                                range.end - range.start,
                            )?;
                        }
                    }
                }
            }
        }
        recorder.transition(dst, ResourceState::CopyDest, ResourceState::GenericRead);
        recorder.transition(src.as_ref(), ResourceState::CopySource, ResourceState::GenericRead);

        let entry = &mut state.companions[idx];
        entry.pending = false;
        entry.busy_until = target_fence;
        if self.inner.desc.policy == StagingPolicy::Transient {
            let done = state.companions.swap_remove(idx);
            ctx.defer_release(done.resource);
        }
        Ok(true)
    }
}

/// Inserts `written` into `ranges`, coalescing only overlapping or touching ranges.
fn merge_dirty(ranges: &mut Vec<Range<u64>>, written: Range<u64>) {
    let mut merged = written;
    ranges.retain(|range| {
        if range.start <= merged.end && merged.start <= range.end {
            merged = merged.start.min(range.start)..merged.end.max(range.end);
            false
        } else {
            true
        }
    });
    let at = ranges.partition_point(|range| range.start < merged.start);
    ranges.insert(at, merged);
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── dirty ranges ──────────────────────────────────────────────────────

    #[test]
    fn separate_writes_stay_separate() {
        let mut ranges = Vec::new();
        merge_dirty(&mut ranges, 12..16);
        merge_dirty(&mut ranges, 0..4);
        assert_eq!(ranges, [0..4, 12..16]);
    }

    #[test]
    fn touching_and_overlapping_writes_coalesce() {
        let mut ranges = vec![0..4, 12..16];
        merge_dirty(&mut ranges, 4..8);
        assert_eq!(ranges, [0..8, 12..16]);
        merge_dirty(&mut ranges, 20..24);
        merge_dirty(&mut ranges, 6..21);
        assert_eq!(ranges, [0..24]);
    }
}
