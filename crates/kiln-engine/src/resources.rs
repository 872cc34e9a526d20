use std::fmt;
use std::sync::Arc;

use crate::context::RenderContext;
use crate::descriptor::{ViewDesc, ViewHandle};
use crate::error::{RenderError, RenderResult};
use crate::gpu::{HeapKind, TextureInfo};
use crate::staging::{StagedBuffer, StagedBufferDesc};
use crate::sync::lock;

/// What a [`ResourceHandle`] refers to.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResourceKind {
    Mesh = 1,
    Texture = 2,
    PipelineState = 3,
    ConstantBuffer = 4,
}

impl ResourceKind {
    fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            1 => Some(ResourceKind::Mesh),
            2 => Some(ResourceKind::Texture),
            3 => Some(ResourceKind::PipelineState),
            4 => Some(ResourceKind::ConstantBuffer),
            _ => None,
        }
    }
}

/// 32-bit handle: kind tag in bits 28..32, table slot in the low 28 bits.
#[derive(Copy, Clone, Eq, PartialEq, Hash)]
pub struct ResourceHandle(u32);

impl ResourceHandle {
    pub const SLOT_BITS: u32 = 28;
    pub const MAX_SLOT: u32 = (1 << Self::SLOT_BITS) - 1;

    pub fn new(kind: ResourceKind, slot: u32) -> RenderResult<Self> {
        if slot > Self::MAX_SLOT {
            return Err(RenderError::usage(format!("resource slot {slot} out of range")));
        }
        Ok(Self(((kind as u32) << Self::SLOT_BITS) | slot))
    }

    pub fn from_raw(raw: u32) -> RenderResult<Self> {
        ResourceKind::from_tag(raw >> Self::SLOT_BITS)
            .map(|_| Self(raw))
            .ok_or_else(|| RenderError::usage(format!("invalid resource handle {raw:#010x}")))
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn kind(self) -> ResourceKind {
        // Every constructor validates the tag.
        ResourceKind::from_tag(self.0 >> Self::SLOT_BITS).unwrap_or(ResourceKind::Mesh)
    }

    pub fn slot(self) -> u32 {
        self.0 & Self::MAX_SLOT
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}({})", self.kind(), self.slot())
    }
}

#[derive(Debug)]
pub struct Mesh {
    pub vertices: StagedBuffer,
    pub indices: StagedBuffer,
    pub index_count: u32,
}

#[derive(Debug)]
pub struct Texture {
    pub image: StagedBuffer,
    pub view: ViewHandle,
}

#[derive(Debug)]
pub struct ConstantBuffer {
    pub buffer: StagedBuffer,
    /// One constant view per element.
    pub views: Vec<ViewHandle>,
}

/// Opaque pipeline-state description; building the pipeline is up to the caller.
#[derive(Debug, Clone, Default)]
pub struct PipelineStateDesc {
    pub label: String,
    pub vertex_shader: Vec<u8>,
    pub pixel_shader: Vec<u8>,
}

enum Entry {
    Mesh(Arc<Mesh>),
    Texture(Arc<Texture>),
    PipelineState(Arc<PipelineStateDesc>),
    ConstantBuffer(Arc<ConstantBuffer>),
}

impl Entry {
    fn kind(&self) -> ResourceKind {
        match self {
            Entry::Mesh(_) => ResourceKind::Mesh,
            Entry::Texture(_) => ResourceKind::Texture,
            Entry::PipelineState(_) => ResourceKind::PipelineState,
            Entry::ConstantBuffer(_) => ResourceKind::ConstantBuffer,
        }
    }
}

/// Slot table behind [`ResourceHandle`]s. Freed slots are reused.
#[derive(Default)]
pub struct ResourceTable {
    slots: Vec<Option<Entry>>,
    free: Vec<u32>,
}

impl ResourceTable {
    fn insert(&mut self, entry: Entry) -> RenderResult<ResourceHandle> {
        let kind = entry.kind();
        let slot = match self.free.pop() {
            Some(slot) => {
                self.slots[slot as usize] = Some(entry);
                slot
            }
            None => {
                let slot = u32::try_from(self.slots.len()).unwrap_or(u32::MAX);
                let handle = ResourceHandle::new(kind, slot)?;
                self.slots.push(Some(entry));
                return Ok(handle);
            }
        };
        ResourceHandle::new(kind, slot)
    }

    fn get(&self, handle: ResourceHandle) -> RenderResult<&Entry> {
        self.slots
            .get(handle.slot() as usize)
            .and_then(Option::as_ref)
            .filter(|entry| entry.kind() == handle.kind())
            .ok_or_else(|| RenderError::usage(format!("stale resource handle {handle:?}")))
    }

    fn remove(&mut self, handle: ResourceHandle) -> RenderResult<Entry> {
        self.get(handle)?;
        let entry = self.slots[handle.slot() as usize]
            .take()
            .ok_or_else(|| RenderError::usage(format!("stale resource handle {handle:?}")))?;
        self.free.push(handle.slot());
        Ok(entry)
    }

    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RenderContext {
    /// Creates a GPU-local vertex/index buffer pair and stages its contents.
    pub fn create_mesh(
        &self,
        label: &str,
        vertex_stride: u32,
        vertices: &[u8],
        indices: &[u32],
    ) -> RenderResult<ResourceHandle> {
        if vertex_stride == 0 || vertices.len() % vertex_stride as usize != 0 {
            return Err(RenderError::usage(format!(
                "{label}: {} vertex bytes are not a multiple of stride {vertex_stride}",
                vertices.len()
            )));
        }
        let vertex_count = u32::try_from(vertices.len() / vertex_stride as usize)
            .map_err(|_| RenderError::usage(format!("{label}: too many vertices")))?;
        let index_count =
            u32::try_from(indices.len()).map_err(|_| RenderError::usage(format!("{label}: too many indices")))?;

        let vertex_buffer = StagedBuffer::new(
            self,
            StagedBufferDesc::vertex(format!("{label} vertices"), HeapKind::Local, vertex_stride, vertex_count),
        )?;
        vertex_buffer.write_scalar(self, vertices, 0, vertex_count)?;
        let index_buffer = StagedBuffer::new(
            self,
            StagedBufferDesc::vertex(format!("{label} indices"), HeapKind::Local, 4, index_count),
        )?;
        index_buffer.write_typed(self, indices, 0)?;

        let mesh = Mesh {
            vertices: vertex_buffer,
            indices: index_buffer,
            index_count,
        };
        lock(&self.resources).insert(Entry::Mesh(Arc::new(mesh)))
    }

    /// Creates a GPU-local texture with a shader-resource view. Contents are
    /// written through [`StagedBuffer::write_texture`] on the returned image.
    pub fn create_texture(&self, label: &str, info: TextureInfo) -> RenderResult<ResourceHandle> {
        let image = StagedBuffer::new(self, StagedBufferDesc::texture(label, HeapKind::Local, info))?;
        let view = match self.create_view(Some(image.resource().as_ref()), &ViewDesc::ShaderResource) {
            Ok(view) => view,
            Err(err) => {
                image.retire(self);
                return Err(err);
            }
        };
        lock(&self.resources).insert(Entry::Texture(Arc::new(Texture { image, view })))
    }

    /// Creates `count` constant elements of `stride` bytes, each with its own view.
    pub fn create_constant_buffer(&self, label: &str, stride: u32, count: u32) -> RenderResult<ResourceHandle> {
        let buffer = StagedBuffer::new(self, StagedBufferDesc::constant(label, HeapKind::Local, stride, count))?;
        let mut views = Vec::with_capacity(count as usize);
        for index in 0..count {
            match self.create_view(Some(buffer.resource().as_ref()), &buffer.constant_view(index)) {
                Ok(view) => views.push(view),
                Err(err) => {
                    buffer.retire(self);
                    self.release_views(&views)?;
                    return Err(err);
                }
            }
        }
        lock(&self.resources).insert(Entry::ConstantBuffer(Arc::new(ConstantBuffer { buffer, views })))
    }

    pub fn create_pipeline_state(&self, desc: PipelineStateDesc) -> RenderResult<ResourceHandle> {
        log::debug!("registered pipeline state {}", desc.label);
        lock(&self.resources).insert(Entry::PipelineState(Arc::new(desc)))
    }

    /// Releases the views of `handle` and hands its GPU memory to the deferred
    /// release queue.
    pub fn release_resource(&self, handle: ResourceHandle) -> RenderResult<()> {
        let entry = lock(&self.resources).remove(handle)?;
        match entry {
            Entry::Mesh(mesh) => {
                mesh.vertices.retire(self);
                mesh.indices.retire(self);
            }
            Entry::Texture(texture) => {
                texture.image.retire(self);
                self.release_views(&[texture.view])?;
            }
            Entry::ConstantBuffer(constants) => {
                constants.buffer.retire(self);
                self.release_views(&constants.views)?;
            }
            Entry::PipelineState(_) => {}
        }
        log::debug!("released {handle:?}");
        Ok(())
    }

    /// Releases every view in `views`, returning the first failure.
    fn release_views(&self, views: &[ViewHandle]) -> RenderResult<()> {
        let mut first = None;
        for &view in views {
            if let Err(err) = self.release_view(view) {
                log::warn!("failed to release {view}: {err}");
                first.get_or_insert(err);
            }
        }
        first.map_or(Ok(()), Err)
    }

    pub fn mesh(&self, handle: ResourceHandle) -> RenderResult<Arc<Mesh>> {
        match lock(&self.resources).get(handle)? {
            Entry::Mesh(mesh) => Ok(mesh.clone()),
            _ => Err(wrong_kind(handle, ResourceKind::Mesh)),
        }
    }

    pub fn texture(&self, handle: ResourceHandle) -> RenderResult<Arc<Texture>> {
        match lock(&self.resources).get(handle)? {
            Entry::Texture(texture) => Ok(texture.clone()),
            _ => Err(wrong_kind(handle, ResourceKind::Texture)),
        }
    }

    pub fn constant_buffer(&self, handle: ResourceHandle) -> RenderResult<Arc<ConstantBuffer>> {
        match lock(&self.resources).get(handle)? {
            Entry::ConstantBuffer(constants) => Ok(constants.clone()),
            _ => Err(wrong_kind(handle, ResourceKind::ConstantBuffer)),
        }
    }

    pub fn pipeline_state(&self, handle: ResourceHandle) -> RenderResult<Arc<PipelineStateDesc>> {
        match lock(&self.resources).get(handle)? {
            Entry::PipelineState(desc) => Ok(desc.clone()),
            _ => Err(wrong_kind(handle, ResourceKind::PipelineState)),
        }
    }

    pub fn resource_count(&self) -> usize {
        lock(&self.resources).len()
    }
}

fn wrong_kind(handle: ResourceHandle, expected: ResourceKind) -> RenderError {
    RenderError::usage(format!("{handle:?} is not a {expected:?}"))
}
