use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::error::RenderResult;
use crate::gpu::texture::TextureInfo;

/// Memory heap a resource lives in.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum HeapKind {
    /// CPU-writable, GPU-readable staging memory.
    Upload,
    /// GPU-local memory; not CPU-visible.
    Local,
    /// GPU-writable, CPU-readable memory.
    Readback,
}

impl HeapKind {
    pub fn is_cpu_visible(self) -> bool {
        !matches!(self, HeapKind::Local)
    }
}

/// What a resource stores. Fixed for the lifetime of the resource.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ContentKind {
    Texture,
    Constant,
    Vertex,
}

/// Usage state a resource is transitioned between by barriers.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum ResourceState {
    GenericRead,
    CopySource,
    CopyDest,
    RenderTarget,
    Present,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct ResourceId(pub u64);

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Physical shape of a GPU allocation.
///
/// Textures only exist in GPU-local memory; CPU-visible texture data is a
/// linear buffer laid out with copyable footprints.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ResourceShape {
    Buffer { size: u64 },
    Texture(TextureInfo),
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResourceDesc {
    pub label: String,
    pub heap: HeapKind,
    pub content: ContentKind,
    pub shape: ResourceShape,
}

impl ResourceDesc {
    pub fn buffer(label: impl Into<String>, heap: HeapKind, content: ContentKind, size: u64) -> Self {
        Self {
            label: label.into(),
            heap,
            content,
            shape: ResourceShape::Buffer { size },
        }
    }

    pub fn texture(label: impl Into<String>, info: TextureInfo) -> Self {
        Self {
            label: label.into(),
            heap: HeapKind::Local,
            content: ContentKind::Texture,
            shape: ResourceShape::Texture(info),
        }
    }

    /// Byte size of a buffer resource; `None` for textures.
    pub fn buffer_size(&self) -> Option<u64> {
        match self.shape {
            ResourceShape::Buffer { size } => Some(size),
            ResourceShape::Texture(_) => None,
        }
    }
}

/// A device allocation. Dropping the last reference destroys it.
pub trait GpuResource: Send + Sync + fmt::Debug {
    fn id(&self) -> ResourceId;

    fn desc(&self) -> &ResourceDesc;

    /// Writes into CPU-visible memory. Upload heap only.
    fn write_mapped(&self, offset: u64, bytes: &[u8]) -> RenderResult<()>;

    /// Reads CPU-visible memory. Upload and readback heaps only.
    fn read_mapped(&self, offset: u64, out: &mut [u8]) -> RenderResult<()>;

    /// GPU virtual address, when the backend exposes one.
    fn gpu_address(&self) -> Option<u64>;

    fn as_any(&self) -> &dyn Any;
}

pub type SharedResource = Arc<dyn GpuResource>;
