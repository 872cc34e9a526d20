use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, Weak};

use crate::error::{RenderError, RenderResult};
use crate::gpu::{GpuResource, HeapKind, ResourceDesc, ResourceId, ResourceShape, ResourceState, TextureInfo};
use crate::sync::lock;

/// Memory of one simulated allocation.
///
/// Buffers are plain bytes. Textures store every subresource tightly packed,
/// in subresource-index order.
pub struct SoftResource {
    id: ResourceId,
    desc: ResourceDesc,
    memory: Mutex<Vec<u8>>,
    /// Byte offset of each texture subresource.
    subresources: Vec<u64>,
    state: Mutex<ResourceState>,
    this: Weak<SoftResource>,
}

impl SoftResource {
    pub(crate) fn new(id: ResourceId, desc: ResourceDesc, initial: ResourceState) -> Arc<Self> {
        let (size, subresources) = match &desc.shape {
            ResourceShape::Buffer { size } => (*size, Vec::new()),
            ResourceShape::Texture(info) => {
                let mut offsets = Vec::with_capacity((info.mip_count * info.array_count) as usize);
                let mut offset = 0;
                for _ in 0..info.array_count {
                    for mip in 0..info.mip_count {
                        offsets.push(offset);
                        offset += info.packed_mip_size(mip);
                    }
                }
                (offset, offsets)
            }
        };
        Arc::new_cyclic(|this| SoftResource {
            id,
            desc,
            memory: Mutex::new(vec![0; size as usize]),
            subresources,
            state: Mutex::new(initial),
            this: this.clone(),
        })
    }

    pub(crate) fn downcast(resource: &dyn GpuResource) -> RenderResult<&SoftResource> {
        resource
            .as_any()
            .downcast_ref::<SoftResource>()
            .ok_or_else(|| RenderError::device(format!("{} was not created by the software device", resource.id())))
    }

    pub(crate) fn weak(&self) -> Weak<SoftResource> {
        self.this.clone()
    }

    pub fn label(&self) -> &str {
        &self.desc.label
    }

    pub fn size(&self) -> u64 {
        lock(&self.memory).len() as u64
    }

    pub fn texture_info(&self) -> Option<&TextureInfo> {
        match &self.desc.shape {
            ResourceShape::Texture(info) => Some(info),
            ResourceShape::Buffer { .. } => None,
        }
    }

    pub fn state(&self) -> ResourceState {
        *lock(&self.state)
    }

    /// Copy of the raw memory, bypassing heap rules. Test and debug use only.
    pub fn snapshot(&self) -> Vec<u8> {
        lock(&self.memory).clone()
    }

    /// Moves the resource from `before` to `after`; a mismatch means the
    /// recorded barriers disagree with the actual state.
    pub(crate) fn apply_transition(&self, before: ResourceState, after: ResourceState) -> Result<(), String> {
        let mut state = lock(&self.state);
        if *state != before {
            return Err(format!(
                "barrier on {} {} expects {before:?} but resource is {:?}",
                self.id, self.desc.label, *state
            ));
        }
        *state = after;
        Ok(())
    }

    pub(crate) fn expect_state(&self, expected: ResourceState) -> Result<(), String> {
        let state = self.state();
        if state != expected {
            return Err(format!(
                "{} {} used as {expected:?} while in {state:?}",
                self.id, self.desc.label
            ));
        }
        Ok(())
    }

    /// Byte offset and packed size of a texture subresource.
    pub(crate) fn subresource_span(&self, mip: u32, array_slice: u32) -> Option<(u64, u64)> {
        let info = self.texture_info()?;
        if mip >= info.mip_count || array_slice >= info.array_count {
            return None;
        }
        let index = info.subresource_index(mip, array_slice) as usize;
        Some((self.subresources[index], info.packed_mip_size(mip)))
    }

    pub(crate) fn memory(&self) -> std::sync::MutexGuard<'_, Vec<u8>> {
        lock(&self.memory)
    }

    fn check_range(&self, offset: u64, len: usize) -> RenderResult<(usize, usize)> {
        let size = self.size();
        let end = offset.checked_add(len as u64).filter(|&end| end <= size);
        match end {
            Some(end) => Ok((offset as usize, end as usize)),
            None => Err(RenderError::usage(format!(
                "{} {}: access of {len} bytes at {offset} exceeds {size} bytes",
                self.id, self.desc.label
            ))),
        }
    }
}

impl fmt::Debug for SoftResource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SoftResource")
            .field("id", &self.id)
            .field("label", &self.desc.label)
            .field("heap", &self.desc.heap)
            .finish()
    }
}

impl GpuResource for SoftResource {
    fn id(&self) -> ResourceId {
        self.id
    }

    fn desc(&self) -> &ResourceDesc {
        &self.desc
    }

    fn write_mapped(&self, offset: u64, bytes: &[u8]) -> RenderResult<()> {
        if self.desc.heap != HeapKind::Upload {
            return Err(RenderError::usage(format!(
                "{}: only upload memory is CPU-writable",
                self.desc.label
            )));
        }
        let (start, end) = self.check_range(offset, bytes.len())?;
        lock(&self.memory)[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn read_mapped(&self, offset: u64, out: &mut [u8]) -> RenderResult<()> {
        if !self.desc.heap.is_cpu_visible() {
            return Err(RenderError::usage(format!(
                "{}: GPU-local memory is not CPU-visible",
                self.desc.label
            )));
        }
        let (start, end) = self.check_range(offset, out.len())?;
        out.copy_from_slice(&lock(&self.memory)[start..end]);
        Ok(())
    }

    fn gpu_address(&self) -> Option<u64> {
        match self.desc.shape {
            ResourceShape::Buffer { .. } => Some(self.id.0 << 32),
            ResourceShape::Texture(_) => None,
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
