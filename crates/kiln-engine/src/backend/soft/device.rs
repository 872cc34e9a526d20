use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::backend::soft::resource::SoftResource;
use crate::descriptor::{CpuDescriptor, DescriptorPool, DescriptorRange, ViewDesc};
use crate::error::{RenderError, RenderResult};
use crate::gpu::{
    CONSTANT_BUFFER_ALIGNMENT, GpuDevice, GpuResource, ResourceDesc, ResourceId, ResourceShape, ResourceState,
    SharedResource,
};
use crate::sync::lock;

const DESCRIPTOR_INCREMENT: u64 = 32;

/// A descriptor as the software device stores it.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct SoftDescriptor {
    pub resource: Option<ResourceId>,
    pub view: ViewDesc,
}

/// Resource and descriptor factory of the software GPU.
///
/// Keeps a registry of weak references so tests can observe when an
/// allocation is actually destroyed.
#[derive(Default)]
pub struct SoftDevice {
    next_id: AtomicU64,
    live: Mutex<HashMap<ResourceId, Weak<SoftResource>>>,
    ranges: Mutex<Vec<(DescriptorPool, u64, u16)>>,
    descriptors: Mutex<HashMap<u64, SoftDescriptor>>,
}

impl SoftDevice {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn create_soft(&self, desc: ResourceDesc, initial: ResourceState) -> RenderResult<Arc<SoftResource>> {
        if let ResourceShape::Texture(info) = &desc.shape {
            info.validate()?;
        }
        if desc.buffer_size() == Some(0) {
            return Err(RenderError::device(format!("{}: zero-sized buffer", desc.label)));
        }
        let id = ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let resource = SoftResource::new(id, desc, initial);
        let mut live = lock(&self.live);
        live.retain(|_, weak| weak.strong_count() > 0);
        live.insert(id, resource.weak());
        Ok(resource)
    }

    /// Whether the allocation `id` still exists.
    pub fn is_alive(&self, id: ResourceId) -> bool {
        lock(&self.live).get(&id).is_some_and(|weak| weak.strong_count() > 0)
    }

    pub fn live_count(&self) -> usize {
        lock(&self.live).values().filter(|weak| weak.strong_count() > 0).count()
    }

    /// The descriptor last written at `slot`.
    pub fn descriptor(&self, slot: CpuDescriptor) -> Option<SoftDescriptor> {
        lock(&self.descriptors).get(&slot.0).cloned()
    }

    fn pool_of(&self, slot: CpuDescriptor) -> Option<DescriptorPool> {
        lock(&self.ranges).iter().find_map(|&(pool, base, capacity)| {
            let end = base + DESCRIPTOR_INCREMENT * u64::from(capacity);
            (slot.0 >= base && slot.0 < end && (slot.0 - base) % DESCRIPTOR_INCREMENT == 0).then_some(pool)
        })
    }
}

impl GpuDevice for SoftDevice {
    fn create_resource(&self, desc: &ResourceDesc) -> RenderResult<SharedResource> {
        let resource: SharedResource = self.create_soft(desc.clone(), ResourceState::GenericRead)?;
        Ok(resource)
    }

    fn descriptor_range(&self, pool: DescriptorPool, capacity: u16) -> RenderResult<DescriptorRange> {
        let cpu_base = (pool as u64 + 1) << 40;
        lock(&self.ranges).push((pool, cpu_base, capacity));
        Ok(DescriptorRange {
            cpu_base,
            gpu_base: (pool == DescriptorPool::ShaderVisible).then_some(cpu_base | (1 << 48)),
            increment: DESCRIPTOR_INCREMENT,
        })
    }

    fn write_descriptor(
        &self,
        slot: CpuDescriptor,
        resource: Option<&dyn GpuResource>,
        view: &ViewDesc,
    ) -> RenderResult<()> {
        if self.pool_of(slot) != Some(view.pool()) {
            return Err(RenderError::device(format!(
                "descriptor {:#x} is not a {} slot",
                slot.0,
                view.pool()
            )));
        }
        match (view, resource) {
            (ViewDesc::Constant { offset, size }, Some(resource)) => {
                let buffer_size = resource.desc().buffer_size().unwrap_or(0);
                if offset % CONSTANT_BUFFER_ALIGNMENT != 0 || offset + size > buffer_size {
                    return Err(RenderError::device(format!(
                        "constant view {offset}+{size} invalid for {} ({buffer_size} bytes)",
                        resource.desc().label
                    )));
                }
            }
            (ViewDesc::RenderTarget | ViewDesc::DepthStencil, Some(resource)) => {
                if !matches!(resource.desc().shape, ResourceShape::Texture(_)) {
                    return Err(RenderError::device(format!(
                        "{}: render-target views need a texture",
                        resource.desc().label
                    )));
                }
            }
            _ => {}
        }
        lock(&self.descriptors).insert(
            slot.0,
            SoftDescriptor {
                resource: resource.map(|r| r.id()),
                view: view.clone(),
            },
        );
        Ok(())
    }

    fn clear_descriptor(&self, slot: CpuDescriptor) -> RenderResult<()> {
        if self.pool_of(slot).is_none() {
            return Err(RenderError::device(format!("descriptor {:#x} is outside every table", slot.0)));
        }
        lock(&self.descriptors).remove(&slot.0);
        Ok(())
    }
}
