use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::backend::wgpu::resource::WgpuResource;
use crate::descriptor::{CpuDescriptor, DescriptorPool, DescriptorRange, ViewDesc};
use crate::error::{RenderError, RenderResult};
use crate::gpu::{GpuDevice, GpuResource, ResourceDesc, ResourceId, ResourceShape, SharedResource};
use crate::sync::lock;

const DESCRIPTOR_INCREMENT: u64 = 64;

/// What a descriptor slot resolves to on wgpu.
///
/// wgpu has no descriptor heaps; slots are table entries that bind groups
/// are built from.
#[derive(Debug, Clone)]
pub enum WgpuView {
    Constant {
        resource: ResourceId,
        buffer: wgpu::Buffer,
        offset: u64,
        size: u64,
    },
    Texture {
        resource: ResourceId,
        view: wgpu::TextureView,
    },
    Null,
}

/// Resource and descriptor factory over a wgpu device.
pub struct WgpuDevice {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    next_id: AtomicU64,
    constant_alignment: u64,
    views: Mutex<HashMap<u64, WgpuView>>,
}

impl WgpuDevice {
    pub(crate) fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        let constant_alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment).max(1);
        Self {
            device,
            queue,
            next_id: AtomicU64::new(0),
            constant_alignment,
            views: Mutex::new(HashMap::new()),
        }
    }

    pub fn raw(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The view last written at `slot`.
    pub fn view(&self, slot: CpuDescriptor) -> Option<WgpuView> {
        lock(&self.views).get(&slot.0).cloned()
    }
}

impl GpuDevice for WgpuDevice {
    fn create_resource(&self, desc: &ResourceDesc) -> RenderResult<SharedResource> {
        if let ResourceShape::Texture(info) = &desc.shape {
            info.validate()?;
        }
        if desc.buffer_size() == Some(0) {
            return Err(RenderError::device(format!("{}: zero-sized buffer", desc.label)));
        }
        let id = ResourceId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        let resource = WgpuResource::create(id, desc.clone(), Arc::clone(&self.device), Arc::clone(&self.queue))?;
        Ok(Arc::new(resource))
    }

    fn descriptor_range(&self, pool: DescriptorPool, _capacity: u16) -> RenderResult<DescriptorRange> {
        let cpu_base = (pool as u64 + 1) << 40;
        Ok(DescriptorRange {
            cpu_base,
            gpu_base: (pool == DescriptorPool::ShaderVisible).then_some(cpu_base),
            increment: DESCRIPTOR_INCREMENT,
        })
    }

    fn write_descriptor(
        &self,
        slot: CpuDescriptor,
        resource: Option<&dyn GpuResource>,
        view: &ViewDesc,
    ) -> RenderResult<()> {
        let entry = match (view, resource) {
            (_, None) => WgpuView::Null,
            (ViewDesc::Constant { offset, size }, Some(resource)) => {
                if offset % self.constant_alignment != 0 {
                    return Err(RenderError::device(format!(
                        "constant view offset {offset} is not {}-byte aligned",
                        self.constant_alignment
                    )));
                }
                let wgpu_resource = WgpuResource::downcast(resource)?;
                WgpuView::Constant {
                    resource: resource.id(),
                    buffer: wgpu_resource.buffer()?.clone(),
                    offset: *offset,
                    size: *size,
                }
            }
            (ViewDesc::UnorderedAccess, Some(resource)) if resource.desc().buffer_size().is_some() => {
                return Err(RenderError::device(format!(
                    "{}: buffer storage views are not supported on wgpu",
                    resource.desc().label
                )));
            }
            (_, Some(resource)) => {
                let texture = WgpuResource::downcast(resource)?.texture()?;
                WgpuView::Texture {
                    resource: resource.id(),
                    view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
                }
            }
        };
        lock(&self.views).insert(slot.0, entry);
        Ok(())
    }

    fn clear_descriptor(&self, slot: CpuDescriptor) -> RenderResult<()> {
        lock(&self.views).remove(&slot.0);
        Ok(())
    }

    fn constant_alignment(&self) -> u64 {
        self.constant_alignment
    }
}
