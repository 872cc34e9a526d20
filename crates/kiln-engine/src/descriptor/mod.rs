//! Fixed-capacity descriptor pools.
//!
//! Three independent pools back every view the renderer creates:
//! - shader-visible (constant / shader-resource / unordered-access views)
//! - render-target views
//! - depth-stencil views
//!
//! Each pool is a free list of slot indices, full at construction. Capacities
//! are sized up front and never grow; running out is a configuration bug.

mod handle;

pub use handle::{CpuDescriptor, DescriptorPool, DescriptorRange, GpuDescriptor, ViewDesc, ViewHandle};

use crate::error::{RenderError, RenderResult};
use crate::gpu::{GpuDevice, GpuResource};

/// Slot counts of the three pools.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DescriptorCapacities {
    pub shader_visible: u16,
    pub render_target: u16,
    pub depth_stencil: u16,
}

impl Default for DescriptorCapacities {
    fn default() -> Self {
        Self {
            shader_visible: 1024,
            render_target: 16,
            depth_stencil: 1,
        }
    }
}

impl DescriptorCapacities {
    pub fn get(&self, pool: DescriptorPool) -> u16 {
        match pool {
            DescriptorPool::ShaderVisible => self.shader_visible,
            DescriptorPool::RenderTarget => self.render_target,
            DescriptorPool::DepthStencil => self.depth_stencil,
        }
    }
}

struct SlotPool {
    kind: DescriptorPool,
    capacity: u16,
    range: DescriptorRange,
    free: Vec<u16>,
}

impl SlotPool {
    fn new(kind: DescriptorPool, capacity: u16, range: DescriptorRange) -> Self {
        // Reversed so that pops hand out ascending slots.
        let free = (0..capacity).rev().collect();
        Self {
            kind,
            capacity,
            range,
            free,
        }
    }

    fn pop(&mut self) -> RenderResult<u16> {
        self.free.pop().ok_or(RenderError::DescriptorPoolExhausted {
            pool: self.kind,
            capacity: self.capacity,
        })
    }

    fn check_index(&self, index: u16) -> RenderResult<()> {
        if index >= self.capacity {
            return Err(RenderError::usage(format!(
                "{} descriptor index {index} out of range (capacity {})",
                self.kind, self.capacity
            )));
        }
        Ok(())
    }
}

/// Allocator for the three descriptor pools.
pub struct DescriptorHeapManager {
    pools: [SlotPool; 3],
}

impl DescriptorHeapManager {
    pub fn new(device: &dyn GpuDevice, capacities: DescriptorCapacities) -> RenderResult<Self> {
        let make = |kind: DescriptorPool| -> RenderResult<SlotPool> {
            let capacity = capacities.get(kind);
            if capacity > ViewHandle::MAX_INDEX + 1 {
                return Err(RenderError::usage(format!(
                    "{kind} capacity {capacity} exceeds the {} slots a handle can address",
                    ViewHandle::MAX_INDEX + 1
                )));
            }
            let range = device.descriptor_range(kind, capacity)?;
            Ok(SlotPool::new(kind, capacity, range))
        };
        let pools = [
            make(DescriptorPool::ShaderVisible)?,
            make(DescriptorPool::RenderTarget)?,
            make(DescriptorPool::DepthStencil)?,
        ];
        log::debug!(
            "descriptor pools: {} shader-visible, {} render-target, {} depth-stencil",
            capacities.shader_visible,
            capacities.render_target,
            capacities.depth_stencil
        );
        Ok(Self { pools })
    }

    fn pool(&self, kind: DescriptorPool) -> &SlotPool {
        &self.pools[kind as usize]
    }

    fn pool_mut(&mut self, kind: DescriptorPool) -> &mut SlotPool {
        &mut self.pools[kind as usize]
    }

    /// Allocates a slot in the pool `view` belongs to and writes the descriptor.
    pub fn create_view(
        &mut self,
        device: &dyn GpuDevice,
        resource: Option<&dyn GpuResource>,
        view: &ViewDesc,
    ) -> RenderResult<ViewHandle> {
        let kind = view.pool();
        let index = self.pool_mut(kind).pop()?;
        let handle = ViewHandle { pool: kind, index };
        let slot = self.cpu_handle(handle)?;
        if let Err(err) = device.write_descriptor(slot, resource, view) {
            self.pool_mut(kind).free.push(index);
            return Err(err);
        }
        log::trace!("created {view:?} at {handle}");
        Ok(handle)
    }

    /// Clears the descriptor behind `handle` and returns its slot to the pool.
    ///
    /// Releasing a handle twice (or one that was never allocated) is a usage
    /// error; the free-list scan only runs in debug builds.
    pub fn release_view(&mut self, device: &dyn GpuDevice, handle: ViewHandle) -> RenderResult<()> {
        let slot = self.cpu_handle(handle)?;
        let pool = self.pool(handle.pool);
        if cfg!(debug_assertions) && pool.free.contains(&handle.index) {
            return Err(RenderError::usage(format!("{handle} released while not allocated")));
        }
        device.clear_descriptor(slot)?;
        self.pool_mut(handle.pool).free.push(handle.index);
        Ok(())
    }

    pub fn cpu_handle(&self, handle: ViewHandle) -> RenderResult<CpuDescriptor> {
        let pool = self.pool(handle.pool);
        pool.check_index(handle.index)?;
        Ok(CpuDescriptor(
            pool.range.cpu_base + pool.range.increment * u64::from(handle.index),
        ))
    }

    /// GPU-visible address of a shader-visible descriptor.
    pub fn gpu_handle(&self, handle: ViewHandle) -> RenderResult<GpuDescriptor> {
        let pool = self.pool(handle.pool);
        pool.check_index(handle.index)?;
        let Some(gpu_base) = pool.range.gpu_base else {
            return Err(RenderError::usage(format!(
                "{} descriptors have no GPU handle",
                handle.pool
            )));
        };
        Ok(GpuDescriptor(gpu_base + pool.range.increment * u64::from(handle.index)))
    }

    pub fn capacity(&self, kind: DescriptorPool) -> u16 {
        self.pool(kind).capacity
    }

    pub fn free_count(&self, kind: DescriptorPool) -> usize {
        self.pool(kind).free.len()
    }

    /// Free slots of `kind`, in free-list order (the next allocation is the last).
    pub fn free_slots(&self, kind: DescriptorPool) -> &[u16] {
        &self.pool(kind).free
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gpu::{ResourceDesc, SharedResource};
    use std::collections::BTreeSet;
    use std::sync::Mutex;

    /// Device that only serves descriptor ranges and records descriptor writes.
    #[derive(Default)]
    struct TableDevice {
        writes: Mutex<Vec<(CpuDescriptor, ViewDesc)>>,
        cleared: Mutex<Vec<CpuDescriptor>>,
        fail_writes: bool,
    }

    impl GpuDevice for TableDevice {
        fn create_resource(&self, _desc: &ResourceDesc) -> RenderResult<SharedResource> {
            Err(RenderError::device("not supported"))
        }

        fn descriptor_range(&self, pool: DescriptorPool, _capacity: u16) -> RenderResult<DescriptorRange> {
            let base = 0x1000 * (pool as u64 + 1);
            Ok(DescriptorRange {
                cpu_base: base,
                gpu_base: (pool == DescriptorPool::ShaderVisible).then_some(base + 0x10_0000),
                increment: 32,
            })
        }

        fn write_descriptor(
            &self,
            slot: CpuDescriptor,
            _resource: Option<&dyn GpuResource>,
            view: &ViewDesc,
        ) -> RenderResult<()> {
            if self.fail_writes {
                return Err(RenderError::device("descriptor write rejected"));
            }
            self.writes.lock().unwrap().push((slot, view.clone()));
            Ok(())
        }

        fn clear_descriptor(&self, slot: CpuDescriptor) -> RenderResult<()> {
            self.cleared.lock().unwrap().push(slot);
            Ok(())
        }
    }

    fn manager(device: &TableDevice, capacities: DescriptorCapacities) -> DescriptorHeapManager {
        DescriptorHeapManager::new(device, capacities).unwrap()
    }

    #[test]
    fn views_route_to_their_pool() {
        let device = TableDevice::default();
        let mut heaps = manager(&device, DescriptorCapacities::default());

        let srv = heaps.create_view(&device, None, &ViewDesc::ShaderResource).unwrap();
        let cbv = heaps
            .create_view(&device, None, &ViewDesc::Constant { offset: 0, size: 256 })
            .unwrap();
        let rtv = heaps.create_view(&device, None, &ViewDesc::RenderTarget).unwrap();
        let dsv = heaps.create_view(&device, None, &ViewDesc::DepthStencil).unwrap();

        assert_eq!(srv, ViewHandle { pool: DescriptorPool::ShaderVisible, index: 0 });
        assert_eq!(cbv, ViewHandle { pool: DescriptorPool::ShaderVisible, index: 1 });
        assert_eq!(rtv.pool, DescriptorPool::RenderTarget);
        assert_eq!(dsv.pool, DescriptorPool::DepthStencil);

        assert_eq!(heaps.cpu_handle(cbv).unwrap(), CpuDescriptor(0x1000 + 32));
        assert_eq!(heaps.gpu_handle(cbv).unwrap(), GpuDescriptor(0x10_1000 + 32));
        assert_eq!(heaps.cpu_handle(rtv).unwrap(), CpuDescriptor(0x2000));
        assert!(heaps.gpu_handle(rtv).is_err());
        assert!(heaps.gpu_handle(dsv).is_err());

        let writes = device.writes.lock().unwrap();
        assert_eq!(writes.len(), 4);
        assert_eq!(writes[1].0, CpuDescriptor(0x1020));
    }

    #[test]
    fn allocate_then_release_restores_free_list() {
        let device = TableDevice::default();
        let mut heaps = manager(&device, DescriptorCapacities::default());
        let before: BTreeSet<u16> = heaps.free_slots(DescriptorPool::ShaderVisible).iter().copied().collect();

        let handles: Vec<_> = (0..37)
            .map(|_| heaps.create_view(&device, None, &ViewDesc::ShaderResource).unwrap())
            .collect();
        assert_eq!(heaps.free_count(DescriptorPool::ShaderVisible), 1024 - 37);

        for handle in handles.into_iter().rev() {
            heaps.release_view(&device, handle).unwrap();
        }
        let after: BTreeSet<u16> = heaps.free_slots(DescriptorPool::ShaderVisible).iter().copied().collect();
        assert_eq!(before, after);
        assert_eq!(heaps.free_count(DescriptorPool::ShaderVisible), 1024);
    }

    #[test]
    fn released_views_are_cleared_on_the_device() {
        let device = TableDevice::default();
        let mut heaps = manager(&device, DescriptorCapacities::default());
        let srv = heaps.create_view(&device, None, &ViewDesc::ShaderResource).unwrap();
        let rtv = heaps.create_view(&device, None, &ViewDesc::RenderTarget).unwrap();

        heaps.release_view(&device, rtv).unwrap();
        assert_eq!(*device.cleared.lock().unwrap(), [CpuDescriptor(0x2000)]);
        heaps.release_view(&device, srv).unwrap();
        assert_eq!(device.cleared.lock().unwrap().len(), 2);

        // A rejected release leaves the device alone.
        assert!(heaps.release_view(&device, ViewHandle { pool: DescriptorPool::DepthStencil, index: 999 }).is_err());
        assert_eq!(device.cleared.lock().unwrap().len(), 2);
    }

    #[test]
    fn exhausted_pool_fails_without_touching_other_slots() {
        let device = TableDevice::default();
        let mut heaps = manager(
            &device,
            DescriptorCapacities {
                render_target: 2,
                ..Default::default()
            },
        );
        let a = heaps.create_view(&device, None, &ViewDesc::RenderTarget).unwrap();
        let b = heaps.create_view(&device, None, &ViewDesc::RenderTarget).unwrap();
        assert_ne!(a, b);

        let err = heaps.create_view(&device, None, &ViewDesc::RenderTarget).unwrap_err();
        assert!(matches!(
            err,
            RenderError::DescriptorPoolExhausted { pool: DescriptorPool::RenderTarget, capacity: 2 }
        ));
        assert_eq!(device.writes.lock().unwrap().len(), 2);
    }

    #[test]
    fn zero_capacity_shader_visible_pool_is_exhausted_immediately() {
        let device = TableDevice::default();
        let mut heaps = manager(
            &device,
            DescriptorCapacities {
                shader_visible: 0,
                ..Default::default()
            },
        );
        let err = heaps.create_view(&device, None, &ViewDesc::ShaderResource).unwrap_err();
        assert!(matches!(err, RenderError::DescriptorPoolExhausted { capacity: 0, .. }));
        assert!(device.writes.lock().unwrap().is_empty());
    }

    #[test]
    fn failed_descriptor_write_returns_the_slot() {
        let device = TableDevice {
            fail_writes: true,
            ..Default::default()
        };
        let mut heaps = manager(&device, DescriptorCapacities::default());
        assert!(heaps.create_view(&device, None, &ViewDesc::DepthStencil).is_err());
        assert_eq!(heaps.free_count(DescriptorPool::DepthStencil), 1);
    }

    #[test]
    fn out_of_range_handles_are_rejected() {
        let device = TableDevice::default();
        let mut heaps = manager(&device, DescriptorCapacities::default());
        let bogus = ViewHandle { pool: DescriptorPool::DepthStencil, index: 5 };
        assert!(heaps.cpu_handle(bogus).is_err());
        assert!(heaps.release_view(&device, bogus).is_err());
    }

    #[cfg(debug_assertions)]
    #[test]
    fn double_release_is_caught_in_debug_builds() {
        let device = TableDevice::default();
        let mut heaps = manager(&device, DescriptorCapacities::default());
        let handle = heaps.create_view(&device, None, &ViewDesc::ShaderResource).unwrap();
        heaps.release_view(&device, handle).unwrap();
        assert!(matches!(heaps.release_view(&device, handle), Err(RenderError::Usage(_))));
        let never_allocated = ViewHandle { pool: DescriptorPool::ShaderVisible, index: 9 };
        assert!(heaps.release_view(&device, never_allocated).is_err());
    }

    #[test]
    fn capacity_beyond_handle_range_is_rejected() {
        let device = TableDevice::default();
        let result = DescriptorHeapManager::new(
            &device,
            DescriptorCapacities {
                shader_visible: u16::MAX,
                ..Default::default()
            },
        );
        assert!(result.is_err());
    }
}
