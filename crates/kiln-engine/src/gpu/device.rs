use std::time::Duration;

use crate::descriptor::{CpuDescriptor, DescriptorPool, DescriptorRange, ViewDesc};
use crate::error::RenderResult;
use crate::gpu::resource::{GpuResource, ResourceDesc, SharedResource};

/// Minimum alignment of a constant buffer element.
pub const CONSTANT_BUFFER_ALIGNMENT: u64 = 256;

/// Resource and descriptor factory of a backend.
pub trait GpuDevice: Send + Sync {
    fn create_resource(&self, desc: &ResourceDesc) -> RenderResult<SharedResource>;

    /// Base addresses and stride of the descriptor table backing `pool`.
    fn descriptor_range(&self, pool: DescriptorPool, capacity: u16) -> RenderResult<DescriptorRange>;

    /// Writes a view of `resource` into the descriptor at `slot`.
    fn write_descriptor(
        &self,
        slot: CpuDescriptor,
        resource: Option<&dyn GpuResource>,
        view: &ViewDesc,
    ) -> RenderResult<()>;

    /// Drops whatever the descriptor at `slot` refers to.
    fn clear_descriptor(&self, slot: CpuDescriptor) -> RenderResult<()>;

    fn constant_alignment(&self) -> u64 {
        CONSTANT_BUFFER_ALIGNMENT
    }
}

/// The queue-side fence: a monotonically increasing value signaled by the GPU.
pub trait Timeline: Send + Sync {
    /// Enqueues a signal of `value` after all work submitted so far.
    fn signal(&self, value: u64) -> RenderResult<()>;

    /// Last value the GPU has reached. Never decreases.
    fn completed_value(&self) -> u64;

    /// Blocks until `completed_value() >= value`.
    ///
    /// Returns [`RenderError::FenceTimeout`](crate::error::RenderError::FenceTimeout)
    /// once `timeout` elapses.
    fn wait_for(&self, value: u64, timeout: Duration) -> RenderResult<()>;
}
