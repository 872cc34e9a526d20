use std::sync::{Arc, Mutex, MutexGuard};

use crate::config::RendererConfig;
use crate::descriptor::{DescriptorHeapManager, ViewDesc, ViewHandle};
use crate::error::RenderResult;
use crate::gpu::{GpuDevice, GpuResource, SharedResource, Timeline};
use crate::resources::ResourceTable;
use crate::staging::UploadQueue;
use crate::sync::{DeferredReleaseQueue, FenceSync, lock};

/// Shared state of one renderer instance.
///
/// Owned by the backend and borrowed by everything that records, stages or
/// releases GPU work. Each piece sits behind its own mutex. Locks are never
/// nested, except that a staged buffer's own state may be held while one of
/// these is taken.
pub struct RenderContext {
    device: Arc<dyn GpuDevice>,
    fence: Mutex<FenceSync>,
    descriptors: Mutex<DescriptorHeapManager>,
    garbage: Mutex<DeferredReleaseQueue<SharedResource>>,
    uploads: UploadQueue,
    pub(crate) resources: Mutex<ResourceTable>,
    config: RendererConfig,
}

impl RenderContext {
    pub fn new(
        device: Arc<dyn GpuDevice>,
        timeline: Arc<dyn Timeline>,
        config: RendererConfig,
    ) -> RenderResult<Self> {
        let fence = FenceSync::new(timeline, config.frames_in_flight, config.fence_timeout)?;
        let descriptors = DescriptorHeapManager::new(device.as_ref(), config.descriptors)?;
        log::debug!(
            "render context: {} frames in flight, {} workers",
            config.frames_in_flight,
            config.worker_count
        );
        Ok(Self {
            device,
            fence: Mutex::new(fence),
            descriptors: Mutex::new(descriptors),
            garbage: Mutex::new(DeferredReleaseQueue::new()),
            uploads: UploadQueue::default(),
            resources: Mutex::new(ResourceTable::default()),
            config,
        })
    }

    pub fn device(&self) -> &dyn GpuDevice {
        self.device.as_ref()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn fence(&self) -> MutexGuard<'_, FenceSync> {
        lock(&self.fence)
    }

    pub fn descriptors(&self) -> MutexGuard<'_, DescriptorHeapManager> {
        lock(&self.descriptors)
    }

    pub fn uploads(&self) -> &UploadQueue {
        &self.uploads
    }

    pub fn frame_index(&self) -> u64 {
        self.fence().frame_index()
    }

    pub fn frame_array_index(&self) -> usize {
        self.fence().frame_array_index()
    }

    pub fn target_fence(&self) -> u64 {
        self.fence().target_fence()
    }

    /// Re-observes the GPU and returns the completed fence value.
    pub fn completed_fence(&self) -> u64 {
        self.fence().refresh()
    }

    pub fn create_view(&self, resource: Option<&dyn GpuResource>, view: &ViewDesc) -> RenderResult<ViewHandle> {
        self.descriptors().create_view(self.device(), resource, view)
    }

    pub fn release_view(&self, handle: ViewHandle) -> RenderResult<()> {
        self.descriptors().release_view(self.device(), handle)
    }

    /// Keeps `resource` alive until the frame being recorded has completed.
    pub fn defer_release(&self, resource: SharedResource) {
        let target = self.target_fence();
        lock(&self.garbage).enqueue_at(resource, target);
    }

    /// Drops every deferred resource whose fence has completed.
    pub fn release_garbage(&self) -> usize {
        let completed = self.completed_fence();
        lock(&self.garbage).release_garbage(completed)
    }

    pub fn pending_release_count(&self) -> usize {
        lock(&self.garbage).len()
    }

    /// Ends the frame on the CPU side. See [`FenceSync::next_frame`].
    pub fn next_frame(&self) -> RenderResult<()> {
        self.fence().next_frame()
    }

    pub fn flush_queue(&self) -> RenderResult<()> {
        self.fence().flush_queue()
    }
}
