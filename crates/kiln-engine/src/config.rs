use std::time::Duration;

use crate::descriptor::DescriptorCapacities;
use crate::gpu::TextureFormat;

/// Configuration of the frame pipeline, shared by every backend.
///
/// Keep this structure plain data. Backend-specific knobs live in the backend's
/// own init struct.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// Number of frame-array slots (swapchain length).
    pub frames_in_flight: usize,

    /// Number of command-recording worker threads.
    pub worker_count: usize,

    pub descriptors: DescriptorCapacities,

    /// How long a fence wait may block before the device is considered lost.
    pub fence_timeout: Duration,

    /// Maximum texture array slices staged per texture within one frame.
    pub texture_staging_limit: usize,

    /// Color the backbuffer is cleared to at the start of every frame.
    pub clear_color: [f32; 4],

    pub backbuffer_format: TextureFormat,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
            worker_count: default_worker_count(),
            descriptors: DescriptorCapacities::default(),
            fence_timeout: Duration::from_secs(10),
            texture_staging_limit: 4,
            clear_color: [0.2, 0.21, 0.2, 0.0],
            backbuffer_format: TextureFormat::Bgra8Unorm,
        }
    }
}

impl RendererConfig {
    pub fn with_workers(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }
}

/// Half the available hardware threads, clamped to `1..=8`.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get() / 2)
        .unwrap_or(1)
        .clamp(1, 8)
}
