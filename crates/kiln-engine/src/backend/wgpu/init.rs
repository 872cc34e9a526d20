use std::sync::Arc;

use winit::window::Window;

/// Surface and device knobs of the wgpu backend.
///
/// Frame pacing, worker count and clear color come from
/// [`RendererConfig`](crate::config::RendererConfig) instead.
#[derive(Debug, Clone)]
pub struct WgpuInit {
    /// Pick the sRGB variant of the backbuffer format if the surface offers it.
    pub prefer_srgb: bool,

    /// FIFO paces `commit()` to the display refresh.
    pub present_mode: wgpu::PresentMode,

    /// Falls back to the surface's first supported mode.
    pub alpha_mode: Option<wgpu::CompositeAlphaMode>,

    pub required_features: wgpu::Features,
    pub required_limits: wgpu::Limits,

    /// Swapchain latency hint; the fence already bounds frames in flight.
    pub desired_maximum_frame_latency: u32,
}

impl Default for WgpuInit {
    fn default() -> Self {
        Self {
            prefer_srgb: false,
            present_mode: wgpu::PresentMode::Fifo,
            alpha_mode: None,
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::default(),
            desired_maximum_frame_latency: 2,
        }
    }
}

/// Window the wgpu backend presents to.
pub struct WgpuTarget {
    pub window: Arc<Window>,
    pub init: WgpuInit,
}

impl WgpuTarget {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            init: WgpuInit::default(),
        }
    }

    pub fn with_init(mut self, init: WgpuInit) -> Self {
        self.init = init;
        self
    }
}
