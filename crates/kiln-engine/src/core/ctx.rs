use winit::window::Window;

use crate::context::RenderContext;
use crate::frame::{Backend, FrameHook};
use crate::time::FrameTime;
use crate::window::RuntimeCtx;

/// Per-frame context passed to [`App::on_frame`](super::App::on_frame).
pub struct FrameCtx<'a> {
    pub window: &'a Window,
    pub backend: &'a dyn Backend,
    pub time: FrameTime,
    pub runtime: &'a mut RuntimeCtx,
}

impl FrameCtx<'_> {
    pub fn render(&self) -> &RenderContext {
        self.backend.context()
    }

    /// Returns the logical window size in logical pixels.
    pub fn logical_size(&self) -> (f32, f32) {
        let logical: winit::dpi::LogicalSize<f64> = self.window.inner_size().to_logical(self.window.scale_factor());
        (logical.width as f32, logical.height as f32)
    }

    /// Installs extra recording for every following frame's workers.
    pub fn set_frame_hook(&self, hook: Option<FrameHook>) {
        self.backend.set_frame_hook(hook);
    }
}
