use winit::event::WindowEvent;

use crate::context::RenderContext;

use super::ctx::FrameCtx;

/// Control directive returned by app callbacks.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AppControl {
    Continue,
    Exit,
}

/// Application contract driven by [`Runtime`](crate::window::Runtime).
pub trait App {
    /// Called once the renderer is up, before the first frame is committed.
    fn on_start(&mut self, ctx: &RenderContext) -> anyhow::Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Called for window events before the runtime handles them.
    fn on_window_event(&mut self, event: &WindowEvent) -> AppControl {
        let _ = event;
        AppControl::Continue
    }

    /// CPU side of one frame: write staged buffers, create or release
    /// resources. The runtime commits the frame when this returns.
    fn on_frame(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl;

    /// Called after the frame driver terminated and the GPU is idle.
    fn on_exit(&mut self) {}
}
