//! Window + runtime loop.
//!
//! Owns the `winit` event loop and window and drives a [`FrameDriver`](crate::frame::FrameDriver)
//! over the wgpu backend.

mod runtime;

pub use runtime::{Runtime, RuntimeConfig, RuntimeCtx};
