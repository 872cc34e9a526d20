//! kiln engine crate.
//!
//! A frame-synchronized GPU resource pipeline: fence pacing, descriptor
//! pools, staged buffers with deferred release, and a multi-threaded frame
//! driver over pluggable backends.

pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod frame;
pub mod gpu;
pub mod resources;
pub mod staging;
pub mod sync;

pub mod backend;
pub mod core;
pub mod logging;
pub mod time;
pub mod window;

pub use config::RendererConfig;
pub use context::RenderContext;
pub use error::{RenderError, RenderResult};
