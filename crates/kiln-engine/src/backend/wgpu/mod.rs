//! Windowed backend over wgpu.
//!
//! wgpu manages memory residency and barriers on its own, so this backend
//! maps the pipeline's vocabulary onto it loosely:
//! - upload memory keeps a CPU shadow and forwards writes with `write_buffer`
//! - readback memory is mapped on demand
//! - descriptor slots are entries of a device-side view table
//! - the timeline is driven by submission-done callbacks

mod backend;
mod device;
mod init;
mod recorder;
mod resource;
mod surface;
mod timeline;

pub use backend::WgpuBackend;
pub use device::{WgpuDevice, WgpuView};
pub use init::{WgpuInit, WgpuTarget};
pub use recorder::WgpuRecorder;
pub use resource::WgpuResource;
pub use timeline::WgpuTimeline;
