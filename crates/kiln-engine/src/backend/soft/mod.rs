//! In-process software GPU.
//!
//! Executes command lists on a dedicated queue thread against CPU memory.
//! Recorded commands hold weak references, so destroying a resource the GPU
//! still has to read shows up as a fault instead of silently working, and
//! every barrier is checked against the resource's tracked state.

mod backend;
mod device;
mod queue;
mod recorder;
mod resource;

pub use backend::{SoftBackend, SoftInit};
pub use device::{SoftDescriptor, SoftDevice};
pub use queue::{SoftQueue, SoftTimeline};
pub use recorder::SoftCommandList;
pub use resource::SoftResource;
