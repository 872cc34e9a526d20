//! Backend-neutral GPU vocabulary.
//!
//! This module defines what the pipeline needs from a graphics API:
//! - resources with a heap kind and a content kind
//! - a command recorder for barriers and copies
//! - a device that creates resources and writes descriptors
//! - a timeline fence the queue signals

mod command;
mod device;
mod resource;
pub mod texture;

pub use command::{CommandRecorder, TextureSubresource};
pub use device::{CONSTANT_BUFFER_ALIGNMENT, GpuDevice, Timeline};
pub use resource::{
    ContentKind, GpuResource, HeapKind, ResourceDesc, ResourceId, ResourceShape, ResourceState,
    SharedResource,
};
pub use texture::{CompressionMode, SliceLayout, SubresourceFootprint, TextureFormat, TextureInfo};
