//! Backend implementations of the GPU vocabulary in [`crate::gpu`].

pub mod soft;
pub mod wgpu;
