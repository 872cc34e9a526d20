use std::fmt;

use crate::error::{RenderError, RenderResult};

/// The three descriptor pools.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DescriptorPool {
    ShaderVisible = 0,
    RenderTarget = 1,
    DepthStencil = 2,
}

impl fmt::Display for DescriptorPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            DescriptorPool::ShaderVisible => "shader-visible",
            DescriptorPool::RenderTarget => "render-target",
            DescriptorPool::DepthStencil => "depth-stencil",
        })
    }
}

/// What kind of view to write into a descriptor slot.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ViewDesc {
    /// Constant buffer view over `size` bytes starting at `offset`.
    Constant { offset: u64, size: u64 },
    ShaderResource,
    UnorderedAccess,
    RenderTarget,
    DepthStencil,
}

impl ViewDesc {
    pub fn pool(&self) -> DescriptorPool {
        match self {
            ViewDesc::Constant { .. } | ViewDesc::ShaderResource | ViewDesc::UnorderedAccess => {
                DescriptorPool::ShaderVisible
            }
            ViewDesc::RenderTarget => DescriptorPool::RenderTarget,
            ViewDesc::DepthStencil => DescriptorPool::DepthStencil,
        }
    }
}

/// CPU address of a descriptor, used to write and to bind render targets.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct CpuDescriptor(pub u64);

/// GPU address of a shader-visible descriptor.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct GpuDescriptor(pub u64);

/// Where a pool's descriptor table lives, as reported by the device.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct DescriptorRange {
    pub cpu_base: u64,
    /// Only shader-visible tables have a GPU base.
    pub gpu_base: Option<u64>,
    pub increment: u64,
}

/// A view slot: pool plus slot index.
///
/// At API boundaries the handle packs into a `u16`: the pool tag occupies the
/// two high bits and the slot index the low fourteen.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct ViewHandle {
    pub pool: DescriptorPool,
    pub index: u16,
}

impl ViewHandle {
    pub const INDEX_BITS: u32 = 14;
    pub const MAX_INDEX: u16 = (1 << Self::INDEX_BITS) - 1;

    pub fn pack(self) -> u16 {
        ((self.pool as u16) << Self::INDEX_BITS) | (self.index & Self::MAX_INDEX)
    }

    pub fn unpack(raw: u16) -> RenderResult<Self> {
        let pool = match raw >> Self::INDEX_BITS {
            0 => DescriptorPool::ShaderVisible,
            1 => DescriptorPool::RenderTarget,
            2 => DescriptorPool::DepthStencil,
            tag => return Err(RenderError::usage(format!("invalid descriptor pool tag {tag}"))),
        };
        Ok(Self {
            pool,
            index: raw & Self::MAX_INDEX,
        })
    }
}

impl fmt::Display for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.pool, self.index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_tag_lives_in_the_high_bits() {
        let handle = ViewHandle { pool: DescriptorPool::RenderTarget, index: 7 };
        assert_eq!(handle.pack(), 0x4007);
        let dsv = ViewHandle { pool: DescriptorPool::DepthStencil, index: ViewHandle::MAX_INDEX };
        assert_eq!(dsv.pack(), 0xbfff);
        assert_eq!(ViewHandle::unpack(0xbfff).unwrap(), dsv);
        assert_eq!(ViewHandle::unpack(0x4007).unwrap(), handle);
    }

    #[test]
    fn reserved_tag_is_rejected() {
        assert!(ViewHandle::unpack(0xc000).is_err());
    }
}
