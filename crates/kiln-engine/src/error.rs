use std::panic::Location;
use std::time::Duration;

use thiserror::Error;

use crate::descriptor::DescriptorPool;

/// Errors raised by the resource pipeline.
///
/// Every variant is unrecoverable at this layer: once CPU and GPU state have
/// diverged the frame loop cannot safely continue, so callers propagate these
/// up and shut the renderer down.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A device/API call failed (resource creation, device creation, submit).
    #[error("device error at {location}: {message}")]
    Device {
        message: String,
        location: &'static Location<'static>,
    },

    /// A descriptor pool has no free slot left.
    #[error("{pool} descriptor pool is full (capacity {capacity})")]
    DescriptorPoolExhausted { pool: DescriptorPool, capacity: u16 },

    /// Too many texture array slices were staged within one frame.
    #[error("texture staging pool is full ({limit} array slices already pending this frame)")]
    StagingPoolExhausted { limit: usize },

    /// A usage contract was violated by the caller.
    #[error("usage error: {0}")]
    Usage(String),

    /// A fence wait did not complete in time. Treated as device loss.
    #[error("fence wait for value {value} timed out after {timeout:?} (completed {completed})")]
    FenceTimeout {
        value: u64,
        completed: u64,
        timeout: Duration,
    },

    /// The device stopped executing work.
    #[error("device lost: {0}")]
    DeviceLost(String),

    /// A second backend was requested while one is still alive.
    #[error("a render backend is already active in this process")]
    BackendAlreadyActive,
}

impl RenderError {
    /// Builds a [`RenderError::Device`] stamped with the caller's file and line.
    #[track_caller]
    pub fn device(message: impl Into<String>) -> Self {
        Self::Device {
            message: message.into(),
            location: Location::caller(),
        }
    }

    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }
}

pub type RenderResult<T> = std::result::Result<T, RenderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_error_records_caller_location() {
        let err = RenderError::device("CreateCommittedResource failed");
        match &err {
            RenderError::Device { location, .. } => {
                assert!(location.file().ends_with("error.rs"));
                assert!(location.line() > 0);
            }
            other => panic!("unexpected variant: {other:?}"),
        }
        assert!(err.to_string().contains("CreateCommittedResource failed"));
    }

    #[test]
    fn exhaustion_message_names_pool() {
        let err = RenderError::DescriptorPoolExhausted {
            pool: DescriptorPool::RenderTarget,
            capacity: 16,
        };
        assert_eq!(err.to_string(), "render-target descriptor pool is full (capacity 16)");
    }
}
