use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::backend::soft::{SoftBackend, SoftInit};
use crate::backend::wgpu::{WgpuBackend, WgpuTarget};
use crate::config::RendererConfig;
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::gpu::CommandRecorder;

/// Extra recording a worker performs after its built-in duties.
///
/// Called with the worker index. Worker 0's list is submitted first and
/// already holds the frame's staging copies.
pub type FrameHook = Arc<dyn Fn(usize, &RenderContext, &mut dyn CommandRecorder) -> RenderResult<()> + Send + Sync>;

/// The per-frame duties a graphics backend performs for the frame driver.
///
/// `pioneer` runs on the committing thread before the workers start,
/// `worker(i)` runs on worker thread `i`, and `assembler` runs once all
/// workers reached the frame barrier.
pub trait Backend: Send + Sync {
    fn context(&self) -> &RenderContext;

    fn worker_count(&self) -> usize;

    /// Pre-frame maintenance: pending resizes, backbuffer acquisition.
    fn pioneer(&self) -> RenderResult<()>;

    /// Records worker `index`'s command list for the current frame.
    fn worker(&self, index: usize) -> RenderResult<()>;

    /// Releases garbage, submits the recorded lists in worker order, presents
    /// and advances the fence.
    fn assembler(&self) -> RenderResult<()>;

    /// Requests new backbuffer dimensions, applied by the next `pioneer`.
    fn request_resize(&self, width: u32, height: u32);

    fn set_frame_hook(&self, hook: Option<FrameHook>);

    /// Waits for the GPU to finish all submitted work.
    fn shutdown(&self) -> RenderResult<()>;
}

/// Which backend [`create_backend`] builds.
pub enum BackendKind {
    Soft(SoftInit),
    Wgpu(WgpuTarget),
}

static BACKEND_ACTIVE: AtomicBool = AtomicBool::new(false);

struct ActiveGuard;

impl ActiveGuard {
    fn acquire() -> RenderResult<Self> {
        BACKEND_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ActiveGuard)
            .map_err(|_| RenderError::BackendAlreadyActive)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        BACKEND_ACTIVE.store(false, Ordering::Release);
    }
}

/// A backend that holds the process-wide backend slot until dropped.
struct Exclusive {
    inner: Box<dyn Backend>,
    _guard: ActiveGuard,
}

impl Backend for Exclusive {
    fn context(&self) -> &RenderContext {
        self.inner.context()
    }

    fn worker_count(&self) -> usize {
        self.inner.worker_count()
    }

    fn pioneer(&self) -> RenderResult<()> {
        self.inner.pioneer()
    }

    fn worker(&self, index: usize) -> RenderResult<()> {
        self.inner.worker(index)
    }

    fn assembler(&self) -> RenderResult<()> {
        self.inner.assembler()
    }

    fn request_resize(&self, width: u32, height: u32) {
        self.inner.request_resize(width, height);
    }

    fn set_frame_hook(&self, hook: Option<FrameHook>) {
        self.inner.set_frame_hook(hook);
    }

    fn shutdown(&self) -> RenderResult<()> {
        self.inner.shutdown()
    }
}

/// Builds the selected backend.
///
/// Only one backend may be alive per process; a second call before the first
/// backend is dropped fails with [`RenderError::BackendAlreadyActive`].
pub fn create_backend(kind: BackendKind, config: RendererConfig) -> RenderResult<Arc<dyn Backend>> {
    let guard = ActiveGuard::acquire()?;
    let inner: Box<dyn Backend> = match kind {
        BackendKind::Soft(init) => {
            log::info!("starting software backend ({}x{})", init.width, init.height);
            Box::new(SoftBackend::new(init, config)?)
        }
        BackendKind::Wgpu(target) => {
            log::info!("starting wgpu backend");
            Box::new(pollster::block_on(WgpuBackend::new(target, config))?)
        }
    };
    Ok(Arc::new(Exclusive { inner, _guard: guard }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_backend_is_refused_until_the_first_is_dropped() {
        let config = RendererConfig::default().with_workers(1);
        let first = create_backend(BackendKind::Soft(SoftInit::headless(8, 8)), config.clone()).unwrap();
        let second = create_backend(BackendKind::Soft(SoftInit::headless(8, 8)), config.clone());
        assert!(matches!(second, Err(RenderError::BackendAlreadyActive)));

        drop(first);
        let again = create_backend(BackendKind::Soft(SoftInit::headless(8, 8)), config);
        assert!(again.is_ok());
    }
}
