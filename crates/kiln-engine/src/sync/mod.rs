//! CPU/GPU synchronization: fence pacing and fence-gated resource release.

mod fence;
mod release;

pub use fence::FenceSync;
pub use release::DeferredReleaseQueue;

#[cfg(test)]
pub(crate) use fence::tests::ManualTimeline;

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Locks `mutex`, recovering the data if another thread panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
