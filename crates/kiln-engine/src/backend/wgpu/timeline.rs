use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{RenderError, RenderResult};
use crate::gpu::Timeline;

/// Fence emulation over wgpu's submission callbacks.
///
/// `signal(v)` registers a callback that raises the completed value to `v`
/// once everything submitted before it has finished. Callbacks only fire while
/// the device is polled, so reads poll.
pub struct WgpuTimeline {
    device: Arc<wgpu::Device>,
    queue: Arc<wgpu::Queue>,
    completed: Arc<AtomicU64>,
}

impl WgpuTimeline {
    pub(crate) fn new(device: Arc<wgpu::Device>, queue: Arc<wgpu::Queue>) -> Self {
        Self {
            device,
            queue,
            completed: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Timeline for WgpuTimeline {
    fn signal(&self, value: u64) -> RenderResult<()> {
        let completed = Arc::clone(&self.completed);
        self.queue.on_submitted_work_done(move || {
            completed.fetch_max(value, Ordering::AcqRel);
        });
        Ok(())
    }

    fn completed_value(&self) -> u64 {
        if let Err(err) = self.device.poll(wgpu::PollType::Poll) {
            log::warn!("device poll failed: {err}");
        }
        self.completed.load(Ordering::Acquire)
    }

    fn wait_for(&self, value: u64, timeout: Duration) -> RenderResult<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let completed = self.completed.load(Ordering::Acquire);
            if completed >= value {
                return Ok(());
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(RenderError::FenceTimeout {
                    value,
                    completed,
                    timeout,
                });
            }
            let wait = wgpu::PollType::Wait {
                submission_index: None,
                timeout: Some(remaining),
            };
            match self.device.poll(wait) {
                // Nothing in flight; the signal has not been submitted yet.
                Ok(status) if status.is_queue_empty() && self.completed.load(Ordering::Acquire) < value => {
                    thread::yield_now();
                }
                Ok(_) => {}
                Err(err) => return Err(poll_error(err, value, self.completed.load(Ordering::Acquire), timeout)),
            }
        }
    }
}

/// Maps a failed blocking poll onto the pipeline's errors.
fn poll_error(err: wgpu::PollError, value: u64, completed: u64, timeout: Duration) -> RenderError {
    match err {
        wgpu::PollError::Timeout => RenderError::FenceTimeout {
            value,
            completed,
            timeout,
        },
        other => RenderError::DeviceLost(format!("device poll failed: {other}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── poll errors ───────────────────────────────────────────────────────

    #[test]
    fn poll_timeout_becomes_fence_timeout() {
        let err = poll_error(wgpu::PollError::Timeout, 7, 5, Duration::from_millis(20));
        assert!(matches!(
            err,
            RenderError::FenceTimeout {
                value: 7,
                completed: 5,
                ..
            }
        ));
    }

    #[test]
    fn other_poll_failures_lose_the_device() {
        let err = poll_error(wgpu::PollError::WrongSubmissionIndex(3, 2), 7, 5, Duration::from_millis(20));
        assert!(matches!(err, RenderError::DeviceLost(_)));
    }
}
