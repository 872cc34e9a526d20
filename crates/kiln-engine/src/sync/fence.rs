use std::sync::Arc;
use std::time::Duration;

use crate::error::{RenderError, RenderResult};
use crate::gpu::Timeline;

/// Paces the CPU against the GPU with a monotonically increasing fence.
///
/// Frame `k` occupies frame-array slot `k % N` and signals fence value `k + 1`
/// when submitted. A slot is handed out again only after the value signaled
/// for it N frames earlier has completed.
pub struct FenceSync {
    timeline: Arc<dyn Timeline>,
    frame_index: u64,
    /// Fence value that must complete before each slot may be reused. 0 = never used.
    slot_fences: Vec<u64>,
    completed: u64,
    timeout: Duration,
}

impl FenceSync {
    pub fn new(timeline: Arc<dyn Timeline>, frames_in_flight: usize, timeout: Duration) -> RenderResult<Self> {
        if frames_in_flight == 0 {
            return Err(RenderError::usage("frames in flight must be at least 1"));
        }
        Ok(Self {
            timeline,
            frame_index: 0,
            slot_fences: vec![0; frames_in_flight],
            completed: 0,
            timeout,
        })
    }

    pub fn frames_in_flight(&self) -> usize {
        self.slot_fences.len()
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn frame_array_index(&self) -> usize {
        (self.frame_index % self.slot_fences.len() as u64) as usize
    }

    /// Fence value the frame currently being recorded will signal.
    pub fn target_fence(&self) -> u64 {
        self.frame_index + 1
    }

    /// Last completed fence value observed by this CPU-side tracker.
    pub fn completed_fence(&self) -> u64 {
        self.completed
    }

    /// Re-reads the GPU's completed value.
    pub fn refresh(&mut self) -> u64 {
        self.completed = self.completed.max(self.timeline.completed_value());
        self.completed
    }

    /// Ends the current frame: signals its fence, advances the frame index and
    /// waits until the next frame-array slot is free again.
    ///
    /// Must be called after the frame's command lists were submitted.
    pub fn next_frame(&mut self) -> RenderResult<()> {
        let slot = self.frame_array_index();
        let target = self.target_fence();
        self.timeline.signal(target)?;
        self.slot_fences[slot] = target;
        self.frame_index += 1;

        let reuse_fence = self.slot_fences[self.frame_array_index()];
        self.wait(reuse_fence)?;
        log::trace!(
            "frame {} -> slot {} (waited for fence {reuse_fence}, completed {})",
            self.frame_index,
            self.frame_array_index(),
            self.completed
        );
        Ok(())
    }

    /// Blocks until every frame submitted so far has completed on the GPU.
    pub fn flush_queue(&mut self) -> RenderResult<()> {
        let last_signaled = self.frame_index;
        self.wait(last_signaled)
    }

    fn wait(&mut self, value: u64) -> RenderResult<()> {
        if value > 0 && self.refresh() < value {
            if let Err(err) = self.timeline.wait_for(value, self.timeout) {
                log::error!("fence wait for {value} failed: {err}");
                return Err(err);
            }
        }
        self.refresh();
        Ok(())
    }
}
