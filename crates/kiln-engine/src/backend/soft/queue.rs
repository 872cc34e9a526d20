use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::backend::soft::recorder::SoftCommandList;
use crate::error::{RenderError, RenderResult};
use crate::gpu::Timeline;
use crate::sync::lock;

enum QueueOp {
    Execute(Vec<SoftCommandList>),
    Signal(u64),
    Shutdown,
}

#[derive(Default)]
struct QueueShared {
    completed: Mutex<u64>,
    completed_cond: Condvar,
    fault: Mutex<Option<String>>,
    stalled: Mutex<bool>,
    stall_cond: Condvar,
}

impl QueueShared {
    fn fault(&self) -> Option<String> {
        lock(&self.fault).clone()
    }

    fn wait_unstalled(&self) {
        let stalled = lock(&self.stalled);
        drop(
            self.stall_cond
                .wait_while(stalled, |stalled| *stalled)
                .unwrap_or_else(std::sync::PoisonError::into_inner),
        );
    }
}

/// The software GPU's command queue.
///
/// A dedicated thread executes submitted command lists and signals in
/// submission order, optionally sleeping `latency` per submission to
/// simulate GPU time.
pub struct SoftQueue {
    sender: Sender<QueueOp>,
    shared: Arc<QueueShared>,
    thread: Option<JoinHandle<()>>,
}

impl SoftQueue {
    pub fn new(latency: Duration) -> RenderResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let shared = Arc::new(QueueShared::default());
        let thread = thread::Builder::new()
            .name("kiln-soft-queue".to_string())
            .spawn({
                let shared = Arc::clone(&shared);
                move || run_queue(receiver, shared, latency)
            })
            .map_err(|err| RenderError::device(format!("failed to spawn the software queue: {err}")))?;
        Ok(Self {
            sender,
            shared,
            thread: Some(thread),
        })
    }

    /// Enqueues command lists for execution in the given order.
    pub fn submit(&self, lists: Vec<SoftCommandList>) -> RenderResult<()> {
        if let Some(fault) = self.shared.fault() {
            return Err(RenderError::DeviceLost(fault));
        }
        self.sender
            .send(QueueOp::Execute(lists))
            .map_err(|_| RenderError::DeviceLost("software queue stopped".into()))
    }

    pub fn timeline(&self) -> Arc<SoftTimeline> {
        Arc::new(SoftTimeline {
            sender: self.sender.clone(),
            shared: Arc::clone(&self.shared),
        })
    }

    /// Pauses or resumes execution, as if the GPU were hung.
    pub fn set_stalled(&self, stalled: bool) {
        *lock(&self.shared.stalled) = stalled;
        self.shared.stall_cond.notify_all();
    }

    /// First execution fault, if any. A faulted queue behaves like a lost device.
    pub fn fault(&self) -> Option<String> {
        self.shared.fault()
    }
}

impl Drop for SoftQueue {
    fn drop(&mut self) {
        self.set_stalled(false);
        let _ = self.sender.send(QueueOp::Shutdown);
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("software queue thread panicked");
            }
        }
    }
}

fn run_queue(receiver: Receiver<QueueOp>, shared: Arc<QueueShared>, latency: Duration) {
    for op in receiver {
        shared.wait_unstalled();
        match op {
            QueueOp::Execute(lists) => {
                if !latency.is_zero() {
                    thread::sleep(latency);
                }
                for command in lists.iter().flat_map(|list| list.commands.iter()) {
                    if let Err(fault) = command.execute() {
                        log::error!("software GPU fault: {fault}");
                        let mut slot = lock(&shared.fault);
                        if slot.is_none() {
                            *slot = Some(fault);
                        }
                    }
                }
            }
            QueueOp::Signal(value) => {
                let mut completed = lock(&shared.completed);
                *completed = (*completed).max(value);
                shared.completed_cond.notify_all();
            }
            QueueOp::Shutdown => break,
        }
    }
}

/// Fence of a [`SoftQueue`].
pub struct SoftTimeline {
    sender: Sender<QueueOp>,
    shared: Arc<QueueShared>,
}

impl Timeline for SoftTimeline {
    fn signal(&self, value: u64) -> RenderResult<()> {
        self.sender
            .send(QueueOp::Signal(value))
            .map_err(|_| RenderError::DeviceLost("software queue stopped".into()))
    }

    fn completed_value(&self) -> u64 {
        *lock(&self.shared.completed)
    }

    fn wait_for(&self, value: u64, timeout: Duration) -> RenderResult<()> {
        let completed = lock(&self.shared.completed);
        let (completed, result) = self
            .shared
            .completed_cond
            .wait_timeout_while(completed, timeout, |completed| *completed < value)
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if *completed >= value {
            return Ok(());
        }
        if let Some(fault) = self.shared.fault() {
            return Err(RenderError::DeviceLost(fault));
        }
        debug_assert!(result.timed_out());
        Err(RenderError::FenceTimeout {
            value,
            completed: *completed,
            timeout,
        })
    }
}
