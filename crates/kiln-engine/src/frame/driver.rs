use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread::{self, JoinHandle};

use crate::error::{RenderError, RenderResult};
use crate::frame::backend::Backend;
use crate::sync::lock;

/// Where the driver is in its frame cycle.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DriverState {
    /// Not launched, or terminated.
    Stopped,
    /// Waiting for the next `commit`.
    Idle,
    /// Workers are recording a frame.
    Computing,
}

struct Shared {
    backend: Arc<dyn Backend>,
    barrier: Barrier,
    active: AtomicBool,
    computing: AtomicBool,
    /// Bumped once per committed frame; workers run when it moves.
    ticket: AtomicU64,
    frames_completed: AtomicU64,
    fault: Mutex<Option<RenderError>>,
}

impl Shared {
    fn record_fault(&self, err: RenderError) {
        log::error!("frame {} failed: {err}", self.ticket.load(Ordering::Acquire));
        let mut fault = lock(&self.fault);
        if fault.is_none() {
            *fault = Some(err);
        }
    }

    /// Barrier completion: runs on exactly one worker per frame.
    fn complete_frame(&self) {
        if lock(&self.fault).is_some() {
            log::warn!("skipping frame assembly after a worker fault");
        } else if let Err(err) = self.backend.assembler() {
            self.record_fault(err);
        }
        self.frames_completed.fetch_add(1, Ordering::AcqRel);
        self.computing.store(false, Ordering::Release);
    }

    /// Spins until a ticket newer than `seen` is published. `None` once the
    /// driver is deactivated with no frame pending.
    fn next_ticket(&self, seen: u64) -> Option<u64> {
        loop {
            let ticket = self.ticket.load(Ordering::Acquire);
            if ticket != seen {
                return Some(ticket);
            }
            if !self.active.load(Ordering::Acquire) {
                let ticket = self.ticket.load(Ordering::Acquire);
                return (ticket != seen).then_some(ticket);
            }
            thread::yield_now();
        }
    }
}

fn worker_loop(shared: Arc<Shared>, index: usize, mut seen: u64) {
    log::debug!("render worker {index} started");
    while let Some(ticket) = shared.next_ticket(seen) {
        seen = ticket;
        if let Err(err) = shared.backend.worker(index) {
            shared.record_fault(err);
        }
        if shared.barrier.wait().is_leader() {
            shared.complete_frame();
        }
    }
    log::debug!("render worker {index} stopped");
}

/// Drives a backend through frames on a fixed pool of worker threads.
///
/// ```text
/// commit() ── pioneer ──► worker 0..N ──► barrier ──► assembler ──► idle
/// ```
///
/// `commit` returns as soon as the workers are released; the next `commit`
/// blocks until the previous frame's assembler has run.
pub struct FrameDriver {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
    poisoned: bool,
}

impl FrameDriver {
    pub fn new(backend: Arc<dyn Backend>) -> Self {
        let workers = backend.worker_count().max(1);
        Self {
            shared: Arc::new(Shared {
                backend,
                barrier: Barrier::new(workers),
                active: AtomicBool::new(false),
                computing: AtomicBool::new(false),
                ticket: AtomicU64::new(0),
                frames_completed: AtomicU64::new(0),
                fault: Mutex::new(None),
            }),
            threads: Vec::new(),
            poisoned: false,
        }
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.shared.backend
    }

    /// Spawns one named thread per backend worker.
    pub fn launch(&mut self) -> RenderResult<()> {
        if !self.threads.is_empty() {
            return Err(RenderError::usage("frame driver already launched"));
        }
        let workers = self.shared.backend.worker_count();
        if workers == 0 {
            return Err(RenderError::usage("backend has no workers"));
        }
        self.shared.active.store(true, Ordering::Release);
        let start = self.shared.ticket.load(Ordering::Acquire);
        for index in 0..workers {
            let shared = Arc::clone(&self.shared);
            let spawned = thread::Builder::new()
                .name(format!("kiln-worker-{index}"))
                .spawn(move || worker_loop(shared, index, start));
            match spawned {
                Ok(handle) => self.threads.push(handle),
                Err(err) => {
                    self.stop_threads();
                    return Err(RenderError::device(format!("failed to spawn render worker {index}: {err}")));
                }
            }
        }
        log::info!("frame driver launched with {workers} workers");
        Ok(())
    }

    /// Starts the next frame.
    ///
    /// Blocks until the previous frame has been assembled, then runs the
    /// backend's `pioneer` and releases the workers. A fault raised while
    /// recording or assembling the previous frame is returned here.
    pub fn commit(&mut self) -> RenderResult<()> {
        if self.threads.is_empty() {
            return Err(RenderError::usage("commit before launch"));
        }
        if self.poisoned {
            return Err(RenderError::DeviceLost("frame pipeline stopped after an earlier fault".into()));
        }
        self.wait_idle();
        if let Some(err) = lock(&self.shared.fault).take() {
            self.poisoned = true;
            return Err(err);
        }

        if let Err(err) = self.shared.backend.pioneer() {
            self.poisoned = true;
            return Err(err);
        }
        self.shared.computing.store(true, Ordering::Release);
        let ticket = self.shared.ticket.fetch_add(1, Ordering::AcqRel) + 1;
        log::trace!("committed frame ticket {ticket}");
        Ok(())
    }

    /// Waits for the in-flight frame, stops the workers and drains the GPU.
    pub fn terminate(&mut self) -> RenderResult<()> {
        if self.threads.is_empty() {
            return Ok(());
        }
        self.wait_idle();
        self.stop_threads();
        let fault = lock(&self.shared.fault).take();
        self.shared.backend.shutdown()?;
        log::info!(
            "frame driver stopped after {} frames",
            self.shared.frames_completed.load(Ordering::Acquire)
        );
        match fault {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    pub fn state(&self) -> DriverState {
        if self.threads.is_empty() {
            DriverState::Stopped
        } else if self.shared.computing.load(Ordering::Acquire) {
            DriverState::Computing
        } else {
            DriverState::Idle
        }
    }

    pub fn frames_completed(&self) -> u64 {
        self.shared.frames_completed.load(Ordering::Acquire)
    }

    /// Blocks until the committed frame has been assembled.
    ///
    /// Staged writes made after this returns land in the next frame.
    pub fn wait_idle(&self) {
        while self.shared.computing.load(Ordering::Acquire) {
            thread::yield_now();
        }
    }

    fn stop_threads(&mut self) {
        self.shared.active.store(false, Ordering::Release);
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("render worker panicked");
            }
        }
    }
}

impl Drop for FrameDriver {
    fn drop(&mut self) {
        if let Err(err) = self.terminate() {
            log::error!("frame driver shutdown failed: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::soft::SoftDevice;
    use crate::config::RendererConfig;
    use crate::context::RenderContext;
    use crate::sync::ManualTimeline;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Backend that only counts calls; the assembler is slow on purpose.
    struct CountingBackend {
        ctx: RenderContext,
        workers: usize,
        pioneers: AtomicUsize,
        worker_runs: AtomicUsize,
        assembled: AtomicUsize,
        shutdowns: AtomicUsize,
        assemble_delay: Duration,
        fail_worker_on_frame: Option<(usize, usize)>,
        /// Frames that began before the previous one was assembled.
        overlaps: AtomicUsize,
    }

    impl CountingBackend {
        fn new(workers: usize) -> Self {
            let config = RendererConfig::default().with_workers(workers);
            let ctx = RenderContext::new(
                Arc::new(SoftDevice::new()),
                Arc::new(ManualTimeline::default()),
                config,
            )
            .unwrap();
            Self {
                ctx,
                workers,
                pioneers: AtomicUsize::new(0),
                worker_runs: AtomicUsize::new(0),
                assembled: AtomicUsize::new(0),
                shutdowns: AtomicUsize::new(0),
                assemble_delay: Duration::from_millis(0),
                fail_worker_on_frame: None,
                overlaps: AtomicUsize::new(0),
            }
        }
    }

    impl Backend for CountingBackend {
        fn context(&self) -> &RenderContext {
            &self.ctx
        }

        fn worker_count(&self) -> usize {
            self.workers
        }

        fn pioneer(&self) -> RenderResult<()> {
            let started = self.pioneers.fetch_add(1, Ordering::SeqCst);
            if self.assembled.load(Ordering::SeqCst) != started {
                self.overlaps.fetch_add(1, Ordering::SeqCst);
            }
            Ok(())
        }

        fn worker(&self, index: usize) -> RenderResult<()> {
            self.worker_runs.fetch_add(1, Ordering::SeqCst);
            let frame = self.pioneers.load(Ordering::SeqCst);
            if self.fail_worker_on_frame == Some((frame, index)) {
                return Err(RenderError::device("command list recording failed"));
            }
            Ok(())
        }

        fn assembler(&self) -> RenderResult<()> {
            thread::sleep(self.assemble_delay);
            self.assembled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn request_resize(&self, _width: u32, _height: u32) {}

        fn set_frame_hook(&self, _hook: Option<crate::frame::FrameHook>) {}

        fn shutdown(&self) -> RenderResult<()> {
            self.shutdowns.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    #[test]
    fn commit_before_launch_is_rejected() {
        let mut driver = FrameDriver::new(Arc::new(CountingBackend::new(2)));
        assert_eq!(driver.state(), DriverState::Stopped);
        assert!(matches!(driver.commit(), Err(RenderError::Usage(_))));
    }

    #[test]
    fn terminate_joins_workers_and_drains_the_gpu() {
        let counts = Arc::new(CountingBackend::new(3));
        let mut driver = FrameDriver::new(counts.clone());
        driver.launch().unwrap();
        assert!(driver.launch().is_err());
        for _ in 0..5 {
            driver.commit().unwrap();
        }
        driver.terminate().unwrap();
        assert_eq!(driver.state(), DriverState::Stopped);
        assert_eq!(counts.assembled.load(Ordering::SeqCst), 5);
        assert_eq!(counts.worker_runs.load(Ordering::SeqCst), 15);
        assert_eq!(counts.shutdowns.load(Ordering::SeqCst), 1);
        assert_eq!(driver.frames_completed(), 5);
    }

    // ── pacing ────────────────────────────────────────────────────────────

    #[test]
    fn second_commit_waits_for_the_first_frame_to_be_assembled() {
        let mut backend = CountingBackend::new(4);
        backend.assemble_delay = Duration::from_millis(30);
        let counts = Arc::new(backend);
        let mut driver = FrameDriver::new(counts.clone());
        driver.launch().unwrap();

        driver.commit().unwrap();
        driver.commit().unwrap();
        assert!(counts.assembled.load(Ordering::SeqCst) >= 1);
        assert_eq!(counts.overlaps.load(Ordering::SeqCst), 0);

        driver.terminate().unwrap();
        assert_eq!(counts.assembled.load(Ordering::SeqCst), 2);
        assert_eq!(counts.worker_runs.load(Ordering::SeqCst), 8);
    }

    // ── faults ────────────────────────────────────────────────────────────

    #[test]
    fn worker_fault_skips_assembly_and_surfaces_on_next_commit() {
        let mut backend = CountingBackend::new(2);
        backend.fail_worker_on_frame = Some((2, 1));
        let counts = Arc::new(backend);
        let mut driver = FrameDriver::new(counts.clone());
        driver.launch().unwrap();

        driver.commit().unwrap();
        driver.commit().unwrap();
        let err = driver.commit().unwrap_err();
        assert!(matches!(err, RenderError::Device { .. }));
        assert!(matches!(driver.commit(), Err(RenderError::DeviceLost(_))));

        assert_eq!(counts.assembled.load(Ordering::SeqCst), 1);
        driver.terminate().unwrap();
    }
}
