use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::backend::soft::device::SoftDevice;
use crate::backend::soft::queue::SoftQueue;
use crate::backend::soft::recorder::SoftCommandList;
use crate::backend::soft::resource::SoftResource;
use crate::config::RendererConfig;
use crate::context::RenderContext;
use crate::descriptor::{ViewDesc, ViewHandle};
use crate::error::{RenderError, RenderResult};
use crate::frame::{Backend, FrameHook};
use crate::gpu::{CommandRecorder, ResourceDesc, ResourceState, TextureInfo};
use crate::staging::StagedBuffer;
use crate::sync::lock;

/// Initialization parameters of the software backend.
#[derive(Debug, Clone)]
pub struct SoftInit {
    /// Backbuffer size in pixels.
    pub width: u32,
    pub height: u32,

    /// Simulated GPU time per submission.
    pub latency: Duration,
}

impl Default for SoftInit {
    fn default() -> Self {
        Self::headless(1280, 720)
    }
}

impl SoftInit {
    pub fn headless(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            latency: Duration::ZERO,
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

struct Backbuffer {
    texture: Arc<SoftResource>,
    rtv: ViewHandle,
}

/// Per-(frame slot, worker) command allocator.
#[derive(Default)]
struct Allocator {
    /// Fence of the last submission recorded from this allocator.
    in_flight_fence: u64,
}

/// Headless backend over the software GPU.
///
/// Backbuffers are plain textures rotated per frame; presenting only counts.
pub struct SoftBackend {
    ctx: RenderContext,
    device: Arc<SoftDevice>,
    workers: usize,
    backbuffers: Mutex<Vec<Backbuffer>>,
    size: Mutex<(u32, u32)>,
    pending_resize: Mutex<Option<(u32, u32)>>,
    allocators: Vec<Mutex<Allocator>>,
    recorded: Vec<Mutex<Option<SoftCommandList>>>,
    hook: Mutex<Option<FrameHook>>,
    clear_texel: Vec<u8>,
    presented: AtomicU64,
    queue: SoftQueue,
}

impl SoftBackend {
    pub fn new(init: SoftInit, config: RendererConfig) -> RenderResult<Self> {
        let workers = config.worker_count;
        if workers == 0 {
            return Err(RenderError::usage("worker count must be at least 1"));
        }
        let clear_texel = config
            .backbuffer_format
            .encode_color(config.clear_color)
            .ok_or_else(|| RenderError::usage(format!("cannot clear {:?} backbuffers", config.backbuffer_format)))?;
        let frames = config.frames_in_flight;

        let device = Arc::new(SoftDevice::new());
        let queue = SoftQueue::new(init.latency)?;
        let ctx = RenderContext::new(device.clone(), queue.timeline(), config)?;

        let backend = Self {
            ctx,
            device,
            workers,
            backbuffers: Mutex::new(Vec::new()),
            size: Mutex::new((init.width, init.height)),
            pending_resize: Mutex::new(None),
            allocators: (0..frames * workers).map(|_| Mutex::default()).collect(),
            recorded: (0..workers).map(|_| Mutex::default()).collect(),
            hook: Mutex::new(None),
            clear_texel,
            presented: AtomicU64::new(0),
            queue,
        };
        backend.create_backbuffers(init.width, init.height)?;
        log::debug!("software backend ready: {}x{}, {workers} workers", init.width, init.height);
        Ok(backend)
    }

    pub fn device(&self) -> &Arc<SoftDevice> {
        &self.device
    }

    pub fn queue(&self) -> &SoftQueue {
        &self.queue
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Acquire)
    }

    pub fn backbuffer_size(&self) -> (u32, u32) {
        *lock(&self.size)
    }

    pub fn backbuffer(&self, slot: usize) -> Option<Arc<SoftResource>> {
        lock(&self.backbuffers).get(slot).map(|bb| Arc::clone(&bb.texture))
    }

    fn create_backbuffers(&self, width: u32, height: u32) -> RenderResult<()> {
        let info = TextureInfo::new(self.ctx.config().backbuffer_format, width, height);
        let mut backbuffers = lock(&self.backbuffers);
        for slot in 0..self.ctx.config().frames_in_flight {
            let texture = self
                .device
                .create_soft(ResourceDesc::texture(format!("backbuffer {slot}"), info.clone()), ResourceState::Present)?;
            let rtv = self.ctx.create_view(Some(texture.as_ref()), &ViewDesc::RenderTarget)?;
            backbuffers.push(Backbuffer { texture, rtv });
        }
        *lock(&self.size) = (width, height);
        Ok(())
    }

    /// Recreates the backbuffers once the GPU is idle.
    fn resize(&self, width: u32, height: u32) -> RenderResult<()> {
        self.ctx.flush_queue()?;
        let old = std::mem::take(&mut *lock(&self.backbuffers));
        for backbuffer in old {
            self.ctx.release_view(backbuffer.rtv)?;
        }
        self.create_backbuffers(width, height)?;
        log::info!("backbuffers resized to {width}x{height}");
        Ok(())
    }
}

impl Backend for SoftBackend {
    fn context(&self) -> &RenderContext {
        &self.ctx
    }

    fn worker_count(&self) -> usize {
        self.workers
    }

    fn pioneer(&self) -> RenderResult<()> {
        if let Some((width, height)) = lock(&self.pending_resize).take() {
            self.resize(width, height)?;
        }
        Ok(())
    }

    fn worker(&self, index: usize) -> RenderResult<()> {
        let (slot, target, completed) = {
            let mut fence = self.ctx.fence();
            (fence.frame_array_index(), fence.target_fence(), fence.refresh())
        };
        let mut allocator = lock(&self.allocators[slot * self.workers + index]);
        if allocator.in_flight_fence > completed {
            return Err(RenderError::usage(format!(
                "allocator {slot}/{index} reset while fence {} is pending (completed {completed})",
                allocator.in_flight_fence
            )));
        }

        let mut list = SoftCommandList::new();
        if index == 0 {
            StagedBuffer::gpu_copy(&self.ctx, &mut list)?;
            let backbuffer = self
                .backbuffer(slot)
                .ok_or_else(|| RenderError::device(format!("no backbuffer for slot {slot}")))?;
            list.transition(backbuffer.as_ref(), ResourceState::Present, ResourceState::RenderTarget);
            list.clear(backbuffer.as_ref(), &self.clear_texel)?;
            list.transition(backbuffer.as_ref(), ResourceState::RenderTarget, ResourceState::Present);
        }
        let hook = lock(&self.hook).clone();
        if let Some(hook) = hook {
            hook(index, &self.ctx, &mut list)?;
        }

        allocator.in_flight_fence = target;
        *lock(&self.recorded[index]) = Some(list);
        Ok(())
    }

    fn assembler(&self) -> RenderResult<()> {
        let released = self.ctx.release_garbage();
        let lists: Vec<SoftCommandList> = self.recorded.iter().filter_map(|slot| lock(slot).take()).collect();
        let commands: usize = lists.iter().map(SoftCommandList::len).sum();
        self.queue.submit(lists)?;
        let presented = self.presented.fetch_add(1, Ordering::AcqRel) + 1;
        log::trace!("frame {presented}: {commands} commands submitted, {released} resources released");
        self.ctx.next_frame()
    }

    fn request_resize(&self, width: u32, height: u32) {
        *lock(&self.pending_resize) = Some((width.max(1), height.max(1)));
    }

    fn set_frame_hook(&self, hook: Option<FrameHook>) {
        *lock(&self.hook) = hook;
    }

    fn shutdown(&self) -> RenderResult<()> {
        self.ctx.flush_queue()?;
        let released = self.ctx.release_garbage();
        log::debug!("software backend drained, {released} resources released");
        match self.queue.fault() {
            Some(fault) => Err(RenderError::DeviceLost(fault)),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameDriver;
    use crate::gpu::{GpuResource, HeapKind, TextureFormat, Timeline};
    use crate::staging::{StagedBufferDesc, StagingPolicy};

    fn backend(workers: usize) -> SoftBackend {
        SoftBackend::new(SoftInit::headless(8, 4), RendererConfig::default().with_workers(workers)).unwrap()
    }

    /// Runs one frame on the calling thread.
    fn run_frame(backend: &SoftBackend) {
        backend.pioneer().unwrap();
        for index in 0..backend.worker_count() {
            backend.worker(index).unwrap();
        }
        backend.assembler().unwrap();
    }

    fn read_back_on_next_frame(backend: &SoftBackend, source: &StagedBuffer, readback: &StagedBuffer) {
        let (source, readback) = (source.clone(), readback.clone());
        let hook: FrameHook = Arc::new(
            move |index: usize, _ctx: &RenderContext, recorder: &mut dyn CommandRecorder| -> RenderResult<()> {
                if index == 0 {
                    source.record_readback(recorder, &readback)?;
                }
                Ok(())
            },
        );
        backend.set_frame_hook(Some(hook));
        run_frame(backend);
        backend.set_frame_hook(None);
        backend.context().flush_queue().unwrap();
    }

    // ── staging round trips ───────────────────────────────────────────────

    #[test]
    fn upload_buffer_round_trips_through_mapped_memory() {
        let backend = backend(1);
        let ctx = backend.context();
        let buffer = StagedBuffer::new(ctx, StagedBufferDesc::vertex("verts", HeapKind::Upload, 4, 16)).unwrap();
        let data: Vec<u32> = (0..16).map(|i| i * 3 + 1).collect();
        buffer.write_typed(ctx, &data, 0).unwrap();

        let mut out = vec![0u8; 64];
        buffer.read_mapped(0, &mut out).unwrap();
        assert_eq!(out, bytemuck::cast_slice::<u32, u8>(&data));
        assert!(ctx.uploads().is_empty());
    }

    #[test]
    fn local_write_is_visible_after_copy_and_readback() {
        let backend = backend(2);
        let ctx = backend.context();
        let local = StagedBuffer::new(ctx, StagedBufferDesc::vertex("local", HeapKind::Local, 4, 16)).unwrap();
        let readback = StagedBuffer::new(ctx, StagedBufferDesc::vertex("rb", HeapKind::Readback, 4, 16)).unwrap();

        let pattern: Vec<u8> = (0..64).map(|i| (i * 7) as u8).collect();
        local.write_scalar(ctx, &pattern, 0, 16).unwrap();
        assert_eq!(ctx.uploads().len(), 1);
        read_back_on_next_frame(&backend, &local, &readback);

        let mut out = vec![0u8; 64];
        readback.read_back(&mut out).unwrap();
        assert_eq!(out, pattern);
        assert!(ctx.uploads().is_empty());
        assert_eq!(backend.queue().fault(), None);
    }

    #[test]
    fn constant_elements_are_strided_to_256_bytes() {
        let backend = backend(1);
        let ctx = backend.context();
        let constants = StagedBuffer::new(ctx, StagedBufferDesc::constant("cb", HeapKind::Local, 64, 3)).unwrap();
        let readback = StagedBuffer::new(ctx, StagedBufferDesc::constant("cb rb", HeapKind::Readback, 64, 3)).unwrap();
        assert_eq!(constants.element_size(), 256);
        assert_eq!(constants.byte_size(), 768);

        constants.write_scalar(ctx, &[0xab; 64], 1, 1).unwrap();
        read_back_on_next_frame(&backend, &constants, &readback);

        let mut out = vec![0u8; 768];
        readback.read_back(&mut out).unwrap();
        assert!(out[..256].iter().all(|&b| b == 0));
        assert!(out[256..320].iter().all(|&b| b == 0xab));
        assert!(out[320..].iter().all(|&b| b == 0));
    }

    #[test]
    fn partial_writes_keep_previously_copied_elements() {
        let backend = backend(1);
        let ctx = backend.context();
        let local = StagedBuffer::new(ctx, StagedBufferDesc::vertex("local", HeapKind::Local, 4, 4)).unwrap();
        let readback = StagedBuffer::new(ctx, StagedBufferDesc::vertex("rb", HeapKind::Readback, 4, 4)).unwrap();

        local.write_typed(ctx, &[1u32, 2, 3, 4], 0).unwrap();
        run_frame(&backend);
        local.write_typed(ctx, &[9u32], 2).unwrap();
        read_back_on_next_frame(&backend, &local, &readback);

        let mut out = vec![0u8; 16];
        readback.read_back(&mut out).unwrap();
        assert_eq!(bytemuck::cast_slice::<u8, u32>(&out), &[1, 2, 9, 4]);
    }

    fn read_u32s(readback: &StagedBuffer, count: usize) -> Vec<u32> {
        let mut out = vec![0u8; count * 4];
        readback.read_back(&mut out).unwrap();
        bytemuck::cast_slice(&out).to_vec()
    }

    #[test]
    fn separate_partial_writes_leave_the_gap_untouched() {
        let backend = backend(1);
        let ctx = backend.context();
        let local = StagedBuffer::new(ctx, StagedBufferDesc::vertex("gaps", HeapKind::Local, 4, 4)).unwrap();
        let readback = StagedBuffer::new(ctx, StagedBufferDesc::vertex("gaps rb", HeapKind::Readback, 4, 4)).unwrap();

        local.write_typed(ctx, &[1u32, 2, 3, 4], 0).unwrap();
        run_frame(&backend);
        ctx.flush_queue().unwrap();

        local.write_typed(ctx, &[9u32], 0).unwrap();
        local.write_typed(ctx, &[9u32], 3).unwrap();
        read_back_on_next_frame(&backend, &local, &readback);
        assert_eq!(read_u32s(&readback, 4), [9, 2, 3, 9]);
    }

    #[test]
    fn rotated_retained_staging_copies_only_written_elements() {
        let backend = backend(1);
        let ctx = backend.context();
        let desc = StagedBufferDesc::vertex("busy", HeapKind::Local, 4, 4).with_policy(StagingPolicy::Retained);
        let local = StagedBuffer::new(ctx, desc).unwrap();
        let readback = StagedBuffer::new(ctx, StagedBufferDesc::vertex("busy rb", HeapKind::Readback, 4, 4)).unwrap();

        local.write_typed(ctx, &[1u32, 2, 3, 4], 0).unwrap();
        backend.queue().set_stalled(true);
        run_frame(&backend);

        // The first companion is still being read, so these go to a fresh one.
        local.write_typed(ctx, &[7u32], 1).unwrap();
        local.write_typed(ctx, &[8u32], 3).unwrap();
        backend.queue().set_stalled(false);
        read_back_on_next_frame(&backend, &local, &readback);
        assert_eq!(read_u32s(&readback, 4), [1, 7, 3, 8]);
    }

    #[test]
    fn texture_mips_are_copied_and_read_back() {
        let backend = backend(1);
        let ctx = backend.context();
        let info = TextureInfo::square(TextureFormat::Rgba8Unorm, 4);
        let texture = StagedBuffer::new(ctx, StagedBufferDesc::texture("albedo", HeapKind::Local, info.clone())).unwrap();
        let readback = StagedBuffer::new(
            ctx,
            StagedBufferDesc::texture("albedo rb", HeapKind::Readback, TextureInfo::new(TextureFormat::Rgba8Unorm, 4, 4)),
        )
        .unwrap();

        let packed: Vec<u8> = (0..info.packed_slice_size()).map(|i| (i % 251) as u8).collect();
        texture.write_texture(ctx, &packed, 0).unwrap();
        read_back_on_next_frame(&backend, &texture, &readback);

        let mut mip0 = vec![0u8; 64];
        readback.read_texture(0, &mut mip0).unwrap();
        assert_eq!(mip0, packed[..64]);

        // The smaller mips landed in the texture's own memory.
        let memory = SoftResource::downcast(texture.resource().as_ref()).unwrap().snapshot();
        assert_eq!(memory, packed);
    }

    #[test]
    fn readback_textures_cannot_have_mips() {
        let backend = backend(1);
        let desc = StagedBufferDesc::texture(
            "rb",
            HeapKind::Readback,
            TextureInfo::square(TextureFormat::R8Unorm, 8),
        );
        assert!(matches!(StagedBuffer::new(backend.context(), desc), Err(RenderError::Usage(_))));
    }

    // ── usage errors ──────────────────────────────────────────────────────

    #[test]
    fn invalid_writes_are_rejected() {
        let backend = backend(1);
        let ctx = backend.context();
        let local = StagedBuffer::new(ctx, StagedBufferDesc::vertex("local", HeapKind::Local, 4, 4)).unwrap();
        let readback = StagedBuffer::new(ctx, StagedBufferDesc::vertex("rb", HeapKind::Readback, 4, 4)).unwrap();

        assert!(local.write_scalar(ctx, &[0; 8], 3, 2).is_err());
        assert!(local.write_scalar(ctx, &[0; 4], 0, 2).is_err());
        assert!(local.write_typed(ctx, &[0u16; 2], 0).is_err());
        assert!(readback.write_scalar(ctx, &[0; 4], 0, 1).is_err());
        assert!(local.read_back(&mut [0; 4]).is_err());
        assert!(local.read_mapped(0, &mut [0; 4]).is_err());
        assert!(ctx.uploads().is_empty());
    }

    #[test]
    fn mismatched_readback_records_nothing() {
        let backend = backend(1);
        let ctx = backend.context();
        let info = TextureInfo::new(TextureFormat::Rgba8Unorm, 4, 4);
        let texture = StagedBuffer::new(ctx, StagedBufferDesc::texture("albedo", HeapKind::Local, info)).unwrap();
        let small = StagedBuffer::new(
            ctx,
            StagedBufferDesc::texture("small rb", HeapKind::Readback, TextureInfo::new(TextureFormat::Rgba8Unorm, 2, 2)),
        )
        .unwrap();
        let local = StagedBuffer::new(ctx, StagedBufferDesc::vertex("local", HeapKind::Local, 4, 4)).unwrap();
        let short = StagedBuffer::new(ctx, StagedBufferDesc::vertex("short rb", HeapKind::Readback, 4, 2)).unwrap();

        let mut list = SoftCommandList::new();
        assert!(matches!(texture.record_readback(&mut list, &small), Err(RenderError::Usage(_))));
        assert!(texture.record_readback(&mut list, &short).is_err());
        assert!(matches!(local.record_readback(&mut list, &short), Err(RenderError::Usage(_))));
        assert!(list.is_empty());
    }

    #[test]
    fn texture_staging_is_bounded_per_frame() {
        let backend = backend(1);
        let ctx = backend.context();
        let info = TextureInfo::new(TextureFormat::R8Unorm, 4, 4).with_array(6);
        let array = StagedBuffer::new(ctx, StagedBufferDesc::texture("atlas", HeapKind::Local, info)).unwrap();
        let slice = [7u8; 16];

        for index in 0..4 {
            array.write_texture(ctx, &slice, index).unwrap();
        }
        assert!(matches!(
            array.write_texture(ctx, &slice, 4),
            Err(RenderError::StagingPoolExhausted { limit: 4 })
        ));

        run_frame(&backend);
        array.write_texture(ctx, &slice, 4).unwrap();
        array.write_texture(ctx, &slice, 5).unwrap();
    }

    #[cfg(debug_assertions)]
    #[test]
    fn same_array_slice_twice_in_one_frame_is_a_usage_error() {
        let backend = backend(1);
        let ctx = backend.context();
        let info = TextureInfo::new(TextureFormat::R8Unorm, 2, 2).with_array(2);
        let array = StagedBuffer::new(ctx, StagedBufferDesc::texture("atlas", HeapKind::Local, info)).unwrap();
        array.write_texture(ctx, &[1; 4], 1).unwrap();
        assert!(matches!(array.write_texture(ctx, &[2; 4], 1), Err(RenderError::Usage(_))));
        array.write_texture(ctx, &[3; 4], 0).unwrap();
    }

    // ── deferred release ──────────────────────────────────────────────────

    #[test]
    fn superseded_staging_outlives_its_copy() {
        let backend = SoftBackend::new(
            SoftInit::headless(8, 4).with_latency(Duration::from_millis(3)),
            RendererConfig::default().with_workers(2),
        )
        .unwrap();
        let ctx = backend.context();
        let local = StagedBuffer::new(ctx, StagedBufferDesc::vertex("hot", HeapKind::Local, 4, 64)).unwrap();
        let baseline = backend.device().live_count();

        let mut saw_pending = false;
        for frame in 0..12u32 {
            local.write_typed(ctx, &[frame; 64], 0).unwrap();
            run_frame(&backend);
            saw_pending |= ctx.pending_release_count() > 0;
        }
        assert!(saw_pending);

        backend.shutdown().unwrap();
        assert_eq!(ctx.pending_release_count(), 0);
        assert_eq!(backend.device().live_count(), baseline);
        assert_eq!(backend.queue().fault(), None);
    }

    #[test]
    fn retained_staging_is_reused_once_its_copy_completed() {
        let backend = backend(1);
        let ctx = backend.context();
        let desc = StagedBufferDesc::vertex("cached", HeapKind::Local, 4, 8).with_policy(StagingPolicy::Retained);
        let retained = StagedBuffer::new(ctx, desc).unwrap();
        let transient = StagedBuffer::new(ctx, StagedBufferDesc::vertex("once", HeapKind::Local, 4, 8)).unwrap();

        retained.write_typed(ctx, &[1u32; 8], 0).unwrap();
        transient.write_typed(ctx, &[1u32; 8], 0).unwrap();
        run_frame(&backend);
        ctx.flush_queue().unwrap();
        assert_eq!(retained.staging_count(), 1);
        assert_eq!(transient.staging_count(), 0);

        let pending = ctx.pending_release_count();
        retained.write_typed(ctx, &[2u32; 8], 0).unwrap();
        assert_eq!(retained.staging_count(), 1);
        assert_eq!(ctx.pending_release_count(), pending);
    }

    #[test]
    fn destroying_a_resource_under_the_gpu_is_reported() {
        let backend = backend(1);
        let ctx = backend.context();
        let dst = StagedBuffer::new(ctx, StagedBufferDesc::vertex("dst", HeapKind::Local, 4, 4)).unwrap();
        let src = ctx
            .device()
            .create_resource(&ResourceDesc::buffer("doomed", HeapKind::Upload, crate::gpu::ContentKind::Vertex, 16))
            .unwrap();

        let mut list = SoftCommandList::new();
        list.transition(src.as_ref(), ResourceState::GenericRead, ResourceState::CopySource);
        list.transition(dst.resource().as_ref(), ResourceState::GenericRead, ResourceState::CopyDest);
        list.copy_resource(dst.resource().as_ref(), src.as_ref()).unwrap();

        backend.queue().set_stalled(true);
        backend.queue().submit(vec![list]).unwrap();
        drop(src);
        backend.queue().set_stalled(false);
        let timeline = backend.queue().timeline();
        timeline.signal(1000).unwrap();
        timeline.wait_for(1000, Duration::from_secs(5)).unwrap();
        assert!(backend.queue().fault().is_some_and(|f| f.contains("use after free")));
    }

    // ── frames ────────────────────────────────────────────────────────────

    #[test]
    fn backbuffer_is_cleared_and_returned_to_present() {
        let backend = backend(1);
        run_frame(&backend);
        backend.context().flush_queue().unwrap();

        let backbuffer = backend.backbuffer(0).unwrap();
        assert_eq!(backbuffer.state(), ResourceState::Present);
        let texel = TextureFormat::Bgra8Unorm.encode_color([0.2, 0.21, 0.2, 0.0]).unwrap();
        let memory = backbuffer.snapshot();
        assert_eq!(memory.len(), 8 * 4 * 4);
        assert!(memory.chunks_exact(4).all(|px| px == texel.as_slice()));
        // Slot 1 has not been rendered yet.
        assert!(backend.backbuffer(1).unwrap().snapshot().iter().all(|&b| b == 0));
    }

    #[test]
    fn stalled_gpu_surfaces_as_fence_timeout() {
        let config = RendererConfig {
            frames_in_flight: 2,
            fence_timeout: Duration::from_millis(50),
            ..RendererConfig::default().with_workers(1)
        };
        let backend = SoftBackend::new(SoftInit::headless(4, 4), config).unwrap();
        backend.queue().set_stalled(true);

        run_frame(&backend);
        backend.pioneer().unwrap();
        backend.worker(0).unwrap();
        let err = backend.assembler().unwrap_err();
        assert!(matches!(err, RenderError::FenceTimeout { value: 1, .. }));
        backend.queue().set_stalled(false);
    }

    #[test]
    fn resize_recreates_backbuffers_after_a_flush() {
        let backend = backend(1);
        let free_rtvs = backend
            .context()
            .descriptors()
            .free_count(crate::descriptor::DescriptorPool::RenderTarget);
        run_frame(&backend);
        backend.request_resize(16, 8);
        run_frame(&backend);

        assert_eq!(backend.backbuffer_size(), (16, 8));
        let info = backend.backbuffer(0).unwrap().texture_info().cloned().unwrap();
        assert_eq!((info.width, info.height), (16, 8));
        let free_after = backend
            .context()
            .descriptors()
            .free_count(crate::descriptor::DescriptorPool::RenderTarget);
        assert_eq!(free_after, free_rtvs);
    }

    #[test]
    fn driver_runs_frames_on_worker_threads() {
        let backend = Arc::new(backend(4));
        let ctx_buffer = StagedBuffer::new(
            backend.context(),
            StagedBufferDesc::constant("per-frame", HeapKind::Local, 64, 1),
        )
        .unwrap();
        let mut driver = FrameDriver::new(backend.clone());
        driver.launch().unwrap();
        for frame in 0..10u8 {
            ctx_buffer.write_scalar(backend.context(), &[frame; 64], 0, 1).unwrap();
            driver.commit().unwrap();
        }
        driver.terminate().unwrap();

        assert_eq!(backend.presented(), 10);
        assert_eq!(backend.context().fence().frame_index(), 10);
        assert_eq!(backend.queue().fault(), None);
    }

    // ── resource table ────────────────────────────────────────────────────

    #[test]
    fn constant_buffers_get_one_view_per_element() {
        let backend = backend(1);
        let ctx = backend.context();
        let pool = crate::descriptor::DescriptorPool::ShaderVisible;
        let free = ctx.descriptors().free_count(pool);

        let handle = ctx.create_constant_buffer("lights", 64, 3).unwrap();
        let constants = ctx.constant_buffer(handle).unwrap();
        assert_eq!(constants.views.len(), 3);
        assert_eq!(ctx.descriptors().free_count(pool), free - 3);

        let slot = ctx.descriptors().cpu_handle(constants.views[2]).unwrap();
        let written = backend.device().descriptor(slot).unwrap();
        assert_eq!(written.view, ViewDesc::Constant { offset: 512, size: 256 });
        assert_eq!(written.resource, Some(constants.buffer.resource().id()));
        assert!(ctx.texture(handle).is_err());

        let id = constants.buffer.resource().id();
        drop(constants);
        ctx.release_resource(handle).unwrap();
        assert_eq!(ctx.descriptors().free_count(pool), free);
        assert!(ctx.constant_buffer(handle).is_err());

        run_frame(&backend);
        backend.shutdown().unwrap();
        assert!(!backend.device().is_alive(id));
    }

    #[test]
    fn released_views_no_longer_reference_the_resource() {
        let backend = backend(1);
        let ctx = backend.context();
        let handle = ctx
            .create_texture("albedo", TextureInfo::new(TextureFormat::Rgba8Unorm, 4, 4))
            .unwrap();
        let view = ctx.texture(handle).unwrap().view;
        let slot = ctx.descriptors().cpu_handle(view).unwrap();
        assert!(backend.device().descriptor(slot).is_some());

        ctx.release_resource(handle).unwrap();
        assert!(backend.device().descriptor(slot).is_none());
    }

    #[cfg(debug_assertions)]
    #[test]
    fn failed_view_release_still_retires_the_buffer() {
        let backend = backend(1);
        let ctx = backend.context();
        let pool = crate::descriptor::DescriptorPool::ShaderVisible;
        let free = ctx.descriptors().free_count(pool);
        let handle = ctx.create_constant_buffer("lights", 64, 3).unwrap();
        let constants = ctx.constant_buffer(handle).unwrap();
        ctx.release_view(constants.views[0]).unwrap();

        assert!(matches!(ctx.release_resource(handle), Err(RenderError::Usage(_))));
        assert!(constants.buffer.is_retired());
        assert_eq!(ctx.descriptors().free_count(pool), free);
        let last = ctx.descriptors().cpu_handle(constants.views[2]).unwrap();
        assert!(backend.device().descriptor(last).is_none());
        assert!(ctx.constant_buffer(handle).is_err());
    }

    #[test]
    fn meshes_are_staged_into_local_memory() {
        let backend = backend(1);
        let ctx = backend.context();
        let vertices: Vec<u8> = (0..96).collect();
        let handle = ctx.create_mesh("quad", 24, &vertices, &[0, 1, 2, 2, 1, 3]).unwrap();
        let mesh = ctx.mesh(handle).unwrap();
        assert_eq!(mesh.index_count, 6);
        assert_eq!(ctx.uploads().len(), 2);

        let readback = StagedBuffer::new(ctx, StagedBufferDesc::vertex("rb", HeapKind::Readback, 24, 4)).unwrap();
        read_back_on_next_frame(&backend, &mesh.vertices, &readback);
        let mut out = vec![0u8; 96];
        readback.read_back(&mut out).unwrap();
        assert_eq!(out, vertices);
        assert!(ctx.create_mesh("bad", 24, &vertices[..10], &[]).is_err());
    }

    #[test]
    fn textures_get_a_shader_resource_view() {
        let backend = backend(1);
        let ctx = backend.context();
        let handle = ctx
            .create_texture("font", TextureInfo::new(TextureFormat::R8Unorm, 8, 8))
            .unwrap();
        let texture = ctx.texture(handle).unwrap();
        let slot = ctx.descriptors().cpu_handle(texture.view).unwrap();
        assert_eq!(backend.device().descriptor(slot).unwrap().view, ViewDesc::ShaderResource);

        texture.image.write_texture(ctx, &[5; 64], 0).unwrap();
        ctx.release_resource(handle).unwrap();
        // The pending copy is dropped with the retired texture.
        run_frame(&backend);
        backend.shutdown().unwrap();
        assert_eq!(ctx.resource_count(), 0);
    }
}
