use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use winit::dpi::PhysicalSize;
use winit::window::Window;

use crate::backend::wgpu::device::WgpuDevice;
use crate::backend::wgpu::init::{WgpuInit, WgpuTarget};
use crate::backend::wgpu::recorder::WgpuRecorder;
use crate::backend::wgpu::surface::{choose_alpha_mode, choose_surface_format, map_surface_error, SurfaceErrorAction};
use crate::backend::wgpu::timeline::WgpuTimeline;
use crate::config::RendererConfig;
use crate::context::RenderContext;
use crate::error::{RenderError, RenderResult};
use crate::frame::{Backend, FrameHook};
use crate::staging::StagedBuffer;
use crate::sync::lock;

/// The swapchain image acquired for the frame being recorded.
struct AcquiredFrame {
    surface_texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

#[derive(Default)]
struct Allocator {
    in_flight_fence: u64,
}

/// Windowed backend over wgpu.
///
/// The pioneer acquires the surface texture, worker 0 records the staging
/// copies and the clear pass, and the assembler submits and presents.
pub struct WgpuBackend {
    ctx: RenderContext,
    device: Arc<WgpuDevice>,
    surface: wgpu::Surface<'static>,
    surface_config: Mutex<wgpu::SurfaceConfiguration>,
    window: Arc<Window>,
    workers: usize,
    frame: Mutex<Option<AcquiredFrame>>,
    pending_resize: Mutex<Option<PhysicalSize<u32>>>,
    allocators: Vec<Mutex<Allocator>>,
    recorded: Vec<Mutex<Option<wgpu::CommandBuffer>>>,
    hook: Mutex<Option<FrameHook>>,
    presented: AtomicU64,
    skipped: AtomicU64,
}

impl WgpuBackend {
    /// Creates the device and configures a surface for `target.window`.
    ///
    /// Adapter/device acquisition is asynchronous under wgpu.
    pub async fn new(target: WgpuTarget, config: RendererConfig) -> RenderResult<Self> {
        let WgpuTarget { window, init } = target;
        let workers = config.worker_count;
        if workers == 0 {
            return Err(RenderError::usage("worker count must be at least 1"));
        }
        let size = window.inner_size();
        if size.width == 0 || size.height == 0 {
            return Err(RenderError::usage("window has zero size"));
        }

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let surface = instance
            .create_surface(Arc::clone(&window))
            .map_err(|err| RenderError::device(format!("failed to create wgpu surface: {err}")))?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: Some(&surface),
                force_fallback_adapter: false,
            })
            .await
            .map_err(|err| RenderError::device(format!("failed to find a suitable GPU adapter: {err}")))?;

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("kiln device"),
                required_features: init.required_features,
                required_limits: init.required_limits.clone(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::Performance,
                trace: wgpu::Trace::Off,
            })
            .await
            .map_err(|err| RenderError::device(format!("failed to create wgpu device/queue: {err}")))?;
        let (device, queue) = (Arc::new(device), Arc::new(queue));

        let surface_config = Self::surface_configuration(&surface, &adapter, &init, &config, size)?;
        surface.configure(&device, &surface_config);
        log::info!(
            "wgpu backend on {}: {:?} {}x{}, {workers} workers",
            adapter.get_info().name,
            surface_config.format,
            size.width,
            size.height
        );

        let timeline = Arc::new(WgpuTimeline::new(Arc::clone(&device), Arc::clone(&queue)));
        let wgpu_device = Arc::new(WgpuDevice::new(device, queue));
        let frames = config.frames_in_flight;
        let ctx = RenderContext::new(wgpu_device.clone(), timeline, config)?;

        Ok(Self {
            ctx,
            device: wgpu_device,
            surface,
            surface_config: Mutex::new(surface_config),
            window,
            workers,
            frame: Mutex::new(None),
            pending_resize: Mutex::new(None),
            allocators: (0..frames * workers).map(|_| Mutex::default()).collect(),
            recorded: (0..workers).map(|_| Mutex::default()).collect(),
            hook: Mutex::new(None),
            presented: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        })
    }

    fn surface_configuration(
        surface: &wgpu::Surface<'static>,
        adapter: &wgpu::Adapter,
        init: &WgpuInit,
        config: &RendererConfig,
        size: PhysicalSize<u32>,
    ) -> RenderResult<wgpu::SurfaceConfiguration> {
        let caps = surface.get_capabilities(adapter);
        let format = choose_surface_format(&caps, config.backbuffer_format, init.prefer_srgb)
            .ok_or_else(|| RenderError::device("no supported surface formats"))?;
        Ok(wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: init.present_mode,
            alpha_mode: choose_alpha_mode(&caps, init.alpha_mode),
            view_formats: vec![],
            desired_maximum_frame_latency: init.desired_maximum_frame_latency.max(1),
        })
    }

    pub fn device(&self) -> &Arc<WgpuDevice> {
        &self.device
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        lock(&self.surface_config).format
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Acquire)
    }

    /// Frames recorded without a swapchain image.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Acquire)
    }

    /// Reconfigures the surface once the GPU is idle.
    ///
    /// wgpu does not support a 0x0 surface; such requests are dropped.
    fn resize(&self, size: PhysicalSize<u32>) -> RenderResult<()> {
        if size.width == 0 || size.height == 0 {
            return Ok(());
        }
        self.ctx.flush_queue()?;
        let mut config = lock(&self.surface_config);
        config.width = size.width;
        config.height = size.height;
        self.surface.configure(self.device.raw(), &config);
        log::info!("surface resized to {}x{}", size.width, size.height);
        Ok(())
    }

    fn acquire(&self) -> RenderResult<Option<AcquiredFrame>> {
        match self.surface.get_current_texture() {
            Ok(surface_texture) => {
                let view = surface_texture
                    .texture
                    .create_view(&wgpu::TextureViewDescriptor::default());
                Ok(Some(AcquiredFrame { surface_texture, view }))
            }
            Err(err) => match map_surface_error(&err) {
                SurfaceErrorAction::Reconfigured => {
                    log::debug!("surface {err}; reconfiguring");
                    let config = lock(&self.surface_config);
                    self.surface.configure(self.device.raw(), &config);
                    Ok(None)
                }
                SurfaceErrorAction::SkipFrame => {
                    log::warn!("surface {err}; skipping frame");
                    Ok(None)
                }
                SurfaceErrorAction::Fatal => Err(RenderError::DeviceLost(format!("surface: {err}"))),
            },
        }
    }
}

impl Backend for WgpuBackend {
    fn context(&self) -> &RenderContext {
        &self.ctx
    }

    fn worker_count(&self) -> usize {
        self.workers
    }

    fn pioneer(&self) -> RenderResult<()> {
        if let Some(size) = lock(&self.pending_resize).take() {
            self.resize(size)?;
        }
        let frame = self.acquire()?;
        if frame.is_none() {
            self.skipped.fetch_add(1, Ordering::AcqRel);
        }
        *lock(&self.frame) = frame;
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

        let mut recorder = WgpuRecorder::new(self.device.raw(), &format!("kiln worker {index}"));
        if index == 0 {
            StagedBuffer::gpu_copy(&self.ctx, &mut recorder)?;
            if let Some(frame) = lock(&self.frame).as_ref() {
                recorder.clear(&frame.view, self.ctx.config().clear_color);
            }
        }
        let hook = lock(&self.hook).clone();
        if let Some(hook) = hook {
            hook(index, &self.ctx, &mut recorder)?;
        }

        allocator.in_flight_fence = target;
        *lock(&self.recorded[index]) = Some(recorder.finish());
        Ok(())
    }

    fn assembler(&self) -> RenderResult<()> {
        let released = self.ctx.release_garbage();
        let buffers: Vec<wgpu::CommandBuffer> = self.recorded.iter().filter_map(|slot| lock(slot).take()).collect();
        self.device.queue().submit(buffers);

        if let Some(frame) = lock(&self.frame).take() {
            self.window.pre_present_notify();
            frame.surface_texture.present();
            self.presented.fetch_add(1, Ordering::AcqRel);
        }
        log::trace!("frame {}: {released} resources released", self.ctx.frame_index());
        self.ctx.next_frame()
    }

    fn request_resize(&self, width: u32, height: u32) {
        *lock(&self.pending_resize) = Some(PhysicalSize::new(width, height));
    }

    fn set_frame_hook(&self, hook: Option<FrameHook>) {
        *lock(&self.hook) = hook;
    }

    fn shutdown(&self) -> RenderResult<()> {
        // An acquired but unsubmitted image is dropped without presenting.
        lock(&self.frame).take();
        self.ctx.flush_queue()?;
        let released = self.ctx.release_garbage();
        log::debug!("wgpu backend drained, {released} resources released");
        Ok(())
    }
}
