use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use winit::application::ApplicationHandler;
use winit::dpi::LogicalSize;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Window, WindowId};

use crate::backend::wgpu::{WgpuInit, WgpuTarget};
use crate::config::RendererConfig;
use crate::core::{App, AppControl, FrameCtx};
use crate::frame::{Backend, BackendKind, FrameDriver, create_backend};
use crate::time::FramePacer;

/// Window/runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub title: String,
    pub initial_size: LogicalSize<f64>,
    pub renderer: RendererConfig,
    pub wgpu: WgpuInit,
    /// How often frame pacing is logged.
    pub pacing_interval: Duration,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            title: "kiln".to_string(),
            initial_size: LogicalSize::new(1280.0, 720.0),
            renderer: RendererConfig::default(),
            wgpu: WgpuInit::default(),
            pacing_interval: Duration::from_secs(2),
        }
    }
}

/// Runtime context passed to the application.
///
/// Requests are applied after the current callback returns.
#[derive(Debug, Default)]
pub struct RuntimeCtx {
    exit: bool,
}

impl RuntimeCtx {
    pub fn exit(&mut self) {
        self.exit = true;
    }
}

/// Entry point for the runtime.
pub struct Runtime;

impl Runtime {
    /// Runs the event loop until the window closes or the app exits.
    ///
    /// Returns the first renderer error, if any.
    pub fn run<A>(config: RuntimeConfig, app: A) -> Result<()>
    where
        A: App + 'static,
    {
        let event_loop = EventLoop::new().context("failed to create winit EventLoop")?;
        let mut state = AppState::new(config, app);

        event_loop
            .run_app(&mut state)
            .context("winit event loop terminated with error")?;

        match state.error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// The window and the renderer driving it.
struct Session {
    window: Arc<Window>,
    backend: Arc<dyn Backend>,
    driver: FrameDriver,
    pacer: FramePacer,
}

struct AppState<A>
where
    A: App + 'static,
{
    config: RuntimeConfig,
    app: A,
    session: Option<Session>,
    started: bool,
    error: Option<anyhow::Error>,
}

impl<A> AppState<A>
where
    A: App + 'static,
{
    fn new(config: RuntimeConfig, app: A) -> Self {
        Self {
            config,
            app,
            session: None,
            started: false,
            error: None,
        }
    }

    fn start(&mut self, event_loop: &ActiveEventLoop) -> Result<()> {
        let attrs = Window::default_attributes()
            .with_title(self.config.title.clone())
            .with_inner_size(self.config.initial_size);
        let window = Arc::new(event_loop.create_window(attrs).context("failed to create window")?);

        let target = WgpuTarget::new(Arc::clone(&window)).with_init(self.config.wgpu.clone());
        let backend = create_backend(BackendKind::Wgpu(target), self.config.renderer.clone())
            .context("renderer initialization failed")?;
        self.app
            .on_start(backend.context())
            .context("application start failed")?;

        let mut driver = FrameDriver::new(Arc::clone(&backend));
        driver.launch().context("failed to launch frame workers")?;
        window.request_redraw();

        self.session = Some(Session {
            window,
            backend,
            driver,
            pacer: FramePacer::new(self.config.pacing_interval),
        });
        self.started = true;
        Ok(())
    }

    /// Terminates the driver and tears the session down.
    fn stop(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut session) = self.session.take() {
            if let Err(err) = session.driver.terminate() {
                log::error!("renderer terminated with error: {err}");
                self.error.get_or_insert(err.into());
            }
            log::info!("{} frames rendered", session.driver.frames_completed());
            drop(session);
            self.app.on_exit();
        }
        event_loop.exit();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, err: anyhow::Error) {
        log::error!("{err:#}");
        self.error.get_or_insert(err);
        self.stop(event_loop);
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let (time, report) = session.pacer.tick();
        if let Some(report) = report {
            log::info!(
                "{:.1} fps, average {:.2} ms, worst {:.2} ms over {} frames",
                report.fps(),
                report.average.as_secs_f64() * 1e3,
                report.worst.as_secs_f64() * 1e3,
                report.frames
            );
        }

        session.driver.wait_idle();
        let mut runtime = RuntimeCtx::default();
        let control = {
            let mut ctx = FrameCtx {
                window: &session.window,
                backend: session.backend.as_ref(),
                time,
                runtime: &mut runtime,
            };
            self.app.on_frame(&mut ctx)
        };
        if control == AppControl::Exit || runtime.exit {
            self.stop(event_loop);
            return;
        }

        if let Err(err) = session.driver.commit() {
            self.fail(event_loop, anyhow::Error::new(err).context("frame commit failed"));
        }
    }
}

impl<A> ApplicationHandler for AppState<A>
where
    A: App + 'static,
{
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.started {
            if let Some(session) = self.session.as_mut() {
                session.pacer.reset();
            }
            return;
        }
        if let Err(err) = self.start(event_loop) {
            self.fail(event_loop, err);
        }
    }

    fn about_to_wait(&mut self, event_loop: &ActiveEventLoop) {
        event_loop.set_control_flow(ControlFlow::Wait);

        // Continuous redraw; FIFO presentation and the fence pace the loop.
        if let Some(session) = &self.session {
            session.window.request_redraw();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, window_id: WindowId, event: WindowEvent) {
        let Some(session) = &self.session else {
            return;
        };
        if session.window.id() != window_id {
            return;
        }
        if self.app.on_window_event(&event) == AppControl::Exit {
            self.stop(event_loop);
            return;
        }

        match event {
            WindowEvent::CloseRequested => self.stop(event_loop),
            WindowEvent::Resized(size) => {
                log::debug!("window resized to {}x{}", size.width, size.height);
                session.backend.request_resize(size.width, size.height);
            }
            WindowEvent::ScaleFactorChanged { .. } => {
                let size = session.window.inner_size();
                session.backend.request_resize(size.width, size.height);
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => {}
        }
    }
}
