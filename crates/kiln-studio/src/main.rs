mod scene;

use std::time::Duration;

use anyhow::{Context, Result};
use kiln_engine::RenderContext;
use kiln_engine::backend::soft::SoftInit;
use kiln_engine::config::RendererConfig;
use kiln_engine::core::{App, AppControl, FrameCtx};
use kiln_engine::frame::{BackendKind, FrameDriver, create_backend};
use kiln_engine::logging::{LoggingConfig, init_logging};
use kiln_engine::time::FramePacer;
use kiln_engine::window::{Runtime, RuntimeConfig};

use scene::Scene;

/// Windowed demo: animates the scene every frame.
struct Studio {
    scene: Option<Scene>,
}

impl App for Studio {
    fn on_start(&mut self, ctx: &RenderContext) -> Result<()> {
        self.scene = Some(Scene::new(ctx)?);
        Ok(())
    }

    fn on_frame(&mut self, ctx: &mut FrameCtx<'_>) -> AppControl {
        let Some(scene) = self.scene.as_mut() else {
            return AppControl::Exit;
        };
        match scene.update(ctx.render(), ctx.time.dt, ctx.time.frame_index) {
            Ok(()) => AppControl::Continue,
            Err(err) => {
                log::error!("scene update failed: {err:#}");
                AppControl::Exit
            }
        }
    }
}

/// Runs `frames` frames on the software backend without a window.
///
/// Returns how many released resources were still awaiting the GPU at exit.
fn run_headless(frames: u64) -> Result<usize> {
    let backend = create_backend(BackendKind::Soft(SoftInit::headless(640, 360)), RendererConfig::default())?;
    let ctx = backend.context();
    let mut scene = Scene::new(ctx)?;

    let mut driver = FrameDriver::new(backend.clone());
    driver.launch()?;
    let mut pacer = FramePacer::new(Duration::from_secs(1));
    for _ in 0..frames {
        let (time, report) = pacer.tick();
        if let Some(report) = report {
            log::info!(
                "{:.1} fps, average {:.3} ms, worst {:.3} ms",
                report.fps(),
                report.average.as_secs_f64() * 1e3,
                report.worst.as_secs_f64() * 1e3
            );
        }
        driver.wait_idle();
        scene.update(ctx, time.dt, time.frame_index)?;
        driver.commit().context("frame commit failed")?;
    }

    // Retired resources are freed once the frame after their release completes.
    driver.wait_idle();
    scene.release(ctx)?;
    driver.commit().context("final frame commit failed")?;
    driver.terminate()?;

    let pending = ctx.pending_release_count();
    log::info!("{} frames done, {pending} resources awaiting release", driver.frames_completed());
    Ok(pending)
}

fn main() -> Result<()> {
    init_logging(LoggingConfig::default());

    let mut args = std::env::args().skip(1);
    match args.next().as_deref() {
        Some("--headless") => {
            let frames = match args.next() {
                Some(arg) => arg.parse().with_context(|| format!("invalid frame count {arg:?}"))?,
                None => 600,
            };
            run_headless(frames).map(drop)
        }
        Some(other) => anyhow::bail!("unknown argument {other:?} (expected --headless [frames])"),
        None => Runtime::run(
            RuntimeConfig {
                title: "kiln studio".to_string(),
                ..Default::default()
            },
            Studio { scene: None },
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── headless run ──────────────────────────────────────────────────────

    #[test]
    fn headless_run_frees_the_scene() {
        assert_eq!(run_headless(3).unwrap(), 0);
    }
}
