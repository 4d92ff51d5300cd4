// SPDX-License-Identifier: CEPL-1.0
#![deny(unsafe_op_in_unsafe_fn)]
mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Result;
use clap::Parser;
use tracing::info;
use vkplay_core::{init_tracing, AbortOnFatal, FatalHandler, OrFatal, TracingSink};
use vkplay_platform::PlatformWindow;
use vkplay_render::{FrameOutcome, FrameRequest, Presenter, TickOutcome, VsyncToggle};
use vkplay_render_vk::{DeviceContext, ShaderSet, VkBackend};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (missing → defaults)
    #[arg(long, default_value = "vkplay.toml")]
    config: PathBuf,
    /// Start with vsync off regardless of the config
    #[arg(long)]
    no_vsync: bool,
    /// Print the Vulkan devices and exit
    #[arg(long)]
    list_devices: bool,
}

/// Presented frames per wall-clock second.
struct FpsCounter {
    frames: u32,
    since: Instant,
}

impl FpsCounter {
    fn new(now: Instant) -> Self {
        Self { frames: 0, since: now }
    }

    /// Returns the count once a second has elapsed, then starts over.
    fn tick(&mut self, outcome: TickOutcome, now: Instant) -> Option<u32> {
        if let TickOutcome::Frame(FrameOutcome::Presented { .. }) = outcome {
            self.frames = self.frames.saturating_add(1);
        }
        if now.duration_since(self.since) >= Duration::from_secs(1) {
            let fps = self.frames;
            self.frames = 0;
            self.since = now;
            Some(fps)
        } else {
            None
        }
    }
}

fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();
    let cfg = config::load_cfg(&args.config);
    let fatal: Arc<dyn FatalHandler> = Arc::new(AbortOnFatal);

    let vsync = VsyncToggle::new(cfg.render.vsync && !args.no_vsync);
    let mut window = PlatformWindow::create(
        cfg.window.width,
        cfg.window.height,
        &cfg.window.title,
        vsync.clone(),
    )
    .or_fatal(&*fatal);

    let ctx = DeviceContext::create(
        window.window(),
        &cfg.render.device_options(&cfg.window.title),
        Arc::new(TracingSink),
        fatal.clone(),
    )
    .or_fatal(&*fatal);

    if args.list_devices {
        for (i, d) in ctx.summaries().iter().enumerate() {
            let mark = if i == ctx.selected_index() { '*' } else { ' ' };
            println!("{mark} {i}: {d}");
        }
        return Ok(());
    }
    for d in ctx.summaries() {
        info!("device: {d}");
    }

    let shaders = match &cfg.render.shaders {
        Some(p) => ShaderSet::from_files(&p.vertex, &p.fragment),
        None => ShaderSet::builtin(),
    }
    .or_fatal(&*fatal);

    let backend = VkBackend::new(ctx, window.window(), window.window(), &shaders).or_fatal(&*fatal);
    let mut presenter = Presenter::new(backend, vsync, cfg.render.presenter_config());
    let frame = FrameRequest::triangle(cfg.render.clear_color);

    info!("vsync cfg = {} (press V to toggle)", presenter.vsync().get());
    let mut fps = FpsCounter::new(Instant::now());
    presenter
        .run(&mut window, &frame, |outcome| {
            if let Some(n) = fps.tick(outcome, Instant::now()) {
                info!("fps ~ {n}");
            }
        })
        .or_fatal(&*fatal);

    info!(
        "shutdown: {} frames presented, {} swapchain builds",
        presenter.scheduler().presented_frames(),
        presenter.rebuilds()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_presented_frames_per_second() {
        let t0 = Instant::now();
        let mut fps = FpsCounter::new(t0);
        let shown = TickOutcome::Frame(FrameOutcome::Presented { stale: false });
        for i in 0..5 {
            assert_eq!(fps.tick(shown, t0 + Duration::from_millis(100 * i)), None);
        }
        assert_eq!(fps.tick(TickOutcome::Idle, t0 + Duration::from_millis(700)), None);
        assert_eq!(
            fps.tick(shown, t0 + Duration::from_millis(1000)),
            Some(6)
        );
        assert_eq!(fps.tick(shown, t0 + Duration::from_millis(1500)), None);
    }

    #[test]
    fn cli_defaults() {
        let args = Args::parse_from(["vkplay"]);
        assert_eq!(args.config, PathBuf::from("vkplay.toml"));
        assert!(!args.no_vsync && !args.list_devices);
        let args = Args::parse_from(["vkplay", "--no-vsync", "--config", "x.toml"]);
        assert!(args.no_vsync);
        assert_eq!(args.config, PathBuf::from("x.toml"));
    }
}
