mod scene;

use anyhow::{anyhow, bail, Result};
use kiln::{
    create_device, BackendKind, CommandQueue, Config, Device, Presenter, RecordingDevice,
};
use std::{
    path::PathBuf,
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use tracing::{info, warn};

use crate::scene::QuadScene;

const USAGE: &str = "usage: kiln-bench [CONFIG.json] [--frames N] [--fps N] [--trace OUT.json]";

struct Options {
    config: Option<PathBuf>,
    frames: u64,
    /// Target frame rate. Frames are not paced if `None`.
    fps: Option<f64>,
    trace: Option<PathBuf>,
}

impl Options {
    fn parse(mut args: impl Iterator<Item = String>) -> Result<Options> {
        let mut options = Options {
            config: None,
            frames: 120,
            fps: None,
            trace: None,
        };
        while let Some(arg) = args.next() {
            let mut value = |name: &str| args.next().ok_or_else(|| anyhow!("missing value for {}", name));
            match arg.as_str() {
                "--frames" => options.frames = value("--frames")?.parse()?,
                "--fps" => options.fps = Some(value("--fps")?.parse()?),
                "--trace" => options.trace = Some(value("--trace")?.into()),
                "--help" | "-h" => bail!(USAGE),
                _ if arg.starts_with("--") => bail!("unknown option `{}`\n{}", arg, USAGE),
                _ => options.config = Some(arg.into()),
            }
        }
        Ok(options)
    }
}

fn run(device: Arc<dyn Device>, config: &Config, options: &Options) -> Result<()> {
    let queue = Arc::new(CommandQueue::new(device, config.queue)?);
    let scene = QuadScene::new(&queue, &config.surface.unwrap_or_default())?;
    let mut presenter = Presenter::new(queue.clone(), Box::new(scene));

    let frame_interval = options.fps.map(|fps| Duration::from_secs_f64(1.0 / fps));
    let start = Instant::now();
    let mut next_frame = start;
    for _ in 0..options.frames {
        presenter.tick();
        if let Some(interval) = frame_interval {
            next_frame += interval;
            if let Some(wait) = next_frame.checked_duration_since(Instant::now()) {
                thread::sleep(wait);
            }
        }
    }
    queue.finish();
    let elapsed = start.elapsed();

    let stats = queue.stats();
    info!(?stats, "done");
    println!(
        "{} frames presented in {:.2?} ({:.1} frames/s)",
        presenter.frames_presented(),
        elapsed,
        presenter.frames_presented() as f64 / elapsed.as_secs_f64()
    );
    println!(
        "operations: {}, flushes: {}, windows: {}, command buffers: {}, render encoders: {}, events: {}",
        stats.operations,
        stats.flushes,
        stats.windows,
        stats.command_buffers,
        stats.render_encoders,
        stats.events
    );
    Ok(())
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let options = Options::parse(std::env::args().skip(1))?;
    let config = match &options.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let surface = config.surface.unwrap_or_default();
    info!(backend = ?config.backend, ?surface, queue = ?config.queue, "starting");

    match (config.backend, &options.trace) {
        (BackendKind::Recording, Some(path)) => {
            let device = Arc::new(RecordingDevice::new()?.with_surface(&surface));
            run(device.clone(), &config, &options)?;
            device.dump_trace(path)?;
            info!(path = %path.display(), "wrote trace");
        }
        (backend, trace) => {
            if trace.is_some() {
                warn!(?backend, "trace dumps need the recording backend");
            }
            run(create_device(backend, Some(surface))?, &config, &options)?;
        }
    }
    Ok(())
}
