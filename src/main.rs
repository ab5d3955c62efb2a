use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use ridelane::config::RideLaneConfig;
use ridelane::frame_slot::RawFrame;
use ridelane::lane::DetectorKind;
use ridelane::pipeline::{FrameOutput, FrameProcessor, LaneResult, LaneSession};
use ridelane::synthetic::{encode_jpeg, SyntheticRoad};

#[derive(Parser)]
#[command(name = "ridelane")]
#[command(about = "Lane guidance overlay for a helmet camera MJPEG stream")]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Camera host, or any URL whose host should be used
    #[arg(long)]
    host: Option<String>,

    /// Full stream URL, overrides host/port/path
    #[arg(short, long)]
    url: Option<String>,

    /// Lane detector implementation
    #[arg(short, long, value_enum)]
    detector: Option<DetectorKind>,

    /// Stop after this many processed frames
    #[arg(short, long)]
    frames: Option<u64>,

    /// Write the last composited frame to this file on exit
    #[arg(long)]
    snapshot: Option<PathBuf>,

    /// Print one JSON line per processed frame
    #[arg(long)]
    json: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Run the processing benchmark on synthetic frames
    #[arg(long)]
    benchmark: bool,

    /// Number of benchmark iterations
    #[arg(long, default_value = "200")]
    benchmark_iterations: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.verbose { "debug" } else { "info" };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(format!("ridelane={}", log_level))
        .with_writer(std::io::stderr)
        .try_init();

    let mut config = RideLaneConfig::load(&args.config).await?;
    apply_overrides(&args, &mut config);
    info!("Configuration loaded from {}", args.config);

    if args.benchmark {
        info!("Starting benchmark mode");
        return run_benchmark(&config, args.benchmark_iterations);
    }

    run_stream(&args, config).await
}

fn apply_overrides(args: &Args, config: &mut RideLaneConfig) {
    if let Some(host) = &args.host {
        if host.contains("://") {
            if !config.stream.set_host_from_url(host) {
                warn!("Could not read a host from {}, keeping {}", host, config.stream.host);
            }
        } else {
            config.stream.host = host.clone();
        }
    }
    if let Some(url) = &args.url {
        config.stream.url = Some(url.clone());
    }
    if let Some(kind) = args.detector {
        config.detector.kind = kind;
    }
    if args.snapshot.is_some() {
        config.overlay.composite = true;
    }
}

async fn run_stream(args: &Args, config: RideLaneConfig) -> Result<()> {
    let url = config.stream.stream_url();
    let mut session = LaneSession::new(config)?;
    let mut outputs = session.subscribe_output();
    let mut status = session.subscribe_status();
    session.start(url);

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut received: u64 = 0;
    let mut last_composited: Option<Arc<FrameOutput>> = None;

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                info!("Interrupted, shutting down");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = status.borrow_and_update().clone();
                info!("Stream status: {:?}", current);
            }
            changed = outputs.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(output) = outputs.borrow_and_update().clone() else {
                    continue;
                };
                received += 1;
                report(&output, args.json)?;
                if output.image.is_some() {
                    last_composited = Some(output);
                }
                if args.frames.is_some_and(|limit| received >= limit) {
                    info!("Reached {} frames", received);
                    break;
                }
            }
        }
    }

    session.stop().await;
    let stats = session.stats();
    info!(
        "Processed {} frames ({} decode errors), reader delivered {}, slot dropped {}",
        stats.processed, stats.decode_errors, stats.reader.frames, stats.slot.dropped
    );
    debug!("Session stats: {}", serde_json::to_string(&stats)?);

    if let Some(path) = &args.snapshot {
        match last_composited.as_ref().and_then(|o| o.image.as_ref()) {
            Some(image) => {
                image.save(path)?;
                info!("Snapshot written to {}", path.display());
            }
            None => warn!("No composited frame to write to {}", path.display()),
        }
    }

    Ok(())
}

fn report(output: &FrameOutput, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(output)?);
        return Ok(());
    }
    match &output.result {
        LaneResult::Overlay(overlay) => debug!(
            "frame {}: left {}, right {} ({:.1} ms)",
            output.sequence,
            overlay.left.is_some(),
            overlay.right.is_some(),
            output.processing_ms
        ),
        LaneResult::NoLaneModel => debug!("frame {}: no lane model", output.sequence),
    }
    Ok(())
}

fn run_benchmark(config: &RideLaneConfig, iterations: usize) -> Result<()> {
    let mut rng = rand::thread_rng();
    let (width, height) = (1280, 720);

    info!("Encoding synthetic {}x{} frames", width, height);
    let mut frames = Vec::new();
    for i in 0..8 {
        let drift = i as f64 * 4.0;
        let mut road = SyntheticRoad::straight(width, height, 400.0 + drift, 880.0 + drift);
        road.stripe_width = 12;
        road.lines[0].0 += 120.0;
        road.lines[1].0 -= 120.0;
        let image = road.render_noisy(&mut rng, 24);
        frames.push(RawFrame::new(encode_jpeg(&image, 80)?.into(), i as u64 + 1));
    }

    let mut processor = FrameProcessor::new(config);
    info!(
        "Running {} iterations with the {} detector",
        iterations,
        processor.detector_name()
    );

    let start = Instant::now();
    let mut with_model = 0usize;
    for i in 0..iterations {
        match processor.process_raw(&frames[i % frames.len()]) {
            Ok(output) => {
                if output.overlay().is_some() {
                    with_model += 1;
                }
            }
            Err(e) => error!("Benchmark frame failed: {}", e),
        }
        if i % 50 == 0 {
            debug!("Benchmark progress: {}/{}", i + 1, iterations);
        }
    }

    let duration = start.elapsed();
    let fps = iterations as f64 / duration.as_secs_f64();
    info!("Benchmark completed in {:.2?}", duration);
    info!("Performance: {:.2} frames/second ({:.2} ms/frame)", fps, 1000.0 / fps);
    info!("Frames with a lane model: {}/{}", with_model, iterations);

    Ok(())
}
