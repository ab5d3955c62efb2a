use anyhow::Result;
use image::RgbImage;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::config::RideLaneConfig;
use crate::decode::{DecodedFrame, FrameDecoder};
use crate::error::DecodeError;
use crate::frame_slot::{LatestFrameSlot, RawFrame, SlotStats};
use crate::lane::{build_detector, LaneDetector, LaneMeasurement};
use crate::overlay::{LaneOverlay, OverlayRenderer, Projection};
use crate::stream::{ReaderStatsSnapshot, StreamEnd, StreamReader, StreamStatus};
use crate::track::LaneTracker;

/// What the display should show for one processed frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaneResult {
    Overlay(LaneOverlay),
    /// Neither side has been tracked yet
    NoLaneModel,
}

#[derive(Debug, Clone, Serialize)]
pub struct FrameOutput {
    pub sequence: u64,
    pub source_index: u64,
    pub result: LaneResult,
    pub measurement: LaneMeasurement,
    pub full_width: u32,
    pub full_height: u32,
    pub processing_ms: f64,
    /// Full-resolution frame with the overlay drawn in, when compositing
    #[serde(skip)]
    pub image: Option<RgbImage>,
}

impl FrameOutput {
    pub fn overlay(&self) -> Option<&LaneOverlay> {
        match &self.result {
            LaneResult::Overlay(overlay) => Some(overlay),
            LaneResult::NoLaneModel => None,
        }
    }
}

/// Decode, detect, track and render for one frame at a time. Owns all
/// per-session processing state, including the tracks.
pub struct FrameProcessor {
    decoder: FrameDecoder,
    detector: Box<dyn LaneDetector>,
    tracker: LaneTracker,
    renderer: OverlayRenderer,
    composite: bool,
}

impl FrameProcessor {
    pub fn new(config: &RideLaneConfig) -> Self {
        Self {
            decoder: FrameDecoder::new(&config.processing, config.overlay.composite),
            detector: build_detector(&config.detector),
            tracker: LaneTracker::new(&config.tracker),
            renderer: OverlayRenderer::new(&config.overlay),
            composite: config.overlay.composite,
        }
    }

    pub fn detector_name(&self) -> &'static str {
        self.detector.name()
    }

    pub fn tracker(&self) -> &LaneTracker {
        &self.tracker
    }

    pub fn reset(&mut self) {
        self.tracker.reset();
    }

    pub fn process_raw(&mut self, raw: &RawFrame) -> Result<FrameOutput, DecodeError> {
        let started = Instant::now();
        let frame = self.decoder.decode(raw)?;
        Ok(self.process_timed(frame, started))
    }

    pub fn process_decoded(&mut self, frame: DecodedFrame) -> FrameOutput {
        self.process_timed(frame, Instant::now())
    }

    fn process_timed(&mut self, frame: DecodedFrame, started: Instant) -> FrameOutput {
        let measurement = self.detector.detect(&frame);
        self.tracker.update(&measurement, frame.width() as f64);

        let (left, right) = self.tracker.models();
        let mut image = None;
        let result = if left.is_none() && right.is_none() {
            LaneResult::NoLaneModel
        } else {
            let projection = Projection {
                span: measurement.span(),
                scale_x: frame.scale_x(),
                scale_y: frame.scale_y(),
                full_width: frame.full_width,
                full_height: frame.full_height,
            };
            let overlay = self.renderer.render(left, right, &projection);
            if self.composite {
                if let Some(mut full) = frame.full {
                    self.renderer.composite(&overlay, &mut full);
                    image = Some(full);
                }
            }
            LaneResult::Overlay(overlay)
        };

        FrameOutput {
            sequence: frame.sequence,
            source_index: frame.source_index,
            result,
            measurement,
            full_width: frame.full_width,
            full_height: frame.full_height,
            processing_ms: started.elapsed().as_secs_f64() * 1000.0,
            image,
        }
    }
}

#[derive(Debug, Default)]
struct ProcessingCounters {
    processed: AtomicU64,
    decode_errors: AtomicU64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct SessionStats {
    pub reader: ReaderStatsSnapshot,
    pub slot: SlotStats,
    pub processed: u64,
    pub decode_errors: u64,
}

struct RunningTasks {
    url: String,
    shutdown: watch::Sender<bool>,
    reader: JoinHandle<()>,
    processor: JoinHandle<Option<FrameProcessor>>,
}

/// Caller-owned handle over one camera stream: a reader task filling the
/// latest-frame slot and a processor task turning frames into overlays.
pub struct LaneSession {
    config: RideLaneConfig,
    reader: Arc<StreamReader>,
    slot: Arc<LatestFrameSlot>,
    counters: Arc<ProcessingCounters>,
    status_tx: Arc<watch::Sender<StreamStatus>>,
    output_tx: Arc<watch::Sender<Option<Arc<FrameOutput>>>>,
    processor: Option<FrameProcessor>,
    running: Option<RunningTasks>,
}

impl LaneSession {
    pub fn new(config: RideLaneConfig) -> Result<Self> {
        let reader = StreamReader::new(config.stream.clone())?;
        let (status_tx, _) = watch::channel(StreamStatus::Idle);
        let (output_tx, _) = watch::channel(None);
        let processor = FrameProcessor::new(&config);
        info!("Lane session ready (detector: {})", processor.detector_name());

        Ok(Self {
            config,
            reader: Arc::new(reader),
            slot: Arc::new(LatestFrameSlot::new()),
            counters: Arc::new(ProcessingCounters::default()),
            status_tx: Arc::new(status_tx),
            output_tx: Arc::new(output_tx),
            processor: Some(processor),
            running: None,
        })
    }

    pub fn config(&self) -> &RideLaneConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn current_url(&self) -> Option<&str> {
        self.running.as_ref().map(|r| r.url.as_str())
    }

    /// Spawn the reader and processor tasks. Must be called inside a tokio
    /// runtime. Does nothing if the session is already running.
    pub fn start(&mut self, url: impl Into<String>) {
        let url = url.into();
        if let Some(running) = &self.running {
            warn!("Session already streaming from {}, ignoring start", running.url);
            return;
        }

        let processor = self
            .processor
            .take()
            .unwrap_or_else(|| FrameProcessor::new(&self.config));
        let (shutdown, shutdown_rx) = watch::channel(false);

        let reader = tokio::spawn(run_reader(
            self.reader.clone(),
            url.clone(),
            self.slot.clone(),
            self.status_tx.clone(),
            shutdown_rx.clone(),
        ));
        let processor = tokio::spawn(run_processor(
            processor,
            self.slot.clone(),
            self.output_tx.clone(),
            self.counters.clone(),
            self.config.processing.max_fps,
            shutdown_rx,
        ));

        info!("Lane session started for {}", url);
        self.running = Some(RunningTasks {
            url,
            shutdown,
            reader,
            processor,
        });
    }

    /// Signal both tasks, wait for them to finish and drop the tracks.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.shutdown.send(true);

        if let Err(e) = running.reader.await {
            error!("Reader task failed: {}", e);
        }
        match running.processor.await {
            Ok(processor) => self.processor = processor,
            Err(e) => error!("Processor task failed: {}", e),
        }
        // Tracks belong to the source that was just stopped.
        if let Some(processor) = self.processor.as_mut() {
            processor.reset();
        }
        self.slot.clear();

        self.status_tx.send_replace(StreamStatus::Stopped);
        info!("Lane session stopped");
    }

    /// Switch to another source. Tracks and any pending frame are discarded.
    pub async fn restart(&mut self, url: impl Into<String>) {
        self.stop().await;
        self.start(url);
    }

    pub fn subscribe_output(&self) -> watch::Receiver<Option<Arc<FrameOutput>>> {
        self.output_tx.subscribe()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<StreamStatus> {
        self.status_tx.subscribe()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            reader: self.reader.stats(),
            slot: self.slot.stats(),
            processed: self.counters.processed.load(Ordering::Relaxed),
            decode_errors: self.counters.decode_errors.load(Ordering::Relaxed),
        }
    }
}

impl Drop for LaneSession {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            let _ = running.shutdown.send(true);
        }
    }
}

async fn run_reader(
    reader: Arc<StreamReader>,
    url: String,
    slot: Arc<LatestFrameSlot>,
    status: Arc<watch::Sender<StreamStatus>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let config = reader.config().clone();
    loop {
        if *shutdown.borrow() {
            break;
        }

        // One connection attempt, runs until the stream ends or fails
        let (reason, delay_ms) = match reader.stream_once(&url, &slot, &status, &mut shutdown).await {
            Ok(StreamEnd::Cancelled) => break,
            Ok(StreamEnd::EndOfStream) => {
                info!("Camera stream ended, reconnecting");
                ("stream ended".to_string(), config.reconnect_delay_ms)
            }
            Err(e) => {
                warn!("Camera stream error: {}", e);
                (e.to_string(), config.error_backoff_ms)
            }
        };

        if *shutdown.borrow() {
            break;
        }
        // Report the pause, then wait before reconnecting
        status.send_replace(StreamStatus::Reconnecting { reason, delay_ms });

        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
        }
    }
    debug!("Reader task exiting");
}

async fn run_processor(
    mut processor: FrameProcessor,
    slot: Arc<LatestFrameSlot>,
    output: Arc<watch::Sender<Option<Arc<FrameOutput>>>>,
    counters: Arc<ProcessingCounters>,
    max_fps: u32,
    mut shutdown: watch::Receiver<bool>,
) -> Option<FrameProcessor> {
    let min_interval = (max_fps > 0).then(|| Duration::from_secs_f64(1.0 / max_fps as f64));
    let mut last_start: Option<Instant> = None;
    let mut frame_count: u64 = 0;
    let mut last_stats_time = Instant::now();

    loop {
        if *shutdown.borrow() {
            break;
        }

        // Respect the processing rate cap
        if let (Some(interval), Some(last)) = (min_interval, last_start) {
            let elapsed = last.elapsed();
            if elapsed < interval {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => break,
                    _ = tokio::time::sleep(interval - elapsed) => {}
                }
            }
        }

        // Wait for the newest frame from the reader
        let raw = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            raw = slot.take_latest() => raw,
        };
        last_start = Some(Instant::now());

        // Decode and detect on the blocking pool
        let joined = tokio::task::spawn_blocking(move || {
            let result = processor.process_raw(&raw);
            (processor, result)
        })
        .await;

        let result = match joined {
            Ok((returned, result)) => {
                processor = returned;
                result
            }
            Err(e) => {
                error!("Frame processing task failed: {}", e);
                return None;
            }
        };

        match result {
            Ok(frame) => {
                counters.processed.fetch_add(1, Ordering::Relaxed);
                output.send_replace(Some(Arc::new(frame)));

                // Log performance stats every 100 frames
                frame_count += 1;
                if frame_count % 100 == 0 {
                    let elapsed = last_stats_time.elapsed();
                    let fps = 100.0 / elapsed.as_secs_f32();
                    info!("Processed {} frames, current FPS: {:.2}", frame_count, fps);
                    last_stats_time = Instant::now();
                }
            }
            Err(e) => {
                counters.decode_errors.fetch_add(1, Ordering::Relaxed);
                debug!("Skipping frame: {}", e);
            }
        }
    }

    info!("Processor stopped after {} frames", frame_count);
    Some(processor)
}
