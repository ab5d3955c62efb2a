use bytes::Bytes;
use futures::{FutureExt, Stream, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::parser::{MjpegParser, StreamFormat};
use super::StreamStatus;
use crate::config::StreamConfig;
use crate::error::StreamError;
use crate::frame_slot::{LatestFrameSlot, RawFrame};

/// Upper bound on chunks gathered without waiting before the parser runs.
const MAX_BATCH_CHUNKS: usize = 64;

/// Why a stream attempt returned without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEnd {
    /// The source closed the body or sent the closing boundary.
    EndOfStream,
    /// Shutdown was requested.
    Cancelled,
}

#[derive(Debug, Default)]
pub struct ReaderStats {
    connects: AtomicU64,
    frames: AtomicU64,
    superseded: AtomicU64,
    malformed: AtomicU64,
    oversized: AtomicU64,
    skipped_parts: AtomicU64,
    drained_bytes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReaderStatsSnapshot {
    pub connects: u64,
    /// Frames handed to the slot
    pub frames: u64,
    /// Complete frames dropped because a newer one arrived in the same batch
    pub superseded: u64,
    pub malformed: u64,
    pub oversized: u64,
    pub skipped_parts: u64,
    /// Input bytes thrown away to keep latency bounded
    pub drained_bytes: u64,
}

impl ReaderStats {
    pub fn snapshot(&self) -> ReaderStatsSnapshot {
        ReaderStatsSnapshot {
            connects: self.connects.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            superseded: self.superseded.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            oversized: self.oversized.load(Ordering::Relaxed),
            skipped_parts: self.skipped_parts.load(Ordering::Relaxed),
            drained_bytes: self.drained_bytes.load(Ordering::Relaxed),
        }
    }

    fn absorb(&self, parser: &mut MjpegParser) {
        let delta = parser.take_stats();
        self.drained_bytes.fetch_add(delta.drained_bytes, Ordering::Relaxed);
        self.malformed.fetch_add(delta.malformed, Ordering::Relaxed);
        self.oversized.fetch_add(delta.oversized, Ordering::Relaxed);
        self.skipped_parts.fetch_add(delta.skipped_parts, Ordering::Relaxed);
    }
}

/// Knobs for [`pump`], split out of [`StreamConfig`] so tests can drive it
/// without an HTTP client.
#[derive(Debug, Clone, Copy)]
pub struct PumpOptions {
    pub drain_threshold: usize,
    pub read_timeout: Duration,
}

impl From<&StreamConfig> for PumpOptions {
    fn from(config: &StreamConfig) -> Self {
        Self {
            drain_threshold: config.drain_threshold_bytes,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
        }
    }
}

/// Move bytes from `stream` through `parser` into `slot` until the stream
/// ends, fails, or shutdown is signalled.
pub async fn pump<S>(
    stream: S,
    parser: &mut MjpegParser,
    slot: &LatestFrameSlot,
    options: PumpOptions,
    stats: &ReaderStats,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<StreamEnd, StreamError>
where
    S: Stream<Item = Result<Bytes, StreamError>>,
{
    tokio::pin!(stream);

    loop {
        if *shutdown.borrow() {
            return Ok(StreamEnd::Cancelled);
        }

        // Wait for the next chunk, bounded by the read timeout
        let first = tokio::select! {
            biased;
            _ = shutdown.changed() => return Ok(StreamEnd::Cancelled),
            next = tokio::time::timeout(options.read_timeout, stream.next()) => match next {
                Err(_) => return Err(StreamError::ReadTimeout(options.read_timeout.as_millis() as u64)),
                Ok(None) => return Ok(StreamEnd::EndOfStream),
                Ok(Some(chunk)) => chunk?,
            },
        };
        parser.feed(&first);

        // Pick up whatever else is already buffered without waiting
        let mut ended = false;
        let mut failure = None;
        for _ in 0..MAX_BATCH_CHUNKS {
            match stream.next().now_or_never() {
                Some(Some(Ok(chunk))) => parser.feed(&chunk),
                Some(Some(Err(e))) => {
                    failure = Some(e);
                    break;
                }
                Some(None) => {
                    ended = true;
                    break;
                }
                None => break,
            }
        }

        // Split frames, skipping stale backlog between them
        let mut latest = None;
        loop {
            let drained = parser.drain_to(options.drain_threshold);
            if drained > 0 {
                debug!(
                    "input backlog over {} bytes, skipped {} bytes",
                    options.drain_threshold, drained
                );
            }
            let Some(frame) = parser.next_frame() else {
                break;
            };
            if latest.replace(frame).is_some() {
                stats.superseded.fetch_add(1, Ordering::Relaxed);
            }
        }
        stats.absorb(parser);

        // Only the newest complete frame of the batch reaches the slot
        if let Some(data) = latest {
            let index = stats.frames.fetch_add(1, Ordering::Relaxed) + 1;
            slot.publish(RawFrame::new(data, index));
        }

        if let Some(e) = failure {
            return Err(e);
        }
        if ended || parser.is_finished() {
            return Ok(StreamEnd::EndOfStream);
        }
    }
}

pub struct StreamReader {
    config: StreamConfig,
    client: reqwest::Client,
    stats: ReaderStats,
}

impl StreamReader {
    pub fn new(config: StreamConfig) -> Result<Self, StreamError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::CACHE_CONTROL,
            reqwest::header::HeaderValue::from_static("no-cache, no-store, must-revalidate"),
        );
        headers.insert(
            reqwest::header::PRAGMA,
            reqwest::header::HeaderValue::from_static("no-cache"),
        );
        headers.insert(
            reqwest::header::ACCEPT,
            reqwest::header::HeaderValue::from_static("multipart/x-mixed-replace, image/jpeg"),
        );

        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .tcp_nodelay(true)
            .user_agent("ridelane/0.1")
            .default_headers(headers)
            .build()
            .map_err(|e| StreamError::Client(e.to_string()))?;

        Ok(Self {
            config,
            client,
            stats: ReaderStats::default(),
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    pub fn stats(&self) -> ReaderStatsSnapshot {
        self.stats.snapshot()
    }

    /// One connection attempt: connect, then publish frames until the stream
    /// ends, fails, or shutdown is signalled.
    pub async fn stream_once(
        &self,
        url: &str,
        slot: &LatestFrameSlot,
        status: &watch::Sender<StreamStatus>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<StreamEnd, StreamError> {
        status.send_replace(StreamStatus::Connecting {
            url: url.to_string(),
        });
        self.stats.connects.fetch_add(1, Ordering::Relaxed);
        debug!("Connecting to {}", url);

        // Connect, giving up after the connect timeout
        let connect_timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let response = tokio::select! {
            biased;
            _ = shutdown.changed() => return Ok(StreamEnd::Cancelled),
            sent = tokio::time::timeout(connect_timeout, self.client.get(url).send()) => match sent {
                Err(_) => return Err(StreamError::ConnectTimeout(self.config.connect_timeout_ms)),
                Ok(result) => result.map_err(StreamError::Connect)?,
            },
        };

        if !response.status().is_success() {
            warn!("Camera stream answered {}", response.status());
            return Err(StreamError::Status(response.status().as_u16()));
        }

        // Pick the framing from the response headers
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let format = StreamFormat::from_content_type(content_type.as_deref());
        info!("Streaming from {} ({})", url, format);
        status.send_replace(StreamStatus::Streaming {
            format: format.to_string(),
        });

        let mut parser = MjpegParser::new(format, self.config.max_frame_bytes);
        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(StreamError::Read));

        pump(
            body,
            &mut parser,
            slot,
            PumpOptions::from(&self.config),
            &self.stats,
            shutdown,
        )
        .await
    }
}
