use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;

use crate::lane::DetectorKind;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RideLaneConfig {
    pub stream: StreamConfig,
    pub processing: ProcessingConfig,
    pub detector: DetectorConfig,
    pub tracker: TrackerConfig,
    pub overlay: OverlayConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Camera host (helmet access point address)
    pub host: String,
    /// Streaming port, fixed on the camera side
    pub port: u16,
    /// Stream path on the camera web server
    pub path: String,
    /// Full URL override; when set, host/port/path are ignored
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Connect timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Maximum wait for a single chunk of the body in milliseconds
    pub read_timeout_ms: u64,
    /// Delay before reconnecting after the stream ended cleanly
    pub reconnect_delay_ms: u64,
    /// Delay before reconnecting after an error
    pub error_backoff_ms: u64,
    /// Pending input above this size is discarded to protect latency
    pub drain_threshold_bytes: usize,
    /// Upper bound for a frame scanned without a declared length
    pub max_frame_bytes: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Processing width in pixels
    pub width: u32,
    /// Processing height floor in pixels
    pub min_height: u32,
    /// Camera is mounted upside down
    pub rotate_180: bool,
    /// Processing rate cap, 0 disables the cap
    pub max_fps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub kind: DetectorKind,
    /// Gaussian smoothing sigma applied before the edge operator
    pub blur_sigma: f32,
    /// Hysteresis low threshold (L1 gradient magnitude)
    pub canny_low: f32,
    /// Hysteresis high threshold (L1 gradient magnitude)
    pub canny_high: f32,
    /// ROI top edge as a fraction of the frame height
    pub roi_top_ratio: f64,
    /// ROI top edge left corner as a fraction of the width
    pub roi_top_left_ratio: f64,
    /// ROI top edge right corner as a fraction of the width
    pub roi_top_right_ratio: f64,
    /// First histogram row as a fraction of the frame height
    pub hist_start_ratio: f64,
    /// Corridor half width as a fraction of the frame width
    pub corridor_width_ratio: f64,
    /// Corridor half width floor in pixels
    pub min_corridor_px: u32,
    /// Required |dy| / |dx| for a segment to count as a lane boundary
    pub vertical_ratio: f64,
    /// Minimum number of edge pixels in a segment
    pub min_segment_pixels: usize,
    /// Working width of the column-profile detector
    pub lite_width: u32,
    /// Bottom fraction of the frame used by the column-profile detector
    pub lite_roi_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Position gain
    pub alpha: f64,
    /// Velocity gain
    pub beta: f64,
    /// Maximum bottom displacement per frame as a fraction of the width
    pub max_step_ratio: f64,
    /// Maximum slope change per frame
    pub max_slope_delta: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// Number of segments per polyline
    pub steps: usize,
    /// Stroke thickness in full-resolution pixels
    pub line_thickness: u32,
    /// Stroke color
    pub line_color: [u8; 3],
    /// Draw the polylines onto the full-resolution frame
    pub composite: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            host: "10.42.0.1".to_string(),
            port: 5000,
            path: "/video_feed".to_string(),
            url: None,
            connect_timeout_ms: 4000,
            read_timeout_ms: 4000,
            reconnect_delay_ms: 500,
            error_backoff_ms: 800,
            drain_threshold_bytes: 16 * 1024,
            max_frame_bytes: 3_000_000,
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            width: 640,
            min_height: 360,
            rotate_180: true,
            max_fps: 0,
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            kind: DetectorKind::Corridor,
            blur_sigma: 1.1,
            canny_low: 60.0,
            canny_high: 180.0,
            roi_top_ratio: 0.35,
            roi_top_left_ratio: 0.30,
            roi_top_right_ratio: 0.70,
            hist_start_ratio: 0.70,
            corridor_width_ratio: 0.06,
            min_corridor_px: 8,
            vertical_ratio: 1.6,
            min_segment_pixels: 8,
            lite_width: 160,
            lite_roi_ratio: 0.40,
        }
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            alpha: 0.35,
            beta: 0.15,
            max_step_ratio: 0.04,
            max_slope_delta: 0.0018,
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            steps: 16,
            line_thickness: 4,
            line_color: [0, 255, 0],
            composite: false,
        }
    }
}

impl Default for RideLaneConfig {
    fn default() -> Self {
        Self {
            stream: StreamConfig::default(),
            processing: ProcessingConfig::default(),
            detector: DetectorConfig::default(),
            tracker: TrackerConfig::default(),
            overlay: OverlayConfig::default(),
        }
    }
}

impl StreamConfig {
    /// URL of the MJPEG feed.
    pub fn stream_url(&self) -> String {
        if let Some(url) = &self.url {
            return url.clone();
        }
        format!("http://{}:{}{}", self.host, self.port, normalize_path(&self.path))
    }

    /// Keeps only the host of `url`; the port stays fixed.
    pub fn set_host_from_url(&mut self, url: &str) -> bool {
        match host_from_url(url) {
            Some(host) => {
                self.host = host;
                true
            }
            None => false,
        }
    }
}

pub fn normalize_path(path: &str) -> String {
    if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Extract the host part of an `http://`, `https://` or `rtsp://` URL.
pub fn host_from_url(url: &str) -> Option<String> {
    let rest = url.split_once("://").map(|(_, rest)| rest)?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let authority = authority.rsplit('@').next()?;
    let host = if let Some(bracketed) = authority.strip_prefix('[') {
        bracketed.split(']').next()?
    } else {
        authority.split(':').next()?
    };

    if host.trim().is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}

impl RideLaneConfig {
    pub async fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            // Create default config file
            let default_config = Self::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            fs::write(path, toml_content).await?;
            return Ok(default_config);
        }

        let content = fs::read_to_string(path).await?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    pub async fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }
}
