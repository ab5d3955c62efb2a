use image::imageops::{self, FilterType};

use super::{LaneDetector, LaneMeasurement, SideMeasurement};
use crate::config::DetectorConfig;
use crate::decode::DecodedFrame;

/// Minimum lane width as a fraction of the working width.
const MIN_SEPARATION_RATIO: f64 = 0.2;

/// Cheap estimator: strongest column-brightness step in each half of the
/// bottom band of a downscaled frame. Reports vertical boundaries only.
pub struct ColumnProfileDetector {
    width: u32,
    roi_ratio: f64,
    column_mean: Vec<f64>,
    diff: Vec<f64>,
}

impl ColumnProfileDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        Self {
            width: config.lite_width.max(8),
            roi_ratio: config.lite_roi_ratio.clamp(0.0, 1.0),
            column_mean: Vec::new(),
            diff: Vec::new(),
        }
    }

    /// Index of the largest nonzero |diff| in `[from, to]`, clamped to
    /// `[1, len-2]`. A flat profile has no step.
    fn argmax_abs(&self, from: usize, to: usize) -> Option<usize> {
        let lo = from.max(1);
        let hi = to.min(self.diff.len().saturating_sub(2));
        let mut best = None;
        let mut best_value = 0.0;
        for i in lo..=hi {
            let v = self.diff[i].abs();
            if v > best_value {
                best_value = v;
                best = Some(i);
            }
        }
        best
    }
}

impl LaneDetector for ColumnProfileDetector {
    fn name(&self) -> &'static str {
        "column-profile"
    }

    fn detect(&mut self, frame: &DecodedFrame) -> LaneMeasurement {
        let (w, h) = frame.image.dimensions();
        let y_top = h as f64 * (1.0 - self.roi_ratio);
        let y_bottom = h as f64;
        if w < 8 || h < 8 {
            return LaneMeasurement::missing(y_top, y_bottom);
        }

        let down_w = self.width;
        let down_h = ((h as f64 * down_w as f64 / w as f64).round() as u32).max(8);
        let small = imageops::resize(&frame.image, down_w, down_h, FilterType::Triangle);

        let roi_y0 = ((down_h as f64 * (1.0 - self.roi_ratio)).round() as u32).min(down_h - 1);
        let roi_h = down_h - roi_y0;
        if roi_h < 4 {
            return LaneMeasurement::missing(y_top, y_bottom);
        }

        let cols = down_w as usize;
        self.column_mean.clear();
        self.column_mean.resize(cols, 0.0);
        for y in roi_y0..down_h {
            for (x, sum) in self.column_mean.iter_mut().enumerate() {
                let [r, g, b] = small.get_pixel(x as u32, y).0;
                *sum += 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64;
            }
        }
        for sum in self.column_mean.iter_mut() {
            *sum /= roi_h as f64;
        }

        self.diff.clear();
        self.diff.resize(cols, 0.0);
        for x in 1..cols {
            self.diff[x] = self.column_mean[x] - self.column_mean[x - 1];
        }

        let mid = cols / 2;
        let left = self.argmax_abs(1, mid.saturating_sub(2).max(2));
        let right = self.argmax_abs((mid + 1).max(2), cols - 2);

        let (left, right) = match (left, right) {
            (Some(l), Some(r)) if (r as f64 - l as f64) >= cols as f64 * MIN_SEPARATION_RATIO => (l, r),
            _ => return LaneMeasurement::missing(y_top, y_bottom),
        };

        let to_processing = w as f64 / down_w as f64;
        let lx = left as f64 * to_processing;
        let rx = right as f64 * to_processing;
        LaneMeasurement {
            left: SideMeasurement::new(lx, lx),
            right: SideMeasurement::new(rx, rx),
            y_top,
            y_bottom,
        }
    }
}
