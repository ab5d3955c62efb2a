//! Temporal smoothing of lane boundaries.
//!
//! Each side keeps an alpha-beta state over its bottom and top x. Missing
//! measurements hold the last state; accepted updates are limited both in
//! bottom displacement and in slope change per frame.

use serde::Serialize;

use crate::config::TrackerConfig;
use crate::lane::{LaneMeasurement, LaneSpan, SideMeasurement};

/// Smoothed state of one lane boundary, in processing pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Track {
    pub x_bottom: f64,
    pub x_top: f64,
    pub v_bottom: f64,
    pub v_top: f64,
}

impl Track {
    pub fn new(x_bottom: f64, x_top: f64) -> Self {
        Self {
            x_bottom,
            x_top,
            v_bottom: 0.0,
            v_top: 0.0,
        }
    }

    /// `(x_bottom - x_top) / (y_bottom - y_top)`
    pub fn slope(&self, span: LaneSpan) -> f64 {
        (self.x_bottom - self.x_top) / span.height()
    }

    /// Linear model `x = slope * y + intercept` passing through both ends.
    pub fn model(&self, span: LaneSpan) -> LaneModel {
        let slope = self.slope(span);
        LaneModel {
            slope,
            intercept: self.x_bottom - slope * span.y_bottom,
        }
    }
}

/// Lane boundary as a line in processing coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LaneModel {
    pub slope: f64,
    pub intercept: f64,
}

impl LaneModel {
    pub fn x_at(&self, y: f64) -> f64 {
        self.slope * y + self.intercept
    }
}

#[derive(Debug, Clone, Copy)]
pub struct AlphaBetaFilter {
    alpha: f64,
    beta: f64,
    max_step_ratio: f64,
    max_slope_delta: f64,
}

impl From<&TrackerConfig> for AlphaBetaFilter {
    fn from(config: &TrackerConfig) -> Self {
        Self {
            alpha: config.alpha,
            beta: config.beta,
            max_step_ratio: config.max_step_ratio,
            max_slope_delta: config.max_slope_delta,
        }
    }
}

impl Default for AlphaBetaFilter {
    fn default() -> Self {
        Self::from(&TrackerConfig::default())
    }
}

impl AlphaBetaFilter {
    /// Advance `track` by one measurement. An invalid measurement returns the
    /// track unchanged; the first valid one initialises it.
    pub fn update(
        &self,
        track: Option<Track>,
        measurement: &SideMeasurement,
        frame_width: f64,
        span: LaneSpan,
    ) -> Option<Track> {
        if !measurement.is_valid() {
            return track;
        }
        let Some(prev) = track else {
            return Some(Track::new(measurement.bottom_x, measurement.top_x));
        };

        let pred_bottom = prev.x_bottom + prev.v_bottom;
        let pred_top = prev.x_top + prev.v_top;
        let r_bottom = measurement.bottom_x - pred_bottom;
        let r_top = measurement.top_x - pred_top;

        let v_bottom = prev.v_bottom + self.beta * r_bottom;
        let v_top = prev.v_top + self.beta * r_top;
        let mut x_bottom = pred_bottom + self.alpha * r_bottom;
        let mut x_top = pred_top + self.alpha * r_top;

        let max_step = frame_width * self.max_step_ratio;
        let step = x_bottom - prev.x_bottom;
        if step.abs() > max_step {
            x_bottom = prev.x_bottom + max_step * step.signum();
        }

        // Bottom step is not re-checked after this.
        let height = span.height();
        if height > 0.0 {
            let prev_slope = (prev.x_bottom - prev.x_top) / height;
            let slope = (x_bottom - x_top) / height;
            let delta = slope - prev_slope;
            if delta.abs() > self.max_slope_delta {
                let capped = prev_slope + self.max_slope_delta * delta.signum();
                x_top = x_bottom - capped * height;
            }
        }

        Some(Track {
            x_bottom,
            x_top,
            v_bottom,
            v_top,
        })
    }
}

/// Left and right tracks of one session.
#[derive(Debug, Clone, Default)]
pub struct LaneTracker {
    filter: AlphaBetaFilter,
    left: Option<Track>,
    right: Option<Track>,
    span: Option<LaneSpan>,
}

impl LaneTracker {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            filter: AlphaBetaFilter::from(config),
            left: None,
            right: None,
            span: None,
        }
    }

    pub fn update(&mut self, measurement: &LaneMeasurement, frame_width: f64) {
        let span = measurement.span();
        self.left = self.filter.update(self.left, &measurement.left, frame_width, span);
        self.right = self.filter.update(self.right, &measurement.right, frame_width, span);
        self.span = Some(span);
    }

    /// Current line models over the last seen span.
    pub fn models(&self) -> (Option<LaneModel>, Option<LaneModel>) {
        match self.span {
            Some(span) if span.height() > 0.0 => (
                self.left.map(|t| t.model(span)),
                self.right.map(|t| t.model(span)),
            ),
            _ => (None, None),
        }
    }

    pub fn left(&self) -> Option<Track> {
        self.left
    }

    pub fn right(&self) -> Option<Track> {
        self.right
    }

    pub fn span(&self) -> Option<LaneSpan> {
        self.span
    }

    pub fn reset(&mut self) {
        self.left = None;
        self.right = None;
        self.span = None;
    }
}
