//! Per-frame lane boundary measurement.
//!
//! Two interchangeable detectors implement [`LaneDetector`]:
//! [`CorridorDetector`] runs the full edge / ROI / histogram / corridor /
//! segment pipeline, [`ColumnProfileDetector`] is a cheap column-brightness
//! estimator. Which one runs is a configuration choice.

pub mod column_profile;
pub mod corridor;
pub mod edges;
pub mod segments;

pub use column_profile::ColumnProfileDetector;
pub use corridor::CorridorDetector;
pub use edges::EdgeDetector;
pub use segments::{Segment, SegmentExtractor};

use serde::{Deserialize, Serialize};

use crate::config::DetectorConfig;
use crate::decode::DecodedFrame;

/// Raw detection for one side, in processing pixels. NaN means nothing usable
/// was found this frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SideMeasurement {
    pub bottom_x: f64,
    pub top_x: f64,
}

impl SideMeasurement {
    pub const MISSING: SideMeasurement = SideMeasurement {
        bottom_x: f64::NAN,
        top_x: f64::NAN,
    };

    pub fn new(bottom_x: f64, top_x: f64) -> Self {
        Self { bottom_x, top_x }
    }

    /// Median of each coordinate across a side's segments.
    pub fn from_samples(bottoms: &mut [f64], tops: &mut [f64]) -> Self {
        Self {
            bottom_x: median(bottoms),
            top_x: median(tops),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.bottom_x.is_finite() && self.top_x.is_finite()
    }
}

/// Both sides of one frame plus the rows the x values refer to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LaneMeasurement {
    pub left: SideMeasurement,
    pub right: SideMeasurement,
    pub y_top: f64,
    pub y_bottom: f64,
}

impl LaneMeasurement {
    pub fn missing(y_top: f64, y_bottom: f64) -> Self {
        Self {
            left: SideMeasurement::MISSING,
            right: SideMeasurement::MISSING,
            y_top,
            y_bottom,
        }
    }

    pub fn span(&self) -> LaneSpan {
        LaneSpan {
            y_top: self.y_top,
            y_bottom: self.y_bottom,
        }
    }
}

/// Vertical extent over which lane models are defined.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LaneSpan {
    pub y_top: f64,
    pub y_bottom: f64,
}

impl LaneSpan {
    pub fn height(&self) -> f64 {
        self.y_bottom - self.y_top
    }
}

/// Median; NaN for an empty slice. Sorts `values` in place.
pub fn median(values: &mut [f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let m = values.len() / 2;
    if values.len() % 2 == 1 {
        values[m]
    } else {
        (values[m - 1] + values[m]) / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum DetectorKind {
    /// Edge map, ROI, histogram seeds, corridor-restricted segments
    Corridor,
    /// Column brightness steps in the bottom of the frame
    ColumnProfile,
}

pub trait LaneDetector: Send {
    fn name(&self) -> &'static str;

    fn detect(&mut self, frame: &DecodedFrame) -> LaneMeasurement;
}

pub fn build_detector(config: &DetectorConfig) -> Box<dyn LaneDetector> {
    match config.kind {
        DetectorKind::Corridor => Box::new(CorridorDetector::new(config.clone())),
        DetectorKind::ColumnProfile => Box::new(ColumnProfileDetector::new(config)),
    }
}
