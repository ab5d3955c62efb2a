use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_rect_mut, draw_polygon_mut};
use imageproc::point::Point;
use imageproc::rect::Rect;
use tracing::trace;

use super::edges::{EdgeDetector, EDGE};
use super::segments::{Segment, SegmentExtractor};
use super::{LaneDetector, LaneMeasurement, SideMeasurement};
use crate::config::DetectorConfig;
use crate::decode::DecodedFrame;

/// Full lane pipeline: edge map, trapezoid ROI, bottom-band histogram seeds,
/// corridor bands around the seeds, segment extraction and per-side medians.
pub struct CorridorDetector {
    config: DetectorConfig,
    edges: EdgeDetector,
    extractor: SegmentExtractor,
    edge_map: GrayImage,
    roi_mask: GrayImage,
    corridor: GrayImage,
    histogram: Vec<u32>,
    segments: Vec<Segment>,
    left_bottom: Vec<f64>,
    left_top: Vec<f64>,
    right_bottom: Vec<f64>,
    right_top: Vec<f64>,
    seeds: (u32, u32),
}

impl CorridorDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            edges: EdgeDetector::new(config.blur_sigma, config.canny_low, config.canny_high),
            extractor: SegmentExtractor::new(config.min_segment_pixels),
            config,
            edge_map: GrayImage::new(0, 0),
            roi_mask: GrayImage::new(0, 0),
            corridor: GrayImage::new(0, 0),
            histogram: Vec::new(),
            segments: Vec::new(),
            left_bottom: Vec::new(),
            left_top: Vec::new(),
            right_bottom: Vec::new(),
            right_top: Vec::new(),
            seeds: (0, 0),
        }
    }

    /// Histogram peak columns of the last frame (left, right).
    pub fn seeds(&self) -> (u32, u32) {
        self.seeds
    }

    /// Segments extracted from the corridor edges of the last frame.
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    fn roi_top(&self, h: u32) -> f64 {
        h as f64 * self.config.roi_top_ratio
    }

    fn ensure_roi_mask(&mut self, w: u32, h: u32) {
        if self.roi_mask.dimensions() == (w, h) {
            return;
        }
        let wf = w as f64;
        let top = self.roi_top(h).round() as i32;
        let (w_i, h_i) = (w as i32, h as i32);
        let trapezoid = [
            Point::new(0, h_i),
            Point::new(w_i, h_i),
            Point::new((wf * self.config.roi_top_right_ratio).round() as i32, top),
            Point::new((wf * self.config.roi_top_left_ratio).round() as i32, top),
        ];
        self.roi_mask = GrayImage::new(w, h);
        draw_polygon_mut(&mut self.roi_mask, &trapezoid, Luma([EDGE]));
        trace!("rebuilt ROI mask for {}x{}", w, h);
    }

    /// Column counts of ROI edges from `hist_start_ratio` down to the bottom.
    fn fill_histogram(&mut self, w: u32, h: u32) {
        let w = w as usize;
        let y0 = ((h as f64 * self.config.hist_start_ratio) as usize).min(h as usize - 1);
        self.histogram.clear();
        self.histogram.resize(w, 0);
        for row in self.edge_map.as_raw().chunks_exact(w).skip(y0) {
            for (count, &px) in self.histogram.iter_mut().zip(row) {
                if px != 0 {
                    *count += 1;
                }
            }
        }
    }

    /// First maximum in each half; an empty half falls back to its first column.
    fn find_seeds(&self) -> (u32, u32) {
        let mid = self.histogram.len() / 2;
        let argmax = |range: std::ops::Range<usize>| {
            let mut best = range.start;
            let mut best_count = None;
            for x in range {
                if best_count.map_or(true, |c| self.histogram[x] > c) {
                    best_count = Some(self.histogram[x]);
                    best = x;
                }
            }
            best as u32
        };
        (argmax(0..mid), argmax(mid..self.histogram.len()))
    }

    fn fill_corridor(&mut self, w: u32, h: u32, roi_top: f64) {
        if self.corridor.dimensions() != (w, h) {
            self.corridor = GrayImage::new(w, h);
        } else {
            self.corridor.fill(0);
        }

        let half = ((w as f64 * self.config.corridor_width_ratio) as u32).max(self.config.min_corridor_px);
        let top = roi_top as i32;
        let height = (h as i32 - top).max(1) as u32;
        for seed in [self.seeds.0, self.seeds.1] {
            let left = seed as i32 - half as i32;
            let band = Rect::at(left, top).of_size(2 * half + 1, height);
            draw_filled_rect_mut(&mut self.corridor, band, Luma([EDGE]));
        }

        let corridor: &mut [u8] = &mut self.corridor;
        for (c, &e) in corridor.iter_mut().zip(self.edge_map.as_raw()) {
            *c &= e;
        }
    }

    fn split_sides(&mut self, mid_x: f64, y_top: f64, y_bottom: f64) -> (SideMeasurement, SideMeasurement) {
        self.left_bottom.clear();
        self.left_top.clear();
        self.right_bottom.clear();
        self.right_top.clear();

        for segment in &self.segments {
            if !segment.is_near_vertical(self.config.vertical_ratio) {
                continue;
            }
            let x_bottom = segment.x_at(y_bottom);
            let x_top = segment.x_at(y_top);
            if x_bottom < mid_x {
                self.left_bottom.push(x_bottom);
                self.left_top.push(x_top);
            } else {
                self.right_bottom.push(x_bottom);
                self.right_top.push(x_top);
            }
        }

        (
            SideMeasurement::from_samples(&mut self.left_bottom, &mut self.left_top),
            SideMeasurement::from_samples(&mut self.right_bottom, &mut self.right_top),
        )
    }
}

impl LaneDetector for CorridorDetector {
    fn name(&self) -> &'static str {
        "corridor"
    }

    fn detect(&mut self, frame: &DecodedFrame) -> LaneMeasurement {
        let (w, h) = frame.image.dimensions();
        let y_top = self.roi_top(h);
        let y_bottom = h as f64;
        if w < 4 || h < 4 {
            return LaneMeasurement::missing(y_top, y_bottom);
        }

        self.edges.detect(&frame.image, &mut self.edge_map);

        self.ensure_roi_mask(w, h);
        let edge_map: &mut [u8] = &mut self.edge_map;
        for (e, &m) in edge_map.iter_mut().zip(self.roi_mask.as_raw()) {
            *e &= m;
        }

        self.fill_histogram(w, h);
        self.seeds = self.find_seeds();
        self.fill_corridor(w, h, y_top);
        self.extractor.extract(&self.corridor, &mut self.segments);

        let (left, right) = self.split_sides(w as f64 * 0.5, y_top, y_bottom);
        trace!(
            "frame {}: seeds {:?}, {} segments, left {:?}, right {:?}",
            frame.sequence,
            self.seeds,
            self.segments.len(),
            left,
            right
        );

        LaneMeasurement {
            left,
            right,
            y_top,
            y_bottom,
        }
    }
}
