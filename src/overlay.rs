use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;
use serde::Serialize;

use crate::config::OverlayConfig;
use crate::lane::LaneSpan;
use crate::track::LaneModel;

/// Points in full-resolution pixel coordinates, top to bottom.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Polyline {
    pub points: Vec<[f32; 2]>,
}

impl Polyline {
    pub fn segments(&self) -> impl Iterator<Item = ([f32; 2], [f32; 2])> + '_ {
        self.points.windows(2).map(|pair| (pair[0], pair[1]))
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct LaneOverlay {
    pub left: Option<Polyline>,
    pub right: Option<Polyline>,
}

impl LaneOverlay {
    pub fn is_empty(&self) -> bool {
        self.left.is_none() && self.right.is_none()
    }

    pub fn polylines(&self) -> impl Iterator<Item = &Polyline> {
        self.left.iter().chain(self.right.iter())
    }
}

/// Geometry needed to map processing coordinates onto the camera frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub span: LaneSpan,
    pub scale_x: f64,
    pub scale_y: f64,
    pub full_width: u32,
    pub full_height: u32,
}

pub struct OverlayRenderer {
    steps: usize,
    thickness: u32,
    color: Rgb<u8>,
}

impl OverlayRenderer {
    pub fn new(config: &OverlayConfig) -> Self {
        Self {
            steps: config.steps.max(1),
            thickness: config.line_thickness.max(1),
            color: Rgb(config.line_color),
        }
    }

    pub fn render(&self, left: Option<LaneModel>, right: Option<LaneModel>, projection: &Projection) -> LaneOverlay {
        LaneOverlay {
            left: left.map(|m| self.polyline(&m, projection)),
            right: right.map(|m| self.polyline(&m, projection)),
        }
    }

    fn polyline(&self, model: &LaneModel, p: &Projection) -> Polyline {
        let max_x = p.full_width.saturating_sub(1) as f64;
        let max_y = p.full_height.saturating_sub(1) as f64;
        let points = (0..=self.steps)
            .map(|i| {
                let y = p.span.y_top + p.span.height() * (i as f64 / self.steps as f64);
                let x = model.x_at(y);
                [
                    (x * p.scale_x).clamp(0.0, max_x) as f32,
                    (y * p.scale_y).clamp(0.0, max_y) as f32,
                ]
            })
            .collect();
        Polyline { points }
    }

    /// Stroke every polyline of `overlay` onto `frame`.
    pub fn composite(&self, overlay: &LaneOverlay, frame: &mut RgbImage) {
        let half = self.thickness as f32 / 2.0;
        for polyline in overlay.polylines() {
            for (a, b) in polyline.segments() {
                let (dx, dy) = (b[0] - a[0], b[1] - a[1]);
                let len = (dx * dx + dy * dy).sqrt();
                if len == 0.0 {
                    continue;
                }
                // Offset copies of the segment along its normal.
                let (nx, ny) = (-dy / len, dx / len);
                for k in 0..self.thickness {
                    let t = k as f32 - half + 0.5;
                    draw_line_segment_mut(
                        frame,
                        (a[0] + nx * t, a[1] + ny * t),
                        (b[0] + nx * t, b[1] + ny * t),
                        self.color,
                    );
                }
            }
        }
    }
}
