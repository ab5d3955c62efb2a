//! Generated road frames for benchmark mode, tests and the criterion bench.

use anyhow::Result;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use rand::Rng;

/// Dark road with bright painted lines. Each line is given by its center x at
/// the top row and at the bottom row of the frame.
#[derive(Debug, Clone)]
pub struct SyntheticRoad {
    pub width: u32,
    pub height: u32,
    pub stripe_width: u32,
    pub lines: Vec<(f64, f64)>,
    pub road: Rgb<u8>,
    pub paint: Rgb<u8>,
}

impl SyntheticRoad {
    /// Two vertical lines at `left_x` and `right_x`.
    pub fn straight(width: u32, height: u32, left_x: f64, right_x: f64) -> Self {
        Self {
            width,
            height,
            stripe_width: 6,
            lines: vec![(left_x, left_x), (right_x, right_x)],
            road: Rgb([0, 0, 0]),
            paint: Rgb([255, 255, 255]),
        }
    }

    pub fn render(&self) -> RgbImage {
        let mut frame = RgbImage::from_pixel(self.width, self.height, self.road);
        let last_row = self.height.saturating_sub(1).max(1) as f64;
        for y in 0..self.height {
            let t = y as f64 / last_row;
            for &(top_x, bottom_x) in &self.lines {
                let center = top_x + (bottom_x - top_x) * t;
                let start = (center - self.stripe_width as f64 / 2.0).round() as i64;
                for x in start..start + self.stripe_width as i64 {
                    if x >= 0 && (x as u32) < self.width {
                        frame.put_pixel(x as u32, y, self.paint);
                    }
                }
            }
        }
        frame
    }

    /// Render and add uniform noise of up to `amplitude` per channel.
    pub fn render_noisy<R: Rng>(&self, rng: &mut R, amplitude: u8) -> RgbImage {
        let mut frame = self.render();
        if amplitude == 0 {
            return frame;
        }
        for px in frame.pixels_mut() {
            for c in px.0.iter_mut() {
                let delta = rng.gen_range(-(amplitude as i16)..=amplitude as i16);
                *c = (*c as i16 + delta).clamp(0, 255) as u8;
            }
        }
        frame
    }
}

pub fn encode_jpeg(frame: &RgbImage, quality: u8) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(frame)?;
    Ok(out)
}
