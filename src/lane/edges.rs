//! Canny-style binary edge map.
//!
//! Grayscale, Gaussian smoothing and Sobel gradients come from `image` and
//! `imageproc` and produce fresh images per frame. Non-maximum suppression
//! along the quantized gradient direction and two-threshold hysteresis keep
//! their magnitude, class and stack buffers across frames.
//! The outermost 1-pixel frame never carries an edge.

use image::{GrayImage, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

pub const EDGE: u8 = 255;

const TAN_22_5_DEG: f32 = 0.414_213_56;

const NOT_EDGE: u8 = 0;
const WEAK: u8 = 1;
const STRONG: u8 = 2;

pub struct EdgeDetector {
    sigma: f32,
    low: f32,
    high: f32,
    mag: Vec<f32>,
    class: Vec<u8>,
    stack: Vec<usize>,
}

impl EdgeDetector {
    pub fn new(sigma: f32, low: f32, high: f32) -> Self {
        Self {
            sigma,
            low: low.min(high),
            high: high.max(low),
            mag: Vec::new(),
            class: Vec::new(),
            stack: Vec::new(),
        }
    }

    /// Write a 0/255 edge map of `frame` into `out`, resizing `out` if needed.
    pub fn detect(&mut self, frame: &RgbImage, out: &mut GrayImage) {
        let gray = image::imageops::grayscale(frame);
        let smoothed = if self.sigma > 0.0 {
            gaussian_blur_f32(&gray, self.sigma)
        } else {
            gray
        };
        self.detect_gray(&smoothed, out);
    }

    /// Same as [`EdgeDetector::detect`] for an already smoothed gray image.
    pub fn detect_gray(&mut self, gray: &GrayImage, out: &mut GrayImage) {
        let (w, h) = gray.dimensions();
        if out.dimensions() != (w, h) {
            *out = GrayImage::new(w, h);
        } else {
            out.fill(0);
        }
        if w < 3 || h < 3 {
            return;
        }

        let w = w as usize;
        let h = h as usize;
        let len = w * h;

        let gx = horizontal_sobel(gray);
        let gy = vertical_sobel(gray);
        let gx = gx.as_raw();
        let gy = gy.as_raw();

        self.mag.clear();
        self.mag
            .extend(gx.iter().zip(gy.iter()).map(|(&x, &y)| (x as f32).abs() + (y as f32).abs()));
        self.class.clear();
        self.class.resize(len, NOT_EDGE);
        self.stack.clear();

        for y in 1..h - 1 {
            for x in 1..w - 1 {
                let i = y * w + x;
                let mag = self.mag[i];
                if mag <= self.low {
                    continue;
                }

                let dx = gx[i] as f32;
                let dy = gy[i] as f32;
                let ax = dx.abs();
                let ay = dy.abs();

                // (behind, ahead) along the gradient; ties resolve toward the
                // pixel behind so a symmetric ridge yields a single edge.
                let (behind, ahead) = if ay <= ax * TAN_22_5_DEG {
                    (i - 1, i + 1)
                } else if ax <= ay * TAN_22_5_DEG {
                    (i - w, i + w)
                } else if (dx >= 0.0) == (dy >= 0.0) {
                    (i - w - 1, i + w + 1)
                } else {
                    (i - w + 1, i + w - 1)
                };

                if mag > self.mag[behind] && mag >= self.mag[ahead] {
                    if mag > self.high {
                        self.class[i] = STRONG;
                        self.stack.push(i);
                    } else {
                        self.class[i] = WEAK;
                    }
                }
            }
        }

        let out_buf: &mut [u8] = &mut **out;
        while let Some(i) = self.stack.pop() {
            out_buf[i] = EDGE;
            let x = i % w;
            let y = i / w;
            for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                    let j = ny * w + nx;
                    if self.class[j] == WEAK {
                        self.class[j] = STRONG;
                        self.stack.push(j);
                    }
                }
            }
        }
    }
}
