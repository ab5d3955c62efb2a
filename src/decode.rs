use image::imageops::{self, FilterType};
use image::{ImageFormat, RgbImage};
use tracing::trace;

use crate::config::ProcessingConfig;
use crate::error::DecodeError;
use crate::frame_slot::RawFrame;

/// Frames smaller than this in either dimension are rejected.
const MIN_SOURCE_DIM: u32 = 8;

/// A camera frame ready for lane detection.
#[derive(Debug, Clone)]
pub struct DecodedFrame {
    /// Processor-side counter, increases by one per decoded frame
    pub sequence: u64,
    /// Reader-side index of the raw frame this came from
    pub source_index: u64,
    /// Upright frame at processing resolution
    pub image: RgbImage,
    /// Upright frame at camera resolution, kept only when compositing
    pub full: Option<RgbImage>,
    pub full_width: u32,
    pub full_height: u32,
}

impl DecodedFrame {
    /// Wrap an already upright, processing-sized image.
    pub fn from_processing_image(image: RgbImage, sequence: u64) -> Self {
        let (full_width, full_height) = image.dimensions();
        Self {
            sequence,
            source_index: sequence,
            image,
            full: None,
            full_width,
            full_height,
        }
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Processing-to-camera factor along x.
    pub fn scale_x(&self) -> f64 {
        self.full_width as f64 / self.image.width().max(1) as f64
    }

    /// Processing-to-camera factor along y.
    pub fn scale_y(&self) -> f64 {
        self.full_height as f64 / self.image.height().max(1) as f64
    }
}

pub struct FrameDecoder {
    width: u32,
    min_height: u32,
    rotate_180: bool,
    keep_full: bool,
    sequence: u64,
}

impl FrameDecoder {
    pub fn new(config: &ProcessingConfig, keep_full: bool) -> Self {
        Self {
            width: config.width.max(MIN_SOURCE_DIM),
            min_height: config.min_height,
            rotate_180: config.rotate_180,
            keep_full,
            sequence: 0,
        }
    }

    /// Decode a JPEG and bring it to processing resolution.
    pub fn decode(&mut self, raw: &RawFrame) -> Result<DecodedFrame, DecodeError> {
        if raw.is_empty() {
            return Err(DecodeError::Empty);
        }
        let image = image::load_from_memory_with_format(&raw.data, ImageFormat::Jpeg)?.into_rgb8();
        self.normalize(image, raw.index)
    }

    /// Rotate and downscale an RGB frame.
    pub fn normalize(&mut self, mut image: RgbImage, source_index: u64) -> Result<DecodedFrame, DecodeError> {
        let (full_width, full_height) = image.dimensions();
        if full_width < MIN_SOURCE_DIM || full_height < MIN_SOURCE_DIM {
            return Err(DecodeError::Degenerate {
                width: full_width,
                height: full_height,
            });
        }

        if self.rotate_180 {
            imageops::rotate180_in_place(&mut image);
        }

        let (width, height) = self.processing_size(full_width, full_height);
        let (processed, full) = if (width, height) == (full_width, full_height) {
            let full = self.keep_full.then(|| image.clone());
            (image, full)
        } else {
            let processed = imageops::resize(&image, width, height, FilterType::Triangle);
            (processed, self.keep_full.then_some(image))
        };

        self.sequence += 1;
        trace!(
            "frame {} decoded {}x{} -> {}x{}",
            self.sequence,
            full_width,
            full_height,
            width,
            height
        );

        Ok(DecodedFrame {
            sequence: self.sequence,
            source_index,
            image: processed,
            full,
            full_width,
            full_height,
        })
    }

    /// Processing width, aspect-preserving height with a floor.
    pub fn processing_size(&self, full_width: u32, full_height: u32) -> (u32, u32) {
        let scale = self.width as f64 / full_width as f64;
        let height = ((full_height as f64 * scale).round() as u32).max(self.min_height);
        (self.width, height)
    }
}
