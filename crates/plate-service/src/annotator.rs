use crate::error::PipelineError;
use crate::types::{BoundingBox, RawDetection};
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

/// Box colours, picked by class id
const PALETTE: [Rgb<u8>; 6] = [
    Rgb([255, 56, 56]),
    Rgb([255, 157, 151]),
    Rgb([255, 112, 31]),
    Rgb([255, 178, 29]),
    Rgb([207, 210, 49]),
    Rgb([72, 249, 10]),
];

const BAR_HEIGHT: u32 = 4;

/// Draws detector boxes over a copy of the submitted image
#[derive(Debug, Clone)]
pub struct Annotator {
    thickness: u32,
    confidence_bar: bool,
    jpeg_quality: u8,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            thickness: 2,
            confidence_bar: true,
            jpeg_quality: 90,
        }
    }
}

impl Annotator {
    pub fn new(thickness: u32, confidence_bar: bool, jpeg_quality: u8) -> Self {
        Self {
            thickness: thickness.max(1),
            confidence_bar,
            jpeg_quality: jpeg_quality.clamp(1, 100),
        }
    }

    /// Returns a new image with one outlined box per detection, plus a bar
    /// above it whose length is proportional to the confidence.
    pub fn render(&self, image: &RgbImage, raw: &[RawDetection]) -> RgbImage {
        let mut canvas = image.clone();

        for detection in raw {
            let bbox = BoundingBox::from_raw(detection, image.width(), image.height());
            let color = PALETTE[detection.class_id as usize % PALETTE.len()];

            for inset in 0..self.thickness {
                let width = bbox.width().saturating_sub(2 * inset).max(1);
                let height = bbox.height().saturating_sub(2 * inset).max(1);
                let rect = Rect::at((bbox.x1() + inset) as i32, (bbox.y1() + inset) as i32)
                    .of_size(width, height);
                draw_hollow_rect_mut(&mut canvas, rect, color);

                if bbox.width() <= 2 * inset + 1 || bbox.height() <= 2 * inset + 1 {
                    break;
                }
            }

            if self.confidence_bar {
                let confidence = detection.confidence.clamp(0.0, 1.0);
                let length = ((bbox.width() as f32 * confidence).round() as u32).max(1);
                let top = if bbox.y1() >= BAR_HEIGHT {
                    bbox.y1() - BAR_HEIGHT
                } else {
                    bbox.y1()
                };
                let bar = Rect::at(bbox.x1() as i32, top as i32).of_size(length, BAR_HEIGHT);
                draw_filled_rect_mut(&mut canvas, bar, color);
            }
        }

        canvas
    }

    /// Encode as baseline JPEG at the configured quality
    pub fn encode_jpeg(&self, image: &RgbImage) -> Result<Vec<u8>, PipelineError> {
        encode_jpeg(image, self.jpeg_quality)
    }
}

pub fn encode_jpeg(image: &RgbImage, quality: u8) -> Result<Vec<u8>, PipelineError> {
    let mut buffer = Vec::new();
    JpegEncoder::new_with_quality(&mut buffer, quality)
        .encode_image(image)
        .map_err(|e| PipelineError::Encode(e.to_string()))?;
    Ok(buffer)
}

/// Wrap JPEG bytes as a `data:` URI for embedding in JSON
pub fn to_data_uri(jpeg: &[u8]) -> String {
    format!(
        "data:image/jpeg;base64,{}",
        base64::prelude::BASE64_STANDARD.encode(jpeg)
    )
}
