use crate::engine::{ModelPool, TextRecognizer};
use crate::error::PipelineError;
use crate::types::{BoundingBox, Detection, DetectionBatch, RawDetection};
use image::RgbImage;

/// Pairs detector boxes with recognized text and derives the batch accuracy
#[derive(Debug, Clone, Copy, Default)]
pub struct Aggregator;

impl Aggregator {
    pub fn new() -> Self {
        Self
    }

    /// Build one [`Detection`] per raw box, in detector order.
    ///
    /// Boxes are clipped to the image; a crop with zero width or height
    /// skips the recognizer and gets empty text.
    pub fn combine(
        &self,
        image: &RgbImage,
        raw: &[RawDetection],
        recognizer: &ModelPool<dyn TextRecognizer>,
    ) -> Result<DetectionBatch, PipelineError> {
        let mut detections = Vec::with_capacity(raw.len());

        for candidate in raw {
            let bbox = BoundingBox::from_raw(candidate, image.width(), image.height());

            let plate_text = match crop(image, &bbox) {
                Some(region) => recognizer.recognize(&region)?.trim().to_string(),
                None => {
                    telemetry::metrics::PLATE_EMPTY_CROPS.inc();
                    let coords: [u32; 4] = bbox.into();
                    tracing::debug!(bbox = ?coords, "empty crop, skipping text recognition");
                    String::new()
                }
            };

            detections.push(Detection::new(
                bbox,
                candidate.confidence as f64,
                candidate.class_id,
                plate_text,
            )?);
        }

        Ok(DetectionBatch::new(detections))
    }
}

/// Copy of the region under `bbox`, or `None` when it has no area
pub fn crop(image: &RgbImage, bbox: &BoundingBox) -> Option<RgbImage> {
    if bbox.is_empty() {
        return None;
    }

    let region =
        image::imageops::crop_imm(image, bbox.x1(), bbox.y1(), bbox.width(), bbox.height())
            .to_image();
    (region.width() > 0 && region.height() > 0).then_some(region)
}
