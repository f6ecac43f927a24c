use crate::aggregator::Aggregator;
use crate::annotator::Annotator;
use crate::engine::{ModelPool, PlateDetector, TextRecognizer};
use crate::error::PipelineError;
use crate::types::DetectionBatch;
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;

/// Decode an uploaded file into an RGB raster.
///
/// Empty input is an input error; anything the decoder rejects, or a
/// zero-sized raster, is a decode error.
pub fn decode_image(bytes: &[u8]) -> Result<RgbImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::Input("image is empty".to_string()));
    }

    let decoded =
        image::load_from_memory(bytes).map_err(|e| PipelineError::Decode(e.to_string()))?;
    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(PipelineError::Decode(format!(
            "image has no pixels ({}x{})",
            decoded.width(),
            decoded.height()
        )));
    }

    Ok(decoded.to_rgb8())
}

/// Result of one pipeline run
#[derive(Debug, Clone)]
pub struct ProcessedImage {
    pub batch: DetectionBatch,
    /// JPEG bytes of the annotated copy
    pub annotated_jpeg: Vec<u8>,
}

/// Detection -> region crop -> text recognition -> aggregation -> annotation.
///
/// Synchronous and blocking; callers on an async runtime should run it on
/// a blocking thread.
#[derive(Clone)]
pub struct PlatePipeline {
    detector: Arc<ModelPool<dyn PlateDetector>>,
    recognizer: Arc<ModelPool<dyn TextRecognizer>>,
    aggregator: Aggregator,
    annotator: Annotator,
}

impl PlatePipeline {
    pub fn new(
        detector: Arc<ModelPool<dyn PlateDetector>>,
        recognizer: Arc<ModelPool<dyn TextRecognizer>>,
        annotator: Annotator,
    ) -> Self {
        Self {
            detector,
            recognizer,
            aggregator: Aggregator::new(),
            annotator,
        }
    }

    pub fn detector(&self) -> &ModelPool<dyn PlateDetector> {
        &self.detector
    }

    pub fn recognizer(&self) -> &ModelPool<dyn TextRecognizer> {
        &self.recognizer
    }

    pub fn process(&self, image: &RgbImage) -> Result<ProcessedImage, PipelineError> {
        let start = Instant::now();

        let raw = timed("detect", || self.detector.detect(image))?;
        for candidate in &raw {
            telemetry::metrics::PLATE_DETECTIONS
                .with_label_values(&[&candidate.class_id.to_string()])
                .inc();
        }

        let batch = timed("recognize", || {
            self.aggregator.combine(image, &raw, &self.recognizer)
        })?;

        let annotated_jpeg = timed("annotate", || {
            let annotated = self.annotator.render(image, &raw);
            self.annotator.encode_jpeg(&annotated)
        })?;

        tracing::info!(
            width = image.width(),
            height = image.height(),
            detections = batch.len(),
            accuracy = batch.accuracy(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Processed image"
        );

        Ok(ProcessedImage {
            batch,
            annotated_jpeg,
        })
    }
}

fn timed<T>(stage: &str, f: impl FnOnce() -> T) -> T {
    let start = Instant::now();
    let out = f();
    telemetry::metrics::PLATE_STAGE_LATENCY
        .with_label_values(&[stage])
        .observe(start.elapsed().as_secs_f64());
    out
}
