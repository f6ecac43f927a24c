use crate::annotator::{to_data_uri, Annotator};
use crate::config::{EngineKind, PlateServiceConfig};
use crate::engine::mock::{MockPlateDetector, MockTextRecognizer};
use crate::engine::onnx::{OnnxPlateDetector, OnnxTextRecognizer};
use crate::engine::{ModelPool, PlateDetector, TextRecognizer};
use crate::error::{PipelineError, StorageError};
use crate::history::HistoryStore;
use crate::pipeline::{decode_image, PlatePipeline, ProcessedImage};
use crate::types::{HistoryAction, HistoryRecord, UploadResponse};
use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

const DETECTOR_MODEL: &str = "plate_detector";
const RECOGNIZER_MODEL: &str = "text_recognizer";

#[derive(Clone)]
pub struct PlateServiceState {
    inner: Arc<PlateServiceStateInner>,
}

struct PlateServiceStateInner {
    config: PlateServiceConfig,
    pipeline: PlatePipeline,
    history: Arc<dyn HistoryStore>,
}

impl PlateServiceState {
    pub fn new(
        config: PlateServiceConfig,
        pipeline: PlatePipeline,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            inner: Arc::new(PlateServiceStateInner {
                config,
                pipeline,
                history,
            }),
        }
    }

    /// Load the configured engines once and wire them into a pipeline
    pub fn from_config(config: PlateServiceConfig, history: Arc<dyn HistoryStore>) -> Result<Self> {
        let pipeline = build_pipeline(&config)?;
        Ok(Self::new(config, pipeline, history))
    }

    pub fn config(&self) -> &PlateServiceConfig {
        &self.inner.config
    }

    pub fn pipeline(&self) -> &PlatePipeline {
        &self.inner.pipeline
    }

    /// Run one uploaded image through the pipeline and log every detection.
    pub async fn submit_image(&self, bytes: Vec<u8>) -> Result<UploadResponse, PipelineError> {
        let start = Instant::now();
        let result = self.process_and_record(bytes).await;

        let status = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        telemetry::metrics::PLATE_IMAGES_PROCESSED
            .with_label_values(&[status])
            .inc();

        match &result {
            Ok(response) => info!(
                detections = response.detections.len(),
                accuracy = response.accuracy,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Image submission complete"
            ),
            Err(e) => warn!(kind = e.kind(), error = %e, "Image submission failed"),
        }

        result
    }

    async fn process_and_record(&self, bytes: Vec<u8>) -> Result<UploadResponse, PipelineError> {
        let processed = self.run_pipeline(bytes).await?;
        let annotated_image = to_data_uri(&processed.annotated_jpeg);
        let detections = processed.batch.detections().to_vec();

        for detection in &detections {
            self.record(detection.plate_text(), detection.confidence(), HistoryAction::Entry)
                .await?;
        }

        Ok(UploadResponse {
            accuracy: processed.batch.accuracy(),
            detections,
            annotated_image,
        })
    }

    async fn run_pipeline(&self, bytes: Vec<u8>) -> Result<ProcessedImage, PipelineError> {
        let pipeline = self.inner.pipeline.clone();
        let handle = tokio::task::spawn_blocking(move || {
            let image = decode_image(&bytes)?;
            pipeline.process(&image)
        });

        let joined = match self.inner.config.processing_timeout {
            Some(limit) => tokio::time::timeout(limit, handle)
                .await
                .map_err(|_| PipelineError::Timeout(limit))?,
            None => handle.await,
        };

        joined.map_err(|e| PipelineError::inference("pipeline", e))?
    }

    async fn record(
        &self,
        plate: &str,
        confidence: f64,
        action: HistoryAction,
    ) -> Result<HistoryRecord, StorageError> {
        let result = self.inner.history.append(plate, confidence, action).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        telemetry::metrics::PLATE_HISTORY_APPENDS
            .with_label_values(&[action.as_str(), status])
            .inc();
        result
    }

    /// Most recent history records, newest first.
    ///
    /// `limit` is capped at `history_limit`; `None` means the maximum and
    /// `Some(0)` yields no rows.
    pub async fn history(&self, limit: Option<u32>) -> Result<Vec<HistoryRecord>, StorageError> {
        let max = self.inner.config.history_limit;
        let limit = limit.unwrap_or(max).min(max);
        self.inner.history.recent(limit).await
    }

    /// Whether the history store answers
    pub async fn ready(&self) -> Result<(), StorageError> {
        self.inner.history.ping().await
    }
}

/// Build detector and recognizer pools for the configured engine
pub fn build_pipeline(config: &PlateServiceConfig) -> Result<PlatePipeline> {
    let instances = config.model_instances.max(1);

    let (detectors, recognizers): (Vec<Box<dyn PlateDetector>>, Vec<Box<dyn TextRecognizer>>) =
        match config.engine {
            EngineKind::Mock => {
                info!(instances, "Using mock plate engines");
                (
                    (0..instances)
                        .map(|_| Box::new(MockPlateDetector::new()) as Box<dyn PlateDetector>)
                        .collect(),
                    (0..instances)
                        .map(|_| Box::new(MockTextRecognizer::new()) as Box<dyn TextRecognizer>)
                        .collect(),
                )
            }
            EngineKind::Onnx => {
                let mut detectors: Vec<Box<dyn PlateDetector>> = Vec::with_capacity(instances);
                let mut recognizers: Vec<Box<dyn TextRecognizer>> = Vec::with_capacity(instances);
                for i in 0..instances {
                    let detector = OnnxPlateDetector::load(config.detector.clone())
                        .with_context(|| format!("Failed to load detector instance {}", i))?;
                    let recognizer = OnnxTextRecognizer::load(config.recognizer.clone())
                        .with_context(|| format!("Failed to load OCR instance {}", i))?;
                    detectors.push(Box::new(detector));
                    recognizers.push(Box::new(recognizer));
                }
                info!(instances, "Loaded ONNX plate engines");
                (detectors, recognizers)
            }
        };

    let detector = ModelPool::new(DETECTOR_MODEL, detectors)?;
    let recognizer = ModelPool::new(RECOGNIZER_MODEL, recognizers)?;
    let annotator = Annotator::new(config.box_thickness, true, config.jpeg_quality);

    Ok(PlatePipeline::new(
        Arc::new(detector),
        Arc::new(recognizer),
        annotator,
    ))
}
