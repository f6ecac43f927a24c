//! Model capabilities used by the pipeline.
//!
//! Inference engines are blocking and not re-entrant, so every call goes
//! through a [`ModelPool`], which owns one or more independently locked
//! instances of a model.

pub mod mock;
pub mod onnx;

use crate::error::PipelineError;
use crate::types::RawDetection;
use anyhow::Result;
use image::RgbImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, TryLockError};

/// Locates plate candidates in a full image
pub trait PlateDetector: Send {
    /// Identifier used in logs and metrics
    fn name(&self) -> &'static str;

    /// Returns candidate regions in original image pixels. No plates is an
    /// empty vector, not an error.
    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>>;
}

/// Reads the text on a cropped plate
pub trait TextRecognizer: Send {
    fn name(&self) -> &'static str;

    /// Best single text candidate, or an empty string when nothing is readable
    fn recognize(&mut self, crop: &RgbImage) -> Result<String>;
}

/// A fixed set of model instances, each behind its own lock.
///
/// A pool of one instance serializes every call. Larger pools hand each
/// call to an idle instance, falling back to waiting on a round-robin pick
/// when all are busy.
pub struct ModelPool<M: ?Sized> {
    model: &'static str,
    instances: Vec<Mutex<Box<M>>>,
    cursor: AtomicUsize,
}

impl<M: ?Sized + Send> ModelPool<M> {
    pub fn new(model: &'static str, instances: Vec<Box<M>>) -> Result<Self, PipelineError> {
        if instances.is_empty() {
            return Err(PipelineError::inference(
                model,
                "model pool needs at least one instance",
            ));
        }

        Ok(Self {
            model,
            instances: instances.into_iter().map(Mutex::new).collect(),
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn single(model: &'static str, instance: Box<M>) -> Self {
        Self {
            model,
            instances: vec![Mutex::new(instance)],
            cursor: AtomicUsize::new(0),
        }
    }

    pub fn model(&self) -> &'static str {
        self.model
    }

    pub fn size(&self) -> usize {
        self.instances.len()
    }

    /// Run `f` with exclusive access to one instance
    pub fn with<R>(&self, f: impl FnOnce(&mut M) -> R) -> Result<R, PipelineError> {
        let len = self.instances.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;

        for offset in 0..len {
            match self.instances[(start + offset) % len].try_lock() {
                Ok(mut guard) => return Ok(f(&mut **guard)),
                Err(TryLockError::WouldBlock) => continue,
                Err(TryLockError::Poisoned(_)) => {
                    return Err(PipelineError::inference(
                        self.model,
                        "model instance poisoned by an earlier panic",
                    ))
                }
            }
        }

        telemetry::metrics::PLATE_MODEL_POOL_WAITS
            .with_label_values(&[self.model])
            .inc();
        tracing::debug!(model = self.model, instances = len, "all model instances busy, waiting");

        let mut guard = self.instances[start].lock().map_err(|_| {
            PipelineError::inference(self.model, "model instance poisoned by an earlier panic")
        })?;
        Ok(f(&mut **guard))
    }
}

impl ModelPool<dyn PlateDetector> {
    pub fn detect(&self, image: &RgbImage) -> Result<Vec<RawDetection>, PipelineError> {
        self.with(|detector| detector.detect(image))?
            .map_err(|e| PipelineError::inference(self.model, format!("{:#}", e)))
    }
}

impl ModelPool<dyn TextRecognizer> {
    pub fn recognize(&self, crop: &RgbImage) -> Result<String, PipelineError> {
        self.with(|recognizer| recognizer.recognize(crop))?
            .map_err(|e| PipelineError::inference(self.model, format!("{:#}", e)))
    }
}
