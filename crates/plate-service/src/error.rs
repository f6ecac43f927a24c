use std::time::Duration;
use thiserror::Error;

/// Failures raised by the recognition pipeline and the service around it.
///
/// Edge cases the pipeline resolves locally (empty crops, images with no
/// plates) never show up here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("failed to decode image: {0}")]
    Decode(String),

    #[error("invalid detection: {0}")]
    InvalidDetection(String),

    #[error("{model} inference failed: {message}")]
    Inference { model: &'static str, message: String },

    #[error("image processing timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to encode annotated image: {0}")]
    Encode(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl PipelineError {
    pub fn inference(model: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Inference {
            model,
            message: err.to_string(),
        }
    }

    /// Short label used for metrics and structured logs
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Input(_) => "input",
            PipelineError::Decode(_) => "decode",
            PipelineError::InvalidDetection(_) => "invalid_detection",
            PipelineError::Inference { .. } => "inference",
            PipelineError::Timeout(_) => "timeout",
            PipelineError::Encode(_) => "encode",
            PipelineError::Storage(_) => "storage",
        }
    }
}

/// The history log could not accept a write or serve a read
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("history store unavailable: {0}")]
    Unavailable(String),

    #[error("history database error: {0}")]
    Database(#[from] sqlx::Error),
}
