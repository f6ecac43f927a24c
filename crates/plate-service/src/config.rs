use crate::engine::onnx::{DetectorConfig, RecognizerConfig, SessionConfig};
use crate::history::DEFAULT_HISTORY_LIMIT;
use anyhow::{anyhow, bail, Context, Result};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Which inference backend the service wires into the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineKind {
    Onnx,
    Mock,
}

impl FromStr for EngineKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "onnx" => Ok(EngineKind::Onnx),
            "mock" => Ok(EngineKind::Mock),
            other => Err(anyhow!("Unknown PLATE_ENGINE '{}', expected onnx or mock", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PlateServiceConfig {
    /// Address to bind the HTTP server to
    pub bind_addr: String,

    /// SQLite URL of the history log
    pub database_url: String,

    pub engine: EngineKind,
    pub detector: DetectorConfig,
    pub recognizer: RecognizerConfig,

    /// Independent instances per model; 1 means every call is serialized
    pub model_instances: usize,

    /// Upper bound on one pipeline run, if any
    pub processing_timeout: Option<Duration>,

    /// Default and maximum rows returned by the history query
    pub history_limit: u32,

    pub jpeg_quality: u8,
    pub box_thickness: u32,

    /// Maximum accepted upload body, in bytes
    pub max_upload_bytes: usize,

    /// Directory with the upload/history dashboard, served at `/`
    pub static_dir: Option<String>,
}

impl Default for PlateServiceConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8090".to_string(),
            database_url: "sqlite://history.db".to_string(),
            engine: EngineKind::Onnx,
            detector: DetectorConfig::default(),
            recognizer: RecognizerConfig::default(),
            model_instances: 1,
            processing_timeout: None,
            history_limit: DEFAULT_HISTORY_LIMIT,
            jpeg_quality: 90,
            box_thickness: 2,
            max_upload_bytes: 16 * 1024 * 1024,
            static_dir: None,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow!("Invalid {}: {}", name, e)),
        _ => Ok(None),
    }
}

impl PlateServiceConfig {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let engine = parse_var::<String>("PLATE_ENGINE")?
            .map(|s| s.parse::<EngineKind>())
            .transpose()
            .context("Invalid PLATE_ENGINE")?
            .unwrap_or(defaults.engine);

        let session = SessionConfig {
            execution_provider: env::var("PLATE_EXECUTION_PROVIDER")
                .unwrap_or(defaults.detector.session.execution_provider.clone()),
            device_id: parse_var("PLATE_DEVICE_ID")?.unwrap_or(defaults.detector.session.device_id),
            intra_threads: parse_var("PLATE_INTRA_THREADS")?
                .unwrap_or(defaults.detector.session.intra_threads),
            inter_threads: defaults.detector.session.inter_threads,
        };

        let detector = DetectorConfig {
            model_path: env::var("PLATE_DETECTOR_MODEL").unwrap_or(defaults.detector.model_path),
            confidence_threshold: parse_var("PLATE_CONFIDENCE_THRESHOLD")?
                .unwrap_or(defaults.detector.confidence_threshold),
            session: session.clone(),
            ..defaults.detector
        };

        let recognizer = RecognizerConfig {
            model_path: env::var("PLATE_OCR_MODEL").unwrap_or(defaults.recognizer.model_path),
            char_vocab: env::var("PLATE_OCR_VOCAB").unwrap_or(defaults.recognizer.char_vocab),
            session,
            ..defaults.recognizer
        };

        let model_instances: usize =
            parse_var("PLATE_MODEL_INSTANCES")?.unwrap_or(defaults.model_instances);
        if model_instances == 0 {
            bail!("PLATE_MODEL_INSTANCES must be at least 1");
        }

        let processing_timeout = parse_var::<u64>("PLATE_PROCESSING_TIMEOUT_MS")?
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis);

        let history_limit: u32 =
            parse_var("PLATE_HISTORY_LIMIT")?.unwrap_or(defaults.history_limit);
        if history_limit == 0 {
            bail!("PLATE_HISTORY_LIMIT must be at least 1");
        }

        Ok(Self {
            bind_addr: env::var("PLATE_SERVICE_ADDR").unwrap_or(defaults.bind_addr),
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            engine,
            detector,
            recognizer,
            model_instances,
            processing_timeout,
            history_limit,
            jpeg_quality: parse_var("PLATE_JPEG_QUALITY")?.unwrap_or(defaults.jpeg_quality),
            box_thickness: parse_var("PLATE_BOX_THICKNESS")?.unwrap_or(defaults.box_thickness),
            max_upload_bytes: parse_var("PLATE_MAX_UPLOAD_BYTES")?
                .unwrap_or(defaults.max_upload_bytes),
            static_dir: parse_var("PLATE_STATIC_DIR")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_kind_parse() {
        assert_eq!("ONNX".parse::<EngineKind>().unwrap(), EngineKind::Onnx);
        assert_eq!("mock".parse::<EngineKind>().unwrap(), EngineKind::Mock);
        assert!("tflite".parse::<EngineKind>().is_err());
    }

    #[test]
    fn test_defaults() {
        let config = PlateServiceConfig::default();
        assert_eq!(config.history_limit, 50);
        assert_eq!(config.model_instances, 1);
        assert!(config.processing_timeout.is_none());
        assert_eq!(config.engine, EngineKind::Onnx);
        assert!(config.static_dir.is_none());
    }

    // All env handling lives in one test so parallel tests never see each
    // other's variables.
    #[test]
    fn test_from_env() {
        let vars = [
            ("PLATE_ENGINE", "mock"),
            ("PLATE_SERVICE_ADDR", "127.0.0.1:9000"),
            ("DATABASE_URL", "sqlite://plates.db"),
            ("PLATE_DETECTOR_MODEL", "best.onnx"),
            ("PLATE_EXECUTION_PROVIDER", "CUDA"),
            ("PLATE_MODEL_INSTANCES", "3"),
            ("PLATE_PROCESSING_TIMEOUT_MS", "1500"),
            ("PLATE_HISTORY_LIMIT", "20"),
            ("PLATE_STATIC_DIR", "/srv/plates/static"),
        ];
        for (k, v) in vars {
            env::set_var(k, v);
        }

        let config = PlateServiceConfig::from_env().unwrap();
        assert_eq!(config.engine, EngineKind::Mock);
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.database_url, "sqlite://plates.db");
        assert_eq!(config.detector.model_path, "best.onnx");
        assert_eq!(config.detector.session.execution_provider, "CUDA");
        assert_eq!(config.recognizer.session.execution_provider, "CUDA");
        assert_eq!(config.model_instances, 3);
        assert_eq!(config.processing_timeout, Some(Duration::from_millis(1500)));
        assert_eq!(config.history_limit, 20);
        assert_eq!(config.static_dir.as_deref(), Some("/srv/plates/static"));

        env::set_var("PLATE_MODEL_INSTANCES", "0");
        assert!(PlateServiceConfig::from_env().is_err());

        env::set_var("PLATE_MODEL_INSTANCES", "lots");
        assert!(PlateServiceConfig::from_env().is_err());

        env::set_var("PLATE_ENGINE", "tflite");
        env::remove_var("PLATE_MODEL_INSTANCES");
        assert!(PlateServiceConfig::from_env().is_err());

        for (k, _) in vars {
            env::remove_var(k);
        }
    }
}
