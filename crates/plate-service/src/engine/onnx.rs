/// ONNX Runtime engines for plate detection and plate OCR
///
/// Detection expects a YOLOv8-style export (`[1, 4 + classes, predictions]`,
/// boxes as centre/size in model input pixels). OCR expects a CRNN-style
/// export producing `[1, timesteps, vocab + 1]` scores with the CTC blank at
/// index 0.
use super::{PlateDetector, TextRecognizer};
use crate::types::RawDetection;
use anyhow::{anyhow, bail, Context, Result};
use image::{imageops::FilterType, RgbImage};
use ndarray::{Array, IxDyn};
use ort::{
    execution_providers::{CPUExecutionProvider, CUDAExecutionProvider, TensorRTExecutionProvider},
    session::{builder::GraphOptimizationLevel, Session},
    value::Value,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Execution provider preference (CPU, CUDA, TensorRT)
    #[serde(default = "default_execution_provider")]
    pub execution_provider: String,

    /// GPU device ID (0, 1, 2, etc.)
    #[serde(default)]
    pub device_id: i32,

    /// Number of intra-operation threads
    #[serde(default = "default_intra_threads")]
    pub intra_threads: usize,

    /// Number of inter-operation threads
    #[serde(default = "default_inter_threads")]
    pub inter_threads: usize,
}

fn default_execution_provider() -> String {
    "CPU".to_string()
}

fn default_intra_threads() -> usize {
    4
}

fn default_inter_threads() -> usize {
    1
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            execution_provider: default_execution_provider(),
            device_id: 0,
            intra_threads: default_intra_threads(),
            inter_threads: default_inter_threads(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Path to the plate detection ONNX model file
    pub model_path: String,

    /// Confidence threshold for plate detections (0.0 to 1.0)
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,

    /// IoU (Intersection over Union) threshold for NMS
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Maximum number of plates to keep per image
    #[serde(default = "default_max_detections")]
    pub max_detections: usize,

    /// Detection model input size (width and height)
    #[serde(default = "default_input_size")]
    pub input_size: u32,

    #[serde(default)]
    pub session: SessionConfig,
}

fn default_confidence() -> f32 {
    0.25
}

fn default_iou_threshold() -> f32 {
    0.45
}

fn default_max_detections() -> usize {
    10
}

fn default_input_size() -> u32 {
    640
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: "models/plate_detector.onnx".to_string(),
            confidence_threshold: default_confidence(),
            iou_threshold: default_iou_threshold(),
            max_detections: default_max_detections(),
            input_size: default_input_size(),
            session: SessionConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecognizerConfig {
    /// Path to the OCR ONNX model file
    pub model_path: String,

    /// OCR model input width
    #[serde(default = "default_ocr_input_width")]
    pub input_width: u32,

    /// OCR model input height
    #[serde(default = "default_ocr_input_height")]
    pub input_height: u32,

    /// Character vocabulary; index 0 of the model output is the CTC blank
    #[serde(default = "default_char_vocab")]
    pub char_vocab: String,

    #[serde(default)]
    pub session: SessionConfig,
}

fn default_ocr_input_width() -> u32 {
    200
}

fn default_ocr_input_height() -> u32 {
    64
}

fn default_char_vocab() -> String {
    "0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ-".to_string()
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            model_path: "models/plate_ocr.onnx".to_string(),
            input_width: default_ocr_input_width(),
            input_height: default_ocr_input_height(),
            char_vocab: default_char_vocab(),
            session: SessionConfig::default(),
        }
    }
}

/// Create an ONNX session, falling back TensorRT -> CUDA -> CPU.
///
/// Returns the session and the provider that was actually configured.
fn create_session(model_path: &str, config: &SessionConfig) -> Result<(Session, String)> {
    match config.execution_provider.to_uppercase().as_str() {
        "TENSORRT" => {
            tracing::info!("Attempting TensorRT for {}", model_path);
            let result = Session::builder()
                .context("Failed to create session builder")?
                .with_optimization_level(GraphOptimizationLevel::Level3)
                .context("Failed to set optimization level")?
                .with_intra_threads(config.intra_threads)
                .context("Failed to set intra threads")?
                .with_inter_threads(config.inter_threads)
                .context("Failed to set inter threads")?
                .with_execution_providers([
                    TensorRTExecutionProvider::default()
                        .with_device_id(config.device_id)
                        .build(),
                    CUDAExecutionProvider::default()
                        .with_device_id(config.device_id)
                        .build(),
                    CPUExecutionProvider::default().build(),
                ])
                .context("Failed to set execution providers")?
                .commit_from_file(model_path);

            match result {
                Ok(session) => Ok((session, "TensorRT".to_string())),
                Err(e) => {
                    tracing::warn!("TensorRT failed, trying CUDA: {}", e);
                    try_cuda(model_path, config)
                }
            }
        }
        "CUDA" => try_cuda(model_path, config),
        _ => try_cpu(model_path, config),
    }
}

fn try_cuda(model_path: &str, config: &SessionConfig) -> Result<(Session, String)> {
    tracing::info!("Attempting CUDA for {}", model_path);
    let result = Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(config.intra_threads)
        .context("Failed to set intra threads")?
        .with_inter_threads(config.inter_threads)
        .context("Failed to set inter threads")?
        .with_execution_providers([
            CUDAExecutionProvider::default()
                .with_device_id(config.device_id)
                .build(),
            CPUExecutionProvider::default().build(),
        ])
        .context("Failed to set execution providers")?
        .commit_from_file(model_path);

    match result {
        Ok(session) => Ok((session, "CUDA".to_string())),
        Err(e) => {
            tracing::warn!("CUDA failed, using CPU: {}", e);
            try_cpu(model_path, config)
        }
    }
}

fn try_cpu(model_path: &str, config: &SessionConfig) -> Result<(Session, String)> {
    tracing::info!("Using CPU for {}", model_path);
    let session = Session::builder()
        .context("Failed to create session builder")?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .context("Failed to set optimization level")?
        .with_intra_threads(config.intra_threads)
        .context("Failed to set intra threads")?
        .with_inter_threads(config.inter_threads)
        .context("Failed to set inter threads")?
        .commit_from_file(model_path)
        .with_context(|| format!("Failed to load model from {}", model_path))?;
    Ok((session, "CPU".to_string()))
}

/// Run `session` on one input and copy out the first output tensor whose name matches
fn run_single(session: &mut Session, input: Array<f32, IxDyn>, names: &[&str]) -> Result<Array<f32, IxDyn>> {
    let input_tensor = Value::from_array(input)?;
    let outputs = session.run(ort::inputs![input_tensor])?;

    let output_value = names
        .iter()
        .find_map(|name| outputs.get(*name))
        .ok_or_else(|| anyhow!("No output tensor found (tried: {})", names.join(", ")))?;
    let (shape, data) = output_value.try_extract_tensor::<f32>()?;

    let shape_usize: Vec<usize> = shape.as_ref().iter().map(|&x| x as usize).collect();
    Ok(Array::from_shape_vec(IxDyn(&shape_usize), data.to_vec())?)
}

/// Plate detector backed by a YOLOv8 ONNX export
pub struct OnnxPlateDetector {
    config: DetectorConfig,
    session: Session,
    execution_provider: String,
}

impl OnnxPlateDetector {
    pub fn load(config: DetectorConfig) -> Result<Self> {
        let (session, execution_provider) = create_session(&config.model_path, &config.session)?;
        tracing::info!(
            "Initialized plate detection model - path: {}, provider: {}, device: {}",
            config.model_path,
            execution_provider,
            config.session.device_id
        );

        Ok(Self {
            config,
            session,
            execution_provider,
        })
    }
}

impl PlateDetector for OnnxPlateDetector {
    fn name(&self) -> &'static str {
        "onnx_plate_detector"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        let input = preprocess_for_detection(image, self.config.input_size);
        let output = run_single(&mut self.session, input, &["output0", "output", "boxes"])?;

        telemetry::metrics::PLATE_INFERENCE_TOTAL
            .with_label_values(&[self.name(), &self.execution_provider])
            .inc();

        postprocess_detection(&self.config, &output, image.width(), image.height())
    }
}

/// Resize to a square model input, NCHW, normalized to [0, 1]
fn preprocess_for_detection(image: &RgbImage, size: u32) -> Array<f32, IxDyn> {
    let resized = image::imageops::resize(image, size, size, FilterType::Triangle);
    let mut input = Array::zeros(IxDyn(&[1, 3, size as usize, size as usize]));

    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            input[[0, c, y as usize, x as usize]] = pixel[c] as f32 / 255.0;
        }
    }

    input
}

/// Decode YOLOv8 output into boxes in original image pixels, then NMS
fn postprocess_detection(
    config: &DetectorConfig,
    output: &Array<f32, IxDyn>,
    original_width: u32,
    original_height: u32,
) -> Result<Vec<RawDetection>> {
    let shape = output.shape();
    if shape.len() != 3 || shape[1] < 5 {
        bail!("unexpected detection output shape {:?}", shape);
    }

    let scale_x = original_width as f32 / config.input_size as f32;
    let scale_y = original_height as f32 / config.input_size as f32;
    let num_classes = shape[1] - 4;
    let num_predictions = shape[2];

    let mut candidates = Vec::new();
    for i in 0..num_predictions {
        let (class_id, confidence) = (0..num_classes)
            .map(|c| (c, output[[0, 4 + c, i]]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });

        if confidence < config.confidence_threshold {
            continue;
        }

        let cx = output[[0, 0, i]];
        let cy = output[[0, 1, i]];
        let w = output[[0, 2, i]];
        let h = output[[0, 3, i]];

        candidates.push(RawDetection::new(
            [
                (cx - w / 2.0) * scale_x,
                (cy - h / 2.0) * scale_y,
                (cx + w / 2.0) * scale_x,
                (cy + h / 2.0) * scale_y,
            ],
            confidence.clamp(0.0, 1.0),
            class_id as u32,
        ));
    }

    let mut kept = nms(candidates, config.iou_threshold);
    kept.truncate(config.max_detections);
    Ok(kept)
}

/// Greedy non-maximum suppression, highest confidence first
fn nms(mut boxes: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    boxes.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<RawDetection> = Vec::new();
    for candidate in boxes {
        if keep.iter().all(|k| iou(k, &candidate) < iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

fn iou(a: &RawDetection, b: &RawDetection) -> f32 {
    let x1 = a.x1.max(b.x1);
    let y1 = a.y1.max(b.y1);
    let x2 = a.x2.min(b.x2);
    let y2 = a.y2.min(b.y2);

    let intersection = if x2 > x1 && y2 > y1 {
        (x2 - x1) * (y2 - y1)
    } else {
        0.0
    };

    let area_a = (a.x2 - a.x1).max(0.0) * (a.y2 - a.y1).max(0.0);
    let area_b = (b.x2 - b.x1).max(0.0) * (b.y2 - b.y1).max(0.0);
    let union = area_a + area_b - intersection;

    if union > 0.0 {
        intersection / union
    } else {
        0.0
    }
}

/// Plate OCR backed by a CTC text-recognition ONNX export
pub struct OnnxTextRecognizer {
    config: RecognizerConfig,
    vocab: Vec<char>,
    session: Session,
    execution_provider: String,
}

impl OnnxTextRecognizer {
    pub fn load(config: RecognizerConfig) -> Result<Self> {
        let (session, execution_provider) = create_session(&config.model_path, &config.session)?;
        tracing::info!(
            "Initialized plate OCR model - path: {}, provider: {}",
            config.model_path,
            execution_provider
        );

        Ok(Self {
            vocab: config.char_vocab.chars().collect(),
            config,
            session,
            execution_provider,
        })
    }
}

impl TextRecognizer for OnnxTextRecognizer {
    fn name(&self) -> &'static str {
        "onnx_text_recognizer"
    }

    fn recognize(&mut self, crop: &RgbImage) -> Result<String> {
        let input = preprocess_for_ocr(crop, self.config.input_width, self.config.input_height);
        let output = run_single(&mut self.session, input, &["output", "output0", "logits"])?;

        telemetry::metrics::PLATE_INFERENCE_TOTAL
            .with_label_values(&[self.name(), &self.execution_provider])
            .inc();

        ctc_decode(&output, &self.vocab)
    }
}

/// Grayscale, resized, NCHW with a single channel, normalized to [0, 1]
fn preprocess_for_ocr(crop: &RgbImage, width: u32, height: u32) -> Array<f32, IxDyn> {
    let resized = image::imageops::resize(crop, width, height, FilterType::Triangle);
    let gray = image::imageops::grayscale(&resized);
    let mut input = Array::zeros(IxDyn(&[1, 1, height as usize, width as usize]));

    for (x, y, pixel) in gray.enumerate_pixels() {
        input[[0, 0, y as usize, x as usize]] = pixel[0] as f32 / 255.0;
    }

    input
}

/// Greedy CTC decoding: argmax per timestep, drop blanks and repeats
fn ctc_decode(output: &Array<f32, IxDyn>, vocab: &[char]) -> Result<String> {
    let shape = output.shape();
    if shape.len() != 3 {
        bail!("unexpected OCR output shape {:?}", shape);
    }

    let mut text = String::new();
    let mut prev_idx = 0;

    for t in 0..shape[1] {
        let best = (0..shape[2])
            .map(|c| (c, output[[0, t, c]]))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best })
            .0;

        if best > 0 && best != prev_idx {
            if let Some(ch) = vocab.get(best - 1) {
                text.push(*ch);
            }
        }
        prev_idx = best;
    }

    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let detector = DetectorConfig::default();
        assert_eq!(detector.iou_threshold, 0.45);
        assert_eq!(detector.max_detections, 10);
        assert_eq!(detector.input_size, 640);
        assert_eq!(detector.session.execution_provider, "CPU");

        let recognizer = RecognizerConfig::default();
        assert_eq!(recognizer.input_width, 200);
        assert_eq!(recognizer.input_height, 64);
        assert!(recognizer.char_vocab.contains("0123456789"));
        assert!(recognizer.char_vocab.contains("ABCDEFGHIJKLMNOPQRSTUVWXYZ"));
    }

    #[test]
    fn test_detector_config_from_partial_json() {
        let config: DetectorConfig = serde_json::from_value(serde_json::json!({
            "model_path": "best.onnx",
            "confidence_threshold": 0.5,
            "session": { "execution_provider": "CUDA" }
        }))
        .unwrap();

        assert_eq!(config.model_path, "best.onnx");
        assert_eq!(config.confidence_threshold, 0.5);
        assert_eq!(config.max_detections, 10);
        assert_eq!(config.session.execution_provider, "CUDA");
        assert_eq!(config.session.intra_threads, 4);
    }

    #[test]
    fn test_load_missing_model_fails() {
        let config = DetectorConfig {
            model_path: "models/does_not_exist.onnx".to_string(),
            ..DetectorConfig::default()
        };
        assert!(OnnxPlateDetector::load(config).is_err());
    }

    #[test]
    fn test_iou() {
        let a = RawDetection::new([10.0, 10.0, 60.0, 30.0], 0.9, 0);
        let b = RawDetection::new([30.0, 15.0, 80.0, 35.0], 0.8, 0);
        let far = RawDetection::new([100.0, 100.0, 150.0, 120.0], 0.8, 0);

        let overlap = iou(&a, &b);
        assert!(overlap > 0.0 && overlap < 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 0.001);
        assert_eq!(iou(&a, &far), 0.0);
    }

    #[test]
    fn test_nms_keeps_best_of_overlapping() {
        let boxes = vec![
            RawDetection::new([10.0, 10.0, 110.0, 40.0], 0.9, 0),
            RawDetection::new([15.0, 12.0, 115.0, 42.0], 0.8, 0),
            RawDetection::new([200.0, 200.0, 300.0, 230.0], 0.85, 0),
        ];

        let kept = nms(boxes, 0.45);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].confidence, 0.85);
    }

    #[test]
    fn test_postprocess_scales_and_picks_class() {
        let config = DetectorConfig {
            input_size: 100,
            confidence_threshold: 0.5,
            ..DetectorConfig::default()
        };

        // [1, 4 + 2 classes, 2 predictions]
        let mut output = Array::zeros(IxDyn(&[1, 6, 2]));
        // prediction 0: centre (50, 50), 20x10, class 1 wins
        output[[0, 0, 0]] = 50.0;
        output[[0, 1, 0]] = 50.0;
        output[[0, 2, 0]] = 20.0;
        output[[0, 3, 0]] = 10.0;
        output[[0, 4, 0]] = 0.3;
        output[[0, 5, 0]] = 0.9;
        // prediction 1: below threshold
        output[[0, 4, 1]] = 0.1;
        output[[0, 5, 1]] = 0.2;

        let detections = postprocess_detection(&config, &output, 200, 100).unwrap();
        assert_eq!(detections.len(), 1);

        let d = detections[0];
        assert_eq!(d.class_id, 1);
        assert_eq!(d.confidence, 0.9);
        assert_eq!([d.x1, d.y1, d.x2, d.y2], [80.0, 45.0, 120.0, 55.0]);
    }

    #[test]
    fn test_postprocess_rejects_bad_shape() {
        let config = DetectorConfig::default();
        let output = Array::zeros(IxDyn(&[1, 3, 8]));
        assert!(postprocess_detection(&config, &output, 10, 10).is_err());
    }

    #[test]
    fn test_ctc_decode_drops_blanks_and_repeats() {
        let vocab: Vec<char> = default_char_vocab().chars().collect();
        let vocab_size = vocab.len() + 1;
        // blank, A, A, blank, B, C
        let path = [0, 11, 11, 0, 12, 13];

        let mut output = Array::from_elem(IxDyn(&[1, path.len(), vocab_size]), 0.01f32);
        for (t, &idx) in path.iter().enumerate() {
            output[[0, t, idx]] = 0.9;
        }

        assert_eq!(ctc_decode(&output, &vocab).unwrap(), "ABC");
    }

    #[test]
    fn test_ctc_decode_all_blank_is_empty() {
        let vocab: Vec<char> = default_char_vocab().chars().collect();
        let mut output = Array::from_elem(IxDyn(&[1, 4, vocab.len() + 1]), 0.01f32);
        for t in 0..4 {
            output[[0, t, 0]] = 0.9;
        }
        assert_eq!(ctc_decode(&output, &vocab).unwrap(), "");
    }

    #[test]
    fn test_preprocess_shapes() {
        let image = RgbImage::from_pixel(30, 20, image::Rgb([255, 0, 0]));

        let det = preprocess_for_detection(&image, 32);
        assert_eq!(det.shape(), &[1, 3, 32, 32]);
        assert!((det[[0, 0, 5, 5]] - 1.0).abs() < 1e-6);
        assert_eq!(det[[0, 1, 5, 5]], 0.0);

        let ocr = preprocess_for_ocr(&image, 40, 16);
        assert_eq!(ocr.shape(), &[1, 1, 16, 40]);
    }
}
