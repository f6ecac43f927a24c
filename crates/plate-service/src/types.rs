use crate::error::PipelineError;
use serde::Serialize;
use std::fmt;

/// Round to three decimal places, half away from zero
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

/// One candidate region as emitted by a detector, in original image pixels
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawDetection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub class_id: u32,
}

impl RawDetection {
    pub fn new(xyxy: [f32; 4], confidence: f32, class_id: u32) -> Self {
        Self {
            x1: xyxy[0],
            y1: xyxy[1],
            x2: xyxy[2],
            y2: xyxy[3],
            confidence,
            class_id,
        }
    }
}

/// Integer pixel box, `x1 <= x2` and `y1 <= y2`.
///
/// Serialized as `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(into = "[u32; 4]")]
pub struct BoundingBox {
    x1: u32,
    y1: u32,
    x2: u32,
    y2: u32,
}

impl BoundingBox {
    pub fn new(x1: u32, y1: u32, x2: u32, y2: u32) -> Result<Self, PipelineError> {
        if x1 > x2 || y1 > y2 {
            return Err(PipelineError::InvalidDetection(format!(
                "inverted box [{}, {}, {}, {}]",
                x1, y1, x2, y2
            )));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Cast float model coordinates to integers (truncating) and clip them
    /// into a `width` x `height` image. Inverted edges collapse onto the
    /// leading edge, yielding an empty box.
    pub fn from_raw(raw: &RawDetection, width: u32, height: u32) -> Self {
        // float -> int casts saturate; NaN maps to 0
        let px = |v: f32| v.trunc() as u32;
        Self {
            x1: px(raw.x1),
            y1: px(raw.y1),
            x2: px(raw.x2),
            y2: px(raw.y2),
        }
        .clip_to(width, height)
    }

    /// Clamp into a `width` x `height` image; edges pushed past each other collapse
    pub fn clip_to(&self, width: u32, height: u32) -> Self {
        let x1 = self.x1.min(width);
        let y1 = self.y1.min(height);
        Self {
            x1,
            y1,
            x2: self.x2.min(width).max(x1),
            y2: self.y2.min(height).max(y1),
        }
    }

    pub fn x1(&self) -> u32 {
        self.x1
    }

    pub fn y1(&self) -> u32 {
        self.y1
    }

    pub fn x2(&self) -> u32 {
        self.x2
    }

    pub fn y2(&self) -> u32 {
        self.y2
    }

    pub fn width(&self) -> u32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> u32 {
        self.y2 - self.y1
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

impl From<BoundingBox> for [u32; 4] {
    fn from(b: BoundingBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

/// One located-and-recognized plate region
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    bbox: BoundingBox,
    confidence: f64,
    #[serde(rename = "class")]
    class_id: u32,
    plate_text: String,
}

impl Detection {
    /// Builds a detection, rounding `confidence` to three decimals.
    ///
    /// Confidence must be finite and within `[0, 1]`.
    pub fn new(
        bbox: BoundingBox,
        confidence: f64,
        class_id: u32,
        plate_text: impl Into<String>,
    ) -> Result<Self, PipelineError> {
        if !confidence.is_finite() || !(0.0..=1.0).contains(&confidence) {
            return Err(PipelineError::InvalidDetection(format!(
                "confidence {} outside [0, 1]",
                confidence
            )));
        }

        Ok(Self {
            bbox,
            confidence: round3(confidence),
            class_id,
            plate_text: plate_text.into(),
        })
    }

    pub fn bbox(&self) -> &BoundingBox {
        &self.bbox
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn class_id(&self) -> u32 {
        self.class_id
    }

    pub fn plate_text(&self) -> &str {
        &self.plate_text
    }
}

/// All detections for one processed image plus their mean confidence
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionBatch {
    detections: Vec<Detection>,
    accuracy: f64,
}

impl DetectionBatch {
    pub fn new(detections: Vec<Detection>) -> Self {
        let accuracy = if detections.is_empty() {
            0.0
        } else {
            let sum: f64 = detections.iter().map(Detection::confidence).sum();
            round3(sum / detections.len() as f64)
        };

        Self {
            detections,
            accuracy,
        }
    }

    pub fn detections(&self) -> &[Detection] {
        &self.detections
    }

    /// Mean detection confidence, exactly `0.0` for an empty batch
    pub fn accuracy(&self) -> f64 {
        self.accuracy
    }

    pub fn len(&self) -> usize {
        self.detections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detections.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryAction {
    #[default]
    Entry,
    Exit,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Entry => "entry",
            HistoryAction::Exit => "exit",
        }
    }
}

impl fmt::Display for HistoryAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted plate event
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    pub id: i64,
    pub plate: String,
    pub confidence: f64,
    /// Local time, `YYYY-MM-DD HH:MM:SS`
    pub timestamp: String,
    /// Kept as text so rows written with a newer action kind still load
    pub action: String,
}

impl HistoryRecord {
    /// Positional `(plate, confidence, timestamp, action)` view used by the history endpoint
    pub fn as_row(&self) -> (&str, f64, &str, &str) {
        (&self.plate, self.confidence, &self.timestamp, &self.action)
    }
}

/// Response body for an image submission
#[derive(Debug, Clone, Serialize)]
pub struct UploadResponse {
    pub detections: Vec<Detection>,
    pub accuracy: f64,
    /// `data:image/jpeg;base64,...`
    pub annotated_image: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round3() {
        assert_eq!(round3(0.853121), 0.853);
        assert_eq!(round3(0.99951), 1.0);
        assert_eq!(round3(0.0), 0.0);
        assert_eq!(round3(1.0), 1.0);
    }

    #[test]
    fn test_bounding_box_rejects_inverted() {
        assert!(BoundingBox::new(10, 10, 5, 30).is_err());
        assert!(BoundingBox::new(10, 30, 50, 10).is_err());
        assert!(BoundingBox::new(10, 10, 10, 10).is_ok());
    }

    #[test]
    fn test_bounding_box_from_raw_truncates_and_clips() {
        let raw = RawDetection::new([10.9, 10.2, 50.7, 30.99], 0.5, 0);
        let bbox = BoundingBox::from_raw(&raw, 100, 100);
        assert_eq!(<[u32; 4]>::from(bbox), [10, 10, 50, 30]);

        let raw = RawDetection::new([-5.0, -3.0, 250.0, 90.0], 0.5, 0);
        let bbox = BoundingBox::from_raw(&raw, 200, 80);
        assert_eq!(<[u32; 4]>::from(bbox), [0, 0, 200, 80]);
    }

    #[test]
    fn test_bounding_box_clip_to() {
        let bbox = BoundingBox::new(10, 5, 120, 80).unwrap();
        assert_eq!(<[u32; 4]>::from(bbox.clip_to(100, 60)), [10, 5, 100, 60]);

        let outside = BoundingBox::new(150, 70, 180, 90).unwrap().clip_to(100, 60);
        assert_eq!(<[u32; 4]>::from(outside), [100, 60, 100, 60]);
        assert!(outside.is_empty());
    }

    #[test]
    fn test_bounding_box_from_raw_inverted_collapses() {
        let raw = RawDetection::new([40.0, 20.0, 30.0, 25.0], 0.5, 0);
        let bbox = BoundingBox::from_raw(&raw, 100, 100);
        assert_eq!(bbox.x1(), 40);
        assert_eq!(bbox.x2(), 40);
        assert!(bbox.is_empty());

        let raw = RawDetection::new([f32::NAN, 0.0, 10.0, 10.0], 0.5, 0);
        assert_eq!(BoundingBox::from_raw(&raw, 100, 100).x1(), 0);
    }

    #[test]
    fn test_detection_validates_confidence() {
        let bbox = BoundingBox::new(0, 0, 10, 10).unwrap();
        assert!(Detection::new(bbox, 1.2, 0, "").is_err());
        assert!(Detection::new(bbox, -0.1, 0, "").is_err());
        assert!(Detection::new(bbox, f64::NAN, 0, "").is_err());

        let detection = Detection::new(bbox, 0.853121, 0, "ABC123").unwrap();
        assert_eq!(detection.confidence(), 0.853);
    }

    #[test]
    fn test_detection_serializes_flat_shape() {
        let bbox = BoundingBox::new(10, 10, 50, 30).unwrap();
        let detection = Detection::new(bbox, 0.853121, 0, "ABC123").unwrap();
        let value = serde_json::to_value(&detection).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "bbox": [10, 10, 50, 30],
                "confidence": 0.853,
                "class": 0,
                "plate_text": "ABC123"
            })
        );
    }

    #[test]
    fn test_empty_batch_accuracy_is_zero() {
        let batch = DetectionBatch::new(vec![]);
        assert!(batch.is_empty());
        assert_eq!(batch.accuracy(), 0.0);
    }

    #[test]
    fn test_batch_accuracy_is_rounded_mean() {
        let bbox = BoundingBox::new(0, 0, 10, 10).unwrap();
        let batch = DetectionBatch::new(vec![
            Detection::new(bbox, 0.9, 0, "A").unwrap(),
            Detection::new(bbox, 0.4, 0, "B").unwrap(),
            Detection::new(bbox, 0.333, 0, "C").unwrap(),
        ]);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.accuracy(), 0.544);
    }

    #[test]
    fn test_history_action_strings() {
        assert_eq!(HistoryAction::Entry.to_string(), "entry");
        assert_eq!(HistoryAction::Exit.as_str(), "exit");
        assert_eq!(HistoryAction::default(), HistoryAction::Entry);
    }

    #[test]
    fn test_history_record_row_shape() {
        let record = HistoryRecord {
            id: 7,
            plate: "XYZ999".to_string(),
            confidence: 0.9,
            timestamp: "2024-01-02 03:04:05".to_string(),
            action: "entry".to_string(),
        };
        let row = serde_json::to_value(record.as_row()).unwrap();
        assert_eq!(
            row,
            serde_json::json!(["XYZ999", 0.9, "2024-01-02 03:04:05", "entry"])
        );
    }
}
