/// Deterministic stand-ins for the ONNX engines, for demos and tests
use super::{PlateDetector, TextRecognizer};
use crate::types::RawDetection;
use anyhow::{bail, Result};
use image::RgbImage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

enum DetectorMode {
    Synthetic,
    Scripted(Vec<RawDetection>),
    Failing(String),
}

/// Mock plate detector.
///
/// The synthetic mode reports one plate centred in the lower half of the
/// image, with a confidence derived from the image size so the same image
/// always gives the same answer.
pub struct MockPlateDetector {
    mode: DetectorMode,
}

impl MockPlateDetector {
    pub fn new() -> Self {
        Self {
            mode: DetectorMode::Synthetic,
        }
    }

    /// Always returns `detections`, regardless of the image
    pub fn scripted(detections: Vec<RawDetection>) -> Self {
        Self {
            mode: DetectorMode::Scripted(detections),
        }
    }

    /// Fails every call with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            mode: DetectorMode::Failing(message.into()),
        }
    }
}

impl Default for MockPlateDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl PlateDetector for MockPlateDetector {
    fn name(&self) -> &'static str {
        "mock_plate_detector"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<RawDetection>> {
        match &self.mode {
            DetectorMode::Scripted(detections) => Ok(detections.clone()),
            DetectorMode::Failing(message) => bail!("{}", message),
            DetectorMode::Synthetic => {
                let (w, h) = (image.width() as f32, image.height() as f32);
                if w < 4.0 || h < 4.0 {
                    return Ok(vec![]);
                }

                let seed = (image.width() as u64 * 31 + image.height() as u64) % 50;
                let confidence = 0.5 + seed as f32 / 100.0;
                Ok(vec![RawDetection::new(
                    [w * 0.35, h * 0.6, w * 0.65, h * 0.75],
                    confidence,
                    0,
                )])
            }
        }
    }
}

/// Mock text recognizer that cycles through a list of plate strings.
///
/// An empty list always reads as unreadable (empty string).
pub struct MockTextRecognizer {
    texts: Vec<String>,
    next: usize,
    calls: Arc<AtomicUsize>,
}

impl MockTextRecognizer {
    pub fn new() -> Self {
        Self::scripted(["MOCK123"])
    }

    pub fn scripted<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            texts: texts.into_iter().map(Into::into).collect(),
            next: 0,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Shared counter of `recognize` invocations
    pub fn call_counter(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

impl Default for MockTextRecognizer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextRecognizer for MockTextRecognizer {
    fn name(&self) -> &'static str {
        "mock_text_recognizer"
    }

    fn recognize(&mut self, crop: &RgbImage) -> Result<String> {
        if crop.width() == 0 || crop.height() == 0 {
            bail!("recognizer invoked with an empty crop");
        }

        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.texts.is_empty() {
            return Ok(String::new());
        }

        let text = self.texts[self.next % self.texts.len()].clone();
        self.next += 1;
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_detector_is_deterministic() {
        let mut detector = MockPlateDetector::new();
        let image = RgbImage::new(640, 480);

        let first = detector.detect(&image).unwrap();
        let second = detector.detect(&image).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 1);
        assert!((0.0..=1.0).contains(&first[0].confidence));
        assert!(first[0].x2 <= 640.0 && first[0].y2 <= 480.0);
    }

    #[test]
    fn test_synthetic_detector_tiny_image_is_empty() {
        let mut detector = MockPlateDetector::new();
        assert!(detector.detect(&RgbImage::new(2, 2)).unwrap().is_empty());
    }

    #[test]
    fn test_failing_detector() {
        let mut detector = MockPlateDetector::failing("model offline");
        let err = detector.detect(&RgbImage::new(10, 10)).unwrap_err();
        assert!(err.to_string().contains("model offline"));
    }

    #[test]
    fn test_recognizer_cycles_and_counts() {
        let mut recognizer = MockTextRecognizer::scripted(["AAA111", "BBB222"]);
        let counter = recognizer.call_counter();
        let crop = RgbImage::new(8, 4);

        assert_eq!(recognizer.recognize(&crop).unwrap(), "AAA111");
        assert_eq!(recognizer.recognize(&crop).unwrap(), "BBB222");
        assert_eq!(recognizer.recognize(&crop).unwrap(), "AAA111");
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_recognizer_without_texts_reads_nothing() {
        let mut recognizer = MockTextRecognizer::scripted(Vec::<String>::new());
        assert_eq!(recognizer.recognize(&RgbImage::new(8, 4)).unwrap(), "");
    }
}
