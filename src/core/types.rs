// Data model shared by the detection, prediction and translation services

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Class name used when the model found nothing
pub const NO_DETECTION_LABEL: &str = "No Disease Detected";

/// Axis-aligned box in pixel coordinates of the original image
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    /// A box is drawable only with finite coordinates and positive extent
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x1 < self.x2
            && self.y1 < self.y2
    }

    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let x1 = self.x1.max(other.x1);
        let y1 = self.y1.max(other.y1);
        let x2 = self.x2.min(other.x2);
        let y2 = self.y2.min(other.y2);

        if x2 <= x1 || y2 <= y1 {
            return 0.0;
        }

        let intersection = (x2 - x1) * (y2 - y1);
        let union = self.area() + other.area() - intersection;

        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// One located, classified region produced by the detector for a single image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub class_id: usize,
    pub class_name: String,
    pub confidence: f32,
    pub bbox: BoundingBox,
}

/// A detection stripped of geometry, as returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionItem {
    pub class_name: String,
    pub confidence: f32,
}

impl PredictionItem {
    pub fn no_detection() -> Self {
        Self {
            class_name: NO_DETECTION_LABEL.to_string(),
            confidence: 0.0,
        }
    }
}

impl From<&Detection> for PredictionItem {
    fn from(detection: &Detection) -> Self {
        Self {
            class_name: detection.class_name.clone(),
            confidence: detection.confidence,
        }
    }
}

/// Outcome of one predict call
///
/// `disease`/`confidence` always mirror `all_predictions[0]`; construct it through
/// `PredictionService` or `Reduction::into_result` to keep that true.
#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    pub disease: String,
    pub confidence: f32,
    pub all_predictions: Vec<PredictionItem>,
    /// PNG-encoded annotated copy of the input
    pub annotated_image: Vec<u8>,
}

/// JSON body of `POST /predict`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionResponse {
    pub disease: String,
    pub confidence: f32,
    pub all_predictions: Vec<PredictionItem>,
    /// `data:image/png;base64,...`
    pub annotated_image: String,
}

/// Body of `POST /translate`
#[derive(Debug, Clone, Deserialize)]
pub struct TranslationRequest {
    pub text: String,
    pub target_lang: String,
    #[serde(default = "default_source_lang")]
    pub source_lang: String,
}

fn default_source_lang() -> String {
    "en".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct TranslationResponse {
    pub translated_text: String,
    pub target_lang: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SupportedLanguagesResponse {
    pub languages: BTreeMap<&'static str, &'static str>,
}

/// Body of `GET /health`
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: &'static str,
    pub model_exists: bool,
    pub model_loaded: bool,
    pub runtime_available: bool,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbox_validity() {
        assert!(BoundingBox::new(0.0, 0.0, 10.0, 10.0).is_valid());
        assert!(!BoundingBox::new(10.0, 0.0, 10.0, 10.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, f32::NAN, 10.0).is_valid());
    }

    #[test]
    fn test_bbox_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        let c = BoundingBox::new(20.0, 20.0, 30.0, 30.0);

        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&c), 0.0);
    }

    #[test]
    fn test_translation_request_defaults_source() {
        let request: TranslationRequest =
            serde_json::from_str(r#"{"text": "Healthy", "target_lang": "es"}"#).unwrap();
        assert_eq!(request.source_lang, "en");
    }
}
