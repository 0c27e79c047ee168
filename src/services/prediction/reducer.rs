// Reduces raw detections to a primary diagnosis plus the ordered prediction list

use crate::core::types::{Detection, PredictionItem, PredictionResult};
use tracing::trace;

/// Diagnosis derived from one detection list.
///
/// `disease`/`confidence` always equal `all_predictions[0]`, and `all_predictions`
/// is never empty.
#[derive(Debug, Clone, PartialEq)]
pub struct Reduction {
    pub disease: String,
    pub confidence: f32,
    pub all_predictions: Vec<PredictionItem>,
}

impl Reduction {
    pub fn into_result(self, annotated_image: Vec<u8>) -> PredictionResult {
        PredictionResult {
            disease: self.disease,
            confidence: self.confidence,
            all_predictions: self.all_predictions,
            annotated_image,
        }
    }
}

/// Sort by descending confidence, keeping input order among equal confidences.
///
/// Detections with a non-finite confidence are dropped. An empty (or fully dropped)
/// input yields the single "No Disease Detected" item with confidence 0.0.
pub fn reduce(detections: &[Detection]) -> Reduction {
    let mut items: Vec<PredictionItem> = detections
        .iter()
        .filter(|d| {
            let keep = d.confidence.is_finite();
            if !keep {
                trace!("Dropping detection '{}' with non-finite confidence", d.class_name);
            }
            keep
        })
        .map(|d| PredictionItem {
            class_name: d.class_name.clone(),
            confidence: d.confidence.clamp(0.0, 1.0),
        })
        .collect();

    // Vec::sort_by is stable
    items.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    if items.is_empty() {
        items.push(PredictionItem::no_detection());
    }

    let primary = &items[0];
    Reduction {
        disease: primary.class_name.clone(),
        confidence: primary.confidence,
        all_predictions: items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BoundingBox, NO_DETECTION_LABEL};

    fn det(name: &str, confidence: f32) -> Detection {
        Detection {
            class_id: 0,
            class_name: name.to_string(),
            confidence,
            bbox: BoundingBox::new(0.0, 0.0, 10.0, 10.0),
        }
    }

    fn assert_mirrors_first(reduction: &Reduction) {
        assert_eq!(reduction.disease, reduction.all_predictions[0].class_name);
        assert_eq!(reduction.confidence, reduction.all_predictions[0].confidence);
    }

    #[test]
    fn test_primary_is_highest_confidence() {
        let reduction = reduce(&[det("Leaf Blight", 0.91), det("Healthy", 0.40)]);

        assert_eq!(reduction.disease, "Leaf Blight");
        assert_eq!(reduction.confidence, 0.91);
        let names: Vec<_> = reduction
            .all_predictions
            .iter()
            .map(|p| p.class_name.as_str())
            .collect();
        assert_eq!(names, ["Leaf Blight", "Healthy"]);
        assert_mirrors_first(&reduction);
    }

    #[test]
    fn test_reorders_descending() {
        let reduction = reduce(&[det("Healthy", 0.30), det("Rust", 0.75), det("Leaf Blight", 0.50)]);

        assert_eq!(reduction.disease, "Rust");
        let confidences: Vec<_> = reduction.all_predictions.iter().map(|p| p.confidence).collect();
        assert_eq!(confidences, [0.75, 0.50, 0.30]);
        assert_mirrors_first(&reduction);
    }

    #[test]
    fn test_ties_keep_input_order() {
        let reduction = reduce(&[
            det("A", 0.5),
            det("B", 0.9),
            det("C", 0.5),
            det("D", 0.5),
        ]);

        let names: Vec<_> = reduction
            .all_predictions
            .iter()
            .map(|p| p.class_name.as_str())
            .collect();
        assert_eq!(names, ["B", "A", "C", "D"]);
    }

    #[test]
    fn test_empty_yields_sentinel() {
        let reduction = reduce(&[]);

        assert_eq!(reduction.all_predictions, vec![PredictionItem::no_detection()]);
        assert_eq!(reduction.disease, NO_DETECTION_LABEL);
        assert_eq!(reduction.confidence, 0.0);
    }

    #[test]
    fn test_malformed_confidences_are_dropped() {
        let reduction = reduce(&[det("Broken", f32::NAN), det("Healthy", 0.4)]);
        assert_eq!(reduction.all_predictions.len(), 1);
        assert_eq!(reduction.disease, "Healthy");

        let reduction = reduce(&[det("Broken", f32::INFINITY)]);
        assert_eq!(reduction.disease, NO_DETECTION_LABEL);
    }

    #[test]
    fn test_into_result_keeps_invariant() {
        let result = reduce(&[det("Healthy", 0.4)]).into_result(vec![1, 2, 3]);
        assert_eq!(result.disease, result.all_predictions[0].class_name);
        assert_eq!(result.confidence, result.all_predictions[0].confidence);
        assert_eq!(result.annotated_image, vec![1, 2, 3]);
    }
}
