// Request Orchestrator: validate upload → decode → predict → translate → serialize

use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::core::errors::PredictionError;
use crate::core::types::{
    HealthReport, PredictionResponse, PredictionResult, SupportedLanguagesResponse,
    TranslationRequest, TranslationResponse,
};
use crate::services::prediction::PredictionService;
use crate::services::translation::TranslationService;
use crate::utils::image_ops::{decode_rgb_async, png_data_uri};

/// Reject uploads that cannot be an image before spending any decode time on them
pub fn validate_upload(
    content_type: Option<&str>,
    bytes: &[u8],
    max_upload_bytes: usize,
) -> Result<(), PredictionError> {
    if let Some(content_type) = content_type {
        if !content_type.trim().to_ascii_lowercase().starts_with("image/") {
            return Err(PredictionError::InvalidImage(format!(
                "file must be an image, got content type '{}'",
                content_type
            )));
        }
    }

    if bytes.is_empty() {
        return Err(PredictionError::InvalidImage("uploaded file is empty".to_string()));
    }

    if bytes.len() > max_upload_bytes {
        return Err(PredictionError::InvalidImage(format!(
            "uploaded file is {} bytes, limit is {}",
            bytes.len(),
            max_upload_bytes
        )));
    }

    Ok(())
}

/// Normalized target language, `None` when absent or blank
fn requested_language(lang: Option<&str>) -> Option<String> {
    lang.map(|l| l.trim().to_lowercase()).filter(|l| !l.is_empty())
}

fn into_response(result: PredictionResult) -> PredictionResponse {
    PredictionResponse {
        annotated_image: png_data_uri(&result.annotated_image),
        disease: result.disease,
        confidence: result.confidence,
        all_predictions: result.all_predictions,
    }
}

pub struct RequestOrchestrator {
    prediction: Arc<PredictionService>,
    translation: Arc<TranslationService>,
    max_upload_bytes: usize,
}

impl RequestOrchestrator {
    pub fn new(
        prediction: Arc<PredictionService>,
        translation: Arc<TranslationService>,
        max_upload_bytes: usize,
    ) -> Self {
        Self {
            prediction,
            translation,
            max_upload_bytes,
        }
    }

    pub fn prediction(&self) -> &PredictionService {
        &self.prediction
    }

    pub fn translation(&self) -> &TranslationService {
        &self.translation
    }

    /// Full predict flow for one upload
    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub async fn predict(
        &self,
        content_type: Option<&str>,
        bytes: Vec<u8>,
        lang: Option<&str>,
    ) -> Result<PredictionResponse, PredictionError> {
        validate_upload(content_type, &bytes, self.max_upload_bytes)?;

        let image = decode_rgb_async(bytes).await?;
        debug!("Decoded upload: {}x{}", image.width(), image.height());

        let mut result = self.prediction.predict(image).await?;

        if let Some(lang) = requested_language(lang) {
            if lang != self.translation.default_language() {
                result = self.translation.translate_response(result, &lang).await;
            }
        }

        info!(
            "✓ Predicted '{}' ({:.2}) with {} predictions",
            result.disease,
            result.confidence,
            result.all_predictions.len()
        );
        Ok(into_response(result))
    }

    /// Single-string translation; degrades to the input text on failure
    pub async fn translate(&self, request: TranslationRequest) -> TranslationResponse {
        let target = request.target_lang.trim().to_lowercase();
        let source = request.source_lang.trim().to_lowercase();
        let translated_text = self
            .translation
            .translate_text(&request.text, &target, &source)
            .await;

        TranslationResponse {
            translated_text,
            target_lang: target,
        }
    }

    pub fn languages(&self) -> SupportedLanguagesResponse {
        SupportedLanguagesResponse {
            languages: self.translation.supported_languages().clone(),
        }
    }

    pub fn health(&self) -> HealthReport {
        let adapter = self.prediction.adapter();
        let model_loaded = adapter.is_loaded();
        let model_exists = adapter.model_exists();
        let runtime_available = adapter.runtime_available();

        HealthReport {
            status: if model_loaded || (model_exists && runtime_available) {
                "healthy"
            } else {
                "degraded"
            },
            model_exists,
            model_loaded,
            runtime_available,
            error: adapter.last_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{BoundingBox, Detection};
    use crate::services::detection::testing::{CountingLoader, FixedModel};
    use crate::services::detection::ModelAdapter;
    use crate::services::rendering::Annotator;
    use crate::services::translation::{TranslationCache, TranslationProvider};
    use crate::core::errors::TranslationResult;
    use crate::utils::{encode_png, Metrics};
    use async_trait::async_trait;
    use image::DynamicImage;

    struct SpanishProvider;

    #[async_trait]
    impl TranslationProvider for SpanishProvider {
        async fn translate(&self, text: &str, _: &str, _: &str) -> TranslationResult<String> {
            Ok(match text {
                "Leaf Blight" => "Tizón de la hoja".to_string(),
                other => other.to_string(),
            })
        }
    }

    fn orchestrator(fail_first: usize) -> RequestOrchestrator {
        let metrics = Metrics::new();
        let mut loader = CountingLoader::new(Arc::new(FixedModel(vec![Detection {
            class_id: 0,
            class_name: "Leaf Blight".to_string(),
            confidence: 0.91,
            bbox: BoundingBox::new(2.0, 2.0, 20.0, 20.0),
        }])));
        loader.fail_first = fail_first;

        let prediction = PredictionService::new(
            Arc::new(ModelAdapter::new(Arc::new(loader))),
            Arc::new(Annotator::new(None, 16.0, 3)),
            metrics.clone(),
        );
        let translation = TranslationService::new(
            Some(Arc::new(SpanishProvider)),
            TranslationCache::new(16, None),
            "en",
            metrics,
        );
        RequestOrchestrator::new(Arc::new(prediction), Arc::new(translation), 1024 * 1024)
    }

    fn png() -> Vec<u8> {
        encode_png(&DynamicImage::new_rgb8(32, 32)).unwrap()
    }

    #[test]
    fn test_validate_upload() {
        assert!(validate_upload(Some("image/png"), b"x", 10).is_ok());
        assert!(validate_upload(None, b"x", 10).is_ok());
        assert!(validate_upload(Some("text/plain"), b"x", 10).is_err());
        assert!(validate_upload(Some("image/png"), b"", 10).is_err());
        assert!(validate_upload(Some("image/png"), &[0u8; 11], 10).is_err());
    }

    #[tokio::test]
    async fn test_predict_returns_data_uri() {
        let response = orchestrator(0)
            .predict(Some("image/png"), png(), None)
            .await
            .unwrap();

        assert_eq!(response.disease, "Leaf Blight");
        assert_eq!(response.confidence, 0.91);
        assert!(response.annotated_image.starts_with("data:image/png;base64,"));
    }

    #[tokio::test]
    async fn test_predict_translates_when_asked() {
        let orchestrator = orchestrator(0);

        let response = orchestrator
            .predict(Some("image/png"), png(), Some(" ES "))
            .await
            .unwrap();
        assert_eq!(response.disease, "Tizón de la hoja");
        assert_eq!(response.all_predictions[0].class_name, "Tizón de la hoja");

        let response = orchestrator
            .predict(Some("image/png"), png(), Some("en"))
            .await
            .unwrap();
        assert_eq!(response.disease, "Leaf Blight");
    }

    #[tokio::test]
    async fn test_predict_rejects_undecodable_upload() {
        let err = orchestrator(0)
            .predict(Some("image/jpeg"), b"not really a jpeg".to_vec(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, PredictionError::InvalidImage(_)));
    }

    #[tokio::test]
    async fn test_health_reports_load_failure() {
        let orchestrator = orchestrator(1);
        assert!(orchestrator.predict(None, png(), None).await.is_err());

        let health = orchestrator.health();
        assert!(!health.model_loaded);
        assert!(health.error.is_some());

        orchestrator.predict(None, png(), None).await.unwrap();
        let health = orchestrator.health();
        assert!(health.model_loaded);
        assert_eq!(health.status, "healthy");
        assert!(health.error.is_none());
    }

    #[tokio::test]
    async fn test_translate_endpoint_flow() {
        let response = orchestrator(0)
            .translate(TranslationRequest {
                text: "Leaf Blight".to_string(),
                target_lang: "es".to_string(),
                source_lang: "en".to_string(),
            })
            .await;
        assert_eq!(response.translated_text, "Tizón de la hoja");
        assert_eq!(response.target_lang, "es");
    }
}
