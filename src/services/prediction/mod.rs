// Prediction service: detect → reduce → annotate → assemble

pub mod reducer;

use crate::core::errors::PredictionError;
use crate::core::types::PredictionResult;
use crate::services::detection::ModelAdapter;
use crate::services::rendering::Annotator;
use crate::utils::Metrics;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

pub use reducer::{reduce, Reduction};

pub struct PredictionService {
    adapter: Arc<ModelAdapter>,
    annotator: Arc<Annotator>,
    metrics: Metrics,
}

impl PredictionService {
    pub fn new(adapter: Arc<ModelAdapter>, annotator: Arc<Annotator>, metrics: Metrics) -> Self {
        Self {
            adapter,
            annotator,
            metrics,
        }
    }

    pub fn adapter(&self) -> &ModelAdapter {
        &self.adapter
    }

    /// Run the full pipeline on one decoded image.
    ///
    /// Model availability errors propagate unchanged; a panicking or failing
    /// backend surfaces as `InferenceFailure`.
    #[instrument(skip_all, fields(width = image.width(), height = image.height()))]
    pub async fn predict(&self, image: DynamicImage) -> Result<PredictionResult, PredictionError> {
        let result = self.run(image).await;
        if let Err(e) = &result {
            self.metrics.record_prediction_failure();
            warn!("Prediction failed: {}", e);
        }
        result
    }

    async fn run(&self, image: DynamicImage) -> Result<PredictionResult, PredictionError> {
        let handle = self.adapter.handle().await?;
        let image = Arc::new(image);

        let started = Instant::now();
        let detections = self.adapter.infer(&handle, Arc::clone(&image)).await?;
        let inference_time = started.elapsed();
        let detection_count = detections.len();

        let reduction = reduce(&detections);

        let annotator = Arc::clone(&self.annotator);
        let annotated_image =
            tokio::task::spawn_blocking(move || annotator.render_png(&image, &detections))
                .await
                .map_err(PredictionError::inference)??;

        self.metrics.record_prediction(detection_count, inference_time);
        debug!(
            "✓ Prediction: {} ({:.2}) from {} detections, inference {:.2}ms",
            reduction.disease,
            reduction.confidence,
            detection_count,
            inference_time.as_secs_f64() * 1000.0
        );

        Ok(reduction.into_result(annotated_image))
    }
}
