// Typed errors for the prediction and translation pipeline
//
// Using thiserror for ergonomic error definitions with:
// - Type-safe matching at the HTTP boundary (503 vs 500 vs 400)
// - Source error chaining for inference and encoding failures

use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the prediction pipeline
#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("Detection runtime is unavailable: {reason}")]
    ModelUnavailable { reason: String },

    #[error("Model file not found at {}. Export the trained model to ONNX first", path.display())]
    ModelFileMissing { path: PathBuf },

    #[error("Inference failed: {source}")]
    InferenceFailure {
        #[source]
        source: anyhow::Error,
    },

    #[error("Invalid image: {0}")]
    InvalidImage(String),

    #[error("Rendering failed: {0}")]
    RenderingFailed(#[from] RenderingError),
}

impl PredictionError {
    /// True for conditions an operator must fix (missing weights, broken runtime)
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            PredictionError::ModelUnavailable { .. } | PredictionError::ModelFileMissing { .. }
        )
    }

    pub fn inference(source: impl Into<anyhow::Error>) -> Self {
        PredictionError::InferenceFailure {
            source: source.into(),
        }
    }
}

/// Annotation and encoding errors
#[derive(Debug, Error)]
pub enum RenderingError {
    #[error("Image encoding failed: {0}")]
    EncodingFailed(#[from] image::ImageError),

    #[error("Font loading failed for {path}: {reason}")]
    FontLoadError { path: String, reason: String },
}

/// Translation provider errors
///
/// These never reach the HTTP caller: the translation service logs them and
/// keeps the original text.
#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("Translation is disabled (set TRANSLATION_ENABLED=true)")]
    Disabled,

    #[error("Translation request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Translation provider returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Invalid translation response: {0}")]
    InvalidResponse(String),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Confidence threshold must be in [0.0, 1.0], got {0}")]
    InvalidConfidenceThreshold(f32),

    #[error("IoU threshold must be in [0.0, 1.0], got {0}")]
    InvalidIoUThreshold(f32),

    #[error("Invalid detection config: {0}")]
    InvalidDetectionConfig(String),

    #[error("Invalid rendering config: {0}")]
    InvalidRenderingConfig(String),

    #[error("Invalid translation config: {0}")]
    InvalidTranslationConfig(String),

    #[error("Invalid server config: {0}")]
    InvalidServerConfig(String),
}

pub type RenderingResult<T> = Result<T, RenderingError>;
pub type TranslationResult<T> = Result<T, TranslationError>;
