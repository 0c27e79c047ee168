// Library exports for the crop disease detection service
//
// core: config, errors and the shared data model
// services: detection, prediction, annotation and translation
// orchestration: per-request flow used by the HTTP layer

pub mod core;
pub mod orchestration;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use crate::core::{
    config::Config,
    errors::{ConfigError, PredictionError, RenderingError, TranslationError},
    types::{Detection, PredictionItem, PredictionResponse, PredictionResult, NO_DETECTION_LABEL},
};

pub use orchestration::RequestOrchestrator;

pub use services::{
    Annotator, ModelAdapter, OnnxModelLoader, PredictionService, TranslationCache,
    TranslationService,
};

pub use utils::Metrics;
