pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{ConfigError, PredictionError, RenderingError, TranslationError};
pub use types::{
    BoundingBox, Detection, PredictionItem, PredictionResponse, PredictionResult,
    NO_DETECTION_LABEL,
};
