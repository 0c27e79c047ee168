pub mod detection;
pub mod font_manager;
pub mod onnx_builder; // Session construction and pooling for the detection model
pub mod prediction;
pub mod rendering;
pub mod translation;

// Re-export commonly used services
pub use detection::{ModelAdapter, OnnxModelLoader};
pub use prediction::PredictionService;
pub use rendering::Annotator;
pub use translation::{TranslationCache, TranslationService};
