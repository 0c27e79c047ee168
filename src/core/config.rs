use crate::core::errors::ConfigError;
use crate::services::font_manager;
use crate::services::translation::catalog;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
    /// Largest accepted upload body, in bytes
    pub max_upload_bytes: usize,
}

/// Execution backend for the ONNX session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InferenceBackend {
    /// Best accelerator compiled in, else CPU
    Auto,
    Cpu,
    Cuda,
    CoreMl,
}

impl FromStr for InferenceBackend {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "" | "AUTO" => Ok(Self::Auto),
            "CPU" => Ok(Self::Cpu),
            "CUDA" => Ok(Self::Cuda),
            "COREML" => Ok(Self::CoreMl),
            other => Err(ConfigError::InvalidDetectionConfig(format!(
                "unknown INFERENCE_BACKEND '{}', expected AUTO, CPU, CUDA or COREML",
                other
            ))),
        }
    }
}

/// Detection configuration
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    pub model_path: PathBuf,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub target_size: u32,
    pub inference_backend: InferenceBackend,
    /// Number of ONNX sessions kept for concurrent inference
    pub onnx_pool_size: usize,
    /// Fallback id -> name table when the model carries no `names` metadata
    pub class_names: Vec<String>,
    pub load_on_startup: bool,
}

/// Annotation configuration
#[derive(Debug, Clone)]
pub struct RenderingConfig {
    /// Ordered font candidates, first usable one wins
    pub font_paths: Vec<PathBuf>,
    pub font_size: f32,
    pub box_thickness: u32,
}

/// Translation configuration
#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_seconds: u64,
    pub default_language: String,
    pub cache_size: usize,
}

pub const DEFAULT_TRANSLATION_ENDPOINT: &str =
    "https://translate.googleapis.com/translate_a/single";

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub detection: DetectionConfig,
    pub rendering: RenderingConfig,
    pub translation: TranslationConfig,
}

fn parse_env<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_list(key: &str) -> Option<Vec<String>> {
    env::var(key)
        .ok()
        .map(|value| {
            value
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>()
        })
        .filter(|items| !items.is_empty())
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| match s.to_lowercase().as_str() {
                "trace" => Some(Level::TRACE),
                "debug" => Some(Level::DEBUG),
                "info" => Some(Level::INFO),
                "warn" | "warning" => Some(Level::WARN),
                "error" => Some(Level::ERROR),
                _ => None,
            })
            .unwrap_or(Level::INFO);

        let inference_backend = match env::var("INFERENCE_BACKEND") {
            Ok(value) => value.parse()?,
            Err(_) => InferenceBackend::Auto,
        };

        let font_paths = parse_list("FONT_PATHS")
            .map(|paths| paths.into_iter().map(PathBuf::from).collect())
            .unwrap_or_else(font_manager::default_font_candidates);

        Ok(Self {
            server: ServerConfig {
                port: parse_env("SERVER_PORT").unwrap_or(8000),
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
                max_upload_bytes: parse_env("MAX_UPLOAD_BYTES").unwrap_or(10 * 1024 * 1024),
            },
            detection: DetectionConfig {
                model_path: env::var("MODEL_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("model/best.onnx")),
                confidence_threshold: parse_env("CONFIDENCE_THRESHOLD").unwrap_or(0.25),
                iou_threshold: parse_env("IOU_THRESHOLD").unwrap_or(0.7),
                target_size: parse_env("TARGET_SIZE").unwrap_or(640),
                inference_backend,
                onnx_pool_size: parse_env("ONNX_POOL_SIZE")
                    .unwrap_or_else(|| num_cpus::get().clamp(1, 4)),
                class_names: parse_list("CLASS_NAMES").unwrap_or_default(),
                load_on_startup: parse_env("LOAD_MODEL_ON_STARTUP").unwrap_or(true),
            },
            rendering: RenderingConfig {
                font_paths,
                font_size: parse_env("FONT_SIZE").unwrap_or(16.0),
                box_thickness: parse_env("BOX_THICKNESS").unwrap_or(3),
            },
            translation: TranslationConfig {
                enabled: parse_env("TRANSLATION_ENABLED").unwrap_or(true),
                endpoint: env::var("TRANSLATION_ENDPOINT")
                    .unwrap_or_else(|_| DEFAULT_TRANSLATION_ENDPOINT.to_string()),
                timeout_seconds: parse_env("TRANSLATION_TIMEOUT_SECONDS").unwrap_or(10),
                default_language: env::var("DEFAULT_LANGUAGE")
                    .map(|s| s.trim().to_lowercase())
                    .unwrap_or_else(|_| "en".to_string()),
                cache_size: parse_env("TRANSLATION_CACHE_SIZE").unwrap_or(1024),
            },
        })
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server.max_upload_bytes == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "max_upload_bytes must be > 0".to_string(),
            ));
        }

        // Validate detection thresholds
        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(ConfigError::InvalidConfidenceThreshold(
                self.detection.confidence_threshold,
            ));
        }

        if !(0.0..=1.0).contains(&self.detection.iou_threshold) {
            return Err(ConfigError::InvalidIoUThreshold(
                self.detection.iou_threshold,
            ));
        }

        // YOLO strides need the input side to be a multiple of 32
        if !(320..=2048).contains(&self.detection.target_size)
            || self.detection.target_size % 32 != 0
        {
            return Err(ConfigError::InvalidDetectionConfig(format!(
                "target_size must be a multiple of 32 between 320 and 2048, got {}",
                self.detection.target_size
            )));
        }

        if self.detection.onnx_pool_size == 0 {
            return Err(ConfigError::InvalidDetectionConfig(
                "onnx_pool_size must be > 0".to_string(),
            ));
        }

        if !(self.rendering.font_size.is_finite() && self.rendering.font_size > 0.0) {
            return Err(ConfigError::InvalidRenderingConfig(format!(
                "font_size must be > 0, got {}",
                self.rendering.font_size
            )));
        }

        if self.rendering.box_thickness == 0 {
            return Err(ConfigError::InvalidRenderingConfig(
                "box_thickness must be > 0".to_string(),
            ));
        }

        if !catalog::is_supported(&self.translation.default_language) {
            return Err(ConfigError::InvalidTranslationConfig(format!(
                "default_language '{}' is not in the language catalog",
                self.translation.default_language
            )));
        }

        if self.translation.cache_size == 0 {
            return Err(ConfigError::InvalidTranslationConfig(
                "cache_size must be > 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.server.max_upload_bytes
    }

    pub fn model_path(&self) -> &PathBuf {
        &self.detection.model_path
    }

    pub fn onnx_pool_size(&self) -> usize {
        self.detection.onnx_pool_size
    }

    pub fn default_language(&self) -> &str {
        &self.translation.default_language
    }
}

#[cfg(test)]
impl Config {
    /// Defaults without touching the process environment
    pub fn for_tests() -> Self {
        Self {
            server: ServerConfig {
                port: 8000,
                host: "127.0.0.1".to_string(),
                log_level: Level::INFO,
                max_upload_bytes: 10 * 1024 * 1024,
            },
            detection: DetectionConfig {
                model_path: PathBuf::from("model/best.onnx"),
                confidence_threshold: 0.25,
                iou_threshold: 0.7,
                target_size: 640,
                inference_backend: InferenceBackend::Auto,
                onnx_pool_size: 1,
                class_names: Vec::new(),
                load_on_startup: false,
            },
            rendering: RenderingConfig {
                font_paths: Vec::new(),
                font_size: 16.0,
                box_thickness: 3,
            },
            translation: TranslationConfig {
                enabled: false,
                endpoint: DEFAULT_TRANSLATION_ENDPOINT.to_string(),
                timeout_seconds: 10,
                default_language: "en".to_string(),
                cache_size: 16,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        assert!(Config::for_tests().validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_thresholds() {
        let mut config = Config::for_tests();
        config.detection.confidence_threshold = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfidenceThreshold(_))
        ));

        let mut config = Config::for_tests();
        config.detection.iou_threshold = -0.1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidIoUThreshold(_))
        ));
    }

    #[test]
    fn test_rejects_unaligned_target_size() {
        let mut config = Config::for_tests();
        config.detection.target_size = 650;
        assert!(config.validate().is_err());

        config.detection.target_size = 1024;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_unknown_default_language() {
        let mut config = Config::for_tests();
        config.translation.default_language = "xx".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTranslationConfig(_))
        ));
    }

    #[test]
    fn test_backend_parsing() {
        assert_eq!("cpu".parse::<InferenceBackend>().unwrap(), InferenceBackend::Cpu);
        assert_eq!("".parse::<InferenceBackend>().unwrap(), InferenceBackend::Auto);
        assert_eq!("CoreML".parse::<InferenceBackend>().unwrap(), InferenceBackend::CoreMl);
        assert!("tpu".parse::<InferenceBackend>().is_err());
    }
}
