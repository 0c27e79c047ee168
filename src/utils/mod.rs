pub mod image_ops;
pub mod metrics;

// Re-export commonly used items
pub use image_ops::{decode_rgb_async, encode_png, png_data_uri};
pub use metrics::{Metrics, MetricsSnapshot};
