use crate::core::errors::{PredictionError, RenderingResult};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

/// Encode an image to PNG bytes. CPU-bound: call from a blocking thread.
pub fn encode_png(img: &DynamicImage) -> RenderingResult<Vec<u8>> {
    let mut png_bytes = Vec::new();
    let mut cursor = Cursor::new(&mut png_bytes);
    img.write_to(&mut cursor, ImageFormat::Png)?;
    Ok(png_bytes)
}

/// Asynchronously decode uploaded bytes and convert to RGB using spawn_blocking.
///
/// Image decoding is CPU-intensive, especially for large uploads.
pub async fn decode_rgb_async(bytes: Vec<u8>) -> Result<DynamicImage, PredictionError> {
    tokio::task::spawn_blocking(move || {
        image::load_from_memory(&bytes)
            .map(|img| DynamicImage::ImageRgb8(img.to_rgb8()))
            .map_err(|e| PredictionError::InvalidImage(format!("could not decode image: {}", e)))
    })
    .await
    .map_err(PredictionError::inference)?
}

/// `data:image/png;base64,...` URI for embedding in JSON
pub fn png_data_uri(png_bytes: &[u8]) -> String {
    format!("data:image/png;base64,{}", STANDARD.encode(png_bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[tokio::test]
    async fn test_decode_converts_to_rgb() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 128])));
        let png_bytes = encode_png(&img).unwrap();

        let decoded = decode_rgb_async(png_bytes).await.unwrap();
        assert!(matches!(decoded, DynamicImage::ImageRgb8(_)));
        assert_eq!((decoded.width(), decoded.height()), (2, 2));
    }

    #[tokio::test]
    async fn test_decode_rejects_garbage() {
        let err = decode_rgb_async(b"not an image".to_vec()).await.unwrap_err();
        assert!(matches!(err, PredictionError::InvalidImage(_)));
    }

    #[test]
    fn test_png_data_uri() {
        assert_eq!(png_data_uri(b"abc"), "data:image/png;base64,YWJj");
    }
}
