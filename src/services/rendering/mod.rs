// Image annotator: bounding boxes and confidence labels over a copy of the input

use crate::core::errors::RenderingResult;
use crate::core::types::Detection;
use crate::services::font_manager::FontHandle;
use crate::utils::image_ops;
use ab_glyph::PxScale;
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;
use tracing::{debug, trace};

/// Box colours, indexed by `class_id % 8`
pub const PALETTE: [Rgb<u8>; 8] = [
    Rgb([255, 0, 0]),
    Rgb([0, 255, 0]),
    Rgb([0, 0, 255]),
    Rgb([255, 255, 0]),
    Rgb([255, 0, 255]),
    Rgb([0, 255, 255]),
    Rgb([255, 128, 0]),
    Rgb([128, 0, 255]),
];

const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

// Fallback metrics when not even the embedded font parsed
const FALLBACK_CHAR_WIDTH: u32 = 6;
const FALLBACK_TEXT_HEIGHT: u32 = 12;

// Label layout, in pixels
const LABEL_GAP: i32 = 5;
const LABEL_PAD_X: i32 = 10;
const LABEL_PAD_Y: i32 = 5;
const TEXT_OFFSET_X: i32 = 5;
const TEXT_OFFSET_Y: i32 = 2;

pub fn color_for(class_id: usize) -> Rgb<u8> {
    PALETTE[class_id % PALETTE.len()]
}

pub fn format_label(class_name: &str, confidence: f32) -> String {
    format!("{}: {:.2}", class_name, confidence)
}

/// Size used when no glyph metrics are available
pub fn estimate_text_size(text: &str) -> (u32, u32) {
    (
        text.chars().count() as u32 * FALLBACK_CHAR_WIDTH,
        FALLBACK_TEXT_HEIGHT,
    )
}

/// Top of the label block: just above the box, never above the image
pub fn label_origin_y(box_top: i32, text_height: i32) -> i32 {
    (box_top - text_height - LABEL_GAP).max(0)
}

/// Label background clamped to the image, `None` when nothing is left to draw
pub fn label_background(
    x1: i32,
    label_y: i32,
    text_width: i32,
    text_height: i32,
    image_width: u32,
    image_height: u32,
) -> Option<Rect> {
    let left = x1.max(0);
    let top = label_y.max(0);
    let right = (x1 + text_width + LABEL_PAD_X).min(image_width as i32);
    let bottom = (label_y + text_height + LABEL_PAD_Y).min(image_height as i32);

    if right <= left || bottom <= top {
        return None;
    }
    Some(Rect::at(left, top).of_size((right - left) as u32, (bottom - top) as u32))
}

/// Draws detections with a fixed colour palette and optional font
pub struct Annotator {
    font: Option<FontHandle>,
    scale: PxScale,
    thickness: u32,
}

impl Annotator {
    pub fn new(font: Option<FontHandle>, font_size: f32, thickness: u32) -> Self {
        Self {
            font,
            scale: PxScale::from(font_size),
            thickness: thickness.max(1),
        }
    }

    /// Text extents with the active font, or the fixed per-character estimate
    pub fn measure(&self, text: &str) -> (u32, u32) {
        match &self.font {
            Some(handle) => text_size(self.scale, &handle.font, text),
            None => estimate_text_size(text),
        }
    }

    /// Draw every detection onto a fresh RGB copy of `image`
    pub fn annotate(&self, image: &DynamicImage, detections: &[Detection]) -> RgbImage {
        let mut canvas = image.to_rgb8();
        let (width, height) = canvas.dimensions();

        for detection in detections {
            let bbox = &detection.bbox;
            if !bbox.is_valid() {
                trace!("Skipping detection with invalid box: {:?}", bbox);
                continue;
            }

            let x1 = (bbox.x1.max(0.0) as i32).min(width as i32 - 1);
            let y1 = (bbox.y1.max(0.0) as i32).min(height as i32 - 1);
            let x2 = (bbox.x2.max(0.0) as i32).min(width as i32 - 1);
            let y2 = (bbox.y2.max(0.0) as i32).min(height as i32 - 1);
            if x2 <= x1 || y2 <= y1 {
                continue;
            }

            let color = color_for(detection.class_id);
            self.draw_outline(&mut canvas, x1, y1, x2, y2, color);

            let label = format_label(&detection.class_name, detection.confidence);
            let (text_w, text_h) = self.measure(&label);
            let label_y = label_origin_y(y1, text_h as i32);

            if let Some(background) =
                label_background(x1, label_y, text_w as i32, text_h as i32, width, height)
            {
                draw_filled_rect_mut(&mut canvas, background, color);
            }

            if let Some(handle) = &self.font {
                draw_text_mut(
                    &mut canvas,
                    TEXT_COLOR,
                    x1 + TEXT_OFFSET_X,
                    label_y + TEXT_OFFSET_Y,
                    self.scale,
                    &handle.font,
                    &label,
                );
            }
        }

        debug!(
            "Annotated {}x{} image with {} detections",
            width,
            height,
            detections.len()
        );
        canvas
    }

    /// Annotate and encode as PNG
    pub fn render_png(
        &self,
        image: &DynamicImage,
        detections: &[Detection],
    ) -> RenderingResult<Vec<u8>> {
        let annotated = self.annotate(image, detections);
        image_ops::encode_png(&DynamicImage::ImageRgb8(annotated))
    }

    // Nested hollow rects, growing inward
    fn draw_outline(&self, canvas: &mut RgbImage, x1: i32, y1: i32, x2: i32, y2: i32, color: Rgb<u8>) {
        for t in 0..self.thickness as i32 {
            let w = x2 - x1 + 1 - 2 * t;
            let h = y2 - y1 + 1 - 2 * t;
            if w <= 0 || h <= 0 {
                break;
            }
            let rect = Rect::at(x1 + t, y1 + t).of_size(w as u32, h as u32);
            draw_hollow_rect_mut(canvas, rect, color);
        }
    }
}
