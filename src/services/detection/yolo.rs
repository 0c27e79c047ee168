// YOLOv8 ONNX detector: letterbox preprocessing, output decoding, class-aware NMS

use super::{DetectionModel, ModelHandle, ModelLoader};
use crate::core::config::DetectionConfig;
use crate::core::errors::PredictionError;
use crate::core::types::{BoundingBox, Detection};
use crate::services::onnx_builder::{self, OnnxSessionPool};
use anyhow::{anyhow, bail, Context, Result};
use image::{imageops::FilterType, DynamicImage, Rgb, RgbImage};
use ndarray::Array4;
use ort::value::Tensor;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

const LETTERBOX_FILL: u8 = 114;

/// id -> name table for the model's classes
#[derive(Debug, Clone, Default)]
pub struct ClassNames {
    names: BTreeMap<usize, String>,
}

impl ClassNames {
    pub fn from_list(names: &[String]) -> Self {
        Self {
            names: names.iter().cloned().enumerate().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn name(&self, class_id: usize) -> String {
        self.names
            .get(&class_id)
            .cloned()
            .unwrap_or_else(|| format!("class_{}", class_id))
    }
}

/// Parse the `names` metadata written by the exporter, e.g. `{0: 'Leaf Blight', 1: 'Healthy'}`.
///
/// Returns `None` when the text is not a dict of integer keys to quoted strings.
pub fn parse_names_metadata(raw: &str) -> Option<ClassNames> {
    let body = raw.trim().strip_prefix('{')?.strip_suffix('}')?;
    let mut names = BTreeMap::new();
    let mut chars = body.chars().peekable();

    loop {
        while chars.peek().is_some_and(|c| c.is_whitespace() || *c == ',') {
            chars.next();
        }
        if chars.peek().is_none() {
            break;
        }

        let mut digits = String::new();
        while let Some(c) = chars.peek().copied().filter(|c| c.is_ascii_digit()) {
            digits.push(c);
            chars.next();
        }
        let id: usize = digits.parse().ok()?;

        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }
        if chars.next()? != ':' {
            return None;
        }
        while chars.peek().is_some_and(|c| c.is_whitespace()) {
            chars.next();
        }

        let quote = chars.next().filter(|c| *c == '\'' || *c == '"')?;
        let mut name = String::new();
        loop {
            match chars.next()? {
                '\\' => name.push(chars.next()?),
                c if c == quote => break,
                c => name.push(c),
            }
        }
        names.insert(id, name);
    }

    if names.is_empty() {
        None
    } else {
        Some(ClassNames { names })
    }
}

/// Scale and padding applied to fit an image into the square model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub original_width: u32,
    pub original_height: u32,
}

impl Letterbox {
    pub fn new(width: u32, height: u32, target_size: u32) -> Self {
        let scale = (target_size as f32 / width.max(1) as f32)
            .min(target_size as f32 / height.max(1) as f32);
        let new_w = ((width as f32 * scale).round() as u32).clamp(1, target_size);
        let new_h = ((height as f32 * scale).round() as u32).clamp(1, target_size);

        Self {
            scale,
            pad_x: ((target_size - new_w) / 2) as f32,
            pad_y: ((target_size - new_h) / 2) as f32,
            original_width: width,
            original_height: height,
        }
    }

    fn resized_dims(&self) -> (u32, u32) {
        let w = (self.original_width as f32 * self.scale).round().max(1.0) as u32;
        let h = (self.original_height as f32 * self.scale).round().max(1.0) as u32;
        (w, h)
    }

    /// Map a centre-format box in model space back to clamped image pixels
    pub fn unmap(&self, cx: f32, cy: f32, w: f32, h: f32) -> BoundingBox {
        let max_x = self.original_width as f32;
        let max_y = self.original_height as f32;

        let x1 = ((cx - w / 2.0 - self.pad_x) / self.scale).clamp(0.0, max_x);
        let y1 = ((cy - h / 2.0 - self.pad_y) / self.scale).clamp(0.0, max_y);
        let x2 = ((cx + w / 2.0 - self.pad_x) / self.scale).clamp(0.0, max_x);
        let y2 = ((cy + h / 2.0 - self.pad_y) / self.scale).clamp(0.0, max_y);

        BoundingBox::new(x1, y1, x2, y2)
    }
}

/// Resize with preserved aspect ratio, pad with grey and lay out as NCHW floats in 0..1
pub fn preprocess(img: &DynamicImage, target_size: u32) -> (Array4<f32>, Letterbox) {
    let letterbox = Letterbox::new(img.width(), img.height(), target_size);
    let (new_w, new_h) = letterbox.resized_dims();
    trace!(
        "Letterbox: {}x{} → {}x{} (scale {:.3}, pad {}x{})",
        img.width(),
        img.height(),
        new_w,
        new_h,
        letterbox.scale,
        letterbox.pad_x,
        letterbox.pad_y
    );

    let resized = img.resize_exact(new_w, new_h, FilterType::Triangle).to_rgb8();
    let mut canvas = RgbImage::from_pixel(target_size, target_size, Rgb([LETTERBOX_FILL; 3]));
    image::imageops::replace(
        &mut canvas,
        &resized,
        letterbox.pad_x as i64,
        letterbox.pad_y as i64,
    );

    let target = target_size as usize;
    let mut array = Array4::<f32>::zeros((1, 3, target, target));
    for (x, y, pixel) in canvas.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        array[[0, 0, y, x]] = pixel[0] as f32 / 255.0;
        array[[0, 1, y, x]] = pixel[1] as f32 / 255.0;
        array[[0, 2, y, x]] = pixel[2] as f32 / 255.0;
    }

    (array, letterbox)
}

/// Thresholds applied when decoding raw model output
#[derive(Debug, Clone, Copy)]
pub struct DecodeParams {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
}

/// Decode a `[1, 4+C, N]` (or transposed `[1, N, 4+C]`) YOLOv8 output tensor.
///
/// Rows with a non-finite score or a degenerate box after clamping are dropped.
pub fn decode(
    shape: &[i64],
    data: &[f32],
    letterbox: &Letterbox,
    names: &ClassNames,
    params: DecodeParams,
) -> Result<Vec<Detection>> {
    if shape.len() != 3 || shape[0] != 1 {
        bail!("Unexpected detection output shape {:?}", shape);
    }
    let (a, b) = (shape[1] as usize, shape[2] as usize);
    if a * b != data.len() {
        bail!(
            "Detection output has {} values, shape {:?} needs {}",
            data.len(),
            shape,
            a * b
        );
    }

    // Known class count decides the layout, else anchors outnumber channels
    let channels_first = match (!names.is_empty()).then(|| names.len() + 4) {
        Some(expected) if a == expected => true,
        Some(expected) if b == expected => false,
        _ => a <= b,
    };
    let (channels, anchors) = if channels_first { (a, b) } else { (b, a) };
    if channels < 5 {
        bail!("Detection output has {} channels, need at least 5", channels);
    }
    let num_classes = channels - 4;
    let at = |channel: usize, anchor: usize| -> f32 {
        if channels_first {
            data[channel * anchors + anchor]
        } else {
            data[anchor * channels + channel]
        }
    };

    let mut candidates = Vec::new();
    for anchor in 0..anchors {
        let mut best_class = 0;
        let mut best_score = f32::NEG_INFINITY;
        for class in 0..num_classes {
            let score = at(4 + class, anchor);
            if score > best_score {
                best_score = score;
                best_class = class;
            }
        }

        if !best_score.is_finite() || best_score < params.confidence_threshold {
            continue;
        }

        let bbox = letterbox.unmap(
            at(0, anchor),
            at(1, anchor),
            at(2, anchor),
            at(3, anchor),
        );
        if !bbox.is_valid() {
            trace!("Dropping degenerate box for anchor {}", anchor);
            continue;
        }

        candidates.push(Detection {
            class_id: best_class,
            class_name: names.name(best_class),
            confidence: best_score.min(1.0),
            bbox,
        });
    }

    debug!(
        "Decoded {} candidates above {:.2} from {} anchors",
        candidates.len(),
        params.confidence_threshold,
        anchors
    );
    Ok(nms(candidates, params.iou_threshold))
}

/// Class-aware non-maximum suppression, output in descending confidence
pub fn nms(detections: Vec<Detection>, iou_threshold: f32) -> Vec<Detection> {
    if detections.is_empty() {
        return vec![];
    }

    let mut sorted = detections;
    sorted.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

    let mut keep = Vec::new();
    let mut suppressed = vec![false; sorted.len()];

    for i in 0..sorted.len() {
        if suppressed[i] {
            continue;
        }

        for j in (i + 1)..sorted.len() {
            if !suppressed[j]
                && sorted[i].class_id == sorted[j].class_id
                && sorted[i].bbox.iou(&sorted[j].bbox) > iou_threshold
            {
                suppressed[j] = true;
            }
        }

        keep.push(sorted[i].clone());
    }

    trace!("NMS: kept {}/{} detections", keep.len(), sorted.len());
    keep
}

/// Detector backed by a pool of ONNX sessions
pub struct OnnxYoloDetector {
    pool: OnnxSessionPool,
    backend: String,
    input_name: String,
    output_name: String,
    names: ClassNames,
    target_size: u32,
    params: DecodeParams,
}

impl OnnxYoloDetector {
    pub fn load(config: &DetectionConfig) -> Result<Self> {
        let (backend, pool) = onnx_builder::build_pool(
            &config.model_path,
            config.inference_backend,
            config.onnx_pool_size,
        )?;

        let (input_name, output_name, metadata_names) = {
            let session = pool.acquire()?;
            let input_name = session
                .inputs
                .first()
                .map(|input| input.name.clone())
                .ok_or_else(|| anyhow!("Detection model declares no inputs"))?;
            let output_name = session
                .outputs
                .first()
                .map(|output| output.name.clone())
                .ok_or_else(|| anyhow!("Detection model declares no outputs"))?;
            let names = session
                .metadata()
                .context("Failed to read model metadata")?
                .custom("names")
                .ok()
                .flatten();
            (input_name, output_name, names)
        };

        let names = match metadata_names.as_deref().and_then(parse_names_metadata) {
            Some(names) => names,
            None if !config.class_names.is_empty() => {
                info!("Model has no usable names metadata, using CLASS_NAMES");
                ClassNames::from_list(&config.class_names)
            }
            None => {
                warn!("Model has no class names, labels will read class_<id>");
                ClassNames::default()
            }
        };

        info!(
            "✓ Detection model loaded from {} ({} classes, backend {})",
            config.model_path.display(),
            names.len(),
            backend
        );

        Ok(Self {
            pool,
            backend,
            input_name,
            output_name,
            names,
            target_size: config.target_size,
            params: DecodeParams {
                confidence_threshold: config.confidence_threshold,
                iou_threshold: config.iou_threshold,
            },
        })
    }
}

impl DetectionModel for OnnxYoloDetector {
    fn infer(&self, image: &DynamicImage) -> Result<Vec<Detection>> {
        let (input, letterbox) = preprocess(image, self.target_size);
        let tensor = Tensor::from_array(input).context("Failed to build input tensor")?;

        let start = std::time::Instant::now();
        let (shape, data) = {
            let mut session = self.pool.acquire()?;
            let outputs = session
                .run(ort::inputs![self.input_name.as_str() => tensor])
                .context("ONNX inference failed")?;
            let (shape, data) = outputs[self.output_name.as_str()]
                .try_extract_tensor::<f32>()
                .context("Failed to extract detection output")?;
            (shape.to_vec(), data.to_vec())
        };
        debug!(
            "✓ Inference on {} completed in {:.2}ms",
            self.backend,
            start.elapsed().as_secs_f64() * 1000.0
        );

        decode(&shape, &data, &letterbox, &self.names, self.params)
    }

    fn backend(&self) -> &str {
        &self.backend
    }
}

/// Loads `OnnxYoloDetector` from the configured model path
pub struct OnnxModelLoader {
    config: DetectionConfig,
    /// Outcome of runtime initialization, `Err` carries the reason
    runtime: Result<(), String>,
}

impl OnnxModelLoader {
    pub fn new(config: DetectionConfig) -> Self {
        let runtime = onnx_builder::init_runtime().map_err(|e| format!("{:#}", e));
        if let Err(reason) = &runtime {
            warn!("ONNX Runtime unavailable: {}", reason);
        }
        Self { config, runtime }
    }
}

impl ModelLoader for OnnxModelLoader {
    fn load(&self) -> Result<ModelHandle, PredictionError> {
        if let Err(reason) = &self.runtime {
            return Err(PredictionError::ModelUnavailable {
                reason: reason.clone(),
            });
        }

        if !self.config.model_path.exists() {
            return Err(PredictionError::ModelFileMissing {
                path: self.config.model_path.clone(),
            });
        }

        let detector = OnnxYoloDetector::load(&self.config).map_err(|e| {
            PredictionError::ModelUnavailable {
                reason: format!("{:#}", e),
            }
        })?;
        Ok(Arc::new(detector))
    }

    fn artifact_exists(&self) -> bool {
        self.config.model_path.exists()
    }

    fn runtime_available(&self) -> bool {
        self.runtime.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names() -> ClassNames {
        ClassNames::from_list(&["Leaf Blight".to_string(), "Healthy".to_string()])
    }

    const PARAMS: DecodeParams = DecodeParams {
        confidence_threshold: 0.25,
        iou_threshold: 0.7,
    };

    #[test]
    fn test_parse_names_metadata() {
        let names = parse_names_metadata("{0: 'Leaf Blight', 1: 'Healthy', 2: \"Rust, Late\"}")
            .unwrap();
        assert_eq!(names.len(), 3);
        assert_eq!(names.name(0), "Leaf Blight");
        assert_eq!(names.name(2), "Rust, Late");
        assert_eq!(names.name(7), "class_7");
    }

    #[test]
    fn test_parse_names_metadata_rejects_garbage() {
        assert!(parse_names_metadata("").is_none());
        assert!(parse_names_metadata("{}").is_none());
        assert!(parse_names_metadata("[0, 1]").is_none());
        assert!(parse_names_metadata("{0: Leaf}").is_none());
    }

    #[test]
    fn test_letterbox_round_trip() {
        // 1280x640 into 640: scale 0.5, vertical padding 160
        let letterbox = Letterbox::new(1280, 640, 640);
        assert!((letterbox.scale - 0.5).abs() < 1e-6);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 160.0);

        let bbox = letterbox.unmap(320.0, 320.0, 100.0, 50.0);
        assert_eq!(bbox, BoundingBox::new(540.0, 270.0, 740.0, 370.0));
    }

    #[test]
    fn test_unmap_clamps_to_image() {
        let letterbox = Letterbox::new(640, 640, 640);
        let bbox = letterbox.unmap(0.0, 0.0, 100.0, 100.0);
        assert_eq!(bbox, BoundingBox::new(0.0, 0.0, 50.0, 50.0));
    }

    #[test]
    fn test_preprocess_shape_and_padding() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 32, Rgb([255, 0, 0])));
        let (array, letterbox) = preprocess(&img, 320);

        assert_eq!(array.shape(), &[1, 3, 320, 320]);
        assert_eq!(letterbox.pad_y, 80.0);
        // Padding row is grey, content row is red
        assert!((array[[0, 0, 0, 0]] - 114.0 / 255.0).abs() < 1e-6);
        assert!((array[[0, 0, 160, 160]] - 1.0).abs() < 1e-6);
        assert!(array[[0, 1, 160, 160]].abs() < 1e-6);
    }

    /// Build a channels-first `[1, 6, N]` tensor from (cx, cy, w, h, score0, score1) rows
    fn channels_first(rows: &[[f32; 6]]) -> (Vec<i64>, Vec<f32>) {
        let n = rows.len();
        let mut data = vec![0.0; 6 * n];
        for (anchor, row) in rows.iter().enumerate() {
            for (channel, value) in row.iter().enumerate() {
                data[channel * n + anchor] = *value;
            }
        }
        (vec![1, 6, n as i64], data)
    }

    #[test]
    fn test_decode_thresholds_and_names() {
        let letterbox = Letterbox::new(640, 640, 640);
        let (shape, data) = channels_first(&[
            [100.0, 100.0, 50.0, 50.0, 0.91, 0.05],
            [400.0, 400.0, 80.0, 80.0, 0.10, 0.40],
            [200.0, 200.0, 20.0, 20.0, 0.10, 0.20],
        ]);

        let detections = decode(&shape, &data, &letterbox, &names(), PARAMS).unwrap();
        assert_eq!(detections.len(), 2);
        assert_eq!(detections[0].class_name, "Leaf Blight");
        assert_eq!(detections[0].bbox, BoundingBox::new(75.0, 75.0, 125.0, 125.0));
        assert_eq!(detections[1].class_name, "Healthy");
        assert_eq!(detections[1].class_id, 1);
    }

    #[test]
    fn test_decode_transposed_layout() {
        let letterbox = Letterbox::new(640, 640, 640);
        let rows: Vec<[f32; 6]> = (0..8)
            .map(|i| [50.0 + i as f32 * 70.0, 100.0, 40.0, 40.0, 0.5, 0.0])
            .collect();
        let data: Vec<f32> = rows.iter().flatten().copied().collect();

        let detections =
            decode(&[1, 8, 6], &data, &letterbox, &names(), PARAMS).unwrap();
        assert_eq!(detections.len(), 8);
    }

    #[test]
    fn test_decode_rejects_bad_shapes() {
        let letterbox = Letterbox::new(640, 640, 640);
        assert!(decode(&[1, 6], &[0.0; 6], &letterbox, &names(), PARAMS).is_err());
        assert!(decode(&[1, 6, 2], &[0.0; 6], &letterbox, &names(), PARAMS).is_err());
        assert!(decode(&[1, 4, 10], &[0.0; 40], &letterbox, &names(), PARAMS).is_err());
    }

    #[test]
    fn test_decode_skips_nan_scores() {
        let letterbox = Letterbox::new(640, 640, 640);
        let (shape, data) = channels_first(&[[100.0, 100.0, 50.0, 50.0, f32::NAN, f32::NAN]]);
        let detections = decode(&shape, &data, &letterbox, &names(), PARAMS).unwrap();
        assert!(detections.is_empty());
    }

    fn det(class_id: usize, confidence: f32, bbox: BoundingBox) -> Detection {
        Detection {
            class_id,
            class_name: format!("class_{}", class_id),
            confidence,
            bbox,
        }
    }

    #[test]
    fn test_nms_is_class_aware() {
        let bbox = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let shifted = BoundingBox::new(5.0, 5.0, 105.0, 105.0);

        let kept = nms(
            vec![
                det(0, 0.6, shifted),
                det(0, 0.9, bbox),
                det(1, 0.8, bbox),
            ],
            0.5,
        );

        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].confidence, 0.9);
        assert_eq!(kept[1].class_id, 1);
    }
}
