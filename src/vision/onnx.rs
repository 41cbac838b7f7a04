//! YOLO-style ONNX models through ONNX Runtime.
//!
//! The model sees a square RGB input (`input_size` x `input_size`, CHW,
//! values in 0..1) and emits `[1, 4 + classes, anchors]`: a centre/size box
//! followed by one score per class for every anchor. Boxes are mapped back
//! to the caller's image so the rest of the pipeline never sees the model's
//! input resolution.

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use ort::session::{builder::GraphOptimizationLevel, Session};
use ort::value::Tensor;
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, info};

use super::InferenceEngine;
use crate::types::{InferenceError, RawDetection};

pub const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
/// Anchors scoring below this never leave the adapter.
const SCORE_FLOOR: f32 = 0.05;

/// Initialise the ONNX Runtime environment. Call once before loading models.
pub fn init_runtime() -> Result<()> {
    ort::init().commit().context("Failed to initialise ONNX Runtime")?;
    info!("ONNX Runtime initialized");
    Ok(())
}

pub struct YoloEngine {
    name: String,
    session: Mutex<Session>,
    input_name: String,
    output_name: String,
    class_names: Vec<String>,
    input_size: u32,
    iou_threshold: f32,
}

impl YoloEngine {
    /// Load a model and its newline-delimited class names.
    pub fn load(
        name: &str,
        model_path: impl AsRef<Path>,
        labels_path: impl AsRef<Path>,
        threads: usize,
    ) -> Result<Self> {
        let model_path = model_path.as_ref();
        info!(model = %name, path = %model_path.display(), threads, "Loading ONNX model");

        let session = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(threads.max(1))?
            .commit_from_file(model_path)
            .with_context(|| format!("Failed to load model from {}", model_path.display()))?;

        let input_name = session
            .inputs
            .first()
            .map(|i| i.name.clone())
            .unwrap_or_else(|| "images".to_string());
        let output_name = session
            .outputs
            .first()
            .map(|o| o.name.clone())
            .unwrap_or_else(|| "output0".to_string());

        let class_names = read_class_names(labels_path.as_ref())?;
        info!(
            model = %name,
            input = %input_name,
            output = %output_name,
            classes = class_names.len(),
            "Model loaded successfully"
        );

        Ok(Self {
            name: name.to_string(),
            session: Mutex::new(session),
            input_name,
            output_name,
            class_names,
            input_size: DEFAULT_INPUT_SIZE,
            iou_threshold: DEFAULT_IOU_THRESHOLD,
        })
    }

    pub fn with_input_size(mut self, size: u32) -> Self {
        self.input_size = size.max(32);
        self
    }

    pub fn with_iou_threshold(mut self, iou: f32) -> Self {
        self.iou_threshold = iou;
        self
    }

    fn error(&self, message: impl std::fmt::Display) -> InferenceError {
        InferenceError::new(&self.name, message.to_string())
    }

    fn run(&self, input: Vec<f32>) -> Result<(Vec<i64>, Vec<f32>), InferenceError> {
        let size = self.input_size as i64;
        let tensor = Tensor::from_array((vec![1_i64, 3, size, size], input))
            .map_err(|e| self.error(format!("input tensor: {e}")))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| self.error(format!("session lock poisoned: {e}")))?;
        let outputs = session
            .run(ort::inputs![self.input_name.as_str() => tensor])
            .map_err(|e| self.error(e))?;

        let output = outputs
            .get(self.output_name.as_str())
            .ok_or_else(|| self.error(format!("missing output {}", self.output_name)))?;
        let (shape, data) = output
            .try_extract_tensor::<f32>()
            .map_err(|e| self.error(e))?;
        Ok((shape.iter().copied().collect(), data.to_vec()))
    }
}

impl InferenceEngine for YoloEngine {
    fn infer(&self, image: &RgbImage) -> Result<Vec<RawDetection>, InferenceError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Ok(Vec::new());
        }

        let input = preprocess(image, self.input_size);
        let (shape, data) = self.run(input)?;

        let scale = (
            w as f32 / self.input_size as f32,
            h as f32 / self.input_size as f32,
        );
        let candidates = decode_output(&shape, &data, scale, (w as f32, h as f32))
            .map_err(|e| self.error(e))?;
        let kept = non_max_suppression(candidates, self.iou_threshold);

        debug!(model = %self.name, detections = kept.len(), "Inference complete");
        Ok(kept)
    }

    fn class_name(&self, class_index: usize) -> Option<String> {
        self.class_names.get(class_index).cloned()
    }
}

fn read_class_names(path: &Path) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read class names from {}", path.display()))?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Resize to `size` x `size` and lay out as planar RGB floats in 0..1.
fn preprocess(image: &RgbImage, size: u32) -> Vec<f32> {
    let resized = imageops::resize(image, size, size, FilterType::Triangle);
    let plane = (size * size) as usize;
    let mut out = vec![0.0f32; 3 * plane];
    for (i, pixel) in resized.pixels().enumerate() {
        for c in 0..3 {
            out[c * plane + i] = pixel[c] as f32 / 255.0;
        }
    }
    out
}

/// Decode `[1, 4 + classes, anchors]` into boxes in image coordinates.
fn decode_output(
    shape: &[i64],
    data: &[f32],
    scale: (f32, f32),
    bounds: (f32, f32),
) -> Result<Vec<RawDetection>, String> {
    let [_, rows, anchors] = shape else {
        return Err(format!("unexpected output shape {shape:?}"));
    };
    let (rows, anchors) = (*rows as usize, *anchors as usize);
    if rows < 5 || data.len() < rows * anchors {
        return Err(format!("output shape {shape:?} does not match {} values", data.len()));
    }
    let at = |row: usize, anchor: usize| data[row * anchors + anchor];

    let mut detections = Vec::new();
    for a in 0..anchors {
        let (class_index, confidence) = (4..rows)
            .map(|r| (r - 4, at(r, a)))
            .fold((0, f32::MIN), |best, cur| if cur.1 > best.1 { cur } else { best });
        if confidence < SCORE_FLOOR {
            continue;
        }

        let (cx, cy, bw, bh) = (at(0, a), at(1, a), at(2, a), at(3, a));
        let x1 = ((cx - bw / 2.0) * scale.0).clamp(0.0, bounds.0);
        let y1 = ((cy - bh / 2.0) * scale.1).clamp(0.0, bounds.1);
        let x2 = ((cx + bw / 2.0) * scale.0).clamp(0.0, bounds.0);
        let y2 = ((cy + bh / 2.0) * scale.1).clamp(0.0, bounds.1);

        detections.push(RawDetection {
            bbox: [x1, y1, x2, y2],
            class_index,
            confidence,
        });
    }
    Ok(detections)
}

fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
    let iw = (a[2].min(b[2]) - a[0].max(b[0])).max(0.0);
    let ih = (a[3].min(b[3]) - a[1].max(b[1])).max(0.0);
    let inter = iw * ih;
    let area = |r: &[f32; 4]| (r[2] - r[0]).max(0.0) * (r[3] - r[1]).max(0.0);
    let union = area(a) + area(b) - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

/// Class-wise greedy NMS, highest confidence first.
fn non_max_suppression(mut candidates: Vec<RawDetection>, iou_threshold: f32) -> Vec<RawDetection> {
    candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<RawDetection> = Vec::new();
    for det in candidates {
        let overlaps = kept
            .iter()
            .any(|k| k.class_index == det.class_index && iou(&k.bbox, &det.bbox) > iou_threshold);
        if !overlaps {
            kept.push(det);
        }
    }
    kept
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
