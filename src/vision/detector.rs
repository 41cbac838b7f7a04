//! Localizer stage.
//!
//! Runs the localizer once over the full image, drops detections below the
//! confidence threshold and crops the surviving regions. Boxes stay in the
//! engine's native coordinate space; nothing is rescaled here.

use image::{imageops, RgbImage};
use std::sync::Arc;
use tracing::{debug, info};

use super::InferenceEngine;
use crate::types::{DetectedRegion, PipelineError, RawDetection};

/// Output of [`Detector::detect`]. `regions[i]` is the crop of `boxes[i]`.
#[derive(Debug, Clone, Default)]
pub struct Detection {
    pub regions: Vec<RgbImage>,
    pub boxes: Vec<DetectedRegion>,
}

impl Detection {
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}

pub struct Detector {
    engine: Arc<dyn InferenceEngine>,
}

impl Detector {
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        Self { engine }
    }

    /// Locate currency items in `image`.
    ///
    /// Detections with `confidence < confidence_threshold` are discarded;
    /// a detection exactly at the threshold is kept. Zero detections is a
    /// valid, empty result.
    pub fn detect(
        &self,
        image: &RgbImage,
        confidence_threshold: f32,
    ) -> Result<Detection, PipelineError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(PipelineError::InvalidInput(format!(
                "image has no pixels ({}x{})",
                image.width(),
                image.height()
            )));
        }

        let raw = self.engine.infer(image)?;
        let total = raw.len();

        let mut detection = Detection::default();
        for det in raw {
            if det.confidence < confidence_threshold {
                debug!(
                    confidence = det.confidence,
                    threshold = confidence_threshold,
                    "Dropping low-confidence detection"
                );
                continue;
            }

            let region = self.to_region(&det, image.dimensions());
            detection.regions.push(crop(image, &region));
            detection.boxes.push(region);
        }

        info!(
            raw = total,
            kept = detection.len(),
            threshold = confidence_threshold,
            "Detection complete"
        );

        Ok(detection)
    }

    /// Truncate the engine box to integers, clamped to `0..=width` and
    /// `0..=height` of the image it came from.
    fn to_region(&self, det: &RawDetection, (width, height): (u32, u32)) -> DetectedRegion {
        let raw_label = self
            .engine
            .class_name(det.class_index)
            .unwrap_or_else(|| format!("class_{}", det.class_index));

        let (w, h) = (width as f32, height as f32);
        let clamp = |v: f32, max: f32| v.clamp(0.0, max) as i32;

        DetectedRegion {
            x1: clamp(det.bbox[0], w),
            y1: clamp(det.bbox[1], h),
            x2: clamp(det.bbox[2], w),
            y2: clamp(det.bbox[3], h),
            raw_label,
            confidence: det.confidence,
        }
    }
}

/// Crop `[y1:y2, x1:x2]`, clamped to the image bounds. A box entirely
/// outside the image yields an empty (0x0) crop.
pub fn crop(image: &RgbImage, region: &DetectedRegion) -> RgbImage {
    let (w, h) = image.dimensions();
    let x1 = region.x1.clamp(0, w as i32) as u32;
    let x2 = region.x2.clamp(0, w as i32) as u32;
    let y1 = region.y1.clamp(0, h as i32) as u32;
    let y2 = region.y2.clamp(0, h as i32) as u32;

    if x2 <= x1 || y2 <= y1 {
        return RgbImage::new(0, 0);
    }

    imageops::crop_imm(image, x1, y1, x2 - x1, y2 - y1).to_image()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
