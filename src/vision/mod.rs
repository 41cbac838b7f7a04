//! Vision stages: detection, classification and annotation.
//!
//! Defines the `InferenceEngine` trait that both the localizer and the
//! classifier models are consumed through, plus the stages built on it.

pub mod annotator;
pub mod classifier;
pub mod detector;
#[cfg(feature = "onnx")]
pub mod onnx;

use image::RgbImage;

use crate::types::{InferenceError, RawDetection};

/// Abstraction over a black-box object detection model.
///
/// Implementors take an RGB image at its native resolution and return
/// boxes in that same coordinate space. Calls are blocking and may be
/// CPU or accelerator bound.
#[cfg_attr(test, mockall::automock)]
pub trait InferenceEngine: Send + Sync {
    /// Run the model once over an image.
    fn infer(&self, image: &RgbImage) -> Result<Vec<RawDetection>, InferenceError>;

    /// Human-readable name of a class index, if the model knows it.
    fn class_name(&self, class_index: usize) -> Option<String>;
}
