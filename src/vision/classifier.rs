//! Denomination classifier stage.
//!
//! Runs the classifier model over each cropped region independently and
//! keeps the highest-confidence class. A region that cannot be classified
//! degrades to [`Classification::Unknown`]; it never fails the batch.

use image::RgbImage;
use std::sync::Arc;
use tracing::{debug, warn};

use super::InferenceEngine;
use crate::types::Classification;

pub struct Classifier {
    engine: Arc<dyn InferenceEngine>,
}

impl Classifier {
    pub fn new(engine: Arc<dyn InferenceEngine>) -> Self {
        Self { engine }
    }

    /// Classify every region. The output has one entry per input region,
    /// in the same order.
    pub fn classify(&self, regions: &[RgbImage]) -> Vec<Classification> {
        regions
            .iter()
            .enumerate()
            .map(|(index, region)| self.classify_one(index, region))
            .collect()
    }

    fn classify_one(&self, index: usize, region: &RgbImage) -> Classification {
        if region.width() == 0 || region.height() == 0 {
            warn!(index, "Empty region, classifying as Unknown");
            return Classification::Unknown;
        }

        let detections = match self.engine.infer(region) {
            Ok(d) => d,
            Err(e) => {
                warn!(index, error = %e, "Classifier failed on region, classifying as Unknown");
                return Classification::Unknown;
            }
        };

        let best = detections.iter().max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let Some(best) = best else {
            warn!(index, "Classifier returned no detections, classifying as Unknown");
            return Classification::Unknown;
        };

        match self.engine.class_name(best.class_index) {
            Some(label) => {
                debug!(index, label = %label, confidence = best.confidence, "Region classified");
                Classification::Known {
                    label,
                    confidence: best.confidence,
                }
            }
            None => {
                warn!(
                    index,
                    class_index = best.class_index,
                    "Classifier returned an unnamed class, classifying as Unknown"
                );
                Classification::Unknown
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{InferenceError, RawDetection};
    use crate::vision::MockInferenceEngine;

    const NAMES: [&str; 3] = ["0.1 NIS", "1 Euro", "5 USD"];

    fn det(class_index: usize, confidence: f32) -> RawDetection {
        RawDetection {
            bbox: [0.0, 0.0, 1.0, 1.0],
            class_index,
            confidence,
        }
    }

    fn named(engine: &mut MockInferenceEngine) {
        engine
            .expect_class_name()
            .returning(|i| NAMES.get(i).map(|s| s.to_string()));
    }

    #[test]
    fn test_takes_highest_confidence_class() {
        let mut engine = MockInferenceEngine::new();
        engine
            .expect_infer()
            .returning(|_| Ok(vec![det(0, 0.3), det(1, 0.8), det(2, 0.5)]));
        named(&mut engine);

        let labels = Classifier::new(Arc::new(engine)).classify(&[RgbImage::new(8, 8)]);
        assert_eq!(labels, vec![Classification::known("1 Euro", 0.8)]);
    }

    #[test]
    fn test_no_detections_is_unknown() {
        let mut engine = MockInferenceEngine::new();
        engine.expect_infer().returning(|_| Ok(Vec::new()));
        named(&mut engine);

        let labels = Classifier::new(Arc::new(engine)).classify(&[RgbImage::new(8, 8)]);
        assert_eq!(labels, vec![Classification::Unknown]);
    }

    #[test]
    fn test_engine_failure_degrades_per_region() {
        let mut engine = MockInferenceEngine::new();
        let mut call = 0;
        engine.expect_infer().times(3).returning(move |_| {
            call += 1;
            if call == 2 {
                Err(InferenceError::new("classifier", "bad tensor"))
            } else {
                Ok(vec![det(2, 0.9)])
            }
        });
        named(&mut engine);

        let regions = vec![RgbImage::new(4, 4), RgbImage::new(4, 4), RgbImage::new(4, 4)];
        let labels = Classifier::new(Arc::new(engine)).classify(&regions);
        assert_eq!(labels.len(), 3);
        assert_eq!(labels[0].label(), "5 USD");
        assert!(labels[1].is_unknown());
        assert_eq!(labels[2].label(), "5 USD");
    }

    #[test]
    fn test_empty_region_skips_engine() {
        let mut engine = MockInferenceEngine::new();
        engine.expect_infer().never();
        let labels = Classifier::new(Arc::new(engine)).classify(&[RgbImage::new(0, 0)]);
        assert_eq!(labels, vec![Classification::Unknown]);
    }

    #[test]
    fn test_unnamed_class_is_unknown() {
        let mut engine = MockInferenceEngine::new();
        engine.expect_infer().returning(|_| Ok(vec![det(42, 0.99)]));
        named(&mut engine);

        let labels = Classifier::new(Arc::new(engine)).classify(&[RgbImage::new(8, 8)]);
        assert!(labels[0].is_unknown());
    }

    #[test]
    fn test_no_regions() {
        let engine = MockInferenceEngine::new();
        assert!(Classifier::new(Arc::new(engine)).classify(&[]).is_empty());
    }
}
