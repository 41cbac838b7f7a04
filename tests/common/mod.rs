//! In-memory fakes for integration testing.
//!
//! Deterministic stand-ins for the localizer, the classifier and the rate
//! provider. Everything is controllable from test code and records how
//! often it was called.

#![allow(dead_code)]

use async_trait::async_trait;
use image::RgbImage;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use cashcount::rates::RateProvider;
use cashcount::types::{InferenceError, RawDetection};
use cashcount::vision::InferenceEngine;

// ---------------------------------------------------------------------------
// Localizer
// ---------------------------------------------------------------------------

/// Returns the same detections for every image.
pub struct FakeLocalizer {
    detections: Vec<RawDetection>,
    calls: Arc<Mutex<usize>>,
    /// If set, `infer` fails with this message.
    force_error: Arc<Mutex<Option<String>>>,
}

impl FakeLocalizer {
    pub fn new(detections: Vec<RawDetection>) -> Self {
        Self {
            detections,
            calls: Arc::new(Mutex::new(0)),
            force_error: Arc::new(Mutex::new(None)),
        }
    }

    /// One detection per `(bbox, confidence)`, all of class 0.
    pub fn with_boxes(boxes: &[([f32; 4], f32)]) -> Self {
        Self::new(
            boxes
                .iter()
                .map(|&(bbox, confidence)| RawDetection {
                    bbox,
                    class_index: 0,
                    confidence,
                })
                .collect(),
        )
    }

    pub fn set_error(&self, msg: &str) {
        *self.force_error.lock().unwrap() = Some(msg.to_string());
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl InferenceEngine for FakeLocalizer {
    fn infer(&self, _image: &RgbImage) -> Result<Vec<RawDetection>, InferenceError> {
        *self.calls.lock().unwrap() += 1;
        if let Some(msg) = self.force_error.lock().unwrap().clone() {
            return Err(InferenceError::new("fake-localizer", msg));
        }
        Ok(self.detections.clone())
    }

    fn class_name(&self, class_index: usize) -> Option<String> {
        (class_index == 0).then(|| "currency".to_string())
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// What the fake classifier says about one region.
#[derive(Debug, Clone)]
pub enum Answer {
    Label(&'static str, f32),
    Nothing,
    Fail,
}

/// Answers classification calls in order from a script. Calls past the
/// end of the script see no detections.
pub struct ScriptedClassifier {
    names: Vec<String>,
    script: Mutex<VecDeque<Answer>>,
}

impl ScriptedClassifier {
    pub fn new(answers: Vec<Answer>) -> Self {
        let mut names: Vec<String> = Vec::new();
        for answer in &answers {
            if let Answer::Label(label, _) = answer {
                if !names.iter().any(|n| n == label) {
                    names.push(label.to_string());
                }
            }
        }
        Self {
            names,
            script: Mutex::new(answers.into()),
        }
    }

    /// The same label for every region.
    pub fn always(label: &'static str, n: usize) -> Self {
        Self::new(vec![Answer::Label(label, 0.9); n])
    }
}

impl InferenceEngine for ScriptedClassifier {
    fn infer(&self, image: &RgbImage) -> Result<Vec<RawDetection>, InferenceError> {
        let answer = self.script.lock().unwrap().pop_front().unwrap_or(Answer::Nothing);
        let (w, h) = (image.width() as f32, image.height() as f32);
        match answer {
            Answer::Label(label, confidence) => {
                let class_index = self.names.iter().position(|n| n == label).unwrap();
                Ok(vec![
                    RawDetection {
                        bbox: [0.0, 0.0, w, h],
                        class_index,
                        confidence: confidence / 2.0,
                    },
                    RawDetection {
                        bbox: [0.0, 0.0, w, h],
                        class_index,
                        confidence,
                    },
                ])
            }
            Answer::Nothing => Ok(Vec::new()),
            Answer::Fail => Err(InferenceError::new("fake-classifier", "boom")),
        }
    }

    fn class_name(&self, class_index: usize) -> Option<String> {
        self.names.get(class_index).cloned()
    }
}

// ---------------------------------------------------------------------------
// Rate provider
// ---------------------------------------------------------------------------

/// Serves fixed conversion rates per base currency, or fails every call.
pub struct FakeRateProvider {
    rates: HashMap<String, HashMap<String, f64>>,
    calls: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<bool>>,
}

impl FakeRateProvider {
    /// EUR, USD and ILS, each quoting the other two.
    pub fn new() -> Self {
        let quote = |pairs: &[(&str, f64)]| {
            pairs
                .iter()
                .map(|(c, r)| (c.to_string(), *r))
                .collect::<HashMap<_, _>>()
        };
        let mut rates = HashMap::new();
        rates.insert("EUR".to_string(), quote(&[("EUR", 1.0), ("USD", 1.08), ("ILS", 4.0)]));
        rates.insert("USD".to_string(), quote(&[("USD", 1.0), ("EUR", 0.93), ("ILS", 3.7)]));
        rates.insert("ILS".to_string(), quote(&[("ILS", 1.0), ("EUR", 0.25), ("USD", 0.27)]));
        Self {
            rates,
            calls: Arc::new(Mutex::new(Vec::new())),
            failing: Arc::new(Mutex::new(false)),
        }
    }

    pub fn unreachable() -> Self {
        let p = Self::new();
        p.set_failing(true);
        p
    }

    pub fn set_failing(&self, failing: bool) {
        *self.failing.lock().unwrap() = failing;
    }

    /// Bases requested so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RateProvider for FakeRateProvider {
    async fn latest_rates(
        &self,
        base: &str,
    ) -> Result<HashMap<String, f64>, cashcount::types::RateFetchError> {
        self.calls.lock().unwrap().push(base.to_string());
        if *self.failing.lock().unwrap() {
            return Err(cashcount::types::RateFetchError::Transport {
                base: base.to_string(),
                message: "connection refused".to_string(),
            });
        }
        self.rates
            .get(base)
            .cloned()
            .ok_or_else(|| cashcount::types::RateFetchError::Status {
                base: base.to_string(),
                status: 404,
            })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

pub fn blank_image(w: u32, h: u32) -> image::DynamicImage {
    image::DynamicImage::ImageRgb8(RgbImage::new(w, h))
}
