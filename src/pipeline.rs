//! Detection-to-valuation pipeline.
//!
//! image -> Detector -> Classifier -> {Annotator, Aggregator} -> Valuator
//!
//! One [`CashPipeline`] is shared by all requests; it holds no per-request
//! state, only the engines and a handle to the rate source.

use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::AppConfig;
use crate::currency::{rate_currency_code, Denomination};
use crate::rates::RateSource;
use crate::types::{Classification, CurrencyCount, DetectedRegion, PipelineError};
use crate::valuation::{count_report, Aggregator, UnknownPolicy, Valuator};
use crate::vision::annotator::Annotator;
use crate::vision::classifier::Classifier;
use crate::vision::detector::Detector;
use crate::vision::InferenceEngine;

/// Result of valuing one image.
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub annotated: RgbImage,
    /// Per-denomination quantity and value in the requested currency.
    pub currencies: CurrencyCount,
    pub boxes: Vec<DetectedRegion>,
    /// `labels[i]` classifies `boxes[i]`.
    pub labels: Vec<Classification>,
}

impl PipelineOutput {
    /// How many of each known denomination were seen, zeros included.
    pub fn detected_counts(&self) -> Vec<(Denomination, u32)> {
        count_report(&self.labels)
    }
}

pub struct CashPipeline {
    detector: Detector,
    classifier: Classifier,
    annotator: Annotator,
    aggregator: Aggregator,
    valuator: Valuator,
    confidence_threshold: f32,
    /// ISO codes a caller may ask for. `NIS` is accepted as `ILS`.
    currencies: Vec<String>,
}

impl CashPipeline {
    pub fn new(
        localizer: Arc<dyn InferenceEngine>,
        classifier: Arc<dyn InferenceEngine>,
        rates: Arc<dyn RateSource>,
    ) -> Self {
        let defaults = AppConfig::default();
        Self {
            detector: Detector::new(localizer),
            classifier: Classifier::new(classifier),
            annotator: Annotator::new(),
            aggregator: Aggregator::default(),
            valuator: Valuator::new(rates),
            confidence_threshold: defaults.detection.confidence_threshold,
            currencies: defaults.exchange.currencies,
        }
    }

    /// Build from configuration. Fails only if a configured font cannot
    /// be loaded.
    pub fn from_config(
        config: &AppConfig,
        localizer: Arc<dyn InferenceEngine>,
        classifier: Arc<dyn InferenceEngine>,
        rates: Arc<dyn RateSource>,
    ) -> anyhow::Result<Self> {
        let mut annotator = Annotator::new();
        if let Some(path) = &config.detection.font_path {
            annotator = annotator.with_font(Annotator::load_font(path)?);
        }

        Ok(Self::new(localizer, classifier, rates)
            .with_confidence_threshold(config.detection.confidence_threshold)
            .with_unknown_policy(config.valuation.unknown_policy)
            .with_currencies(config.exchange.currencies.clone())
            .with_annotator(annotator))
    }

    pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
        self.confidence_threshold = threshold;
        self
    }

    pub fn with_unknown_policy(mut self, policy: UnknownPolicy) -> Self {
        self.aggregator = Aggregator::new(policy);
        self
    }

    pub fn with_currencies(mut self, currencies: Vec<String>) -> Self {
        self.currencies = currencies.iter().map(|c| rate_currency_code(c)).collect();
        self
    }

    pub fn with_annotator(mut self, annotator: Annotator) -> Self {
        self.annotator = annotator;
        self
    }

    /// Normalise and check a requested currency code.
    pub fn validate_currency(&self, target: &str) -> Result<String, PipelineError> {
        let code = target.trim().to_ascii_uppercase();
        let iso = rate_currency_code(&code);
        if code.is_empty() || !self.currencies.iter().any(|c| *c == iso) {
            return Err(PipelineError::InvalidInput(format!(
                "Invalid return currency '{target}', expected one of {} or NIS",
                self.currencies.join(", ")
            )));
        }
        Ok(code)
    }

    /// Detect, classify, annotate, count and value the currency in `image`.
    pub fn valuate_image(
        &self,
        image: &DynamicImage,
        target: &str,
    ) -> Result<PipelineOutput, PipelineError> {
        let target = self.validate_currency(target)?;
        let rgb = image.to_rgb8();

        let detection = self.detector.detect(&rgb, self.confidence_threshold)?;
        let labels = self.classifier.classify(&detection.regions);
        debug!(regions = detection.len(), labels = labels.len(), "Classified regions");

        let annotated = self.annotator.annotate(&rgb, &detection.boxes, &labels);
        let counts = self.aggregator.aggregate(&labels);
        let currencies = self.valuator.valuate(counts, &target)?;

        info!(
            target = %target,
            regions = detection.len(),
            items = currencies.total_quantity(),
            total = currencies.total_value(),
            "Valued image"
        );

        Ok(PipelineOutput {
            annotated,
            currencies,
            boxes: detection.boxes,
            labels,
        })
    }

    /// Bytes in, bytes out: decode, value, and re-encode the annotated
    /// image in `format`.
    pub fn valuate_bytes(
        &self,
        bytes: &[u8],
        target: &str,
        format: ImageFormat,
    ) -> Result<(Vec<u8>, CurrencyCount), PipelineError> {
        let image = decode_image(bytes)?;
        let output = self.valuate_image(&image, target)?;
        let encoded = encode_image(&output.annotated, format)?;
        Ok((encoded, output.currencies))
    }
}

// ---------------------------------------------------------------------------
// Image transport
// ---------------------------------------------------------------------------

pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::InvalidInput("empty image".into()));
    }
    image::load_from_memory(bytes)
        .map_err(|e| PipelineError::InvalidInput(format!("undecodable image: {e}")))
}

pub fn encode_image(image: &RgbImage, format: ImageFormat) -> Result<Vec<u8>, PipelineError> {
    let mut buf = Cursor::new(Vec::new());
    image
        .write_to(&mut buf, format)
        .map_err(|e| PipelineError::Encode(e.to_string()))?;
    Ok(buf.into_inner())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
