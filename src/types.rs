//! Shared types for the CashCount pipeline.
//!
//! These types form the data model passed between the vision stages,
//! the aggregation/valuation stages and the exchange-rate service.
//! Everything here is transient per request except the error types,
//! which are shared by all modules.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::currency::CurrencyKey;

/// Label used for regions the classifier could not identify.
pub const UNKNOWN_LABEL: &str = "Unknown";

// ---------------------------------------------------------------------------
// Detection
// ---------------------------------------------------------------------------

/// One raw result from an inference engine, in the coordinate space of the
/// image that was handed to it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
    /// `[x1, y1, x2, y2]`
    pub bbox: [f32; 4],
    pub class_index: usize,
    pub confidence: f32,
}

/// A region kept by the detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedRegion {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
    /// Localizer class name ("coin", "bill", ...).
    pub raw_label: String,
    pub confidence: f32,
}

impl DetectedRegion {
    pub fn width(&self) -> u32 {
        (self.x2 as i64 - self.x1 as i64).clamp(0, u32::MAX as i64) as u32
    }

    pub fn height(&self) -> u32 {
        (self.y2 as i64 - self.y1 as i64).clamp(0, u32::MAX as i64) as u32
    }
}

impl fmt::Display for DetectedRegion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({:.2}) [{},{} -> {},{}]",
            self.raw_label, self.confidence, self.x1, self.y1, self.x2, self.y2
        )
    }
}

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Best-guess denomination for one detected region.
#[derive(Debug, Clone, PartialEq)]
pub enum Classification {
    Known { label: String, confidence: f32 },
    Unknown,
}

impl Classification {
    pub fn known(label: impl Into<String>, confidence: f32) -> Self {
        Classification::Known {
            label: label.into(),
            confidence,
        }
    }

    /// The label string, `"Unknown"` for unclassified regions.
    pub fn label(&self) -> &str {
        match self {
            Classification::Known { label, .. } => label,
            Classification::Unknown => UNKNOWN_LABEL,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            Classification::Known { confidence, .. } => *confidence,
            Classification::Unknown => 0.0,
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Classification::Unknown)
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.2})", self.label(), self.confidence())
    }
}

// ---------------------------------------------------------------------------
// Currency counts
// ---------------------------------------------------------------------------

/// Quantity of one denomination and the value of a single unit.
///
/// After aggregation `unit_value` is the face value in the denomination's
/// own currency; after valuation it is the converted value in the
/// requested currency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurrencyEntry {
    pub quantity: u32,
    #[serde(rename = "return_currency_value")]
    pub unit_value: f64,
}

/// Per-denomination tallies keyed by canonical currency code.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurrencyCount(BTreeMap<CurrencyKey, CurrencyEntry>);

impl CurrencyCount {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn insert(&mut self, key: CurrencyKey, entry: CurrencyEntry) {
        self.0.insert(key, entry);
    }

    pub fn get(&self, key: &CurrencyKey) -> Option<&CurrencyEntry> {
        self.0.get(key)
    }

    /// Look up an entry by its canonical code string (e.g. `"EUR_B_5"`).
    pub fn get_code(&self, code: &str) -> Option<&CurrencyEntry> {
        self.0
            .iter()
            .find(|(key, _)| key.code() == code)
            .map(|(_, entry)| entry)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&CurrencyKey, &CurrencyEntry)> {
        self.0.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&CurrencyKey, &mut CurrencyEntry)> {
        self.0.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Total number of items counted across all keys.
    pub fn total_quantity(&self) -> u32 {
        self.0.values().map(|e| e.quantity).sum()
    }

    /// Sum of `quantity * unit_value` over all entries.
    pub fn total_value(&self) -> f64 {
        self.0
            .values()
            .map(|e| e.quantity as f64 * e.unit_value)
            .sum()
    }
}

impl Serialize for CurrencyCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (key, entry) in &self.0 {
            map.serialize_entry(key.code(), entry)?;
        }
        map.end()
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that terminate a single pipeline request.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error(transparent)]
    Inference(#[from] InferenceError),

    #[error(transparent)]
    Valuation(#[from] ValuationError),

    #[error("Image encoding failed: {0}")]
    Encode(String),
}

/// An inference engine failed to run over an image.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Inference error ({engine}): {message}")]
pub struct InferenceError {
    pub engine: String,
    pub message: String,
}

impl InferenceError {
    pub fn new(engine: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            engine: engine.into(),
            message: message.into(),
        }
    }
}

/// Total failure to value a batch of currency counts.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Valuation failed: {0}")]
pub struct ValuationError(pub String);

/// Failure to fetch rates for one base currency.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RateFetchError {
    #[error("Request for {base} rates failed: {message}")]
    Transport { base: String, message: String },

    #[error("HTTP {status} while fetching {base} rates")]
    Status { base: String, status: u16 },

    #[error("Could not decode {base} rates: {message}")]
    Decode { base: String, message: String },

    #[error("Provider rejected {base} request: {result}")]
    Rejected { base: String, result: String },

    #[error("Timed out after {secs}s fetching {base} rates")]
    Timeout { base: String, secs: u64 },
}

/// Failure to read or write the on-disk rate cache.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("Cache I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cache file {path} is not valid: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
