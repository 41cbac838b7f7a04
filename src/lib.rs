//! CASHCOUNT: currency photo detection and valuation.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod currency;
pub mod pipeline;
pub mod rates;
pub mod types;
pub mod valuation;
pub mod vision;

pub use pipeline::{decode_image, encode_image, CashPipeline, PipelineOutput};
pub use rates::{ExchangeRateService, RateSource, RateTable};
pub use types::{Classification, CurrencyCount, CurrencyEntry, DetectedRegion, PipelineError};
