//! Counting and valuing classified currency.

pub mod aggregator;
pub mod valuator;

pub use aggregator::{count_report, Aggregator, UnknownPolicy};
pub use valuator::{round_currency, Valuator};
