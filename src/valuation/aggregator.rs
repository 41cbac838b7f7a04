//! Counts classified labels per denomination.
//!
//! Labels map to canonical codes through [`Denomination::from_label`]. A
//! label with no denomination is dropped and logged; `Unknown` regions are
//! kept or dropped according to [`UnknownPolicy`].

use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::{debug, error};

use crate::currency::{CurrencyKey, Denomination};
use crate::types::{Classification, CurrencyCount, CurrencyEntry};

/// What to do with regions the classifier could not identify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownPolicy {
    /// Report them under the `Unknown` key with value 0.
    #[default]
    Keep,
    /// Leave them out of the result.
    Drop,
}

#[derive(Debug, Clone, Default)]
pub struct Aggregator {
    unknown_policy: UnknownPolicy,
}

impl Aggregator {
    pub fn new(unknown_policy: UnknownPolicy) -> Self {
        Self { unknown_policy }
    }

    pub fn unknown_policy(&self) -> UnknownPolicy {
        self.unknown_policy
    }

    /// Tally labels into a [`CurrencyCount`] whose `unit_value` is each
    /// denomination's face value in its own currency.
    pub fn aggregate(&self, labels: &[Classification]) -> CurrencyCount {
        let mut tally: BTreeMap<&str, u32> = BTreeMap::new();
        let mut unknown = 0u32;

        for label in labels {
            match label {
                Classification::Known { label, .. } => *tally.entry(label.as_str()).or_insert(0) += 1,
                Classification::Unknown => unknown += 1,
            }
        }

        let mut counts = CurrencyCount::new();
        for (label, quantity) in tally {
            match Denomination::from_label(label) {
                Some(denomination) => counts.insert(
                    CurrencyKey::Denomination(denomination),
                    CurrencyEntry {
                        quantity,
                        unit_value: denomination.face_value(),
                    },
                ),
                None => error!(
                    label,
                    quantity, "Unmapped currency label, dropping it from the count"
                ),
            }
        }

        if unknown > 0 {
            match self.unknown_policy {
                UnknownPolicy::Keep => counts.insert(
                    CurrencyKey::Unknown,
                    CurrencyEntry {
                        quantity: unknown,
                        unit_value: 0.0,
                    },
                ),
                UnknownPolicy::Drop => debug!(quantity = unknown, "Dropping Unknown regions"),
            }
        }

        counts
    }
}

/// Every known denomination with how many times it was seen, zeros
/// included, in table order.
pub fn count_report(labels: &[Classification]) -> Vec<(Denomination, u32)> {
    Denomination::ALL
        .iter()
        .map(|&d| {
            let n = labels.iter().filter(|l| l.label() == d.label()).count() as u32;
            (d, n)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
