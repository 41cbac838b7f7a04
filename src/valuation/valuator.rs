//! Converts face values into a target currency.
//!
//! Rates are keyed by ISO code, so `NIS` is looked up as `ILS`. Entries
//! already in the target currency convert at 1.0 without touching the
//! rate source, and `Unknown` entries are always worth 0.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use tracing::{debug, error};

use crate::currency::rate_currency_code;
use crate::rates::{RateSource, RateTable};
use crate::types::{CurrencyCount, ValuationError};

/// Round to cents, ties to even.
pub fn round_currency(value: f64) -> f64 {
    Decimal::from_f64_retain(value)
        .map(|d| d.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven))
        .and_then(|d| d.to_f64())
        .unwrap_or(value)
}

pub struct Valuator {
    rates: Arc<dyn RateSource>,
}

impl Valuator {
    pub fn new(rates: Arc<dyn RateSource>) -> Self {
        Self { rates }
    }

    /// Replace every entry's face value with its value in `target`.
    ///
    /// A missing rate values that entry at 0 and is logged. Failing to get
    /// a rate table at all fails the whole batch.
    pub fn valuate(
        &self,
        mut counts: CurrencyCount,
        target: &str,
    ) -> Result<CurrencyCount, ValuationError> {
        let to = rate_currency_code(target);
        let mut table: Option<RateTable> = None;

        for (key, entry) in counts.iter_mut() {
            let Some(family) = key.family() else {
                entry.unit_value = 0.0;
                continue;
            };
            let from = family.iso_code();

            let rate = if from == to {
                Some(1.0)
            } else {
                if table.is_none() {
                    table = Some(self.load_table()?);
                }
                table.as_ref().and_then(|t| t.conversion_rate(from, &to))
            };

            match rate {
                Some(rate) => {
                    entry.unit_value = round_currency(rate * entry.unit_value);
                    debug!(code = key.code(), from, to = %to, rate, value = entry.unit_value, "Valued entry");
                }
                None => {
                    error!(code = key.code(), from, to = %to, "No exchange rate available, valuing at 0");
                    entry.unit_value = 0.0;
                }
            }
        }

        Ok(counts)
    }

    fn load_table(&self) -> Result<RateTable, ValuationError> {
        self.rates.current_rates().map_err(|e| {
            error!(error = %e, "Could not obtain exchange rates");
            ValuationError(format!("exchange rates unavailable: {e:#}"))
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::currency::{CurrencyKey, Denomination};
    use crate::types::CurrencyEntry;
    use anyhow::anyhow;

    struct Unreachable;

    impl RateSource for Unreachable {
        fn current_rates(&self) -> anyhow::Result<RateTable> {
            Err(anyhow!("provider offline"))
        }
    }

    fn counts(entries: &[(Denomination, u32)]) -> CurrencyCount {
        let mut c = CurrencyCount::new();
        for &(d, quantity) in entries {
            c.insert(
                d.into(),
                CurrencyEntry {
                    quantity,
                    unit_value: d.face_value(),
                },
            );
        }
        c
    }

    fn table(pairs: &[(&str, &str, f64)]) -> Arc<dyn RateSource> {
        let mut t = RateTable::new();
        for &(a, b, r) in pairs {
            t.insert(a, b, r);
        }
        Arc::new(t)
    }

    #[test]
    fn test_same_currency_needs_no_rates() {
        let v = Valuator::new(Arc::new(Unreachable));
        let out = v.valuate(counts(&[(Denomination::Usd1Bill, 1)]), "USD").unwrap();
        assert_eq!(out.get_code("USD_B_1").unwrap().unit_value, 1.0);
        assert_eq!(out.get_code("USD_B_1").unwrap().quantity, 1);
    }

    #[test]
    fn test_inverse_rate_and_rounding() {
        let v = Valuator::new(table(&[("ILS", "USD", 0.27)]));
        let out = v
            .valuate(counts(&[(Denomination::Nis10Agorot, 1), (Denomination::Usd1Bill, 1)]), "USD")
            .unwrap();
        assert_eq!(out.get_code("NIS_C_10").unwrap().unit_value, 0.03);
        assert_eq!(out.get_code("USD_B_1").unwrap().unit_value, 1.0);

        // And the other way round, through the reciprocal.
        let out = v.valuate(counts(&[(Denomination::Usd20, 1)]), "ILS").unwrap();
        assert_eq!(out.get_code("USD_B_20").unwrap().unit_value, 74.07);
    }

    #[test]
    fn test_nis_target_is_ils() {
        let v = Valuator::new(table(&[("EUR", "ILS", 4.0)]));
        let out = v.valuate(counts(&[(Denomination::Euro5, 2), (Denomination::Nis5, 1)]), "NIS").unwrap();
        assert_eq!(out.get_code("EUR_B_5").unwrap().unit_value, 20.0);
        assert_eq!(out.get_code("NIS_C_500").unwrap().unit_value, 5.0);
    }

    #[test]
    fn test_missing_rate_values_zero() {
        let v = Valuator::new(table(&[("EUR", "USD", 1.1)]));
        let out = v.valuate(counts(&[(Denomination::Nis1, 3), (Denomination::Euro1, 1)]), "USD").unwrap();
        assert_eq!(out.get_code("NIS_C_100").unwrap().unit_value, 0.0);
        assert_eq!(out.get_code("NIS_C_100").unwrap().quantity, 3);
        assert_eq!(out.get_code("EUR_C_100").unwrap().unit_value, 1.1);
    }

    #[test]
    fn test_unknown_is_zero() {
        let mut c = CurrencyCount::new();
        c.insert(CurrencyKey::Unknown, CurrencyEntry { quantity: 2, unit_value: 7.0 });
        let out = Valuator::new(Arc::new(Unreachable)).valuate(c, "EUR").unwrap();
        assert_eq!(out.get(&CurrencyKey::Unknown).unwrap().unit_value, 0.0);
    }

    #[test]
    fn test_unreachable_rates_fail_batch() {
        let v = Valuator::new(Arc::new(Unreachable));
        let err = v.valuate(counts(&[(Denomination::Euro2, 1)]), "USD").unwrap_err();
        assert!(err.to_string().contains("provider offline"));
    }

    #[test]
    fn test_empty_counts() {
        let v = Valuator::new(Arc::new(Unreachable));
        assert!(v.valuate(CurrencyCount::new(), "USD").unwrap().is_empty());
    }

    #[test]
    fn test_round_currency_ties_to_even() {
        assert_eq!(round_currency(0.125), 0.12);
        assert_eq!(round_currency(0.375), 0.38);
        assert_eq!(round_currency(2.0), 2.0);
        assert!(round_currency(f64::NAN).is_nan());
    }
}
