//! Exchange rates.
//!
//! `RateTable` holds directed pair rates keyed `"{FROM}_{TO}"`. Only one
//! direction of a pair needs to be present; the other is derived by taking
//! the reciprocal. `CacheState` is the table plus its refresh timestamp,
//! and is also the on-disk cache document.

pub mod provider;
pub mod service;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use provider::{ExchangeRateApiClient, RateProvider};
pub use service::{ExchangeRateService, RateServiceSettings, RefreshHandle};

/// Anything the valuator can read a rate table from.
pub trait RateSource: Send + Sync {
    fn current_rates(&self) -> anyhow::Result<RateTable>;
}

// ---------------------------------------------------------------------------
// Rate table
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateTable(BTreeMap<String, f64>);

impl RateTable {
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    pub fn pair_key(from: &str, to: &str) -> String {
        format!("{from}_{to}")
    }

    /// Insert `from -> to`. Self-pairs and rates that are not finite and
    /// positive are rejected; returns whether the rate was stored.
    pub fn insert(&mut self, from: &str, to: &str, rate: f64) -> bool {
        if from == to || !rate.is_finite() || rate <= 0.0 {
            return false;
        }
        self.0.insert(Self::pair_key(from, to), rate);
        true
    }

    /// The stored rate for exactly `from -> to`.
    pub fn get(&self, from: &str, to: &str) -> Option<f64> {
        self.0.get(&Self::pair_key(from, to)).copied()
    }

    /// Rate to convert one unit of `from` into `to`: identity for the same
    /// currency, otherwise the direct pair, otherwise the reciprocal of the
    /// inverse pair. No multi-hop chaining.
    pub fn conversion_rate(&self, from: &str, to: &str) -> Option<f64> {
        if from == to {
            return Some(1.0);
        }
        self.get(from, to)
            .or_else(|| self.get(to, from).map(|inverse| 1.0 / inverse))
    }

    /// Copy every rate from `other` into `self`, overwriting duplicates.
    pub fn merge(&mut self, other: &RateTable) {
        for (key, rate) in &other.0 {
            self.0.insert(key.clone(), *rate);
        }
    }

    /// Drop entries that break the table invariants (self-pairs, malformed
    /// keys, non-positive rates). Returns how many were removed.
    pub fn sanitize(&mut self) -> usize {
        let before = self.0.len();
        self.0.retain(|key, rate| {
            let valid_key = match key.split_once('_') {
                Some((from, to)) => !from.is_empty() && !to.is_empty() && from != to,
                None => false,
            };
            valid_key && rate.is_finite() && *rate > 0.0
        });
        before - self.0.len()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.0.iter()
    }
}

impl FromIterator<(String, f64)> for RateTable {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl RateSource for RateTable {
    fn current_rates(&self) -> anyhow::Result<RateTable> {
        Ok(self.clone())
    }
}

/// Hard-coded rates between EUR, USD and ILS, used only when neither live
/// nor cached rates are available.
pub fn fallback_rates() -> RateTable {
    let mut table = RateTable::new();
    table.insert("EUR", "USD", 1.1172);
    table.insert("EUR", "ILS", 4.1099);
    table.insert("USD", "EUR", 0.8951);
    table.insert("USD", "ILS", 3.6796);
    table.insert("ILS", "EUR", 0.2433);
    table.insert("ILS", "USD", 0.2717);
    table
}

// ---------------------------------------------------------------------------
// Cache state
// ---------------------------------------------------------------------------

/// Where a cache snapshot sits in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheStatus {
    Empty,
    Fresh,
    Stale,
}

/// Rate table plus the time it was last refreshed.
///
/// `rates` is non-empty iff `last_update` is set; [`CacheState::new`]
/// enforces this.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheState {
    pub rates: RateTable,
    #[serde(with = "iso_timestamp", default)]
    pub last_update: Option<DateTime<Utc>>,
}

impl CacheState {
    pub fn new(rates: RateTable, updated_at: DateTime<Utc>) -> Self {
        let last_update = if rates.is_empty() { None } else { Some(updated_at) };
        Self { rates, last_update }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn status(&self, now: DateTime<Utc>, interval: Duration) -> CacheStatus {
        match self.last_update {
            _ if self.rates.is_empty() => CacheStatus::Empty,
            None => CacheStatus::Empty,
            Some(at) if now - at > interval => CacheStatus::Stale,
            Some(_) => CacheStatus::Fresh,
        }
    }

    /// Restore the non-empty-iff-timestamped invariant after loading.
    fn normalize(mut self) -> Self {
        self.rates.sanitize();
        if self.rates.is_empty() {
            self.last_update = None;
        } else if self.last_update.is_none() {
            // Untimestamped rates load as stale.
            self.last_update = Some(DateTime::<Utc>::default());
        }
        self
    }
}

/// ISO-8601 timestamps. Writes RFC 3339 in UTC; reads RFC 3339 or a naive
/// local timestamp such as `2024-08-01T10:15:30.123456`.
mod iso_timestamp {
    use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<Utc>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(at) => serializer.serialize_str(&at.to_rfc3339()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<Utc>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        let Some(raw) = raw else {
            return Ok(None);
        };

        if let Ok(at) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(Some(at.with_timezone(&Utc)));
        }

        let naive = NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map_err(serde::de::Error::custom)?;
        Local
            .from_local_datetime(&naive)
            .earliest()
            .map(|at| Some(at.with_timezone(&Utc)))
            .ok_or_else(|| serde::de::Error::custom(format!("nonexistent local time: {raw}")))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_rejects_invalid() {
        let mut t = RateTable::new();
        assert!(!t.insert("USD", "USD", 1.0));
        assert!(!t.insert("USD", "EUR", 0.0));
        assert!(!t.insert("USD", "EUR", -2.0));
        assert!(!t.insert("USD", "EUR", f64::NAN));
        assert!(t.insert("USD", "EUR", 0.9));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_conversion_rate_direct_and_inverse() {
        let mut t = RateTable::new();
        t.insert("ILS", "USD", 0.25);
        assert_eq!(t.conversion_rate("ILS", "USD"), Some(0.25));
        assert_eq!(t.conversion_rate("USD", "ILS"), Some(4.0));
        assert_eq!(t.conversion_rate("EUR", "EUR"), Some(1.0));
        assert_eq!(t.conversion_rate("EUR", "USD"), None);
    }

    #[test]
    fn test_reciprocity_round_trip() {
        let mut t = RateTable::new();
        t.insert("EUR", "USD", 1.1172);
        let there = t.conversion_rate("EUR", "USD").unwrap();
        let back = t.conversion_rate("USD", "EUR").unwrap();
        assert!((there * back - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_direct_preferred_over_inverse() {
        let mut t = RateTable::new();
        t.insert("USD", "EUR", 0.9);
        t.insert("EUR", "USD", 1.2);
        assert_eq!(t.conversion_rate("USD", "EUR"), Some(0.9));
    }

    #[test]
    fn test_fallback_covers_tracked_pairs() {
        let t = fallback_rates();
        assert_eq!(t.len(), 6);
        for (a, b) in [("EUR", "USD"), ("USD", "ILS"), ("ILS", "EUR")] {
            assert!(t.conversion_rate(a, b).is_some());
            assert!(t.conversion_rate(b, a).is_some());
        }
    }

    #[test]
    fn test_sanitize() {
        let mut t: RateTable = [
            ("USD_EUR".to_string(), 0.9),
            ("USD_USD".to_string(), 1.0),
            ("BAD".to_string(), 2.0),
            ("EUR_ILS".to_string(), -1.0),
        ]
        .into_iter()
        .collect();
        assert_eq!(t.sanitize(), 3);
        assert_eq!(t.get("USD", "EUR"), Some(0.9));
    }

    #[test]
    fn test_state_status() {
        let now = Utc::now();
        let day = Duration::hours(24);
        assert_eq!(CacheState::empty().status(now, day), CacheStatus::Empty);

        let fresh = CacheState::new(fallback_rates(), now - Duration::hours(1));
        assert_eq!(fresh.status(now, day), CacheStatus::Fresh);

        let stale = CacheState::new(fallback_rates(), now - Duration::hours(25));
        assert_eq!(stale.status(now, day), CacheStatus::Stale);

        let exactly = CacheState::new(fallback_rates(), now - day);
        assert_eq!(exactly.status(now, day), CacheStatus::Fresh);
    }

    #[test]
    fn test_new_enforces_invariant() {
        let state = CacheState::new(RateTable::new(), Utc::now());
        assert!(state.last_update.is_none());
    }

    #[test]
    fn test_cache_document_format() {
        let at = DateTime::parse_from_rfc3339("2024-08-01T10:00:00Z").unwrap().with_timezone(&Utc);
        let mut rates = RateTable::new();
        rates.insert("EUR", "USD", 1.1);
        let json = serde_json::to_value(CacheState::new(rates, at)).unwrap();
        assert_eq!(json["rates"]["EUR_USD"], 1.1);
        assert_eq!(json["last_update"], "2024-08-01T10:00:00+00:00");

        let empty = serde_json::to_value(CacheState::empty()).unwrap();
        assert!(empty["last_update"].is_null());
    }

    #[test]
    fn test_reads_naive_timestamp() {
        let doc = r#"{"rates": {"USD_EUR": 0.9}, "last_update": "2024-08-01T10:15:30.123456"}"#;
        let state: CacheState = serde_json::from_str(doc).unwrap();
        assert!(state.last_update.is_some());
    }

    #[test]
    fn test_normalize_restores_invariant() {
        let doc = r#"{"rates": {"USD_USD": 1.0}, "last_update": "2024-08-01T10:00:00Z"}"#;
        let state: CacheState = serde_json::from_str(doc).unwrap();
        let state = state.normalize();
        assert!(state.rates.is_empty());
        assert!(state.last_update.is_none());

        let doc = r#"{"rates": {"USD_EUR": 0.9}, "last_update": null}"#;
        let state: CacheState = serde_json::from_str::<CacheState>(doc).unwrap().normalize();
        assert_eq!(
            state.status(Utc::now(), Duration::hours(24)),
            CacheStatus::Stale
        );
    }
}
