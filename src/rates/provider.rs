//! Live exchange-rate provider.
//!
//! Fetches the latest rates for one base currency per call from
//! exchangerate-api.com (v6).
//!
//! API: `GET {base_url}/{api_key}/latest/{BASE}`
//! Response: `{"result": "success", "conversion_rates": {"USD": 1.0, ...}}`
//! On failure `result` is `"error"` and `error-type` says why.

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use crate::types::RateFetchError;

pub const DEFAULT_BASE_URL: &str = "https://v6.exchangerate-api.com/v6";

/// Abstraction over a source of live exchange rates.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RateProvider: Send + Sync {
    /// Rates from `base` to every currency the provider knows, keyed by
    /// ISO code (`{"USD": 1.08, "ILS": 4.01, ...}` for base `EUR`).
    async fn latest_rates(&self, base: &str) -> Result<HashMap<String, f64>, RateFetchError>;
}

// ---------------------------------------------------------------------------
// API response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct LatestResponse {
    result: String,
    #[serde(default)]
    conversion_rates: HashMap<String, f64>,
    #[serde(default, rename = "error-type")]
    error_type: Option<String>,
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct ExchangeRateApiClient {
    http: Client,
    base_url: String,
    api_key: SecretString,
}

impl ExchangeRateApiClient {
    pub fn new(base_url: impl Into<String>, api_key: SecretString, timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent("cashcount/0.1.0")
            .build()
            .context("Failed to build exchange-rate HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.into(),
            api_key,
        })
    }

    fn latest_url(&self, base: &str) -> String {
        format!(
            "{}/{}/latest/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(self.api_key.expose_secret()),
            urlencoding::encode(base)
        )
    }

    fn parse_latest(base: &str, body: &str) -> Result<HashMap<String, f64>, RateFetchError> {
        let data: LatestResponse =
            serde_json::from_str(body).map_err(|e| RateFetchError::Decode {
                base: base.to_string(),
                message: e.to_string(),
            })?;

        if data.result != "success" {
            return Err(RateFetchError::Rejected {
                base: base.to_string(),
                result: data.error_type.unwrap_or(data.result),
            });
        }

        Ok(data.conversion_rates)
    }
}

#[async_trait]
impl RateProvider for ExchangeRateApiClient {
    async fn latest_rates(&self, base: &str) -> Result<HashMap<String, f64>, RateFetchError> {
        let transport = |e: reqwest::Error| RateFetchError::Transport {
            base: base.to_string(),
            message: e.without_url().to_string(),
        };

        let resp = self
            .http
            .get(self.latest_url(base))
            .send()
            .await
            .map_err(transport)?;

        let status = resp.status();
        if !status.is_success() {
            return Err(RateFetchError::Status {
                base: base.to_string(),
                status: status.as_u16(),
            });
        }

        let body = resp.text().await.map_err(transport)?;
        let rates = Self::parse_latest(base, &body)?;
        debug!(base, count = rates.len(), "Received conversion rates");
        Ok(rates)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
