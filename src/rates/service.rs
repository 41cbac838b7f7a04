//! Exchange-rate cache service.
//!
//! Owns the only long-lived mutable state in the crate: the current
//! [`CacheState`] snapshot, its JSON cache file, and a background loop that
//! refreshes it every `interval`.
//!
//! The snapshot lives behind `RwLock<Arc<CacheState>>`. Writers build a
//! complete new state and swap the `Arc`; readers clone the `Arc`, so a
//! reader sees either the previous or the next table, never a mix.
//!
//! State machine: `Empty` (no rates) -> `Fresh` (age <= interval) ->
//! `Stale` (age > interval) -> `Fresh` after a refresh.

use chrono::Utc;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{watch, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::provider::RateProvider;
use super::{fallback_rates, CacheState, CacheStatus, RateSource, RateTable};
use crate::config::ExchangeConfig;
use crate::currency::rate_currency_code;
use crate::types::{CacheError, RateFetchError};

/// Minimum gap between refresh attempts triggered by readers rather than
/// the timer.
const MIN_ON_DEMAND_GAP: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RateServiceSettings {
    /// Currencies fetched as bases and kept as targets (ISO codes).
    pub currencies: Vec<String>,
    /// Refresh period; rates older than this are stale.
    pub interval: Duration,
    pub cache_path: PathBuf,
    /// Upper bound on a single provider call.
    pub fetch_timeout: Duration,
}

impl From<&ExchangeConfig> for RateServiceSettings {
    fn from(cfg: &ExchangeConfig) -> Self {
        Self {
            currencies: cfg.currencies.iter().map(|c| rate_currency_code(c)).collect(),
            interval: Duration::from_secs(
                cfg.update_rates_interval_hours.max(1).saturating_mul(3600),
            ),
            cache_path: PathBuf::from(&cfg.cache_file),
            fetch_timeout: Duration::from_secs(cfg.request_timeout_secs.max(1)),
        }
    }
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

pub struct ExchangeRateService {
    provider: Arc<dyn RateProvider>,
    settings: RateServiceSettings,
    state: RwLock<Arc<CacheState>>,
    /// Serialises fetches; reads never take it.
    fetch_lock: Mutex<()>,
    refresh_requested: Notify,
}

impl ExchangeRateService {
    /// Create a service with an empty cache. Nothing is read from disk or
    /// the network until the first read or refresh.
    pub fn new(settings: RateServiceSettings, provider: Arc<dyn RateProvider>) -> Self {
        Self {
            provider,
            settings,
            state: RwLock::new(Arc::new(CacheState::empty())),
            fetch_lock: Mutex::new(()),
            refresh_requested: Notify::new(),
        }
    }

    pub fn settings(&self) -> &RateServiceSettings {
        &self.settings
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<CacheState> {
        match self.state.read() {
            Ok(guard) => Arc::clone(&*guard),
            Err(poisoned) => Arc::clone(&*poisoned.into_inner()),
        }
    }

    fn replace(&self, next: CacheState) {
        let next = Arc::new(next);
        match self.state.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }

    pub fn status(&self) -> CacheStatus {
        self.snapshot().status(Utc::now(), self.interval())
    }

    fn interval(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.settings.interval)
            .unwrap_or_else(|_| chrono::Duration::days(365 * 100))
    }

    /// True iff the cache is empty, untimestamped, or older than the
    /// refresh interval.
    pub fn should_refresh(&self) -> bool {
        self.status() != CacheStatus::Fresh
    }

    // -- Fetch ------------------------------------------------------------

    /// Fetch every tracked base currency from the provider.
    ///
    /// Each successful base is merged into the table and persisted at once,
    /// so a later failure keeps what already succeeded. A failing base is
    /// logged and skipped; this never returns an error.
    pub async fn fetch_rates(&self) {
        let _guard = self.fetch_lock.lock().await;
        let mut succeeded = 0usize;

        for base in &self.settings.currencies {
            let fetched = match tokio::time::timeout(
                self.settings.fetch_timeout,
                self.provider.latest_rates(base),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(RateFetchError::Timeout {
                    base: base.clone(),
                    secs: self.settings.fetch_timeout.as_secs(),
                }),
            };

            let conversion = match fetched {
                Ok(c) => c,
                Err(e) => {
                    error!(base = %base, error = %e, "Failed to fetch exchange rates");
                    continue;
                }
            };

            let mut rates = self.snapshot().rates.clone();
            let mut merged = 0usize;
            for target in &self.settings.currencies {
                if target == base {
                    continue;
                }
                match conversion.get(target) {
                    Some(&rate) if rates.insert(base, target, rate) => merged += 1,
                    Some(&rate) => warn!(base = %base, target = %target, rate, "Ignoring invalid rate"),
                    None => warn!(base = %base, target = %target, "Provider returned no rate for target"),
                }
            }

            self.replace(CacheState::new(rates, Utc::now()));
            self.persist();
            succeeded += 1;
            info!(base = %base, merged, "Fetched exchange rates");
        }

        let current = self.snapshot();
        if current.rates.is_empty() {
            error!("Failed to fetch any exchange rates");
            return;
        }

        if succeeded == 0 {
            warn!("No base currency refreshed, keeping previous rates");
        }
        self.replace(CacheState::new(current.rates.clone(), Utc::now()));
        self.persist();
        info!(pairs = current.rates.len(), succeeded, "Exchange rates updated");
    }

    // -- Disk cache -------------------------------------------------------

    fn persist(&self) {
        if let Err(e) = self.save_to_disk() {
            error!(error = %e, "Failed to save exchange-rate cache");
        }
    }

    /// Write the current snapshot as the whole cache file.
    ///
    /// The document goes to a temporary file in the same directory which is
    /// then renamed over the cache file, so readers never see a partial write.
    pub fn save_to_disk(&self) -> Result<(), CacheError> {
        let path = &self.settings.cache_path;
        let io_err = |source: std::io::Error| CacheError::Io {
            path: path.display().to_string(),
            source,
        };

        let json = serde_json::to_vec_pretty(self.snapshot().as_ref()).map_err(|source| {
            CacheError::Parse {
                path: path.display().to_string(),
                source,
            }
        })?;

        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(io_err)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;

        debug!(path = %path.display(), "Exchange-rate cache saved");
        Ok(())
    }

    /// Replace the in-memory state with the cache file, if there is one.
    /// Returns whether the file existed and was read.
    pub fn load_from_disk(&self) -> Result<bool, CacheError> {
        let path = &self.settings.cache_path;
        if !path.exists() {
            debug!(path = %path.display(), "No exchange-rate cache file");
            return Ok(false);
        }

        let raw = std::fs::read_to_string(path).map_err(|source| CacheError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let state: CacheState = serde_json::from_str(&raw).map_err(|source| CacheError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        let state = state.normalize();

        debug!(
            path = %path.display(),
            pairs = state.rates.len(),
            last_update = ?state.last_update,
            "Exchange-rate cache loaded"
        );
        self.replace(state);
        Ok(true)
    }

    // -- Read path --------------------------------------------------------

    /// Best available rate table. Never blocks on the network.
    ///
    /// An empty cache is first filled from disk; if that fails too the
    /// hard-coded fallback table is returned. Stale or missing rates wake
    /// the background loop, and the current table is returned right away.
    pub fn get_rates(&self) -> RateTable {
        let mut state = self.snapshot();

        if state.rates.is_empty() {
            match self.load_from_disk() {
                Ok(true) => state = self.snapshot(),
                Ok(false) => {}
                Err(e) => warn!(error = %e, "Could not read exchange-rate cache"),
            }
        }

        match state.status(Utc::now(), self.interval()) {
            CacheStatus::Fresh => state.rates.clone(),
            CacheStatus::Stale => {
                info!(last_update = ?state.last_update, "Exchange rates are stale, requesting refresh");
                self.request_refresh();
                state.rates.clone()
            }
            CacheStatus::Empty => {
                warn!("No live or cached exchange rates, using fallback table");
                self.request_refresh();
                fallback_rates()
            }
        }
    }

    /// Ask the background loop to run a refresh cycle soon.
    pub fn request_refresh(&self) {
        self.refresh_requested.notify_one();
    }

    // -- Background loop --------------------------------------------------

    async fn refresh_cycle(&self) {
        if let Err(e) = self.load_from_disk() {
            warn!(error = %e, "Could not read exchange-rate cache");
        }
        if self.should_refresh() {
            info!("Refreshing exchange rates");
            self.fetch_rates().await;
        } else {
            debug!("Exchange rates are fresh, skipping fetch");
        }
    }

    /// Run until `shutdown` flips to `true` or its sender is dropped.
    ///
    /// Each iteration loads the cache file, fetches if a refresh is due,
    /// then sleeps for the interval or until a reader requests a refresh.
    pub async fn background_refresh_loop(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.settings.interval.as_secs(),
            currencies = ?self.settings.currencies,
            "Exchange-rate refresh loop started"
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            tokio::select! {
                _ = self.refresh_cycle() => {}
                _ = shutdown.changed() => break,
            }
            let last_attempt = Instant::now();

            let on_demand = tokio::select! {
                _ = tokio::time::sleep(self.settings.interval) => false,
                _ = self.refresh_requested.notified() => true,
                _ = shutdown.changed() => break,
            };

            if on_demand {
                let wait = MIN_ON_DEMAND_GAP.saturating_sub(last_attempt.elapsed());
                if !wait.is_zero() {
                    debug!(wait_secs = wait.as_secs(), "Refresh requested, waiting for retry gap");
                    tokio::select! {
                        _ = tokio::time::sleep(wait) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        info!("Exchange-rate refresh loop stopped");
    }

    /// Start the background loop on the current tokio runtime.
    pub fn spawn(self: &Arc<Self>) -> RefreshHandle {
        let (shutdown, rx) = watch::channel(false);
        let service = Arc::clone(self);
        let task = tokio::spawn(async move { service.background_refresh_loop(rx).await });
        RefreshHandle { shutdown, task }
    }
}

impl RateSource for ExchangeRateService {
    fn current_rates(&self) -> anyhow::Result<RateTable> {
        Ok(self.get_rates())
    }
}

// ---------------------------------------------------------------------------
// Lifecycle handle
// ---------------------------------------------------------------------------

/// Handle to a running refresh loop.
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Stop the loop and wait for it to exit. An in-flight fetch is
    /// abandoned at its next await point; cache writes are never torn.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            error!(error = %e, "Exchange-rate refresh loop panicked");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
