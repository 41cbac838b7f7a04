//! CASHCOUNT command-line entry point.
//!
//! Loads configuration, initialises structured logging, starts the
//! exchange-rate refresh loop and runs one command with graceful shutdown.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use image::ImageFormat;
use secrecy::SecretString;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

use cashcount::config::AppConfig;
use cashcount::pipeline::{decode_image, encode_image, CashPipeline};
use cashcount::rates::{ExchangeRateApiClient, ExchangeRateService, RateServiceSettings};
use cashcount::vision::onnx::{self, YoloEngine};

#[derive(Parser)]
#[command(name = "cashcount", version, about = "Count and value currency in a photo")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect, count and value the coins and bills in an image
    Count {
        /// Input image
        image: PathBuf,

        /// Currency to value the result in (EUR, USD, ILS or NIS)
        #[arg(short = 'r', long, default_value = "USD")]
        currency: String,

        /// Write the annotated image here (format from the extension)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Print the current exchange-rate table as JSON
    Rates {
        /// Fetch from the provider before printing
        #[arg(long)]
        refresh: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cli = Cli::parse();
    init_logging();

    let cfg = AppConfig::load_or_default(&cli.config)?;
    info!(
        config = %cli.config,
        currencies = ?cfg.exchange.currencies,
        interval_hours = cfg.exchange.update_rates_interval_hours,
        "CASHCOUNT starting up"
    );

    // -- Exchange-rate service -------------------------------------------

    let api_key = cfg.exchange_api_key().unwrap_or_else(|e| {
        warn!(error = %e, "No exchange-rate API key, live rates unavailable");
        SecretString::new(String::new())
    });
    let provider = ExchangeRateApiClient::new(
        cfg.exchange.base_url.clone(),
        api_key,
        std::time::Duration::from_secs(cfg.exchange.request_timeout_secs),
    )?;
    let rates = Arc::new(ExchangeRateService::new(
        RateServiceSettings::from(&cfg.exchange),
        Arc::new(provider),
    ));
    let refresh = rates.spawn();

    let outcome = tokio::select! {
        res = run(cli.command, &cfg, Arc::clone(&rates)) => res,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received.");
            Ok(())
        }
    };

    refresh.close().await;
    if let Err(e) = &outcome {
        error!(error = %e, "Command failed");
    }
    info!("CASHCOUNT shut down cleanly.");
    outcome
}

async fn run(command: Command, cfg: &AppConfig, rates: Arc<ExchangeRateService>) -> Result<()> {
    match command {
        Command::Count { image, currency, out } => {
            count(cfg, rates, image, currency, out).await
        }
        Command::Rates { refresh } => {
            if refresh {
                rates.fetch_rates().await;
            }
            let table = rates.get_rates();
            println!("{}", serde_json::to_string_pretty(&table)?);
            Ok(())
        }
    }
}

async fn count(
    cfg: &AppConfig,
    rates: Arc<ExchangeRateService>,
    image_path: PathBuf,
    currency: String,
    out: Option<PathBuf>,
) -> Result<()> {
    onnx::init_runtime()?;
    let det = &cfg.detection;
    let localizer = YoloEngine::load(
        "localizer",
        &det.localizer_model,
        &det.localizer_labels,
        det.onnx_threads,
    )?;
    let classifier = YoloEngine::load(
        "classifier",
        &det.classifier_model,
        &det.classifier_labels,
        det.onnx_threads,
    )?;
    let pipeline = CashPipeline::from_config(cfg, Arc::new(localizer), Arc::new(classifier), rates)?;

    let bytes = std::fs::read(&image_path)
        .with_context(|| format!("Failed to read image {}", image_path.display()))?;

    // Inference is blocking; keep it off the runtime threads.
    let (output, currency) = tokio::task::spawn_blocking(move || {
        let image = decode_image(&bytes)?;
        pipeline.valuate_image(&image, &currency).map(|o| (o, currency))
    })
    .await
    .context("Pipeline task failed")??;

    if let Some(path) = out {
        let format = ImageFormat::from_path(&path).unwrap_or(ImageFormat::Jpeg);
        let encoded = encode_image(&output.annotated, format)?;
        std::fs::write(&path, encoded)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(path = %path.display(), "Annotated image written");
    }

    let detected: Vec<_> = output
        .detected_counts()
        .into_iter()
        .map(|(denomination, count)| serde_json::json!({ "label": denomination.label(), "count": count }))
        .collect();

    let report = serde_json::json!({
        "return_currency": currency.to_ascii_uppercase(),
        "detected": detected,
        "currencies": output.currencies,
        "total": output.currencies.total_value(),
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("cashcount=info"));

    if std::env::var("CASHCOUNT_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
