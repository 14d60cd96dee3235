//! CLI entry point for the weekly emissions pipeline.
//!
//! Runs the trajectory → road link → emissions pipeline for every configured
//! week and city, or prints the default configuration.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::ffi::OsStr;
use std::path::Path;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};
use weekly_emissions::config::PipelineConfig;
use weekly_emissions::fetch::BasicClient;
use weekly_emissions::pipeline::Pipeline;
use weekly_emissions::tessellation::NominatimClient;

#[derive(Parser)]
#[command(name = "weekly_emissions")]
#[command(about = "Weekly road-traffic emissions per vehicle and road link", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compute emission totals for every configured week and city
    Run {
        /// JSON config file (falls back to $EMISSIONS_CONFIG, then defaults)
        #[arg(short, long, value_name = "FILE")]
        config: Option<String>,

        /// Week to process; repeat to process several (overrides the config)
        #[arg(short, long = "week")]
        weeks: Vec<u32>,

        /// City to process; repeat to process several (overrides the config)
        #[arg(long = "city")]
        cities: Vec<String>,
    },
    /// Print the default configuration as JSON
    DefaultConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/weekly_emissions.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("weekly_emissions.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            weeks,
            cities,
        } => {
            let mut config = match config.or_else(|| std::env::var("EMISSIONS_CONFIG").ok()) {
                Some(path) => {
                    info!(path = %path, "Loading config");
                    PipelineConfig::load(&path)?
                }
                None => PipelineConfig::default(),
            };
            if !weeks.is_empty() {
                config.weeks = weeks;
            }
            if !cities.is_empty() {
                config.cities = cities;
            }

            info!(
                weeks = ?config.weeks,
                cities = ?config.cities,
                cell_size = config.cell_size,
                max_interval_secs = config.max_interval_secs,
                "Starting pipeline"
            );

            let geocoder = NominatimClient::new(BasicClient::new()?, config.nominatim_url.clone());
            Pipeline::new(config, geocoder).run().await?;
        }
        Commands::DefaultConfig => {
            println!("{}", serde_json::to_string_pretty(&PipelineConfig::default())?);
        }
    }

    Ok(())
}
