//! CLI entry point for the street quality tool.
//!
//! Provides subcommands for extracting and scoring a street network from any
//! registered source kind, and for listing the registered adapters.

use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use street_quality::output::{
    append_run_log, print_json, print_pretty, write_edges_csv, write_features_csv, write_geojson,
};
use street_quality::summary::RunSummary;
use street_quality::{
    AdapterConfig, AdapterRegistry, ExtractOptions, NetworkType, extract, features::feature_table,
};
use tracing::{info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "street_quality")]
#[command(about = "Extract street networks and score narrow, quiet streets", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract and score edges from a place name, file path, URL or database
    Extract {
        /// Place name, file path, URL or connection string
        #[arg(value_name = "SOURCE")]
        source: String,

        /// Adapter to use (inferred from the source when omitted)
        #[arg(short, long)]
        adapter: Option<String>,

        /// JSON adapter configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// OSM network type, overriding the configuration
        #[arg(short, long, value_enum)]
        network: Option<NetworkType>,

        /// Score at or above which an edge is a quality street
        #[arg(short, long, default_value_t = street_quality::scoring::DEFAULT_THRESHOLD)]
        threshold: f64,

        /// Fail when more than this fraction of records is dropped
        #[arg(long)]
        max_drop_rate: Option<f64>,

        /// Edge CSV to write (gzip when it ends in .gz)
        #[arg(short, long, default_value = "edges.csv")]
        output: PathBuf,

        /// Optional: GeoJSON export for map rendering
        #[arg(long)]
        geojson: Option<PathBuf>,

        /// Optional: classifier feature table
        #[arg(long)]
        features: Option<PathBuf>,

        /// Only write quality streets to the edge CSV and GeoJSON
        #[arg(long, default_value_t = false)]
        quality_only: bool,

        /// Optional: CSV run log to append a summary row to
        #[arg(long)]
        run_log: Option<PathBuf>,
    },
    /// List registered adapters and the formats they read
    ListAdapters,
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/street_quality.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("street_quality.log"));

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
    let registry = AdapterRegistry::with_builtin();

    match cli.command {
        Commands::Extract {
            source,
            adapter,
            config,
            network,
            threshold,
            max_drop_rate,
            output,
            geojson,
            features,
            quality_only,
            run_log,
        } => {
            let config = config.as_deref().map(load_config).transpose()?;
            let options = ExtractOptions {
                threshold,
                max_drop_rate,
            };

            let result = extract(&registry, &source, adapter.as_deref(), config, network, &options)
                .with_context(|| format!("extracting {source}"))?;

            for sample in &result.drops.samples {
                warn!(record = %sample.record, reason = %sample.violation, "Dropped record");
            }

            let edges = if quality_only {
                &result.quality_streets
            } else {
                &result.scored
            };
            write_edges_csv(&output, edges)?;
            if let Some(path) = geojson {
                write_geojson(&path, edges)?;
            }
            if let Some(path) = features {
                write_features_csv(&path, &feature_table(&result.scored))?;
            }

            let summary = RunSummary::from_result(&source, threshold, &result);
            print_pretty(&summary);
            print_json(&summary)?;
            if let Some(path) = run_log {
                append_run_log(&path, &summary)?;
            }

            info!(
                edges = summary.total_edges,
                quality = summary.quality_edges,
                quality_pct = summary.quality_pct(),
                "Done"
            );
        }
        Commands::ListAdapters => {
            for (name, formats) in registry.formats() {
                println!("{name}\t{}", formats.join(", "));
            }
        }
    }

    Ok(())
}

/// Reads an adapter configuration document.
#[tracing::instrument(skip(path), fields(path = %path.display()))]
fn load_config(path: &Path) -> Result<AdapterConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading config {}", path.display()))?;
    AdapterConfig::from_json(&text).with_context(|| format!("parsing config {}", path.display()))
}
