//! FairValue market data CLI.
//!
//! ```bash
//! # Latest price, cache first
//! fairvalue fetch price AAPL
//!
//! # One year of history as JSON
//! fairvalue fetch price_history AAPL@1Y --json
//!
//! # Batch prices
//! fairvalue fetch-many price AAPL MSFT KO
//!
//! # Provider health
//! fairvalue status
//! ```

mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use fairvalue_market_data::config::ConfigSource;
use fairvalue_market_data::provider::bundled_providers;
use fairvalue_market_data::{
    DataOrchestrator, DataType, FetchOptions, FileConfigSource, FileSecretStore,
};

#[derive(Parser)]
#[command(name = "fairvalue")]
#[command(about = "Resilient stock market data fetching", long_about = None)]
#[command(version)]
struct Cli {
    /// Fetch configuration (TOML). Missing file means defaults.
    #[arg(long, env = "FAIRVALUE_CONFIG", default_value = "fairvalue.toml")]
    config: PathBuf,

    /// Secrets file (JSON map). Keys it lacks are read from the environment.
    #[arg(long, env = "FAIRVALUE_SECRETS", default_value = "data_private/secrets.json")]
    secrets: PathBuf,

    /// Print JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch one key (e.g. `price AAPL`, `price_history KO@5Y`)
    Fetch {
        #[arg(value_parser = parse_data_type)]
        data_type: DataType,

        key: String,

        /// Ignore cached results
        #[arg(long)]
        skip_cache: bool,
    },

    /// Fetch many keys of one data type, batching where providers allow
    FetchMany {
        #[arg(value_parser = parse_data_type)]
        data_type: DataType,

        #[arg(required = true)]
        keys: Vec<String>,
    },

    /// Provider availability, circuit breakers and call statistics
    Status,

    /// Fetch the given keys, then report what the cache holds
    CacheStats {
        #[arg(value_parser = parse_data_type)]
        data_type: Option<DataType>,

        keys: Vec<String>,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn parse_data_type(s: &str) -> Result<DataType, String> {
    s.parse::<DataType>().map_err(|e| e.to_string())
}

fn init_tracing() {
    let log_format = std::env::var("FAIRVALUE_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so command output stays machine-readable
    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_line_number(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing();

    let source = FileConfigSource::new(&cli.config);
    let config = source
        .load()
        .with_context(|| format!("loading {}", cli.config.display()))?;
    config.validate()?;

    if let Commands::Config = cli.command {
        println!("{}", config.to_toml_string()?);
        return Ok(ExitCode::SUCCESS);
    }

    tracing::debug!("Reading secrets from {}", cli.secrets.display());
    let secrets = FileSecretStore::new(&cli.secrets);
    let providers = bundled_providers(&secrets).context("building providers")?;
    let orchestrator = DataOrchestrator::new(providers, config);
    tracing::info!("Loaded configuration from {}", source.path().display());

    let ok = match cli.command {
        Commands::Fetch {
            data_type,
            key,
            skip_cache,
        } => {
            let result = orchestrator
                .fetch_with_options(data_type, &key, FetchOptions { skip_cache })
                .await;
            output::print_results(&[(key.trim().to_uppercase(), result.clone())], cli.json)?;
            result.is_success()
        }
        Commands::FetchMany { data_type, keys } => {
            let results = orchestrator.fetch_many(data_type, &keys).await;
            let mut rows: Vec<_> = results.into_iter().collect();
            rows.sort_by(|a, b| a.0.cmp(&b.0));
            output::print_results(&rows, cli.json)?;
            rows.iter().all(|(_, r)| r.is_success())
        }
        Commands::Status => {
            output::print_status(&orchestrator.provider_status(), cli.json)?;
            true
        }
        Commands::CacheStats { data_type, keys } => {
            if let Some(data_type) = data_type {
                orchestrator.fetch_many(data_type, &keys).await;
            }
            output::print_cache_stats(&orchestrator.cache_stats(), cli.json)?;
            true
        }
        Commands::Config => true,
    };

    Ok(if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
