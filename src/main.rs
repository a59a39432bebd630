//! weathercache - look up current weather through a TTL cache
//!
//! Builds the shared cache backend and provider client once, then runs every
//! requested lookup concurrently through a single `WeatherService`.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use futures::future::join_all;
use tracing::error;

use weathercache::cli::Cli;
use weathercache::config::{ConfigError, ServiceConfig};
use weathercache::{telemetry, LookupError, RecordCache, WeatherRecord, WeatherService};

/// Exit status when any lookup hit a service-side failure
const EXIT_SERVICE_ERROR: u8 = 1;

/// Exit status when every failure was the caller's input
const EXIT_CALLER_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is normal
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    if let Err(err) = telemetry::init(cli.log_format) {
        eprintln!("warning: logging disabled: {err}");
    }

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!(error = %err, "startup failed");
            eprintln!("error: {err}");
            ExitCode::from(EXIT_SERVICE_ERROR)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, ConfigError> {
    let config = ServiceConfig::from_cli(&cli)?;
    let store = config.open_store().await?;
    let source = config.upstream_client()?;
    let service = WeatherService::new(
        RecordCache::new(store),
        Arc::new(source),
        config.lookup_policy(),
    );

    let mut worst: Option<u8> = None;
    for _ in 0..cli.repeat {
        let results = join_all(cli.locations.iter().map(|query| service.lookup(query))).await;

        for (query, result) in cli.locations.iter().zip(results) {
            match result {
                Ok(record) => print_record(&record, cli.json),
                Err(err) => {
                    report_failure(&query.to_string(), &err);
                    let code = if err.is_caller_error() {
                        EXIT_CALLER_ERROR
                    } else {
                        EXIT_SERVICE_ERROR
                    };
                    // Service failures outrank caller errors
                    worst = Some(worst.map_or(code, |w| w.min(code)));
                }
            }
        }
    }

    Ok(worst.map_or(ExitCode::SUCCESS, ExitCode::from))
}

fn print_record(record: &WeatherRecord, json: bool) {
    if !json {
        println!("{record}\n");
        return;
    }
    match serde_json::to_string(record) {
        Ok(line) => println!("{line}"),
        Err(err) => eprintln!("error: could not encode record for {}: {err}", record.name),
    }
}

fn report_failure(query: &str, err: &LookupError) {
    match err {
        LookupError::Validation(_) => eprintln!("{query}: {err}"),
        LookupError::NotFound(_) => {
            eprintln!("{query}: could not find that location; check the city and country")
        }
        LookupError::Unavailable(_) => {
            eprintln!("{query}: {err}; try again shortly")
        }
    }
}
