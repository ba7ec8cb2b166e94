//! Siphon - Main entry point

use clap::Parser;
use siphon::{shutdown, App, AppConfig, Cli};
use siphon_common::logging::{init_logging, LogConfig, LogLevel, LogOutput};
use std::process;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // A .env next to the working directory may carry LOG_* overrides
    let _ = dotenvy::dotenv();

    // Without a readable config there is nothing to do
    let config = match AppConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            process::exit(1);
        },
    };

    let level = if cli.verbose {
        LogLevel::Debug
    } else {
        LogLevel::parse_lenient(&config.logging_level)
    };
    let log_config = LogConfig::builder()
        .level(level)
        .output(LogOutput::Console)
        .log_file_prefix("siphon")
        .filter_directives("hyper=warn,reqwest=warn")
        .build();

    // Environment variables take precedence
    let log_config = match log_config.clone().with_env_overrides() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Ignoring invalid LOG_* environment: {:#}", e);
            log_config
        },
    };

    let _log_guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Logging disabled: {:#}", e);
            None
        },
    };

    info!(
        config = %cli.config.display(),
        version = env!("CARGO_PKG_VERSION"),
        "Starting siphon"
    );

    let cancel = CancellationToken::new();
    shutdown::cancel_on_signal(cancel.clone());

    let app = App::build(&config, cli.once, &cancel);
    if let Err(e) = app.run(&cancel).await {
        error!(error = %e, "Siphon stopped with an error");
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}
