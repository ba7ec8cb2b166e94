//! Siphon
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Watches instrument export files and delivers every new row to one or more HTTP
//! collectors, surviving network outages and restarts.
//!
//! # Overview
//!
//! - **Sources** (`csv_files`): glob patterns plus decode options
//! - **Consumers** (`consumers`): BMON reading stores or generic JSON collectors, each with
//!   its own on-disk queue and worker pool
//! - **Progress**: `<config>.last_ts` remembers the newest timestamp handed off per file
//!
//! See [`config`] for the configuration file layout.

pub mod app;
pub mod config;
pub mod error;
pub mod orchestrator;
pub mod shutdown;

pub use app::App;
pub use config::AppConfig;
pub use error::{AppError, Result};
pub use orchestrator::{CycleReport, Orchestrator};

use clap::Parser;
use std::path::PathBuf;

/// Siphon - durable delivery of instrument time-series files to HTTP collectors
#[derive(Parser, Debug)]
#[command(name = "siphon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// YAML configuration file
    #[arg(env = "SIPHON_CONFIG")]
    pub config: PathBuf,

    /// Run a single poll cycle, give the workers time to post, then exit
    #[arg(long)]
    pub once: bool,

    /// Debug-level logging
    #[arg(short, long)]
    pub verbose: bool,
}
