//! log-surge: volumetric anomaly detection for web-server access logs.
//!
//! Reads an access log, buckets accepted requests per second (or a configured
//! width), and flags buckets whose request count exceeds mean + k·σ. The most
//! active sources and the status-code distribution are reported for triage.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐     ┌────────────┐     ┌──────────┐     ┌──────────┐
//! │  Parser  │────>│ Aggregator │────>│ Detector │────>│  Export  │
//! │ (regex)  │  │  │ (buckets)  │     │ (statrs) │  ┌─>│ (report) │
//! └──────────┘  │  └────────────┘     └──────────┘  │  └──────────┘
//!               └─>│   Ranker   │───────────────────┘
//!                  └────────────┘
//! ```
//!
//! - **Parser**: one line at a time into a `LogEvent`, or a rejection
//! - **Aggregator**: sparse per-bucket counts, mergeable across chunks
//! - **Detector**: threshold rule and anomaly window
//! - **Ranker**: top sources and status histogram

mod aggregator;
mod analysis;
mod config;
mod detector;
mod error;
mod export;
mod parser;
mod ranker;

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use crate::analysis::Analyzer;
use crate::config::Config;
use crate::export::{export_result, render_report, OutputFormat};

/// log-surge: detect traffic spikes in access logs.
#[derive(Parser, Debug)]
#[command(name = "log-surge")]
#[command(version = "0.1.0")]
#[command(about = "Detect volumetric anomalies in web-server access logs")]
#[command(long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Analyze an access log file.
    Analyze {
        /// Path to the access log.
        #[arg(short, long)]
        file: PathBuf,

        /// TOML configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Bucket width in seconds.
        #[arg(short, long)]
        bucket_secs: Option<u32>,

        /// Standard deviations above the mean that count as anomalous.
        #[arg(short, long)]
        multiplier: Option<f64>,

        /// Number of top sources to report.
        #[arg(short, long)]
        top: Option<usize>,

        /// Parse and aggregate chunks in parallel.
        #[arg(long)]
        parallel: bool,

        /// Output format: text, json, jsonl.
        #[arg(short, long)]
        output: Option<OutputFormat>,

        /// Write the incident report to this file.
        #[arg(short, long)]
        report: Option<PathBuf>,

        /// Write the report even when no anomaly is found.
        #[arg(long)]
        always_report: bool,

        /// Enable verbose logging (writes to stderr).
        #[arg(short, long)]
        verbose: bool,
    },

    /// Print a default configuration file.
    InitConfig,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            file,
            config,
            bucket_secs,
            multiplier,
            top,
            parallel,
            output,
            report,
            always_report,
            verbose,
        } => {
            init_logging(verbose)?;

            let mut config = Config::load_or_default(config.as_deref());
            if let Some(secs) = bucket_secs {
                config.aggregator.bucket_secs = secs;
            }
            if let Some(k) = multiplier {
                config.detection.threshold_multiplier = k;
            }
            if let Some(n) = top {
                config.ranking.top_sources = n;
            }
            if let Some(format) = output {
                config.output.format = format;
            }
            if let Some(path) = report {
                config.output.report_file = Some(path.display().to_string());
            }
            config.aggregator.parallel |= parallel;
            config.output.always_report |= always_report;

            run_analysis(&file, config)
        }

        Commands::InitConfig => {
            print!("{}", Config::generate_default());
            Ok(())
        }
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { Level::DEBUG } else { Level::INFO };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn run_analysis(file: &Path, config: Config) -> Result<()> {
    let analyzer = Analyzer::new(config.clone())?;

    info!("Parsing log file: {}", file.display());
    let handle = File::open(file)
        .with_context(|| format!("Failed to open log file: {}", file.display()))?;
    let result = analyzer
        .analyze_reader(BufReader::new(handle))
        .with_context(|| format!("Failed to analyze log file: {}", file.display()))?;

    println!("{}", export_result(&result, config.output.format));

    if let Some(path) = &config.output.report_file {
        if result.anomaly.is_some() || config.output.always_report {
            let content = render_report(
                &result,
                &file.display().to_string(),
                Local::now().naive_local(),
            );
            std::fs::write(path, content)
                .with_context(|| format!("Failed to write report: {}", path))?;
            info!("Report saved to: {}", path);
        } else {
            info!("No anomaly detected, report not written");
        }
    }

    Ok(())
}
