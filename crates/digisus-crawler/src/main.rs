// Copyright 2026 DigiSUS Crawler Contributors
// SPDX-License-Identifier: Apache-2.0

use anyhow::Result;
use clap::{Parser, Subcommand};
use digisus_crawler::cli;
use digisus_crawler::config::{self, CrawlConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "digisus-crawler",
    about = "Download the current planning documents published on the DigiSUS portal",
    version,
    after_help = "Run with no command to crawl the whole portal."
)]
struct Cli {
    /// Portal download page to start from
    #[arg(long, default_value = config::PORTAL_URL)]
    url: String,

    /// Output root (default: $DIGISUS_OUT_DIR, else ./Documentos_Saude_Brasil)
    #[arg(long, global = true)]
    out: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    headful: bool,

    /// JSON file replacing the built-in document catalog
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Output results as JSON (machine-readable)
    #[arg(long, global = true)]
    json: bool,

    /// Suppress per-download lines
    #[arg(long, short, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Check environment and diagnose issues
    Doctor,
}

fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set global flags via environment variables so all modules can check them
    if cli.json {
        std::env::set_var(cli::output::JSON_ENV, "1");
    }
    if cli.quiet {
        std::env::set_var(cli::output::QUIET_ENV, "1");
    }
    init_tracing(&cli.log_level, cli.json);

    let out_dir = config::resolve_out_dir(cli.out.as_deref());

    let result = match cli.command {
        Some(Commands::Doctor) => cli::doctor::run(&out_dir).await,
        None => {
            let config = CrawlConfig {
                url: cli.url,
                out_dir,
                headless: !cli.headful,
                ..CrawlConfig::default()
            };
            cli::crawl_cmd::run(config, cli.catalog.as_deref()).await
        }
    };

    // Consistent exit codes: 0=success, 1=error
    if let Err(e) = &result {
        if !cli::output::is_json() {
            eprintln!("  Error: {e:#}");
        }
        std::process::exit(1);
    }

    Ok(())
}
