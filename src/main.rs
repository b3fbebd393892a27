mod cli;
mod error;
mod log_view;
mod mapping;
mod metrics;
mod model;
mod orchestrator;
mod service;
mod session;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Mutex;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default log file for TUI mode, where stderr belongs to the terminal UI.
fn default_log_file() -> Option<PathBuf> {
    dirs::cache_dir().map(|d| d.join("batch-geocode").join("batch-geocode.log"))
}

fn init_tracing(args: &cli::Cli) -> Result<()> {
    let log_file = args
        .log_file
        .clone()
        .or_else(|| args.is_tui().then(default_log_file).flatten());

    // Progress already goes to stderr in headless mode; keep logs to warnings there.
    let default_directives = if log_file.is_some() {
        "batch_geocode=info,warn"
    } else {
        "warn"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| default_directives.into());

    match log_file {
        Some(path) => {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("create log directory {}", parent.display()))?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("open log file {}", path.display()))?;
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_ansi(false)
                        .with_writer(Mutex::new(file)),
                )
                .init();
        }
        None if args.is_tui() => {
            // No cache dir: stay quiet rather than draw over the UI.
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let is_silent = args.silent;
    let is_non_tui = !args.is_tui();

    if !is_silent {
        init_tracing(&args)?;
    }

    match cli::run(args).await {
        Ok(()) => {
            // Explicitly exit with code 0 on success, especially for non-TUI modes
            if is_non_tui {
                std::process::exit(0);
            }
            Ok(())
        }
        Err(e) => {
            if is_silent {
                println!("{:#}", e);
                std::process::exit(1);
            } else {
                Err(e)
            }
        }
    }
}
