//! sessionkeeper - keeps rotating-cookie sessions alive.
//!
//! By default this runs the rotation loop until interrupted. A few operator
//! subcommands manipulate the session store directly; run with `help` for
//! the list.

mod commands;

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use sessionkeeper_core::{Config, KeeperContext};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use commands::Command;

// ============================================================================
// Constants
// ============================================================================

/// Log file name prefix inside the configured log directory
const LOG_FILE_PREFIX: &str = "sessionkeeper.log";

/// Initialize the tracing subscriber for logging.
///
/// Logs always go to stderr; with a log directory they are also written to a
/// daily rolling file. The returned guard must live until shutdown so the
/// file writer flushes.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_writer(writer).with_ansi(false)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(io::stderr))
        .with(file_layer)
        .with(filter)
        .init();

    guard
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = commands::parse_args(&args)?;
    if matches!(command, Command::Help) {
        println!("{}", commands::USAGE);
        return Ok(());
    }

    let config = Config::load().context("Failed to load configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());
    info!("sessionkeeper starting");

    let ctx = KeeperContext::open(&config).await?;
    let result = commands::execute(command, &ctx, &config).await;
    ctx.close().await;

    info!("sessionkeeper shutting down");
    result
}
