//! Pickup console - command line front-end for the school pickup system.
//!
//! Browses the directory held by the pickup API, records entry/exit scans
//! and reports presence statistics derived from the scan log.

mod args;
mod commands;
mod output;

use std::io;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use pickup_core::{ApiClient, Config, Console, PickupApi};

use args::{Cli, Command};

/// Log file prefix inside the configured log directory
const LOG_FILE_PREFIX: &str = "pickup.log";

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr, filtered by RUST_LOG (default "warn"). When the config
/// names a log directory, a daily-rolling file gets the same events; the
/// returned guard must live until exit so buffered lines are flushed.
fn init_tracing(config: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
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

    let cli = Cli::parse();
    let config = Config::load().context("Failed to load configuration")?;
    let _log_guard = init_tracing(&config);

    if let Command::Config { set_url, set_agent, set_page_size } = cli.command {
        return commands::config(config, set_url, set_agent, set_page_size, cli.json);
    }

    let base_url = cli.api_url.clone().unwrap_or_else(|| config.api_base_url());
    info!(base_url = %base_url, page_size = config.page_size(), "Pickup console starting");

    let mut client = ApiClient::new(&base_url)
        .context("Failed to create API client")?
        .with_page_size(config.page_size());
    if let Some(token) = config.api_token() {
        client.set_token(Arc::new(token));
    }
    let api: Arc<dyn PickupApi> = Arc::new(client);
    let mut console = Console::new(api, &config);

    match cli.command {
        Command::List { kind, page, search, status, pin } => {
            commands::list(&mut console, kind, page, &search, status, pin, cli.json).await
        }
        Command::Show { kind, code } => commands::show(&console, kind, &code, cli.json).await,
        Command::Scan { scan_type, child, recuperator, agent } => {
            commands::scan(&mut console, scan_type, &child, recuperator, agent, cli.json).await
        }
        Command::History { child, limit } => commands::history(&console, &child, limit, cli.json).await,
        Command::Stats { page, search, detail } => {
            commands::stats(&mut console, page, &search, detail, cli.json).await
        }
        Command::Assign { recuperator, children } => {
            commands::assign(&mut console, &recuperator, &children).await
        }
        Command::RemoveChild { code } => {
            console.remove_child(&code).await.context("Failed to remove child")?;
            println!("{} removed", code);
            Ok(())
        }
        Command::RestoreChild { code } => {
            console.restore_child(&code).await.context("Failed to restore child")?;
            println!("{} restored", code);
            Ok(())
        }
        Command::Config { .. } => unreachable!("handled before the client is built"),
        Command::Watch { search, interval } => {
            let period = interval
                .filter(|&s| s > 0)
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.refresh_interval());
            commands::watch(&mut console, &search, period).await
        }
    }
}
