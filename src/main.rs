use anyhow::Context;
use clap::Parser;
use realtime_fabric::{
    arguments::{get_enabled_debug_modes, is_any_debug_enabled},
    config::load_config,
    db::redact_url,
    logger::{self, LogTag},
    runtime,
};
use std::path::PathBuf;

/// Realtime fabric server
///
/// `--debug-<module>` and `--verbose` flags are read by the logger and may
/// appear anywhere on the command line.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None, ignore_errors = true)]
struct Args {
    /// Bind host (overrides SERVER_HOST)
    #[arg(long)]
    host: Option<String>,

    /// Bind port (overrides SERVER_PORT)
    #[arg(long)]
    port: Option<u16>,

    /// Extra environment file loaded before .env
    #[arg(long)]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    logger::init();

    if let Some(path) = &args.env_file {
        dotenv::from_path(path)
            .with_context(|| format!("cannot read environment file {}", path.display()))?;
    }

    let mut config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            logger::error(LogTag::Config, &format!("Refusing to start: {}", e));
            logger::flush();
            return Err(e).context("invalid configuration");
        }
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    logger::info(
        LogTag::System,
        &format!(
            "Realtime fabric {} starting on {}",
            env!("CARGO_PKG_VERSION"),
            config.server.bind_address()
        ),
    );
    if config.db.is_enabled() {
        logger::info(
            LogTag::Database,
            &format!("Database: {}", redact_url(&config.db.url)),
        );
    }
    if is_any_debug_enabled() {
        logger::info(
            LogTag::System,
            &format!("Debug modes: {}", get_enabled_debug_modes().join(", ")),
        );
    }

    let outcome = runtime::run(config).await;
    if let Err(e) = &outcome {
        let kind = if e.is_fatal_at_boot() { "Refusing to start" } else { "Stopped" };
        logger::error(LogTag::System, &format!("{}: {}", kind, e));
    }
    logger::flush();
    outcome.context("fabric server failed")
}
