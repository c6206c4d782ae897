use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use bridgesrv::config::{load_config, BridgeConfig, LogConfig};
use bridgesrv::engine::Engine;
use bridgesrv::mqtt::MqttLink;
use bridgesrv::transport;

/// Wait between reconnect attempts after a failed session
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[clap(author, version, about = "EzVille RS485 wallpad to MQTT bridge", long_about = None)]
struct Args {
    /// Path to the configuration file
    #[clap(short, long, value_parser, default_value = "config/bridge.yml")]
    config: PathBuf,

    /// Check the configuration and exit
    #[clap(long)]
    validate: bool,
}

fn init_logging(config: &LogConfig) -> Option<WorkerGuard> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, &config.file_prefix);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

/// One MQTT+transport session; ends on transport or client failure.
async fn run_session(config: &BridgeConfig) -> bridgesrv::Result<()> {
    let (link, control) = MqttLink::connect(&config.mqtt).await?;
    let bus = transport::connect(&config.transport).await?;
    let mut engine = Engine::new(config, bus, link, control);
    engine.run().await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = load_config(&args.config)
        .with_context(|| format!("loading configuration from {}", args.config.display()))?;

    if args.validate {
        println!("Configuration OK: {}", args.config.display());
        return Ok(());
    }

    let _log_guard = init_logging(&config.log);
    info!("Starting bridgesrv v{}", env!("CARGO_PKG_VERSION"));

    loop {
        tokio::select! {
            result = run_session(&config) => match result {
                Ok(()) => break,
                Err(e) => {
                    error!("Bridge session failed: {}; reconnecting in {:?}", e, RECONNECT_DELAY);
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown requested");
                break;
            }
        }
    }
    Ok(())
}
