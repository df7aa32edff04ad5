//! OCPP mock CSMS binary
//!
//! Command-line interface for running the mock Central System

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use ocpp_mock_csms::{config, utils, Csms};
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "ocpp-mock-csms", version, about = "Mock OCPP 1.6J Central System")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the WebSocket and admin HTTP servers
    Start {
        /// Configuration file path; environment defaults are used when omitted
        #[arg(short, long, value_name = "FILE")]
        config: Option<String>,
        /// Bind address for both listeners
        #[arg(short, long, value_name = "ADDRESS")]
        bind: Option<String>,
        /// Charge point WebSocket port
        #[arg(long, value_name = "PORT")]
        ws_port: Option<u16>,
        /// Admin HTTP API port
        #[arg(long, value_name = "PORT")]
        http_port: Option<u16>,
        /// Log level (trace, debug, info, warn, error)
        #[arg(short, long, value_name = "LEVEL")]
        log_level: Option<String>,
    },
    /// Load and validate a configuration file
    CheckConfig {
        #[arg(short, long, value_name = "FILE")]
        config: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start {
            config: config_path,
            bind,
            ws_port,
            http_port,
            log_level,
        } => {
            let mut config = match config_path.as_deref() {
                Some(path) => config::load_from_file(path)
                    .map_err(|e| anyhow::anyhow!(e))
                    .with_context(|| format!("Failed to load configuration from {}", path))?,
                None => config::load_from_env(),
            };
            if let Some(bind) = bind {
                config.server.bind_address = bind;
            }
            if let Some(port) = ws_port {
                config.server.websocket_port = port;
            }
            if let Some(port) = http_port {
                config.server.http_port = port;
            }
            if let Some(level) = log_level {
                config.logging.level = level;
            }

            utils::init_tracing(&config.logging)?;
            info!(
                "Starting OCPP mock CSMS (ws {}, http {})",
                config.server.websocket_addr(),
                config.server.http_addr()
            );

            let csms = Csms::new(config)?;
            tokio::select! {
                result = csms.run() => {
                    if let Err(e) = result {
                        error!("CSMS server error: {}", e);
                        return Err(e.into());
                    }
                }
                signal = tokio::signal::ctrl_c() => {
                    signal.context("Unable to listen for shutdown signal")?;
                    info!("Received shutdown signal, stopping CSMS...");
                }
            }

            info!("CSMS shutdown complete");
            Ok(())
        }
        Commands::CheckConfig { config: path } => {
            let loaded = config::load_from_file(&path)
                .map_err(|e| anyhow::anyhow!(e))
                .with_context(|| format!("Failed to load configuration from {}", path))?;
            if let Err(message) = config::validate_config(&loaded) {
                bail!("Invalid configuration in {}: {}", path, message);
            }
            println!("Configuration {} is valid", path);
            Ok(())
        }
    }
}
