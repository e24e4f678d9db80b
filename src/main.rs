//! OCPP DLM central system
//!
//! OCPP 1.6-J server with dynamic load management for charger groups that
//! share a supply. Reads configuration from a TOML file
//! (`~/.config/ocpp-dlm/config.toml` unless `--config` is given).

use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use ocpp_dlm::config::LoggingConfig;
use ocpp_dlm::server::ServerHandle;
use ocpp_dlm::{default_config_path, AppConfig};

#[derive(Debug, Parser)]
#[command(name = "ocpp-dlm", version, about)]
struct Cli {
    /// Configuration file
    #[arg(short, long, env = "OCPP_DLM_CONFIG")]
    config: Option<PathBuf>,
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if logging.format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);

    let (config, load_error) = if config_path.exists() {
        match AppConfig::load(&config_path) {
            Ok(cfg) => (cfg, None),
            Err(e) => (AppConfig::default(), Some(e)),
        }
    } else {
        (AppConfig::default(), None)
    };
    init_tracing(&config.logging);

    match load_error {
        Some(e) => error!("Failed to load config: {}. Using defaults.", e),
        None if config_path.exists() => info!("Configuration loaded from {}", config_path.display()),
        None => info!("No configuration at {}, using defaults", config_path.display()),
    }

    let server = ServerHandle::start(config).await?;
    server.install_signal_handler();
    server.run_until_shutdown().await;
    Ok(())
}
