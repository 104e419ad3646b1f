use anyhow::Context;
use dustwatch::config::Config;
use dustwatch::service::{MonitorService, ServiceError};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const DEFAULT_CONFIG_PATH: &str = "dustwatch.toml";

const EXIT_FATAL: u8 = 1;
const EXIT_CONFIG: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    // Both ring and aws-lc-rs can end up in the tree; pick one before any TLS use.
    let _ = rustls::crypto::ring::default_provider().install_default();

    // Load .env if present
    let _ = dotenvy::dotenv();

    let (config, source) = match load_config() {
        Ok(loaded) => loaded,
        Err(e) => {
            eprintln!("configuration error: {e:#}");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    init_logging(&config);
    info!("dustwatch v{} starting", env!("CARGO_PKG_VERSION"));
    info!(config = %source, rpc = %config.chain.rpc_url, trap = %config.chain.trap_address, "configuration loaded");

    let service = match MonitorService::from_config(&config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to start monitor");
            return ExitCode::from(EXIT_CONFIG);
        }
    };

    let shutdown = CancellationToken::new();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("interrupt received, shutting down");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "failed to listen for ctrl-c"),
            }
        }
    });

    match service.run(shutdown).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(ServiceError::Fatal(e)) => {
            error!(error = %e, "monitor exited");
            ExitCode::from(EXIT_FATAL)
        }
        Err(e) => {
            error!(error = %e, "monitor exited");
            ExitCode::from(EXIT_CONFIG)
        }
    }
}

/// Config file from `DUSTWATCH_CONFIG` or `dustwatch.toml`, else env only.
/// Returns the config and a description of where it came from.
fn load_config() -> anyhow::Result<(Config, String)> {
    let explicit = std::env::var("DUSTWATCH_CONFIG").ok().map(PathBuf::from);
    let path = explicit
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));

    let (config, source) = if path.exists() {
        let config = Config::load(&path)
            .with_context(|| format!("failed to load {}", path.display()))?;
        (config, path.display().to_string())
    } else if explicit.is_some() {
        anyhow::bail!("config file {} does not exist", path.display());
    } else {
        (Config::from_env()?, "environment".to_string())
    };

    config.validate()?;
    Ok((config, source))
}

/// Logs go to stderr; stdout carries the console alert lines.
fn init_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    }
}
