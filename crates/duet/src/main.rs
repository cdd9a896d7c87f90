//! Duet daemon - chat completion proxy with a companion model

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::{
    EnvFilter, Registry, layer::SubscriberExt, reload, util::SubscriberInitExt,
};

use duet::config::{Config, LoggingConfig};
use duet::error::DuetError;
use duet::error::Result;
use duet::proxy::ProxyServer;

/// Duet - OpenAI-compatible proxy that appends a companion model's answer
#[derive(Parser)]
#[command(name = "duet")]
#[command(about = "An OpenAI-compatible proxy that appends a companion model's answer")]
#[command(version)]
pub struct Cli {
    /// Path to config file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Port to listen on, overriding the config file and PROXY_PORT
    #[arg(long, short = 'p', global = true)]
    pub port: Option<u16>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the proxy server (default command)
    #[command(name = "serve")]
    Serve,
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    let logging = init_logging();

    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => serve(cli.config, cli.port, logging).await,
    }
}

type LogHandle = reload::Handle<EnvFilter, Registry>;

fn level_filter(logging: &LoggingConfig) -> EnvFilter {
    EnvFilter::new(format!("{level},duet={level}", level = logging.level))
}

/// Install the subscriber before config loading so discovery logs are kept
fn init_logging() -> LogHandle {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| level_filter(&LoggingConfig::default()));
    let (filter, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    handle
}

/// Switch to the configured level unless RUST_LOG is set
fn apply_log_level(handle: &LogHandle, logging: &LoggingConfig) -> Result<()> {
    if std::env::var_os(EnvFilter::DEFAULT_ENV).is_some() {
        return Ok(());
    }
    handle
        .reload(level_filter(logging))
        .map_err(|e| DuetError::Config(format!("Failed to apply log level: {e}")))
}

fn load_config(config_path: Option<PathBuf>, port: Option<u16>) -> Result<Config> {
    let mut config = Config::discover(config_path.as_deref())?;
    config.apply_env()?;

    if let Some(port) = port {
        config.apply_overrides(|key| (key == "PROXY_PORT").then(|| port.to_string()))?;
    }

    config.resolve_prompt_file()?;
    config.validate()?;
    Ok(config)
}

async fn serve(config_path: Option<PathBuf>, port: Option<u16>, logging: LogHandle) -> Result<()> {
    let config = load_config(config_path, port)?;
    apply_log_level(&logging, &config.logging)?;

    tracing::info!("Starting Duet daemon");
    tracing::debug!("Config loaded: {:?}", config);

    let proxy = ProxyServer::new(config);
    proxy.serve().await?;

    tracing::info!("Duet daemon stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configured_level_replaces_bootstrap_filter() {
        let (filter, handle) = reload::Layer::new(level_filter(&LoggingConfig::default()));
        let subscriber = tracing_subscriber::registry().with(filter);
        let logging = LoggingConfig {
            level: "debug".to_string(),
        };

        let current = tracing::subscriber::with_default(subscriber, || {
            apply_log_level(&handle, &logging).unwrap();
            handle.with_current(|filter| filter.to_string()).unwrap()
        });

        if std::env::var_os(EnvFilter::DEFAULT_ENV).is_none() {
            assert!(current.contains("duet=debug"), "{current}");
        } else {
            assert!(current.contains("duet=info"), "{current}");
        }
    }
}
