use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Context;
use cachedns::config::Config;
use cachedns::proxy::Proxy;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "cachedns")]
#[command(version)]
#[command(about = "Caching DNS forwarder with an on-disk cache snapshot")]
struct Cli {
    /// Configuration file path (TOML)
    #[arg(short = 'c', long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listen address
    #[arg(short = 'l', long)]
    listen: Option<SocketAddr>,

    /// Upstream resolver, `ip` or `ip:port`
    #[arg(short = 'u', long)]
    upstream: Option<String>,

    /// Cache snapshot path
    #[arg(long, value_name = "FILE")]
    cache_file: Option<PathBuf>,

    /// Maximum concurrently handled queries
    #[arg(long)]
    max_in_flight: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn into_config(self) -> anyhow::Result<Config> {
        let mut config = Config::load(self.config.as_deref())?;

        if let Some(listen) = self.listen {
            config.listen = listen;
        }
        if let Some(upstream) = self.upstream {
            config.upstream = upstream;
        }
        if let Some(cache_file) = self.cache_file {
            config.cache_file = cache_file;
        }
        if let Some(max_in_flight) = self.max_in_flight {
            config.max_in_flight = max_in_flight;
        }
        if let Some(log_level) = self.log_level {
            config.log_level = log_level;
        }

        config.validate()?;
        Ok(config)
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Cli::parse().into_config()?;
    init_logging(&config);

    info!("Starting cachedns v{}", env!("CARGO_PKG_VERSION"));

    let proxy = Proxy::start(&config)
        .await
        .context("cannot start listener")?;

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received, shutting down");
                signal_token.cancel();
            }
            Err(e) => error!(error = %e, "cannot listen for interrupt"),
        }
    });

    if let Err(e) = proxy.run(shutdown).await {
        error!(error = %e, "final snapshot failed");
    }

    Ok(())
}
