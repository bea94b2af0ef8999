//! sonar-relay: forwards chat completion traffic to the upstream search API.
//!
//! Usage:
//!   sonar-relay [--bind <addr>] [--base-url <url>] [--log-format json]
//!
//! Every flag has an environment fallback; `RUST_LOG` controls verbosity.

use anyhow::Context;
use clap::Parser;
use sonar_relay::cancel::CancellationToken;
use sonar_relay::config::ClientConfig;
use sonar_relay::relay::server::DEFAULT_BIND_ADDR;
use sonar_relay::relay::{RelayConfig, RelayServer};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "sonar-relay", version, about = "Streaming relay for search-augmented chat completions")]
struct CliArgs {
    /// Address to listen on
    #[arg(long, env = "SONAR_RELAY_BIND", default_value = DEFAULT_BIND_ADDR)]
    bind: SocketAddr,

    /// Upstream API base URL
    #[arg(long, env = "SONAR_BASE_URL")]
    base_url: Option<String>,

    /// Fallback API key used when a caller sends no credential
    #[arg(long, env = "SONAR_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Upstream request timeout in seconds
    #[arg(long, env = "SONAR_HTTP_TIMEOUT_SECS")]
    timeout_secs: Option<u64>,

    /// Outbound proxy URL
    #[arg(long, env = "SONAR_PROXY_URL")]
    proxy: Option<String>,

    /// Log output format: `text` or `json`
    #[arg(long, env = "SONAR_LOG_FORMAT", default_value = "text")]
    log_format: String,
}

impl CliArgs {
    fn relay_config(&self) -> anyhow::Result<RelayConfig> {
        let mut client = ClientConfig::default();
        if let Some(url) = &self.base_url {
            client.base_url = url.clone();
        }
        client.api_key = self.api_key.clone().filter(|k| !k.trim().is_empty());
        if let Some(secs) = self.timeout_secs.filter(|s| *s > 0) {
            client.timeout = Duration::from_secs(secs);
        }
        client.proxy_url = self.proxy.clone();
        client.validate().context("invalid upstream configuration")?;
        Ok(RelayConfig {
            bind_addr: self.bind,
            client,
        })
    }
}

fn init_tracing(format: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);
    if format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = CliArgs::parse();
    init_tracing(&args.log_format);

    let config = args.relay_config()?;
    let shutdown = CancellationToken::new();
    let trigger = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
        }
        trigger.cancel();
    });

    RelayServer::new(config)
        .serve(shutdown)
        .await
        .context("relay server failed")?;
    Ok(())
}
