//! Bastion Proxy - SOCKS5 proxy that routes through SSH bastions
//!
//! Each SOCKS5 request names its bastion through the proxy credentials
//! (username = host, password = SSH port). Tunnels to bastions are pooled
//! and opened lazily.

mod cli;
mod dialer;
mod settings;
mod status;

use anyhow::{Context, Result};
use bastion_relay::RelayService;
use bastion_socks::SocksServer;
use bastion_ssh::{SshAuthConfig, SshConnector};
use clap::Parser;
use cli::Cli;
use dialer::RelayDialer;
use settings::ProxySettings;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Setup logging with the specified filter directive
fn setup_logging(filter: &str) -> Result<()> {
    let filter =
        EnvFilter::try_new(filter).with_context(|| format!("Invalid log level: {}", filter))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(false))
        .with(filter)
        .init();

    Ok(())
}

/// Build the SSH connector
///
/// Agent and key file problems surface per relay, when it is registered.
fn build_connector(settings: &ProxySettings) -> SshConnector {
    let mut auth = SshAuthConfig::from_env(&settings.user)
        .with_connect_timeout(settings.connect_timeout)
        .with_host_keys(settings.host_keys.clone());

    if let Some(key_file) = &settings.key_file {
        info!("Private key file: {}", key_file.display());
        auth = auth.with_private_key_file(key_file);
    }

    if auth.agent_socket.is_none() {
        warn!("SSH_AUTH_SOCK is not set; relays will fail to register until it is");
    }

    SshConnector::new(auth)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(&cli.log_filter())?;

    info!("Bastion Proxy {} starting...", cli::VERSION);

    let settings = ProxySettings::resolve(&cli).context("Failed to build proxy configuration")?;

    info!("SSH user: {}", settings.user);
    info!(
        "Idle close: {}",
        humantime::format_duration(settings.relay.idle_timeout)
    );
    info!("Max retries: {}", settings.relay.retries);

    let connector = build_connector(&settings);
    let service = Arc::new(RelayService::new(connector, settings.relay));

    let reporter = settings
        .status_interval
        .map(|interval| status::spawn_status_reporter(service.clone(), interval));

    let server = SocksServer::new(
        settings.listen_addr.clone(),
        Arc::new(RelayDialer::new(service)),
    );
    let listener = server.bind().await?;

    // Setup Ctrl+C handler
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let server_task = tokio::spawn(server.serve(listener));

    tokio::select! {
        _ = &mut ctrl_c => {
            info!("Received Ctrl+C, shutting down...");
        }
        result = server_task => {
            match result {
                Ok(Ok(())) => {
                    info!("Proxy stopped normally");
                }
                Ok(Err(e)) => {
                    error!("Proxy error: {}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    error!("Proxy task panicked: {}", e);
                    return Err(e.into());
                }
            }
        }
    }

    if let Some(reporter) = reporter {
        reporter.abort();
    }

    info!("Proxy stopped");
    Ok(())
}
