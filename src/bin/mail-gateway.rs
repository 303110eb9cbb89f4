#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::missing_errors_doc, clippy::missing_panics_doc)]

//! POP3/SMTP gateway daemon

use clap::Parser;
use mail_gateway::{GatewayConfig, GatewayContext, GatewayServer, LocalProtocol, MailService};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mail-gateway")]
#[command(about = "Plaintext POP3/SMTP front end for TLS-only mail providers")]
struct Args {
    /// Configuration file (defaults to $MAIL_GATEWAY_CONFIG, then config.yaml)
    #[arg(long, short)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    mail_gateway::tls::install_crypto_provider();

    let args = Args::parse();
    let config = GatewayConfig::load(args.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let ctx = GatewayContext::from_config(&config);
    let mut servers = Vec::new();
    if let Some(pop3) = &config.local.pop3 {
        servers.push(GatewayServer::new(LocalProtocol::Pop3, pop3.addr(), ctx.clone()));
    }
    if let Some(smtp) = &config.local.smtp {
        servers.push(GatewayServer::new(LocalProtocol::Smtp, smtp.addr(), ctx.clone()));
    }

    for server in &mut servers {
        server.start().await?;
    }
    info!(
        "mail-gateway running with {} profile(s)",
        config.servers.len()
    );

    shutdown_signal().await?;
    info!("Shutting down");

    futures::future::try_join_all(servers.iter_mut().map(|server| server.stop())).await?;
    Ok(())
}

#[cfg(unix)]
async fn shutdown_signal() -> anyhow::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = signal(SignalKind::terminate())?;
    tokio::select! {
        res = tokio::signal::ctrl_c() => res?,
        _ = term.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
async fn shutdown_signal() -> anyhow::Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}
