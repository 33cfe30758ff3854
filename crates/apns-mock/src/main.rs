#![forbid(unsafe_code)]

use anyhow::Result;
use apns_mock::config::{Args, ServerConfig};
use apns_mock::metrics::{start_metrics_server, HealthState};
use apns_mock::policy;
use apns_mock::run_with_shutdown;
use apns_mock::server::ServerState;
use apns_mock::tls::TlsIdentity;
use clap::Parser;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: u8) {
    let filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let directive = match verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::new(directive)
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);
    let config: ServerConfig = args.into();

    // Validate configuration before starting
    if let Err(e) = config.validate() {
        anyhow::bail!("configuration error: {}", e);
    }

    let identity = TlsIdentity::from_config(&config)?;
    let acceptor = identity.acceptor()?;

    let policy = policy::from_flags(config.random_errors, config.random_feedback);
    info!("decision policy: {:?}", policy);

    let state = Arc::new(ServerState::new(config.clone(), acceptor, policy));

    let gateway = TcpListener::bind(config.gateway_addr).await?;
    let feedback = TcpListener::bind(config.feedback_addr).await?;
    info!(
        "bound gateway to {}, feedback to {}",
        config.gateway_addr, config.feedback_addr
    );

    let health_state = HealthState::new();
    if let Some(metrics_addr) = config.metrics_addr {
        tokio::spawn({
            let health_state = health_state.clone();
            async move {
                if let Err(e) = start_metrics_server(metrics_addr, health_state).await {
                    warn!("metrics server error: {}", e);
                }
            }
        });
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let server = run_with_shutdown(gateway, feedback, state, shutdown_rx);
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            if let Err(e) = result {
                tracing::error!("server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("received shutdown signal");
            health_state.set_ready(false);
            let _ = shutdown_tx.send(true);
            server.await?;
        }
    }

    Ok(())
}
