//! tx-pacer - paced transaction batch submitter
//!
//! Sends a fixed number of contract calls from one account, one nonce at a
//! time, escalating fees for stalled nonces and steering the base price so
//! the batch finishes close to a target duration.

use anyhow::Result;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

mod chain;
mod config;
mod coordination;
mod error;
mod metrics;
mod report;
mod tx;

use chain::{ChainClient, EthersClient};
use config::Settings;
use coordination::{resolve_base_price, BatchDriver, IterationOrchestrator};
use metrics::MetricsServer;
use report::ProgressLog;

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting tx-pacer v{}", env!("CARGO_PKG_VERSION"));

    let settings = Settings::load()?;
    info!(
        "Batch of {} transactions over {}s with {} confirmations",
        settings.batch.target, settings.batch.target_time_secs, settings.network.confirmations
    );

    let private_key = settings.private_key()?;
    let client = Arc::new(EthersClient::connect(&settings.network, &private_key).await?);

    let head = client.block_number().await?;
    info!("Connected to chain {} at block {}", client.chain_id(), head);

    let address = client.address();
    let balance = client.balance(address).await?;
    info!("Wallet {:?} balance {} wei", address, balance);
    if balance.is_zero() {
        warn!("Wallet {:?} has no funds, broadcasts will be rejected", address);
    }

    let base_price = resolve_base_price(client.as_ref(), &settings.batch).await?;
    info!("Base gas price {} wei", base_price);

    let metrics_handle = if settings.metrics.enabled {
        let server = MetricsServer::new(settings.metrics.port);
        info!("Metrics: http://0.0.0.0:{}/metrics", settings.metrics.port);
        Some(tokio::spawn(async move {
            if let Err(e) = server.run().await {
                error!("Metrics server error: {}", e);
            }
        }))
    } else {
        None
    };

    let log = ProgressLog::stdout(settings.batch.target);
    let orchestrator = IterationOrchestrator::new(client.clone(), &settings, log)?;
    let mut driver = BatchDriver::new(orchestrator, settings.batch.target, base_price);

    let outcome = tokio::select! {
        result = driver.run() => Some(result),
        _ = shutdown_signal() => None,
    };

    if let Some(h) = metrics_handle {
        h.abort();
    }

    match outcome {
        Some(Ok(summary)) => {
            info!(
                "Confirmed {} transactions in {:.1}s, last price {} wei",
                summary.confirmed,
                summary.elapsed.as_secs_f64(),
                summary.last_price
            );
            Ok(())
        }
        Some(Err(e)) => {
            if e.is_chain_side() {
                error!("Batch aborted by the node: {}", e);
            } else {
                error!("Batch aborted: {}", e);
            }
            Err(e.into())
        }
        None => {
            info!("Shutdown signal received, batch interrupted");
            Ok(())
        }
    }
}

fn init_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tx_pacer=debug,hyper=warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
