//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Attempts broadcast and rejected
//! - Escalations and reorgs
//! - Confirmed progress and iteration latency

use crate::error::{PacerError, PacerResult};

use axum::{routing::get, Router};
use ethers::types::U256;
use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, register_int_counter, CounterVec,
    Encoder, Gauge, Histogram, IntCounter, TextEncoder,
};
use std::net::SocketAddr;
use tracing::info;

lazy_static! {
    pub static ref ATTEMPTS_SENT: IntCounter = register_int_counter!(
        "tx_pacer_attempts_sent_total",
        "Total transactions accepted by the node, escalations included"
    ).unwrap();

    pub static ref REJECTIONS: CounterVec = register_counter_vec!(
        "tx_pacer_rejections_total",
        "Broadcasts refused by the node by reason",
        &["reason"]
    ).unwrap();

    pub static ref ESCALATIONS: IntCounter = register_int_counter!(
        "tx_pacer_escalations_total",
        "Total fee escalations that produced a new attempt"
    ).unwrap();

    pub static ref REORGS: IntCounter = register_int_counter!(
        "tx_pacer_reorgs_total",
        "Mined blocks that left the canonical chain before confirmation"
    ).unwrap();

    pub static ref CONFIRMED: IntCounter = register_int_counter!(
        "tx_pacer_confirmed_total",
        "Transactions that reached confirmation depth"
    ).unwrap();

    pub static ref GAS_PRICE: Gauge = register_gauge!(
        "tx_pacer_gas_price_wei",
        "Price of the latest confirmed transaction"
    ).unwrap();

    pub static ref ITERATION_LATENCY: Histogram = register_histogram!(
        "tx_pacer_iteration_seconds",
        "Time from first broadcast to confirmation",
        vec![5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();
}

/// Prometheus metrics server
pub struct MetricsServer {
    port: u16,
}

impl MetricsServer {
    pub fn new(port: u16) -> Self {
        Self { port }
    }

    pub async fn run(&self) -> PacerResult<()> {
        let app = Router::new().route("/metrics", get(metrics_handler));

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        info!("Starting metrics server on {}", addr);

        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| PacerError::Config(format!("Cannot bind metrics port: {}", e)))?;
        axum::serve(listener, app)
            .await
            .map_err(|e| PacerError::Internal(format!("Metrics server failed: {}", e)))?;

        Ok(())
    }
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_attempt_sent() {
    ATTEMPTS_SENT.inc();
}

pub fn record_rejection(reason: &str) {
    REJECTIONS.with_label_values(&[reason]).inc();
}

pub fn record_escalation() {
    ESCALATIONS.inc();
}

pub fn record_reorg() {
    REORGS.inc();
}

pub fn record_confirmed(gas_price: U256, latency_secs: f64) {
    CONFIRMED.inc();
    GAS_PRICE.set(price_as_f64(gas_price));
    ITERATION_LATENCY.observe(latency_secs);
}

/// Gauge value for a price; saturates above 128 bits
fn price_as_f64(price: U256) -> f64 {
    if price.bits() > 128 {
        f64::MAX
    } else {
        price.low_u128() as f64
    }
}
