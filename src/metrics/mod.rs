//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Submissions and submission retries
//! - Terminal outcomes (confirmed, reverted, timed out)
//! - Fee model fallbacks and fee bumps
//! - Confirmation latency

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_histogram_vec, CounterVec, Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "txflow_transactions_submitted_total",
        "Total transactions accepted by the node",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_SUBMIT_RETRIES: CounterVec = register_counter_vec!(
        "txflow_submit_retries_total",
        "Total blind resubmissions after a failed broadcast",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "txflow_transactions_confirmed_total",
        "Total transactions mined with success status",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_REVERTED: CounterVec = register_counter_vec!(
        "txflow_transactions_reverted_total",
        "Total transactions mined with failed status",
        &["chain_id"]
    ).unwrap();

    pub static ref TX_TIMED_OUT: CounterVec = register_counter_vec!(
        "txflow_transactions_timed_out_total",
        "Total confirmation waits that hit the deadline",
        &["chain_id"]
    ).unwrap();

    pub static ref FEE_MODEL_FALLBACKS: CounterVec = register_counter_vec!(
        "txflow_fee_model_fallbacks_total",
        "Total builds that fell back from EIP-1559 to legacy",
        &["chain_id"]
    ).unwrap();

    pub static ref FEE_BUMPS: CounterVec = register_counter_vec!(
        "txflow_fee_bumps_total",
        "Total same-nonce replacements at a higher price",
        &["chain_id"]
    ).unwrap();

    pub static ref CONFIRMATION_LATENCY: HistogramVec = register_histogram_vec!(
        "txflow_confirmation_latency_seconds",
        "Time from first poll to terminal receipt",
        &["chain_id"],
        vec![0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    ).unwrap();
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// Helper functions to record metrics

pub fn record_tx_submitted(chain_id: u64) {
    TX_SUBMITTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_submit_retry(chain_id: u64) {
    TX_SUBMIT_RETRIES
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_confirmed(chain_id: u64) {
    TX_CONFIRMED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_reverted(chain_id: u64) {
    TX_REVERTED
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_tx_timed_out(chain_id: u64) {
    TX_TIMED_OUT
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_fee_model_fallback(chain_id: u64) {
    FEE_MODEL_FALLBACKS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_fee_bump(chain_id: u64) {
    FEE_BUMPS
        .with_label_values(&[&chain_id.to_string()])
        .inc();
}

pub fn record_confirmation_latency(chain_id: u64, latency_secs: f64) {
    CONFIRMATION_LATENCY
        .with_label_values(&[&chain_id.to_string()])
        .observe(latency_secs);
}
