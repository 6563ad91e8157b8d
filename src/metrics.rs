//! Prometheus metrics for monitoring
//!
//! Exposes metrics for:
//! - Read-call queue depth and volume
//! - Transaction submission and confirmation outcomes
//! - Retry counts
//! - Observed chain state

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge, register_histogram, CounterVec, Gauge, Histogram,
};

lazy_static! {
    // Read-call metrics
    pub static ref CALLS_TOTAL: CounterVec = register_counter_vec!(
        "gateway_calls_total",
        "Total contract read calls dispatched",
        &["method"]
    ).unwrap();

    pub static ref CALLS_IN_QUEUE: Gauge = register_gauge!(
        "gateway_calls_in_queue",
        "Read calls queued but not yet started"
    ).unwrap();

    // Transaction metrics
    pub static ref TX_SUBMITTED: CounterVec = register_counter_vec!(
        "gateway_transactions_submitted_total",
        "Total transactions accepted into the mempool",
        &["method"]
    ).unwrap();

    pub static ref TX_SUBMIT_FAILED: CounterVec = register_counter_vec!(
        "gateway_transactions_submit_failed_total",
        "Total transactions that failed at submission",
        &["method"]
    ).unwrap();

    pub static ref TX_CONFIRMED: CounterVec = register_counter_vec!(
        "gateway_transactions_confirmed_total",
        "Total transactions with a mined receipt",
        &["method"]
    ).unwrap();

    pub static ref TX_REVERTED: CounterVec = register_counter_vec!(
        "gateway_transactions_reverted_total",
        "Total mined transactions with status 0",
        &["method"]
    ).unwrap();

    pub static ref TX_RECEIPT_FAILED: CounterVec = register_counter_vec!(
        "gateway_transactions_receipt_failed_total",
        "Total transactions whose receipt wait failed",
        &["method"]
    ).unwrap();

    pub static ref TX_SUBMIT_LATENCY: Histogram = register_histogram!(
        "gateway_transaction_submit_latency_seconds",
        "Latency from task start to mempool acceptance",
        vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]
    ).unwrap();

    // Retry metrics
    pub static ref RETRIES_TOTAL: CounterVec = register_counter_vec!(
        "gateway_retries_total",
        "Total retry attempts by operation",
        &["operation"]
    ).unwrap();

    // Chain state metrics
    pub static ref BLOCK_HEIGHT: Gauge = register_gauge!(
        "gateway_block_height",
        "Most recently observed block number"
    ).unwrap();

    pub static ref WALLET_BALANCE_ETH: Gauge = register_gauge!(
        "gateway_wallet_balance_eth",
        "Signer balance in ETH"
    ).unwrap();
}

// Helper functions to record metrics

pub fn record_call(method: &str) {
    CALLS_TOTAL.with_label_values(&[method]).inc();
}

pub fn record_calls_in_queue(depth: usize) {
    CALLS_IN_QUEUE.set(depth as f64);
}

pub fn record_tx_submitted(method: &str) {
    TX_SUBMITTED.with_label_values(&[method]).inc();
}

pub fn record_tx_submit_failed(method: &str) {
    TX_SUBMIT_FAILED.with_label_values(&[method]).inc();
}

pub fn record_tx_confirmed(method: &str) {
    TX_CONFIRMED.with_label_values(&[method]).inc();
}

pub fn record_tx_reverted(method: &str) {
    TX_REVERTED.with_label_values(&[method]).inc();
}

pub fn record_tx_receipt_failed(method: &str) {
    TX_RECEIPT_FAILED.with_label_values(&[method]).inc();
}

pub fn record_tx_submit_latency(latency_secs: f64) {
    TX_SUBMIT_LATENCY.observe(latency_secs);
}

pub fn record_retry(operation: &str) {
    RETRIES_TOTAL.with_label_values(&[operation]).inc();
}

pub fn record_block_height(block_number: u64) {
    BLOCK_HEIGHT.set(block_number as f64);
}

pub fn record_wallet_balance(balance_eth: f64) {
    WALLET_BALANCE_ETH.set(balance_eth);
}
