//! Prometheus metric definitions.
//!
//! All metric registrations are centralized here for discoverability.
//! Metrics are lazily initialized on first access.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec, CounterVec,
    Gauge, GaugeVec, HistogramVec,
};

// =============================================================================
// Fetcher / chain state metrics
// =============================================================================

/// Total number of blocks written to the block store.
/// Labels: chain
pub static BLOCKS_STORED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "blockhaul_blocks_stored_total",
        "Total number of blocks written to the block store",
        &["chain"]
    )
    .expect("failed to register BLOCKS_STORED_TOTAL")
});

/// Highest block number persisted locally.
/// Labels: chain
pub static LAST_STORED_BLOCK: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("blockhaul_last_stored_block", "Highest block number persisted locally", &["chain"])
        .expect("failed to register LAST_STORED_BLOCK")
});

/// Latest block number observed on the remote chain.
/// Labels: chain
pub static LATEST_CHAIN_BLOCK: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("blockhaul_latest_chain_block", "Latest block number observed on chain", &["chain"])
        .expect("failed to register LATEST_CHAIN_BLOCK")
});

/// Blocks behind the observed chain head.
/// Labels: chain
pub static BLOCKS_BEHIND: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("blockhaul_blocks_behind", "Number of blocks behind chain head", &["chain"])
        .expect("failed to register BLOCKS_BEHIND")
});

/// Current adaptive batch size in use by the fetcher.
/// Labels: chain
pub static BATCH_SIZE_CURRENT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("blockhaul_batch_size_current", "Current adaptive RPC batch size", &["chain"])
        .expect("failed to register BATCH_SIZE_CURRENT")
});

// =============================================================================
// RPC metrics
// =============================================================================

/// Total RPC requests made.
/// Labels: chain, method, status (success/error)
pub static RPC_REQUESTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "blockhaul_rpc_requests_total",
        "Total number of RPC requests made",
        &["chain", "method", "status"]
    )
    .expect("failed to register RPC_REQUESTS_TOTAL")
});

/// RPC request duration histogram.
/// Labels: chain, method
/// Buckets optimized for typical RPC latencies (10ms to 10s).
pub static RPC_REQUEST_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "blockhaul_rpc_request_duration_seconds",
        "RPC request duration in seconds",
        &["chain", "method"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("failed to register RPC_REQUEST_DURATION")
});

/// RPC requests currently in-flight.
/// Labels: chain
pub static RPC_REQUESTS_IN_FLIGHT: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "blockhaul_rpc_requests_in_flight",
        "Number of RPC requests currently in-flight",
        &["chain"]
    )
    .expect("failed to register RPC_REQUESTS_IN_FLIGHT")
});

// =============================================================================
// Block store metrics
// =============================================================================

/// Total block store write-transaction operations.
/// Labels: status (success/error)
pub static STORE_WRITES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "blockhaul_store_writes_total",
        "Total number of block store write transactions",
        &["status"]
    )
    .expect("failed to register STORE_WRITES_TOTAL")
});

/// Block store write-transaction duration histogram.
pub static STORE_WRITE_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "blockhaul_store_write_duration_seconds",
        "Block store write transaction duration in seconds",
        &["chain"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5]
    )
    .expect("failed to register STORE_WRITE_DURATION")
});

// =============================================================================
// Indexer runtime metrics
// =============================================================================

/// Total transactions extracted and committed by a plugin.
/// Labels: chain, plugin
pub static TXS_INDEXED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "blockhaul_txs_indexed_total",
        "Total number of transactions committed by a plugin",
        &["chain", "plugin"]
    )
    .expect("failed to register TXS_INDEXED_TOTAL")
});

/// Last committed checkpoint (tx_num) per plugin.
/// Labels: chain, plugin
pub static CHECKPOINT_TX_NUM: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("blockhaul_checkpoint_tx_num", "Last committed checkpoint tx_num", &["chain", "plugin"])
        .expect("failed to register CHECKPOINT_TX_NUM")
});

/// Indexer checkpoint lag in transactions behind the store's tx count.
/// Labels: chain, plugin
pub static CHECKPOINT_LAG_TXS: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "blockhaul_checkpoint_lag_txs",
        "Transactions between the plugin checkpoint and the store's tx count",
        &["chain", "plugin"]
    )
    .expect("failed to register CHECKPOINT_LAG_TXS")
});

/// Currently active prefetch/commit tasks (global gauge).
pub static ACTIVE_INDEXING_TASKS: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!("blockhaul_active_indexing_tasks", "Number of currently active indexing tasks")
        .expect("failed to register ACTIVE_INDEXING_TASKS")
});

/// Current lookahead prefetch depth.
/// Labels: chain, plugin
pub static LOOKAHEAD_DEPTH: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("blockhaul_lookahead_depth", "Current lookahead prefetch depth", &["chain", "plugin"])
        .expect("failed to register LOOKAHEAD_DEPTH")
});

/// Plugin extract/save failures.
/// Labels: chain, plugin
pub static PLUGIN_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "blockhaul_plugin_failures_total",
        "Total plugin extract/save failures",
        &["chain", "plugin"]
    )
    .expect("failed to register PLUGIN_FAILURES_TOTAL")
});

// =============================================================================
// Build info
// =============================================================================

/// Build information gauge (always 1, labels carry metadata).
pub static BUILD_INFO: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!("blockhaul_build_info", "Build information", &["version"])
        .expect("failed to register BUILD_INFO")
});

/// Initialize build info metric with current version.
pub fn init_build_info(version: &str) {
    BUILD_INFO.with_label_values(&[version]).set(1.0);
}
