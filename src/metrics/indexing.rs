//! Fetcher/indexer progress metric helpers.

use super::definitions::{
    ACTIVE_INDEXING_TASKS, BLOCKS_BEHIND, BLOCKS_STORED_TOTAL, CHECKPOINT_LAG_TXS,
    CHECKPOINT_TX_NUM, LAST_STORED_BLOCK, LATEST_CHAIN_BLOCK, LOOKAHEAD_DEPTH,
    PLUGIN_FAILURES_TOTAL, TXS_INDEXED_TOTAL,
};

/// Record a batch of blocks persisted by the fetch loop.
pub fn record_blocks_stored(chain: &str, block_count: u64, last_stored: u64) {
    if block_count > 0 {
        BLOCKS_STORED_TOTAL.with_label_values(&[chain]).inc_by(block_count as f64);
    }
    LAST_STORED_BLOCK.with_label_values(&[chain]).set(last_stored as f64);
}

/// Update the latest observed chain head and the resulting lag.
pub fn set_chain_head(chain: &str, last_stored: u64, latest_chain_block: u64) {
    LATEST_CHAIN_BLOCK.with_label_values(&[chain]).set(latest_chain_block as f64);
    let behind = latest_chain_block.saturating_sub(last_stored);
    BLOCKS_BEHIND.with_label_values(&[chain]).set(behind as f64);
}

/// Record a committed batch for a (chain, plugin) pair.
pub fn record_txs_indexed(chain: &str, plugin: &str, tx_count: u64, checkpoint: u64) {
    if tx_count > 0 {
        TXS_INDEXED_TOTAL.with_label_values(&[chain, plugin]).inc_by(tx_count as f64);
    }
    CHECKPOINT_TX_NUM.with_label_values(&[chain, plugin]).set(checkpoint as f64);
}

/// Update the checkpoint lag gauge for a (chain, plugin) pair.
pub fn set_checkpoint_lag(chain: &str, plugin: &str, checkpoint: u64, store_tx_count: u64) {
    let lag = store_tx_count.saturating_sub(checkpoint);
    CHECKPOINT_LAG_TXS.with_label_values(&[chain, plugin]).set(lag as f64);
}

/// Update the lookahead depth gauge.
pub fn set_lookahead_depth(chain: &str, plugin: &str, depth: i8) {
    LOOKAHEAD_DEPTH.with_label_values(&[chain, plugin]).set(depth as f64);
}

/// Record a plugin extract/save failure.
pub fn record_plugin_failure(chain: &str, plugin: &str) {
    PLUGIN_FAILURES_TOTAL.with_label_values(&[chain, plugin]).inc();
}

/// Update active indexing task count.
pub fn set_active_tasks(count: usize) {
    ACTIVE_INDEXING_TASKS.set(count as f64);
}

/// Increment active indexing tasks.
pub fn inc_active_tasks() {
    ACTIVE_INDEXING_TASKS.inc();
}

/// Decrement active indexing tasks.
pub fn dec_active_tasks() {
    ACTIVE_INDEXING_TASKS.dec();
}
