//! Prometheus metrics for the fetcher, block store, and indexer runtime.
//!
//! # Usage
//!
//! ```ignore
//! use blockhaul::metrics::{indexing, rpc};
//!
//! // Record a committed batch
//! indexing::record_txs_indexed("ethereum", "leaderboard", 100, 500_100);
//!
//! // Time an RPC request
//! let _timer = rpc::time_rpc_request("ethereum", "eth_getBlockByNumber");
//! // ... make RPC call ...
//! // Duration recorded automatically on drop
//! ```
//!
//! # Metrics Endpoint
//!
//! Add the `/metrics` route to your Axum router:
//!
//! ```ignore
//! use blockhaul::metrics::metrics_handler;
//!
//! let app = Router::new()
//!     .route("/metrics", get(metrics_handler));
//! ```

pub mod definitions;
pub mod indexing;
pub mod rpc;
pub mod store;
pub mod timer;

// Re-export commonly used items
pub use definitions::init_build_info;
pub use timer::{CallbackTimer, TimerGuard};

use axum::{http::StatusCode, response::IntoResponse};
use prometheus::{Encoder, TextEncoder};

/// Axum handler for the `/metrics` endpoint.
///
/// Returns metrics in Prometheus text exposition format.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    let mut buffer = Vec::new();
    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => {
            let body = String::from_utf8(buffer).unwrap_or_default();
            (StatusCode::OK, [("content-type", "text/plain; version=0.0.4; charset=utf-8")], body)
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {}", e),
        ),
    }
}

/// Encode all metrics to a string (for testing or custom endpoints).
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        // Initialize a metric to ensure something is collected
        indexing::set_active_tasks(5);

        let output = encode_metrics().expect("should encode metrics");
        assert!(output.contains("blockhaul_active_indexing_tasks"));
    }

    #[test]
    fn test_indexing_metrics() {
        indexing::record_blocks_stored("ethereum", 10, 110);
        indexing::set_chain_head("ethereum", 110, 120);
        indexing::record_txs_indexed("ethereum", "leaderboard", 42, 500_042);

        let output = encode_metrics().expect("should encode metrics");
        assert!(output.contains("blockhaul_blocks_stored_total"));
        assert!(output.contains("blockhaul_last_stored_block"));
        assert!(output.contains("blockhaul_blocks_behind"));
        assert!(output.contains("blockhaul_txs_indexed_total"));
    }
}
