//! `/health` endpoint (ambient addition, §6): reports Block Store
//! reachability, fetcher lag behind the chain head, and the current indexer
//! task count.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use crate::indexer::task_tracker::active_indexing_count;
use crate::store::BlockStore;
use crate::system_state::is_running;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: String,
    pub chains: Vec<ChainHealth>,
    pub indexing: IndexingStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainHealth {
    pub chain: String,
    pub store: String,
    pub last_stored_block: i64,
    pub last_known_head: Option<u64>,
    pub blocks_behind: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingStatus {
    pub active_tasks: usize,
    pub is_running: bool,
}

#[derive(Clone)]
pub struct HealthServerState {
    pub stores: Vec<BlockStore>,
}

pub struct HealthServer {
    port: u16,
    state: HealthServerState,
}

impl HealthServer {
    pub fn new(port: u16, stores: Vec<BlockStore>) -> Self {
        Self { port, state: HealthServerState { stores } }
    }

    pub async fn start(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let app = Router::new().route("/health", get(health_handler)).with_state(self.state);

        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr).await?;

        info!("health server listening on http://0.0.0.0:{}/health", self.port);

        axum::serve(listener, app).await?;
        Ok(())
    }
}

async fn health_handler(State(state): State<HealthServerState>) -> (StatusCode, Json<HealthStatus>) {
    let mut overall_healthy = true;
    let mut chains = Vec::with_capacity(state.stores.len());

    for store in &state.stores {
        let last_stored = store.get_last_stored_block().await;
        let store_reachable = last_stored.is_ok();
        let last_stored = last_stored.unwrap_or(-1);
        let last_known_head = store.get_last_known_head().await.ok().flatten();

        let blocks_behind = last_known_head.map(|h| h.saturating_sub(last_stored.max(0) as u64)).unwrap_or(0);

        if !store_reachable {
            overall_healthy = false;
        }

        chains.push(ChainHealth {
            chain: store.chain().to_string(),
            store: if store_reachable { "healthy".to_string() } else { "unhealthy".to_string() },
            last_stored_block: last_stored,
            last_known_head,
            blocks_behind,
        });
    }

    let running = is_running();
    if !running {
        overall_healthy = false;
    }

    let health_status = HealthStatus {
        status: if overall_healthy { "healthy".to_string() } else { "unhealthy".to_string() },
        timestamp: chrono::Utc::now().to_rfc3339(),
        chains,
        indexing: IndexingStatus { active_tasks: active_indexing_count(), is_running: running },
    };

    let status_code = if overall_healthy { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (status_code, Json(health_status))
}

pub async fn start_health_server(
    port: u16,
    stores: Vec<BlockStore>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let health_server = HealthServer::new(port, stores);
    health_server.start().await
}
