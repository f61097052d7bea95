//! Fetch Loop (§4.G): the single long-running per-chain loop that drives the
//! Batch Sizer, Dispatcher, RPC Transport and Block Harvester forward,
//! persisting the result into the Block Store.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{Error, TransportError};
use crate::harvester::Harvester;
use crate::metrics::indexing as indexing_metrics;
use crate::rpc::{BatchCall, Dispatcher, RpcTransport};
use crate::store::BlockStore;
use crate::system_state;

const HEAD_PROBE_RETRY_BACKOFF: Duration = Duration::from_secs(10);
const FAILURE_BACKOFF: Duration = Duration::from_secs(10);
const CAUGHT_UP_REPROBE_INTERVAL: Duration = Duration::from_secs(3);

pub struct FetchLoop {
    store: BlockStore,
    transport: Arc<RpcTransport>,
    dispatcher: Arc<Dispatcher>,
    harvester: Harvester,
    blocks_per_batch: u32,
}

impl FetchLoop {
    pub fn new(
        store: BlockStore,
        transport: Arc<RpcTransport>,
        dispatcher: Arc<Dispatcher>,
        harvester: Harvester,
        blocks_per_batch: u32,
    ) -> Self {
        Self { store, transport, dispatcher, harvester, blocks_per_batch: blocks_per_batch.max(1) }
    }

    /// Runs until `system_state::is_running()` becomes false. Intended to be
    /// spawned as its own task per chain.
    pub async fn run(&self) -> Result<(), Error> {
        let head = self.ensure_head_known().await;
        self.store.set_last_known_head(head).await?;

        while system_state::is_running() {
            let last_stored = self.store.get_last_stored_block().await?;
            let last_known_head =
                self.store.get_last_known_head().await?.expect("head established before the loop starts");

            if last_stored < last_known_head as i64 {
                self.fetch_one_range(last_stored, last_known_head).await;
            } else {
                self.reprobe_or_wait(last_known_head).await;
            }
        }

        Ok(())
    }

    async fn ensure_head_known(&self) -> u64 {
        loop {
            match self.probe_head_and_chain_id().await {
                Ok(head) => return head,
                Err(e) => {
                    warn!(chain = self.transport.chain(), error = %e, "head probe failed, retrying");
                    tokio::time::sleep(HEAD_PROBE_RETRY_BACKOFF).await;
                }
            }
        }
    }

    async fn probe_head_and_chain_id(&self) -> Result<u64, TransportError> {
        if self.store.get_evm_chain_id().await.ok().flatten().is_none() {
            let chain_id = self.probe_single("eth_chainId", json!([])).await?;
            let _ = self.store.set_evm_chain_id(chain_id).await;
        }
        self.probe_single("eth_blockNumber", json!([])).await
    }

    async fn probe_single(&self, method: &'static str, params: Value) -> Result<u64, TransportError> {
        let transport = Arc::clone(&self.transport);
        let calls = vec![BatchCall { method, params, tag: () }];
        let results = self.dispatcher.dispatch(|| async move { transport.send_batch(method, calls).await }).await?;
        let result = results
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::MalformedResponse("empty response to single call".to_string()))?
            .outcome
            .map_err(|e| TransportError::RpcError { method: method.to_string(), code: e.code, message: e.message })?;

        let s = result.as_str().ok_or_else(|| TransportError::MalformedResponse(format!("expected hex string, got {result}")))?;
        u64::from_str_radix(s.trim_start_matches("0x"), 16)
            .map_err(|e| TransportError::MalformedResponse(format!("invalid hex integer {s}: {e}")))
    }

    async fn fetch_one_range(&self, last_stored: i64, last_known_head: u64) {
        let from = (last_stored + 1) as u64;
        let to = (from + self.blocks_per_batch as u64 - 1).min(last_known_head);
        let numbers: Vec<u64> = (from..=to).collect();

        let start = Instant::now();
        match self.harvester.harvest(&numbers).await {
            Ok(blocks) => {
                let count = blocks.len() as u64;
                if let Err(e) = self.store.store_blocks(blocks).await {
                    warn!(chain = self.transport.chain(), error = %e, "failed to persist harvested range, backing off");
                    tokio::time::sleep(FAILURE_BACKOFF).await;
                    return;
                }

                let elapsed = start.elapsed().as_secs_f64().max(f64::EPSILON);
                let blocks_per_sec = count as f64 / elapsed;
                let remaining = last_known_head.saturating_sub(to);
                let eta_secs = if blocks_per_sec > 0.0 { remaining as f64 / blocks_per_sec } else { f64::INFINITY };
                info!(
                    chain = self.transport.chain(),
                    from, to, blocks_per_sec, eta_secs, "persisted block range"
                );

                indexing_metrics::record_blocks_stored(self.transport.chain(), count, to);
                indexing_metrics::set_chain_head(self.transport.chain(), to, last_known_head);
            }
            Err(e) => {
                warn!(chain = self.transport.chain(), from, to, error = %e, "harvest failed, backing off");
                tokio::time::sleep(FAILURE_BACKOFF).await;
            }
        }
    }

    async fn reprobe_or_wait(&self, last_known_head: u64) {
        match self.probe_single("eth_blockNumber", json!([])).await {
            Ok(head) if head == last_known_head => {
                tokio::time::sleep(CAUGHT_UP_REPROBE_INTERVAL).await;
            }
            Ok(head) => {
                let _ = self.store.set_last_known_head(head).await;
            }
            Err(e) => {
                warn!(chain = self.transport.chain(), error = %e, "head re-probe failed, backing off");
                tokio::time::sleep(HEAD_PROBE_RETRY_BACKOFF).await;
            }
        }
    }
}
