//! Indexer Runtime (§4.H): one instance per (chain, plugin). Streams
//! transactions out of the Block Store in strict `tx_num` order, decodes and
//! extracts them on a bounded worker pool ahead of where the checkpoint
//! currently sits, and commits extracted deltas one at a time through a
//! single control-flow loop so the checkpoint only ever advances after the
//! corresponding delta has been saved.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use rusqlite::Connection;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::error::{Error, PluginError, StoreError};
use crate::indexer::task_tracker;
use crate::metrics::indexing as indexing_metrics;
use crate::store::{kv, BlockStore};
use crate::system_state;

use super::plugin::{IndexedTxRecord, IndexerPlugin, ProjectionDelta};

/// Default job size for both prefetched and inline batches (§4.H).
const TXS_PER_LOOP: u64 = 50_000;
const CATCH_UP_SLEEP: Duration = Duration::from_secs(3);
const FAILURE_BACKOFF: Duration = Duration::from_secs(2);

const KEY_CHECKPOINT: &str = "last_indexed_tx";

struct ProjectionInner {
    chain: String,
    plugin_name: String,
    writer: StdMutex<Connection>,
}

/// A plugin's own, single-writer-owned sqlite store: same backend semantics
/// as the Block Store, minus the block/tx tables, plus whatever schema the
/// plugin itself creates in `initialize`.
#[derive(Clone)]
pub struct ProjectionStore(Arc<ProjectionInner>);

impl ProjectionStore {
    pub fn open(
        path: impl AsRef<Path>,
        chain: impl Into<String>,
        plugin_name: impl Into<String>,
    ) -> Result<Self, StoreError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::Compression(e.to_string()))?;
        }

        let conn = Connection::open(&path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        kv::ensure_table(&conn)?;

        Ok(Self(Arc::new(ProjectionInner {
            chain: chain.into(),
            plugin_name: plugin_name.into(),
            writer: StdMutex::new(conn),
        })))
    }

    pub fn chain(&self) -> &str {
        &self.0.chain
    }

    pub fn plugin_name(&self) -> &str {
        &self.0.plugin_name
    }

    /// `-1` when nothing has ever been committed, mirroring
    /// [`BlockStore::get_last_stored_block`]'s empty-store sentinel.
    pub async fn get_checkpoint(&self) -> Result<i64, StoreError> {
        let inner = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || {
            let conn = inner.writer.lock().expect("projection writer mutex poisoned");
            Ok(kv::get_int(&conn, KEY_CHECKPOINT)?.unwrap_or(-1))
        })
        .await
        .expect("blocking task panicked")
    }

    pub async fn set_checkpoint(&self, to_tx: u64) -> Result<(), StoreError> {
        let inner = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || {
            let conn = inner.writer.lock().expect("projection writer mutex poisoned");
            kv::set_int(&conn, KEY_CHECKPOINT, to_tx as i64)
        })
        .await
        .expect("blocking task panicked")
    }

    fn initialized_key(version: u32) -> String {
        format!("initialized_v{version}")
    }

    pub async fn is_initialized(&self, version: u32) -> Result<bool, StoreError> {
        let inner = Arc::clone(&self.0);
        let key = Self::initialized_key(version);
        tokio::task::spawn_blocking(move || {
            let conn = inner.writer.lock().expect("projection writer mutex poisoned");
            Ok(kv::get_int(&conn, &key)?.is_some())
        })
        .await
        .expect("blocking task panicked")
    }

    pub async fn mark_initialized(&self, version: u32) -> Result<(), StoreError> {
        let inner = Arc::clone(&self.0);
        let key = Self::initialized_key(version);
        tokio::task::spawn_blocking(move || {
            let conn = inner.writer.lock().expect("projection writer mutex poisoned");
            kv::set_int(&conn, &key, 1)
        })
        .await
        .expect("blocking task panicked")
    }

    /// Generic write primitive for a plugin's own schema/tables, run on the
    /// single writer connection inside one sqlite transaction.
    pub async fn with_transaction<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let inner = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || {
            let mut conn = inner.writer.lock().expect("projection writer mutex poisoned");
            let tx = conn.transaction()?;
            let result = f(&tx)?;
            tx.commit()?;
            Ok(result)
        })
        .await
        .expect("blocking task panicked")
    }

    /// Runs `apply` and the checkpoint advance to `to_tx` inside the same
    /// writer transaction, so a plugin's save and the checkpoint move land
    /// together or not at all (§4.H "Commit"). If `apply` returns `Err` the
    /// whole transaction rolls back, including anything it already wrote.
    async fn commit_with_checkpoint<F>(&self, to_tx: u64, apply: F) -> Result<(), PluginError>
    where
        F: FnOnce(&rusqlite::Transaction) -> Result<(), PluginError> + Send + 'static,
    {
        let inner = Arc::clone(&self.0);
        tokio::task::spawn_blocking(move || {
            let plugin_name = inner.plugin_name.clone();
            let mut conn = inner.writer.lock().expect("projection writer mutex poisoned");
            let tx = conn
                .transaction()
                .map_err(|e| PluginError::Save { plugin: plugin_name.clone(), reason: e.to_string() })?;
            apply(&tx)?;
            kv::set_int(&tx, KEY_CHECKPOINT, to_tx as i64)
                .map_err(|e| PluginError::Save { plugin: plugin_name.clone(), reason: e.to_string() })?;
            tx.commit().map_err(|e| PluginError::Save { plugin: plugin_name, reason: e.to_string() })?;
            Ok(())
        })
        .await
        .expect("blocking task panicked")
    }
}

struct ExtractedBatch {
    from_tx: u64,
    to_tx: u64,
    delta: ProjectionDelta,
}

struct PrefetchJob {
    from_tx: u64,
    to_tx: u64,
    handle: JoinHandle<Result<ExtractedBatch, PluginError>>,
}

/// Balances a `task_tracker::indexing_event_processing()` call with exactly
/// one `indexing_event_processed()`, regardless of how the task holding it
/// ends. Held as a local inside a spawned task body, its `Drop` still runs
/// when `JoinHandle::abort()` tears the task's future down mid-flight, so a
/// discarded stale job decrements the tracker the same as a finished one.
struct TaskGuard;

impl TaskGuard {
    fn new() -> Self {
        task_tracker::indexing_event_processing();
        TaskGuard
    }
}

impl Drop for TaskGuard {
    fn drop(&mut self) {
        task_tracker::indexing_event_processed();
    }
}

/// Drives one (chain, plugin) pipeline: lookahead prefetch plus a serialized
/// commit loop.
pub struct IndexerRuntime<P: IndexerPlugin> {
    chain: String,
    block_store: BlockStore,
    projection: ProjectionStore,
    plugin: Arc<P>,
    monitor: super::resource_monitor::ResourceMonitor,
    worker_permits: Arc<Semaphore>,
}

// Hand-written so cloning a runtime never requires `P: Clone` — only the
// `Arc<P>` needs to be cheap to clone, which it always is.
impl<P: IndexerPlugin> Clone for IndexerRuntime<P> {
    fn clone(&self) -> Self {
        Self {
            chain: self.chain.clone(),
            block_store: self.block_store.clone(),
            projection: self.projection.clone(),
            plugin: Arc::clone(&self.plugin),
            monitor: self.monitor.clone(),
            worker_permits: Arc::clone(&self.worker_permits),
        }
    }
}

impl<P: IndexerPlugin + 'static> IndexerRuntime<P> {
    pub fn new(
        chain: impl Into<String>,
        block_store: BlockStore,
        projection: ProjectionStore,
        plugin: Arc<P>,
        monitor: super::resource_monitor::ResourceMonitor,
    ) -> Self {
        let workers = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        Self {
            chain: chain.into(),
            block_store,
            projection,
            plugin,
            monitor,
            worker_permits: Arc::new(Semaphore::new(workers)),
        }
    }

    /// Runs until `system_state::is_running()` becomes false.
    pub async fn run(&self) -> Result<(), Error> {
        if self.plugin.uses_traces() && !self.block_store.has_debug() {
            return Err(Error::Plugin(PluginError::Initialize {
                plugin: self.plugin.name().to_string(),
                reason: "plugin requires call traces but the block store was opened without debug tracing"
                    .to_string(),
            }));
        }

        self.ensure_initialized().await?;

        let mut queue: std::collections::VecDeque<PrefetchJob> = std::collections::VecDeque::new();

        while system_state::is_running() {
            let checkpoint = self.projection.get_checkpoint().await?;
            let tx_count = self.block_store.get_tx_count().await? as i64;

            indexing_metrics::set_checkpoint_lag(
                &self.chain,
                self.plugin.name(),
                (checkpoint + 1).max(0) as u64,
                tx_count.max(0) as u64,
            );
            indexing_metrics::set_lookahead_depth(&self.chain, self.plugin.name(), self.monitor.depth());

            if checkpoint + 1 >= tx_count {
                self.discard_queue(&mut queue);
                tokio::time::sleep(CATCH_UP_SLEEP).await;
                continue;
            }

            // A stale prefetched job is one whose from_tx no longer matches
            // the checkpoint (it was built on an assumption that didn't
            // hold, e.g. after a failed commit retry).
            while let Some(front) = queue.front() {
                if front.from_tx as i64 != checkpoint + 1 {
                    let stale = queue.pop_front().expect("front just checked");
                    // Aborting drops the task's future, which drops its
                    // TaskGuard and balances the tracker even though the
                    // task body never reaches its own end.
                    stale.handle.abort();
                } else {
                    break;
                }
            }

            self.top_up_queue(&mut queue, checkpoint, tx_count as u64);

            let from_tx = (checkpoint + 1) as u64;
            let extracted = if let Some(job) = queue.pop_front() {
                debug_assert_eq!(job.from_tx, from_tx);
                match job.handle.await {
                    Ok(result) => result,
                    Err(join_err) => Err(PluginError::Extract {
                        plugin: self.plugin.name().to_string(),
                        reason: format!("prefetch task panicked: {join_err}"),
                    }),
                }
            } else {
                // Depth is 0 or this is the partial tail: never prefetched.
                let remaining = tx_count as u64 - from_tx;
                let to_tx = from_tx + remaining.min(TXS_PER_LOOP) - 1;
                let _guard = TaskGuard::new();
                self.fetch_and_extract(from_tx, to_tx).await
            };

            match extracted {
                Ok(batch) => {
                    if let Err(e) = self.commit(batch).await {
                        warn!(chain = %self.chain, plugin = self.plugin.name(), error = %e, "commit failed, retrying");
                        tokio::time::sleep(FAILURE_BACKOFF).await;
                    }
                }
                Err(e) => {
                    warn!(chain = %self.chain, plugin = self.plugin.name(), error = %e, "extract failed, retrying");
                    indexing_metrics::record_plugin_failure(&self.chain, self.plugin.name());
                    tokio::time::sleep(FAILURE_BACKOFF).await;
                }
            }
        }

        Ok(())
    }

    async fn ensure_initialized(&self) -> Result<(), Error> {
        let version = self.plugin.version();
        if self.projection.is_initialized(version).await? {
            return Ok(());
        }
        self.plugin.initialize(&self.projection).await.map_err(Error::Plugin)?;
        self.projection.mark_initialized(version).await?;
        info!(chain = %self.chain, plugin = self.plugin.name(), version, "plugin initialized");
        Ok(())
    }

    fn discard_queue(&self, queue: &mut std::collections::VecDeque<PrefetchJob>) {
        // Same TaskGuard-on-drop accounting as the stale-job discard above.
        for job in queue.drain(..) {
            job.handle.abort();
        }
    }

    /// Tops the queue up to the monitor's current depth, never enqueueing a
    /// job that would cover the moving partial tail.
    fn top_up_queue(&self, queue: &mut std::collections::VecDeque<PrefetchJob>, checkpoint: i64, tx_count: u64) {
        let target_depth = self.monitor.depth().clamp(0, 10) as usize;
        loop {
            if queue.len() >= target_depth {
                return;
            }
            let next_from = queue.back().map(|j| j.to_tx + 1).unwrap_or((checkpoint + 1) as u64);
            let remaining = tx_count.saturating_sub(next_from);
            if remaining < TXS_PER_LOOP {
                return;
            }
            let to_tx = next_from + TXS_PER_LOOP - 1;
            queue.push_back(self.spawn_prefetch(next_from, to_tx));
        }
    }

    fn spawn_prefetch(&self, from_tx: u64, to_tx: u64) -> PrefetchJob {
        let runtime = self.clone();
        let handle = tokio::spawn(async move {
            let _guard = TaskGuard::new();
            let _permit = runtime.worker_permits.clone().acquire_owned().await.expect("semaphore never closed");
            runtime.fetch_and_extract(from_tx, to_tx).await
        });
        PrefetchJob { from_tx, to_tx, handle }
    }

    async fn fetch_and_extract(&self, from_tx: u64, to_tx: u64) -> Result<ExtractedBatch, PluginError> {
        let limit = (to_tx - from_tx + 1) as u32;
        let txs = self
            .block_store
            .get_tx_batch(from_tx as i64 - 1, limit)
            .await
            .map_err(|e| PluginError::Extract { plugin: self.plugin.name().to_string(), reason: e.to_string() })?;

        let indexed: Vec<IndexedTxRecord> =
            txs.into_iter().map(|t| IndexedTxRecord { tx: t.tx, trace: t.trace }).collect();

        let delta = self.plugin.extract(&indexed).await?;
        Ok(ExtractedBatch { from_tx, to_tx, delta })
    }

    async fn commit(&self, batch: ExtractedBatch) -> Result<(), Error> {
        let plugin = Arc::clone(&self.plugin);
        let block_store = self.block_store.clone();
        let ExtractedBatch { from_tx, to_tx, delta } = batch;

        self.projection
            .commit_with_checkpoint(to_tx, move |tx| plugin.save(tx, &block_store, delta))
            .await
            .map_err(Error::Plugin)?;

        let committed = to_tx - from_tx + 1;
        indexing_metrics::record_txs_indexed(&self.chain, self.plugin.name(), committed, to_tx + 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;

    use super::*;
    use crate::codec::{BlockRecord, TxRecord};
    use crate::store::{BlockToStore, TxToStore};

    fn tx(block_number: u64, index: u32) -> TxRecord {
        TxRecord {
            hash: [index as u8 + 1; 32],
            block_number,
            tx_index: index,
            from: [1u8; 20],
            to: Some([2u8; 20]),
            value: 0,
            nonce: index as u64,
            gas: 21_000,
            gas_price: Some(1),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            input: Bytes::new(),
            tx_type: 0,
            chain_id: Some(1),
            block_timestamp: 1_700_000_000,
            status: true,
            gas_used: 21_000,
            cumulative_gas_used: 21_000,
            effective_gas_price: 1,
            contract_address: None,
            logs: vec![],
        }
    }

    fn block(number: u64, tx_count: u32) -> BlockRecord {
        BlockRecord {
            number,
            hash: [number as u8; 32],
            parent_hash: [0u8; 32],
            miner: [9u8; 20],
            timestamp: 1_700_000_000 + number,
            gas_used: 21_000 * tx_count as u128,
            gas_limit: 30_000_000,
            base_fee_per_gas: Some(1),
            blob_gas_used: None,
            excess_blob_gas: None,
            parent_beacon_block_root: None,
            tx_count,
        }
    }

    /// Counts every transaction it sees and records its own call count, so
    /// tests can assert the runtime delivered exactly the transactions it
    /// claims to and never replayed a committed range.
    struct CountingPlugin {
        saves: AtomicUsize,
    }

    #[async_trait]
    impl IndexerPlugin for CountingPlugin {
        fn name(&self) -> &str {
            "counting-plugin"
        }

        fn version(&self) -> u32 {
            1
        }

        fn uses_traces(&self) -> bool {
            false
        }

        async fn initialize(&self, _projection_store: &ProjectionStore) -> Result<(), PluginError> {
            Ok(())
        }

        async fn extract(&self, tx_batch: &[IndexedTxRecord]) -> Result<ProjectionDelta, PluginError> {
            Ok(json!({ "tx_count": tx_batch.len() }))
        }

        fn save(
            &self,
            _tx: &rusqlite::Transaction,
            _block_store: &BlockStore,
            delta: ProjectionDelta,
        ) -> Result<(), PluginError> {
            self.saves.fetch_add(delta["tx_count"].as_u64().unwrap_or(0) as usize, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Writes a row into its own table and then always fails, so tests can
    /// assert that a `save` failure rolls back everything it wrote and never
    /// advances the checkpoint.
    struct FailingPlugin;

    #[async_trait]
    impl IndexerPlugin for FailingPlugin {
        fn name(&self) -> &str {
            "failing-plugin"
        }

        fn version(&self) -> u32 {
            1
        }

        fn uses_traces(&self) -> bool {
            false
        }

        async fn initialize(&self, projection_store: &ProjectionStore) -> Result<(), PluginError> {
            projection_store
                .with_transaction(|tx| {
                    tx.execute_batch("CREATE TABLE seen (tx_count INTEGER NOT NULL);")?;
                    Ok(())
                })
                .await
                .map_err(|e| PluginError::Initialize { plugin: "failing-plugin".to_string(), reason: e.to_string() })
        }

        async fn extract(&self, tx_batch: &[IndexedTxRecord]) -> Result<ProjectionDelta, PluginError> {
            Ok(json!({ "tx_count": tx_batch.len() }))
        }

        fn save(
            &self,
            tx: &rusqlite::Transaction,
            _block_store: &BlockStore,
            delta: ProjectionDelta,
        ) -> Result<(), PluginError> {
            let count = delta["tx_count"].as_i64().unwrap_or(0);
            tx.execute("INSERT INTO seen (tx_count) VALUES (?1)", rusqlite::params![count])
                .map_err(|e| PluginError::Save { plugin: "failing-plugin".to_string(), reason: e.to_string() })?;
            Err(PluginError::Save { plugin: "failing-plugin".to_string(), reason: "always fails".to_string() })
        }
    }

    async fn seeded_store(dir: &tempfile::TempDir, block_count: u64, txs_per_block: u32) -> BlockStore {
        let path = dir.path().join("chain.db");
        let store = BlockStore::open(&path, "testchain", false).unwrap();
        let mut batch = Vec::new();
        for n in 0..block_count {
            let txs = (0..txs_per_block).map(|i| TxToStore { tx: tx(n, i), trace: None }).collect();
            batch.push(BlockToStore { block: block(n, txs_per_block), txs });
        }
        store.store_blocks(batch).await.unwrap();
        store
    }

    #[tokio::test]
    async fn runs_until_caught_up_then_commits_exactly_once() {
        let block_dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&block_dir, 3, 2).await; // 6 transactions total

        let projection_dir = tempfile::tempdir().unwrap();
        let projection =
            ProjectionStore::open(projection_dir.path().join("projection.db"), "testchain", "counting-plugin")
                .unwrap();

        let plugin = Arc::new(CountingPlugin { saves: AtomicUsize::new(0) });
        let monitor = super::super::resource_monitor::ResourceMonitor::spawn();
        let runtime = IndexerRuntime::new("testchain", store, projection.clone(), Arc::clone(&plugin), monitor);

        // Run the loop until the checkpoint has caught up with all 6 txs,
        // then stop it before it goes on to sleep-poll forever.
        let handle = tokio::spawn(async move { runtime.run().await });
        let mut waited = 0;
        loop {
            let checkpoint = projection.get_checkpoint().await.unwrap();
            if checkpoint == 5 {
                break;
            }
            waited += 1;
            assert!(waited < 200, "runtime never reached the expected checkpoint");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        handle.abort();

        assert_eq!(plugin.saves.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn failed_save_rolls_back_its_writes_and_leaves_checkpoint_unmoved() {
        let block_dir = tempfile::tempdir().unwrap();
        let store = seeded_store(&block_dir, 3, 2).await; // 6 transactions total

        let projection_dir = tempfile::tempdir().unwrap();
        let projection_path = projection_dir.path().join("projection.db");
        let projection = ProjectionStore::open(&projection_path, "testchain", "failing-plugin").unwrap();

        let plugin = Arc::new(FailingPlugin);
        let monitor = super::super::resource_monitor::ResourceMonitor::spawn();
        let runtime = IndexerRuntime::new("testchain", store, projection.clone(), Arc::clone(&plugin), monitor);

        runtime.ensure_initialized().await.unwrap();

        let batch = runtime.fetch_and_extract(0, 5).await.unwrap();
        let result = runtime.commit(batch).await;
        assert!(result.is_err(), "commit should surface the plugin's save failure");

        // The checkpoint never advanced...
        assert_eq!(projection.get_checkpoint().await.unwrap(), -1);

        // ...and the row `save` inserted before failing was rolled back with
        // it, since both writes shared one transaction.
        let inner = Arc::clone(&projection.0);
        let seen_rows = tokio::task::spawn_blocking(move || {
            let conn = inner.writer.lock().unwrap();
            conn.query_row("SELECT COUNT(*) FROM seen", [], |row| row.get::<_, i64>(0)).unwrap()
        })
        .await
        .unwrap();
        assert_eq!(seen_rows, 0);
    }
}
