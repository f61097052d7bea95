//! Plugin Contract (§4.I): the interface an indexer plugin implements to
//! turn a sequential stream of transactions into its own projection.

use async_trait::async_trait;
use rusqlite::Transaction;
use serde_json::Value;

use crate::codec::{CallFrame, TxRecord};
use crate::error::PluginError;
use crate::store::BlockStore;

use super::runtime::ProjectionStore;

/// One transaction handed to a plugin's `extract`, already joined with its
/// enclosing block's timestamp and (when the chain's store carries traces)
/// its call trace. No store handle is reachable from here.
#[derive(Debug, Clone)]
pub struct IndexedTxRecord {
    pub tx: TxRecord,
    pub trace: Option<CallFrame>,
}

/// Opaque, serializable output of `extract`. Plugins choose their own shape;
/// the runtime never inspects it, only threads it from `extract` to `save`.
pub type ProjectionDelta = Value;

/// A plugin's contribution to the indexer runtime: a name, a monotonically
/// increasing version, whether it needs trace data, and the
/// extract/save/initialize triad.
///
/// `extract` is deliberately given no store handle, so the pure-function
/// contract from §4.I is enforced at the type level rather than by
/// convention.
#[async_trait]
pub trait IndexerPlugin: Send + Sync {
    fn name(&self) -> &str;

    /// Bumping this provisions a fresh projection store; old versions may be
    /// reclaimed by the supervisor.
    fn version(&self) -> u32;

    /// When true, the runtime refuses to run against a block store opened
    /// with `has_debug = false`.
    fn uses_traces(&self) -> bool;

    /// Idempotent schema setup, run once per version before the first batch.
    async fn initialize(&self, projection_store: &ProjectionStore) -> Result<(), PluginError>;

    /// Pure transform over a batch of transactions. Must not perform I/O
    /// against any store.
    async fn extract(&self, tx_batch: &[IndexedTxRecord]) -> Result<ProjectionDelta, PluginError>;

    /// Apply a previously extracted delta under the transaction the runtime
    /// already has open. The runtime commits `tx` only after this returns
    /// `Ok` *and* it has also written the new checkpoint into the same
    /// transaction, so the delta and the checkpoint advance land together or
    /// not at all: returning `Err` here rolls back anything this call wrote,
    /// and a crash before commit leaves both the delta and the checkpoint at
    /// their pre-batch state, so the runtime reprocesses the identical
    /// `[from_tx, to_tx]` range on restart rather than resuming mid-batch.
    /// `block_store` is read-only; because this runs inside a blocking
    /// sqlite transaction, implementations must not await it here — pull
    /// anything that needs async I/O in `extract` instead.
    fn save(
        &self,
        tx: &Transaction,
        block_store: &BlockStore,
        delta: ProjectionDelta,
    ) -> Result<(), PluginError>;
}
