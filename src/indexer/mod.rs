//! The Indexer Runtime (§4.H) and Plugin Contract (§4.I).

pub mod plugin;
pub mod resource_monitor;
pub mod runtime;
pub mod task_tracker;

pub use plugin::{IndexedTxRecord, IndexerPlugin, ProjectionDelta};
pub use resource_monitor::ResourceMonitor;
pub use runtime::{IndexerRuntime, ProjectionStore};
