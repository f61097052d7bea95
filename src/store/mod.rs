//! The embedded Block Store (§4.F).

pub mod blockstore;
pub mod kv;

pub use blockstore::{BlockId, BlockStore, BlockToStore, StoredBlock, StoredTx, TxToStore};
