//! Adaptive EVM block fetching, compact single-file storage, and
//! plugin-driven indexing.
//!
//! Three long-running roles share this crate: the Fetch Loop (one per
//! chain) harvests blocks, receipts and traces into the Block Store; the
//! Indexer Runtime (one per chain/plugin pair) streams committed
//! transactions out of that store into a plugin's own projection; the health
//! and metrics surfaces expose both to an operator. None of the three is
//! wired to a process entrypoint here — that's the supervisor's job.

pub mod codec;
pub mod config;
pub mod error;
pub mod fetch_loop;
pub mod harvester;
pub mod health;
pub mod indexer;
pub mod logger;
pub mod metrics;
pub mod rpc;
pub mod store;
pub mod system_state;

pub use error::{Error, Result};
