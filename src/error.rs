//! Crate-wide error taxonomy.
//!
//! Each component owns a focused `thiserror` enum; [`Error`] composes them for
//! callers that cross component boundaries (the fetch loop and the indexer
//! runtime). Recoverable errors (transport, consistency) are retried by their
//! owning loop and never propagate past it. Invariant violations are fatal and
//! bubble all the way up to `main`.

use thiserror::Error;

/// Failures from the RPC transport and dispatcher (§4.A, §4.C).
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("response body was not valid json-rpc: {0}")]
    MalformedResponse(String),

    #[error("json-rpc error {code} for method {method}: {message}")]
    RpcError { method: String, code: i64, message: String },

    #[error("response id {got} did not correlate to any in-flight request")]
    UncorrelatedResponse { got: i64 },

    #[error("dispatcher queue was closed before the request could be admitted")]
    DispatcherClosed,
}

/// Failures from block/receipt/trace assembly (§4.D).
#[derive(Debug, Error)]
pub enum HarvesterError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("block {number} reported {expected} transactions but {actual} receipts were fetched")]
    ReceiptCountMismatch { number: u64, expected: usize, actual: usize },

    #[error("block {number} expected traces but debug_traceBlockByNumber returned none")]
    MissingTraces { number: u64 },

    #[error("failed to decode transaction entry in block {number}: {reason}")]
    MalformedTransaction { number: u64, reason: String },
}

/// Failures from record encode/decode (§4.E).
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("unrecognized codec tag {tag:#x}, expected {expected:#x}")]
    UnknownTag { tag: u8, expected: u8 },

    #[error("rlp decode failed: {0}")]
    Rlp(#[from] alloy_rlp::Error),

    #[error("field index {index} out of range for a record with {field_count} fields")]
    FieldOutOfRange { index: usize, field_count: usize },

    #[error("call type byte {0} is not a recognized trace call type")]
    UnknownCallType(u8),

    #[error("dev-mode schema check failed: unexpected field(s) {0:?} present on input")]
    UnexpectedFields(Vec<String>),

    #[error("dev-mode schema check failed: required field(s) {0:?} missing from input")]
    MissingFields(Vec<String>),
}

/// Failures from the block store (§4.F). Most variants are fatal to the
/// owning process; see the doc comment on each for the expected handling.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("attempted to store block {got} but store expects contiguous append at {expected}")]
    NonContiguousAppend { expected: u64, got: u64 },

    #[error("batch contains trace data but store was opened with has_debug=false")]
    UnexpectedTraces,

    #[error("batch is missing trace data but store was opened with has_debug=true")]
    MissingTraces,

    #[error("transaction index {index} exceeds the 65535 limit for block {number}")]
    TooManyTransactions { number: u64, index: usize },

    #[error("store was previously opened with has_debug={stored} but now requested has_debug={requested}")]
    HasDebugMismatch { stored: bool, requested: bool },

    #[error("stored payload carries unknown codec tag {tag}, refusing to decode")]
    UnknownStoredTag { tag: i64 },

    #[error("compression error: {0}")]
    Compression(String),
}

/// Failures surfaced by a plugin's `extract` or `save`.
#[derive(Debug, Error)]
pub enum PluginError {
    #[error("plugin {plugin} extract failed: {reason}")]
    Extract { plugin: String, reason: String },

    #[error("plugin {plugin} save failed: {reason}")]
    Save { plugin: String, reason: String },

    #[error("plugin {plugin} initialize failed: {reason}")]
    Initialize { plugin: String, reason: String },
}

/// Failures parsing/validating chain configuration (§6).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read { path: String, source: std::io::Error },

    #[error("failed to parse config json: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("chain '{chain}': {reason}")]
    Invalid { chain: String, reason: String },

    #[error("no chain configuration found with id '{0}'")]
    ChainNotFound(String),
}

/// Umbrella error for call sites that cross component boundaries.
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Harvester(#[from] HarvesterError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
