//! The embedded, single-file Block Store (§4.F): three tables (`blocks`,
//! `txs`, `kv_int`), zstd-compressed RLP payloads, one long-lived writer
//! connection behind a mutex, and a small pool of read-only reader
//! connections for concurrent indexer/API access.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags, OptionalExtension};

use crate::codec::{
    decode_block, decode_call_frame, decode_tx, encode_block, encode_call_frame, encode_tx,
    tx_num, BlockRecord, CallFrame, TxRecord,
};
use crate::error::StoreError;
use crate::metrics::store as store_metrics;

use super::kv;

/// The only codec_tag this store version writes or accepts on read.
const CODEC_TAG: i64 = 0;

const KEY_HAS_DEBUG: &str = "has_debug";
const KEY_EVM_CHAIN_ID: &str = "evm_chain_id";
const KEY_LAST_KNOWN_HEAD: &str = "last_known_head";

fn compress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    zstd::stream::encode_all(data, 0).map_err(|e| StoreError::Compression(e.to_string()))
}

fn decompress(data: &[u8]) -> Result<Vec<u8>, StoreError> {
    zstd::stream::decode_all(data).map_err(|e| StoreError::Compression(e.to_string()))
}

/// One transaction plus its optional trace, ready to append.
#[derive(Debug, Clone)]
pub struct TxToStore {
    pub tx: TxRecord,
    pub trace: Option<CallFrame>,
}

/// One block plus its transactions, ready to append.
#[derive(Debug, Clone)]
pub struct BlockToStore {
    pub block: BlockRecord,
    pub txs: Vec<TxToStore>,
}

/// A decoded transaction plus its optional trace, as read back.
#[derive(Debug, Clone)]
pub struct StoredTx {
    pub tx: TxRecord,
    pub trace: Option<CallFrame>,
}

/// A decoded block plus its decoded transactions, as read back.
#[derive(Debug, Clone)]
pub struct StoredBlock {
    pub block: BlockRecord,
    pub txs: Vec<StoredTx>,
}

#[derive(Debug, Clone, Copy)]
pub enum BlockId {
    Number(u64),
    Hash([u8; 32]),
}

struct Inner {
    chain: String,
    has_debug: bool,
    writer: StdMutex<Connection>,
    readers: Pool<SqliteConnectionManager>,
}

/// A cheaply-cloneable handle to the store. Exactly one process should hold
/// a handle opened for writing (the fetch loop); any number of processes may
/// hold read-only handles (indexer runtimes, the API).
#[derive(Clone)]
pub struct BlockStore(Arc<Inner>);

fn apply_schema(conn: &Connection) -> Result<(), StoreError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS blocks (
            number INTEGER PRIMARY KEY,
            hash BLOB NOT NULL UNIQUE,
            encoded_block BLOB NOT NULL,
            codec_tag INTEGER NOT NULL
        );
        CREATE TABLE IF NOT EXISTS txs (
            tx_num INTEGER PRIMARY KEY,
            hash BLOB NOT NULL UNIQUE,
            encoded_tx BLOB NOT NULL,
            encoded_trace BLOB,
            codec_tag INTEGER NOT NULL
        );",
    )?;
    kv::ensure_table(conn)?;
    Ok(())
}

impl BlockStore {
    /// Open (creating if absent) the store file for `chain`. `has_debug`
    /// must match whatever the store was first created with; a mismatch is
    /// a fatal invariant violation (§4.F).
    pub fn open(path: impl AsRef<Path>, chain: impl Into<String>, has_debug: bool) -> Result<Self, StoreError> {
        let path: PathBuf = path.as_ref().to_path_buf();
        let chain = chain.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| StoreError::Compression(e.to_string()))?;
            }
        }

        let writer = Connection::open(&path)?;
        writer.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA cache_size=-262144;
             PRAGMA wal_autocheckpoint=1000;",
        )?;
        apply_schema(&writer)?;

        match kv::get_int(&writer, KEY_HAS_DEBUG)? {
            None => kv::set_int(&writer, KEY_HAS_DEBUG, has_debug as i64)?,
            Some(stored) => {
                let stored = stored != 0;
                if stored != has_debug {
                    return Err(StoreError::HasDebugMismatch { stored, requested: has_debug });
                }
            }
        }

        // Reader tuning (§4.F): memory-mapped access and a generous cache
        // keep hot pages out of repeated syscalls, read_uncommitted lets
        // readers see WAL pages the writer hasn't committed yet instead of
        // blocking behind it, and the short busy_timeout fails fast rather
        // than queueing behind contention.
        let manager = SqliteConnectionManager::file(&path)
            .with_flags(OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX)
            .with_init(|conn| {
                conn.execute_batch(
                    "PRAGMA query_only=ON;
                     PRAGMA busy_timeout=50;
                     PRAGMA mmap_size=268435456;
                     PRAGMA cache_size=-65536;
                     PRAGMA read_uncommitted=1;",
                )
            });
        let readers = Pool::builder().max_size(8).build(manager)?;

        Ok(BlockStore(Arc::new(Inner { chain, has_debug, writer: StdMutex::new(writer), readers })))
    }

    pub fn chain(&self) -> &str {
        &self.0.chain
    }

    pub fn has_debug(&self) -> bool {
        self.0.has_debug
    }

    pub async fn set_evm_chain_id(&self, chain_id: u64) -> Result<(), StoreError> {
        let inner = self.0.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner.writer.lock().expect("store writer mutex poisoned");
            kv::set_int(&conn, KEY_EVM_CHAIN_ID, chain_id as i64)
        })
        .await
        .expect("blocking task panicked")
    }

    pub async fn get_evm_chain_id(&self) -> Result<Option<u64>, StoreError> {
        let inner = self.0.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner.readers.get()?;
            Ok(kv::get_int(&conn, KEY_EVM_CHAIN_ID)?.map(|v| v as u64))
        })
        .await
        .expect("blocking task panicked")
    }

    pub async fn set_last_known_head(&self, head: u64) -> Result<(), StoreError> {
        let inner = self.0.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner.writer.lock().expect("store writer mutex poisoned");
            kv::set_int(&conn, KEY_LAST_KNOWN_HEAD, head as i64)
        })
        .await
        .expect("blocking task panicked")
    }

    pub async fn get_last_known_head(&self) -> Result<Option<u64>, StoreError> {
        let inner = self.0.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner.readers.get()?;
            Ok(kv::get_int(&conn, KEY_LAST_KNOWN_HEAD)?.map(|v| v as u64))
        })
        .await
        .expect("blocking task panicked")
    }

    /// Returns the maximum stored block number, or `-1` if the store is empty.
    pub async fn get_last_stored_block(&self) -> Result<i64, StoreError> {
        let inner = self.0.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner.readers.get()?;
            let max: Option<i64> =
                conn.query_row("SELECT MAX(number) FROM blocks", [], |row| row.get(0))?;
            Ok(max.unwrap_or(-1))
        })
        .await
        .expect("blocking task panicked")
    }

    /// Append `batch` atomically. `batch` must be contiguous and start at
    /// `last_stored + 1`; every block's transactions must carry traces iff
    /// the store was opened with `has_debug = true`.
    pub async fn store_blocks(&self, batch: Vec<BlockToStore>) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let has_debug = self.0.has_debug;
        for block in &batch {
            for tx in &block.txs {
                match (has_debug, &tx.trace) {
                    (true, None) => return Err(StoreError::MissingTraces),
                    (false, Some(_)) => return Err(StoreError::UnexpectedTraces),
                    _ => {}
                }
                if tx.tx.tx_index as usize >= 1 << 16 {
                    return Err(StoreError::TooManyTransactions {
                        number: block.block.number,
                        index: tx.tx.tx_index as usize,
                    });
                }
            }
        }

        let inner = self.0.clone();
        let timer = store_metrics::time_write(&self.0.chain.clone());
        let result = tokio::task::spawn_blocking(move || -> Result<(), StoreError> {
            let mut conn = inner.writer.lock().expect("store writer mutex poisoned");
            let last: i64 =
                conn.query_row("SELECT IFNULL(MAX(number), -1) FROM blocks", [], |row| row.get(0))?;
            let mut expected = (last + 1) as u64;

            let txn = conn.transaction()?;
            for block in &batch {
                if block.block.number != expected {
                    return Err(StoreError::NonContiguousAppend { expected, got: block.block.number });
                }
                expected += 1;

                let encoded_block = compress(&encode_block(&block.block))?;
                txn.execute(
                    "INSERT INTO blocks (number, hash, encoded_block, codec_tag) VALUES (?1, ?2, ?3, ?4)",
                    rusqlite::params![
                        block.block.number,
                        &block.block.hash[..],
                        encoded_block,
                        CODEC_TAG
                    ],
                )?;

                for tx in &block.txs {
                    let num = tx_num(block.block.number, tx.tx.tx_index);
                    let encoded_tx = compress(&encode_tx(&tx.tx))?;
                    let encoded_trace = tx
                        .trace
                        .as_ref()
                        .map(|t| compress(&encode_call_frame(t)))
                        .transpose()?;
                    txn.execute(
                        "INSERT INTO txs (tx_num, hash, encoded_tx, encoded_trace, codec_tag)
                         VALUES (?1, ?2, ?3, ?4, ?5)",
                        rusqlite::params![num, &tx.tx.hash[..], encoded_tx, encoded_trace, CODEC_TAG],
                    )?;
                }
            }
            txn.commit()?;
            Ok(())
        })
        .await
        .expect("blocking task panicked");

        store_metrics::record_write(result.is_ok());
        drop(timer);
        result
    }

    fn decode_block_row(tag: i64, bytes: &[u8]) -> Result<BlockRecord, StoreError> {
        if tag != CODEC_TAG {
            return Err(StoreError::UnknownStoredTag { tag });
        }
        Ok(decode_block(&decompress(bytes)?)?)
    }

    fn decode_tx_row(tag: i64, bytes: &[u8], trace_bytes: Option<&[u8]>) -> Result<StoredTx, StoreError> {
        if tag != CODEC_TAG {
            return Err(StoreError::UnknownStoredTag { tag });
        }
        let tx = decode_tx(&decompress(bytes)?)?;
        let trace = trace_bytes.map(decompress).transpose()?.map(|b| decode_call_frame(&b)).transpose()?;
        Ok(StoredTx { tx, trace })
    }

    fn txs_for_block(conn: &Connection, number: u64) -> Result<Vec<StoredTx>, StoreError> {
        let lo = number << 16;
        let hi = lo | 0xFFFF;
        let mut stmt = conn.prepare(
            "SELECT codec_tag, encoded_tx, encoded_trace FROM txs
             WHERE tx_num BETWEEN ?1 AND ?2 ORDER BY tx_num",
        )?;
        let rows = stmt.query_map(rusqlite::params![lo, hi], |row| {
            let tag: i64 = row.get(0)?;
            let tx_bytes: Vec<u8> = row.get(1)?;
            let trace_bytes: Option<Vec<u8>> = row.get(2)?;
            Ok((tag, tx_bytes, trace_bytes))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (tag, tx_bytes, trace_bytes) = row?;
            out.push(Self::decode_tx_row(tag, &tx_bytes, trace_bytes.as_deref())?);
        }
        Ok(out)
    }

    /// Sequential range of blocks (inclusive) with their transactions and,
    /// if enabled, traces.
    pub async fn get_blocks(&self, from: u64, to: u64) -> Result<Vec<StoredBlock>, StoreError> {
        let inner = self.0.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner.readers.get()?;
            let mut stmt = conn.prepare(
                "SELECT number, codec_tag, encoded_block FROM blocks
                 WHERE number BETWEEN ?1 AND ?2 ORDER BY number",
            )?;
            let rows = stmt.query_map(rusqlite::params![from, to], |row| {
                let number: u64 = row.get(0)?;
                let tag: i64 = row.get(1)?;
                let bytes: Vec<u8> = row.get(2)?;
                Ok((number, tag, bytes))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (number, tag, bytes) = row?;
                let block = Self::decode_block_row(tag, &bytes)?;
                let txs = Self::txs_for_block(&conn, number)?;
                out.push(StoredBlock { block, txs });
            }
            Ok(out)
        })
        .await
        .expect("blocking task panicked")
    }

    /// Next `<= limit` transactions strictly after `gt_tx_num`, in `tx_num`
    /// order. `gt_tx_num` is `i64` so a fresh checkpoint (`-1`, mirroring
    /// [`BlockStore::get_last_stored_block`]'s empty-store sentinel) can
    /// request starting from `tx_num = 0` inclusive. The indexer runtime's
    /// primary streaming interface.
    pub async fn get_tx_batch(&self, gt_tx_num: i64, limit: u32) -> Result<Vec<StoredTx>, StoreError> {
        let inner = self.0.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner.readers.get()?;
            let mut stmt = conn.prepare(
                "SELECT codec_tag, encoded_tx, encoded_trace FROM txs
                 WHERE tx_num > ?1 ORDER BY tx_num LIMIT ?2",
            )?;
            let rows = stmt.query_map(rusqlite::params![gt_tx_num, limit], |row| {
                let tag: i64 = row.get(0)?;
                let tx_bytes: Vec<u8> = row.get(1)?;
                let trace_bytes: Option<Vec<u8>> = row.get(2)?;
                Ok((tag, tx_bytes, trace_bytes))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (tag, tx_bytes, trace_bytes) = row?;
                out.push(Self::decode_tx_row(tag, &tx_bytes, trace_bytes.as_deref())?);
            }
            Ok(out)
        })
        .await
        .expect("blocking task panicked")
    }

    /// Highest `tx_num + 1` stored, or `0` if the store holds no transactions.
    pub async fn get_tx_count(&self) -> Result<u64, StoreError> {
        let inner = self.0.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner.readers.get()?;
            let max: Option<i64> =
                conn.query_row("SELECT MAX(tx_num) FROM txs", [], |row| row.get(0))?;
            Ok(max.map(|v| v as u64 + 1).unwrap_or(0))
        })
        .await
        .expect("blocking task panicked")
    }

    /// Random-access lookup of a block and its transactions, by number or hash.
    pub async fn get_block_with_transactions(&self, id: BlockId) -> Result<Option<StoredBlock>, StoreError> {
        let inner = self.0.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner.readers.get()?;
            let row: Option<(u64, i64, Vec<u8>)> = match id {
                BlockId::Number(n) => conn
                    .query_row(
                        "SELECT number, codec_tag, encoded_block FROM blocks WHERE number = ?1",
                        [n],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?,
                BlockId::Hash(h) => conn
                    .query_row(
                        "SELECT number, codec_tag, encoded_block FROM blocks WHERE hash = ?1",
                        [&h[..]],
                        |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                    )
                    .optional()?,
            };
            match row {
                None => Ok(None),
                Some((number, tag, bytes)) => {
                    let block = Self::decode_block_row(tag, &bytes)?;
                    let txs = Self::txs_for_block(&conn, number)?;
                    Ok(Some(StoredBlock { block, txs }))
                }
            }
        })
        .await
        .expect("blocking task panicked")
    }

    /// Random-access lookup of a single transaction (and its trace) by hash.
    pub async fn get_tx_receipt(&self, hash: [u8; 32]) -> Result<Option<StoredTx>, StoreError> {
        let inner = self.0.clone();
        tokio::task::spawn_blocking(move || {
            let conn = inner.readers.get()?;
            let row: Option<(i64, Vec<u8>, Option<Vec<u8>>)> = conn
                .query_row(
                    "SELECT codec_tag, encoded_tx, encoded_trace FROM txs WHERE hash = ?1",
                    [&hash[..]],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
                .optional()?;
            match row {
                None => Ok(None),
                Some((tag, tx_bytes, trace_bytes)) => {
                    Ok(Some(Self::decode_tx_row(tag, &tx_bytes, trace_bytes.as_deref())?))
                }
            }
        })
        .await
        .expect("blocking task panicked")
    }

    /// All call traces for a block's transactions, in `tx_num` order. Empty
    /// when the store was not opened with `has_debug`.
    pub async fn get_block_traces(&self, number: u64) -> Result<Vec<CallFrame>, StoreError> {
        if !self.0.has_debug {
            return Ok(Vec::new());
        }
        let txs = self.get_blocks(number, number).await?;
        Ok(txs
            .into_iter()
            .flat_map(|b| b.txs)
            .filter_map(|tx| tx.trace)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CallType;
    use bytes::Bytes;

    fn block(number: u64, tx_count: u32) -> BlockRecord {
        BlockRecord {
            number,
            hash: [number as u8; 32],
            parent_hash: [0u8; 32],
            miner: [0xaa; 20],
            timestamp: 1_700_000_000 + number,
            gas_used: 21_000 * tx_count as u128,
            gas_limit: 30_000_000,
            base_fee_per_gas: Some(1_000_000_000),
            blob_gas_used: None,
            excess_blob_gas: None,
            parent_beacon_block_root: None,
            tx_count,
        }
    }

    fn tx(block_number: u64, tx_index: u32) -> TxRecord {
        TxRecord {
            hash: [tx_index as u8 + 1; 32],
            block_number,
            tx_index,
            from: [0x11; 20],
            to: Some([0x22; 20]),
            value: 100,
            nonce: tx_index as u64,
            gas: 21_000,
            gas_price: Some(1_000_000_000),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            input: Bytes::new(),
            tx_type: 0,
            chain_id: Some(1),
            block_timestamp: 1_700_000_000 + block_number,
            status: true,
            gas_used: 21_000,
            cumulative_gas_used: 21_000 * (tx_index as u128 + 1),
            effective_gas_price: 1_000_000_000,
            contract_address: None,
            logs: Vec::new(),
        }
    }

    fn trace() -> CallFrame {
        CallFrame {
            call_type: CallType::Call,
            from: [0x11; 20],
            to: Some([0x22; 20]),
            value: Some(100),
            gas: 21_000,
            gas_used: 21_000,
            input: Bytes::new(),
            output: Some(Bytes::new()),
            error: None,
            calls: None,
        }
    }

    async fn open_store(dir: &tempfile::TempDir, has_debug: bool) -> BlockStore {
        BlockStore::open(dir.path().join("test.db"), "testchain", has_debug).unwrap()
    }

    #[tokio::test]
    async fn empty_store_reports_last_stored_block_negative_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, false).await;
        assert_eq!(store.get_last_stored_block().await.unwrap(), -1);
        assert_eq!(store.get_tx_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn stores_and_retrieves_a_block_with_two_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, false).await;

        let batch = vec![BlockToStore {
            block: block(0, 2),
            txs: vec![
                TxToStore { tx: tx(0, 0), trace: None },
                TxToStore { tx: tx(0, 1), trace: None },
            ],
        }];
        store.store_blocks(batch).await.unwrap();

        assert_eq!(store.get_last_stored_block().await.unwrap(), 0);
        assert_eq!(store.get_tx_count().await.unwrap(), 2);

        let got = store.get_block_with_transactions(BlockId::Number(0)).await.unwrap().unwrap();
        assert_eq!(got.block.number, 0);
        assert_eq!(got.txs.len(), 2);
        assert_eq!(got.txs[0].tx.tx_index, 0);
        assert_eq!(got.txs[1].tx.tx_index, 1);
    }

    #[tokio::test]
    async fn rejects_non_contiguous_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, false).await;

        let batch = vec![BlockToStore { block: block(5, 0), txs: vec![] }];
        let err = store.store_blocks(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::NonContiguousAppend { expected: 0, got: 5 }));
    }

    #[tokio::test]
    async fn rejects_traces_when_store_opened_without_debug() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, false).await;

        let batch = vec![BlockToStore {
            block: block(0, 1),
            txs: vec![TxToStore { tx: tx(0, 0), trace: Some(trace()) }],
        }];
        let err = store.store_blocks(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::UnexpectedTraces));
    }

    #[tokio::test]
    async fn round_trips_traces_when_debug_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, true).await;

        let batch = vec![BlockToStore {
            block: block(0, 1),
            txs: vec![TxToStore { tx: tx(0, 0), trace: Some(trace()) }],
        }];
        store.store_blocks(batch).await.unwrap();

        let traces = store.get_block_traces(0).await.unwrap();
        assert_eq!(traces.len(), 1);
        assert_eq!(traces[0], trace());
    }

    #[tokio::test]
    async fn reopening_with_a_different_has_debug_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.db");
        BlockStore::open(&path, "testchain", false).unwrap();
        let err = BlockStore::open(&path, "testchain", true).unwrap_err();
        assert!(matches!(err, StoreError::HasDebugMismatch { stored: false, requested: true }));
    }

    #[tokio::test]
    async fn get_tx_batch_streams_in_tx_num_order_across_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, false).await;

        store
            .store_blocks(vec![BlockToStore {
                block: block(0, 1),
                txs: vec![TxToStore { tx: tx(0, 0), trace: None }],
            }])
            .await
            .unwrap();
        store
            .store_blocks(vec![BlockToStore {
                block: block(1, 2),
                txs: vec![
                    TxToStore { tx: tx(1, 0), trace: None },
                    TxToStore { tx: tx(1, 1), trace: None },
                ],
            }])
            .await
            .unwrap();

        let first = store.get_tx_batch(0, 10).await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].tx.block_number, 1);
        assert_eq!(first[0].tx.tx_index, 0);

        let limited = store.get_tx_batch(0, 1).await.unwrap();
        assert_eq!(limited.len(), 1);
    }
}
