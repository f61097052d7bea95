//! Block Harvester (§4.D): turns a list of block numbers into self-contained
//! [`store::BlockToStore`] units via a three-stage RPC protocol (blocks,
//! then receipts, then optionally traces), with strict cross-stage
//! consistency checking.

use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Value};
use tracing::{info_span, warn, Instrument};

use crate::codec::{BlockRecord, CallFrame, CallType, Log, TxRecord};
use crate::error::HarvesterError;
use crate::rpc::{BatchCall, BatchSizer, Dispatcher, RpcTransport};
use crate::store::{BlockToStore, TxToStore};

/// Whether block 0 is traced normally or hardcoded to an empty trace (the
/// Avalanche C-Chain family convention — genesis pre-funds accounts outside
/// of ordinary transactions, so `debug_traceBlockByNumber(0, ...)` either
/// errors or returns nothing useful).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockZeroTracePolicy {
    #[default]
    EmptyTraces,
    Disabled,
}

pub struct Harvester {
    transport: Arc<RpcTransport>,
    dispatcher: Arc<Dispatcher>,
    sizer: Arc<BatchSizer>,
    debug_tracing: bool,
    block_zero_trace_policy: BlockZeroTracePolicy,
}

impl Harvester {
    pub fn new(
        transport: Arc<RpcTransport>,
        dispatcher: Arc<Dispatcher>,
        sizer: Arc<BatchSizer>,
        debug_tracing: bool,
        block_zero_trace_policy: BlockZeroTracePolicy,
    ) -> Self {
        Self { transport, dispatcher, sizer, debug_tracing, block_zero_trace_policy }
    }

    /// Fetch and assemble `numbers` into stored blocks, ascending by number.
    /// Missing/error-returned blocks are dropped; any other failure fails
    /// the whole call.
    pub async fn harvest(&self, numbers: &[u64]) -> Result<Vec<BlockToStore>, HarvesterError> {
        if numbers.is_empty() {
            return Ok(Vec::new());
        }

        let span = info_span!("harvest", from = numbers[0], to = numbers[numbers.len() - 1], count = numbers.len());
        async move {
            let mut blocks = self.fetch_blocks(numbers).await?;
            blocks.sort_by_key(|b| b.number);

            let receipts = self.fetch_receipts(&blocks).await?;
            let mut built = self.assemble(blocks, receipts)?;

            if self.debug_tracing {
                self.attach_traces(&mut built).await?;
            }

            Ok(built)
        }
        .instrument(span)
        .await
    }

    async fn run_batched<T>(
        &self,
        method: &'static str,
        calls: Vec<BatchCall<T>>,
    ) -> Result<Vec<(T, Result<Value, ()>)>, HarvesterError>
    where
        T: Clone + Send + 'static,
    {
        let base_size = self.sizer.current().max(1) as usize;
        let mut out = Vec::with_capacity(calls.len());

        for chunk in calls.chunks(base_size.max(1)) {
            let chunk: Vec<BatchCall<T>> =
                chunk.iter().map(|c| BatchCall { method: c.method, params: c.params.clone(), tag: c.tag.clone() }).collect();
            let transport = Arc::clone(&self.transport);
            let results = self
                .dispatcher
                .dispatch(|| async move { transport.send_batch(method, chunk).await })
                .await?;

            for r in results {
                match &r.outcome {
                    Ok(_) => self.sizer.record_success(),
                    Err(_) => self.sizer.record_error(),
                }
                out.push((r.tag, r.outcome.map_err(|_| ())));
            }
        }

        Ok(out)
    }

    async fn fetch_blocks(&self, numbers: &[u64]) -> Result<Vec<ParsedBlock>, HarvesterError> {
        let calls: Vec<BatchCall<u64>> = numbers
            .iter()
            .map(|&n| BatchCall {
                method: "eth_getBlockByNumber",
                params: json!([format!("0x{:x}", n), true]),
                tag: n,
            })
            .collect();

        let results = self.run_batched::<u64>("eth_getBlockByNumber", calls).await?;

        let mut blocks = Vec::new();
        for (number, outcome) in results {
            match outcome {
                Err(()) => warn!(number, "block fetch returned an error, dropping"),
                Ok(Value::Null) => warn!(number, "block not found, dropping"),
                Ok(value) => blocks.push(parse_block(&value)?),
            }
        }

        self.refetch_hash_only_txs(&mut blocks).await?;
        Ok(blocks)
    }

    /// Fills in any hash-only placeholders `parse_block` left behind with a
    /// follow-up `eth_getTransactionByHash` batch, one call per distinct tx.
    async fn refetch_hash_only_txs(&self, blocks: &mut [ParsedBlock]) -> Result<(), HarvesterError> {
        let mut targets = Vec::new();
        for (block_idx, block) in blocks.iter().enumerate() {
            for (tx_idx, tx) in block.txs.iter().enumerate() {
                if tx.needs_refetch {
                    targets.push((block_idx, tx_idx, tx.hash));
                }
            }
        }
        if targets.is_empty() {
            return Ok(());
        }

        let calls: Vec<BatchCall<[u8; 32]>> = targets
            .iter()
            .map(|&(_, _, hash)| BatchCall {
                method: "eth_getTransactionByHash",
                params: json!([format!("0x{}", hex::encode(hash))]),
                tag: hash,
            })
            .collect();

        let results = self.run_batched::<[u8; 32]>("eth_getTransactionByHash", calls).await?;
        let mut by_hash = std::collections::HashMap::with_capacity(results.len());
        for (hash, outcome) in results {
            match outcome {
                Err(()) | Ok(Value::Null) => {
                    return Err(HarvesterError::MalformedTransaction {
                        number: 0,
                        reason: format!("hash-only transaction 0x{} could not be refetched", hex::encode(hash)),
                    });
                }
                Ok(value) => {
                    by_hash.insert(hash, value);
                }
            }
        }

        for (block_idx, tx_idx, hash) in targets {
            let block_number = blocks[block_idx].number;
            let value = by_hash.get(&hash).expect("every target hash was requested above");
            let full = parse_tx(value, block_number, tx_idx as u32)
                .map_err(|reason| HarvesterError::MalformedTransaction { number: block_number, reason })?;
            blocks[block_idx].txs[tx_idx] = full;
        }
        Ok(())
    }

    async fn fetch_receipts(
        &self,
        blocks: &[ParsedBlock],
    ) -> Result<std::collections::HashMap<[u8; 32], Value>, HarvesterError> {
        let mut hashes = Vec::new();
        for block in blocks {
            for tx in &block.txs {
                hashes.push(tx.hash);
            }
        }

        let calls: Vec<BatchCall<[u8; 32]>> = hashes
            .iter()
            .map(|&h| BatchCall {
                method: "eth_getTransactionReceipt",
                params: json!([format!("0x{}", hex::encode(h))]),
                tag: h,
            })
            .collect();

        let results =
            self.run_batched::<[u8; 32]>("eth_getTransactionReceipt", calls).await?;

        let mut receipts = std::collections::HashMap::with_capacity(results.len());
        for (hash, outcome) in results {
            match outcome {
                Err(()) | Ok(Value::Null) => {
                    return Err(HarvesterError::MalformedTransaction {
                        number: 0,
                        reason: format!("receipt for tx 0x{} could not be fetched", hex::encode(hash)),
                    });
                }
                Ok(value) => {
                    receipts.insert(hash, value);
                }
            }
        }
        Ok(receipts)
    }

    fn assemble(
        &self,
        blocks: Vec<ParsedBlock>,
        receipts: std::collections::HashMap<[u8; 32], Value>,
    ) -> Result<Vec<BlockToStore>, HarvesterError> {
        let mut out = Vec::with_capacity(blocks.len());
        for block in blocks {
            let expected = block.txs.len();
            let mut tx_to_store = Vec::with_capacity(expected);
            for partial_tx in &block.txs {
                let receipt = receipts.get(&partial_tx.hash).ok_or_else(|| HarvesterError::MalformedTransaction {
                    number: block.number,
                    reason: format!("missing receipt for tx 0x{}", hex::encode(partial_tx.hash)),
                })?;
                let tx = build_tx_record(partial_tx, receipt, block.timestamp)
                    .map_err(|reason| HarvesterError::MalformedTransaction { number: block.number, reason })?;
                tx_to_store.push(TxToStore { tx, trace: None });
            }

            if tx_to_store.len() != expected {
                return Err(HarvesterError::ReceiptCountMismatch {
                    number: block.number,
                    expected,
                    actual: tx_to_store.len(),
                });
            }

            out.push(BlockToStore {
                block: BlockRecord {
                    number: block.number,
                    hash: block.hash,
                    parent_hash: block.parent_hash,
                    miner: block.miner,
                    timestamp: block.timestamp,
                    gas_used: block.gas_used,
                    gas_limit: block.gas_limit,
                    base_fee_per_gas: block.base_fee_per_gas,
                    blob_gas_used: block.blob_gas_used,
                    excess_blob_gas: block.excess_blob_gas,
                    parent_beacon_block_root: block.parent_beacon_block_root,
                    tx_count: tx_to_store.len() as u32,
                },
                txs: tx_to_store,
            });
        }
        Ok(out)
    }

    async fn attach_traces(&self, blocks: &mut [BlockToStore]) -> Result<(), HarvesterError> {
        let mut traced_numbers = Vec::new();
        for block in blocks.iter() {
            let skip_zero = block.block.number == 0 && self.block_zero_trace_policy == BlockZeroTracePolicy::EmptyTraces;
            if !skip_zero {
                traced_numbers.push(block.block.number);
            }
        }

        let calls: Vec<BatchCall<u64>> = traced_numbers
            .iter()
            .map(|&n| BatchCall {
                method: "debug_traceBlockByNumber",
                params: json!([format!("0x{:x}", n), {"tracer": "callTracer", "timeout": "20s"}]),
                tag: n,
            })
            .collect();

        let results =
            self.run_batched::<u64>("debug_traceBlockByNumber", calls).await?;

        let mut traces_by_block: std::collections::HashMap<u64, Value> = std::collections::HashMap::new();
        for (number, outcome) in results {
            match outcome {
                Err(()) => return Err(HarvesterError::MissingTraces { number }),
                Ok(value) => {
                    traces_by_block.insert(number, value);
                }
            }
        }

        for block in blocks.iter_mut() {
            let number = block.block.number;
            let skip_zero = number == 0 && self.block_zero_trace_policy == BlockZeroTracePolicy::EmptyTraces;
            if skip_zero {
                for tx in block.txs.iter_mut() {
                    tx.trace = Some(empty_call_frame());
                }
                continue;
            }

            let trace_array = traces_by_block
                .get(&number)
                .and_then(Value::as_array)
                .ok_or(HarvesterError::MissingTraces { number })?;

            if trace_array.len() != block.txs.len() {
                return Err(HarvesterError::ReceiptCountMismatch {
                    number,
                    expected: block.txs.len(),
                    actual: trace_array.len(),
                });
            }

            for (tx, entry) in block.txs.iter_mut().zip(trace_array.iter()) {
                let frame_json = entry.get("result").unwrap_or(entry);
                tx.trace = Some(
                    parse_call_frame(frame_json)
                        .map_err(|reason| HarvesterError::MalformedTransaction { number, reason })?,
                );
            }
        }

        Ok(())
    }
}

fn empty_call_frame() -> CallFrame {
    CallFrame {
        call_type: CallType::Call,
        from: [0u8; 20],
        to: None,
        value: None,
        gas: 0,
        gas_used: 0,
        input: Bytes::new(),
        output: None,
        error: None,
        calls: None,
    }
}

struct ParsedBlock {
    number: u64,
    hash: [u8; 32],
    parent_hash: [u8; 32],
    miner: [u8; 20],
    timestamp: u64,
    gas_used: u128,
    gas_limit: u128,
    base_fee_per_gas: Option<u128>,
    blob_gas_used: Option<u64>,
    excess_blob_gas: Option<u64>,
    parent_beacon_block_root: Option<[u8; 32]>,
    txs: Vec<ParsedTx>,
}

struct ParsedTx {
    hash: [u8; 32],
    from: [u8; 20],
    to: Option<[u8; 20]>,
    value: u128,
    nonce: u64,
    gas: u128,
    gas_price: Option<u128>,
    max_fee_per_gas: Option<u128>,
    max_priority_fee_per_gas: Option<u128>,
    input: Bytes,
    tx_type: u8,
    chain_id: Option<u64>,
    tx_index: u32,
    block_number: u64,
    /// Set when this entry came from a bare hash string in the block's
    /// `transactions` array; every other field is a zero placeholder until
    /// `refetch_hash_only_txs` overwrites it.
    needs_refetch: bool,
}

fn hex_str(v: &Value) -> Option<&str> {
    v.as_str().map(|s| s.trim_start_matches("0x")).filter(|s| !s.is_empty() || v.as_str() == Some("0x"))
}

fn parse_hex_u128(v: &Value) -> Result<u128, String> {
    match v.as_str() {
        None => Ok(0),
        Some("0x") | Some("") => Ok(0),
        Some(s) => u128::from_str_radix(s.trim_start_matches("0x"), 16)
            .map_err(|e| format!("invalid hex integer {s}: {e}")),
    }
}

fn parse_hex_u64(v: &Value) -> Result<u64, String> {
    parse_hex_u128(v).map(|v| v as u64)
}

fn parse_opt_hex_u128(v: Option<&Value>) -> Result<Option<u128>, String> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(v) => Ok(Some(parse_hex_u128(v)?)),
    }
}

fn parse_hex_bytes(v: &Value, expected_len: Option<usize>) -> Result<Vec<u8>, String> {
    let s = hex_str(v).ok_or_else(|| format!("expected hex string, got {v}"))?;
    let bytes = hex::decode(s).map_err(|e| format!("invalid hex bytes: {e}"))?;
    if let Some(len) = expected_len {
        if bytes.len() != len {
            return Err(format!("expected {len} bytes, got {}", bytes.len()));
        }
    }
    Ok(bytes)
}

fn parse_addr(v: &Value) -> Result<[u8; 20], String> {
    let bytes = parse_hex_bytes(v, Some(20))?;
    let mut out = [0u8; 20];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn parse_opt_addr(v: Option<&Value>) -> Result<Option<[u8; 20]>, String> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(v) => Ok(Some(parse_addr(v)?)),
    }
}

fn parse_hash(v: &Value) -> Result<[u8; 32], String> {
    let bytes = parse_hex_bytes(v, Some(32))?;
    let mut out = [0u8; 32];
    out.copy_from_slice(&bytes);
    Ok(out)
}

fn parse_opt_hash(v: Option<&Value>) -> Result<Option<[u8; 32]>, String> {
    match v {
        None | Some(Value::Null) => Ok(None),
        Some(v) => Ok(Some(parse_hash(v)?)),
    }
}

fn parse_block(value: &Value) -> Result<ParsedBlock, HarvesterError> {
    (|| -> Result<ParsedBlock, String> {
        let number = parse_hex_u64(value.get("number").ok_or("missing number")?)?;
        let hash = parse_hash(value.get("hash").ok_or("missing hash")?)?;
        let parent_hash = parse_hash(value.get("parentHash").ok_or("missing parentHash")?)?;
        let miner = parse_addr(value.get("miner").ok_or("missing miner")?)?;
        let timestamp = parse_hex_u64(value.get("timestamp").ok_or("missing timestamp")?)?;
        let gas_used = parse_hex_u128(value.get("gasUsed").ok_or("missing gasUsed")?)?;
        let gas_limit = parse_hex_u128(value.get("gasLimit").ok_or("missing gasLimit")?)?;
        let base_fee_per_gas = parse_opt_hex_u128(value.get("baseFeePerGas"))?;
        let blob_gas_used = parse_opt_hex_u128(value.get("blobGasUsed"))?.map(|v| v as u64);
        let excess_blob_gas = parse_opt_hex_u128(value.get("excessBlobGas"))?.map(|v| v as u64);
        let parent_beacon_block_root = parse_opt_hash(value.get("parentBeaconBlockRoot"))?;

        let tx_values = value.get("transactions").and_then(Value::as_array).ok_or("missing transactions")?;
        let mut txs = Vec::with_capacity(tx_values.len());
        for (idx, tx_value) in tx_values.iter().enumerate() {
            // Some RPCs return bare hash strings instead of full transaction
            // objects even with `full_transactions = true`. Leave a
            // hash-only placeholder here; `refetch_hash_only_txs` fills it
            // in with a follow-up `eth_getTransactionByHash` batch.
            if tx_value.is_string() {
                let hash = parse_hash(tx_value)?;
                txs.push(ParsedTx {
                    hash,
                    from: [0u8; 20],
                    to: None,
                    value: 0,
                    nonce: 0,
                    gas: 0,
                    gas_price: None,
                    max_fee_per_gas: None,
                    max_priority_fee_per_gas: None,
                    input: Bytes::new(),
                    tx_type: 0,
                    chain_id: None,
                    tx_index: idx as u32,
                    block_number: number,
                    needs_refetch: true,
                });
                continue;
            }
            txs.push(parse_tx(tx_value, number, idx as u32)?);
        }

        Ok(ParsedBlock {
            number,
            hash,
            parent_hash,
            miner,
            timestamp,
            gas_used,
            gas_limit,
            base_fee_per_gas,
            blob_gas_used,
            excess_blob_gas,
            parent_beacon_block_root,
            txs,
        })
    })()
    .map_err(|reason| HarvesterError::MalformedTransaction { number: 0, reason })
}

fn parse_tx(value: &Value, block_number: u64, tx_index: u32) -> Result<ParsedTx, String> {
    let hash = parse_hash(value.get("hash").ok_or("missing tx hash")?)?;
    let from = parse_addr(value.get("from").ok_or("missing tx from")?)?;
    let to = parse_opt_addr(value.get("to"))?;
    let value_wei = parse_opt_hex_u128(value.get("value"))?.unwrap_or(0);
    let nonce = parse_hex_u64(value.get("nonce").ok_or("missing tx nonce")?)?;
    let gas = parse_hex_u128(value.get("gas").ok_or("missing tx gas")?)?;
    let gas_price = parse_opt_hex_u128(value.get("gasPrice"))?;
    let max_fee_per_gas = parse_opt_hex_u128(value.get("maxFeePerGas"))?;
    let max_priority_fee_per_gas = parse_opt_hex_u128(value.get("maxPriorityFeePerGas"))?;
    let input = value
        .get("input")
        .or_else(|| value.get("data"))
        .map(|v| parse_hex_bytes(v, None))
        .transpose()?
        .unwrap_or_default();
    let tx_type = parse_opt_hex_u128(value.get("type"))?.unwrap_or(0) as u8;
    let chain_id = parse_opt_hex_u128(value.get("chainId"))?.map(|v| v as u64);

    Ok(ParsedTx {
        hash,
        from,
        to,
        value: value_wei,
        nonce,
        gas,
        gas_price,
        max_fee_per_gas,
        max_priority_fee_per_gas,
        input: Bytes::from(input),
        tx_type,
        chain_id,
        tx_index,
        block_number,
        needs_refetch: false,
    })
}

fn build_tx_record(tx: &ParsedTx, receipt: &Value, block_timestamp: u64) -> Result<TxRecord, String> {
    let status = match receipt.get("status") {
        Some(v) => parse_opt_hex_u128(Some(v))?.unwrap_or(1) != 0,
        None => true,
    };
    let gas_used = parse_hex_u128(receipt.get("gasUsed").ok_or("receipt missing gasUsed")?)?;
    let cumulative_gas_used =
        parse_hex_u128(receipt.get("cumulativeGasUsed").ok_or("receipt missing cumulativeGasUsed")?)?;
    let effective_gas_price = parse_opt_hex_u128(receipt.get("effectiveGasPrice"))?.unwrap_or(0);
    let contract_address = parse_opt_addr(receipt.get("contractAddress"))?;

    let logs_values = receipt.get("logs").and_then(Value::as_array).cloned().unwrap_or_default();
    let mut logs = Vec::with_capacity(logs_values.len());
    for log_value in &logs_values {
        logs.push(parse_log(log_value)?);
    }

    Ok(TxRecord {
        hash: tx.hash,
        block_number: tx.block_number,
        tx_index: tx.tx_index,
        from: tx.from,
        to: tx.to,
        value: tx.value,
        nonce: tx.nonce,
        gas: tx.gas,
        gas_price: tx.gas_price,
        max_fee_per_gas: tx.max_fee_per_gas,
        max_priority_fee_per_gas: tx.max_priority_fee_per_gas,
        input: tx.input.clone(),
        tx_type: tx.tx_type,
        chain_id: tx.chain_id,
        block_timestamp,
        status,
        gas_used,
        cumulative_gas_used,
        effective_gas_price,
        contract_address,
        logs,
    })
}

fn parse_log(value: &Value) -> Result<Log, String> {
    let address = parse_addr(value.get("address").ok_or("log missing address")?)?;
    let topics_values = value.get("topics").and_then(Value::as_array).ok_or("log missing topics")?;
    let mut topics = Vec::with_capacity(topics_values.len());
    for t in topics_values {
        topics.push(parse_hash(t)?);
    }
    let data = parse_hex_bytes(value.get("data").ok_or("log missing data")?, None)?;
    let log_index = parse_hex_u64(value.get("logIndex").ok_or("log missing logIndex")?)?;
    let removed = value.get("removed").and_then(Value::as_bool).unwrap_or(false);

    Ok(Log { address, topics, data: Bytes::from(data), log_index, removed })
}

fn parse_call_frame(value: &Value) -> Result<CallFrame, String> {
    let call_type_str = value.get("type").and_then(Value::as_str).ok_or("call frame missing type")?;
    let call_type =
        CallType::from_tracer_str(call_type_str).map_err(|_| format!("unknown call type {call_type_str}"))?;
    let from = parse_addr(value.get("from").ok_or("call frame missing from")?)?;
    let to = parse_opt_addr(value.get("to"))?;
    let value_wei = parse_opt_hex_u128(value.get("value"))?;
    let gas = parse_hex_u128(value.get("gas").ok_or("call frame missing gas")?)?;
    let gas_used = parse_hex_u128(value.get("gasUsed").ok_or("call frame missing gasUsed")?)?;
    let input = value
        .get("input")
        .map(|v| parse_hex_bytes(v, None))
        .transpose()?
        .unwrap_or_default();
    let output = value.get("output").map(|v| parse_hex_bytes(v, None)).transpose()?.map(Bytes::from);
    let error = value.get("error").and_then(Value::as_str).map(|s| s.to_string());

    let calls = match value.get("calls").and_then(Value::as_array) {
        None => None,
        Some(entries) => {
            let mut out = Vec::with_capacity(entries.len());
            for entry in entries {
                out.push(parse_call_frame(entry)?);
            }
            Some(out)
        }
    };

    Ok(CallFrame {
        call_type,
        from,
        to,
        value: value_wei,
        gas,
        gas_used,
        input: Bytes::from(input),
        output,
        error,
        calls,
    })
}

#[cfg(test)]
mod tests {
    use wiremock::{Mock, MockServer, Request, ResponseTemplate};

    use super::*;
    use crate::rpc::{BatchSizer, Dispatcher};

    fn body_contains(needle: &'static str) -> impl Fn(&Request) -> bool {
        move |req: &Request| String::from_utf8_lossy(&req.body).contains(needle)
    }

    fn test_harvester(uri: String) -> Harvester {
        Harvester::new(
            Arc::new(RpcTransport::new("testchain", uri)),
            Dispatcher::new(4, 1_000),
            BatchSizer::new(10),
            false,
            BlockZeroTracePolicy::EmptyTraces,
        )
    }

    fn block_json(hash_only_tx: &str, full_tx_hash: &str) -> Value {
        json!({
            "number": "0x1",
            "hash": format!("0x{}", "11".repeat(32)),
            "parentHash": format!("0x{}", "00".repeat(32)),
            "miner": format!("0x{}", "22".repeat(20)),
            "timestamp": "0x64b2c1e0",
            "gasUsed": "0x5208",
            "gasLimit": "0x1c9c380",
            "transactions": [hash_only_tx, full_tx(full_tx_hash)],
        })
    }

    fn full_tx(hash: &str) -> Value {
        json!({
            "hash": hash,
            "from": format!("0x{}", "33".repeat(20)),
            "to": format!("0x{}", "44".repeat(20)),
            "value": "0x0",
            "nonce": "0x1",
            "gas": "0x5208",
            "gasPrice": "0x3b9aca00",
            "input": "0x",
            "type": "0x0",
        })
    }

    fn receipt_json(hash: &str) -> Value {
        json!({
            "status": "0x1",
            "gasUsed": "0x5208",
            "cumulativeGasUsed": "0x5208",
            "effectiveGasPrice": "0x3b9aca00",
            "logs": [],
            "transactionHash": hash,
        })
    }

    /// A block whose `transactions` array mixes a full object with a bare
    /// hash string must still harvest cleanly: the hash-only entry is
    /// refetched by `eth_getTransactionByHash` rather than failing the batch.
    #[tokio::test]
    async fn harvests_blocks_with_hash_only_transactions() {
        let hash_only = format!("0x{}", "55".repeat(32));
        let full_hash = format!("0x{}", "66".repeat(32));

        let server = MockServer::start().await;

        Mock::given(body_contains("eth_getBlockByNumber"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"jsonrpc":"2.0","id":0,"result": block_json(&hash_only, &full_hash)},
            ])))
            .mount(&server)
            .await;

        Mock::given(body_contains("eth_getTransactionByHash"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"jsonrpc":"2.0","id":0,"result": full_tx(&hash_only)},
            ])))
            .mount(&server)
            .await;

        Mock::given(body_contains("eth_getTransactionReceipt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"jsonrpc":"2.0","id":0,"result": receipt_json(&hash_only)},
                {"jsonrpc":"2.0","id":1,"result": receipt_json(&full_hash)},
            ])))
            .mount(&server)
            .await;

        let harvester = test_harvester(server.uri());
        let blocks = harvester.harvest(&[1]).await.unwrap();

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].txs.len(), 2);
        let hashes: Vec<String> =
            blocks[0].txs.iter().map(|t| format!("0x{}", hex::encode(t.tx.hash))).collect();
        assert!(hashes.contains(&hash_only));
        assert!(hashes.contains(&full_hash));
    }
}
