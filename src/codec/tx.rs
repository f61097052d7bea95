//! Transaction + receipt records (§3, §4.E): a transaction, its receipt, and
//! the enclosing block's timestamp, stored as one self-contained unit keyed
//! by `tx_num`. `logs` is always present (even as an empty list — a
//! transaction with no events still has a receipt), so it uses
//! [`RlpListField`] purely as a convenient nested-list codec, never in its
//! `Absent` state.

use alloy_rlp::Decodable;
use bytes::Bytes;

use crate::error::CodecError;

use super::record::{
    decode_opt_u128, decode_u128, encode_opt_u128, encode_record_dyn, encode_u128, RawRecord,
    RlpField, RlpListField,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: [u8; 20],
    pub topics: Vec<[u8; 32]>,
    pub data: Bytes,
    pub log_index: u64,
    pub removed: bool,
}

const LOG_FIELD_COUNT: usize = 5;

fn encode_log(log: &Log) -> Vec<u8> {
    let address = RlpField::present(Bytes::copy_from_slice(&log.address));
    let topics_raw: Vec<Vec<u8>> = log.topics.iter().map(|t| t.to_vec()).collect();
    let topics = RlpListField::Present(Bytes::from(alloy_rlp::encode(&topics_raw)));
    let data = RlpField::present(log.data.clone());
    let log_index = encode_u128(log.log_index as u128);
    let removed = RlpField::present(Bytes::copy_from_slice(&[log.removed as u8]));

    encode_record_dyn(&[&address, &topics, &data, &log_index, &removed])
}

fn decode_log(data: &[u8]) -> Result<Log, CodecError> {
    let record = RawRecord::parse(data, LOG_FIELD_COUNT)?;

    let mut address = [0u8; 20];
    address.copy_from_slice(record.field(0)?.as_bytes()?);

    let mut topics_buf = record.field_raw(1)?;
    let topics_field = RlpListField::decode(&mut topics_buf)?;
    let topics = match topics_field {
        RlpListField::Absent => Vec::new(),
        RlpListField::Present(raw) => {
            let mut cursor = raw.as_ref();
            let raw_topics = Vec::<Vec<u8>>::decode(&mut cursor)?;
            raw_topics
                .into_iter()
                .map(|t| {
                    let mut arr = [0u8; 32];
                    arr.copy_from_slice(&t);
                    arr
                })
                .collect()
        }
    };

    let log_data = Bytes::copy_from_slice(record.field(2)?.as_bytes()?);
    let log_index = decode_u128(record.field(3)?)? as u64;
    let removed = record.field(4)?.as_bytes()?.first().copied().unwrap_or(0) != 0;

    Ok(Log { address, topics, data: log_data, log_index, removed })
}

const FIELD_COUNT: usize = 21;
const F_HASH: usize = 0;
const F_BLOCK_NUMBER: usize = 1;
const F_TX_INDEX: usize = 2;
const F_FROM: usize = 3;
const F_TO: usize = 4;
const F_VALUE: usize = 5;
const F_NONCE: usize = 6;
const F_GAS: usize = 7;
const F_GAS_PRICE: usize = 8;
const F_MAX_FEE_PER_GAS: usize = 9;
const F_MAX_PRIORITY_FEE_PER_GAS: usize = 10;
const F_INPUT: usize = 11;
const F_TX_TYPE: usize = 12;
const F_CHAIN_ID: usize = 13;
const F_BLOCK_TIMESTAMP: usize = 14;
const F_STATUS: usize = 15;
const F_GAS_USED: usize = 16;
const F_CUMULATIVE_GAS_USED: usize = 17;
const F_EFFECTIVE_GAS_PRICE: usize = 18;
const F_CONTRACT_ADDRESS: usize = 19;
const F_LOGS: usize = 20;

/// A transaction, its receipt, and its enclosing block's timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxRecord {
    pub hash: [u8; 32],
    pub block_number: u64,
    pub tx_index: u32,
    pub from: [u8; 20],
    pub to: Option<[u8; 20]>,
    pub value: u128,
    pub nonce: u64,
    pub gas: u128,
    pub gas_price: Option<u128>,
    pub max_fee_per_gas: Option<u128>,
    pub max_priority_fee_per_gas: Option<u128>,
    pub input: Bytes,
    pub tx_type: u8,
    pub chain_id: Option<u64>,
    pub block_timestamp: u64,
    pub status: bool,
    pub gas_used: u128,
    pub cumulative_gas_used: u128,
    pub effective_gas_price: u128,
    pub contract_address: Option<[u8; 20]>,
    pub logs: Vec<Log>,
}

pub fn encode_tx(tx: &TxRecord) -> Vec<u8> {
    let hash = RlpField::present(Bytes::copy_from_slice(&tx.hash));
    let block_number = encode_u128(tx.block_number as u128);
    let tx_index = encode_u128(tx.tx_index as u128);
    let from = RlpField::present(Bytes::copy_from_slice(&tx.from));
    let to = RlpField::from_option(tx.to.map(|a| Bytes::copy_from_slice(&a)));
    let value = encode_u128(tx.value);
    let nonce = encode_u128(tx.nonce as u128);
    let gas = encode_u128(tx.gas);
    let gas_price = encode_opt_u128(tx.gas_price);
    let max_fee_per_gas = encode_opt_u128(tx.max_fee_per_gas);
    let max_priority_fee_per_gas = encode_opt_u128(tx.max_priority_fee_per_gas);
    let input = RlpField::present(tx.input.clone());
    let tx_type = RlpField::present(Bytes::copy_from_slice(&[tx.tx_type]));
    let chain_id = encode_opt_u128(tx.chain_id.map(|v| v as u128));
    let block_timestamp = encode_u128(tx.block_timestamp as u128);
    let status = RlpField::present(Bytes::copy_from_slice(&[tx.status as u8]));
    let gas_used = encode_u128(tx.gas_used);
    let cumulative_gas_used = encode_u128(tx.cumulative_gas_used);
    let effective_gas_price = encode_u128(tx.effective_gas_price);
    let contract_address = RlpField::from_option(tx.contract_address.map(|a| Bytes::copy_from_slice(&a)));
    let logs_raw: Vec<Vec<u8>> = tx.logs.iter().map(encode_log).collect();
    let logs = RlpListField::Present(Bytes::from(alloy_rlp::encode(&logs_raw)));

    encode_record_dyn(&[
        &hash,
        &block_number,
        &tx_index,
        &from,
        &to,
        &value,
        &nonce,
        &gas,
        &gas_price,
        &max_fee_per_gas,
        &max_priority_fee_per_gas,
        &input,
        &tx_type,
        &chain_id,
        &block_timestamp,
        &status,
        &gas_used,
        &cumulative_gas_used,
        &effective_gas_price,
        &contract_address,
        &logs,
    ])
}

pub fn decode_tx(data: &[u8]) -> Result<TxRecord, CodecError> {
    let record = RawRecord::parse(data, FIELD_COUNT)?;

    let mut hash = [0u8; 32];
    hash.copy_from_slice(record.field(F_HASH)?.as_bytes()?);
    let mut from = [0u8; 20];
    from.copy_from_slice(record.field(F_FROM)?.as_bytes()?);

    let to = match record.field(F_TO)? {
        RlpField::Absent => None,
        present => {
            let mut arr = [0u8; 20];
            arr.copy_from_slice(present.as_bytes()?);
            Some(arr)
        }
    };

    let contract_address = match record.field(F_CONTRACT_ADDRESS)? {
        RlpField::Absent => None,
        present => {
            let mut arr = [0u8; 20];
            arr.copy_from_slice(present.as_bytes()?);
            Some(arr)
        }
    };

    let mut logs_buf = record.field_raw(F_LOGS)?;
    let logs_field = RlpListField::decode(&mut logs_buf)?;
    let logs = match logs_field {
        RlpListField::Absent => Vec::new(),
        RlpListField::Present(raw) => {
            let mut cursor = raw.as_ref();
            let raw_logs = Vec::<Vec<u8>>::decode(&mut cursor)?;
            raw_logs.iter().map(|l| decode_log(l)).collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok(TxRecord {
        hash,
        block_number: decode_u128(record.field(F_BLOCK_NUMBER)?)? as u64,
        tx_index: decode_u128(record.field(F_TX_INDEX)?)? as u32,
        from,
        to,
        value: decode_u128(record.field(F_VALUE)?)?,
        nonce: decode_u128(record.field(F_NONCE)?)? as u64,
        gas: decode_u128(record.field(F_GAS)?)?,
        gas_price: decode_opt_u128(record.field(F_GAS_PRICE)?)?,
        max_fee_per_gas: decode_opt_u128(record.field(F_MAX_FEE_PER_GAS)?)?,
        max_priority_fee_per_gas: decode_opt_u128(record.field(F_MAX_PRIORITY_FEE_PER_GAS)?)?,
        input: Bytes::copy_from_slice(record.field(F_INPUT)?.as_bytes()?),
        tx_type: record.field(F_TX_TYPE)?.as_bytes()?.first().copied().unwrap_or(0),
        chain_id: decode_opt_u128(record.field(F_CHAIN_ID)?)?.map(|v| v as u64),
        block_timestamp: decode_u128(record.field(F_BLOCK_TIMESTAMP)?)? as u64,
        status: record.field(F_STATUS)?.as_bytes()?.first().copied().unwrap_or(0) != 0,
        gas_used: decode_u128(record.field(F_GAS_USED)?)?,
        cumulative_gas_used: decode_u128(record.field(F_CUMULATIVE_GAS_USED)?)?,
        effective_gas_price: decode_u128(record.field(F_EFFECTIVE_GAS_PRICE)?)?,
        contract_address,
        logs,
    })
}

/// `tx_num = (block_number << 16) | tx_index`, the store's transactions
/// primary key (§3).
pub fn tx_num(block_number: u64, tx_index: u32) -> u64 {
    (block_number << 16) | (tx_index as u64 & 0xFFFF)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_tx() -> TxRecord {
        TxRecord {
            hash: [0x11; 32],
            block_number: 3,
            tx_index: 0,
            from: [0x22; 20],
            to: Some([0x33; 20]),
            value: 500,
            nonce: 7,
            gas: 21_000,
            gas_price: Some(20_000_000_000),
            max_fee_per_gas: None,
            max_priority_fee_per_gas: None,
            input: Bytes::new(),
            tx_type: 0,
            chain_id: Some(1),
            block_timestamp: 1_600_000_000,
            status: true,
            gas_used: 21_000,
            cumulative_gas_used: 21_000,
            effective_gas_price: 20_000_000_000,
            contract_address: None,
            logs: Vec::new(),
        }
    }

    fn eip1559_tx_with_log() -> TxRecord {
        let mut tx = legacy_tx();
        tx.tx_type = 2;
        tx.gas_price = None;
        tx.max_fee_per_gas = Some(30_000_000_000);
        tx.max_priority_fee_per_gas = Some(1_000_000_000);
        tx.logs = vec![Log {
            address: [0x44; 20],
            topics: vec![[0x55; 32], [0x66; 32]],
            data: Bytes::from_static(b"payload"),
            log_index: 0,
            removed: false,
        }];
        tx
    }

    #[test]
    fn round_trips_legacy_tx_without_eip1559_fields() {
        let tx = legacy_tx();
        let encoded = encode_tx(&tx);
        let decoded = decode_tx(&encoded).unwrap();
        assert_eq!(decoded, tx);
        assert!(decoded.max_fee_per_gas.is_none());
    }

    #[test]
    fn round_trips_eip1559_tx_with_log_topics_and_removed_false() {
        let tx = eip1559_tx_with_log();
        let encoded = encode_tx(&tx);
        let decoded = decode_tx(&encoded).unwrap();
        assert_eq!(decoded, tx);
        assert_eq!(decoded.logs[0].topics.len(), 2);
        assert!(!decoded.logs[0].removed);
    }

    #[test]
    fn contract_creation_tx_has_no_to_but_has_contract_address() {
        let mut tx = legacy_tx();
        tx.to = None;
        tx.contract_address = Some([0x77; 20]);
        let encoded = encode_tx(&tx);
        let decoded = decode_tx(&encoded).unwrap();
        assert!(decoded.to.is_none());
        assert_eq!(decoded.contract_address, Some([0x77; 20]));
    }

    #[test]
    fn tx_num_packs_block_number_and_index() {
        assert_eq!(tx_num(1, 0), 1 << 16);
        assert_eq!(tx_num(1, 5), (1 << 16) | 5);
        assert_eq!(tx_num(0, 65_535), 65_535);
    }
}
