//! Block header records (§3, §4.E): a canonical EVM block header minus its
//! embedded transaction list, augmented with a transaction count. Optional
//! post-London/Cancun fields (`base_fee_per_gas`, `blob_gas_used`,
//! `excess_blob_gas`, `parent_beacon_block_root`) are carried as
//! [`RlpField::Absent`] on pre-fork chains so round-tripping never invents a
//! field the source RPC never sent.

use bytes::Bytes;

use crate::error::CodecError;

use super::record::{
    decode_opt_u128, decode_u128, encode_opt_u128, encode_record, encode_u128, RawRecord, RlpField,
};

const FIELD_COUNT: usize = 12;
const F_NUMBER: usize = 0;
const F_HASH: usize = 1;
const F_PARENT_HASH: usize = 2;
const F_MINER: usize = 3;
const F_TIMESTAMP: usize = 4;
const F_GAS_USED: usize = 5;
const F_GAS_LIMIT: usize = 6;
const F_BASE_FEE_PER_GAS: usize = 7;
const F_BLOB_GAS_USED: usize = 8;
const F_EXCESS_BLOB_GAS: usize = 9;
const F_PARENT_BEACON_BLOCK_ROOT: usize = 10;
const F_TX_COUNT: usize = 11;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    pub number: u64,
    pub hash: [u8; 32],
    pub parent_hash: [u8; 32],
    pub miner: [u8; 20],
    pub timestamp: u64,
    pub gas_used: u128,
    pub gas_limit: u128,
    pub base_fee_per_gas: Option<u128>,
    pub blob_gas_used: Option<u64>,
    pub excess_blob_gas: Option<u64>,
    pub parent_beacon_block_root: Option<[u8; 32]>,
    pub tx_count: u32,
}

pub fn encode_block(block: &BlockRecord) -> Vec<u8> {
    let fields = vec![
        encode_u128(block.number as u128),
        RlpField::present(Bytes::copy_from_slice(&block.hash)),
        RlpField::present(Bytes::copy_from_slice(&block.parent_hash)),
        RlpField::present(Bytes::copy_from_slice(&block.miner)),
        encode_u128(block.timestamp as u128),
        encode_u128(block.gas_used),
        encode_u128(block.gas_limit),
        encode_opt_u128(block.base_fee_per_gas),
        encode_opt_u128(block.blob_gas_used.map(|v| v as u128)),
        encode_opt_u128(block.excess_blob_gas.map(|v| v as u128)),
        RlpField::from_option(block.parent_beacon_block_root.map(|r| Bytes::copy_from_slice(&r))),
        encode_u128(block.tx_count as u128),
    ];
    encode_record(&fields)
}

pub fn decode_block(data: &[u8]) -> Result<BlockRecord, CodecError> {
    let record = RawRecord::parse(data, FIELD_COUNT)?;

    let mut hash = [0u8; 32];
    hash.copy_from_slice(record.field(F_HASH)?.as_bytes()?);
    let mut parent_hash = [0u8; 32];
    parent_hash.copy_from_slice(record.field(F_PARENT_HASH)?.as_bytes()?);
    let mut miner = [0u8; 20];
    miner.copy_from_slice(record.field(F_MINER)?.as_bytes()?);

    let parent_beacon_block_root = match record.field(F_PARENT_BEACON_BLOCK_ROOT)? {
        RlpField::Absent => None,
        present => {
            let mut root = [0u8; 32];
            root.copy_from_slice(present.as_bytes()?);
            Some(root)
        }
    };

    Ok(BlockRecord {
        number: decode_u128(record.field(F_NUMBER)?)? as u64,
        hash,
        parent_hash,
        miner,
        timestamp: decode_u128(record.field(F_TIMESTAMP)?)? as u64,
        gas_used: decode_u128(record.field(F_GAS_USED)?)?,
        gas_limit: decode_u128(record.field(F_GAS_LIMIT)?)?,
        base_fee_per_gas: decode_opt_u128(record.field(F_BASE_FEE_PER_GAS)?)?,
        blob_gas_used: decode_opt_u128(record.field(F_BLOB_GAS_USED)?)?.map(|v| v as u64),
        excess_blob_gas: decode_opt_u128(record.field(F_EXCESS_BLOB_GAS)?)?.map(|v| v as u64),
        parent_beacon_block_root,
        tx_count: decode_u128(record.field(F_TX_COUNT)?)? as u32,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pre_cancun_block() -> BlockRecord {
        BlockRecord {
            number: 3,
            hash: [0xaa; 32],
            parent_hash: [0xbb; 32],
            miner: [0xcc; 20],
            timestamp: 1_600_000_000,
            gas_used: 21_000,
            gas_limit: 30_000_000,
            base_fee_per_gas: Some(1_000_000_000),
            blob_gas_used: None,
            excess_blob_gas: None,
            parent_beacon_block_root: None,
            tx_count: 1,
        }
    }

    fn post_cancun_block() -> BlockRecord {
        let mut block = pre_cancun_block();
        block.number = 10;
        block.blob_gas_used = Some(0);
        block.excess_blob_gas = Some(0);
        block.parent_beacon_block_root = Some([0xdd; 32]);
        block
    }

    #[test]
    fn round_trips_pre_cancun_block_without_blob_fields() {
        let block = pre_cancun_block();
        let encoded = encode_block(&block);
        let decoded = decode_block(&encoded).unwrap();
        assert_eq!(decoded, block);
        assert!(decoded.blob_gas_used.is_none());
    }

    #[test]
    fn round_trips_post_cancun_block_with_zero_blob_gas_used() {
        let block = post_cancun_block();
        let encoded = encode_block(&block);
        let decoded = decode_block(&encoded).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.blob_gas_used, Some(0));
    }

    #[test]
    fn block_zero_round_trips() {
        let mut block = pre_cancun_block();
        block.number = 0;
        block.tx_count = 0;
        let encoded = encode_block(&block);
        let decoded = decode_block(&encoded).unwrap();
        assert_eq!(decoded.number, 0);
        assert_eq!(decoded.tx_count, 0);
    }
}
