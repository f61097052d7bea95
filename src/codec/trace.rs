//! Call-tracer trace records (§4.E).
//!
//! A trace is a call tree: `call_type` is stored as a single byte index into
//! a frozen seven-variant enumeration, and the `calls` field distinguishes
//! "no nested calls field at all" from "present but empty" via
//! [`RlpListField`] rather than [`RlpField`] (see that type's doc comment).

use alloy_rlp::Decodable;
use bytes::Bytes;

use crate::error::CodecError;

use super::record::{
    decode_opt_u128, decode_u128, encode_opt_u128, encode_record_dyn, encode_u128, RawRecord,
    RlpField, RlpListField,
};

/// Fixed, frozen enumeration of call-tracer call types. The set and the byte
/// index of each variant must never change without a codec version bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallType {
    Call = 0,
    CallCode = 1,
    DelegateCall = 2,
    StaticCall = 3,
    Create = 4,
    Create2 = 5,
    SelfDestruct = 6,
}

impl CallType {
    pub fn from_byte(b: u8) -> Result<Self, CodecError> {
        Ok(match b {
            0 => CallType::Call,
            1 => CallType::CallCode,
            2 => CallType::DelegateCall,
            3 => CallType::StaticCall,
            4 => CallType::Create,
            5 => CallType::Create2,
            6 => CallType::SelfDestruct,
            other => return Err(CodecError::UnknownCallType(other)),
        })
    }

    pub fn from_tracer_str(s: &str) -> Result<Self, CodecError> {
        Ok(match s {
            "CALL" => CallType::Call,
            "CALLCODE" => CallType::CallCode,
            "DELEGATECALL" => CallType::DelegateCall,
            "STATICCALL" => CallType::StaticCall,
            "CREATE" => CallType::Create,
            "CREATE2" => CallType::Create2,
            "SELFDESTRUCT" => CallType::SelfDestruct,
            _ => return Err(CodecError::UnknownCallType(0xff)),
        })
    }

    pub fn as_byte(self) -> u8 {
        self as u8
    }
}

const FIELD_COUNT: usize = 10;
const F_CALL_TYPE: usize = 0;
const F_FROM: usize = 1;
const F_TO: usize = 2;
const F_VALUE: usize = 3;
const F_GAS: usize = 4;
const F_GAS_USED: usize = 5;
const F_INPUT: usize = 6;
const F_OUTPUT: usize = 7;
const F_ERROR: usize = 8;
const F_CALLS: usize = 9;

/// A decoded, owned call frame ready to hand to a plugin's `extract`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFrame {
    pub call_type: CallType,
    pub from: [u8; 20],
    pub to: Option<[u8; 20]>,
    pub value: Option<u128>,
    pub gas: u128,
    pub gas_used: u128,
    pub input: Bytes,
    pub output: Option<Bytes>,
    pub error: Option<String>,
    pub calls: Option<Vec<CallFrame>>,
}

fn encode_calls_field(calls: &Option<Vec<CallFrame>>) -> RlpListField {
    match calls {
        None => RlpListField::Absent,
        Some(calls) => {
            let encoded: Vec<Vec<u8>> = calls.iter().map(encode_call_frame).collect();
            RlpListField::Present(Bytes::from(alloy_rlp::encode(&encoded)))
        }
    }
}

/// Encode one call frame (and, recursively, its nested calls) as a tagged
/// record.
pub fn encode_call_frame(frame: &CallFrame) -> Vec<u8> {
    let call_type = RlpField::present(Bytes::copy_from_slice(&[frame.call_type.as_byte()]));
    let from = RlpField::present(Bytes::copy_from_slice(&frame.from));
    let to = RlpField::from_option(frame.to.map(|to| Bytes::copy_from_slice(&to)));
    let value = encode_opt_u128(frame.value);
    let gas = encode_u128(frame.gas);
    let gas_used = encode_u128(frame.gas_used);
    let input = RlpField::present(frame.input.clone());
    let output = RlpField::from_option(frame.output.clone());
    let error = RlpField::from_option(frame.error.as_ref().map(|e| Bytes::copy_from_slice(e.as_bytes())));
    let calls = encode_calls_field(&frame.calls);

    encode_record_dyn(&[
        &call_type, &from, &to, &value, &gas, &gas_used, &input, &output, &error, &calls,
    ])
}

pub fn decode_call_frame(data: &[u8]) -> Result<CallFrame, CodecError> {
    let record = RawRecord::parse(data, FIELD_COUNT)?;

    let call_type =
        CallType::from_byte(record.field(F_CALL_TYPE)?.as_bytes()?.first().copied().unwrap_or(0))?;

    let from_bytes = record.field(F_FROM)?.as_bytes()?;
    let mut from = [0u8; 20];
    from.copy_from_slice(from_bytes);

    let to = match record.field(F_TO)? {
        RlpField::Absent => None,
        present => {
            let b = present.as_bytes()?;
            let mut arr = [0u8; 20];
            arr.copy_from_slice(b);
            Some(arr)
        }
    };

    let value = decode_opt_u128(record.field(F_VALUE)?)?;
    let gas = decode_u128(record.field(F_GAS)?)?;
    let gas_used = decode_u128(record.field(F_GAS_USED)?)?;
    let input = Bytes::copy_from_slice(record.field(F_INPUT)?.as_bytes()?);
    let output = record.field(F_OUTPUT)?.clone().into_option();
    let error = record
        .field(F_ERROR)?
        .clone()
        .into_option()
        .map(|b| String::from_utf8_lossy(&b).into_owned());

    let mut calls_buf = record.field_raw(F_CALLS)?;
    let calls_field = RlpListField::decode(&mut calls_buf)?;
    let calls = match calls_field {
        RlpListField::Absent => None,
        RlpListField::Present(raw) => {
            let mut cursor = raw.as_ref();
            let items = Vec::<Vec<u8>>::decode(&mut cursor)?;
            Some(items.iter().map(|item| decode_call_frame(item)).collect::<Result<Vec<_>, _>>()?)
        }
    };

    Ok(CallFrame { call_type, from, to, value, gas, gas_used, input, output, error, calls })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf_call() -> CallFrame {
        CallFrame {
            call_type: CallType::Call,
            from: [1u8; 20],
            to: Some([2u8; 20]),
            value: Some(1_000_000_000_000_000_000),
            gas: 21_000,
            gas_used: 21_000,
            input: Bytes::from_static(b"\x00\x01\x02"),
            output: Some(Bytes::new()),
            error: None,
            calls: None,
        }
    }

    #[test]
    fn round_trips_leaf_call_with_no_nested_calls() {
        let frame = leaf_call();
        let encoded = encode_call_frame(&frame);
        let decoded = decode_call_frame(&encoded).unwrap();
        assert_eq!(decoded, frame);
        assert!(decoded.calls.is_none());
    }

    #[test]
    fn round_trips_call_with_empty_nested_calls_list() {
        let mut frame = leaf_call();
        frame.calls = Some(Vec::new());
        let encoded = encode_call_frame(&frame);
        let decoded = decode_call_frame(&encoded).unwrap();
        assert_eq!(decoded.calls, Some(Vec::new()));
    }

    #[test]
    fn round_trips_nested_create_with_error() {
        let mut child = leaf_call();
        child.call_type = CallType::Create2;
        child.to = None;
        child.error = Some("execution reverted".to_string());

        let mut parent = leaf_call();
        parent.calls = Some(vec![child.clone()]);

        let encoded = encode_call_frame(&parent);
        let decoded = decode_call_frame(&encoded).unwrap();
        assert_eq!(decoded.calls.as_ref().unwrap()[0], child);
    }

    #[test]
    fn call_type_round_trips_all_seven_variants() {
        let all = [
            CallType::Call,
            CallType::CallCode,
            CallType::DelegateCall,
            CallType::StaticCall,
            CallType::Create,
            CallType::Create2,
            CallType::SelfDestruct,
        ];
        for ct in all {
            assert_eq!(CallType::from_byte(ct.as_byte()).unwrap(), ct);
        }
        assert!(CallType::from_byte(7).is_err());
    }
}
