//! The shared tagged-record shell: a one-byte format tag followed by an
//! RLP-encoded positional tuple of fields, decoded lazily via an offsets
//! table so that reading one field never walks bytes belonging to another.
//!
//! [`RlpField`] distinguishes "field absent from the source" from "field
//! present but empty": absence is the single-byte empty-RLP-list sentinel
//! (`0xc0`), presence (even of zero-length content) is an ordinary RLP byte
//! string (`0x80` when empty). This is the opposite convention from
//! [`RlpListField`], used only for the trace call tree's nested `calls`
//! field, where the field's *natural* type is already a list: there, "absent"
//! borrows the byte-string sentinel (`0x80`) since `0xc0` is the natural
//! encoding of "present, empty list".

use alloy_rlp::{Buf, BufMut, Decodable, Encodable, Header};
use bytes::Bytes;
use once_cell::sync::OnceCell;

use crate::error::CodecError;

pub const FORMAT_TAG: u8 = 0x01;

/// A positional field whose absence and empty-presence are distinguishable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlpField {
    Absent,
    Present(Bytes),
}

impl RlpField {
    pub fn present(bytes: impl Into<Bytes>) -> Self {
        RlpField::Present(bytes.into())
    }

    pub fn from_option(bytes: Option<impl Into<Bytes>>) -> Self {
        match bytes {
            Some(b) => RlpField::Present(b.into()),
            None => RlpField::Absent,
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8], CodecError> {
        match self {
            RlpField::Present(b) => Ok(b.as_ref()),
            RlpField::Absent => Ok(&[]),
        }
    }

    pub fn is_absent(&self) -> bool {
        matches!(self, RlpField::Absent)
    }

    pub fn into_option(self) -> Option<Bytes> {
        match self {
            RlpField::Present(b) => Some(b),
            RlpField::Absent => None,
        }
    }
}

impl Encodable for RlpField {
    fn encode(&self, out: &mut dyn BufMut) {
        match self {
            RlpField::Absent => out.put_u8(0xc0),
            RlpField::Present(bytes) => bytes.as_ref().encode(out),
        }
    }

    fn length(&self) -> usize {
        match self {
            RlpField::Absent => 1,
            RlpField::Present(bytes) => bytes.as_ref().length(),
        }
    }
}

impl Decodable for RlpField {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        if buf.first() == Some(&0xc0) {
            buf.advance(1);
            Ok(RlpField::Absent)
        } else {
            let bytes = Vec::<u8>::decode(buf)?;
            Ok(RlpField::Present(bytes.into()))
        }
    }
}

/// A list-valued optional field (used only for nested trace call lists).
/// `Absent` means "no calls field at all"; `Present` carries the raw,
/// still-encoded RLP list bytes (including their own list header) so the
/// nested list can be decoded independently and lazily.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RlpListField {
    Absent,
    Present(Bytes),
}

impl Encodable for RlpListField {
    fn encode(&self, out: &mut dyn BufMut) {
        match self {
            RlpListField::Absent => out.put_u8(0x80),
            RlpListField::Present(raw_list) => out.put_slice(raw_list.as_ref()),
        }
    }

    fn length(&self) -> usize {
        match self {
            RlpListField::Absent => 1,
            RlpListField::Present(raw_list) => raw_list.len(),
        }
    }
}

impl Decodable for RlpListField {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        if buf.first() == Some(&0x80) {
            buf.advance(1);
            Ok(RlpListField::Absent)
        } else {
            let start_len = buf.len();
            let header = Header::decode(buf)?;
            if !header.list {
                return Err(alloy_rlp::Error::UnexpectedString);
            }
            let consumed_by_header = start_len - buf.len();
            let total = consumed_by_header + header.payload_length;
            // `buf` has already been advanced past the header by `Header::decode`;
            // reconstruct the full item (header + payload) for lazy re-decoding.
            let payload = &buf[..header.payload_length];
            let mut raw = Vec::with_capacity(total);
            Header { list: true, payload_length: header.payload_length }.encode(&mut raw);
            raw.extend_from_slice(payload);
            buf.advance(header.payload_length);
            Ok(RlpListField::Present(raw.into()))
        }
    }
}

/// Big-endian, leading-zero-stripped numeric encoding (zero encodes as an
/// empty byte string, matching RLP's canonical integer encoding).
pub fn encode_u128(value: u128) -> RlpField {
    let be = value.to_be_bytes();
    let first_nonzero = be.iter().position(|&b| b != 0);
    match first_nonzero {
        None => RlpField::present(Bytes::new()),
        Some(idx) => RlpField::present(Bytes::copy_from_slice(&be[idx..])),
    }
}

pub fn decode_u128(field: &RlpField) -> Result<u128, CodecError> {
    let bytes = field.as_bytes()?;
    let mut buf = [0u8; 16];
    if bytes.len() > 16 {
        return Err(CodecError::Rlp(alloy_rlp::Error::Overflow));
    }
    buf[16 - bytes.len()..].copy_from_slice(bytes);
    Ok(u128::from_be_bytes(buf))
}

pub fn encode_opt_u128(value: Option<u128>) -> RlpField {
    match value {
        None => RlpField::Absent,
        Some(v) => encode_u128(v),
    }
}

pub fn decode_opt_u128(field: &RlpField) -> Result<Option<u128>, CodecError> {
    match field {
        RlpField::Absent => Ok(None),
        present => Ok(Some(decode_u128(present)?)),
    }
}

/// Parses the outer tagged-record shell and exposes each positional field's
/// raw bytes, decoding (and caching) each field only on first access.
pub struct RawRecord {
    payload: Bytes,
    offsets: Vec<(usize, usize)>,
    cache: Vec<OnceCell<RlpField>>,
}

impl RawRecord {
    /// Parse the one-byte tag and the outer RLP list header, recording the
    /// byte range of each of the `field_count` positional items without
    /// decoding their contents.
    pub fn parse(data: &[u8], field_count: usize) -> Result<Self, CodecError> {
        let (&tag, rest) = data
            .split_first()
            .ok_or(CodecError::UnknownTag { tag: 0, expected: FORMAT_TAG })?;
        if tag != FORMAT_TAG {
            return Err(CodecError::UnknownTag { tag, expected: FORMAT_TAG });
        }

        let mut cursor = rest;
        let header = Header::decode(&mut cursor)?;
        if !header.list {
            return Err(CodecError::Rlp(alloy_rlp::Error::UnexpectedString));
        }
        let payload = Bytes::copy_from_slice(&cursor[..header.payload_length]);

        let offsets = split_items(&payload, field_count)?;
        let cache = (0..field_count).map(|_| OnceCell::new()).collect();
        Ok(Self { payload, offsets, cache })
    }

    pub fn field(&self, index: usize) -> Result<&RlpField, CodecError> {
        let (start, end) = *self
            .offsets
            .get(index)
            .ok_or(CodecError::FieldOutOfRange { index, field_count: self.offsets.len() })?;
        self.cache[index].get_or_try_init(|| {
            let slice = &self.payload[start..end];
            RlpField::decode(&mut &slice[..]).map_err(CodecError::from)
        })
    }

    /// The raw, still-encoded bytes of one field's RLP item, for fields
    /// decoded by a nested type (e.g. a list-field) rather than [`RlpField`].
    pub fn field_raw(&self, index: usize) -> Result<&[u8], CodecError> {
        let (start, end) = *self
            .offsets
            .get(index)
            .ok_or(CodecError::FieldOutOfRange { index, field_count: self.offsets.len() })?;
        Ok(&self.payload[start..end])
    }
}

/// Encodes a tagged record shell: `[FORMAT_TAG] ++ rlp(list(fields))`.
pub fn encode_record(fields: &[RlpField]) -> Vec<u8> {
    encode_record_dyn(&fields.iter().map(|f| f as &dyn Encodable).collect::<Vec<_>>())
}

/// Same as [`encode_record`] but for a positional tuple with mixed field
/// kinds (e.g. a record whose last field is an [`RlpListField`] rather than
/// an [`RlpField`]).
pub fn encode_record_dyn(fields: &[&dyn Encodable]) -> Vec<u8> {
    let payload_len: usize = fields.iter().map(|f| f.length()).sum();
    let mut out = Vec::with_capacity(1 + 9 + payload_len);
    out.push(FORMAT_TAG);
    Header { list: true, payload_length: payload_len }.encode(&mut out);
    for field in fields {
        field.encode(&mut out);
    }
    out
}

/// Walk `payload` splitting it into `count` consecutive RLP item ranges,
/// without decoding each item's content — only its header is inspected to
/// determine the item's total length.
fn split_items(payload: &[u8], count: usize) -> Result<Vec<(usize, usize)>, CodecError> {
    let mut offsets = Vec::with_capacity(count);
    let mut pos = 0usize;
    for _ in 0..count {
        let remaining = &payload[pos..];
        if remaining.is_empty() {
            return Err(CodecError::FieldOutOfRange { index: offsets.len(), field_count: count });
        }
        let mut probe = remaining;
        if remaining[0] == 0xc0 {
            // bare empty-list sentinel used by RlpField::Absent
            offsets.push((pos, pos + 1));
            pos += 1;
            continue;
        }
        let header = Header::decode(&mut probe)?;
        let header_len = remaining.len() - probe.len();
        let item_len = header_len + header.payload_length;
        offsets.push((pos, pos + item_len));
        pos += item_len;
    }
    Ok(offsets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_and_present_empty_are_distinguishable() {
        let absent = RlpField::Absent;
        let present_empty = RlpField::present(Bytes::new());
        let mut a = Vec::new();
        absent.encode(&mut a);
        let mut p = Vec::new();
        present_empty.encode(&mut p);
        assert_ne!(a, p);
        assert_eq!(a, vec![0xc0]);
        assert_eq!(p, vec![0x80]);
    }

    #[test]
    fn field_round_trips_through_raw_record() {
        let fields = vec![
            encode_u128(0),
            encode_u128(12345),
            RlpField::Absent,
            RlpField::present(Bytes::from_static(b"hello")),
        ];
        let encoded = encode_record(&fields);
        let record = RawRecord::parse(&encoded, fields.len()).unwrap();

        assert_eq!(decode_u128(record.field(0).unwrap()).unwrap(), 0);
        assert_eq!(decode_u128(record.field(1).unwrap()).unwrap(), 12345);
        assert!(record.field(2).unwrap().is_absent());
        assert_eq!(record.field(3).unwrap().as_bytes().unwrap(), b"hello");
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let mut bytes = encode_record(&[encode_u128(1)]);
        bytes[0] = 0x02;
        assert!(RawRecord::parse(&bytes, 1).is_err());
    }

    #[test]
    fn list_field_absent_vs_empty_present() {
        let absent = RlpListField::Absent;
        let empty_list: Vec<u64> = Vec::new();
        let present = RlpListField::Present(Bytes::from(alloy_rlp::encode(&empty_list)));

        let mut a = Vec::new();
        absent.encode(&mut a);
        let mut p = Vec::new();
        present.encode(&mut p);
        assert_eq!(a, vec![0x80]);
        assert_eq!(p, vec![0xc0]);
        assert_ne!(a, p);
    }
}
