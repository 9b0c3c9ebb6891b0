//! Minimal protobuf wire codec for the ABCI query payloads.
//!
//! The staking and slashing queries carry protobuf-encoded request and
//! response bodies inside the ABCI envelope. Only the handful of message
//! shapes blockwatch touches are modeled here, field-by-field against the
//! cosmos-sdk definitions; unknown fields are skipped.

use crate::error::RpcError;

// ─── Wire primitives ─────────────────────────────────────────────────────────

const WIRE_VARINT: u8 = 0;
const WIRE_FIXED64: u8 = 1;
const WIRE_BYTES: u8 = 2;
const WIRE_FIXED32: u8 = 5;

fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn put_tag(buf: &mut Vec<u8>, field: u32, wire: u8) {
    put_varint(buf, (u64::from(field) << 3) | u64::from(wire));
}

fn put_uint64(buf: &mut Vec<u8>, field: u32, value: u64) {
    if value == 0 {
        return;
    }
    put_tag(buf, field, WIRE_VARINT);
    put_varint(buf, value);
}

fn put_string(buf: &mut Vec<u8>, field: u32, value: &str) {
    if value.is_empty() {
        return;
    }
    put_tag(buf, field, WIRE_BYTES);
    put_varint(buf, value.len() as u64);
    buf.extend_from_slice(value.as_bytes());
}

fn put_message(buf: &mut Vec<u8>, field: u32, inner: &[u8]) {
    put_tag(buf, field, WIRE_BYTES);
    put_varint(buf, inner.len() as u64);
    buf.extend_from_slice(inner);
}

/// A decoded field value.
enum Field<'a> {
    Varint(u64),
    Bytes(&'a [u8]),
    #[allow(dead_code)]
    Fixed64(u64),
    #[allow(dead_code)]
    Fixed32(u32),
}

/// Streaming reader over one message's fields.
struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn varint(&mut self) -> Result<u64, RpcError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = *self
                .buf
                .get(self.pos)
                .ok_or_else(|| RpcError::Codec("truncated varint".into()))?;
            self.pos += 1;
            if shift >= 64 {
                return Err(RpcError::Codec("varint overflow".into()));
            }
            value |= u64::from(byte & 0x7f) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], RpcError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or_else(|| RpcError::Codec("truncated length-delimited field".into()))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// The next `(field_number, value)` pair, or `None` at end of input.
    fn next_field(&mut self) -> Result<Option<(u32, Field<'a>)>, RpcError> {
        if self.pos >= self.buf.len() {
            return Ok(None);
        }
        let tag = self.varint()?;
        let field = (tag >> 3) as u32;
        let value = match (tag & 0x7) as u8 {
            WIRE_VARINT => Field::Varint(self.varint()?),
            WIRE_BYTES => {
                let len = self.varint()? as usize;
                Field::Bytes(self.take(len)?)
            }
            WIRE_FIXED64 => {
                let bytes = self.take(8)?;
                Field::Fixed64(u64::from_le_bytes(bytes.try_into().expect("8 bytes")))
            }
            WIRE_FIXED32 => {
                let bytes = self.take(4)?;
                Field::Fixed32(u32::from_le_bytes(bytes.try_into().expect("4 bytes")))
            }
            other => {
                return Err(RpcError::Codec(format!("unsupported wire type {other}")));
            }
        };
        Ok(Some((field, value)))
    }
}

fn utf8(bytes: &[u8]) -> Result<String, RpcError> {
    String::from_utf8(bytes.to_vec()).map_err(|_| RpcError::Codec("invalid utf-8".into()))
}

// ─── cosmos.base.query.v1beta1 ───────────────────────────────────────────────

/// `PageRequest` — only the limit is ever set.
#[derive(Debug, Clone, Copy)]
pub struct PageRequest {
    pub limit: u64,
}

impl PageRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_uint64(&mut buf, 3, self.limit);
        buf
    }
}

// ─── cosmos.staking.v1beta1 ──────────────────────────────────────────────────

/// `BondStatus.BOND_STATUS_BONDED`.
pub const BOND_STATUS_BONDED: i32 = 3;

#[derive(Debug, Clone)]
pub struct QueryValidatorsRequest {
    /// Empty string queries all statuses.
    pub status: String,
    pub pagination: PageRequest,
}

impl QueryValidatorsRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_string(&mut buf, 1, &self.status);
        put_message(&mut buf, 2, &self.pagination.encode());
        buf
    }
}

/// `cosmos.staking.v1beta1.Validator`, reduced to the fields blockwatch uses.
#[derive(Debug, Clone, Default)]
pub struct ValidatorInfo {
    pub operator_address: String,
    /// Raw consensus key bytes, unwrapped from the `Any` + key envelope.
    pub consensus_pubkey: Vec<u8>,
    pub jailed: bool,
    pub status: i32,
    pub moniker: String,
}

impl ValidatorInfo {
    fn decode(bytes: &[u8]) -> Result<Self, RpcError> {
        let mut info = Self::default();
        let mut reader = Reader::new(bytes);
        while let Some((field, value)) = reader.next_field()? {
            match (field, value) {
                (1, Field::Bytes(b)) => info.operator_address = utf8(b)?,
                (2, Field::Bytes(b)) => info.consensus_pubkey = decode_any_pubkey(b)?,
                (3, Field::Varint(v)) => info.jailed = v != 0,
                (4, Field::Varint(v)) => info.status = v as i32,
                (7, Field::Bytes(b)) => info.moniker = decode_description_moniker(b)?,
                _ => {}
            }
        }
        Ok(info)
    }
}

/// Unwrap `google.protobuf.Any { type_url, value }` where `value` is a
/// key message with the raw bytes in field 1.
fn decode_any_pubkey(bytes: &[u8]) -> Result<Vec<u8>, RpcError> {
    let mut reader = Reader::new(bytes);
    while let Some((field, value)) = reader.next_field()? {
        if let (2, Field::Bytes(inner)) = (field, value) {
            let mut key_reader = Reader::new(inner);
            while let Some((key_field, key_value)) = key_reader.next_field()? {
                if let (1, Field::Bytes(key)) = (key_field, key_value) {
                    return Ok(key.to_vec());
                }
            }
        }
    }
    Ok(Vec::new())
}

fn decode_description_moniker(bytes: &[u8]) -> Result<String, RpcError> {
    let mut reader = Reader::new(bytes);
    while let Some((field, value)) = reader.next_field()? {
        if let (1, Field::Bytes(b)) = (field, value) {
            return utf8(b);
        }
    }
    Ok(String::new())
}

#[derive(Debug, Clone, Default)]
pub struct QueryValidatorsResponse {
    pub validators: Vec<ValidatorInfo>,
}

impl QueryValidatorsResponse {
    pub fn decode(bytes: &[u8]) -> Result<Self, RpcError> {
        let mut response = Self::default();
        let mut reader = Reader::new(bytes);
        while let Some((field, value)) = reader.next_field()? {
            if let (1, Field::Bytes(b)) = (field, value) {
                response.validators.push(ValidatorInfo::decode(b)?);
            }
        }
        Ok(response)
    }
}

// ─── cosmos.slashing.v1beta1 ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
pub struct QuerySigningInfosRequest {
    pub pagination: PageRequest,
}

impl QuerySigningInfosRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_message(&mut buf, 1, &self.pagination.encode());
        buf
    }
}

#[derive(Debug, Clone)]
pub struct QuerySigningInfoRequest {
    /// bech32 `…valcons…` address.
    pub cons_address: String,
}

impl QuerySigningInfoRequest {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_string(&mut buf, 1, &self.cons_address);
        buf
    }
}

/// `cosmos.slashing.v1beta1.ValidatorSigningInfo`.
#[derive(Debug, Clone, Default)]
pub struct SigningInfo {
    pub address: String,
    pub start_height: i64,
    pub index_offset: i64,
    pub tombstoned: bool,
    pub missed_blocks_counter: i64,
}

impl SigningInfo {
    fn decode(bytes: &[u8]) -> Result<Self, RpcError> {
        let mut info = Self::default();
        let mut reader = Reader::new(bytes);
        while let Some((field, value)) = reader.next_field()? {
            match (field, value) {
                (1, Field::Bytes(b)) => info.address = utf8(b)?,
                (2, Field::Varint(v)) => info.start_height = v as i64,
                (3, Field::Varint(v)) => info.index_offset = v as i64,
                // field 4 is jailed_until, unused
                (5, Field::Varint(v)) => info.tombstoned = v != 0,
                (6, Field::Varint(v)) => info.missed_blocks_counter = v as i64,
                _ => {}
            }
        }
        Ok(info)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QuerySigningInfosResponse {
    pub info: Vec<SigningInfo>,
}

impl QuerySigningInfosResponse {
    pub fn decode(bytes: &[u8]) -> Result<Self, RpcError> {
        let mut response = Self::default();
        let mut reader = Reader::new(bytes);
        while let Some((field, value)) = reader.next_field()? {
            if let (1, Field::Bytes(b)) = (field, value) {
                response.info.push(SigningInfo::decode(b)?);
            }
        }
        Ok(response)
    }
}

#[derive(Debug, Clone, Default)]
pub struct QuerySigningInfoResponse {
    pub val_signing_info: SigningInfo,
}

impl QuerySigningInfoResponse {
    pub fn decode(bytes: &[u8]) -> Result<Self, RpcError> {
        let mut response = Self::default();
        let mut reader = Reader::new(bytes);
        while let Some((field, value)) = reader.next_field()? {
            if let (1, Field::Bytes(b)) = (field, value) {
                response.val_signing_info = SigningInfo::decode(b)?;
            }
        }
        Ok(response)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct QueryParamsRequest;

impl QueryParamsRequest {
    pub fn encode(&self) -> Vec<u8> {
        Vec::new()
    }
}

/// `cosmos.slashing.v1beta1.Params`, reduced to the downtime window.
#[derive(Debug, Clone, Default)]
pub struct SlashingParamsInfo {
    pub signed_blocks_window: i64,
    /// Fractional, decoded from the sdk `Dec` mantissa (18 decimals).
    pub min_signed_per_window: f64,
}

impl SlashingParamsInfo {
    fn decode(bytes: &[u8]) -> Result<Self, RpcError> {
        let mut params = Self::default();
        let mut reader = Reader::new(bytes);
        while let Some((field, value)) = reader.next_field()? {
            match (field, value) {
                (1, Field::Varint(v)) => params.signed_blocks_window = v as i64,
                (2, Field::Bytes(b)) => params.min_signed_per_window = decode_dec(b)?,
                _ => {}
            }
        }
        Ok(params)
    }
}

/// The sdk legacy `Dec` wire form: the decimal mantissa as an ASCII
/// integer, scaled by 10^18.
fn decode_dec(bytes: &[u8]) -> Result<f64, RpcError> {
    let mantissa: i128 = utf8(bytes)?
        .parse()
        .map_err(|_| RpcError::Codec("invalid Dec mantissa".into()))?;
    Ok(mantissa as f64 / 1e18)
}

#[derive(Debug, Clone, Default)]
pub struct QueryParamsResponse {
    pub params: SlashingParamsInfo,
}

impl QueryParamsResponse {
    pub fn decode(bytes: &[u8]) -> Result<Self, RpcError> {
        let mut response = Self::default();
        let mut reader = Reader::new(bytes);
        while let Some((field, value)) = reader.next_field()? {
            if let (1, Field::Bytes(b)) = (field, value) {
                response.params = SlashingParamsInfo::decode(b)?;
            }
        }
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn varint_roundtrip() {
        for value in [0u64, 1, 127, 128, 300, 1000, u64::from(u32::MAX), u64::MAX] {
            let mut buf = Vec::new();
            put_varint(&mut buf, value);
            let mut reader = Reader::new(&buf);
            assert_eq!(reader.varint().unwrap(), value);
        }
    }

    #[test]
    fn page_request_known_bytes() {
        // field 3, varint: tag 0x18; 1000 = 0xE8 0x07
        assert_eq!(PageRequest { limit: 1000 }.encode(), vec![0x18, 0xE8, 0x07]);
    }

    #[test]
    fn validators_request_omits_empty_status() {
        let encoded = QueryValidatorsRequest {
            status: String::new(),
            pagination: PageRequest { limit: 1000 },
        }
        .encode();
        // Only field 2 (pagination message) is present.
        assert_eq!(encoded, vec![0x12, 0x03, 0x18, 0xE8, 0x07]);
    }

    fn encode_validator(operator: &str, key: &[u8], jailed: bool, status: u64, moniker: &str) -> Vec<u8> {
        let mut key_msg = Vec::new();
        put_message(&mut key_msg, 1, key);
        let mut any = Vec::new();
        put_string(&mut any, 1, "/cosmos.crypto.ed25519.PubKey");
        put_message(&mut any, 2, &key_msg);

        let mut description = Vec::new();
        put_string(&mut description, 1, moniker);

        let mut validator = Vec::new();
        put_string(&mut validator, 1, operator);
        put_message(&mut validator, 2, &any);
        if jailed {
            put_tag(&mut validator, 3, WIRE_VARINT);
            put_varint(&mut validator, 1);
        }
        put_uint64(&mut validator, 4, status);
        // unknown field the decoder must skip: tokens (5, string)
        put_string(&mut validator, 5, "1000000");
        put_message(&mut validator, 7, &description);
        validator
    }

    #[test]
    fn validators_response_decodes() {
        let mut body = Vec::new();
        put_message(
            &mut body,
            1,
            &encode_validator("cosmosvaloper1aaa", &[7u8; 32], false, 3, "alpha"),
        );
        put_message(
            &mut body,
            1,
            &encode_validator("cosmosvaloper1bbb", &[9u8; 32], true, 1, "bravo"),
        );

        let response = QueryValidatorsResponse::decode(&body).unwrap();
        assert_eq!(response.validators.len(), 2);

        let alpha = &response.validators[0];
        assert_eq!(alpha.operator_address, "cosmosvaloper1aaa");
        assert_eq!(alpha.consensus_pubkey, vec![7u8; 32]);
        assert!(!alpha.jailed);
        assert_eq!(alpha.status, BOND_STATUS_BONDED);
        assert_eq!(alpha.moniker, "alpha");

        let bravo = &response.validators[1];
        assert!(bravo.jailed);
        assert_ne!(bravo.status, BOND_STATUS_BONDED);
    }

    #[test]
    fn signing_infos_response_decodes() {
        let mut info = Vec::new();
        put_string(&mut info, 1, "cosmosvalcons1xyz");
        put_uint64(&mut info, 2, 100);
        put_uint64(&mut info, 3, 42);
        put_tag(&mut info, 5, WIRE_VARINT);
        put_varint(&mut info, 1);
        put_uint64(&mut info, 6, 17);

        let mut body = Vec::new();
        put_message(&mut body, 1, &info);

        let response = QuerySigningInfosResponse::decode(&body).unwrap();
        assert_eq!(response.info.len(), 1);
        let decoded = &response.info[0];
        assert_eq!(decoded.address, "cosmosvalcons1xyz");
        assert_eq!(decoded.start_height, 100);
        assert!(decoded.tombstoned);
        assert_eq!(decoded.missed_blocks_counter, 17);
    }

    #[test]
    fn slashing_params_decode_dec_mantissa() {
        let mut params = Vec::new();
        put_uint64(&mut params, 1, 10_000);
        let mantissa = b"50000000000000000"; // 0.05
        put_tag(&mut params, 2, WIRE_BYTES);
        put_varint(&mut params, mantissa.len() as u64);
        params.extend_from_slice(mantissa);

        let mut body = Vec::new();
        put_message(&mut body, 1, &params);

        let response = QueryParamsResponse::decode(&body).unwrap();
        assert_eq!(response.params.signed_blocks_window, 10_000);
        assert!((response.params.min_signed_per_window - 0.05).abs() < 1e-12);
    }

    #[test]
    fn signing_info_request_encodes_address() {
        let encoded = QuerySigningInfoRequest {
            cons_address: "cosmosvalcons1xyz".into(),
        }
        .encode();
        let response = QuerySigningInfoResponse::decode(&{
            let mut body = Vec::new();
            put_message(&mut body, 1, &encoded);
            body
        })
        .unwrap();
        assert_eq!(response.val_signing_info.address, "cosmosvalcons1xyz");
    }

    #[test]
    fn truncated_input_is_an_error() {
        // tag says "bytes of length 10" but only 2 bytes follow
        let body = vec![0x0A, 0x0A, 0x01, 0x02];
        assert!(QueryValidatorsResponse::decode(&body).is_err());
    }
}
