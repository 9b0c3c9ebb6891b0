//! Tendermint RPC JSON shapes.
//!
//! Only the fields blockwatch consumes are modeled; everything else in the
//! node's responses is ignored by serde.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use blockwatch_core::types::Block;

use crate::error::RpcError;

/// `block_id_flag` value for a commit signature.
pub const BLOCK_ID_FLAG_COMMIT: i32 = 2;
/// `block_id_flag` value for a nil vote — still counts as present.
pub const BLOCK_ID_FLAG_NIL: i32 = 3;

#[derive(Debug, Clone, Deserialize)]
pub struct BlockHeader {
    #[serde(default)]
    pub height: String,
    pub time: DateTime<Utc>,
    pub proposer_address: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitSignature {
    #[serde(default)]
    pub block_id_flag: i32,
    #[serde(default)]
    pub validator_address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LastCommit {
    #[serde(default)]
    pub signatures: Vec<CommitSignature>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TendermintBlock {
    pub header: BlockHeader,
    #[serde(default)]
    pub last_commit: LastCommit,
}

impl TendermintBlock {
    /// Convert into the domain block: parse the decimal height and keep the
    /// addresses that actually voted (commit or nil).
    pub fn to_block(&self) -> Result<Block, RpcError> {
        let height: i64 = self
            .header
            .height
            .parse()
            .map_err(|_| RpcError::Deserialization(format!(
                "invalid block height '{}'",
                self.header.height
            )))?;

        let signatures = self
            .last_commit
            .signatures
            .iter()
            .filter(|s| {
                (s.block_id_flag == BLOCK_ID_FLAG_COMMIT || s.block_id_flag == BLOCK_ID_FLAG_NIL)
                    && !s.validator_address.is_empty()
            })
            .map(|s| s.validator_address.clone())
            .collect();

        Ok(Block {
            height,
            time: self.header.time,
            proposer: self.header.proposer_address.clone(),
            signatures,
        })
    }
}

// ─── GET /block ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct SingleBlockResponse {
    pub result: SingleBlockResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SingleBlockResult {
    pub block: TendermintBlock,
}

// ─── Websocket NewBlock frames ───────────────────────────────────────────────

/// A frame from the `tm.event='NewBlock'` subscription. The subscription
/// confirmation arrives on the same stream with an empty `result`, hence
/// the layered `Option`s.
#[derive(Debug, Clone, Deserialize)]
pub struct WsResponse {
    #[serde(default)]
    pub result: Option<WsResult>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsResult {
    #[serde(default)]
    pub data: Option<WsData>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsData {
    pub value: WsValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WsValue {
    pub block: TendermintBlock,
}

impl WsResponse {
    /// The block carried by this frame, if it is an event frame at all.
    pub fn block(&self) -> Option<&TendermintBlock> {
        self.result
            .as_ref()
            .and_then(|r| r.data.as_ref())
            .map(|d| &d.value.block)
    }
}

// ─── GET /validators ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorsResponse {
    pub result: ValidatorsResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorsResult {
    #[serde(default)]
    pub validators: Vec<HistoricalValidator>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HistoricalValidator {
    pub address: String,
}

// ─── GET /abci_query ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct AbciQueryResponse {
    pub result: AbciQueryResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbciQueryResult {
    pub response: AbciResponseInner,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AbciResponseInner {
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub log: String,
    /// base64-encoded protobuf payload.
    #[serde(default)]
    pub value: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    const BLOCK_JSON: &str = r#"{
        "result": {
            "block": {
                "header": {
                    "height": "12345",
                    "time": "2026-07-01T12:00:00.123456789Z",
                    "proposer_address": "AAAA1111"
                },
                "last_commit": {
                    "signatures": [
                        {"block_id_flag": 2, "validator_address": "AAAA1111"},
                        {"block_id_flag": 3, "validator_address": "BBBB2222"},
                        {"block_id_flag": 1, "validator_address": ""},
                        {"block_id_flag": 2, "validator_address": "CCCC3333"}
                    ]
                }
            }
        }
    }"#;

    #[test]
    fn single_block_parses() {
        let response: SingleBlockResponse = serde_json::from_str(BLOCK_JSON).unwrap();
        let block = response.result.block.to_block().unwrap();
        assert_eq!(block.height, 12345);
        assert_eq!(block.proposer, "AAAA1111");
        // Absent votes are dropped; nil votes count as present.
        assert_eq!(block.signatures, vec!["AAAA1111", "BBBB2222", "CCCC3333"]);
    }

    #[test]
    fn invalid_height_is_a_decode_error() {
        let mut response: SingleBlockResponse = serde_json::from_str(BLOCK_JSON).unwrap();
        response.result.block.header.height = String::new();
        assert!(response.result.block.to_block().is_err());
    }

    #[test]
    fn ws_event_frame_carries_block() {
        let frame = format!(
            r#"{{"jsonrpc":"2.0","id":0,"result":{{"query":"tm.event='NewBlock'","data":{{"type":"tendermint/event/NewBlock","value":{}}}}}}}"#,
            r#"{"block":{"header":{"height":"7","time":"2026-07-01T12:00:06Z","proposer_address":"PP"},"last_commit":{"signatures":[]}}}"#,
        );
        let response: WsResponse = serde_json::from_str(&frame).unwrap();
        let block = response.block().unwrap().to_block().unwrap();
        assert_eq!(block.height, 7);
        assert_eq!(block.proposer, "PP");
    }

    #[test]
    fn ws_confirmation_frame_has_no_block() {
        let frame = r#"{"jsonrpc":"2.0","id":0,"result":{}}"#;
        let response: WsResponse = serde_json::from_str(frame).unwrap();
        assert!(response.block().is_none());
    }

    #[test]
    fn validators_page_parses() {
        let json = r#"{
            "result": {
                "block_height": "100",
                "validators": [
                    {"address": "AAAA", "voting_power": "100"},
                    {"address": "BBBB", "voting_power": "90"}
                ],
                "count": "2",
                "total": "2"
            }
        }"#;
        let response: ValidatorsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.result.validators.len(), 2);
        assert_eq!(response.result.validators[0].address, "AAAA");
    }

    #[test]
    fn abci_envelope_parses() {
        let json = r#"{
            "result": {
                "response": {
                    "code": 0,
                    "log": "",
                    "value": "CgQKAggB"
                }
            }
        }"#;
        let response: AbciQueryResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.result.response.code, 0);
        assert_eq!(response.result.response.value.as_deref(), Some("CgQKAggB"));
    }
}
