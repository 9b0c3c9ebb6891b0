//! Core domain types: blocks, validators, signature windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A block as observed from the chain.
///
/// Keyed by height and immutable once observed. `signatures` holds the
/// consensus addresses that signed the block's last commit; order is
/// preserved for debugging but the field is semantically a set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    pub height: i64,
    pub time: DateTime<Utc>,
    /// Consensus address of the proposer, upper-hex.
    pub proposer: String,
    pub signatures: Vec<String>,
}

impl Block {
    /// Content hash used by the ingestion dedup queue.
    ///
    /// Two observations of the same block on different peers hash equally.
    pub fn hash(&self) -> String {
        let digest = Sha256::digest(format!("{}:{}", self.height, self.proposer).as_bytes());
        hex::encode(digest)
    }

    /// Returns `true` if the given consensus address signed this block.
    pub fn signed_by(&self, consensus_address: &str) -> bool {
        self.signatures.iter().any(|s| s == consensus_address)
    }
}

/// A validator as refreshed from RPC.
///
/// Identity is the operator address; every other field is mutable and
/// replaced wholesale on each refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// bech32 staking identifier (`…valoper…`). Stable identity.
    pub operator_address: String,
    /// Upper-hex consensus address derived from the consensus pubkey.
    pub consensus_address: String,
    pub moniker: String,
    pub jailed: bool,
    pub tombstoned: bool,
    /// Bonded (in the staking active set).
    pub active: bool,
    /// Member of the consensus active set at the last refresh, i.e.
    /// currently required to sign blocks.
    pub signatory: bool,
    pub consensus_pubkey: Vec<u8>,
    /// On-chain missed-blocks counter from the validator's signing info.
    pub missed_blocks_counter: i64,
}

/// Derive the consensus address from a consensus public key.
///
/// Tendermint addresses are the first 20 bytes of SHA-256 over the raw key,
/// rendered upper-hex — the form block signatures use.
pub fn consensus_address(pubkey: &[u8]) -> String {
    let digest = Sha256::digest(pubkey);
    hex::encode_upper(&digest[..20])
}

/// Per-validator signature counts over a window of recent blocks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub proposed: i64,
    pub signed: i64,
    pub not_signed: i64,
}

impl SignatureInfo {
    /// Number of window slots the validator was counted in at all.
    pub fn total(&self) -> i64 {
        self.proposed + self.signed + self.not_signed
    }
}

/// A renderable hyperlink. An empty `href` renders as bare text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Link {
    pub text: String,
    pub href: String,
}
