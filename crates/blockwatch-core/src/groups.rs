//! The user-defined missed-blocks partition.
//!
//! Groups bucket the not-signed count over the signature window. Moving
//! between buckets is the primary notification trigger, so the partition
//! must cover `[0, window]` exhaustively and without overlap — validated
//! once at config load.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// One bucket of the partition, inclusive on both ends.
///
/// The `*_start` texts describe entering the group from below (getting
/// worse), the `*_end` texts entering from above (recovering).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissedBlocksGroup {
    pub start: i64,
    pub end: i64,
    #[serde(rename = "emoji-start")]
    pub emoji_start: String,
    #[serde(rename = "emoji-end")]
    pub emoji_end: String,
    #[serde(rename = "desc-start")]
    pub desc_start: String,
    #[serde(rename = "desc-end")]
    pub desc_end: String,
}

/// The ordered partition of `[0, window]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MissedBlocksGroups(pub Vec<MissedBlocksGroup>);

impl MissedBlocksGroups {
    /// The group a missed count falls into.
    pub fn group_for(&self, missed: i64) -> Option<&MissedBlocksGroup> {
        self.0.iter().find(|g| missed >= g.start && missed <= g.end)
    }

    /// Check the partition is exhaustive and disjoint over `[0, window]`.
    pub fn validate(&self, window: i64) -> Result<(), ConfigError> {
        if self.0.is_empty() {
            return Err(ConfigError::InvalidGroups("no groups defined".into()));
        }

        let first = &self.0[0];
        if first.start != 0 {
            return Err(ConfigError::InvalidGroups(format!(
                "first group starts at {}, expected 0",
                first.start
            )));
        }

        for (index, group) in self.0.iter().enumerate() {
            if group.end < group.start {
                return Err(ConfigError::InvalidGroups(format!(
                    "group #{index} has end {} before start {}",
                    group.end, group.start
                )));
            }

            if index > 0 {
                let previous = &self.0[index - 1];
                if group.start != previous.end + 1 {
                    return Err(ConfigError::InvalidGroups(format!(
                        "group #{index} starts at {}, expected {}",
                        group.start,
                        previous.end + 1
                    )));
                }
            }
        }

        let last = self.0.last().expect("checked non-empty");
        if last.end < window {
            return Err(ConfigError::InvalidGroups(format!(
                "groups end at {} but the window is {window}",
                last.end
            )));
        }

        Ok(())
    }
}
