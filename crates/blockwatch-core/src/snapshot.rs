//! Immutable state captures and snapshot diffing.
//!
//! A snapshot is taken under the state read lock, so entries are consistent
//! with each other. Diffing two snapshots yields the domain events that
//! drive notifications.

use std::collections::HashMap;

use crate::events::ReportEvent;
use crate::groups::MissedBlocksGroups;
use crate::report::Report;
use crate::types::{SignatureInfo, Validator};

/// One validator's capture: its record plus its signature window.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEntry {
    pub validator: Validator,
    pub signature_info: SignatureInfo,
}

/// operator_address → entry. Immutable once created.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub entries: HashMap<String, SnapshotEntry>,
}

impl Snapshot {
    pub fn new(entries: HashMap<String, SnapshotEntry>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Compute the events that occurred between `older` and `newer`.
///
/// Jail transitions and group changes in the same diff both emit; a group
/// change is suppressed while the validator is jailed in either capture
/// (jail already explains the misses). Output is grouped by event kind and
/// then ordered by operator address, for deterministic dispatch.
pub fn diff(older: &Snapshot, newer: &Snapshot, groups: &MissedBlocksGroups) -> Report {
    let mut entries = Vec::new();

    for (operator_address, entry) in &newer.entries {
        let Some(older_entry) = older.entries.get(operator_address) else {
            entries.push(ReportEvent::ValidatorCreated {
                validator: entry.validator.clone(),
            });
            continue;
        };

        let validator = &entry.validator;
        let older_validator = &older_entry.validator;

        if validator.jailed && !older_validator.jailed {
            entries.push(ReportEvent::ValidatorJailed {
                validator: validator.clone(),
            });
        }
        if !validator.jailed && older_validator.jailed {
            entries.push(ReportEvent::ValidatorUnjailed {
                validator: validator.clone(),
            });
        }
        if validator.tombstoned && !older_validator.tombstoned {
            entries.push(ReportEvent::ValidatorTombstoned {
                validator: validator.clone(),
            });
        }
        if validator.active && !older_validator.active {
            entries.push(ReportEvent::ValidatorActive {
                validator: validator.clone(),
            });
        }
        if !validator.active && older_validator.active {
            entries.push(ReportEvent::ValidatorInactive {
                validator: validator.clone(),
            });
        }
        if validator.signatory && !older_validator.signatory {
            entries.push(ReportEvent::ValidatorJoinedSignatory {
                validator: validator.clone(),
            });
        }
        if !validator.signatory && older_validator.signatory {
            entries.push(ReportEvent::ValidatorLeftSignatory {
                validator: validator.clone(),
            });
        }

        if !validator.jailed && !older_validator.jailed {
            let missed_before = older_entry.signature_info.not_signed;
            let missed_after = entry.signature_info.not_signed;
            let before_group = groups.group_for(missed_before);
            let after_group = groups.group_for(missed_after);
            if let (Some(before_group), Some(after_group)) = (before_group, after_group) {
                if before_group.start != after_group.start {
                    entries.push(ReportEvent::ValidatorGroupChanged {
                        validator: validator.clone(),
                        missed_blocks_before: missed_before,
                        missed_blocks_after: missed_after,
                        group_before: before_group.clone(),
                        group_after: after_group.clone(),
                    });
                }
            }
        }
    }

    entries.sort_by(|a, b| {
        a.kind_rank()
            .cmp(&b.kind_rank())
            .then_with(|| a.validator().operator_address.cmp(&b.validator().operator_address))
    });

    Report::new(entries)
}
