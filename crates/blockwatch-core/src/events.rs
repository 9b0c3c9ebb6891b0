//! Domain events produced by snapshot diffing.
//!
//! A sealed sum type rather than a trait object: serializers match
//! exhaustively, so adding a variant is a compile error everywhere it
//! matters. Each event knows its symbolic name and how to render itself
//! into a chat message given pre-formatted context.

use crate::groups::MissedBlocksGroup;
use crate::types::Validator;

/// Output format for event rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderFormat {
    Html,
    Markdown,
    /// Deliberately unsupported; exercises the fallback path.
    Test,
}

impl std::fmt::Display for RenderFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Html => write!(f, "html"),
            Self::Markdown => write!(f, "markdown"),
            Self::Test => write!(f, "test"),
        }
    }
}

/// Pre-formatted context handed to the renderer by the dispatch pipeline.
#[derive(Debug, Clone, Default)]
pub struct RenderData {
    /// Space-joined notifier mentions, already escaped for the target
    /// platform. Empty when nobody subscribed.
    pub notifiers: String,
    /// Already-serialized validator link for the target platform.
    pub validator_link: String,
    /// Human-formatted time until jail, present only for an increasing
    /// group change of a bonded validator.
    pub time_till_jail: Option<String>,
}

/// A materialized change between two snapshots.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportEvent {
    ValidatorCreated {
        validator: Validator,
    },
    ValidatorGroupChanged {
        validator: Validator,
        missed_blocks_before: i64,
        missed_blocks_after: i64,
        group_before: MissedBlocksGroup,
        group_after: MissedBlocksGroup,
    },
    ValidatorJailed {
        validator: Validator,
    },
    ValidatorUnjailed {
        validator: Validator,
    },
    ValidatorTombstoned {
        validator: Validator,
    },
    ValidatorActive {
        validator: Validator,
    },
    ValidatorInactive {
        validator: Validator,
    },
    ValidatorJoinedSignatory {
        validator: Validator,
    },
    ValidatorLeftSignatory {
        validator: Validator,
    },
}

impl ReportEvent {
    /// Symbolic event name, used for metrics labels and logs.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::ValidatorCreated { .. } => "ValidatorCreated",
            Self::ValidatorGroupChanged { .. } => "ValidatorGroupChanged",
            Self::ValidatorJailed { .. } => "ValidatorJailed",
            Self::ValidatorUnjailed { .. } => "ValidatorUnjailed",
            Self::ValidatorTombstoned { .. } => "ValidatorTombstoned",
            Self::ValidatorActive { .. } => "ValidatorActive",
            Self::ValidatorInactive { .. } => "ValidatorInactive",
            Self::ValidatorJoinedSignatory { .. } => "ValidatorJoinedSignatory",
            Self::ValidatorLeftSignatory { .. } => "ValidatorLeftSignatory",
        }
    }

    /// The validator this event is about.
    pub fn validator(&self) -> &Validator {
        match self {
            Self::ValidatorCreated { validator }
            | Self::ValidatorGroupChanged { validator, .. }
            | Self::ValidatorJailed { validator }
            | Self::ValidatorUnjailed { validator }
            | Self::ValidatorTombstoned { validator }
            | Self::ValidatorActive { validator }
            | Self::ValidatorInactive { validator }
            | Self::ValidatorJoinedSignatory { validator }
            | Self::ValidatorLeftSignatory { validator } => validator,
        }
    }

    /// Rank used to group events of the same kind within a report.
    pub(crate) fn kind_rank(&self) -> u8 {
        match self {
            Self::ValidatorCreated { .. } => 0,
            Self::ValidatorGroupChanged { .. } => 1,
            Self::ValidatorJailed { .. } => 2,
            Self::ValidatorUnjailed { .. } => 3,
            Self::ValidatorTombstoned { .. } => 4,
            Self::ValidatorActive { .. } => 5,
            Self::ValidatorInactive { .. } => 6,
            Self::ValidatorJoinedSignatory { .. } => 7,
            Self::ValidatorLeftSignatory { .. } => 8,
        }
    }

    /// Returns `true` for a group change where the missed count grew.
    pub fn is_increasing(&self) -> bool {
        match self {
            Self::ValidatorGroupChanged {
                group_before,
                group_after,
                ..
            } => group_before.start < group_after.start,
            _ => false,
        }
    }

    /// Render the event into a single message line.
    ///
    /// Unsupported formats yield the literal
    /// `Unsupported format type: <format>` — observable behavior relied on
    /// by callers that probe format support.
    pub fn render(&self, format: RenderFormat, data: &RenderData) -> String {
        let (bold_open, bold_close) = match format {
            RenderFormat::Html => ("<strong>", "</strong>"),
            RenderFormat::Markdown => ("**", "**"),
            other => return format!("Unsupported format type: {other}"),
        };

        let link = &data.validator_link;
        let notifiers = if data.notifiers.is_empty() {
            String::new()
        } else {
            format!(" {}", data.notifiers)
        };

        match self {
            Self::ValidatorGroupChanged {
                group_before,
                group_after,
                ..
            } => {
                let increasing = group_before.start < group_after.start;
                let emoji = if increasing {
                    &group_after.emoji_start
                } else {
                    &group_after.emoji_end
                };
                let desc = if increasing {
                    &group_after.desc_start
                } else {
                    &group_after.desc_end
                };
                let till_jail = data
                    .time_till_jail
                    .as_ref()
                    .map(|t| format!(" ({t} till jail)"))
                    .unwrap_or_default();
                format!("{bold_open}{emoji} {link} {desc}{bold_close}{till_jail}{notifiers}")
            }
            Self::ValidatorCreated { .. } => {
                format!("{bold_open}💡New validator created: {link}{bold_close}{notifiers}")
            }
            Self::ValidatorJailed { .. } => {
                format!("{bold_open}❌ {link} was jailed{bold_close}{notifiers}")
            }
            Self::ValidatorUnjailed { .. } => {
                format!("{bold_open}👌 {link} was unjailed{bold_close}{notifiers}")
            }
            Self::ValidatorTombstoned { .. } => {
                format!("{bold_open}💀 {link} was tombstoned{bold_close}{notifiers}")
            }
            Self::ValidatorActive { .. } => {
                format!("{bold_open}✅ {link} is now in the active set{bold_close}{notifiers}")
            }
            Self::ValidatorInactive { .. } => {
                format!("{bold_open}😔 {link} is now not in the active set{bold_close}{notifiers}")
            }
            Self::ValidatorJoinedSignatory { .. } => {
                format!("{bold_open}📝 {link} is now required to sign blocks{bold_close}{notifiers}")
            }
            Self::ValidatorLeftSignatory { .. } => {
                format!(
                    "{bold_open}👋 {link} is now not required to sign blocks{bold_close}{notifiers}"
                )
            }
        }
    }
}
