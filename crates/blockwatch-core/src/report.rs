//! A report is the ordered batch of events produced by one snapshot diff.

use crate::events::ReportEvent;

/// Ordered sequence of events dispatched to every enabled reporter.
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub entries: Vec<ReportEvent>,
}

impl Report {
    pub fn new(entries: Vec<ReportEvent>) -> Self {
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
