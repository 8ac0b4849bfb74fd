use std::collections::HashSet;

use crate::types::{HandoffRecord, NodeId};

/// Append-only log of the handoffs of one run.
#[derive(Debug, Clone, Default)]
pub struct HandoffHistory {
    records: Vec<HandoffRecord>,
}

impl HandoffHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: HandoffRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[HandoffRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&HandoffRecord> {
        self.records.last()
    }

    /// Distinct handoff targets among the last `window` records, or `None`
    /// while fewer than `window` handoffs have happened.
    pub fn unique_targets_in_window(&self, window: usize) -> Option<usize> {
        if window == 0 || self.records.len() < window {
            return None;
        }
        let recent = &self.records[self.records.len() - window..];
        let targets: HashSet<&NodeId> = recent.iter().map(|r| &r.to_node).collect();
        Some(targets.len())
    }

    /// True when the last `window` handoffs went to fewer than
    /// `min_unique` distinct agents.
    pub fn is_repetitive(&self, window: usize, min_unique: usize) -> bool {
        self.unique_targets_in_window(window)
            .map(|unique| unique < min_unique)
            .unwrap_or(false)
    }

    pub fn into_records(self) -> Vec<HandoffRecord> {
        self.records
    }
}
