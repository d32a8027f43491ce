//! Cross-cluster replication bookkeeping.
//!
//! A run is replicated either the legacy way ([`LegacyReplicationState`]) or the newer
//! version-history way ([`VersionHistories`]) — never both. [`Replication`] enforces that as a
//! sum type rather than two optional fields, so a state with both or neither populated cannot be
//! constructed.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::history::{EventId, FailoverVersion};

/// Per-cluster bookkeeping of how far replication has progressed, under the legacy scheme.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LegacyReplicationState {
    pub current_version: FailoverVersion,
    pub start_version: FailoverVersion,
    pub last_write_version: FailoverVersion,
    pub last_write_event_id: EventId,
    /// cluster name -> last event id replicated to that cluster
    pub last_replication_info: HashMap<String, EventId>,
}

impl LegacyReplicationState {
    pub fn record_slice(&mut self, last_event_version: FailoverVersion, last_event_id: EventId) {
        self.current_version = last_event_version;
        self.last_write_version = last_event_version;
        self.last_write_event_id = last_event_id;
    }
}

/// One item of causal lineage proof: an event id paired with the failover version that owned it.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionHistoryItem {
    pub event_id: EventId,
    pub version: FailoverVersion,
}

/// One branch of version history. Branches diverge when a conflict-resolve rewinds and
/// re-diverges history; exactly one branch is ever marked current.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VersionHistory {
    pub branch_token: Vec<u8>,
    pub items: Vec<VersionHistoryItem>,
}

impl VersionHistory {
    pub fn current_version(&self) -> FailoverVersion {
        self.items.last().map(|i| i.version).unwrap_or(0)
    }

    /// Append or extend the trailing item with a new (event_id, version) pair.
    pub fn update(&mut self, event_id: EventId, version: FailoverVersion) {
        match self.items.last_mut() {
            Some(last) if last.version == version => last.event_id = event_id,
            _ => self.items.push(VersionHistoryItem { event_id, version }),
        }
    }
}

/// The NDC replication scheme: a set of branches, exactly one of which is current.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VersionHistories {
    pub current_branch_index: usize,
    pub histories: Vec<VersionHistory>,
}

impl VersionHistories {
    pub fn new(initial: VersionHistory) -> Self {
        Self {
            current_branch_index: 0,
            histories: vec![initial],
        }
    }

    pub fn current(&self) -> &VersionHistory {
        &self.histories[self.current_branch_index]
    }

    pub fn current_mut(&mut self) -> &mut VersionHistory {
        &mut self.histories[self.current_branch_index]
    }
}

/// Exactly one of the two replication schemes a run may use.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Replication {
    Legacy(LegacyReplicationState),
    VersionHistories(VersionHistories),
}

impl Replication {
    /// Advance bookkeeping for the final event of a just-applied slice (SPEC_FULL.md §4.1
    /// prelude step 1/2: the whole slice is recorded as if atomic).
    pub fn record_slice(&mut self, event_id: EventId, version: FailoverVersion) {
        match self {
            Self::Legacy(state) => state.record_slice(version, event_id),
            Self::VersionHistories(histories) => histories.current_mut().update(event_id, version),
        }
    }

    pub fn current_version(&self) -> FailoverVersion {
        match self {
            Self::Legacy(state) => state.current_version,
            Self::VersionHistories(histories) => histories.current().current_version(),
        }
    }
}
