//! The mutable workflow-run projection and its replication bookkeeping.
//!
//! - [`MutableState`] — the full in-memory projection of a single run
//! - [`ExecutionInfo`] — identity and slowly-changing run configuration
//! - [`Replication`] — the legacy-vs-version-histories sum type

mod execution_info;
mod mutable_state;
mod replication;

pub use execution_info::{DecisionInfo, ExecutionInfo, RunState};
pub use mutable_state::{
    HistoryBuilder, MutableState, PendingActivityInfo, PendingChildExecutionInfo,
    PendingRequestCancelInfo, PendingSignalInfo, PendingTimerInfo, StateError,
};
pub use replication::{
    LegacyReplicationState, Replication, VersionHistories, VersionHistory, VersionHistoryItem,
};
