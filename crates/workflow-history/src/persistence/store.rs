//! The storage-facing port the state builder and conflict resolver are coded against.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::history::{EventId, FailoverVersion, HistoryEvent};
use crate::state::{MutableState, RunState};
use crate::tasks::TaskBatch;

/// A snapshot of mutable state as persisted or returned by the store. The projection itself
/// carries no store-specific bookkeeping, so this is simply an alias rather than a parallel
/// struct that would need to be kept in sync.
pub type MutableStateSnapshot = MutableState;

/// Identifies a single workflow run for store operations.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct WorkflowExecutionRef {
    pub namespace_id: Uuid,
    pub workflow_id: String,
    pub run_id: Uuid,
}

/// Errors raised by a [`HistoryStore`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("workflow execution not found: {0:?}")]
    NotFound(WorkflowExecutionRef),

    #[error("optimistic concurrency conflict: expected next event id {expected}, store has {actual}")]
    ConcurrencyConflict { expected: EventId, actual: EventId },

    #[error("conflict-resolve CAS rejected: current workflow pointer changed under us")]
    CasRejected,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid argument: unknown event type {0}")]
    InvalidEventType(String),

    #[error("underlying database error: {0}")]
    Database(String),
}

/// CAS guard for the "current run pointer" of a workflow id, used exclusively by
/// [`HistoryStore::conflict_resolve`]. Protects against two concurrent resolvers both believing
/// they are rebuilding the same stale run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentWorkflowCas {
    pub prev_run_id: Uuid,
    pub prev_last_write_version: FailoverVersion,
    pub prev_state: RunState,
}

/// Input to a conflict-resolve write: the freshly rebuilt snapshot plus the CAS guards that must
/// hold for the write to succeed.
#[derive(Debug, Clone)]
pub struct ConflictResolveRequest {
    pub execution: WorkflowExecutionRef,
    pub rebuilt_state: MutableStateSnapshot,
    pub tasks: TaskBatch,
    pub condition: i64,
    pub current_workflow_cas: CurrentWorkflowCas,
}

/// A page of history plus an opaque continuation token.
#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub events: Vec<HistoryEvent>,
    pub next_page_token: Option<Vec<u8>>,
}

/// Storage port the state builder, task generator, and conflict resolver are coded against.
///
/// This crate ships two implementations: [`super::InMemoryHistoryStore`] for tests and
/// single-process embedding, and [`super::PostgresHistoryStore`] for production.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn read_mutable_state(
        &self,
        execution: &WorkflowExecutionRef,
    ) -> Result<MutableStateSnapshot, StoreError>;

    async fn read_history_page(
        &self,
        execution: &WorkflowExecutionRef,
        from_event_id: EventId,
        page_token: Option<Vec<u8>>,
    ) -> Result<HistoryPage, StoreError>;

    /// Persist a freshly folded state and its task batch in one transaction, subject to an
    /// optimistic-concurrency check on `expected_next_event_id`. Returns the new condition token.
    async fn append_history_and_mutate(
        &self,
        execution: &WorkflowExecutionRef,
        expected_next_event_id: EventId,
        events: Vec<HistoryEvent>,
        tasks: TaskBatch,
        state: MutableStateSnapshot,
        condition: i64,
    ) -> Result<i64, StoreError>;

    /// Persist a conflict-resolve rebuild. Succeeds only if `request.current_workflow_cas`
    /// matches what the store currently has recorded for the workflow id.
    async fn conflict_resolve(
        &self,
        request: ConflictResolveRequest,
    ) -> Result<MutableStateSnapshot, StoreError>;
}
