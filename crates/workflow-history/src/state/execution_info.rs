//! Execution-level bookkeeping carried by [`super::MutableState`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::history::{EventId, FailoverVersion};

/// Coarse-grained run state. Narrower than the closed history-event set; several terminal event
/// types all collapse to `Completed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Created,
    Running,
    Completed,
}

/// A decision task in flight, tracked through {none → scheduled → started → terminal}.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DecisionInfo {
    pub version: FailoverVersion,
    pub scheduled_event_id: EventId,
    pub started_event_id: Option<EventId>,
    pub request_id: Option<Uuid>,
    pub start_to_close_timeout_ms: u64,
    pub attempt: u32,
    pub original_scheduled_timestamp: DateTime<Utc>,
}

/// Identity plus static/slowly-changing configuration for a single workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionInfo {
    pub namespace_id: Uuid,
    pub workflow_id: String,
    pub run_id: Uuid,

    pub parent_workflow_id: Option<String>,
    pub parent_run_id: Option<Uuid>,

    pub task_list: String,
    pub workflow_execution_timeout_ms: u64,
    pub workflow_run_timeout_ms: u64,
    pub workflow_task_timeout_ms: u64,

    pub state: RunState,

    /// Id of the first event of the most recently applied slice.
    pub last_first_event_id: EventId,
    /// Id the next applied event must carry.
    pub next_event_id: EventId,
    /// Highest event id the builder has folded so far (equal to next_event_id - 1 once a slice
    /// has been applied).
    pub last_processed_event_id: EventId,

    pub start_timestamp: DateTime<Utc>,
    pub updated_timestamp: DateTime<Utc>,

    /// Opaque handle to the persisted history branch; passed through to the store unexamined.
    pub branch_token: Vec<u8>,

    pub decision: Option<DecisionInfo>,
}

impl ExecutionInfo {
    pub fn new_run(
        namespace_id: Uuid,
        workflow_id: impl Into<String>,
        run_id: Uuid,
        task_list: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            namespace_id,
            workflow_id: workflow_id.into(),
            run_id,
            parent_workflow_id: None,
            parent_run_id: None,
            task_list: task_list.into(),
            workflow_execution_timeout_ms: 0,
            workflow_run_timeout_ms: 0,
            workflow_task_timeout_ms: 10_000,
            state: RunState::Created,
            last_first_event_id: 0,
            next_event_id: 1,
            last_processed_event_id: 0,
            start_timestamp: now,
            updated_timestamp: now,
            branch_token: Vec::new(),
            decision: None,
        }
    }
}
