//! Task shapes emitted by [`super::TaskGenerator`] and persisted atomically with the
//! mutable-state mutation that produced them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::history::{EventId, FailoverVersion, TimeoutType};

/// Work handed off to the transfer-task queue (matching, in SPEC_FULL.md terms — an external
/// collaborator this crate does not execute).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferTask {
    RecordWorkflowStarted { run_id: Uuid },
    WorkflowStart { run_id: Uuid, task_list: String },
    DelayedDecision { run_id: Uuid, fire_at: DateTime<Utc> },
    DecisionSchedule { run_id: Uuid, scheduled_event_id: EventId, task_list: String },
    DecisionStart { run_id: Uuid, scheduled_event_id: EventId },
    ActivityTransfer { run_id: Uuid, scheduled_event_id: EventId, task_list: String },
    ChildWorkflowTransfer { run_id: Uuid, initiated_event_id: EventId },
    CancelExternalTransfer { run_id: Uuid, initiated_event_id: EventId },
    SignalExternalTransfer { run_id: Uuid, initiated_event_id: EventId },
    SearchAttributeUpsert { run_id: Uuid },
    WorkflowClose { run_id: Uuid },
}

/// A single deferred-fire timer, persisted alongside the mutable-state mutation so a crash
/// cannot lose a pending timeout.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TimerTask {
    ActivityTimeout {
        run_id: Uuid,
        scheduled_event_id: EventId,
        timeout_type: TimeoutType,
        fire_at: DateTime<Utc>,
    },
    UserTimer { run_id: Uuid, timer_id: String, fire_at: DateTime<Utc> },
}

/// Work handed off to cross-cluster replication.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplicationTask {
    pub run_id: Uuid,
    pub first_event_id: EventId,
    pub next_event_id: EventId,
    pub version: FailoverVersion,
}

/// The three transaction-scoped task buffers a single fold accumulates into.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskBatch {
    pub transfer: Vec<TransferTask>,
    pub timer: Vec<TimerTask>,
    pub replication: Vec<ReplicationTask>,
}

impl TaskBatch {
    pub fn is_empty(&self) -> bool {
        self.transfer.is_empty() && self.timer.is_empty() && self.replication.is_empty()
    }
}
