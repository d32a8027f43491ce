//! The canonical history event record.
//!
//! A workflow run's history is an append-only, strictly-ordered sequence of [`HistoryEvent`]s.
//! Nothing about a run's observable state exists except as the fold of this sequence through
//! [`crate::builder::StateBuilder`] — the event log, not the in-memory projection, is the
//! source of truth.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Failure;

/// Failover version: identifies which cluster owned a segment of history when an event was
/// written. Monotonically non-decreasing within a single cluster-ownership segment.
pub type FailoverVersion = i64;

/// Monotonic, 1-based identifier of an event within a single workflow run.
pub type EventId = i64;

/// Types of timeouts that can occur against a pending activity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutType {
    /// Activity was not claimed within schedule_to_start_timeout.
    ScheduleToStart,
    /// Activity did not complete within start_to_close_timeout.
    StartToClose,
    /// Worker did not send a heartbeat within heartbeat_timeout.
    Heartbeat,
    /// Workflow execution exceeded its run timeout.
    Run,
}

/// Cause recorded when a decision task fails or times out.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecisionTaskFailedCause {
    /// The worker's decision handler returned an error.
    WorkerUnhandledFailure,
    /// The decision batch referenced an activity or timer id that does not exist.
    BadScheduleActivityAttributes,
    /// Replay detected a decision that does not match history (nondeterminism).
    NonDeterministicError,
    /// A decision task was reset by a conflict-resolve replay.
    ResetWorkflow,
}

/// A single immutable record in a workflow run's history.
///
/// Every variant is the closed set this crate understands; [`crate::builder::StateBuilder`]
/// fails a fold outright if an unrecognized event type appears rather than silently skipping it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HistoryEventType {
    // === Workflow Lifecycle ===
    /// First event of a run. Carries the input, parent linkage (if any), and timeout config.
    WorkflowExecutionStarted {
        input: serde_json::Value,
        parent_workflow_id: Option<String>,
        parent_run_id: Option<Uuid>,
        task_list: String,
        workflow_execution_timeout_ms: u64,
        workflow_run_timeout_ms: u64,
        workflow_task_timeout_ms: u64,
        /// First decision task is delayed by this many seconds (cron / initial backoff).
        first_decision_task_backoff_seconds: u64,
    },
    WorkflowExecutionCompleted { result: serde_json::Value },
    WorkflowExecutionFailed { failure: Failure },
    WorkflowExecutionTimedOut,
    WorkflowExecutionCanceled { details: serde_json::Value },
    WorkflowExecutionTerminated { reason: String },
    /// Terminates the current run and hands off to a new run under the same workflow id.
    WorkflowExecutionContinuedAsNew {
        new_run_id: Uuid,
        backoff_start_interval_ms: u64,
    },
    WorkflowExecutionCancelRequested { cause: String },
    WorkflowExecutionSignaled { signal_name: String, input: serde_json::Value },
    UpsertWorkflowSearchAttributes { search_attributes: serde_json::Value },

    // === Decision Task Lifecycle ===
    DecisionTaskScheduled {
        task_list: String,
        start_to_close_timeout_ms: u64,
        attempt: u32,
    },
    DecisionTaskStarted { scheduled_event_id: EventId, request_id: Uuid },
    DecisionTaskCompleted { scheduled_event_id: EventId, started_event_id: EventId },
    DecisionTaskTimedOut { scheduled_event_id: EventId, timeout_type: TimeoutType },
    DecisionTaskFailed {
        scheduled_event_id: EventId,
        cause: DecisionTaskFailedCause,
        failure: Option<Failure>,
    },

    // === Activity Task Lifecycle ===
    ActivityTaskScheduled {
        activity_id: String,
        activity_type: String,
        input: serde_json::Value,
        task_list: String,
        schedule_to_start_timeout_ms: u64,
        start_to_close_timeout_ms: u64,
        heartbeat_timeout_ms: Option<u64>,
    },
    ActivityTaskStarted { scheduled_event_id: EventId, attempt: u32, identity: String },
    ActivityTaskCompleted { scheduled_event_id: EventId, result: serde_json::Value },
    ActivityTaskFailed { scheduled_event_id: EventId, failure: Failure },
    ActivityTaskTimedOut { scheduled_event_id: EventId, timeout_type: TimeoutType },
    ActivityTaskCancelRequested { scheduled_event_id: EventId },
    ActivityTaskCanceled { scheduled_event_id: EventId, details: serde_json::Value },
    RequestCancelActivityTaskFailed { activity_id: String, cause: String },

    // === Timers ===
    TimerStarted { timer_id: String, start_to_fire_timeout_ms: u64 },
    TimerFired { timer_id: String, started_event_id: EventId },
    TimerCanceled { timer_id: String },
    CancelTimerFailed { timer_id: String, cause: String },

    // === Child Workflows ===
    StartChildWorkflowExecutionInitiated {
        workflow_id: String,
        workflow_type: String,
        input: serde_json::Value,
        task_list: String,
    },
    StartChildWorkflowExecutionFailed { workflow_id: String, cause: String },
    ChildWorkflowExecutionStarted { workflow_id: String, run_id: Uuid },
    ChildWorkflowExecutionCompleted { workflow_id: String, run_id: Uuid, result: serde_json::Value },
    ChildWorkflowExecutionFailed { workflow_id: String, run_id: Uuid, failure: Failure },
    ChildWorkflowExecutionCanceled { workflow_id: String, run_id: Uuid },
    ChildWorkflowExecutionTimedOut { workflow_id: String, run_id: Uuid },
    ChildWorkflowExecutionTerminated { workflow_id: String, run_id: Uuid },

    // === External Workflow Interaction ===
    RequestCancelExternalWorkflowExecutionInitiated { workflow_id: String, run_id: Option<Uuid> },
    RequestCancelExternalWorkflowExecutionFailed { workflow_id: String, cause: String },
    ExternalWorkflowExecutionCancelRequested { workflow_id: String, run_id: Uuid },
    SignalExternalWorkflowExecutionInitiated {
        workflow_id: String,
        run_id: Option<Uuid>,
        signal_name: String,
        input: serde_json::Value,
    },
    SignalExternalWorkflowExecutionFailed { workflow_id: String, cause: String },
    ExternalWorkflowExecutionSignaled { workflow_id: String, run_id: Uuid },

    // === Markers ===
    MarkerRecorded { marker_name: String, details: serde_json::Value },
}

/// An event at a specific position in history, with replication metadata attached.
///
/// This is the record actually persisted and folded by the state builder; the event type and
/// its attributes are [`HistoryEventType`], everything else here is positional/replication
/// bookkeeping that the event's payload itself never needs to know about.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HistoryEvent {
    /// Monotonic position within the run, starting at 1.
    pub event_id: EventId,
    /// Failover version in effect when this event was written.
    pub version: FailoverVersion,
    /// Wall-clock time the event was appended, used by task generation instead of `Utc::now()`
    /// so replays are deterministic.
    pub timestamp: DateTime<Utc>,
    /// Task id of the transfer/timer task that produced this event, if any. Last-wins when a
    /// fold applies multiple events in one transaction.
    pub task_id: Option<i64>,
    /// The event payload.
    pub event_type: HistoryEventType,
}

impl HistoryEvent {
    pub fn new(event_id: EventId, version: FailoverVersion, event_type: HistoryEventType) -> Self {
        Self {
            event_id,
            version,
            timestamp: Utc::now(),
            task_id: None,
            event_type,
        }
    }

    /// The scheduled-event id an activity terminal/progress event refers back to, if this event
    /// is part of the activity lifecycle.
    pub fn activity_schedule_id(&self) -> Option<EventId> {
        match &self.event_type {
            HistoryEventType::ActivityTaskScheduled { .. } => Some(self.event_id),
            HistoryEventType::ActivityTaskStarted { scheduled_event_id, .. }
            | HistoryEventType::ActivityTaskCompleted { scheduled_event_id, .. }
            | HistoryEventType::ActivityTaskFailed { scheduled_event_id, .. }
            | HistoryEventType::ActivityTaskTimedOut { scheduled_event_id, .. }
            | HistoryEventType::ActivityTaskCancelRequested { scheduled_event_id }
            | HistoryEventType::ActivityTaskCanceled { scheduled_event_id, .. } => {
                Some(*scheduled_event_id)
            }
            _ => None,
        }
    }

    /// True once this event terminates the run (a continue-as-new still terminates the *current*
    /// run, even though a new run follows it).
    pub fn is_run_terminal(&self) -> bool {
        matches!(
            self.event_type,
            HistoryEventType::WorkflowExecutionCompleted { .. }
                | HistoryEventType::WorkflowExecutionFailed { .. }
                | HistoryEventType::WorkflowExecutionTimedOut
                | HistoryEventType::WorkflowExecutionCanceled { .. }
                | HistoryEventType::WorkflowExecutionTerminated { .. }
                | HistoryEventType::WorkflowExecutionContinuedAsNew { .. }
        )
    }

    /// The event-type tag string, used in error messages for unrecognized-type reporting and in
    /// tests that assert on a specific event having occurred.
    pub fn type_name(&self) -> &'static str {
        match &self.event_type {
            HistoryEventType::WorkflowExecutionStarted { .. } => "workflow_execution_started",
            HistoryEventType::WorkflowExecutionCompleted { .. } => "workflow_execution_completed",
            HistoryEventType::WorkflowExecutionFailed { .. } => "workflow_execution_failed",
            HistoryEventType::WorkflowExecutionTimedOut => "workflow_execution_timed_out",
            HistoryEventType::WorkflowExecutionCanceled { .. } => "workflow_execution_canceled",
            HistoryEventType::WorkflowExecutionTerminated { .. } => "workflow_execution_terminated",
            HistoryEventType::WorkflowExecutionContinuedAsNew { .. } => {
                "workflow_execution_continued_as_new"
            }
            HistoryEventType::WorkflowExecutionCancelRequested { .. } => {
                "workflow_execution_cancel_requested"
            }
            HistoryEventType::WorkflowExecutionSignaled { .. } => "workflow_execution_signaled",
            HistoryEventType::UpsertWorkflowSearchAttributes { .. } => {
                "upsert_workflow_search_attributes"
            }
            HistoryEventType::DecisionTaskScheduled { .. } => "decision_task_scheduled",
            HistoryEventType::DecisionTaskStarted { .. } => "decision_task_started",
            HistoryEventType::DecisionTaskCompleted { .. } => "decision_task_completed",
            HistoryEventType::DecisionTaskTimedOut { .. } => "decision_task_timed_out",
            HistoryEventType::DecisionTaskFailed { .. } => "decision_task_failed",
            HistoryEventType::ActivityTaskScheduled { .. } => "activity_task_scheduled",
            HistoryEventType::ActivityTaskStarted { .. } => "activity_task_started",
            HistoryEventType::ActivityTaskCompleted { .. } => "activity_task_completed",
            HistoryEventType::ActivityTaskFailed { .. } => "activity_task_failed",
            HistoryEventType::ActivityTaskTimedOut { .. } => "activity_task_timed_out",
            HistoryEventType::ActivityTaskCancelRequested { .. } => {
                "activity_task_cancel_requested"
            }
            HistoryEventType::ActivityTaskCanceled { .. } => "activity_task_canceled",
            HistoryEventType::RequestCancelActivityTaskFailed { .. } => {
                "request_cancel_activity_task_failed"
            }
            HistoryEventType::TimerStarted { .. } => "timer_started",
            HistoryEventType::TimerFired { .. } => "timer_fired",
            HistoryEventType::TimerCanceled { .. } => "timer_canceled",
            HistoryEventType::CancelTimerFailed { .. } => "cancel_timer_failed",
            HistoryEventType::StartChildWorkflowExecutionInitiated { .. } => {
                "start_child_workflow_execution_initiated"
            }
            HistoryEventType::StartChildWorkflowExecutionFailed { .. } => {
                "start_child_workflow_execution_failed"
            }
            HistoryEventType::ChildWorkflowExecutionStarted { .. } => {
                "child_workflow_execution_started"
            }
            HistoryEventType::ChildWorkflowExecutionCompleted { .. } => {
                "child_workflow_execution_completed"
            }
            HistoryEventType::ChildWorkflowExecutionFailed { .. } => {
                "child_workflow_execution_failed"
            }
            HistoryEventType::ChildWorkflowExecutionCanceled { .. } => {
                "child_workflow_execution_canceled"
            }
            HistoryEventType::ChildWorkflowExecutionTimedOut { .. } => {
                "child_workflow_execution_timed_out"
            }
            HistoryEventType::ChildWorkflowExecutionTerminated { .. } => {
                "child_workflow_execution_terminated"
            }
            HistoryEventType::RequestCancelExternalWorkflowExecutionInitiated { .. } => {
                "request_cancel_external_workflow_execution_initiated"
            }
            HistoryEventType::RequestCancelExternalWorkflowExecutionFailed { .. } => {
                "request_cancel_external_workflow_execution_failed"
            }
            HistoryEventType::ExternalWorkflowExecutionCancelRequested { .. } => {
                "external_workflow_execution_cancel_requested"
            }
            HistoryEventType::SignalExternalWorkflowExecutionInitiated { .. } => {
                "signal_external_workflow_execution_initiated"
            }
            HistoryEventType::SignalExternalWorkflowExecutionFailed { .. } => {
                "signal_external_workflow_execution_failed"
            }
            HistoryEventType::ExternalWorkflowExecutionSignaled { .. } => {
                "external_workflow_execution_signaled"
            }
            HistoryEventType::MarkerRecorded { .. } => "marker_recorded",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_json() {
        let event = HistoryEvent::new(
            1,
            3,
            HistoryEventType::WorkflowExecutionStarted {
                input: serde_json::json!({"order_id": "123"}),
                parent_workflow_id: None,
                parent_run_id: None,
                task_list: "orders".into(),
                workflow_execution_timeout_ms: 0,
                workflow_run_timeout_ms: 0,
                workflow_task_timeout_ms: 10_000,
                first_decision_task_backoff_seconds: 0,
            },
        );

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"workflow_execution_started\""));
        let parsed: HistoryEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, parsed);
    }

    #[test]
    fn activity_schedule_id_tracks_back_to_the_scheduled_event() {
        let scheduled = HistoryEvent::new(
            5,
            1,
            HistoryEventType::ActivityTaskScheduled {
                activity_id: "a1".into(),
                activity_type: "ship_order".into(),
                input: serde_json::json!({}),
                task_list: "orders".into(),
                schedule_to_start_timeout_ms: 60_000,
                start_to_close_timeout_ms: 300_000,
                heartbeat_timeout_ms: None,
            },
        );
        assert_eq!(scheduled.activity_schedule_id(), Some(5));

        let completed = HistoryEvent::new(
            7,
            1,
            HistoryEventType::ActivityTaskCompleted {
                scheduled_event_id: 5,
                result: serde_json::json!({}),
            },
        );
        assert_eq!(completed.activity_schedule_id(), Some(5));
    }

    #[test]
    fn continue_as_new_is_run_terminal() {
        let event = HistoryEvent::new(
            9,
            1,
            HistoryEventType::WorkflowExecutionContinuedAsNew {
                new_run_id: Uuid::nil(),
                backoff_start_interval_ms: 0,
            },
        );
        assert!(event.is_run_terminal());

        let started = HistoryEvent::new(
            1,
            1,
            HistoryEventType::DecisionTaskStarted {
                scheduled_event_id: 0,
                request_id: Uuid::nil(),
            },
        );
        assert!(!started.is_run_terminal());
    }

    #[test]
    fn unknown_type_name_is_never_reached_for_known_variants() {
        let event = HistoryEvent::new(1, 1, HistoryEventType::WorkflowExecutionTimedOut);
        assert_eq!(event.type_name(), "workflow_execution_timed_out");
    }
}
