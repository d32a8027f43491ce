//! The in-memory projection of a single workflow run.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::history::{EventId, FailoverVersion, HistoryEvent};

use super::execution_info::{DecisionInfo, ExecutionInfo, RunState};
use super::replication::Replication;

/// An activity scheduled but not yet resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingActivityInfo {
    pub activity_id: String,
    pub activity_type: String,
    pub scheduled_event_id: EventId,
    pub started_event_id: Option<EventId>,
    pub attempt: u32,
    pub schedule_to_start_timeout_ms: u64,
    pub start_to_close_timeout_ms: u64,
    pub heartbeat_timeout_ms: Option<u64>,
    pub last_heartbeat_details: Option<serde_json::Value>,
    pub cancel_requested: bool,
}

/// A timer started but not yet fired or canceled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingTimerInfo {
    pub timer_id: String,
    pub started_event_id: EventId,
    pub fire_at: DateTime<Utc>,
    /// Whether a timer-task has already been generated for this entry (enforces at-most-one
    /// timer task per pending entity per fold, per SPEC_FULL.md §4.2).
    pub task_generated: bool,
}

/// A child workflow initiated but not yet resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingChildExecutionInfo {
    pub workflow_id: String,
    pub initiated_event_id: EventId,
    pub create_request_id: Uuid,
}

/// An external-workflow cancel request initiated but not yet resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingRequestCancelInfo {
    pub workflow_id: String,
    pub initiated_event_id: EventId,
    pub cancel_request_id: Uuid,
}

/// An external-workflow signal initiated but not yet resolved.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PendingSignalInfo {
    pub workflow_id: String,
    pub initiated_event_id: EventId,
    pub signal_request_id: Uuid,
}

/// Events staged for the in-flight transaction. Snapshotted into the execution's durable history
/// at the end of a fold.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HistoryBuilder {
    pub staged: Vec<HistoryEvent>,
}

impl HistoryBuilder {
    pub fn append(&mut self, event: HistoryEvent) {
        self.staged.push(event);
    }

    pub fn clear(&mut self) {
        self.staged.clear();
    }
}

/// Errors raised while mutating a [`MutableState`] projection.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("activity {0} not found in pending activities")]
    ActivityNotFound(String),

    #[error("timer {0} not found in pending timers")]
    TimerNotFound(String),

    #[error("child workflow {0} not found in pending children")]
    ChildNotFound(String),

    #[error("decision task already in flight for run")]
    DecisionAlreadyInFlight,

    #[error("no decision task in flight to complete")]
    NoDecisionInFlight,

    #[error("close event applied while run was not running (state = {0:?})")]
    CloseAppliedOutsideRunning(RunState),
}

/// The full in-memory projection of a single workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MutableState {
    pub execution_info: ExecutionInfo,
    pub replication: Replication,

    pub pending_activities: HashMap<EventId, PendingActivityInfo>,
    pub pending_timers: HashMap<String, PendingTimerInfo>,
    pub pending_children: HashMap<EventId, PendingChildExecutionInfo>,
    pub pending_request_cancels: HashMap<EventId, PendingRequestCancelInfo>,
    pub pending_signals: HashMap<EventId, PendingSignalInfo>,
    pub signal_requested_ids: HashSet<Uuid>,

    /// Sticky task-list binding. Cleared at the start of every fold (passive/replay application
    /// must never schedule sticky timeouts).
    pub sticky_task_list: Option<String>,

    pub history_builder: HistoryBuilder,

    pub cancel_requested: bool,
    pub search_attributes: serde_json::Value,
}

impl MutableState {
    pub fn new(execution_info: ExecutionInfo, replication: Replication) -> Self {
        Self {
            execution_info,
            replication,
            pending_activities: HashMap::new(),
            pending_timers: HashMap::new(),
            pending_children: HashMap::new(),
            pending_request_cancels: HashMap::new(),
            pending_signals: HashMap::new(),
            signal_requested_ids: HashSet::new(),
            sticky_task_list: None,
            history_builder: HistoryBuilder::default(),
            cancel_requested: false,
            search_attributes: serde_json::Value::Null,
        }
    }

    /// Cleared once per fold, before any event in the slice is applied.
    pub fn clear_stickiness(&mut self) {
        self.sticky_task_list = None;
    }

    pub fn replicate_activity_scheduled(&mut self, info: PendingActivityInfo) {
        self.pending_activities.insert(info.scheduled_event_id, info);
    }

    pub fn replicate_activity_started(
        &mut self,
        scheduled_event_id: EventId,
        started_event_id: EventId,
        attempt: u32,
    ) -> Result<(), StateError> {
        let info = self
            .pending_activities
            .get_mut(&scheduled_event_id)
            .ok_or(StateError::ActivityNotFound(scheduled_event_id.to_string()))?;
        info.started_event_id = Some(started_event_id);
        info.attempt = attempt;
        Ok(())
    }

    pub fn replicate_activity_terminal(&mut self, scheduled_event_id: EventId) {
        self.pending_activities.remove(&scheduled_event_id);
    }

    pub fn replicate_activity_cancel_requested(
        &mut self,
        scheduled_event_id: EventId,
    ) -> Result<(), StateError> {
        let info = self
            .pending_activities
            .get_mut(&scheduled_event_id)
            .ok_or(StateError::ActivityNotFound(scheduled_event_id.to_string()))?;
        info.cancel_requested = true;
        Ok(())
    }

    pub fn replicate_timer_started(&mut self, info: PendingTimerInfo) {
        self.pending_timers.insert(info.timer_id.clone(), info);
    }

    pub fn replicate_timer_terminal(&mut self, timer_id: &str) {
        self.pending_timers.remove(timer_id);
    }

    pub fn replicate_child_initiated(&mut self, info: PendingChildExecutionInfo) {
        self.pending_children.insert(info.initiated_event_id, info);
    }

    /// Terminal child-workflow events (failed-to-start, completed, failed, canceled, timed out,
    /// terminated) carry `workflow_id`/`run_id`, not the initiating event id, so the pending
    /// entry is found by scanning rather than a direct key lookup.
    pub fn replicate_child_terminal_by_workflow_id(&mut self, workflow_id: &str) {
        if let Some(id) = self
            .pending_children
            .iter()
            .find(|(_, info)| info.workflow_id == workflow_id)
            .map(|(id, _)| *id)
        {
            self.pending_children.remove(&id);
        }
    }

    pub fn replicate_request_cancel_initiated(&mut self, info: PendingRequestCancelInfo) {
        self.pending_request_cancels.insert(info.initiated_event_id, info);
    }

    /// Terminal cancel-request events carry `workflow_id`, not the initiating event id.
    pub fn replicate_request_cancel_terminal_by_workflow_id(&mut self, workflow_id: &str) {
        if let Some(id) = self
            .pending_request_cancels
            .iter()
            .find(|(_, info)| info.workflow_id == workflow_id)
            .map(|(id, _)| *id)
        {
            self.pending_request_cancels.remove(&id);
        }
    }

    pub fn replicate_signal_initiated(&mut self, info: PendingSignalInfo) {
        self.pending_signals.insert(info.initiated_event_id, info);
    }

    /// Terminal external-signal events carry `workflow_id`, not the initiating event id.
    pub fn replicate_signal_terminal_by_workflow_id(&mut self, workflow_id: &str) {
        if let Some(id) = self
            .pending_signals
            .iter()
            .find(|(_, info)| info.workflow_id == workflow_id)
            .map(|(id, _)| *id)
        {
            self.pending_signals.remove(&id);
        }
    }

    pub fn replicate_decision_scheduled(
        &mut self,
        info: DecisionInfo,
    ) -> Result<(), StateError> {
        if self.execution_info.decision.is_some() {
            return Err(StateError::DecisionAlreadyInFlight);
        }
        self.execution_info.decision = Some(info);
        Ok(())
    }

    pub fn replicate_decision_started(
        &mut self,
        started_event_id: EventId,
        request_id: Uuid,
    ) -> Result<(), StateError> {
        let decision = self
            .execution_info
            .decision
            .as_mut()
            .ok_or(StateError::NoDecisionInFlight)?;
        decision.started_event_id = Some(started_event_id);
        decision.request_id = Some(request_id);
        Ok(())
    }

    pub fn replicate_decision_cleared(&mut self) {
        self.execution_info.decision = None;
    }

    pub fn replicate_signal_received(&mut self) {
        // signals themselves are not retained as pending state; they are delivered to the
        // handler and recorded only in the history log.
    }

    pub fn replicate_cancel_requested(&mut self) {
        self.cancel_requested = true;
    }

    pub fn replicate_search_attributes(&mut self, attrs: serde_json::Value) {
        self.search_attributes = attrs;
    }

    pub fn replicate_run_closed(&mut self) -> Result<(), StateError> {
        if self.execution_info.state != RunState::Running
            && self.execution_info.state != RunState::Created
        {
            return Err(StateError::CloseAppliedOutsideRunning(self.execution_info.state));
        }
        self.execution_info.state = RunState::Completed;
        Ok(())
    }

    pub fn replicate_run_started(&mut self) {
        self.execution_info.state = RunState::Running;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::execution_info::ExecutionInfo;
    use crate::state::replication::LegacyReplicationState;

    fn fresh_state() -> MutableState {
        MutableState::new(
            ExecutionInfo::new_run(Uuid::nil(), "wf-1", Uuid::nil(), "tl", Utc::now()),
            Replication::Legacy(LegacyReplicationState::default()),
        )
    }

    #[test]
    fn activity_lifecycle_round_trips() {
        let mut state = fresh_state();
        state.replicate_activity_scheduled(PendingActivityInfo {
            activity_id: "a1".into(),
            activity_type: "ship".into(),
            scheduled_event_id: 5,
            started_event_id: None,
            attempt: 1,
            schedule_to_start_timeout_ms: 1000,
            start_to_close_timeout_ms: 1000,
            heartbeat_timeout_ms: None,
            last_heartbeat_details: None,
            cancel_requested: false,
        });
        assert!(state.pending_activities.contains_key(&5));

        state.replicate_activity_started(5, 6, 1).unwrap();
        assert_eq!(state.pending_activities[&5].started_event_id, Some(6));

        state.replicate_activity_terminal(5);
        assert!(!state.pending_activities.contains_key(&5));
    }

    #[test]
    fn decision_cannot_double_schedule() {
        let mut state = fresh_state();
        let info = DecisionInfo {
            version: 1,
            scheduled_event_id: 2,
            started_event_id: None,
            request_id: None,
            start_to_close_timeout_ms: 10_000,
            attempt: 1,
            original_scheduled_timestamp: Utc::now(),
        };
        state.replicate_decision_scheduled(info.clone()).unwrap();
        let err = state.replicate_decision_scheduled(info).unwrap_err();
        assert!(matches!(err, StateError::DecisionAlreadyInFlight));
    }

    #[test]
    fn closing_twice_is_rejected() {
        let mut state = fresh_state();
        state.replicate_run_started();
        state.replicate_run_closed().unwrap();
        let err = state.replicate_run_closed().unwrap_err();
        assert!(matches!(err, StateError::CloseAppliedOutsideRunning(_)));
    }

    #[test]
    fn stickiness_is_cleared() {
        let mut state = fresh_state();
        state.sticky_task_list = Some("sticky-1".into());
        state.clear_stickiness();
        assert!(state.sticky_task_list.is_none());
    }

    #[test]
    fn child_workflow_terminal_lookup_is_by_workflow_id_not_event_id() {
        let mut state = fresh_state();
        state.replicate_child_initiated(PendingChildExecutionInfo {
            workflow_id: "child-1".into(),
            initiated_event_id: 5,
            create_request_id: Uuid::new_v4(),
        });
        assert!(state.pending_children.contains_key(&5));

        // The terminal event's own event id (e.g. 9) is unrelated to the initiating id (5);
        // lookup must go by workflow_id, not by the terminal event's id.
        state.replicate_child_terminal_by_workflow_id("child-1");
        assert!(state.pending_children.is_empty());
    }

    #[test]
    fn request_cancel_and_signal_terminal_lookup_is_by_workflow_id() {
        let mut state = fresh_state();
        state.replicate_request_cancel_initiated(PendingRequestCancelInfo {
            workflow_id: "ext-1".into(),
            initiated_event_id: 5,
            cancel_request_id: Uuid::new_v4(),
        });
        state.replicate_signal_initiated(PendingSignalInfo {
            workflow_id: "ext-2".into(),
            initiated_event_id: 6,
            signal_request_id: Uuid::new_v4(),
        });

        state.replicate_request_cancel_terminal_by_workflow_id("ext-1");
        state.replicate_signal_terminal_by_workflow_id("ext-2");

        assert!(state.pending_request_cancels.is_empty());
        assert!(state.pending_signals.is_empty());
    }
}
