//! Folds a slice of [`HistoryEvent`]s into a [`MutableState`], emitting the tasks that
//! downstream queue processors must execute.

use std::sync::Arc;

use tracing::{debug, instrument};
use uuid::Uuid;

use crate::history::{HistoryEvent, HistoryEventType};
use crate::persistence::{CodecError, HistoryCodec};
use crate::state::{
    DecisionInfo, ExecutionInfo, LegacyReplicationState, MutableState, PendingActivityInfo,
    PendingChildExecutionInfo, PendingRequestCancelInfo, PendingSignalInfo, PendingTimerInfo,
    Replication, StateError, VersionHistories, VersionHistory,
};
use crate::tasks::{TaskBatch, TaskGenerator};

/// Tuning knobs for the state builder.
#[derive(Debug, Clone)]
pub struct StateBuilderConfig {
    /// Safety cap on events folded into a single run; exceeding it is a hard error rather than
    /// silently truncating history.
    pub max_events_per_run: usize,
}

impl Default for StateBuilderConfig {
    fn default() -> Self {
        Self {
            max_events_per_run: 50_000,
        }
    }
}

/// Errors raised while folding a slice of history into mutable state.
#[derive(Debug, thiserror::Error)]
pub enum StateBuilderError {
    #[error("history size zero")]
    EmptyEventSlice,

    #[error("event id {got} does not match expected next event id {expected}")]
    OutOfOrderEvent { expected: i64, got: i64 },

    #[error("run {0} has too many events ({1} > {2})")]
    TooManyEvents(Uuid, usize, usize),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("continue-as-new encountered while folding a recursively-built new run state")]
    NestedContinueAsNew,

    /// Raised when decoding a wire-encoded event whose `type` tag does not match any
    /// [`HistoryEventType`] variant. `HistoryEventType`'s fold in `apply_one` is an exhaustive
    /// match with no catch-all arm, so this can only ever be detected at the decode boundary,
    /// not mid-fold — see [`StateBuilder::decode_event`].
    #[error("invalid argument: unknown event type {0}")]
    InvalidEventType(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

/// Result of a single `apply_events` call: the tasks to persist alongside the mutated state,
/// and — if the slice ended in a continue-as-new — the freshly constructed state for the new
/// run.
#[derive(Debug)]
pub struct ApplyEventsOutcome {
    pub tasks: TaskBatch,
    pub new_run_state: Option<MutableState>,
}

/// Folds history slices into mutable state.
///
/// The fold itself never performs I/O: every input is already in memory, and the caller is
/// responsible for persisting the returned state/task batch atomically.
pub struct StateBuilder {
    config: StateBuilderConfig,
    generator: Arc<TaskGenerator>,
}

impl StateBuilder {
    pub fn new(config: StateBuilderConfig) -> Self {
        Self {
            config,
            generator: Arc::new(TaskGenerator),
        }
    }

    /// Fold `events` into `state`, returning the tasks generated and, if applicable, the new
    /// run's freshly built state.
    #[instrument(skip(self, state, events, new_run_events), fields(run_id = %state.execution_info.run_id, n = events.len()))]
    pub fn apply_events(
        &self,
        state: &mut MutableState,
        events: &[HistoryEvent],
        new_run_events: Option<&[HistoryEvent]>,
        new_run_is_ndc: bool,
    ) -> Result<ApplyEventsOutcome, StateBuilderError> {
        self.apply_events_inner(state, events, new_run_events, new_run_is_ndc, true)
    }

    /// Decodes a single wire-encoded event ahead of folding it, naming the offending tag rather
    /// than folding an unrecognized `HistoryEventType` into a generic decode error. `apply_one`'s
    /// match over `HistoryEventType` is exhaustive by construction, so an unknown event type can
    /// only ever surface here, at the decode boundary.
    pub fn decode_event<C: HistoryCodec>(
        &self,
        codec: &C,
        bytes: &[u8],
    ) -> Result<HistoryEvent, StateBuilderError> {
        codec.decode(bytes).map_err(|err| match err {
            CodecError::UnknownEventType(tag) => StateBuilderError::InvalidEventType(tag),
            other => StateBuilderError::Decode(other.to_string()),
        })
    }

    fn apply_events_inner(
        &self,
        state: &mut MutableState,
        events: &[HistoryEvent],
        new_run_events: Option<&[HistoryEvent]>,
        new_run_is_ndc: bool,
        allow_continue_as_new: bool,
    ) -> Result<ApplyEventsOutcome, StateBuilderError> {
        let first = events.first().ok_or(StateBuilderError::EmptyEventSlice)?;
        let last = events.last().expect("non-empty, checked above");

        let expected_next = state.execution_info.next_event_id;
        if first.event_id != expected_next {
            return Err(StateBuilderError::OutOfOrderEvent {
                expected: expected_next,
                got: first.event_id,
            });
        }

        let projected_total =
            state.execution_info.last_processed_event_id as usize + events.len();
        if projected_total > self.config.max_events_per_run {
            return Err(StateBuilderError::TooManyEvents(
                state.execution_info.run_id,
                projected_total,
                self.config.max_events_per_run,
            ));
        }

        state.clear_stickiness();

        let mut batch = TaskBatch::default();
        let mut new_run_state: Option<MutableState> = None;
        let run_id = state.execution_info.run_id;

        for event in events {
            // Prelude: every event in the slice bumps replication bookkeeping using its own
            // (id, version); only the final event's bookkeeping survives the fold, which is
            // correct because the whole slice commits atomically.
            state.replication.record_slice(event.event_id, event.version);
            state.execution_info.updated_timestamp = event.timestamp;
            // last-wins by design: a transaction applying several events only needs to remember
            // the task id of the last one for bookkeeping purposes.
            if let Some(task_id) = event.task_id {
                debug!(task_id, event_id = event.event_id, "observed task id for event");
            }

            self.apply_one(state, event, &mut batch)?;

            if event.is_run_terminal() {
                if let HistoryEventType::WorkflowExecutionContinuedAsNew {
                    new_run_id,
                    backoff_start_interval_ms,
                } = &event.event_type
                {
                    if !allow_continue_as_new {
                        return Err(StateBuilderError::NestedContinueAsNew);
                    }
                    if let Some(new_events) = new_run_events.filter(|e| !e.is_empty()) {
                        new_run_state = Some(self.build_new_run(
                            state,
                            *new_run_id,
                            *backoff_start_interval_ms,
                            new_events,
                            new_run_is_ndc,
                        )?);
                    }
                }
            }
        }

        self.generator
            .generate_activity_timers(run_id, state, last.timestamp, &mut batch);
        self.generator.generate_user_timers(run_id, state, &mut batch);

        state.execution_info.last_first_event_id = first.event_id;
        state.execution_info.next_event_id = last.event_id + 1;
        state.execution_info.last_processed_event_id = last.event_id;

        for event in events {
            state.history_builder.append(event.clone());
        }

        Ok(ApplyEventsOutcome { tasks: batch, new_run_state })
    }

    fn build_new_run(
        &self,
        prev_state: &MutableState,
        new_run_id: Uuid,
        backoff_start_interval_ms: u64,
        new_run_events: &[HistoryEvent],
        new_run_is_ndc: bool,
    ) -> Result<MutableState, StateBuilderError> {
        let prev_info = &prev_state.execution_info;
        let task_list = prev_info.task_list.clone();
        let started_at = new_run_events[0].timestamp
            + chrono::Duration::milliseconds(backoff_start_interval_ms as i64);

        let mut execution_info = ExecutionInfo::new_run(
            prev_info.namespace_id,
            prev_info.workflow_id.clone(),
            new_run_id,
            task_list,
            started_at,
        );
        execution_info.parent_workflow_id = prev_info.parent_workflow_id.clone();
        execution_info.parent_run_id = prev_info.parent_run_id;

        let replication = if new_run_is_ndc {
            Replication::VersionHistories(VersionHistories::new(VersionHistory::default()))
        } else {
            Replication::Legacy(LegacyReplicationState::default())
        };

        let mut new_state = MutableState::new(execution_info, replication);
        // A recursively-built new run state must not itself fold a continue-as-new: bounded
        // recursion depth of 1 is enforced here, not by the caller.
        let outcome =
            self.apply_events_inner(&mut new_state, new_run_events, None, new_run_is_ndc, false)?;
        debug_assert!(outcome.new_run_state.is_none());
        Ok(new_state)
    }

    fn apply_one(
        &self,
        state: &mut MutableState,
        event: &HistoryEvent,
        batch: &mut TaskBatch,
    ) -> Result<(), StateBuilderError> {
        let run_id = state.execution_info.run_id;
        let generator = &self.generator;

        match &event.event_type {
            HistoryEventType::WorkflowExecutionStarted {
                task_list,
                first_decision_task_backoff_seconds,
                workflow_execution_timeout_ms,
                workflow_run_timeout_ms,
                workflow_task_timeout_ms,
                parent_workflow_id,
                parent_run_id,
                ..
            } => {
                state.replicate_run_started();
                state.execution_info.task_list = task_list.clone();
                state.execution_info.workflow_execution_timeout_ms = *workflow_execution_timeout_ms;
                state.execution_info.workflow_run_timeout_ms = *workflow_run_timeout_ms;
                state.execution_info.workflow_task_timeout_ms = *workflow_task_timeout_ms;
                state.execution_info.parent_workflow_id = parent_workflow_id.clone();
                state.execution_info.parent_run_id = *parent_run_id;
                if let Replication::Legacy(legacy) = &mut state.replication {
                    legacy.start_version = event.version;
                }
                generator.generate_record_workflow_started(run_id, batch);
                generator.generate_workflow_start(run_id, task_list.clone(), batch);
                generator.generate_delayed_decision(
                    run_id,
                    event.timestamp,
                    *first_decision_task_backoff_seconds,
                    batch,
                );
            }

            HistoryEventType::DecisionTaskScheduled {
                task_list,
                start_to_close_timeout_ms,
                attempt,
            } => {
                state.replicate_decision_scheduled(DecisionInfo {
                    version: event.version,
                    scheduled_event_id: event.event_id,
                    started_event_id: None,
                    request_id: None,
                    start_to_close_timeout_ms: *start_to_close_timeout_ms,
                    attempt: *attempt,
                    original_scheduled_timestamp: event.timestamp,
                })?;
                generator.generate_decision_schedule(
                    run_id,
                    event.event_id,
                    task_list.clone(),
                    batch,
                );
            }

            HistoryEventType::DecisionTaskStarted { scheduled_event_id, request_id } => {
                state.replicate_decision_started(event.event_id, *request_id)?;
                generator.generate_decision_start(run_id, *scheduled_event_id, batch);
            }

            HistoryEventType::DecisionTaskCompleted { .. } => {
                state.replicate_decision_cleared();
            }

            HistoryEventType::DecisionTaskTimedOut { .. } | HistoryEventType::DecisionTaskFailed { .. } => {
                state.replicate_decision_cleared();
                // A transient replacement decision, if any, arrives as its own
                // DecisionTaskScheduled event later in the same or a subsequent slice — this
                // crate does not synthesize one implicitly.
            }

            HistoryEventType::ActivityTaskScheduled {
                activity_id,
                activity_type,
                task_list,
                schedule_to_start_timeout_ms,
                start_to_close_timeout_ms,
                heartbeat_timeout_ms,
                ..
            } => {
                state.replicate_activity_scheduled(PendingActivityInfo {
                    activity_id: activity_id.clone(),
                    activity_type: activity_type.clone(),
                    scheduled_event_id: event.event_id,
                    started_event_id: None,
                    attempt: 1,
                    schedule_to_start_timeout_ms: *schedule_to_start_timeout_ms,
                    start_to_close_timeout_ms: *start_to_close_timeout_ms,
                    heartbeat_timeout_ms: *heartbeat_timeout_ms,
                    last_heartbeat_details: None,
                    cancel_requested: false,
                });
                generator.generate_activity_transfer(
                    run_id,
                    event.event_id,
                    task_list.clone(),
                    batch,
                );
            }

            HistoryEventType::ActivityTaskStarted { scheduled_event_id, attempt, .. } => {
                state.replicate_activity_started(*scheduled_event_id, event.event_id, *attempt)?;
            }

            HistoryEventType::ActivityTaskCompleted { scheduled_event_id, .. }
            | HistoryEventType::ActivityTaskFailed { scheduled_event_id, .. }
            | HistoryEventType::ActivityTaskTimedOut { scheduled_event_id, .. }
            | HistoryEventType::ActivityTaskCanceled { scheduled_event_id, .. } => {
                state.replicate_activity_terminal(*scheduled_event_id);
            }

            HistoryEventType::ActivityTaskCancelRequested { scheduled_event_id } => {
                state.replicate_activity_cancel_requested(*scheduled_event_id)?;
            }

            HistoryEventType::RequestCancelActivityTaskFailed { .. } => {}

            HistoryEventType::TimerStarted { timer_id, start_to_fire_timeout_ms } => {
                let fire_at =
                    event.timestamp + chrono::Duration::milliseconds(*start_to_fire_timeout_ms as i64);
                state.replicate_timer_started(PendingTimerInfo {
                    timer_id: timer_id.clone(),
                    started_event_id: event.event_id,
                    fire_at,
                    task_generated: false,
                });
            }

            HistoryEventType::TimerFired { timer_id, .. }
            | HistoryEventType::TimerCanceled { timer_id } => {
                state.replicate_timer_terminal(timer_id);
            }

            HistoryEventType::CancelTimerFailed { .. } => {}

            HistoryEventType::StartChildWorkflowExecutionInitiated { workflow_id, task_list: _, .. } => {
                state.replicate_child_initiated(PendingChildExecutionInfo {
                    workflow_id: workflow_id.clone(),
                    initiated_event_id: event.event_id,
                    create_request_id: Uuid::new_v4(),
                });
                generator.generate_child_workflow_transfer(run_id, event.event_id, batch);
            }

            HistoryEventType::StartChildWorkflowExecutionFailed { workflow_id, .. } => {
                state.replicate_child_terminal_by_workflow_id(workflow_id);
            }
            HistoryEventType::ChildWorkflowExecutionCompleted { workflow_id, .. }
            | HistoryEventType::ChildWorkflowExecutionFailed { workflow_id, .. }
            | HistoryEventType::ChildWorkflowExecutionCanceled { workflow_id, .. }
            | HistoryEventType::ChildWorkflowExecutionTimedOut { workflow_id, .. }
            | HistoryEventType::ChildWorkflowExecutionTerminated { workflow_id, .. } => {
                state.replicate_child_terminal_by_workflow_id(workflow_id);
            }
            HistoryEventType::ChildWorkflowExecutionStarted { .. } => {}

            HistoryEventType::RequestCancelExternalWorkflowExecutionInitiated { workflow_id, .. } => {
                state.replicate_request_cancel_initiated(PendingRequestCancelInfo {
                    workflow_id: workflow_id.clone(),
                    initiated_event_id: event.event_id,
                    cancel_request_id: Uuid::new_v4(),
                });
                generator.generate_cancel_external_transfer(run_id, event.event_id, batch);
            }
            HistoryEventType::RequestCancelExternalWorkflowExecutionFailed { workflow_id, .. }
            | HistoryEventType::ExternalWorkflowExecutionCancelRequested { workflow_id, .. } => {
                state.replicate_request_cancel_terminal_by_workflow_id(workflow_id);
            }

            HistoryEventType::SignalExternalWorkflowExecutionInitiated { workflow_id, .. } => {
                state.replicate_signal_initiated(PendingSignalInfo {
                    workflow_id: workflow_id.clone(),
                    initiated_event_id: event.event_id,
                    signal_request_id: Uuid::new_v4(),
                });
                generator.generate_signal_external_transfer(run_id, event.event_id, batch);
            }
            HistoryEventType::SignalExternalWorkflowExecutionFailed { workflow_id, .. }
            | HistoryEventType::ExternalWorkflowExecutionSignaled { workflow_id, .. } => {
                state.replicate_signal_terminal_by_workflow_id(workflow_id);
            }

            HistoryEventType::UpsertWorkflowSearchAttributes { search_attributes } => {
                state.replicate_search_attributes(search_attributes.clone());
                generator.generate_search_attribute_upsert(run_id, batch);
            }

            HistoryEventType::WorkflowExecutionSignaled { .. } => {
                state.replicate_signal_received();
            }

            HistoryEventType::WorkflowExecutionCancelRequested { .. } => {
                state.replicate_cancel_requested();
            }

            HistoryEventType::WorkflowExecutionCompleted { .. }
            | HistoryEventType::WorkflowExecutionFailed { .. }
            | HistoryEventType::WorkflowExecutionTimedOut
            | HistoryEventType::WorkflowExecutionCanceled { .. }
            | HistoryEventType::WorkflowExecutionTerminated { .. }
            | HistoryEventType::WorkflowExecutionContinuedAsNew { .. } => {
                state.replicate_run_closed()?;
                generator.generate_workflow_close(run_id, batch);
            }

            HistoryEventType::MarkerRecorded { .. } => {}
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryEvent;
    use crate::state::{ExecutionInfo, RunState};
    use chrono::Utc;
    use serde_json::json;

    fn new_state() -> MutableState {
        MutableState::new(
            ExecutionInfo::new_run(Uuid::nil(), "wf-1", Uuid::new_v4(), "tl", Utc::now()),
            Replication::Legacy(LegacyReplicationState::default()),
        )
    }

    fn started_event(id: i64, backoff: u64) -> HistoryEvent {
        HistoryEvent::new(
            id,
            1,
            HistoryEventType::WorkflowExecutionStarted {
                input: json!({}),
                parent_workflow_id: None,
                parent_run_id: None,
                task_list: "tl".into(),
                workflow_execution_timeout_ms: 0,
                workflow_run_timeout_ms: 0,
                workflow_task_timeout_ms: 10_000,
                first_decision_task_backoff_seconds: backoff,
            },
        )
    }

    #[test]
    fn start_only_slice_transitions_to_running_and_emits_expected_tasks() {
        let builder = StateBuilder::new(StateBuilderConfig::default());
        let mut state = new_state();
        let events = vec![started_event(1, 0)];

        let outcome = builder.apply_events(&mut state, &events, None, false).unwrap();

        assert_eq!(state.execution_info.state, RunState::Running);
        assert_eq!(state.execution_info.next_event_id, 2);
        assert_eq!(outcome.tasks.transfer.len(), 2);
    }

    #[test]
    fn backoff_emits_a_delayed_decision_task() {
        let builder = StateBuilder::new(StateBuilderConfig::default());
        let mut state = new_state();
        let events = vec![started_event(1, 30)];

        let outcome = builder.apply_events(&mut state, &events, None, false).unwrap();
        assert_eq!(outcome.tasks.transfer.len(), 3);
    }

    #[test]
    fn empty_slice_is_rejected() {
        let builder = StateBuilder::new(StateBuilderConfig::default());
        let mut state = new_state();
        let err = builder.apply_events(&mut state, &[], None, false).unwrap_err();
        assert!(matches!(err, StateBuilderError::EmptyEventSlice));
    }

    #[test]
    fn out_of_order_first_event_is_rejected() {
        let builder = StateBuilder::new(StateBuilderConfig::default());
        let mut state = new_state();
        let events = vec![started_event(2, 0)];
        let err = builder.apply_events(&mut state, &events, None, false).unwrap_err();
        assert!(matches!(err, StateBuilderError::OutOfOrderEvent { expected: 1, got: 2 }));
    }

    #[test]
    fn decision_cycle_completes_without_a_close_task() {
        let builder = StateBuilder::new(StateBuilderConfig::default());
        let mut state = new_state();
        let events = vec![
            started_event(1, 0),
            HistoryEvent::new(
                2,
                1,
                HistoryEventType::DecisionTaskScheduled {
                    task_list: "tl".into(),
                    start_to_close_timeout_ms: 10_000,
                    attempt: 1,
                },
            ),
            HistoryEvent::new(
                3,
                1,
                HistoryEventType::DecisionTaskStarted { scheduled_event_id: 2, request_id: Uuid::new_v4() },
            ),
            HistoryEvent::new(
                4,
                1,
                HistoryEventType::DecisionTaskCompleted { scheduled_event_id: 2, started_event_id: 3 },
            ),
        ];

        builder.apply_events(&mut state, &events, None, false).unwrap();
        assert!(state.execution_info.decision.is_none());
        assert_eq!(state.execution_info.next_event_id, 5);
        assert!(!state
            .history_builder
            .staged
            .iter()
            .any(|e| e.is_run_terminal()));
    }

    #[test]
    fn continue_as_new_builds_a_fresh_run_state() {
        let builder = StateBuilder::new(StateBuilderConfig::default());
        let mut state = new_state();
        let new_run_id = Uuid::new_v4();

        let events = vec![
            started_event(1, 0),
            HistoryEvent::new(
                2,
                1,
                HistoryEventType::WorkflowExecutionContinuedAsNew {
                    new_run_id,
                    backoff_start_interval_ms: 0,
                },
            ),
        ];
        let new_run_events = vec![started_event(1, 0)];

        let outcome = builder
            .apply_events(&mut state, &events, Some(&new_run_events), false)
            .unwrap();

        assert_eq!(state.execution_info.state, RunState::Completed);
        let new_state = outcome.new_run_state.expect("continue-as-new state");
        assert_eq!(new_state.execution_info.run_id, new_run_id);
        assert_eq!(new_state.execution_info.next_event_id, 2);
        assert_eq!(new_state.execution_info.state, RunState::Running);
    }

    #[test]
    fn continue_as_new_with_empty_new_run_events_spawns_no_new_state() {
        let builder = StateBuilder::new(StateBuilderConfig::default());
        let mut state = new_state();
        let events = vec![
            started_event(1, 0),
            HistoryEvent::new(
                2,
                1,
                HistoryEventType::WorkflowExecutionContinuedAsNew {
                    new_run_id: Uuid::new_v4(),
                    backoff_start_interval_ms: 0,
                },
            ),
        ];

        let outcome = builder.apply_events(&mut state, &events, None, false).unwrap();
        assert!(outcome.new_run_state.is_none());
        assert_eq!(state.execution_info.state, RunState::Completed);
    }

    #[test]
    fn child_workflow_pending_entry_is_removed_on_its_terminal_event() {
        let builder = StateBuilder::new(StateBuilderConfig::default());
        let mut state = new_state();
        let events = vec![
            started_event(1, 0),
            HistoryEvent::new(
                2,
                1,
                HistoryEventType::StartChildWorkflowExecutionInitiated {
                    workflow_id: "child-1".into(),
                    workflow_type: "demo".into(),
                    input: json!({}),
                    task_list: "tl".into(),
                },
            ),
        ];
        builder.apply_events(&mut state, &events, None, false).unwrap();
        assert_eq!(state.pending_children.len(), 1);

        let terminal = vec![HistoryEvent::new(
            3,
            1,
            HistoryEventType::ChildWorkflowExecutionCompleted {
                workflow_id: "child-1".into(),
                run_id: Uuid::new_v4(),
                result: json!({}),
            },
        )];
        builder.apply_events(&mut state, &terminal, None, false).unwrap();
        assert!(
            state.pending_children.is_empty(),
            "terminal event must clear the pending entry keyed by workflow_id, not by its own event id"
        );
    }

    #[test]
    fn decode_event_names_an_unknown_event_type_as_invalid_argument() {
        use crate::persistence::JsonHistoryCodec;

        let builder = StateBuilder::new(StateBuilderConfig::default());
        let blob = br#"{"event_id":1,"version":1,"timestamp":"2024-01-01T00:00:00Z","task_id":null,"event_type":{"type":"not_a_real_event_type"}}"#;

        let err = builder.decode_event(&JsonHistoryCodec, blob).unwrap_err();
        match err {
            StateBuilderError::InvalidEventType(tag) => assert_eq!(tag, "not_a_real_event_type"),
            other => panic!("expected InvalidEventType, got {other:?}"),
        }
    }
}
