//! Rebuilds mutable state from persisted history when a write is rejected by optimistic
//! concurrency, or when replication detects divergence.

use std::sync::Arc;

use tracing::{instrument, warn};
use uuid::Uuid;

use crate::builder::{StateBuilder, StateBuilderError};
use crate::history::{EventId, FailoverVersion};
use crate::persistence::{
    ConflictResolveRequest, CurrentWorkflowCas, HistoryStore, StoreError, WorkflowExecutionRef,
};
use crate::state::{MutableState, RunState};
use crate::tasks::{TaskBatch, TaskGenerator};

/// Errors raised while rebuilding and re-persisting mutable state.
#[derive(Debug, thiserror::Error)]
pub enum ConflictResolverError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("fold error while rebuilding state: {0}")]
    Builder(#[from] StateBuilderError),
}

/// Result of a successful [`ConflictResolver::reset`]: the rebuilt and re-persisted state, plus
/// the task batch that was written alongside it.
#[derive(Debug, Clone)]
pub struct ResetOutcome {
    pub state: MutableState,
    pub tasks: TaskBatch,
}

/// Rebuilds mutable state from persisted branch history `[1, targetEventId]` and writes it via
/// an optimistic-CAS `conflict_resolve` call. Does not retry on CAS failure — the caller's retry
/// policy (often the decision handler that triggered the reset) applies.
pub struct ConflictResolver<S: HistoryStore> {
    store: Arc<S>,
    state_builder: StateBuilder,
}

impl<S: HistoryStore> ConflictResolver<S> {
    pub fn new(store: Arc<S>, state_builder: StateBuilder) -> Self {
        Self { store, state_builder }
    }

    /// Rebuild `blank_state` (a freshly constructed, empty projection carrying only identity and
    /// replication-scheme choice) up to and including `target_event_id`, then write it subject
    /// to the CAS guards naming the run that was previously current for this workflow id.
    #[instrument(skip(self, blank_state), fields(run_id = %execution.run_id, target_event_id))]
    pub async fn reset(
        &self,
        execution: &WorkflowExecutionRef,
        mut blank_state: MutableState,
        prev_run_id: Uuid,
        prev_last_write_version: FailoverVersion,
        prev_state: RunState,
        target_event_id: EventId,
        condition: i64,
    ) -> Result<ResetOutcome, ConflictResolverError> {
        let max_event_id = target_event_id + 1;
        let mut tasks = TaskBatch::default();
        let mut page_token = None;

        loop {
            let page = self
                .store
                .read_history_page(execution, blank_state.execution_info.next_event_id, page_token)
                .await?;

            let events: Vec<_> = page
                .events
                .into_iter()
                .filter(|e| e.event_id < max_event_id)
                .collect();

            if !events.is_empty() {
                let outcome = self
                    .state_builder
                    .apply_events(&mut blank_state, &events, None, false)?;
                tasks.transfer.extend(outcome.tasks.transfer);
                tasks.timer.extend(outcome.tasks.timer);
                tasks.replication.extend(outcome.tasks.replication);
            }

            if blank_state.execution_info.next_event_id > target_event_id || page.next_page_token.is_none()
            {
                break;
            }
            page_token = page.next_page_token;
        }

        if blank_state.execution_info.next_event_id != target_event_id + 1 {
            warn!(
                run_id = %execution.run_id,
                reached = blank_state.execution_info.next_event_id,
                target_event_id,
                "conflict-resolve rebuild stopped short of target event id"
            );
        }

        TaskGenerator.generate_search_attribute_upsert(execution.run_id, &mut tasks);

        let request = ConflictResolveRequest {
            execution: execution.clone(),
            rebuilt_state: blank_state,
            tasks: tasks.clone(),
            condition,
            current_workflow_cas: CurrentWorkflowCas {
                prev_run_id,
                prev_last_write_version,
                prev_state,
            },
        };

        let rebuilt = self.store.conflict_resolve(request).await?;
        Ok(ResetOutcome { state: rebuilt, tasks })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::StateBuilderConfig;
    use crate::history::{HistoryEvent, HistoryEventType};
    use crate::persistence::InMemoryHistoryStore;
    use crate::state::{ExecutionInfo, LegacyReplicationState, Replication};
    use chrono::Utc;
    use serde_json::json;

    fn started_event(id: EventId) -> HistoryEvent {
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
                first_decision_task_backoff_seconds: 0,
            },
        )
    }

    #[tokio::test]
    async fn reset_rebuilds_state_up_to_the_target_event_id() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let execution = WorkflowExecutionRef {
            namespace_id: Uuid::nil(),
            workflow_id: "wf-1".into(),
            run_id: Uuid::new_v4(),
        };

        let mut seed_state = MutableState::new(
            ExecutionInfo::new_run(execution.namespace_id, "wf-1", execution.run_id, "tl", Utc::now()),
            Replication::Legacy(LegacyReplicationState::default()),
        );
        let builder = StateBuilder::new(StateBuilderConfig::default());
        let events = vec![started_event(1)];
        let outcome = builder.apply_events(&mut seed_state, &events, None, false).unwrap();
        store
            .append_history_and_mutate(&execution, 1, events, outcome.tasks, seed_state, 0)
            .await
            .unwrap();

        let blank_state = MutableState::new(
            ExecutionInfo::new_run(execution.namespace_id, "wf-1", execution.run_id, "tl", Utc::now()),
            Replication::Legacy(LegacyReplicationState::default()),
        );
        let resolver = ConflictResolver::new(store, StateBuilder::new(StateBuilderConfig::default()));

        let outcome = resolver
            .reset(&execution, blank_state, execution.run_id, 0, RunState::Created, 1, 1)
            .await
            .unwrap();

        assert_eq!(outcome.state.execution_info.next_event_id, 2);
        assert_eq!(outcome.state.execution_info.state, RunState::Running);
        assert!(
            outcome
                .tasks
                .transfer
                .iter()
                .any(|t| matches!(t, crate::tasks::TransferTask::SearchAttributeUpsert { .. })),
            "reset must always include a search-attributes upsert task"
        );
    }

    #[tokio::test]
    async fn reset_rejects_on_cas_mismatch() {
        let store = Arc::new(InMemoryHistoryStore::new());
        let execution = WorkflowExecutionRef {
            namespace_id: Uuid::nil(),
            workflow_id: "wf-2".into(),
            run_id: Uuid::new_v4(),
        };
        let mut seed_state = MutableState::new(
            ExecutionInfo::new_run(execution.namespace_id, "wf-2", execution.run_id, "tl", Utc::now()),
            Replication::Legacy(LegacyReplicationState::default()),
        );
        let builder = StateBuilder::new(StateBuilderConfig::default());
        let events = vec![started_event(1)];
        let outcome = builder.apply_events(&mut seed_state, &events, None, false).unwrap();
        store
            .append_history_and_mutate(&execution, 1, events, outcome.tasks, seed_state, 0)
            .await
            .unwrap();

        // First resolve establishes the current pointer.
        let resolver = ConflictResolver::new(store.clone(), StateBuilder::new(StateBuilderConfig::default()));
        let blank_state = MutableState::new(
            ExecutionInfo::new_run(execution.namespace_id, "wf-2", execution.run_id, "tl", Utc::now()),
            Replication::Legacy(LegacyReplicationState::default()),
        );
        resolver
            .reset(&execution, blank_state, execution.run_id, 0, RunState::Created, 1, 1)
            .await
            .unwrap();

        // Second resolve with a stale CAS triple (wrong prev_state) is rejected.
        let blank_state2 = MutableState::new(
            ExecutionInfo::new_run(execution.namespace_id, "wf-2", execution.run_id, "tl", Utc::now()),
            Replication::Legacy(LegacyReplicationState::default()),
        );
        let err = resolver
            .reset(&execution, blank_state2, execution.run_id, 0, RunState::Created, 1, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, ConflictResolverError::Store(StoreError::CasRejected)));
    }
}
