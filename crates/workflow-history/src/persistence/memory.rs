//! In-memory [`HistoryStore`] for unit tests and single-process embedding.
//!
//! Mirrors the teacher's `InMemoryWorkflowEventStore`: everything lives behind a
//! `parking_lot::RwLock`-guarded map, and provides the same optimistic-concurrency semantics as
//! the production backend so tests written against it generalize.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::history::{EventId, HistoryEvent};
use crate::state::RunState;
use crate::tasks::TaskBatch;

use super::store::{
    ConflictResolveRequest, HistoryPage, HistoryStore, MutableStateSnapshot, StoreError,
    WorkflowExecutionRef,
};

const DEFAULT_PAGE_SIZE: usize = 100;

struct RunRecord {
    state: MutableStateSnapshot,
    history: Vec<HistoryEvent>,
    condition: i64,
}

/// Tracks the "current run" pointer for a workflow id, independent of which run record is being
/// read — this is what [`HistoryStore::conflict_resolve`]'s CAS guards against.
#[derive(Clone)]
struct CurrentPointer {
    run_id: uuid::Uuid,
    last_write_version: i64,
    state: RunState,
}

/// `RwLock<HashMap<...>>`-backed [`HistoryStore`], used by every unit test in this crate and
/// suitable for single-process embedding where durability across restarts is not required.
pub struct InMemoryHistoryStore {
    runs: RwLock<HashMap<WorkflowExecutionRef, RunRecord>>,
    current_pointers: RwLock<HashMap<(uuid::Uuid, String), CurrentPointer>>,
    page_size: usize,
}

impl Default for InMemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            runs: RwLock::new(HashMap::new()),
            current_pointers: RwLock::new(HashMap::new()),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            ..Self::new()
        }
    }

    pub fn run_count(&self) -> usize {
        self.runs.read().len()
    }

    fn pointer_key(execution: &WorkflowExecutionRef) -> (uuid::Uuid, String) {
        (execution.namespace_id, execution.workflow_id.clone())
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn read_mutable_state(
        &self,
        execution: &WorkflowExecutionRef,
    ) -> Result<MutableStateSnapshot, StoreError> {
        self.runs
            .read()
            .get(execution)
            .map(|r| r.state.clone())
            .ok_or_else(|| StoreError::NotFound(execution.clone()))
    }

    async fn read_history_page(
        &self,
        execution: &WorkflowExecutionRef,
        from_event_id: EventId,
        page_token: Option<Vec<u8>>,
    ) -> Result<HistoryPage, StoreError> {
        let runs = self.runs.read();
        let record = runs
            .get(execution)
            .ok_or_else(|| StoreError::NotFound(execution.clone()))?;

        let start_offset = match page_token {
            Some(bytes) => usize::from_be_bytes(bytes.try_into().map_err(|_| {
                StoreError::Database("malformed page token".into())
            })?),
            None => record
                .history
                .iter()
                .position(|e| e.event_id >= from_event_id)
                .unwrap_or(record.history.len()),
        };

        let end_offset = (start_offset + self.page_size).min(record.history.len());
        let events = record.history[start_offset..end_offset].to_vec();
        let next_page_token = if end_offset < record.history.len() {
            Some(end_offset.to_be_bytes().to_vec())
        } else {
            None
        };

        Ok(HistoryPage { events, next_page_token })
    }

    async fn append_history_and_mutate(
        &self,
        execution: &WorkflowExecutionRef,
        expected_next_event_id: EventId,
        events: Vec<HistoryEvent>,
        _tasks: TaskBatch,
        state: MutableStateSnapshot,
        condition: i64,
    ) -> Result<i64, StoreError> {
        let mut runs = self.runs.write();
        match runs.get_mut(execution) {
            Some(record) => {
                let current_next = record.state.execution_info.next_event_id;
                if current_next != expected_next_event_id || record.condition != condition {
                    return Err(StoreError::ConcurrencyConflict {
                        expected: expected_next_event_id,
                        actual: current_next,
                    });
                }
                record.history.extend(events);
                record.state = state;
                record.condition = condition + 1;
                Ok(record.condition)
            }
            None => {
                if expected_next_event_id != 1 || condition != 0 {
                    return Err(StoreError::ConcurrencyConflict {
                        expected: expected_next_event_id,
                        actual: 0,
                    });
                }
                let new_condition = 1;
                runs.insert(
                    execution.clone(),
                    RunRecord {
                        state,
                        history: events,
                        condition: new_condition,
                    },
                );
                Ok(new_condition)
            }
        }
    }

    async fn conflict_resolve(
        &self,
        request: ConflictResolveRequest,
    ) -> Result<MutableStateSnapshot, StoreError> {
        let key = Self::pointer_key(&request.execution);
        {
            let pointers = self.current_pointers.read();
            if let Some(current) = pointers.get(&key) {
                let cas = &request.current_workflow_cas;
                if current.run_id != cas.prev_run_id
                    || current.last_write_version != cas.prev_last_write_version
                    || current.state != cas.prev_state
                {
                    return Err(StoreError::CasRejected);
                }
            }
        }

        let rebuilt = request.rebuilt_state.clone();
        self.runs.write().insert(
            request.execution.clone(),
            RunRecord {
                state: rebuilt.clone(),
                history: rebuilt.history_builder.staged.clone(),
                condition: request.condition,
            },
        );
        self.current_pointers.write().insert(
            key,
            CurrentPointer {
                run_id: request.execution.run_id,
                last_write_version: rebuilt.replication.current_version(),
                state: rebuilt.execution_info.state,
            },
        );

        Ok(rebuilt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryEventType;
    use crate::state::{ExecutionInfo, LegacyReplicationState, MutableState, Replication};
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn execution_ref() -> WorkflowExecutionRef {
        WorkflowExecutionRef {
            namespace_id: Uuid::nil(),
            workflow_id: "wf-1".into(),
            run_id: Uuid::new_v4(),
        }
    }

    fn started_event() -> HistoryEvent {
        HistoryEvent::new(
            1,
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
    async fn first_write_requires_expected_next_event_id_one_and_condition_zero() {
        let store = InMemoryHistoryStore::new();
        let execution = execution_ref();
        let state = MutableState::new(
            ExecutionInfo::new_run(execution.namespace_id, "wf-1", execution.run_id, "tl", Utc::now()),
            Replication::Legacy(LegacyReplicationState::default()),
        );

        let condition = store
            .append_history_and_mutate(
                &execution,
                1,
                vec![started_event()],
                TaskBatch::default(),
                state,
                0,
            )
            .await
            .unwrap();
        assert_eq!(condition, 1);
        assert_eq!(store.run_count(), 1);
    }

    #[tokio::test]
    async fn stale_condition_is_rejected() {
        let store = InMemoryHistoryStore::new();
        let execution = execution_ref();
        let state = MutableState::new(
            ExecutionInfo::new_run(execution.namespace_id, "wf-1", execution.run_id, "tl", Utc::now()),
            Replication::Legacy(LegacyReplicationState::default()),
        );
        store
            .append_history_and_mutate(
                &execution,
                1,
                vec![started_event()],
                TaskBatch::default(),
                state.clone(),
                0,
            )
            .await
            .unwrap();

        let err = store
            .append_history_and_mutate(&execution, 2, vec![], TaskBatch::default(), state, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::ConcurrencyConflict { .. }));
    }

    #[tokio::test]
    async fn read_history_page_paginates() {
        let store = InMemoryHistoryStore::with_page_size(1);
        let execution = execution_ref();
        let mut state = MutableState::new(
            ExecutionInfo::new_run(execution.namespace_id, "wf-1", execution.run_id, "tl", Utc::now()),
            Replication::Legacy(LegacyReplicationState::default()),
        );
        state.execution_info.next_event_id = 3;
        let events = vec![
            started_event(),
            HistoryEvent::new(2, 1, HistoryEventType::WorkflowExecutionTimedOut),
        ];
        store
            .append_history_and_mutate(&execution, 1, events, TaskBatch::default(), state, 0)
            .await
            .unwrap();

        let page1 = store.read_history_page(&execution, 1, None).await.unwrap();
        assert_eq!(page1.events.len(), 1);
        assert!(page1.next_page_token.is_some());

        let page2 = store
            .read_history_page(&execution, 1, page1.next_page_token)
            .await
            .unwrap();
        assert_eq!(page2.events.len(), 1);
        assert!(page2.next_page_token.is_none());
    }
}
