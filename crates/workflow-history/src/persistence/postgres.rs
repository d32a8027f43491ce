//! PostgreSQL-backed [`HistoryStore`].
//!
//! Persists `workflow_mutable_state`, `workflow_history_events`, `workflow_transfer_tasks`,
//! `workflow_timer_tasks`, `workflow_replication_tasks`, and `workflow_current_pointers`,
//! using the same `SELECT ... FOR UPDATE` optimistic-concurrency pattern the teacher's Postgres
//! store uses for `append_events`, generalized to a CAS on the mutable-state `condition` column
//! plus, for conflict-resolve writes, the `CurrentWorkflowCas` triple.

use async_trait::async_trait;
use serde_json::Value as Json;
use sqlx::{PgPool, Row};
use tracing::{debug, error, instrument};

use crate::history::{EventId, HistoryEvent};
use crate::state::RunState;
use crate::tasks::TaskBatch;

use super::codec::{CodecError, HistoryCodec, JsonHistoryCodec};
use super::store::{
    ConflictResolveRequest, HistoryPage, HistoryStore, MutableStateSnapshot, StoreError,
    WorkflowExecutionRef,
};

const DEFAULT_PAGE_SIZE: i64 = 100;

fn map_decode_error(err: CodecError) -> StoreError {
    match err {
        CodecError::UnknownEventType(tag) => StoreError::InvalidEventType(tag),
        other => StoreError::Database(other.to_string()),
    }
}

fn run_state_str(state: RunState) -> &'static str {
    match state {
        RunState::Created => "created",
        RunState::Running => "running",
        RunState::Completed => "completed",
    }
}

fn parse_run_state(s: &str) -> Result<RunState, StoreError> {
    match s {
        "created" => Ok(RunState::Created),
        "running" => Ok(RunState::Running),
        "completed" => Ok(RunState::Completed),
        other => Err(StoreError::Database(format!("unknown run state {other}"))),
    }
}

/// `sqlx::PgPool`-backed implementation of [`HistoryStore`].
///
/// Generic over the codec at the encoding boundary so a production deployment can swap in a
/// protobuf codec without touching this type; defaults to [`JsonHistoryCodec`].
#[derive(Clone)]
pub struct PostgresHistoryStore<C: HistoryCodec = JsonHistoryCodec> {
    pool: PgPool,
    codec: C,
}

impl PostgresHistoryStore<JsonHistoryCodec> {
    pub fn new(pool: PgPool) -> Self {
        Self { pool, codec: JsonHistoryCodec }
    }
}

impl<C: HistoryCodec> PostgresHistoryStore<C> {
    pub fn with_codec(pool: PgPool, codec: C) -> Self {
        Self { pool, codec }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl<C: HistoryCodec + Send + Sync> HistoryStore for PostgresHistoryStore<C> {
    #[instrument(skip(self))]
    async fn read_mutable_state(
        &self,
        execution: &WorkflowExecutionRef,
    ) -> Result<MutableStateSnapshot, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT state_blob
            FROM workflow_mutable_state
            WHERE namespace_id = $1 AND workflow_id = $2 AND run_id = $3
            "#,
        )
        .bind(execution.namespace_id)
        .bind(&execution.workflow_id)
        .bind(execution.run_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "failed to read mutable state");
            StoreError::Database(e.to_string())
        })?
        .ok_or_else(|| StoreError::NotFound(execution.clone()))?;

        let blob: Vec<u8> = row.get("state_blob");
        self.codec.decode(&blob).map_err(map_decode_error)
    }

    #[instrument(skip(self))]
    async fn read_history_page(
        &self,
        execution: &WorkflowExecutionRef,
        from_event_id: EventId,
        page_token: Option<Vec<u8>>,
    ) -> Result<HistoryPage, StoreError> {
        let offset = match page_token {
            Some(bytes) => i64::from_be_bytes(
                bytes
                    .try_into()
                    .map_err(|_| StoreError::Database("malformed page token".into()))?,
            ),
            None => 0,
        };

        let rows = sqlx::query(
            r#"
            SELECT event_blob
            FROM workflow_history_events
            WHERE namespace_id = $1 AND workflow_id = $2 AND run_id = $3 AND event_id >= $4
            ORDER BY event_id
            OFFSET $5 LIMIT $6
            "#,
        )
        .bind(execution.namespace_id)
        .bind(&execution.workflow_id)
        .bind(execution.run_id)
        .bind(from_event_id)
        .bind(offset)
        .bind(DEFAULT_PAGE_SIZE + 1)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!(error = %e, "failed to read history page");
            StoreError::Database(e.to_string())
        })?;

        let has_more = rows.len() as i64 > DEFAULT_PAGE_SIZE;
        let mut events = Vec::with_capacity(rows.len());
        for row in rows.into_iter().take(DEFAULT_PAGE_SIZE as usize) {
            let blob: Vec<u8> = row.get("event_blob");
            let event: HistoryEvent = self.codec.decode(&blob).map_err(map_decode_error)?;
            events.push(event);
        }

        let next_page_token = if has_more {
            Some((offset + DEFAULT_PAGE_SIZE).to_be_bytes().to_vec())
        } else {
            None
        };

        Ok(HistoryPage { events, next_page_token })
    }

    #[instrument(skip(self, events, tasks, state))]
    async fn append_history_and_mutate(
        &self,
        execution: &WorkflowExecutionRef,
        expected_next_event_id: EventId,
        events: Vec<HistoryEvent>,
        tasks: TaskBatch,
        state: MutableStateSnapshot,
        condition: i64,
    ) -> Result<i64, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let row = sqlx::query(
            r#"
            SELECT next_event_id, condition
            FROM workflow_mutable_state
            WHERE namespace_id = $1 AND workflow_id = $2 AND run_id = $3
            FOR UPDATE
            "#,
        )
        .bind(execution.namespace_id)
        .bind(&execution.workflow_id)
        .bind(execution.run_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        let (current_next, current_condition) = match row {
            Some(r) => (r.get::<i64, _>("next_event_id"), r.get::<i64, _>("condition")),
            None => (1, 0),
        };

        if current_next != expected_next_event_id || current_condition != condition {
            return Err(StoreError::ConcurrencyConflict {
                expected: expected_next_event_id,
                actual: current_next,
            });
        }

        for event in &events {
            let blob = self
                .codec
                .encode(event)
                .map_err(|e| StoreError::Database(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO workflow_history_events (namespace_id, workflow_id, run_id, event_id, event_blob)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(execution.namespace_id)
            .bind(&execution.workflow_id)
            .bind(execution.run_id)
            .bind(event.event_id)
            .bind(&blob)
            .execute(&mut *tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        let new_condition = condition + 1;
        let state_blob = self
            .codec
            .encode(&state)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflow_mutable_state (namespace_id, workflow_id, run_id, next_event_id, run_state, condition, state_blob)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (namespace_id, workflow_id, run_id)
            DO UPDATE SET next_event_id = EXCLUDED.next_event_id,
                          run_state = EXCLUDED.run_state,
                          condition = EXCLUDED.condition,
                          state_blob = EXCLUDED.state_blob
            "#,
        )
        .bind(execution.namespace_id)
        .bind(&execution.workflow_id)
        .bind(execution.run_id)
        .bind(state.execution_info.next_event_id)
        .bind(run_state_str(state.execution_info.state))
        .bind(new_condition)
        .bind(&state_blob)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        self.insert_tasks(&mut tx, execution, &tasks).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(run_id = %execution.run_id, new_condition, "appended history and mutated state");
        Ok(new_condition)
    }

    #[instrument(skip(self, request))]
    async fn conflict_resolve(
        &self,
        request: ConflictResolveRequest,
    ) -> Result<MutableStateSnapshot, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        let pointer_row = sqlx::query(
            r#"
            SELECT run_id, last_write_version, run_state
            FROM workflow_current_pointers
            WHERE namespace_id = $1 AND workflow_id = $2
            FOR UPDATE
            "#,
        )
        .bind(request.execution.namespace_id)
        .bind(&request.execution.workflow_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        if let Some(row) = pointer_row {
            let run_id: uuid::Uuid = row.get("run_id");
            let last_write_version: i64 = row.get("last_write_version");
            let run_state = parse_run_state(row.get::<String, _>("run_state").as_str())?;
            let cas = &request.current_workflow_cas;
            if run_id != cas.prev_run_id
                || last_write_version != cas.prev_last_write_version
                || run_state != cas.prev_state
            {
                return Err(StoreError::CasRejected);
            }
        }

        let state_blob = self
            .codec
            .encode(&request.rebuilt_state)
            .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflow_mutable_state (namespace_id, workflow_id, run_id, next_event_id, run_state, condition, state_blob)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (namespace_id, workflow_id, run_id)
            DO UPDATE SET next_event_id = EXCLUDED.next_event_id,
                          run_state = EXCLUDED.run_state,
                          condition = EXCLUDED.condition,
                          state_blob = EXCLUDED.state_blob
            "#,
        )
        .bind(request.execution.namespace_id)
        .bind(&request.execution.workflow_id)
        .bind(request.execution.run_id)
        .bind(request.rebuilt_state.execution_info.next_event_id)
        .bind(run_state_str(request.rebuilt_state.execution_info.state))
        .bind(request.condition)
        .bind(&state_blob)
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO workflow_current_pointers (namespace_id, workflow_id, run_id, last_write_version, run_state)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (namespace_id, workflow_id)
            DO UPDATE SET run_id = EXCLUDED.run_id,
                          last_write_version = EXCLUDED.last_write_version,
                          run_state = EXCLUDED.run_state
            "#,
        )
        .bind(request.execution.namespace_id)
        .bind(&request.execution.workflow_id)
        .bind(request.execution.run_id)
        .bind(request.rebuilt_state.replication.current_version())
        .bind(run_state_str(request.rebuilt_state.execution_info.state))
        .execute(&mut *tx)
        .await
        .map_err(|e| StoreError::Database(e.to_string()))?;

        self.insert_tasks(&mut tx, &request.execution, &request.tasks).await?;

        tx.commit()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;

        debug!(run_id = %request.execution.run_id, "conflict-resolve write committed");
        Ok(request.rebuilt_state)
    }
}

impl<C: HistoryCodec + Send + Sync> PostgresHistoryStore<C> {
    async fn insert_tasks(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        execution: &WorkflowExecutionRef,
        tasks: &TaskBatch,
    ) -> Result<(), StoreError> {
        for task in &tasks.transfer {
            let blob: Json = serde_json::to_value(task)
                .map_err(|e| StoreError::Database(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO workflow_transfer_tasks (namespace_id, workflow_id, run_id, task)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(execution.namespace_id)
            .bind(&execution.workflow_id)
            .bind(execution.run_id)
            .bind(&blob)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        for task in &tasks.timer {
            let blob: Json = serde_json::to_value(task)
                .map_err(|e| StoreError::Database(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO workflow_timer_tasks (namespace_id, workflow_id, run_id, task)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(execution.namespace_id)
            .bind(&execution.workflow_id)
            .bind(execution.run_id)
            .bind(&blob)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        for task in &tasks.replication {
            let blob: Json = serde_json::to_value(task)
                .map_err(|e| StoreError::Database(e.to_string()))?;
            sqlx::query(
                r#"
                INSERT INTO workflow_replication_tasks (namespace_id, workflow_id, run_id, task)
                VALUES ($1, $2, $3, $4)
                "#,
            )
            .bind(execution.namespace_id)
            .bind(&execution.workflow_id)
            .bind(execution.run_id)
            .bind(&blob)
            .execute(&mut **tx)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))?;
        }

        Ok(())
    }
}
