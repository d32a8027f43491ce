//! Stateless façade that turns mutable-state effects into persisted tasks.
//!
//! Each `generate_*` call inspects the current [`MutableState`] plus the triggering event and
//! appends to the transaction-scoped [`TaskBatch`]. Task ids are owned by the generator so
//! callers never invent their own; visibility timestamps are always derived from the triggering
//! event's timestamp, never from wall-clock time, so a re-fold of the same slice is
//! byte-identical.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use uuid::Uuid;

use crate::history::{EventId, TimeoutType};
use crate::state::MutableState;

use super::types::{ReplicationTask, TaskBatch, TimerTask, TransferTask};

/// Stateless task-generation façade over a single fold's [`TaskBatch`].
pub struct TaskGenerator;

impl TaskGenerator {
    pub fn generate_record_workflow_started(&self, run_id: Uuid, batch: &mut TaskBatch) {
        batch.transfer.push(TransferTask::RecordWorkflowStarted { run_id });
    }

    pub fn generate_workflow_start(&self, run_id: Uuid, task_list: String, batch: &mut TaskBatch) {
        batch.transfer.push(TransferTask::WorkflowStart { run_id, task_list });
    }

    pub fn generate_delayed_decision(
        &self,
        run_id: Uuid,
        event_timestamp: DateTime<Utc>,
        backoff_seconds: u64,
        batch: &mut TaskBatch,
    ) {
        if backoff_seconds == 0 {
            return;
        }
        let fire_at = event_timestamp + ChronoDuration::seconds(backoff_seconds as i64);
        batch.transfer.push(TransferTask::DelayedDecision { run_id, fire_at });
    }

    pub fn generate_decision_schedule(
        &self,
        run_id: Uuid,
        scheduled_event_id: EventId,
        task_list: String,
        batch: &mut TaskBatch,
    ) {
        batch.transfer.push(TransferTask::DecisionSchedule {
            run_id,
            scheduled_event_id,
            task_list,
        });
    }

    pub fn generate_decision_start(
        &self,
        run_id: Uuid,
        scheduled_event_id: EventId,
        batch: &mut TaskBatch,
    ) {
        batch
            .transfer
            .push(TransferTask::DecisionStart { run_id, scheduled_event_id });
    }

    pub fn generate_activity_transfer(
        &self,
        run_id: Uuid,
        scheduled_event_id: EventId,
        task_list: String,
        batch: &mut TaskBatch,
    ) {
        batch.transfer.push(TransferTask::ActivityTransfer {
            run_id,
            scheduled_event_id,
            task_list,
        });
    }

    pub fn generate_child_workflow_transfer(
        &self,
        run_id: Uuid,
        initiated_event_id: EventId,
        batch: &mut TaskBatch,
    ) {
        batch
            .transfer
            .push(TransferTask::ChildWorkflowTransfer { run_id, initiated_event_id });
    }

    pub fn generate_cancel_external_transfer(
        &self,
        run_id: Uuid,
        initiated_event_id: EventId,
        batch: &mut TaskBatch,
    ) {
        batch
            .transfer
            .push(TransferTask::CancelExternalTransfer { run_id, initiated_event_id });
    }

    pub fn generate_signal_external_transfer(
        &self,
        run_id: Uuid,
        initiated_event_id: EventId,
        batch: &mut TaskBatch,
    ) {
        batch
            .transfer
            .push(TransferTask::SignalExternalTransfer { run_id, initiated_event_id });
    }

    pub fn generate_search_attribute_upsert(&self, run_id: Uuid, batch: &mut TaskBatch) {
        batch.transfer.push(TransferTask::SearchAttributeUpsert { run_id });
    }

    pub fn generate_workflow_close(&self, run_id: Uuid, batch: &mut TaskBatch) {
        batch.transfer.push(TransferTask::WorkflowClose { run_id });
    }

    pub fn generate_replication_task(
        &self,
        run_id: Uuid,
        first_event_id: EventId,
        next_event_id: EventId,
        version: i64,
        batch: &mut TaskBatch,
    ) {
        batch.replication.push(ReplicationTask {
            run_id,
            first_event_id,
            next_event_id,
            version,
        });
    }

    /// Postlude step: emit at most one timer task per pending activity that doesn't have one
    /// yet, using the fold's final event timestamp as the clock.
    pub fn generate_activity_timers(
        &self,
        run_id: Uuid,
        state: &MutableState,
        event_timestamp: DateTime<Utc>,
        batch: &mut TaskBatch,
    ) {
        for info in state.pending_activities.values() {
            let timeout_ms = if info.started_event_id.is_some() {
                info.start_to_close_timeout_ms
            } else {
                info.schedule_to_start_timeout_ms
            };
            let timeout_type = if info.started_event_id.is_some() {
                TimeoutType::StartToClose
            } else {
                TimeoutType::ScheduleToStart
            };
            let fire_at = event_timestamp + ChronoDuration::milliseconds(timeout_ms as i64);
            batch.timer.push(TimerTask::ActivityTimeout {
                run_id,
                scheduled_event_id: info.scheduled_event_id,
                timeout_type,
                fire_at,
            });
        }
    }

    /// Postlude step: emit at most one user-timer task per pending timer not yet covered.
    pub fn generate_user_timers(&self, run_id: Uuid, state: &mut MutableState, batch: &mut TaskBatch) {
        for info in state.pending_timers.values_mut() {
            if info.task_generated {
                continue;
            }
            batch.timer.push(TimerTask::UserTimer {
                run_id,
                timer_id: info.timer_id.clone(),
                fire_at: info.fire_at,
            });
            info.task_generated = true;
        }
    }
}
