//! Wire shapes for the worker-facing RPCs named in SPEC_FULL.md §6, and the
//! [`WorkflowServiceClient`] port the poller types are generic over.
//!
//! Modeled as a trait rather than a concrete transport for the same reason the teacher's worker
//! pool is generic over `WorkflowEventStore` instead of a concrete database: gRPC wiring is an
//! explicit non-goal (§1), so a test or embedding caller supplies a fake implementation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::history::{DecisionTaskFailedCause, EventId, Failure, HistoryEvent};
use crate::persistence::WorkflowExecutionRef;

/// Opaque handle returned by a poll and echoed back on every response RPC for that task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskToken(pub Vec<u8>);

/// A query attached to a decision task poll response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowQuery {
    pub query_type: String,
    pub query_args: serde_json::Value,
}

/// The outcome of handling a single query, reported via `RespondQueryTaskCompleted`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueryTaskCompletion {
    Answered { result: serde_json::Value },
    Failed { error_message: String },
}

/// Sticky task-list binding a worker requests for subsequent decisions on a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StickyExecutionAttributes {
    pub worker_task_list: String,
    pub schedule_to_start_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct PollForDecisionTaskRequest {
    pub namespace_id: Uuid,
    pub task_list: String,
    pub identity: String,
}

#[derive(Debug, Clone)]
pub struct PollForDecisionTaskResponse {
    pub task_token: TaskToken,
    pub workflow_execution: WorkflowExecutionRef,
    pub workflow_type: String,
    pub previous_started_event_id: Option<EventId>,
    pub started_event_id: EventId,
    pub attempt: u32,
    pub next_event_id: EventId,
    /// Empty for a sticky query response — the worker already holds the state, per SPEC_FULL.md
    /// §4.4. Non-empty and fully paged in for every other response.
    pub history: Vec<HistoryEvent>,
    pub next_page_token: Option<Vec<u8>>,
    pub query: Option<WorkflowQuery>,
    pub queries: HashMap<String, WorkflowQuery>,
    pub sticky_execution_enabled: bool,
    pub scheduled_ts: DateTime<Utc>,
    pub started_ts: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct GetWorkflowExecutionHistoryRequest {
    pub namespace_id: Uuid,
    pub execution: WorkflowExecutionRef,
    pub next_page_token: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct GetWorkflowExecutionHistoryResponse {
    pub events: Vec<HistoryEvent>,
    pub next_page_token: Option<Vec<u8>>,
}

#[derive(Debug, Clone)]
pub struct RespondDecisionTaskCompletedRequest {
    pub task_token: TaskToken,
    pub identity: String,
    pub decisions: Vec<serde_json::Value>,
    pub sticky_attributes: Option<StickyExecutionAttributes>,
    pub return_new_decision_task: bool,
    pub force_create_new_decision_task: bool,
    pub query_results: HashMap<String, QueryTaskCompletion>,
}

#[derive(Debug, Clone)]
pub struct RespondDecisionTaskCompletedResponse {
    pub new_decision_task: Option<PollForDecisionTaskResponse>,
}

#[derive(Debug, Clone)]
pub struct RespondDecisionTaskFailedRequest {
    pub task_token: TaskToken,
    pub cause: DecisionTaskFailedCause,
    pub failure: Failure,
    pub identity: String,
}

#[derive(Debug, Clone)]
pub struct RespondQueryTaskCompletedRequest {
    pub task_token: TaskToken,
    pub completion: QueryTaskCompletion,
}

#[derive(Debug, Clone)]
pub struct PollForActivityTaskRequest {
    pub namespace_id: Uuid,
    pub task_list: String,
    pub identity: String,
}

#[derive(Debug, Clone)]
pub struct PollForActivityTaskResponse {
    pub task_token: TaskToken,
    pub workflow_execution: WorkflowExecutionRef,
    pub activity_type: String,
    pub activity_id: String,
    pub input: serde_json::Value,
    pub schedule_to_start_timeout_ms: u64,
    pub start_to_close_timeout_ms: u64,
    pub heartbeat_timeout_ms: Option<u64>,
    pub attempt: u32,
    pub heartbeat_details: Option<serde_json::Value>,
}

/// Addresses an activity-task response either by task token or by `(namespace, workflowId,
/// runId, activityId)`, per SPEC_FULL.md §6's `…ById` variants.
#[derive(Debug, Clone)]
pub enum ActivityTaskAddress {
    Token(TaskToken),
    ById { execution: WorkflowExecutionRef, activity_id: String },
}

#[derive(Debug, Clone)]
pub struct RespondActivityTaskCompletedRequest {
    pub address: ActivityTaskAddress,
    pub result: serde_json::Value,
    pub identity: String,
}

#[derive(Debug, Clone)]
pub struct RespondActivityTaskFailedRequest {
    pub address: ActivityTaskAddress,
    pub failure: Failure,
    pub identity: String,
}

#[derive(Debug, Clone)]
pub struct RespondActivityTaskCanceledRequest {
    pub address: ActivityTaskAddress,
    pub details: serde_json::Value,
    pub identity: String,
}

/// Errors a [`WorkflowServiceClient`] call can return.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Benign: the server already has an in-flight or recently-dispatched task for this poll;
    /// the poller retries transparently.
    #[error("duplicate task")]
    DuplicateTask,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// The worker-facing RPC surface named in SPEC_FULL.md §6, modeled as a port so the poller types
/// below are testable without a real transport.
#[async_trait]
pub trait WorkflowServiceClient: Send + Sync {
    async fn poll_for_decision_task(
        &self,
        request: PollForDecisionTaskRequest,
    ) -> Result<PollForDecisionTaskResponse, ClientError>;

    async fn get_workflow_execution_history(
        &self,
        request: GetWorkflowExecutionHistoryRequest,
    ) -> Result<GetWorkflowExecutionHistoryResponse, ClientError>;

    async fn respond_decision_task_completed(
        &self,
        request: RespondDecisionTaskCompletedRequest,
    ) -> Result<RespondDecisionTaskCompletedResponse, ClientError>;

    async fn respond_decision_task_failed(
        &self,
        request: RespondDecisionTaskFailedRequest,
    ) -> Result<(), ClientError>;

    async fn respond_query_task_completed(
        &self,
        request: RespondQueryTaskCompletedRequest,
    ) -> Result<(), ClientError>;

    async fn poll_for_activity_task(
        &self,
        request: PollForActivityTaskRequest,
    ) -> Result<PollForActivityTaskResponse, ClientError>;

    async fn respond_activity_task_completed(
        &self,
        request: RespondActivityTaskCompletedRequest,
    ) -> Result<(), ClientError>;

    async fn respond_activity_task_failed(
        &self,
        request: RespondActivityTaskFailedRequest,
    ) -> Result<(), ClientError>;

    async fn respond_activity_task_canceled(
        &self,
        request: RespondActivityTaskCanceledRequest,
    ) -> Result<(), ClientError>;
}
