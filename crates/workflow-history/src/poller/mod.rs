//! The external task-poller protocol — SPEC_FULL.md §4.4.
//!
//! This crate owns the poll/page/dispatch/respond cycle and the wire shapes it runs over; the
//! workflow-replay engine that turns a history into decisions, and the activity function bodies
//! themselves, are supplied by the embedding worker through the [`DecisionHandler`],
//! [`QueryHandler`], and [`ActivityHandler`] traits.

mod activity_task;
mod backoff;
mod client;
mod decision_task;

pub use activity_task::{
    ActivityHandler, ActivityOutcome, ActivityTaskPoller, PollerError as ActivityPollerError,
};
pub use backoff::{Backoff, PollerConfig};
pub use client::{
    ActivityTaskAddress, ClientError, GetWorkflowExecutionHistoryRequest,
    GetWorkflowExecutionHistoryResponse, PollForActivityTaskRequest, PollForActivityTaskResponse,
    PollForDecisionTaskRequest, PollForDecisionTaskResponse, QueryTaskCompletion,
    RespondActivityTaskCanceledRequest, RespondActivityTaskCompletedRequest,
    RespondActivityTaskFailedRequest, RespondDecisionTaskCompletedRequest,
    RespondDecisionTaskCompletedResponse, RespondDecisionTaskFailedRequest,
    RespondQueryTaskCompletedRequest, StickyExecutionAttributes, TaskToken, WorkflowQuery,
    WorkflowServiceClient,
};
pub use decision_task::{
    DecisionHandler, DecisionOutcome, DecisionTaskPoller, HandlerError,
    PollerError as DecisionPollerError,
};
