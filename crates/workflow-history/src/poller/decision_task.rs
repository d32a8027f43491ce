//! Decision-task poll/dispatch/respond cycle — SPEC_FULL.md §4.4.
//!
//! Authoring the actual decisions (the workflow-replay engine that turns history into commands)
//! is out of scope per §1's non-goals; a [`DecisionHandler`] is the seam where that worker-side
//! code plugs in. This module owns only the protocol: paging in the full history, the
//! sticky-query invariant, attempt assertion, and duplicate-task retry.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use crate::history::{DecisionTaskFailedCause, EventId, Failure, HistoryEvent};
use crate::persistence::WorkflowExecutionRef;

use super::backoff::{Backoff, PollerConfig};
use super::client::{
    ClientError, GetWorkflowExecutionHistoryRequest, PollForDecisionTaskRequest,
    PollForDecisionTaskResponse, QueryTaskCompletion, RespondDecisionTaskCompletedRequest,
    RespondDecisionTaskFailedRequest, RespondQueryTaskCompletedRequest, StickyExecutionAttributes,
    WorkflowQuery, WorkflowServiceClient,
};

/// Error surfaced by a [`DecisionHandler`] or [`QueryHandler`], translated into a `Failure` via
/// [`Failure::from_handler_error`] before being reported back to the server.
#[derive(Debug, Clone)]
pub struct HandlerError {
    pub error_type: String,
    pub message: String,
    pub non_retryable: bool,
}

/// What a [`DecisionHandler`] produces for one decision task.
#[derive(Debug, Clone, Default)]
pub struct DecisionOutcome {
    pub decisions: Vec<serde_json::Value>,
    pub query_results: HashMap<String, QueryTaskCompletion>,
    pub sticky_attributes: Option<StickyExecutionAttributes>,
    pub return_new_decision_task: bool,
    pub force_create_new_decision_task: bool,
}

/// The worker-side seam: given the full, paged-in history for a run, produce the decisions to
/// respond with. Replaying the workflow definition against that history is the caller's concern.
#[async_trait]
pub trait DecisionHandler: Send + Sync {
    async fn handle(
        &self,
        execution: &WorkflowExecutionRef,
        workflow_type: &str,
        previous_started_event_id: Option<EventId>,
        started_event_id: EventId,
        history: &[HistoryEvent],
    ) -> Result<DecisionOutcome, HandlerError>;
}

/// The worker-side seam for answering a query attached to a decision task poll.
pub trait QueryHandler: Send + Sync {
    fn handle(&self, query: &WorkflowQuery) -> Result<serde_json::Value, String>;
}

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("transport error: {0}")]
    Client(#[from] ClientError),

    #[error(
        "non-sticky-query decision task response carried an empty history (run {run_id})"
    )]
    EmptyHistory { run_id: uuid::Uuid },

    #[error(
        "sticky query response for run {run_id} unexpectedly carried history or a next page token"
    )]
    StickyQueryCarriedHistory { run_id: uuid::Uuid },

    #[error(
        "attempt assertion failed for run {run_id}: expected {expected}, latest scheduled attempt was {actual}"
    )]
    AttemptMismatch { run_id: uuid::Uuid, expected: u32, actual: u32 },

    #[error("poll exhausted {attempts} duplicate-task retries")]
    DuplicateRetriesExhausted { attempts: u32 },
}

/// Drives one poller's worth of the decision-task cycle against a [`WorkflowServiceClient`].
pub struct DecisionTaskPoller<C: WorkflowServiceClient> {
    client: Arc<C>,
    namespace_id: uuid::Uuid,
    task_list: String,
    identity: String,
    backoff: Backoff,
    shutdown_rx: watch::Receiver<bool>,
}

impl<C: WorkflowServiceClient> DecisionTaskPoller<C> {
    pub fn new(
        client: Arc<C>,
        namespace_id: uuid::Uuid,
        task_list: String,
        identity: String,
        config: PollerConfig,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            namespace_id,
            task_list,
            identity,
            backoff: Backoff::new(config),
            shutdown_rx,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Sleep for the current backoff interval, or return early on shutdown.
    pub async fn wait(&mut self) -> bool {
        self.backoff.wait(&mut self.shutdown_rx).await
    }

    /// Poll once, retrying transparently on `ClientError::DuplicateTask` up to
    /// `config.max_duplicate_attempts` times.
    async fn poll_once(&mut self) -> Result<Option<PollForDecisionTaskResponse>, PollerError> {
        let max_attempts = self.backoff.config().max_duplicate_attempts;
        for attempt in 1..=max_attempts {
            let request = PollForDecisionTaskRequest {
                namespace_id: self.namespace_id,
                task_list: self.task_list.clone(),
                identity: self.identity.clone(),
            };
            match self.client.poll_for_decision_task(request).await {
                Ok(response) => return Ok(Some(response)),
                Err(ClientError::DuplicateTask) => {
                    debug!(attempt, "duplicate decision task poll, retrying");
                    continue;
                }
                Err(other) => return Err(other.into()),
            }
        }
        Err(PollerError::DuplicateRetriesExhausted { attempts: max_attempts })
    }

    /// Page in the remainder of the history via `NextPageToken` until exhausted.
    async fn fetch_remaining_history(
        &self,
        execution: &WorkflowExecutionRef,
        mut next_page_token: Option<Vec<u8>>,
        history: &mut Vec<HistoryEvent>,
    ) -> Result<(), PollerError> {
        while let Some(token) = next_page_token {
            let response = self
                .client
                .get_workflow_execution_history(GetWorkflowExecutionHistoryRequest {
                    namespace_id: self.namespace_id,
                    execution: execution.clone(),
                    next_page_token: Some(token),
                })
                .await?;
            history.extend(response.events);
            next_page_token = response.next_page_token;
        }
        Ok(())
    }

    /// Run one full decision-task cycle: poll, page in history, dispatch to `decision_handler`
    /// or `query_handler`, and respond. Returns `Ok(None)` when the poll timed out with no task
    /// (the normal idle outcome) or shutdown was observed mid-cycle.
    #[instrument(skip(self, decision_handler, query_handler))]
    pub async fn poll_and_dispatch_once(
        &mut self,
        decision_handler: &dyn DecisionHandler,
        query_handler: &dyn QueryHandler,
        expected_attempt: Option<u32>,
    ) -> Result<Option<()>, PollerError> {
        if self.is_shutdown() {
            return Ok(None);
        }

        let Some(mut response) = self.poll_once().await? else {
            return Ok(None);
        };

        let run_id = response.workflow_execution.run_id;
        let is_sticky_query = response.query.is_some() && response.sticky_execution_enabled;

        if is_sticky_query {
            if !response.history.is_empty() || response.next_page_token.is_some() {
                return Err(PollerError::StickyQueryCarriedHistory { run_id });
            }
        } else if response.history.is_empty() && response.next_page_token.is_none() {
            return Err(PollerError::EmptyHistory { run_id });
        }

        self.fetch_remaining_history(
            &response.workflow_execution,
            response.next_page_token.take(),
            &mut response.history,
        )
        .await?;

        if let Some(expected) = expected_attempt {
            let latest_attempt = response
                .history
                .iter()
                .rev()
                .find_map(|e| match &e.event_type {
                    crate::history::HistoryEventType::DecisionTaskScheduled { attempt, .. } => {
                        Some(*attempt)
                    }
                    _ => None,
                })
                .unwrap_or(response.attempt);
            if latest_attempt != expected {
                return Err(PollerError::AttemptMismatch {
                    run_id,
                    expected,
                    actual: latest_attempt,
                });
            }
        }

        if let Some(query) = response.query.clone() {
            let completion = match query_handler.handle(&query) {
                Ok(result) => QueryTaskCompletion::Answered { result },
                Err(message) => QueryTaskCompletion::Failed { error_message: message },
            };
            self.client
                .respond_query_task_completed(RespondQueryTaskCompletedRequest {
                    task_token: response.task_token,
                    completion,
                })
                .await?;
            self.backoff.reset();
            return Ok(Some(()));
        }

        match decision_handler
            .handle(
                &response.workflow_execution,
                &response.workflow_type,
                response.previous_started_event_id,
                response.started_event_id,
                &response.history,
            )
            .await
        {
            Ok(outcome) => {
                self.client
                    .respond_decision_task_completed(RespondDecisionTaskCompletedRequest {
                        task_token: response.task_token,
                        identity: self.identity.clone(),
                        decisions: outcome.decisions,
                        sticky_attributes: outcome.sticky_attributes,
                        return_new_decision_task: outcome.return_new_decision_task,
                        force_create_new_decision_task: outcome.force_create_new_decision_task,
                        query_results: outcome.query_results,
                    })
                    .await?;
            }
            Err(err) => {
                warn!(run_id = %run_id, error_type = %err.error_type, "decision handler failed");
                let failure = Failure::from_handler_error(
                    "decision_handler",
                    &err.error_type,
                    &err.message,
                    err.non_retryable,
                );
                self.client
                    .respond_decision_task_failed(RespondDecisionTaskFailedRequest {
                        task_token: response.task_token,
                        cause: DecisionTaskFailedCause::WorkerUnhandledFailure,
                        failure,
                        identity: self.identity.clone(),
                    })
                    .await?;
            }
        }

        self.backoff.reset();
        Ok(Some(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::HistoryEvent;
    use parking_lot::Mutex;
    use std::collections::VecDeque;

    struct FakeClient {
        decision_polls: Mutex<VecDeque<Result<PollForDecisionTaskResponse, ClientError>>>,
        completed: Mutex<Vec<RespondDecisionTaskCompletedRequest>>,
        failed: Mutex<Vec<RespondDecisionTaskFailedRequest>>,
        queries: Mutex<Vec<RespondQueryTaskCompletedRequest>>,
    }

    impl FakeClient {
        fn new(polls: Vec<Result<PollForDecisionTaskResponse, ClientError>>) -> Self {
            Self {
                decision_polls: Mutex::new(polls.into()),
                completed: Mutex::new(Vec::new()),
                failed: Mutex::new(Vec::new()),
                queries: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl WorkflowServiceClient for FakeClient {
        async fn poll_for_decision_task(
            &self,
            _request: PollForDecisionTaskRequest,
        ) -> Result<PollForDecisionTaskResponse, ClientError> {
            self.decision_polls
                .lock()
                .pop_front()
                .unwrap_or(Err(ClientError::DeadlineExceeded))
        }

        async fn get_workflow_execution_history(
            &self,
            _request: GetWorkflowExecutionHistoryRequest,
        ) -> Result<GetWorkflowExecutionHistoryResponse, ClientError> {
            Ok(GetWorkflowExecutionHistoryResponse { events: vec![], next_page_token: None })
        }

        async fn respond_decision_task_completed(
            &self,
            request: RespondDecisionTaskCompletedRequest,
        ) -> Result<RespondDecisionTaskCompletedResponse, ClientError> {
            self.completed.lock().push(request);
            Ok(RespondDecisionTaskCompletedResponse { new_decision_task: None })
        }

        async fn respond_decision_task_failed(
            &self,
            request: RespondDecisionTaskFailedRequest,
        ) -> Result<(), ClientError> {
            self.failed.lock().push(request);
            Ok(())
        }

        async fn respond_query_task_completed(
            &self,
            request: RespondQueryTaskCompletedRequest,
        ) -> Result<(), ClientError> {
            self.queries.lock().push(request);
            Ok(())
        }

        async fn poll_for_activity_task(
            &self,
            _request: super::super::client::PollForActivityTaskRequest,
        ) -> Result<super::super::client::PollForActivityTaskResponse, ClientError> {
            unimplemented!("not exercised by decision-task tests")
        }

        async fn respond_activity_task_completed(
            &self,
            _request: super::super::client::RespondActivityTaskCompletedRequest,
        ) -> Result<(), ClientError> {
            unimplemented!("not exercised by decision-task tests")
        }

        async fn respond_activity_task_failed(
            &self,
            _request: super::super::client::RespondActivityTaskFailedRequest,
        ) -> Result<(), ClientError> {
            unimplemented!("not exercised by decision-task tests")
        }

        async fn respond_activity_task_canceled(
            &self,
            _request: super::super::client::RespondActivityTaskCanceledRequest,
        ) -> Result<(), ClientError> {
            unimplemented!("not exercised by decision-task tests")
        }
    }

    fn base_response(run_id: uuid::Uuid) -> PollForDecisionTaskResponse {
        PollForDecisionTaskResponse {
            task_token: super::super::client::TaskToken(vec![1, 2, 3]),
            workflow_execution: WorkflowExecutionRef {
                namespace_id: uuid::Uuid::nil(),
                workflow_id: "wf-1".into(),
                run_id,
            },
            workflow_type: "demo".into(),
            previous_started_event_id: None,
            started_event_id: 3,
            attempt: 0,
            next_event_id: 4,
            history: vec![HistoryEvent::new(
                1,
                1,
                crate::history::HistoryEventType::WorkflowExecutionStarted {
                    input: serde_json::json!({}),
                    parent_workflow_id: None,
                    parent_run_id: None,
                    task_list: "tl".into(),
                    workflow_execution_timeout_ms: 0,
                    workflow_run_timeout_ms: 0,
                    workflow_task_timeout_ms: 10_000,
                    first_decision_task_backoff_seconds: 0,
                },
            )],
            next_page_token: None,
            query: None,
            queries: HashMap::new(),
            sticky_execution_enabled: false,
            scheduled_ts: chrono::Utc::now(),
            started_ts: chrono::Utc::now(),
        }
    }

    struct EchoHandler;

    #[async_trait]
    impl DecisionHandler for EchoHandler {
        async fn handle(
            &self,
            _execution: &WorkflowExecutionRef,
            _workflow_type: &str,
            _previous_started_event_id: Option<EventId>,
            _started_event_id: EventId,
            _history: &[HistoryEvent],
        ) -> Result<DecisionOutcome, HandlerError> {
            Ok(DecisionOutcome::default())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl DecisionHandler for FailingHandler {
        async fn handle(
            &self,
            _execution: &WorkflowExecutionRef,
            _workflow_type: &str,
            _previous_started_event_id: Option<EventId>,
            _started_event_id: EventId,
            _history: &[HistoryEvent],
        ) -> Result<DecisionOutcome, HandlerError> {
            Err(HandlerError {
                error_type: "BoomError".into(),
                message: "kaboom".into(),
                non_retryable: false,
            })
        }
    }

    struct NoopQueryHandler;
    impl QueryHandler for NoopQueryHandler {
        fn handle(&self, _query: &WorkflowQuery) -> Result<serde_json::Value, String> {
            Ok(serde_json::json!(null))
        }
    }

    fn new_poller(client: Arc<FakeClient>) -> DecisionTaskPoller<FakeClient> {
        let (_tx, rx) = watch::channel(false);
        DecisionTaskPoller::new(
            client,
            uuid::Uuid::nil(),
            "tl".into(),
            "worker-1".into(),
            PollerConfig::default(),
            rx,
        )
    }

    #[tokio::test]
    async fn dispatches_to_decision_handler_and_responds_completed() {
        let run_id = uuid::Uuid::new_v4();
        let client = Arc::new(FakeClient::new(vec![Ok(base_response(run_id))]));
        let mut poller = new_poller(client.clone());

        let outcome = poller
            .poll_and_dispatch_once(&EchoHandler, &NoopQueryHandler, None)
            .await
            .unwrap();

        assert!(outcome.is_some());
        assert_eq!(client.completed.lock().len(), 1);
        assert!(client.failed.lock().is_empty());
    }

    #[tokio::test]
    async fn handler_error_is_reported_via_respond_decision_task_failed() {
        let run_id = uuid::Uuid::new_v4();
        let client = Arc::new(FakeClient::new(vec![Ok(base_response(run_id))]));
        let mut poller = new_poller(client.clone());

        poller
            .poll_and_dispatch_once(&FailingHandler, &NoopQueryHandler, None)
            .await
            .unwrap();

        assert!(client.completed.lock().is_empty());
        let failed = client.failed.lock();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].failure.failure_info.error_type, "BoomError");
    }

    #[tokio::test]
    async fn sticky_query_response_with_history_is_fatal() {
        let run_id = uuid::Uuid::new_v4();
        let mut response = base_response(run_id);
        response.query = Some(WorkflowQuery { query_type: "status".into(), query_args: serde_json::json!({}) });
        response.sticky_execution_enabled = true;
        let client = Arc::new(FakeClient::new(vec![Ok(response)]));
        let mut poller = new_poller(client);

        let err = poller
            .poll_and_dispatch_once(&EchoHandler, &NoopQueryHandler, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PollerError::StickyQueryCarriedHistory { .. }));
    }

    #[tokio::test]
    async fn non_sticky_empty_history_is_fatal() {
        let run_id = uuid::Uuid::new_v4();
        let mut response = base_response(run_id);
        response.history.clear();
        let client = Arc::new(FakeClient::new(vec![Ok(response)]));
        let mut poller = new_poller(client);

        let err = poller
            .poll_and_dispatch_once(&EchoHandler, &NoopQueryHandler, None)
            .await
            .unwrap_err();
        assert!(matches!(err, PollerError::EmptyHistory { .. }));
    }

    #[tokio::test]
    async fn duplicate_task_polls_are_retried_transparently() {
        let run_id = uuid::Uuid::new_v4();
        let client = Arc::new(FakeClient::new(vec![
            Err(ClientError::DuplicateTask),
            Err(ClientError::DuplicateTask),
            Ok(base_response(run_id)),
        ]));
        let mut poller = new_poller(client.clone());

        let outcome = poller
            .poll_and_dispatch_once(&EchoHandler, &NoopQueryHandler, None)
            .await
            .unwrap();
        assert!(outcome.is_some());
        assert_eq!(client.completed.lock().len(), 1);
    }

    #[tokio::test]
    async fn attempt_mismatch_is_rejected() {
        let run_id = uuid::Uuid::new_v4();
        let client = Arc::new(FakeClient::new(vec![Ok(base_response(run_id))]));
        let mut poller = new_poller(client);

        let err = poller
            .poll_and_dispatch_once(&EchoHandler, &NoopQueryHandler, Some(7))
            .await
            .unwrap_err();
        assert!(matches!(err, PollerError::AttemptMismatch { expected: 7, .. }));
    }
}
