//! Activity-task poll/dispatch/respond cycle — SPEC_FULL.md §4.4.
//!
//! Mirrors [`super::decision_task::DecisionTaskPoller`]'s shape but against the simpler
//! activity-task RPCs: one poll, one handler invocation, one of three respond calls.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;
use tracing::{debug, instrument, warn};

use super::backoff::{Backoff, PollerConfig};
use super::client::{
    ActivityTaskAddress, ClientError, PollForActivityTaskRequest, PollForActivityTaskResponse,
    RespondActivityTaskCanceledRequest, RespondActivityTaskCompletedRequest,
    RespondActivityTaskFailedRequest, WorkflowServiceClient,
};
use crate::history::Failure;

/// What an [`ActivityHandler`] reports back for one activity invocation.
#[derive(Debug, Clone)]
pub enum ActivityOutcome {
    Completed { result: serde_json::Value },
    Failed { error_type: String, message: String, non_retryable: bool },
    Canceled { details: serde_json::Value },
}

/// The worker-side seam: execute the activity function itself. Retry scheduling on failure is
/// the task generator's concern (it schedules the timer task per the backoff policy); this trait
/// only reports the outcome of one attempt.
#[async_trait]
pub trait ActivityHandler: Send + Sync {
    async fn handle(&self, task: &PollForActivityTaskResponse) -> ActivityOutcome;
}

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("transport error: {0}")]
    Client(#[from] ClientError),

    #[error("poll exhausted {attempts} duplicate-task retries")]
    DuplicateRetriesExhausted { attempts: u32 },
}

pub struct ActivityTaskPoller<C: WorkflowServiceClient> {
    client: Arc<C>,
    namespace_id: uuid::Uuid,
    task_list: String,
    identity: String,
    backoff: Backoff,
    shutdown_rx: watch::Receiver<bool>,
}

impl<C: WorkflowServiceClient> ActivityTaskPoller<C> {
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

    pub async fn wait(&mut self) -> bool {
        self.backoff.wait(&mut self.shutdown_rx).await
    }

    async fn poll_once(&mut self) -> Result<Option<PollForActivityTaskResponse>, PollerError> {
        let max_attempts = self.backoff.config().max_duplicate_attempts;
        for attempt in 1..=max_attempts {
            let request = PollForActivityTaskRequest {
                namespace_id: self.namespace_id,
                task_list: self.task_list.clone(),
                identity: self.identity.clone(),
            };
            match self.client.poll_for_activity_task(request).await {
                Ok(response) => return Ok(Some(response)),
                Err(ClientError::DuplicateTask) => {
                    debug!(attempt, "duplicate activity task poll, retrying");
                    continue;
                }
                Err(other) => return Err(other.into()),
            }
        }
        Err(PollerError::DuplicateRetriesExhausted { attempts: max_attempts })
    }

    #[instrument(skip(self, handler))]
    pub async fn poll_and_dispatch_once(
        &mut self,
        handler: &dyn ActivityHandler,
    ) -> Result<Option<()>, PollerError> {
        if self.is_shutdown() {
            return Ok(None);
        }

        let Some(task) = self.poll_once().await? else {
            self.backoff.increase();
            return Ok(None);
        };

        let address = ActivityTaskAddress::Token(task.task_token.clone());
        match handler.handle(&task).await {
            ActivityOutcome::Completed { result } => {
                self.client
                    .respond_activity_task_completed(RespondActivityTaskCompletedRequest {
                        address,
                        result,
                        identity: self.identity.clone(),
                    })
                    .await?;
            }
            ActivityOutcome::Failed { error_type, message, non_retryable } => {
                warn!(%error_type, "activity handler reported failure");
                let failure =
                    Failure::from_handler_error("activity_handler", error_type, message, non_retryable);
                self.client
                    .respond_activity_task_failed(RespondActivityTaskFailedRequest {
                        address,
                        failure,
                        identity: self.identity.clone(),
                    })
                    .await?;
            }
            ActivityOutcome::Canceled { details } => {
                self.client
                    .respond_activity_task_canceled(RespondActivityTaskCanceledRequest {
                        address,
                        details,
                        identity: self.identity.clone(),
                    })
                    .await?;
            }
        }

        self.backoff.reset();
        Ok(Some(()))
    }
}
