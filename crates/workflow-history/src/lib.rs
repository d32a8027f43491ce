//! # Workflow History
//!
//! A replicated workflow-state-rebuilder: the durable-execution core that folds a workflow
//! run's event history into mutable state, generates the transfer/timer/replication tasks that
//! drive the rest of the system, and rebuilds that state from persisted history whenever an
//! optimistic-concurrency write is rejected.
//!
//! ## Features
//!
//! - **Event-sourced state**: [`state::MutableState`] is a pure fold over [`history::HistoryEvent`]
//! - **Deterministic task generation**: [`tasks::TaskGenerator`] derives transfer/timer/replication
//!   tasks from event timestamps, never wall-clock time
//! - **Conflict resolution**: [`resolver::ConflictResolver`] rebuilds state from persisted
//!   history on a CAS rejection or replication-detected divergence
//! - **Storage-agnostic persistence**: [`persistence::HistoryStore`] is implemented by both an
//!   in-memory store (tests, embedding) and a PostgreSQL store (production)
//! - **External task-poller protocol**: [`poller`] drives the decision-task, activity-task, and
//!   query cycles against a [`poller::WorkflowServiceClient`]
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          StateBuilder                        │
//! │   (folds HistoryEvent slices into MutableState + tasks)     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                          HistoryStore                        │
//! │      (InMemoryHistoryStore / PostgresHistoryStore)           │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        ConflictResolver                       │
//! │   (rebuilds state from history on CAS rejection)             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Replaying a workflow definition against the folded history to produce decisions, and running
//! activity function bodies, are out of scope here — this crate owns the state-rebuilding core
//! and the protocol plumbing around it, not the worker-side application code.

pub mod builder;
pub mod history;
pub mod persistence;
pub mod poller;
pub mod reliability;
pub mod resolver;
pub mod state;
pub mod tasks;

/// Prelude for common imports.
pub mod prelude {
    pub use crate::builder::{ApplyEventsOutcome, StateBuilder, StateBuilderConfig, StateBuilderError};
    pub use crate::history::{HistoryEvent, HistoryEventType};
    pub use crate::persistence::{HistoryStore, InMemoryHistoryStore, StoreError};
    #[cfg(feature = "postgres")]
    pub use crate::persistence::PostgresHistoryStore;
    pub use crate::poller::{ActivityTaskPoller, DecisionTaskPoller, PollerConfig, WorkflowServiceClient};
    pub use crate::reliability::{CircuitBreakerConfig, RetryPolicy};
    pub use crate::resolver::{ConflictResolver, ConflictResolverError, ResetOutcome};
    pub use crate::state::MutableState;
    pub use crate::tasks::{TaskBatch, TaskGenerator};
}

pub use builder::{ApplyEventsOutcome, StateBuilder, StateBuilderConfig, StateBuilderError};
pub use persistence::{HistoryStore, InMemoryHistoryStore, StoreError};
#[cfg(feature = "postgres")]
pub use persistence::PostgresHistoryStore;
pub use reliability::{CircuitBreakerConfig, RetryPolicy};
pub use resolver::{ConflictResolver, ConflictResolverError, ResetOutcome};
pub use state::MutableState;
pub use tasks::{TaskBatch, TaskGenerator};
