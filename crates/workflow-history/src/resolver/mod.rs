//! Rebuilds mutable state from persisted history after an optimistic-concurrency rejection or
//! a replication-detected divergence.

mod conflict_resolver;

pub use conflict_resolver::{ConflictResolver, ConflictResolverError, ResetOutcome};
