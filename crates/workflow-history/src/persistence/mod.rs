//! The storage-facing port the state builder and conflict resolver are coded against.
//!
//! - [`HistoryStore`] — the async trait both consume
//! - [`InMemoryHistoryStore`] — `RwLock`-guarded, used by every unit test and suitable for
//!   single-process embedding
//! - [`PostgresHistoryStore`] — production backend
//! - [`HistoryCodec`] / [`JsonHistoryCodec`] — the encoding boundary named in SPEC_FULL.md §6

mod codec;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod store;

pub use codec::{CodecError, HistoryCodec, JsonHistoryCodec};
pub use memory::InMemoryHistoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresHistoryStore;
pub use store::{
    ConflictResolveRequest, CurrentWorkflowCas, HistoryPage, HistoryStore, MutableStateSnapshot,
    StoreError, WorkflowExecutionRef,
};
