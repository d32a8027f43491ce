//! The canonical history event model.
//!
//! This module contains the core record types:
//! - [`HistoryEvent`] / [`HistoryEventType`] for the persisted, append-only event log
//! - [`Failure`] for the wire representation of a failed handler invocation

mod event;
mod failure;

pub use event::{
    DecisionTaskFailedCause, EventId, FailoverVersion, HistoryEvent, HistoryEventType,
    TimeoutType,
};
pub use failure::{ApplicationFailureInfo, Failure};
