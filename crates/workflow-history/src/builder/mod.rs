//! Folds history into mutable state.

mod state_builder;

pub use state_builder::{ApplyEventsOutcome, StateBuilder, StateBuilderConfig, StateBuilderError};
