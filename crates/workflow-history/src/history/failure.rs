//! Wire representation of a failed handler invocation.
//!
//! Mirrors the translation rule in SPEC_FULL.md §4.5: a handler error is lifted into a message,
//! a fixed source marker, and an application-failure payload carrying the error's concrete type
//! name and whether it should be retried.

use serde::{Deserialize, Serialize};

/// A failure recorded on the wire (in history events and RPC responses).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Failure {
    /// Human-readable message, taken verbatim from the originating error.
    pub message: String,
    /// Fixed marker identifying which component translated the error (e.g. "decision_handler",
    /// "activity_handler").
    pub source: String,
    pub failure_info: ApplicationFailureInfo,
}

/// The `application_failure` variant of a [`Failure`]. This crate does not model the other
/// Temporal failure-info kinds (timeout, canceled, terminated, server) because they are
/// constructed directly from history event types, not translated from handler errors.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApplicationFailureInfo {
    /// Concrete error type name, with no pointer/reference indirection in the name.
    pub error_type: String,
    pub non_retryable: bool,
    pub details: serde_json::Value,
}

impl Failure {
    pub fn from_handler_error(
        source: impl Into<String>,
        error_type: impl Into<String>,
        message: impl Into<String>,
        non_retryable: bool,
    ) -> Self {
        Self {
            message: message.into(),
            source: source.into(),
            failure_info: ApplicationFailureInfo {
                error_type: error_type.into(),
                non_retryable,
                details: serde_json::Value::Null,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn translates_a_handler_error_into_an_application_failure() {
        let failure = Failure::from_handler_error(
            "decision_handler",
            "InvalidInputError",
            "missing field `order_id`",
            true,
        );

        assert_eq!(failure.source, "decision_handler");
        assert!(failure.failure_info.non_retryable);
        assert_eq!(failure.failure_info.error_type, "InvalidInputError");
    }
}
