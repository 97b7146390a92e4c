//! Errors produced while executing a subscription.
//!
//! There are three tiers:
//! - [`FieldError`]: a GraphQL error entry reported inside a result's `errors`.
//! - [`CompletionError`]: a failure of a single completion pass; never escapes
//!   the event it belongs to.
//! - [`ExecutionError`]: fatal for the whole operation (misconfigured
//!   resolvers, unknown fields, missing operation).
//!
//! Errors carried by the upstream event stream are [`EventStreamError`]s and
//! hook failures are [`InstrumentationError`]s.

use crate::path::ResultPath;
use crate::query::DocumentError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Error code for a non-null field that resolved to null.
pub const NON_NULL_VIOLATION: &str = "NON_NULL_VIOLATION";
/// Error code for a value that could not be serialized as its declared type.
pub const TYPE_MISMATCH: &str = "TYPE_MISMATCH";
/// Error code for a failed resolver.
pub const RESOLVER_ERROR: &str = "RESOLVER_ERROR";
/// Error code for an unexpected failure while executing an event.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// A field error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct FieldError {
    /// The error message.
    pub message: String,
    /// The path to the field.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<ResultPath>,
    /// Error extensions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extensions: Option<HashMap<String, serde_json::Value>>,
}

impl FieldError {
    /// Creates a new field error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            path: None,
            extensions: None,
        }
    }

    /// Adds a path to the error.
    pub fn with_path(mut self, path: ResultPath) -> Self {
        self.path = Some(path);
        self
    }

    /// Adds an extension.
    pub fn with_extension(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.extensions
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    /// Sets the error code extension.
    pub fn with_code(self, code: impl Into<String>) -> Self {
        self.with_extension("code", serde_json::Value::String(code.into()))
    }

    /// Returns the error code extension, if any.
    pub fn code(&self) -> Option<&str> {
        self.extensions
            .as_ref()
            .and_then(|ext| ext.get("code"))
            .and_then(|v| v.as_str())
    }

    /// Creates the error recorded when a non-null field resolves to null.
    pub fn non_null_violation(parent_type: &str, field_name: &str, path: ResultPath) -> Self {
        Self::new(format!(
            "Cannot return null for non-nullable field {}.{}",
            parent_type, field_name
        ))
        .with_path(path)
        .with_code(NON_NULL_VIOLATION)
    }
}

/// Failure of a single completion pass.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CompletionError {
    /// A non-null position resolved to null and no nullable ancestor
    /// absorbed it. The carried error has already been recorded in the
    /// execution context.
    #[error("{0}")]
    NonNullableFieldWasNull(FieldError),

    /// Anything the engine could not turn into a value.
    #[error("internal completion error at {path}: {message}")]
    Internal { path: ResultPath, message: String },
}

impl CompletionError {
    pub fn internal(path: ResultPath, message: impl Into<String>) -> Self {
        Self::Internal {
            path,
            message: message.into(),
        }
    }

    /// Converts the failure into the error entry reported for it.
    pub fn to_field_error(&self) -> FieldError {
        match self {
            Self::NonNullableFieldWasNull(error) => error.clone(),
            Self::Internal { path, message } => FieldError::new(message.clone())
                .with_path(path.clone())
                .with_code(INTERNAL_ERROR),
        }
    }
}

/// Fatal execution error.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExecutionError {
    /// The subscription resolver returned something other than an event
    /// stream.
    #[error("the resolver for subscription field `{field}` must return an event stream")]
    NotAnEventStream { field: String },

    #[error("the subscription operation has no top-level field")]
    EmptySelectionSet,

    #[error("unknown field `{field}` on type `{parent_type}`")]
    UnknownField { parent_type: String, field: String },

    #[error("type `{0}` is not an object type")]
    NotAnObjectType(String),

    #[error("the schema does not define a subscription type")]
    NoSubscriptionType,

    #[error("operation is a {0}, expected a subscription")]
    NotASubscription(String),

    #[error(transparent)]
    Document(#[from] DocumentError),

    #[error(transparent)]
    Completion(#[from] CompletionError),

    /// A per-event task ended without producing a result.
    #[error("event execution aborted: {0}")]
    EventAborted(String),
}

/// Error signalled by an upstream event stream. Terminates the produced
/// stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("event stream error: {message}")]
pub struct EventStreamError {
    pub message: String,
}

impl EventStreamError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Failure raised by an instrumentation hook.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("instrumentation `{instrumentation}` failed: {message}")]
pub struct InstrumentationError {
    pub instrumentation: String,
    pub message: String,
}

impl InstrumentationError {
    pub fn new(instrumentation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            instrumentation: instrumentation.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_error() {
        let error = FieldError::new("Something went wrong")
            .with_path(ResultPath::root().segment("user").segment("name"))
            .with_code("NOT_FOUND");

        assert_eq!(error.message, "Something went wrong");
        assert!(error.path.is_some());
        assert_eq!(error.code(), Some("NOT_FOUND"));
    }

    #[test]
    fn test_non_null_violation_message() {
        let error =
            FieldError::non_null_violation("Subscription", "count", ResultPath::root().segment("count"));
        assert_eq!(
            error.message,
            "Cannot return null for non-nullable field Subscription.count"
        );
        assert_eq!(error.code(), Some(NON_NULL_VIOLATION));

        let json = serde_json::to_value(&error).unwrap();
        assert_eq!(json["path"], serde_json::json!(["count"]));
    }

    #[test]
    fn test_internal_completion_error_to_field_error() {
        let error = CompletionError::internal(ResultPath::root().segment("a"), "boom");
        let field_error = error.to_field_error();
        assert_eq!(field_error.message, "boom");
        assert_eq!(field_error.code(), Some(INTERNAL_ERROR));
    }
}
