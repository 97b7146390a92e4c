//! Typed errors for the subscription SDK.

use serde::{Deserialize, Serialize};
use sluice_runtime::{DocumentError, ExecutionError};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Typed error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[non_exhaustive]
pub enum ErrorCode {
    // Document errors
    NoOperation,
    UnknownOperation,
    ValidationError,
    NotASubscription,

    // Schema errors
    SchemaError,
    NoSchema,
    FieldNotFound,

    // Execution errors
    NotAnEventStream,
    ExecutionError,

    // Serialization errors
    SerializeError,
    DeserializeError,

    ConfigError,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NoOperation => "NO_OPERATION",
            Self::UnknownOperation => "UNKNOWN_OPERATION",
            Self::ValidationError => "VALIDATION_ERROR",
            Self::NotASubscription => "NOT_A_SUBSCRIPTION",
            Self::SchemaError => "SCHEMA_ERROR",
            Self::NoSchema => "NO_SCHEMA",
            Self::FieldNotFound => "FIELD_NOT_FOUND",
            Self::NotAnEventStream => "NOT_AN_EVENT_STREAM",
            Self::ExecutionError => "EXECUTION_ERROR",
            Self::SerializeError => "SERIALIZE_ERROR",
            Self::DeserializeError => "DESERIALIZE_ERROR",
            Self::ConfigError => "CONFIG_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }

    /// Returns true if the request itself was at fault.
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NoOperation
                | Self::UnknownOperation
                | Self::ValidationError
                | Self::NotASubscription
                | Self::FieldNotFound
        )
    }

    /// Returns true if the service setup or a resolver was at fault.
    pub const fn is_server_error(&self) -> bool {
        matches!(
            self,
            Self::SchemaError
                | Self::NoSchema
                | Self::NotAnEventStream
                | Self::ExecutionError
                | Self::ConfigError
                | Self::InternalError
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Strongly typed SDK error.
#[derive(Error, Debug, Clone)]
#[error("[{code}] {message}")]
pub struct SdkError {
    pub code: ErrorCode,
    pub message: String,
    pub extensions: Option<HashMap<String, serde_json::Value>>,
}

impl SdkError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            extensions: None,
        }
    }

    /// Adds extension data.
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        let extensions = self.extensions.get_or_insert_with(HashMap::new);
        if let Ok(v) = serde_json::to_value(value) {
            extensions.insert(key.into(), v);
        }
        self
    }

    pub fn extension(&self, key: &str) -> Option<&serde_json::Value> {
        self.extensions.as_ref().and_then(|ext| ext.get(key))
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    pub fn schema(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SchemaError, message)
    }

    pub fn serialize(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializeError, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn is_client_error(&self) -> bool {
        self.code.is_client_error()
    }

    pub fn is_server_error(&self) -> bool {
        self.code.is_server_error()
    }
}

impl Serialize for SdkError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;

        let mut state = serializer.serialize_struct("SdkError", 3)?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        if let Some(ref ext) = self.extensions {
            state.serialize_field("extensions", ext)?;
        }
        state.end()
    }
}

impl From<DocumentError> for SdkError {
    fn from(error: DocumentError) -> Self {
        let message = error.to_string();
        match error {
            DocumentError::NoOperation | DocumentError::AmbiguousOperation => {
                Self::new(ErrorCode::NoOperation, message)
            }
            DocumentError::UnknownOperation(name) => {
                Self::new(ErrorCode::UnknownOperation, message).with_extension("operation", name)
            }
            DocumentError::MissingVariable { name, ty } => {
                Self::new(ErrorCode::ValidationError, message)
                    .with_extension("variable", name)
                    .with_extension("type", ty)
            }
        }
    }
}

impl From<ExecutionError> for SdkError {
    fn from(error: ExecutionError) -> Self {
        let message = error.to_string();
        match error {
            ExecutionError::Document(document) => document.into(),
            ExecutionError::NotAnEventStream { field } => {
                Self::new(ErrorCode::NotAnEventStream, message).with_extension("field", field)
            }
            ExecutionError::EmptySelectionSet => Self::new(ErrorCode::ValidationError, message),
            ExecutionError::UnknownField { parent_type, field } => {
                Self::new(ErrorCode::FieldNotFound, message)
                    .with_extension("parentType", parent_type)
                    .with_extension("field", field)
            }
            ExecutionError::NotAnObjectType(_) | ExecutionError::NoSubscriptionType => {
                Self::new(ErrorCode::SchemaError, message)
            }
            ExecutionError::NotASubscription(kind) => {
                Self::new(ErrorCode::NotASubscription, message).with_extension("operation", kind)
            }
            ExecutionError::Completion(_) => Self::new(ErrorCode::ExecutionError, message),
            ExecutionError::EventAborted(_) => Self::new(ErrorCode::InternalError, message),
        }
    }
}

/// Type alias for SDK results.
pub type SdkResult<T> = std::result::Result<T, SdkError>;

/// Result extension for mapping foreign errors to an [`SdkError`].
pub trait ResultExt<T> {
    /// Maps the error to an SdkError with the given code.
    fn map_sdk_err(self, code: ErrorCode) -> SdkResult<T>;

    /// Maps the error to an SdkError with the given code and message, keeping
    /// the original error text as an extension.
    fn map_sdk_err_with(self, code: ErrorCode, message: impl Into<String>) -> SdkResult<T>;
}

impl<T, E: std::error::Error> ResultExt<T> for std::result::Result<T, E> {
    fn map_sdk_err(self, code: ErrorCode) -> SdkResult<T> {
        self.map_err(|e| SdkError::new(code, e.to_string()))
    }

    fn map_sdk_err_with(self, code: ErrorCode, message: impl Into<String>) -> SdkResult<T> {
        self.map_err(|e| {
            SdkError::new(code, message).with_extension("original_error", e.to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_properties() {
        assert!(ErrorCode::NotASubscription.is_client_error());
        assert!(!ErrorCode::NotAnEventStream.is_client_error());

        assert!(ErrorCode::NotAnEventStream.is_server_error());
        assert!(!ErrorCode::UnknownOperation.is_server_error());
    }

    #[test]
    fn test_from_execution_error_keeps_field() {
        let err = SdkError::from(ExecutionError::NotAnEventStream {
            field: "count".to_string(),
        });

        assert_eq!(err.code, ErrorCode::NotAnEventStream);
        assert_eq!(err.extension("field"), Some(&serde_json::json!("count")));
        assert!(err.message.contains("count"));
    }

    #[test]
    fn test_nested_document_error_is_unwrapped() {
        let err = SdkError::from(ExecutionError::Document(DocumentError::MissingVariable {
            name: "topic".to_string(),
            ty: "String!".to_string(),
        }));

        assert_eq!(err.code, ErrorCode::ValidationError);
        assert_eq!(err.extension("variable"), Some(&serde_json::json!("topic")));
    }

    #[test]
    fn test_error_serialization() {
        let err = SdkError::config("bad bound").with_extension("key", "max_in_flight_events");
        let json = serde_json::to_value(&err).unwrap();

        assert_eq!(json["code"], "CONFIG_ERROR");
        assert_eq!(json["message"], "bad bound");
        assert_eq!(json["extensions"]["key"], "max_in_flight_events");
    }

    #[test]
    fn test_result_ext() {
        let result: Result<serde_json::Value, serde_json::Error> = serde_json::from_str("{");

        let sdk_result = result.map_sdk_err_with(ErrorCode::ConfigError, "invalid config");
        let err = sdk_result.unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigError);
        assert!(err.extension("original_error").is_some());
    }
}
