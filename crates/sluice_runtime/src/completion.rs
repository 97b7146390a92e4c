//! The field completion contract.
//!
//! The subscription strategy never resolves or serializes values itself. It
//! asks a [`FieldCompletion`] to fetch the subscription field once, and to
//! complete that field for every event.

use crate::context::ExecutionContext;
use crate::error::CompletionError;
use crate::parameters::ExecutionStrategyParameters;
use crate::streaming::EventStream;
use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;
use std::fmt;

/// A raw field value, before completion.
pub enum FetchedValue {
    Value(Value),
    Stream(EventStream),
}

impl FetchedValue {
    /// Wraps an event payload as the pre-fetched value of a completion pass.
    pub fn from_event(event: Value) -> Self {
        Self::Value(event)
    }

    pub fn null() -> Self {
        Self::Value(Value::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Value(Value::Null))
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl fmt::Debug for FetchedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Shape of a completed value, known before the value itself is ready.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompleteValueType {
    Null,
    Scalar,
    Enum,
    List,
    Object,
}

/// A field whose completion has been started.
pub struct FieldValueInfo {
    pub complete_value_type: CompleteValueType,
    pub field_value: BoxFuture<'static, Result<Value, CompletionError>>,
}

impl FieldValueInfo {
    pub fn new(
        complete_value_type: CompleteValueType,
        field_value: BoxFuture<'static, Result<Value, CompletionError>>,
    ) -> Self {
        Self {
            complete_value_type,
            field_value,
        }
    }

    /// A completion that is already settled.
    pub fn ready(complete_value_type: CompleteValueType, value: Result<Value, CompletionError>) -> Self {
        Self::new(complete_value_type, Box::pin(futures::future::ready(value)))
    }

    /// Waits for the completed value.
    pub async fn value(self) -> Result<Value, CompletionError> {
        self.field_value.await
    }
}

impl fmt::Debug for FieldValueInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldValueInfo")
            .field("complete_value_type", &self.complete_value_type)
            .finish_non_exhaustive()
    }
}

/// Resolves and completes single fields.
///
/// `params` is narrowed to the field: `params.field` is set and
/// `params.path` ends with its response key. `params.source` is the parent
/// value.
#[async_trait]
pub trait FieldCompletion: Send + Sync {
    /// Resolves the raw value of the field. Resolver failures are recorded
    /// in `ctx` and yield null.
    async fn fetch_field(
        &self,
        ctx: &ExecutionContext,
        params: &ExecutionStrategyParameters,
    ) -> FetchedValue;

    /// Starts completing `fetched` against the field's type and selection
    /// set. Errors are recorded in `ctx`.
    fn complete_field(
        &self,
        ctx: &ExecutionContext,
        params: &ExecutionStrategyParameters,
        fetched: FetchedValue,
    ) -> FieldValueInfo;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fetched_value_from_event() {
        assert!(FetchedValue::from_event(Value::Null).is_null());
        assert!(!FetchedValue::from_event(json!(1)).is_null());
        let stream: EventStream = Box::pin(futures::stream::empty());
        assert!(FetchedValue::Stream(stream).is_stream());
    }

    #[tokio::test]
    async fn test_ready_field_value() {
        let info = FieldValueInfo::ready(CompleteValueType::Scalar, Ok(json!(3)));
        assert_eq!(info.complete_value_type, CompleteValueType::Scalar);
        assert_eq!(info.value().await.unwrap(), json!(3));
    }
}
