//! Execution results.

use crate::error::FieldError;
use crate::streaming::ResponseStream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

/// A GraphQL response: the data of one completion pass and its errors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Response data. `None` serializes as `null`.
    pub data: Option<Value>,

    /// Errors, if any.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<FieldError>,

    /// Extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<HashMap<String, Value>>,
}

impl Response {
    /// Creates a response with data.
    pub fn new(data: Value) -> Self {
        Self {
            data: Some(data),
            errors: Vec::new(),
            extensions: None,
        }
    }

    /// Creates a response that carries no data.
    pub fn null(errors: Vec<FieldError>) -> Self {
        Self {
            data: None,
            errors,
            extensions: None,
        }
    }

    /// Creates `{ key: value }` with the given errors.
    pub fn keyed(key: impl Into<String>, value: Value, errors: Vec<FieldError>) -> Self {
        let mut data = serde_json::Map::with_capacity(1);
        data.insert(key.into(), value);
        Self {
            data: Some(Value::Object(data)),
            errors,
            extensions: None,
        }
    }

    /// Adds an extension entry.
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extensions
            .get_or_insert_with(HashMap::new)
            .insert(key.into(), value);
        self
    }

    pub fn is_ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Serializes the response to a JSON value.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Result of starting a subscription.
///
/// `stream` is `None` when the subscription field resolved to null; `errors`
/// then holds whatever was recorded while resolving it.
pub struct SubscriptionResponse {
    pub stream: Option<ResponseStream>,
    pub errors: Vec<FieldError>,
}

impl SubscriptionResponse {
    pub fn stream(stream: ResponseStream) -> Self {
        Self {
            stream: Some(stream),
            errors: Vec::new(),
        }
    }

    pub fn null(errors: Vec<FieldError>) -> Self {
        Self {
            stream: None,
            errors,
        }
    }

    /// The response the subscriber receives instead of a stream.
    pub fn to_response(&self) -> Option<Response> {
        match self.stream {
            Some(_) => None,
            None => Some(Response::null(self.errors.clone())),
        }
    }

    pub fn into_stream(self) -> Option<ResponseStream> {
        self.stream
    }
}

impl fmt::Debug for SubscriptionResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionResponse")
            .field("stream", &self.stream.as_ref().map(|_| ".."))
            .field("errors", &self.errors)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::ResultPath;
    use serde_json::json;

    #[test]
    fn test_keyed_response_serialization() {
        let response = Response::keyed("count", json!(1), Vec::new());
        assert_eq!(response.to_json(), json!({"data": {"count": 1}}));
    }

    #[test]
    fn test_null_response_keeps_errors() {
        let error = FieldError::new("Cannot return null")
            .with_path(ResultPath::root().segment("count"));
        let response = Response::null(vec![error]);
        assert!(!response.is_ok());
        assert_eq!(
            response.to_json(),
            json!({"data": null, "errors": [{"message": "Cannot return null", "path": ["count"]}]})
        );
    }

    #[test]
    fn test_null_subscription_response() {
        let response = SubscriptionResponse::null(vec![FieldError::new("nope")]);
        let as_response = response.to_response().unwrap();
        assert_eq!(as_response.data, None);
        assert_eq!(as_response.errors.len(), 1);
        assert!(response.into_stream().is_none());
    }
}
