//! Resolver system.
//!
//! Two kinds of resolvers live in a [`ResolverMap`]:
//! - value resolvers ([`Resolver`]) produce a field's value,
//! - stream resolvers ([`StreamResolver`]) produce the event stream behind a
//!   subscription field.

use crate::context::Context;
use crate::error::{FieldError, RESOLVER_ERROR};
use crate::path::ResultPath;
use crate::streaming::EventStream;
use rustc_hash::FxHashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;

/// Arguments passed to a resolver.
#[derive(Debug, Clone, Default)]
pub struct ResolverArgs {
    args: HashMap<String, Value>,
}

impl ResolverArgs {
    /// Creates new resolver args.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates resolver args from a list of (name, value) pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            args: pairs.into_iter().collect(),
        }
    }

    /// Gets an argument by name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.args.get(name)
    }

    /// Gets an argument as a specific type.
    pub fn get_as<T: serde::de::DeserializeOwned>(&self, name: &str) -> Option<T> {
        self.args
            .get(name)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets a required argument, returning an error if not found.
    pub fn require<T: serde::de::DeserializeOwned>(&self, name: &str) -> Result<T, ResolverError> {
        self.args
            .get(name)
            .ok_or_else(|| ResolverError::MissingArgument(name.to_string()))
            .and_then(|v| {
                serde_json::from_value(v.clone())
                    .map_err(|e| ResolverError::ArgumentParseError(name.to_string(), e.to_string()))
            })
    }

    /// Returns all arguments.
    pub fn all(&self) -> &HashMap<String, Value> {
        &self.args
    }

    /// Returns true if empty.
    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    /// Sets an argument.
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.args.insert(name.into(), value);
    }
}

/// Info about the field being resolved.
#[derive(Debug, Clone)]
pub struct ResolverInfo {
    /// The field name being resolved.
    pub field_name: String,

    /// The return type, in SDL notation.
    pub return_type: String,

    /// The parent type name.
    pub parent_type: String,

    /// Path to this field.
    pub path: ResultPath,
}

impl ResolverInfo {
    /// Creates new resolver info.
    pub fn new(field_name: impl Into<String>, parent_type: impl Into<String>) -> Self {
        Self {
            field_name: field_name.into(),
            return_type: String::new(),
            parent_type: parent_type.into(),
            path: ResultPath::root(),
        }
    }

    /// Sets the return type.
    pub fn with_return_type(mut self, ty: impl Into<String>) -> Self {
        self.return_type = ty.into();
        self
    }

    /// Sets the path.
    pub fn with_path(mut self, path: ResultPath) -> Self {
        self.path = path;
        self
    }
}

/// Result type for resolvers.
pub type ResolverResult = Result<Value, ResolverError>;

/// Future type for async resolvers.
pub type ResolverFuture<'a> = Pin<Box<dyn Future<Output = ResolverResult> + Send + 'a>>;

/// Result type for stream resolvers. `Ok(None)` means the field resolved to
/// null.
pub type StreamResolverResult = Result<Option<EventStream>, ResolverError>;

/// Future type for stream resolvers.
pub type StreamResolverFuture<'a> = Pin<Box<dyn Future<Output = StreamResolverResult> + Send + 'a>>;

/// Error from a resolver.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResolverError {
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Failed to parse argument '{0}': {1}")]
    ArgumentParseError(String, String),

    #[error("{0}")]
    Custom(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ResolverError {
    /// The `extensions.code` reported for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::FieldNotFound(_) => "FIELD_NOT_FOUND",
            Self::MissingArgument(_) | Self::ArgumentParseError(..) => "BAD_ARGUMENT",
            Self::Custom(_) => RESOLVER_ERROR,
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl From<ResolverError> for FieldError {
    fn from(error: ResolverError) -> Self {
        let code = error.code();
        FieldError::new(error.to_string()).with_code(code)
    }
}

/// Trait for field resolvers.
pub trait Resolver: Send + Sync {
    /// Resolves a field value.
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a>;
}

/// A boxed resolver.
pub type BoxedResolver = Box<dyn Resolver>;

/// A sync resolver function.
pub type SyncResolverFn =
    Arc<dyn Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult + Send + Sync>;

/// A wrapper for sync resolver functions.
pub struct FnResolver {
    func: SyncResolverFn,
}

impl FnResolver {
    /// Creates a new function resolver.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        Self { func: Arc::new(f) }
    }
}

impl Resolver for FnResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let result = (self.func)(parent, args, ctx, info);
        Box::pin(async move { result })
    }
}

/// An async resolver function type.
pub type AsyncResolverFn = Arc<
    dyn Fn(Value, ResolverArgs, Context, ResolverInfo) -> ResolverFuture<'static> + Send + Sync,
>;

/// A wrapper for async resolver functions.
pub struct AsyncFnResolver {
    func: AsyncResolverFn,
}

impl AsyncFnResolver {
    /// Creates a new async function resolver.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        Self {
            func: Arc::new(move |parent, args, ctx, info| Box::pin(f(parent, args, ctx, info))),
        }
    }
}

impl Resolver for AsyncFnResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let parent = parent.clone();
        let args = args.clone();
        let ctx = ctx.clone();
        let info = info.clone();
        let func = Arc::clone(&self.func);
        Box::pin(async move { func(parent, args, ctx, info).await })
    }
}

/// Default resolver that accesses properties from the parent object.
pub struct DefaultResolver;

impl Resolver for DefaultResolver {
    fn resolve<'a>(
        &'a self,
        parent: &'a Value,
        _args: &'a ResolverArgs,
        _ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> ResolverFuture<'a> {
        let field_name = &info.field_name;
        let result = match parent {
            Value::Object(map) => {
                if let Some(value) = map.get(field_name) {
                    Ok(value.clone())
                } else {
                    // Try snake_case version
                    let snake_case = to_snake_case(field_name);
                    Ok(map.get(&snake_case).cloned().unwrap_or(Value::Null))
                }
            }
            Value::Null => Ok(Value::Null),
            _ => Err(ResolverError::FieldNotFound(field_name.clone())),
        };
        Box::pin(async move { result })
    }
}

/// Converts camelCase to snake_case.
fn to_snake_case(s: &str) -> String {
    let mut result = String::with_capacity(s.len() + 4);
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                result.push('_');
            }
            result.extend(c.to_lowercase());
        } else {
            result.push(c);
        }
    }
    result
}

/// Trait for subscription field resolvers.
pub trait StreamResolver: Send + Sync {
    /// Opens the event stream behind a subscription field.
    fn subscribe<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> StreamResolverFuture<'a>;
}

/// A boxed stream resolver.
pub type BoxedStreamResolver = Box<dyn StreamResolver>;

/// An async stream resolver function type.
pub type AsyncStreamResolverFn = Arc<
    dyn Fn(Value, ResolverArgs, Context, ResolverInfo) -> StreamResolverFuture<'static>
        + Send
        + Sync,
>;

/// A wrapper for async functions returning event streams.
pub struct AsyncStreamResolver {
    func: AsyncStreamResolverFn,
}

impl AsyncStreamResolver {
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StreamResolverResult> + Send + 'static,
    {
        Self {
            func: Arc::new(move |parent, args, ctx, info| Box::pin(f(parent, args, ctx, info))),
        }
    }
}

impl StreamResolver for AsyncStreamResolver {
    fn subscribe<'a>(
        &'a self,
        parent: &'a Value,
        args: &'a ResolverArgs,
        ctx: &'a Context,
        info: &'a ResolverInfo,
    ) -> StreamResolverFuture<'a> {
        let parent = parent.clone();
        let args = args.clone();
        let ctx = ctx.clone();
        let info = info.clone();
        let func = Arc::clone(&self.func);
        Box::pin(async move { func(parent, args, ctx, info).await })
    }
}

/// What a resolver produced for a field.
pub enum Resolved {
    Value(Value),
    Stream(EventStream),
}

impl Debug for Resolved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(value) => f.debug_tuple("Value").field(value).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Storage for resolvers organized by type and field.
pub struct ResolverMap {
    /// Resolvers indexed by "TypeName.fieldName".
    resolvers: FxHashMap<String, BoxedResolver>,

    /// Stream resolvers indexed by "TypeName.fieldName".
    streams: FxHashMap<String, BoxedStreamResolver>,

    /// Default resolver for unregistered fields.
    default_resolver: Option<BoxedResolver>,
}

impl Default for ResolverMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ResolverMap {
    /// Creates a new resolver map.
    pub fn new() -> Self {
        Self {
            resolvers: FxHashMap::default(),
            streams: FxHashMap::default(),
            default_resolver: Some(Box::new(DefaultResolver)),
        }
    }

    /// Registers a resolver for a specific type and field.
    pub fn register<R: Resolver + 'static>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: R,
    ) {
        let key = format!("{}.{}", type_name.into(), field_name.into());
        self.resolvers.insert(key, Box::new(resolver));
    }

    /// Registers a sync function as a resolver.
    pub fn register_fn<F>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(&Value, &ResolverArgs, &Context, &ResolverInfo) -> ResolverResult
            + Send
            + Sync
            + 'static,
    {
        self.register(type_name, field_name, FnResolver::new(f));
    }

    /// Registers an async function as a resolver.
    pub fn register_async<F, Fut>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ResolverResult> + Send + 'static,
    {
        self.register(type_name, field_name, AsyncFnResolver::new(f));
    }

    /// Registers a stream resolver for a subscription field.
    pub fn register_stream_resolver<R: StreamResolver + 'static>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        resolver: R,
    ) {
        let key = format!("{}.{}", type_name.into(), field_name.into());
        self.streams.insert(key, Box::new(resolver));
    }

    /// Registers an async function returning an event stream.
    pub fn register_stream<F, Fut>(
        &mut self,
        type_name: impl Into<String>,
        field_name: impl Into<String>,
        f: F,
    ) where
        F: Fn(Value, ResolverArgs, Context, ResolverInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = StreamResolverResult> + Send + 'static,
    {
        self.register_stream_resolver(type_name, field_name, AsyncStreamResolver::new(f));
    }

    /// Gets a resolver for a type and field.
    pub fn get(&self, type_name: &str, field_name: &str) -> Option<&dyn Resolver> {
        let key = format!("{}.{}", type_name, field_name);
        self.resolvers
            .get(&key)
            .map(|r| r.as_ref())
            .or(self.default_resolver.as_ref().map(|r| r.as_ref()))
    }

    /// Gets a stream resolver for a type and field.
    pub fn get_stream(&self, type_name: &str, field_name: &str) -> Option<&dyn StreamResolver> {
        let key = format!("{}.{}", type_name, field_name);
        self.streams.get(&key).map(|r| r.as_ref())
    }

    /// Resolves a field, preferring a registered stream resolver.
    pub async fn resolve(
        &self,
        parent: &Value,
        args: &ResolverArgs,
        ctx: &Context,
        info: &ResolverInfo,
    ) -> Result<Resolved, ResolverError> {
        if let Some(stream_resolver) = self.get_stream(&info.parent_type, &info.field_name) {
            return match stream_resolver.subscribe(parent, args, ctx, info).await? {
                Some(stream) => Ok(Resolved::Stream(stream)),
                None => Ok(Resolved::Value(Value::Null)),
            };
        }
        match self.get(&info.parent_type, &info.field_name) {
            Some(resolver) => resolver.resolve(parent, args, ctx, info).await.map(Resolved::Value),
            None => Err(ResolverError::FieldNotFound(format!(
                "{}.{}",
                info.parent_type, info.field_name
            ))),
        }
    }

    /// Sets the default resolver.
    pub fn set_default<R: Resolver + 'static>(&mut self, resolver: R) {
        self.default_resolver = Some(Box::new(resolver));
    }

    /// Removes the default resolver.
    pub fn remove_default(&mut self) {
        self.default_resolver = None;
    }
}

impl Debug for ResolverMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverMap")
            .field("resolver_count", &self.resolvers.len())
            .field("stream_resolver_count", &self.streams.len())
            .field("has_default", &self.default_resolver.is_some())
            .finish()
    }
}
