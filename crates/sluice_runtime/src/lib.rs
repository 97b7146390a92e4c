//! Subscription execution runtime for GraphQL.
//!
//! This crate provides:
//! - `subscription`: the subscription execution strategy
//! - `streaming`: event streams and the ordered map combinator
//! - `instrumentation`: lifecycle hooks around stream resolution and events
//! - `completion`: the field completion contract
//! - `executor`: the reference completion engine
//! - `context` / `parameters`: execution state threaded through both phases
//! - `query` / `schema` / `collector`: documents, type system and field
//!   collection
//! - `resolver` / `error_handler`: value and stream resolvers

pub mod collector;
pub mod completion;
pub mod context;
pub mod error;
pub mod error_handler;
pub mod executor;
pub mod instrumentation;
pub mod parameters;
pub mod path;
pub mod query;
pub mod resolver;
pub mod response;
pub mod schema;
pub mod streaming;
pub mod subscription;

pub use collector::{FieldCollector, MergedField, MergedSelectionSet};
pub use completion::{CompleteValueType, FetchedValue, FieldCompletion, FieldValueInfo};
pub use context::{Context, ExecutionContext, ExecutionContextBuilder, ExecutionInput};
pub use error::{
    CompletionError, EventStreamError, ExecutionError, FieldError, InstrumentationError,
};
pub use error_handler::{ResolverErrorHandler, ResolverErrorParams, SimpleResolverErrorHandler};
pub use executor::{Executor, ExecutorConfig};
pub use instrumentation::{
    ChainedInstrumentation, ExecutionStrategyInstrumentationContext, Instrumentation,
    InstrumentationContext, InstrumentationCreateStateParameters,
    InstrumentationExecutionParameters, InstrumentationExecutionStrategyParameters,
    InstrumentationFieldParameters, InstrumentationState, NoopInstrumentation,
    NoopInstrumentationContext, ResolvedFieldKind, ResolvedFieldValue, TracingInstrumentation,
};
pub use parameters::{ExecutionStepInfo, ExecutionStrategyParameters};
pub use path::{PathSegment, ResultPath};
pub use query::{
    Directive, Document, DocumentError, Field, FragmentDefinition, FragmentSpread,
    InlineFragment, InputValue, OperationDefinition, OperationKind, Selection,
    VariableDefinition,
};
pub use resolver::{
    AsyncFnResolver, AsyncStreamResolver, DefaultResolver, FnResolver, Resolved, Resolver,
    ResolverArgs, ResolverError, ResolverInfo, ResolverMap, StreamResolver,
};
pub use response::{Response, SubscriptionResponse};
pub use schema::{
    EnumDef, FieldDef, InputValueDef, InterfaceDef, ObjectDef, ScalarDef, Schema, SchemaBuilder,
    TypeDef, TypeRef, UnionDef,
};
pub use streaming::{map_ordered, EventStream, OrderedMap, ResponseStream};
pub use subscription::{SubscriptionConfig, SubscriptionExecutionStrategy};
