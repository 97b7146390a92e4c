//! Lifecycle hooks around subscription execution.
//!
//! Two units of work are observed:
//! - resolving the source event stream, through
//!   [`Instrumentation::begin_execution_strategy`],
//! - executing one event, through
//!   [`Instrumentation::begin_subscribed_field_event`].
//!
//! Each `begin_*` call returns a context whose `on_dispatched` fires when the
//! work starts and whose `on_completed` fires once it has settled, whatever
//! the outcome. Hook failures are logged and never change a result.

use crate::context::ExecutionContext;
use crate::error::{ExecutionError, InstrumentationError};
use crate::parameters::{ExecutionStepInfo, ExecutionStrategyParameters};
use crate::path::ResultPath;
use crate::response::{Response, SubscriptionResponse};
use crate::schema::Schema;
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Per-operation state an instrumentation creates once and gets back in
/// every hook.
pub type InstrumentationState = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Clone)]
pub struct InstrumentationCreateStateParameters {
    pub schema: Arc<Schema>,
    pub operation_name: Option<String>,
    pub variables: IndexMap<String, Value>,
}

#[derive(Debug, Clone, Copy)]
pub struct InstrumentationExecutionStrategyParameters<'a> {
    pub execution_context: &'a ExecutionContext,
    pub params: &'a ExecutionStrategyParameters,
}

#[derive(Debug, Clone, Copy)]
pub struct InstrumentationFieldParameters<'a> {
    pub execution_context: &'a ExecutionContext,
    pub step_info: &'a ExecutionStepInfo,
}

#[derive(Debug, Clone, Copy)]
pub struct InstrumentationExecutionParameters<'a> {
    pub execution_context: &'a ExecutionContext,
    pub path: &'a ResultPath,
}

/// What the subscription field resolved to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFieldKind {
    Stream,
    Null,
    /// A value that is not an event stream.
    Value,
}

/// Describes the resolved subscription field to
/// [`ExecutionStrategyInstrumentationContext::on_field_values_info`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFieldValue {
    pub path: ResultPath,
    pub response_key: String,
    pub kind: ResolvedFieldKind,
}

/// Callbacks around one unit of work producing a `T`.
pub trait InstrumentationContext<T>: Send {
    fn on_dispatched(&mut self) -> Result<(), InstrumentationError> {
        Ok(())
    }

    fn on_completed(&mut self, _result: Result<&T, &ExecutionError>) -> Result<(), InstrumentationError> {
        Ok(())
    }
}

/// Callbacks around resolving the source event stream.
pub trait ExecutionStrategyInstrumentationContext: InstrumentationContext<SubscriptionResponse> {
    fn on_field_values_info(&mut self, _values: &[ResolvedFieldValue]) -> Result<(), InstrumentationError> {
        Ok(())
    }
}

/// A context that observes nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInstrumentationContext;

impl<T> InstrumentationContext<T> for NoopInstrumentationContext {}

impl ExecutionStrategyInstrumentationContext for NoopInstrumentationContext {}

/// Observer of subscription execution. Every hook defaults to a no-op.
#[async_trait]
pub trait Instrumentation: Send + Sync {
    /// Name used when reporting hook failures.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn create_state(&self, _params: &InstrumentationCreateStateParameters) -> Option<InstrumentationState> {
        None
    }

    fn begin_execution_strategy(
        &self,
        _params: &InstrumentationExecutionStrategyParameters<'_>,
        _state: Option<&InstrumentationState>,
    ) -> Box<dyn ExecutionStrategyInstrumentationContext> {
        Box::new(NoopInstrumentationContext)
    }

    fn begin_subscribed_field_event(
        &self,
        _params: &InstrumentationFieldParameters<'_>,
        _state: Option<&InstrumentationState>,
    ) -> Box<dyn InstrumentationContext<Response>> {
        Box::new(NoopInstrumentationContext)
    }

    /// Transforms a per-event result before it is published.
    async fn instrument_execution_result(
        &self,
        result: Response,
        _params: &InstrumentationExecutionParameters<'_>,
        _state: Option<&InstrumentationState>,
    ) -> Result<Response, InstrumentationError> {
        Ok(result)
    }
}

/// Logs a failed hook.
pub(crate) fn report_hook_failure(hook: &'static str, result: Result<(), InstrumentationError>) {
    if let Err(error) = result {
        tracing::warn!(
            hook,
            instrumentation = %error.instrumentation,
            error = %error.message,
            "instrumentation hook failed"
        );
    }
}

/// Instrumentation that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopInstrumentation;

impl Instrumentation for NoopInstrumentation {}

/// Fans every hook out to several instrumentations, in order.
///
/// Each child gets its own state. Result transforms run left to right and
/// stop at the first failure.
#[derive(Clone, Default)]
pub struct ChainedInstrumentation {
    instrumentations: Vec<Arc<dyn Instrumentation>>,
}

struct ChainedState(Vec<Option<InstrumentationState>>);

impl ChainedInstrumentation {
    pub fn new(instrumentations: Vec<Arc<dyn Instrumentation>>) -> Self {
        Self { instrumentations }
    }

    pub fn with(mut self, instrumentation: impl Instrumentation + 'static) -> Self {
        self.instrumentations.push(Arc::new(instrumentation));
        self
    }

    pub fn len(&self) -> usize {
        self.instrumentations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instrumentations.is_empty()
    }

    fn child_state<'s>(state: Option<&'s InstrumentationState>, index: usize) -> Option<&'s InstrumentationState> {
        state
            .and_then(|state| state.downcast_ref::<ChainedState>())
            .and_then(|chained| chained.0.get(index))
            .and_then(Option::as_ref)
    }
}

impl fmt::Debug for ChainedInstrumentation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.instrumentations.iter().map(|i| i.name()))
            .finish()
    }
}

struct ChainedContext<C: ?Sized> {
    contexts: Vec<Box<C>>,
}

/// Runs `f` on every child and returns the first failure.
fn for_each_child<C: ?Sized>(
    contexts: &mut [Box<C>],
    mut f: impl FnMut(&mut C) -> Result<(), InstrumentationError>,
) -> Result<(), InstrumentationError> {
    let mut first_error = None;
    for context in contexts {
        if let Err(error) = f(context.as_mut()) {
            first_error.get_or_insert(error);
        }
    }
    first_error.map_or(Ok(()), Err)
}

impl InstrumentationContext<SubscriptionResponse>
    for ChainedContext<dyn ExecutionStrategyInstrumentationContext>
{
    fn on_dispatched(&mut self) -> Result<(), InstrumentationError> {
        for_each_child(&mut self.contexts, |c| c.on_dispatched())
    }

    fn on_completed(
        &mut self,
        result: Result<&SubscriptionResponse, &ExecutionError>,
    ) -> Result<(), InstrumentationError> {
        for_each_child(&mut self.contexts, |c| c.on_completed(result))
    }
}

impl ExecutionStrategyInstrumentationContext
    for ChainedContext<dyn ExecutionStrategyInstrumentationContext>
{
    fn on_field_values_info(&mut self, values: &[ResolvedFieldValue]) -> Result<(), InstrumentationError> {
        for_each_child(&mut self.contexts, |c| c.on_field_values_info(values))
    }
}

impl InstrumentationContext<Response> for ChainedContext<dyn InstrumentationContext<Response>> {
    fn on_dispatched(&mut self) -> Result<(), InstrumentationError> {
        for_each_child(&mut self.contexts, |c| c.on_dispatched())
    }

    fn on_completed(&mut self, result: Result<&Response, &ExecutionError>) -> Result<(), InstrumentationError> {
        for_each_child(&mut self.contexts, |c| c.on_completed(result))
    }
}

#[async_trait]
impl Instrumentation for ChainedInstrumentation {
    fn name(&self) -> &str {
        "chained"
    }

    fn create_state(&self, params: &InstrumentationCreateStateParameters) -> Option<InstrumentationState> {
        let states = self
            .instrumentations
            .iter()
            .map(|i| i.create_state(params))
            .collect();
        let state: InstrumentationState = Arc::new(ChainedState(states));
        Some(state)
    }

    fn begin_execution_strategy(
        &self,
        params: &InstrumentationExecutionStrategyParameters<'_>,
        state: Option<&InstrumentationState>,
    ) -> Box<dyn ExecutionStrategyInstrumentationContext> {
        let contexts = self
            .instrumentations
            .iter()
            .enumerate()
            .map(|(i, child)| child.begin_execution_strategy(params, Self::child_state(state, i)))
            .collect();
        Box::new(ChainedContext { contexts })
    }

    fn begin_subscribed_field_event(
        &self,
        params: &InstrumentationFieldParameters<'_>,
        state: Option<&InstrumentationState>,
    ) -> Box<dyn InstrumentationContext<Response>> {
        let contexts = self
            .instrumentations
            .iter()
            .enumerate()
            .map(|(i, child)| child.begin_subscribed_field_event(params, Self::child_state(state, i)))
            .collect();
        Box::new(ChainedContext { contexts })
    }

    async fn instrument_execution_result(
        &self,
        mut result: Response,
        params: &InstrumentationExecutionParameters<'_>,
        state: Option<&InstrumentationState>,
    ) -> Result<Response, InstrumentationError> {
        for (i, child) in self.instrumentations.iter().enumerate() {
            result = child
                .instrument_execution_result(result, params, Self::child_state(state, i))
                .await?;
        }
        Ok(result)
    }
}

/// Logs stream resolution and every event with its duration and outcome.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingInstrumentation;

struct StreamSpan {
    operation: Option<String>,
    started: Instant,
}

impl InstrumentationContext<SubscriptionResponse> for StreamSpan {
    fn on_dispatched(&mut self) -> Result<(), InstrumentationError> {
        self.started = Instant::now();
        tracing::debug!(operation = ?self.operation, "resolving subscription event stream");
        Ok(())
    }

    fn on_completed(
        &mut self,
        result: Result<&SubscriptionResponse, &ExecutionError>,
    ) -> Result<(), InstrumentationError> {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(response) => tracing::info!(
                operation = ?self.operation,
                elapsed_ms,
                has_stream = response.stream.is_some(),
                errors = response.errors.len(),
                "subscription event stream resolved"
            ),
            Err(error) => tracing::warn!(
                operation = ?self.operation,
                elapsed_ms,
                %error,
                "subscription failed"
            ),
        }
        Ok(())
    }
}

impl ExecutionStrategyInstrumentationContext for StreamSpan {
    fn on_field_values_info(&mut self, values: &[ResolvedFieldValue]) -> Result<(), InstrumentationError> {
        for value in values {
            tracing::debug!(path = %value.path, kind = ?value.kind, "subscription field resolved");
        }
        Ok(())
    }
}

struct EventSpan {
    path: ResultPath,
    started: Instant,
}

impl InstrumentationContext<Response> for EventSpan {
    fn on_dispatched(&mut self) -> Result<(), InstrumentationError> {
        self.started = Instant::now();
        Ok(())
    }

    fn on_completed(&mut self, result: Result<&Response, &ExecutionError>) -> Result<(), InstrumentationError> {
        let elapsed_ms = self.started.elapsed().as_secs_f64() * 1000.0;
        match result {
            Ok(response) => tracing::debug!(
                path = %self.path,
                elapsed_ms,
                errors = response.errors.len(),
                "subscription event executed"
            ),
            Err(error) => tracing::warn!(path = %self.path, elapsed_ms, %error, "subscription event failed"),
        }
        Ok(())
    }
}

impl Instrumentation for TracingInstrumentation {
    fn name(&self) -> &str {
        "tracing"
    }

    fn begin_execution_strategy(
        &self,
        params: &InstrumentationExecutionStrategyParameters<'_>,
        _state: Option<&InstrumentationState>,
    ) -> Box<dyn ExecutionStrategyInstrumentationContext> {
        Box::new(StreamSpan {
            operation: params.execution_context.operation().name.clone(),
            started: Instant::now(),
        })
    }

    fn begin_subscribed_field_event(
        &self,
        params: &InstrumentationFieldParameters<'_>,
        _state: Option<&InstrumentationState>,
    ) -> Box<dyn InstrumentationContext<Response>> {
        Box::new(EventSpan {
            path: params.step_info.path.clone(),
            started: Instant::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::MergedField;
    use crate::query::{Field, OperationDefinition};
    use crate::schema::{FieldDef, ObjectDef, SchemaBuilder, TypeRef};
    use serde_json::json;
    use std::sync::Mutex;

    type Log = Arc<Mutex<Vec<String>>>;

    struct Recording {
        label: &'static str,
        log: Log,
    }

    struct RecordingContext {
        label: &'static str,
        log: Log,
    }

    impl InstrumentationContext<Response> for RecordingContext {
        fn on_dispatched(&mut self) -> Result<(), InstrumentationError> {
            self.log.lock().unwrap().push(format!("{}:dispatched", self.label));
            Ok(())
        }

        fn on_completed(&mut self, _result: Result<&Response, &ExecutionError>) -> Result<(), InstrumentationError> {
            self.log.lock().unwrap().push(format!("{}:completed", self.label));
            Err(InstrumentationError::new(self.label, "completed hook fails"))
        }
    }

    #[async_trait]
    impl Instrumentation for Recording {
        fn create_state(&self, _params: &InstrumentationCreateStateParameters) -> Option<InstrumentationState> {
            let state: InstrumentationState = Arc::new(self.label.to_string());
            Some(state)
        }

        fn begin_subscribed_field_event(
            &self,
            _params: &InstrumentationFieldParameters<'_>,
            state: Option<&InstrumentationState>,
        ) -> Box<dyn InstrumentationContext<Response>> {
            let state = state.and_then(|s| s.downcast_ref::<String>()).cloned();
            self.log
                .lock()
                .unwrap()
                .push(format!("{}:begin:{}", self.label, state.unwrap_or_default()));
            Box::new(RecordingContext {
                label: self.label,
                log: Arc::clone(&self.log),
            })
        }

        async fn instrument_execution_result(
            &self,
            result: Response,
            _params: &InstrumentationExecutionParameters<'_>,
            _state: Option<&InstrumentationState>,
        ) -> Result<Response, InstrumentationError> {
            let mut data = result.data.clone().unwrap_or(Value::Null);
            if let Some(trail) = data.get_mut("trail").and_then(Value::as_array_mut) {
                trail.push(json!(self.label));
            }
            Ok(Response { data: Some(data), ..result })
        }
    }

    fn context() -> ExecutionContext {
        let schema = Arc::new(
            SchemaBuilder::new()
                .subscription_type("Subscription")
                .object(ObjectDef::new("Subscription").field(FieldDef::new("count", TypeRef::named("Int"))))
                .build(),
        );
        ExecutionContext::builder(schema, OperationDefinition::subscription()).build()
    }

    fn step_info(ctx: &ExecutionContext) -> ExecutionStepInfo {
        ExecutionStepInfo::for_field(
            ctx.schema(),
            "Subscription",
            &MergedField::new(Field::new("count")),
            ResultPath::root().segment("count"),
            ctx.variables(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_chained_instrumentation_fans_out_in_order() {
        let log: Log = Arc::default();
        let chained = ChainedInstrumentation::default()
            .with(Recording { label: "a", log: Arc::clone(&log) })
            .with(Recording { label: "b", log: Arc::clone(&log) });

        let ctx = context();
        let state = chained.create_state(&InstrumentationCreateStateParameters {
            schema: Arc::new(ctx.schema().clone()),
            operation_name: None,
            variables: IndexMap::new(),
        });
        let info = step_info(&ctx);
        let params = InstrumentationFieldParameters {
            execution_context: &ctx,
            step_info: &info,
        };

        let mut hooks = chained.begin_subscribed_field_event(&params, state.as_ref());
        assert!(hooks.on_dispatched().is_ok());
        let response = Response::keyed("count", json!(1), Vec::new());
        let failure = hooks.on_completed(Ok(&response)).unwrap_err();
        assert_eq!(failure.instrumentation, "a");

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "a:begin:a",
                "b:begin:b",
                "a:dispatched",
                "b:dispatched",
                "a:completed",
                "b:completed",
            ]
        );
    }

    #[tokio::test]
    async fn test_chained_result_transforms_run_left_to_right() {
        let log: Log = Arc::default();
        let chained = ChainedInstrumentation::default()
            .with(Recording { label: "first", log: Arc::clone(&log) })
            .with(NoopInstrumentation)
            .with(Recording { label: "second", log });
        assert_eq!(chained.len(), 3);

        let ctx = context();
        let path = ResultPath::root().segment("count");
        let params = InstrumentationExecutionParameters {
            execution_context: &ctx,
            path: &path,
        };
        let result = chained
            .instrument_execution_result(Response::new(json!({"trail": []})), &params, None)
            .await
            .unwrap();
        assert_eq!(result.data, Some(json!({"trail": ["first", "second"]})));
    }

    #[tokio::test]
    async fn test_tracing_instrumentation_contexts() {
        let ctx = context();
        let info = step_info(&ctx);
        let mut event = TracingInstrumentation.begin_subscribed_field_event(
            &InstrumentationFieldParameters {
                execution_context: &ctx,
                step_info: &info,
            },
            None,
        );
        assert!(event.on_dispatched().is_ok());
        assert!(event.on_completed(Err(&ExecutionError::EmptySelectionSet)).is_ok());

        let params = ExecutionStrategyParameters::for_operation(&ctx).unwrap();
        let mut stream = TracingInstrumentation.begin_execution_strategy(
            &InstrumentationExecutionStrategyParameters {
                execution_context: &ctx,
                params: &params,
            },
            None,
        );
        assert!(stream.on_dispatched().is_ok());
        assert!(stream
            .on_field_values_info(&[ResolvedFieldValue {
                path: ResultPath::root().segment("count"),
                response_key: "count".to_string(),
                kind: ResolvedFieldKind::Null,
            }])
            .is_ok());
        assert!(stream
            .on_completed(Ok(&SubscriptionResponse::null(Vec::new())))
            .is_ok());
    }
}
