//! Subscription execution.
//!
//! The subscription field is resolved once into a source [`EventStream`].
//! Each event of that stream is then executed like a fresh query rooted at
//! the event, producing one [`Response`] per event, in event order.

use crate::completion::{FetchedValue, FieldCompletion};
use crate::context::ExecutionContext;
use crate::error::{CompletionError, ExecutionError, FieldError, INTERNAL_ERROR};
use crate::instrumentation::{
    report_hook_failure, ExecutionStrategyInstrumentationContext,
    InstrumentationExecutionParameters, InstrumentationExecutionStrategyParameters,
    InstrumentationFieldParameters, ResolvedFieldKind, ResolvedFieldValue,
};
use crate::parameters::{ExecutionStepInfo, ExecutionStrategyParameters};
use crate::path::ResultPath;
use crate::response::{Response, SubscriptionResponse};
use crate::streaming::{map_ordered, EventStream, ResponseStream};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

/// Subscription execution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionConfig {
    /// How many events may execute at once. Results are still published in
    /// event order. `1` executes events strictly one after another.
    pub max_in_flight_events: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            max_in_flight_events: 8,
        }
    }
}

impl SubscriptionConfig {
    pub fn max_in_flight_events(mut self, max: usize) -> Self {
        self.max_in_flight_events = max.max(1);
        self
    }

    /// Strictly serial event execution.
    pub fn serial() -> Self {
        Self::default().max_in_flight_events(1)
    }
}

/// Executes subscription operations on top of a [`FieldCompletion`].
#[derive(Clone)]
pub struct SubscriptionExecutionStrategy {
    completion: Arc<dyn FieldCompletion>,
    config: SubscriptionConfig,
}

impl fmt::Debug for SubscriptionExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionExecutionStrategy")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SubscriptionExecutionStrategy {
    pub fn new(completion: Arc<dyn FieldCompletion>) -> Self {
        Self {
            completion,
            config: SubscriptionConfig::default(),
        }
    }

    pub fn with_config(mut self, config: SubscriptionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    /// Resolves the source event stream and maps it to a stream of
    /// per-event responses.
    ///
    /// A subscription field resolving to null gives a response without a
    /// stream, carrying the errors recorded while resolving it. Errors
    /// returned here are fatal for the whole operation.
    ///
    /// Every event executes on its own Tokio task: the returned
    /// [`ResponseStream`] must be polled from within a Tokio runtime, and
    /// polling it elsewhere panics.
    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        params: &ExecutionStrategyParameters,
    ) -> Result<SubscriptionResponse, ExecutionError> {
        let instrumentation = Arc::clone(ctx.instrumentation());
        let mut hooks = instrumentation.begin_execution_strategy(
            &InstrumentationExecutionStrategyParameters {
                execution_context: ctx,
                params,
            },
            ctx.instrumentation_state(),
        );
        report_hook_failure("on_dispatched", hooks.on_dispatched());

        let result = match self
            .create_source_event_stream(ctx, params, hooks.as_mut())
            .await
        {
            Ok(Some(stream)) => Ok(SubscriptionResponse::stream(
                self.map_source_to_response(ctx, params, stream),
            )),
            Ok(None) => Ok(SubscriptionResponse::null(ctx.errors().await)),
            Err(error) => Err(error),
        };

        report_hook_failure("on_completed", hooks.on_completed(result.as_ref()));
        result
    }

    /// Resolves the first top-level field once and checks that it produced
    /// an event stream.
    async fn create_source_event_stream(
        &self,
        ctx: &ExecutionContext,
        params: &ExecutionStrategyParameters,
        hooks: &mut dyn ExecutionStrategyInstrumentationContext,
    ) -> Result<Option<EventStream>, ExecutionError> {
        let params = params.narrow_to_first_field()?;
        let response_key = params.response_key().unwrap_or_default().to_string();
        let field_values_info = |kind| {
            [ResolvedFieldValue {
                path: params.path.clone(),
                response_key: response_key.clone(),
                kind,
            }]
        };

        let step_info = match subscribed_field_step_info(ctx, &params) {
            Ok(step_info) => step_info,
            Err(error) => {
                report_hook_failure(
                    "on_field_values_info",
                    hooks.on_field_values_info(&field_values_info(ResolvedFieldKind::Null)),
                );
                return Err(error);
            }
        };
        let field_name = step_info.field.name().to_string();
        let params = params.transform(|b| b.step_info(Some(step_info)));

        tracing::debug!(field = %response_key, "resolving subscription event stream");
        let fetched = self.completion.fetch_field(ctx, &params).await;

        let (kind, result) = match fetched {
            FetchedValue::Stream(stream) => (ResolvedFieldKind::Stream, Ok(Some(stream))),
            FetchedValue::Value(Value::Null) => (ResolvedFieldKind::Null, Ok(None)),
            FetchedValue::Value(_) => (
                ResolvedFieldKind::Value,
                Err(ExecutionError::NotAnEventStream { field: field_name }),
            ),
        };
        report_hook_failure(
            "on_field_values_info",
            hooks.on_field_values_info(&field_values_info(kind)),
        );
        result
    }

    fn map_source_to_response(
        &self,
        ctx: &ExecutionContext,
        params: &ExecutionStrategyParameters,
        stream: EventStream,
    ) -> ResponseStream {
        let strategy = self.clone();
        let ctx = ctx.clone();
        let params = params.clone();
        let max_in_flight = self.config.max_in_flight_events.max(1);
        let event_path = params
            .narrow_to_first_field()
            .map(|narrowed| narrowed.path)
            .unwrap_or_else(|_| params.path.clone());

        Box::pin(map_ordered(stream, max_in_flight, move |event| {
            let strategy = strategy.clone();
            let ctx = ctx.clone();
            let params = params.clone();
            let event_path = event_path.clone();
            // Spawned so that an event settles its hooks even when the
            // subscriber goes away first.
            let task = tokio::spawn(async move {
                strategy.execute_subscription_event(&ctx, &params, event).await
            });
            async move {
                match task.await {
                    Ok(response) => response,
                    Err(join_error) => aborted_event_response(
                        event_path,
                        ExecutionError::EventAborted(join_error.to_string()),
                    ),
                }
            }
        }))
    }

    /// Executes the subscription field against one event.
    ///
    /// Never fails: every failure becomes an error entry of the event's
    /// response.
    pub async fn execute_subscription_event(
        &self,
        ctx: &ExecutionContext,
        params: &ExecutionStrategyParameters,
        event: Value,
    ) -> Response {
        let event_ctx = ctx.transform(|b| b.root(event.clone()).reset_errors());

        let prepared = params.narrow_to_first_field().and_then(|narrowed| {
            let step_info = subscribed_field_step_info(&event_ctx, &narrowed)?;
            Ok((narrowed, step_info))
        });
        let (event_params, step_info) = match prepared {
            Ok(prepared) => prepared,
            Err(error) => {
                tracing::error!(%error, "cannot execute subscription event");
                return Response::null(vec![
                    FieldError::new(error.to_string()).with_code(INTERNAL_ERROR)
                ]);
            }
        };
        let response_key = step_info.field.result_key().to_string();
        let path = event_params.path.clone();
        let event_params = event_params.transform(|b| b.source(event.clone()).step_info(Some(step_info.clone())));

        let instrumentation = Arc::clone(event_ctx.instrumentation());
        let state = event_ctx.instrumentation_state();
        let mut hooks = instrumentation.begin_subscribed_field_event(
            &InstrumentationFieldParameters {
                execution_context: &event_ctx,
                step_info: &step_info,
            },
            state,
        );
        report_hook_failure("on_dispatched", hooks.on_dispatched());

        // A panicking resolver must still settle the event's hooks.
        let completed = AssertUnwindSafe(async {
            self.completion
                .complete_field(&event_ctx, &event_params, FetchedValue::from_event(event))
                .value()
                .await
        })
        .catch_unwind()
        .await;
        let outcome = match completed {
            Ok(Ok(value)) => Ok(Response::keyed(response_key, value, event_ctx.errors().await)),
            Ok(Err(CompletionError::NonNullableFieldWasNull(_))) => {
                Ok(Response::null(event_ctx.errors().await))
            }
            Ok(Err(error)) => Err(ExecutionError::Completion(error)),
            Err(panic) => Err(ExecutionError::EventAborted(panic_message(panic.as_ref()))),
        };
        report_hook_failure("on_completed", hooks.on_completed(outcome.as_ref()));

        let response = match outcome {
            Ok(response) => response,
            Err(error) => {
                tracing::warn!(path = %path, %error, "subscription event failed");
                let mut errors = event_ctx.errors().await;
                errors.push(match error {
                    ExecutionError::Completion(error) => error.to_field_error(),
                    other => FieldError::new(other.to_string())
                        .with_path(path.clone())
                        .with_code(INTERNAL_ERROR),
                });
                Response::null(errors)
            }
        };

        let params = InstrumentationExecutionParameters {
            execution_context: &event_ctx,
            path: &path,
        };
        match instrumentation
            .instrument_execution_result(response.clone(), &params, state)
            .await
        {
            Ok(response) => response,
            Err(error) => {
                report_hook_failure("instrument_execution_result", Err(error));
                response
            }
        }
    }
}

/// Response of an event whose task ended without producing one.
fn aborted_event_response(path: ResultPath, error: ExecutionError) -> Response {
    tracing::error!(path = %path, %error, "subscription event task failed");
    Response::null(vec![FieldError::new(error.to_string())
        .with_path(path)
        .with_code(INTERNAL_ERROR)])
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "event execution panicked".to_string()
    }
}

/// Step info of the subscription field, looked up on the subscription type.
fn subscribed_field_step_info(
    ctx: &ExecutionContext,
    params: &ExecutionStrategyParameters,
) -> Result<ExecutionStepInfo, ExecutionError> {
    let field = params
        .current_field()
        .ok_or(ExecutionError::EmptySelectionSet)?;
    let parent_type = ctx.subscription_type()?;
    if ctx.schema().object_type(parent_type).is_none() {
        return Err(ExecutionError::NotAnObjectType(parent_type.to_string()));
    }
    ExecutionStepInfo::for_field(
        ctx.schema(),
        parent_type,
        field,
        params.path.clone(),
        ctx.variables(),
    )
}
