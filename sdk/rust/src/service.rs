//! Subscription service.
//!
//! Bundles a schema, resolvers, instrumentation and configuration behind a
//! single `subscribe` call:
//!
//! ```ignore
//! let pubsub = PubSub::new();
//! let service = SubscriptionService::builder()
//!     .schema(schema)
//!     .pubsub(pubsub.clone())
//!     .topic("messages", |args| args.get_as::<String>("room").unwrap_or_default())
//!     .build()?;
//!
//! let response = service
//!     .subscribe(document, None, IndexMap::new(), Context::new())
//!     .await?;
//! ```

use crate::error::{ErrorCode, ResultExt, SdkError, SdkResult};
use crate::pubsub::PubSub;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sluice_runtime::{
    ChainedInstrumentation, Context, Document, ExecutionContext, ExecutionInput,
    ExecutionStrategyParameters, Executor, ExecutorConfig, Instrumentation, NoopInstrumentation,
    ResolverArgs, ResolverErrorHandler, ResolverMap, Schema, SubscriptionConfig,
    SubscriptionExecutionStrategy, SubscriptionResponse, TracingInstrumentation,
};
use std::fmt;
use std::sync::Arc;

/// Service configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub subscription: SubscriptionConfig,
    pub executor: ExecutorConfig,
    /// Adds [`TracingInstrumentation`] in front of the registered ones.
    pub tracing: bool,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            subscription: SubscriptionConfig::default(),
            executor: ExecutorConfig::default(),
            tracing: true,
        }
    }
}

impl ServiceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a JSON configuration. Missing keys keep their defaults.
    pub fn from_json_str(json: &str) -> SdkResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_sdk_err_with(ErrorCode::ConfigError, "invalid service configuration")?;
        Ok(config.normalized())
    }

    pub fn max_in_flight_events(mut self, max: usize) -> Self {
        self.subscription = self.subscription.max_in_flight_events(max);
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.executor.max_depth = depth;
        self
    }

    pub fn no_tracing(mut self) -> Self {
        self.tracing = false;
        self
    }

    fn normalized(mut self) -> Self {
        let max = self.subscription.max_in_flight_events;
        self.subscription = self.subscription.max_in_flight_events(max);
        self
    }
}

type TopicFn = Arc<dyn Fn(&ResolverArgs) -> String + Send + Sync>;

/// Builder for [`SubscriptionService`].
#[derive(Default)]
pub struct ServiceBuilder {
    schema: Option<Arc<Schema>>,
    resolvers: Option<ResolverMap>,
    instrumentations: Vec<Arc<dyn Instrumentation>>,
    error_handler: Option<Box<dyn ResolverErrorHandler>>,
    pubsub: Option<PubSub>,
    topics: Vec<(String, TopicFn)>,
    config: ServiceConfig,
}

impl ServiceBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schema(mut self, schema: impl Into<Arc<Schema>>) -> Self {
        self.schema = Some(schema.into());
        self
    }

    pub fn resolvers(mut self, resolvers: ResolverMap) -> Self {
        self.resolvers = Some(resolvers);
        self
    }

    /// Appends an instrumentation. Several are chained in registration order.
    pub fn instrumentation(mut self, instrumentation: impl Instrumentation + 'static) -> Self {
        self.instrumentations.push(Arc::new(instrumentation));
        self
    }

    pub fn error_handler(mut self, handler: impl ResolverErrorHandler + 'static) -> Self {
        self.error_handler = Some(Box::new(handler));
        self
    }

    pub fn pubsub(mut self, pubsub: PubSub) -> Self {
        self.pubsub = Some(pubsub);
        self
    }

    /// Backs the subscription field `field` with the pub/sub topic computed
    /// from the field's arguments.
    pub fn topic<F>(mut self, field: impl Into<String>, topic: F) -> Self
    where
        F: Fn(&ResolverArgs) -> String + Send + Sync + 'static,
    {
        self.topics.push((field.into(), Arc::new(topic)));
        self
    }

    pub fn config(mut self, config: ServiceConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> SdkResult<SubscriptionService> {
        let schema = self
            .schema
            .ok_or_else(|| SdkError::new(ErrorCode::NoSchema, "a schema is required"))?;
        let subscription_type = schema
            .subscription_type
            .clone()
            .ok_or_else(|| SdkError::schema("the schema does not define a subscription type"))?;

        let mut resolvers = self.resolvers.unwrap_or_default();
        if !self.topics.is_empty() {
            let pubsub = self.pubsub.ok_or_else(|| {
                SdkError::config("topic fields were registered without a pub/sub hub")
            })?;
            for (field, topic) in self.topics {
                if schema.field_definition(&subscription_type, &field).is_none() {
                    return Err(SdkError::new(
                        ErrorCode::FieldNotFound,
                        format!("`{}` has no field `{}`", subscription_type, field),
                    )
                    .with_extension("field", field));
                }
                register_topic(&mut resolvers, &subscription_type, &field, pubsub.clone(), topic);
            }
        }

        let mut executor = Executor::new(resolvers).with_config(self.config.executor.clone());
        if let Some(handler) = self.error_handler {
            executor = executor.with_error_handler(handler);
        }
        let strategy = SubscriptionExecutionStrategy::new(Arc::new(executor))
            .with_config(self.config.subscription.clone());

        let mut instrumentations = self.instrumentations;
        if self.config.tracing {
            instrumentations.insert(0, Arc::new(TracingInstrumentation));
        }
        let instrumentation: Arc<dyn Instrumentation> = match instrumentations.len() {
            0 => Arc::new(NoopInstrumentation),
            1 => instrumentations.remove(0),
            _ => Arc::new(ChainedInstrumentation::new(instrumentations)),
        };

        tracing::debug!(
            subscription_type = %subscription_type,
            instrumentation = instrumentation.name(),
            max_in_flight_events = self.config.subscription.max_in_flight_events,
            "subscription service built"
        );

        Ok(SubscriptionService {
            schema,
            strategy,
            instrumentation,
            config: self.config,
        })
    }
}

fn register_topic(
    resolvers: &mut ResolverMap,
    subscription_type: &str,
    field: &str,
    pubsub: PubSub,
    topic: TopicFn,
) {
    resolvers.register_stream(subscription_type, field, move |_, args, _, _| {
        let pubsub = pubsub.clone();
        let topic = topic(&args);
        async move {
            tracing::debug!(topic = %topic, "subscribing to topic");
            Ok(Some(pubsub.event_stream(topic).await))
        }
    });
}

/// Runs subscription operations against one schema.
#[derive(Clone)]
pub struct SubscriptionService {
    schema: Arc<Schema>,
    strategy: SubscriptionExecutionStrategy,
    instrumentation: Arc<dyn Instrumentation>,
    config: ServiceConfig,
}

impl fmt::Debug for SubscriptionService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionService")
            .field("instrumentation", &self.instrumentation.name())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SubscriptionService {
    pub fn builder() -> ServiceBuilder {
        ServiceBuilder::new()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Starts the subscription operation of `document`.
    pub async fn subscribe(
        &self,
        document: Document,
        operation_name: Option<&str>,
        variables: IndexMap<String, Value>,
        context: Context,
    ) -> SdkResult<SubscriptionResponse> {
        let mut input = ExecutionInput::new(document)
            .variables(variables)
            .context(context);
        if let Some(name) = operation_name {
            input = input.operation_name(name);
        }
        self.execute(input).await
    }

    /// Starts a subscription from a prepared input.
    pub async fn execute(&self, input: ExecutionInput) -> SdkResult<SubscriptionResponse> {
        let ctx = ExecutionContext::from_input(
            Arc::clone(&self.schema),
            input,
            Arc::clone(&self.instrumentation),
        )?;
        let params = ExecutionStrategyParameters::for_operation(&ctx)?;
        let response = self.strategy.execute(&ctx, &params).await.map_err(|error| {
            tracing::warn!(error = %error, "subscription rejected");
            SdkError::from(error)
        })?;
        Ok(response)
    }
}
