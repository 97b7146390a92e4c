//! Request data and per-operation execution state.

use crate::collector::FieldCollector;
use crate::error::{ExecutionError, FieldError};
use crate::instrumentation::{
    Instrumentation, InstrumentationCreateStateParameters, InstrumentationState,
    NoopInstrumentation,
};
use crate::query::{Document, FragmentDefinition, OperationDefinition, OperationKind};
use crate::schema::Schema;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Request-scoped data handed to every resolver.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Request-scoped data.
    pub data: HashMap<String, Value>,
    /// Coerced variables of the running operation.
    pub variables: HashMap<String, Value>,
}

impl Context {
    /// Creates a new context.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a context with variables.
    pub fn with_variables(variables: HashMap<String, Value>) -> Self {
        Self {
            data: HashMap::new(),
            variables,
        }
    }

    /// Sets a value in the context.
    pub fn set<T: Serialize>(&mut self, key: impl Into<String>, value: T) {
        if let Ok(v) = serde_json::to_value(value) {
            self.data.insert(key.into(), v);
        }
    }

    /// Gets a value from the context.
    pub fn get<T: for<'de> Deserialize<'de>>(&self, key: &str) -> Option<T> {
        self.data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Gets a variable by name.
    pub fn variable(&self, name: &str) -> Option<&Value> {
        self.variables.get(name)
    }
}

/// Everything needed to start a subscription.
#[derive(Debug, Clone, Default)]
pub struct ExecutionInput {
    pub document: Document,
    pub operation_name: Option<String>,
    pub variables: IndexMap<String, Value>,
    pub root_value: Value,
    pub context: Context,
}

impl ExecutionInput {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            ..Self::default()
        }
    }

    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    pub fn variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }

    pub fn variables(mut self, variables: IndexMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn root_value(mut self, root: Value) -> Self {
        self.root_value = root;
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }
}

/// State of one running operation.
///
/// Cloning shares the error list. Use [`ExecutionContext::transform`] to
/// derive a context with its own root value and error list.
#[derive(Clone)]
pub struct ExecutionContext {
    schema: Arc<Schema>,
    operation: Arc<OperationDefinition>,
    fragments: Arc<IndexMap<String, FragmentDefinition>>,
    variables: Arc<IndexMap<String, Value>>,
    root: Value,
    context: Arc<Context>,
    errors: Arc<RwLock<Vec<FieldError>>>,
    instrumentation: Arc<dyn Instrumentation>,
    instrumentation_state: Option<InstrumentationState>,
}

impl ExecutionContext {
    /// Starts building a context for `operation`.
    pub fn builder(schema: Arc<Schema>, operation: OperationDefinition) -> ExecutionContextBuilder {
        ExecutionContextBuilder {
            schema,
            operation: Arc::new(operation),
            fragments: Arc::new(IndexMap::new()),
            variables: Arc::new(IndexMap::new()),
            root: Value::Null,
            context: Arc::new(Context::new()),
            errors: Arc::new(RwLock::new(Vec::new())),
            instrumentation: Arc::new(NoopInstrumentation),
            instrumentation_state: None,
        }
    }

    /// Selects the subscription operation of `input`, coerces its variables
    /// and creates the instrumentation state.
    pub fn from_input(
        schema: Arc<Schema>,
        input: ExecutionInput,
        instrumentation: Arc<dyn Instrumentation>,
    ) -> Result<Self, ExecutionError> {
        let ExecutionInput {
            document,
            operation_name,
            variables,
            root_value,
            mut context,
        } = input;

        let operation = document.operation(operation_name.as_deref())?.clone();
        if operation.kind != OperationKind::Subscription {
            return Err(ExecutionError::NotASubscription(operation.kind.to_string()));
        }
        if schema.subscription_type.is_none() {
            return Err(ExecutionError::NoSubscriptionType);
        }

        let variables = operation.coerce_variables(&variables)?;
        context
            .variables
            .extend(variables.iter().map(|(k, v)| (k.clone(), v.clone())));

        let state = instrumentation.create_state(&InstrumentationCreateStateParameters {
            schema: Arc::clone(&schema),
            operation_name: operation.name.clone(),
            variables: variables.clone(),
        });

        let builder = Self::builder(schema, operation)
            .fragments(document.fragments)
            .variables(variables)
            .root(root_value)
            .context(context)
            .instrumentation(instrumentation);
        let builder = match state {
            Some(state) => builder.instrumentation_state(state),
            None => builder,
        };
        Ok(builder.build())
    }

    /// Derives a new context through a builder seeded with this one.
    ///
    /// ```ignore
    /// let per_event = ctx.transform(|b| b.root(event).reset_errors());
    /// ```
    pub fn transform(&self, f: impl FnOnce(ExecutionContextBuilder) -> ExecutionContextBuilder) -> Self {
        f(ExecutionContextBuilder::from(self)).build()
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn operation(&self) -> &OperationDefinition {
        &self.operation
    }

    pub fn fragments(&self) -> &IndexMap<String, FragmentDefinition> {
        &self.fragments
    }

    pub fn variables(&self) -> &IndexMap<String, Value> {
        &self.variables
    }

    /// The active root value.
    pub fn root(&self) -> &Value {
        &self.root
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn instrumentation(&self) -> &Arc<dyn Instrumentation> {
        &self.instrumentation
    }

    pub fn instrumentation_state(&self) -> Option<&InstrumentationState> {
        self.instrumentation_state.as_ref()
    }

    /// Name of the schema's subscription root type.
    pub fn subscription_type(&self) -> Result<&str, ExecutionError> {
        self.schema
            .subscription_type
            .as_deref()
            .ok_or(ExecutionError::NoSubscriptionType)
    }

    /// A collector bound to this operation's fragments and variables.
    pub fn field_collector(&self) -> FieldCollector<'_> {
        FieldCollector::new(&self.schema, &self.fragments, &self.variables)
    }

    /// Records an error. Only the first error per result path is kept.
    pub async fn add_error(&self, error: FieldError) {
        let mut errors = self.errors.write().await;
        if let Some(path) = &error.path {
            if errors.iter().any(|e| e.path.as_ref() == Some(path)) {
                return;
            }
        }
        errors.push(error);
    }

    /// Snapshot of the recorded errors.
    pub async fn errors(&self) -> Vec<FieldError> {
        self.errors.read().await.clone()
    }

    /// Whether `other` records errors into the same list.
    pub fn shares_errors_with(&self, other: &ExecutionContext) -> bool {
        Arc::ptr_eq(&self.errors, &other.errors)
    }
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("operation", &self.operation.name)
            .field("root", &self.root)
            .field("variables", &self.variables)
            .field("has_instrumentation_state", &self.instrumentation_state.is_some())
            .finish()
    }
}

/// Builder for [`ExecutionContext`].
pub struct ExecutionContextBuilder {
    schema: Arc<Schema>,
    operation: Arc<OperationDefinition>,
    fragments: Arc<IndexMap<String, FragmentDefinition>>,
    variables: Arc<IndexMap<String, Value>>,
    root: Value,
    context: Arc<Context>,
    errors: Arc<RwLock<Vec<FieldError>>>,
    instrumentation: Arc<dyn Instrumentation>,
    instrumentation_state: Option<InstrumentationState>,
}

impl ExecutionContextBuilder {
    pub fn fragments(mut self, fragments: IndexMap<String, FragmentDefinition>) -> Self {
        self.fragments = Arc::new(fragments);
        self
    }

    pub fn variables(mut self, variables: IndexMap<String, Value>) -> Self {
        self.variables = Arc::new(variables);
        self
    }

    pub fn root(mut self, root: Value) -> Self {
        self.root = root;
        self
    }

    pub fn context(mut self, context: Context) -> Self {
        self.context = Arc::new(context);
        self
    }

    /// Starts a fresh, empty error list.
    pub fn reset_errors(mut self) -> Self {
        self.errors = Arc::new(RwLock::new(Vec::new()));
        self
    }

    pub fn instrumentation(mut self, instrumentation: Arc<dyn Instrumentation>) -> Self {
        self.instrumentation = instrumentation;
        self
    }

    pub fn instrumentation_state(mut self, state: InstrumentationState) -> Self {
        self.instrumentation_state = Some(state);
        self
    }

    pub fn build(self) -> ExecutionContext {
        ExecutionContext {
            schema: self.schema,
            operation: self.operation,
            fragments: self.fragments,
            variables: self.variables,
            root: self.root,
            context: self.context,
            errors: self.errors,
            instrumentation: self.instrumentation,
            instrumentation_state: self.instrumentation_state,
        }
    }
}

impl From<&ExecutionContext> for ExecutionContextBuilder {
    fn from(ctx: &ExecutionContext) -> Self {
        Self {
            schema: Arc::clone(&ctx.schema),
            operation: Arc::clone(&ctx.operation),
            fragments: Arc::clone(&ctx.fragments),
            variables: Arc::clone(&ctx.variables),
            root: ctx.root.clone(),
            context: Arc::clone(&ctx.context),
            errors: Arc::clone(&ctx.errors),
            instrumentation: Arc::clone(&ctx.instrumentation),
            instrumentation_state: ctx.instrumentation_state.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::DocumentError;
    use crate::path::ResultPath;
    use crate::query::{Field, VariableDefinition};
    use crate::schema::{FieldDef, ObjectDef, SchemaBuilder, TypeRef};
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        Arc::new(
            SchemaBuilder::new()
                .subscription_type("Subscription")
                .object(
                    ObjectDef::new("Subscription")
                        .field(FieldDef::new("count", TypeRef::non_null(TypeRef::named("Int")))),
                )
                .build(),
        )
    }

    fn document() -> Document {
        Document::new().with_operation(
            OperationDefinition::subscription()
                .named("Counter")
                .variable(VariableDefinition::new("from", TypeRef::non_null(TypeRef::named("Int"))))
                .variable(
                    VariableDefinition::new("step", TypeRef::named("Int")).default_value(json!(1)),
                )
                .select(Field::new("count")),
        )
    }

    #[test]
    fn test_context_data() {
        let mut ctx = Context::new();
        ctx.set("user_id", 42);
        assert_eq!(ctx.get::<i64>("user_id"), Some(42));
        assert_eq!(ctx.get::<i64>("missing"), None);
    }

    #[tokio::test]
    async fn test_from_input_coerces_variables() {
        let input = ExecutionInput::new(document()).variable("from", json!(3));
        let ctx = ExecutionContext::from_input(schema(), input, Arc::new(NoopInstrumentation))
            .unwrap();

        assert_eq!(ctx.variables().get("from"), Some(&json!(3)));
        assert_eq!(ctx.variables().get("step"), Some(&json!(1)));
        assert_eq!(ctx.context().variable("step"), Some(&json!(1)));
        assert_eq!(ctx.subscription_type().unwrap(), "Subscription");
    }

    #[test]
    fn test_from_input_rejects_missing_variable() {
        let input = ExecutionInput::new(document());
        let error = ExecutionContext::from_input(schema(), input, Arc::new(NoopInstrumentation))
            .unwrap_err();
        assert!(matches!(
            error,
            ExecutionError::Document(DocumentError::MissingVariable { .. })
        ));
    }

    #[test]
    fn test_from_input_rejects_queries() {
        let document = Document::new()
            .with_operation(OperationDefinition::new(OperationKind::Query).select(Field::new("a")));
        let error = ExecutionContext::from_input(
            schema(),
            ExecutionInput::new(document),
            Arc::new(NoopInstrumentation),
        )
        .unwrap_err();
        assert_eq!(error, ExecutionError::NotASubscription("query".to_string()));
    }

    #[tokio::test]
    async fn test_transform_isolates_errors() {
        let ctx = ExecutionContext::builder(schema(), OperationDefinition::subscription())
            .root(json!({"root": true}))
            .build();
        ctx.add_error(FieldError::new("root error")).await;

        let derived = ctx.transform(|b| b.root(json!(5)).reset_errors());
        assert_eq!(derived.root(), &json!(5));
        assert_eq!(ctx.root(), &json!({"root": true}));
        assert!(derived.errors().await.is_empty());
        assert!(!derived.shares_errors_with(&ctx));

        derived.add_error(FieldError::new("event error")).await;
        assert_eq!(ctx.errors().await.len(), 1);
        assert_eq!(derived.errors().await.len(), 1);

        let same = ctx.transform(|b| b.root(json!(6)));
        assert!(same.shares_errors_with(&ctx));
    }

    #[tokio::test]
    async fn test_add_error_keeps_first_per_path() {
        let ctx = ExecutionContext::builder(schema(), OperationDefinition::subscription()).build();
        let path = ResultPath::root().segment("count");
        ctx.add_error(FieldError::new("first").with_path(path.clone()))
            .await;
        ctx.add_error(FieldError::new("second").with_path(path)).await;
        ctx.add_error(FieldError::new("no path")).await;
        ctx.add_error(FieldError::new("no path again")).await;

        let messages: Vec<_> = ctx.errors().await.into_iter().map(|e| e.message).collect();
        assert_eq!(messages, vec!["first", "no path", "no path again"]);
    }
}
