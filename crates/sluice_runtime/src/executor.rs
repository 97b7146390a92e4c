//! Field execution and value completion.
//!
//! [`Executor`] resolves fields through a [`ResolverMap`] and completes the
//! raw values against their declared types:
//! - a null in a non-null position records an error and propagates up to
//!   the nearest nullable position, which becomes null,
//! - lists complete item by item with indexed paths,
//! - built-in scalars are checked against their type,
//! - objects execute their sub-selection with all fields running
//!   concurrently,
//! - interfaces and unions take their runtime type from `__typename`.

use crate::collector::MergedSelectionSet;
use crate::completion::{CompleteValueType, FetchedValue, FieldCompletion, FieldValueInfo};
use crate::context::ExecutionContext;
use crate::error::{CompletionError, FieldError, TYPE_MISMATCH};
use crate::error_handler::{ResolverErrorHandler, ResolverErrorParams, SimpleResolverErrorHandler};
use crate::parameters::{ExecutionStepInfo, ExecutionStrategyParameters};
use crate::path::ResultPath;
use crate::query::Selection;
use crate::resolver::{Resolved, ResolverMap};
use crate::schema::{TypeDef, TypeRef, TYPENAME_FIELD};
use async_trait::async_trait;
use futures::future::{join_all, BoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Maximum number of nested fields below the root. Deeper fields
    /// resolve to null with an error.
    pub max_depth: usize,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self { max_depth: 32 }
    }
}

/// The reference field completion engine.
#[derive(Clone)]
pub struct Executor {
    config: ExecutorConfig,
    resolvers: Arc<ResolverMap>,
    error_handler: Arc<dyn ResolverErrorHandler>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ResolverMap::new())
    }
}

impl fmt::Debug for Executor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Executor")
            .field("config", &self.config)
            .field("resolvers", &self.resolvers)
            .finish()
    }
}

impl Executor {
    /// Creates an executor with resolvers.
    pub fn new(resolvers: ResolverMap) -> Self {
        Self {
            config: ExecutorConfig::default(),
            resolvers: Arc::new(resolvers),
            error_handler: Arc::new(SimpleResolverErrorHandler),
        }
    }

    pub fn with_config(mut self, config: ExecutorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the handler deciding which errors a failed resolver reports.
    pub fn with_error_handler(mut self, handler: impl ResolverErrorHandler + 'static) -> Self {
        self.error_handler = Arc::new(handler);
        self
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn resolvers(&self) -> &ResolverMap {
        &self.resolvers
    }

    /// Executes `selections` against `source`, a value of `object_type`.
    ///
    /// All fields run concurrently; the result keeps the selection order.
    pub fn execute_selection_set<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        object_type: &'a str,
        selections: &'a [Selection],
        path: ResultPath,
        source: Value,
    ) -> BoxFuture<'a, Result<Value, CompletionError>> {
        Box::pin(async move {
            let fields = ctx.field_collector().collect_fields(object_type, selections);
            let executions = fields.iter().map(|(key, field)| {
                let mut narrowed = MergedSelectionSet::new();
                for node in field.fields() {
                    narrowed.insert(node.clone());
                }
                let params = ExecutionStrategyParameters::new(object_type, narrowed, source.clone())
                    .transform(|b| b.field(field.clone()).path(path.segment(key.as_str())));
                async move {
                    let fetched = self.fetch_field(ctx, &params).await;
                    let value = self.complete_field(ctx, &params, fetched).value().await?;
                    Ok::<_, CompletionError>((key.clone(), value))
                }
            });

            let mut object = serde_json::Map::with_capacity(fields.len());
            for result in join_all(executions).await {
                let (key, value) = result?;
                object.insert(key, value);
            }
            Ok(Value::Object(object))
        })
    }

    /// Completes `value` against `ty`, turning a null in a nullable position
    /// that came from a non-null descendant into null.
    fn complete_value<'a>(
        &'a self,
        ctx: &'a ExecutionContext,
        ty: &'a TypeRef,
        site: &'a ExecutionStepInfo,
        selections: &'a [Selection],
        path: ResultPath,
        value: Value,
    ) -> BoxFuture<'a, Result<Value, CompletionError>> {
        Box::pin(async move {
            match ty {
                TypeRef::NonNull(inner) => {
                    let completed = self
                        .complete_nullable(ctx, inner, site, selections, path.clone(), value)
                        .await?;
                    if completed.is_null() {
                        let error =
                            FieldError::non_null_violation(&site.parent_type, site.field.name(), path);
                        ctx.add_error(error.clone()).await;
                        return Err(CompletionError::NonNullableFieldWasNull(error));
                    }
                    Ok(completed)
                }
                _ => match self
                    .complete_nullable(ctx, ty, site, selections, path, value)
                    .await
                {
                    Err(CompletionError::NonNullableFieldWasNull(_)) => Ok(Value::Null),
                    other => other,
                },
            }
        })
    }

    async fn complete_nullable(
        &self,
        ctx: &ExecutionContext,
        ty: &TypeRef,
        site: &ExecutionStepInfo,
        selections: &[Selection],
        path: ResultPath,
        value: Value,
    ) -> Result<Value, CompletionError> {
        if value.is_null() {
            return Ok(Value::Null);
        }
        match ty {
            TypeRef::NonNull(inner) => {
                self.complete_value(ctx, inner, site, selections, path, value)
                    .await
            }
            TypeRef::List(item_type) => {
                let Value::Array(items) = value else {
                    return self
                        .mismatch(ctx, path, format!("Expected a list for `{}`", ty))
                        .await;
                };
                let items = items.into_iter().enumerate().map(|(index, item)| {
                    self.complete_value(ctx, item_type, site, selections, path.index(index), item)
                });
                let completed = join_all(items)
                    .await
                    .into_iter()
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(Value::Array(completed))
            }
            TypeRef::Named(name) => match ctx.schema().get_type(name) {
                Some(TypeDef::Scalar(_)) => match coerce_scalar(name, value) {
                    Ok(value) => Ok(value),
                    Err(message) => self.mismatch(ctx, path, message).await,
                },
                Some(TypeDef::Enum(enum_def)) => match value {
                    Value::String(s) if enum_def.values.iter().any(|v| *v == s) => {
                        Ok(Value::String(s))
                    }
                    other => {
                        self.mismatch(ctx, path, format!("`{}` is not a value of enum `{}`", other, name))
                            .await
                    }
                },
                Some(TypeDef::Object(_)) => {
                    self.execute_selection_set(ctx, name, selections, path, value)
                        .await
                }
                Some(TypeDef::Interface(_) | TypeDef::Union(_)) => {
                    let runtime_type = value
                        .get(TYPENAME_FIELD)
                        .and_then(Value::as_str)
                        .filter(|t| ctx.schema().is_possible_type(name, t))
                        .map(str::to_owned);
                    match runtime_type {
                        Some(runtime_type) => {
                            self.execute_selection_set(ctx, &runtime_type, selections, path, value)
                                .await
                        }
                        None => {
                            self.mismatch(
                                ctx,
                                path,
                                format!("Could not determine the runtime type of abstract type `{}`", name),
                            )
                            .await
                        }
                    }
                }
                Some(TypeDef::InputObject(_)) | None => Err(CompletionError::internal(
                    path,
                    format!("`{}` is not an output type", name),
                )),
            },
        }
    }

    async fn mismatch(
        &self,
        ctx: &ExecutionContext,
        path: ResultPath,
        message: String,
    ) -> Result<Value, CompletionError> {
        ctx.add_error(FieldError::new(message).with_path(path).with_code(TYPE_MISMATCH))
            .await;
        Ok(Value::Null)
    }

    fn complete_value_type(&self, ctx: &ExecutionContext, ty: &TypeRef, value: &Value) -> CompleteValueType {
        if value.is_null() {
            return CompleteValueType::Null;
        }
        match ty.unwrap_non_null() {
            TypeRef::List(_) => CompleteValueType::List,
            TypeRef::NonNull(_) => CompleteValueType::Null,
            TypeRef::Named(name) => match ctx.schema().get_type(name) {
                Some(TypeDef::Enum(_)) => CompleteValueType::Enum,
                Some(TypeDef::Object(_) | TypeDef::Interface(_) | TypeDef::Union(_)) => {
                    CompleteValueType::Object
                }
                _ => CompleteValueType::Scalar,
            },
        }
    }

    fn step_info(
        &self,
        ctx: &ExecutionContext,
        params: &ExecutionStrategyParameters,
    ) -> Result<ExecutionStepInfo, CompletionError> {
        if let Some(step_info) = &params.step_info {
            return Ok(step_info.clone());
        }
        let field = params
            .current_field()
            .ok_or_else(|| CompletionError::internal(params.path.clone(), "no field to execute"))?;
        ExecutionStepInfo::for_field(
            ctx.schema(),
            &params.parent_type,
            field,
            params.path.clone(),
            ctx.variables(),
        )
        .map_err(|error| CompletionError::internal(params.path.clone(), error.to_string()))
    }
}

#[async_trait]
impl FieldCompletion for Executor {
    async fn fetch_field(
        &self,
        ctx: &ExecutionContext,
        params: &ExecutionStrategyParameters,
    ) -> FetchedValue {
        if params.path.field_depth() > self.config.max_depth {
            tracing::debug!(path = %params.path, max_depth = self.config.max_depth, "field too deep");
            ctx.add_error(
                FieldError::new(format!(
                    "Query exceeds the maximum depth of {}",
                    self.config.max_depth
                ))
                .with_path(params.path.clone()),
            )
            .await;
            return FetchedValue::null();
        }

        let step_info = match self.step_info(ctx, params) {
            Ok(step_info) => step_info,
            Err(error) => {
                ctx.add_error(error.to_field_error()).await;
                return FetchedValue::null();
            }
        };
        if step_info.field.name() == TYPENAME_FIELD {
            return FetchedValue::Value(Value::String(params.parent_type.clone()));
        }

        let args = step_info.resolver_args();
        let info = step_info.resolver_info();
        match self
            .resolvers
            .resolve(&params.source, &args, ctx.context(), &info)
            .await
        {
            Ok(Resolved::Value(value)) => FetchedValue::Value(value),
            Ok(Resolved::Stream(stream)) => FetchedValue::Stream(stream),
            Err(error) => {
                let errors = self.error_handler.handle(ResolverErrorParams {
                    error: &error,
                    path: &params.path,
                    info: &info,
                });
                for error in errors {
                    ctx.add_error(error).await;
                }
                FetchedValue::null()
            }
        }
    }

    fn complete_field(
        &self,
        ctx: &ExecutionContext,
        params: &ExecutionStrategyParameters,
        fetched: FetchedValue,
    ) -> FieldValueInfo {
        let step_info = match self.step_info(ctx, params) {
            Ok(step_info) => step_info,
            Err(error) => return FieldValueInfo::ready(CompleteValueType::Null, Err(error)),
        };
        let value = match fetched {
            FetchedValue::Value(value) => value,
            FetchedValue::Stream(_) => {
                return FieldValueInfo::ready(
                    CompleteValueType::Null,
                    Err(CompletionError::internal(
                        params.path.clone(),
                        "an event stream cannot be completed as a field value",
                    )),
                );
            }
        };

        let complete_value_type = self.complete_value_type(ctx, &step_info.ty, &value);
        let this = self.clone();
        let ctx = ctx.clone();
        let selections = step_info.field.sub_selections();
        let path = params.path.clone();
        FieldValueInfo::new(
            complete_value_type,
            Box::pin(async move {
                this.complete_value(&ctx, &step_info.ty, &step_info, &selections, path, value)
                    .await
            }),
        )
    }
}

/// Checks `value` against a scalar type. Custom scalars pass through.
fn coerce_scalar(name: &str, value: Value) -> Result<Value, String> {
    let ok = match name {
        "Int" => value
            .as_i64()
            .is_some_and(|n| i32::try_from(n).is_ok()),
        "Float" => value.is_number(),
        "String" => value.is_string(),
        "Boolean" => value.is_boolean(),
        "ID" => {
            if let Some(n) = value.as_i64() {
                return Ok(Value::String(n.to_string()));
            }
            value.is_string()
        }
        _ => true,
    };
    if ok {
        Ok(value)
    } else {
        Err(format!("Value `{}` cannot represent a `{}`", value, name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{NON_NULL_VIOLATION, RESOLVER_ERROR};
    use crate::query::{Field, InlineFragment, OperationDefinition};
    use crate::resolver::ResolverError;
    use crate::schema::{EnumDef, FieldDef, ObjectDef, Schema, SchemaBuilder, UnionDef};
    use serde_json::json;

    fn schema() -> Arc<Schema> {
        Arc::new(
            SchemaBuilder::new()
                .query_type("Query")
                .subscription_type("Subscription")
                .object(
                    ObjectDef::new("Query")
                        .field(FieldDef::new("post", TypeRef::named("Post")))
                        .field(FieldDef::new(
                            "posts",
                            TypeRef::list(TypeRef::non_null(TypeRef::named("Post"))),
                        ))
                        .field(FieldDef::new("activity", TypeRef::named("Activity")))
                        .field(FieldDef::new("count", TypeRef::named("Int")))
                        .field(FieldDef::new("id", TypeRef::named("ID")))
                        .field(FieldDef::new("status", TypeRef::named("Status")))
                        .field(FieldDef::new("failing", TypeRef::named("String"))),
                )
                .object(
                    ObjectDef::new("Post")
                        .field(FieldDef::new("id", TypeRef::non_null(TypeRef::named("ID"))))
                        .field(FieldDef::new("title", TypeRef::non_null(TypeRef::named("String"))))
                        .field(FieldDef::new("related", TypeRef::named("Post"))),
                )
                .object(
                    ObjectDef::new("Comment").field(FieldDef::new("body", TypeRef::named("String"))),
                )
                .add_type(TypeDef::Union(UnionDef::new("Activity", ["Post", "Comment"])))
                .add_type(TypeDef::Enum(EnumDef::new("Status", ["OPEN", "CLOSED"])))
                .build(),
        )
    }

    fn context() -> ExecutionContext {
        ExecutionContext::builder(schema(), OperationDefinition::subscription()).build()
    }

    async fn run(executor: &Executor, ctx: &ExecutionContext, selections: Vec<Selection>, source: Value) -> Result<Value, CompletionError> {
        executor
            .execute_selection_set(ctx, "Query", &selections, ResultPath::root(), source)
            .await
    }

    #[tokio::test]
    async fn test_completes_nested_objects_with_default_resolver() {
        let executor = Executor::default();
        let ctx = context();
        let data = run(
            &executor,
            &ctx,
            vec![Field::new("post")
                .select(Field::new("__typename"))
                .select(Field::new("title").alias("headline"))
                .into()],
            json!({"post": {"id": 1, "title": "Hello"}}),
        )
        .await
        .unwrap();

        assert_eq!(data, json!({"post": {"__typename": "Post", "headline": "Hello"}}));
        assert!(ctx.errors().await.is_empty());
    }

    #[tokio::test]
    async fn test_non_null_violation_bubbles_to_nullable_parent() {
        let executor = Executor::default();
        let ctx = context();
        let data = run(
            &executor,
            &ctx,
            vec![Field::new("post").select(Field::new("title")).into()],
            json!({"post": {"title": null}}),
        )
        .await
        .unwrap();

        assert_eq!(data, json!({"post": null}));
        let errors = ctx.errors().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code(), Some(NON_NULL_VIOLATION));
        assert_eq!(
            errors[0].path,
            Some(ResultPath::root().segment("post").segment("title"))
        );
        assert_eq!(
            errors[0].message,
            "Cannot return null for non-nullable field Post.title"
        );
    }

    #[tokio::test]
    async fn test_non_null_list_item_nulls_the_list() {
        let executor = Executor::default();
        let ctx = context();
        let data = run(
            &executor,
            &ctx,
            vec![Field::new("posts").select(Field::new("id")).into()],
            json!({"posts": [{"id": "a"}, null, {"id": "c"}]}),
        )
        .await
        .unwrap();

        assert_eq!(data, json!({"posts": null}));
        let errors = ctx.errors().await;
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors[0].path,
            Some(ResultPath::root().segment("posts").index(1))
        );
    }

    #[tokio::test]
    async fn test_list_items_complete_in_order() {
        let executor = Executor::default();
        let ctx = context();
        let data = run(
            &executor,
            &ctx,
            vec![Field::new("posts").select(Field::new("id")).into()],
            json!({"posts": [{"id": 1}, {"id": "b"}]}),
        )
        .await
        .unwrap();
        assert_eq!(data, json!({"posts": [{"id": "1"}, {"id": "b"}]}));
    }

    #[tokio::test]
    async fn test_scalar_and_enum_validation() {
        let executor = Executor::default();
        let ctx = context();
        let data = run(
            &executor,
            &ctx,
            vec![
                Field::new("count").into(),
                Field::new("status").into(),
                Field::new("id").into(),
            ],
            json!({"count": "three", "status": "PENDING", "id": 7}),
        )
        .await
        .unwrap();

        assert_eq!(data, json!({"count": null, "status": null, "id": "7"}));
        let errors = ctx.errors().await;
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().all(|e| e.code() == Some(TYPE_MISMATCH)));
    }

    #[tokio::test]
    async fn test_int_out_of_range() {
        assert!(coerce_scalar("Int", json!(2_147_483_647)).is_ok());
        assert!(coerce_scalar("Int", json!(2_147_483_648i64)).is_err());
        assert!(coerce_scalar("Int", json!(1.5)).is_err());
        assert!(coerce_scalar("Float", json!(1)).is_ok());
        assert!(coerce_scalar("DateTime", json!({"any": "thing"})).is_ok());
    }

    #[tokio::test]
    async fn test_union_resolves_runtime_type() {
        let executor = Executor::default();
        let ctx = context();
        let selections = vec![Field::new("activity")
            .select(Field::new("__typename"))
            .select(InlineFragment::on("Comment").select(Field::new("body")))
            .select(InlineFragment::on("Post").select(Field::new("title")))
            .into()];

        let data = run(
            &executor,
            &ctx,
            selections.clone(),
            json!({"activity": {"__typename": "Comment", "body": "nice"}}),
        )
        .await
        .unwrap();
        assert_eq!(data, json!({"activity": {"__typename": "Comment", "body": "nice"}}));

        let data = run(&executor, &ctx, selections, json!({"activity": {"body": "?"}}))
            .await
            .unwrap();
        assert_eq!(data, json!({"activity": null}));
        assert_eq!(ctx.errors().await.len(), 1);
    }

    #[tokio::test]
    async fn test_resolver_errors_go_through_handler() {
        let mut resolvers = ResolverMap::new();
        resolvers.register_fn("Query", "failing", |_, _, _, _| {
            Err(ResolverError::Custom("backend unavailable".to_string()))
        });
        let executor = Executor::new(resolvers);
        let ctx = context();

        let data = run(&executor, &ctx, vec![Field::new("failing").into()], json!({}))
            .await
            .unwrap();
        assert_eq!(data, json!({"failing": null}));

        let errors = ctx.errors().await;
        assert_eq!(errors[0].message, "backend unavailable");
        assert_eq!(errors[0].code(), Some(RESOLVER_ERROR));
    }

    #[tokio::test]
    async fn test_custom_error_handler() {
        struct Quiet;
        impl ResolverErrorHandler for Quiet {
            fn handle(&self, _params: ResolverErrorParams<'_>) -> Vec<FieldError> {
                Vec::new()
            }
        }

        let mut resolvers = ResolverMap::new();
        resolvers.register_fn("Query", "failing", |_, _, _, _| {
            Err(ResolverError::Custom("hidden".to_string()))
        });
        let executor = Executor::new(resolvers).with_error_handler(Quiet);
        let ctx = context();

        let data = run(&executor, &ctx, vec![Field::new("failing").into()], json!({}))
            .await
            .unwrap();
        assert_eq!(data, json!({"failing": null}));
        assert!(ctx.errors().await.is_empty());
    }

    #[tokio::test]
    async fn test_max_depth() {
        let executor = Executor::default().with_config(ExecutorConfig { max_depth: 2 });
        let ctx = context();
        let data = run(
            &executor,
            &ctx,
            vec![Field::new("post")
                .select(Field::new("related").select(Field::new("related").select(Field::new("id"))))
                .into()],
            json!({"post": {"related": {"related": {"id": 1}}}}),
        )
        .await
        .unwrap();

        assert_eq!(data, json!({"post": {"related": {"related": null}}}));
        assert_eq!(ctx.errors().await.len(), 1);
    }

    #[tokio::test]
    async fn test_stream_value_cannot_be_completed() {
        let executor = Executor::default();
        let ctx = context();
        let params = ExecutionStrategyParameters::new("Query", Default::default(), json!({}))
            .transform(|b| {
                b.field(crate::collector::MergedField::new(Field::new("count")))
                    .path(ResultPath::root().segment("count"))
            });
        let stream: crate::streaming::EventStream = Box::pin(futures::stream::empty());
        let result = executor
            .complete_field(&ctx, &params, FetchedValue::Stream(stream))
            .value()
            .await;
        assert!(matches!(result, Err(CompletionError::Internal { .. })));
    }
}
