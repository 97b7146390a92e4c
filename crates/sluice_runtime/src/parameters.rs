//! Parameters threaded through field execution.

use crate::collector::{MergedField, MergedSelectionSet};
use crate::context::ExecutionContext;
use crate::error::ExecutionError;
use crate::path::ResultPath;
use crate::resolver::{ResolverArgs, ResolverInfo};
use crate::schema::{FieldDef, Schema, TypeRef};
use indexmap::IndexMap;
use serde_json::Value;

/// What is known about the field at one step of execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionStepInfo {
    /// Declared type of the field.
    pub ty: TypeRef,
    /// Object type the field is selected on.
    pub parent_type: String,
    pub field_definition: FieldDef,
    pub field: MergedField,
    pub path: ResultPath,
    /// Coerced argument values.
    pub arguments: IndexMap<String, Value>,
}

impl ExecutionStepInfo {
    /// Looks up `field` on `parent_type` and coerces its arguments.
    ///
    /// Declared arguments take the provided value or their default; provided
    /// arguments without a declaration are passed through.
    pub fn for_field(
        schema: &Schema,
        parent_type: &str,
        field: &MergedField,
        path: ResultPath,
        variables: &IndexMap<String, Value>,
    ) -> Result<Self, ExecutionError> {
        let field_definition = schema
            .field_definition(parent_type, field.name())
            .ok_or_else(|| ExecutionError::UnknownField {
                parent_type: parent_type.to_string(),
                field: field.name().to_string(),
            })?;

        let provided = &field.single_field().arguments;
        let mut arguments = IndexMap::with_capacity(field_definition.arguments.len());
        for (name, definition) in &field_definition.arguments {
            let value = provided
                .get(name)
                .map(|value| value.resolve(variables))
                .or_else(|| definition.default_value.clone());
            if let Some(value) = value {
                arguments.insert(name.clone(), value);
            }
        }
        for (name, value) in provided {
            if !arguments.contains_key(name) {
                arguments.insert(name.clone(), value.resolve(variables));
            }
        }

        Ok(Self {
            ty: field_definition.ty.clone(),
            parent_type: parent_type.to_string(),
            field_definition,
            field: field.clone(),
            path,
            arguments,
        })
    }

    /// The declared type without its outer non-null wrapper.
    pub fn unwrapped_non_null_type(&self) -> &TypeRef {
        self.ty.unwrap_non_null()
    }

    pub fn resolver_args(&self) -> ResolverArgs {
        ResolverArgs::from_pairs(self.arguments.clone())
    }

    pub fn resolver_info(&self) -> ResolverInfo {
        ResolverInfo::new(self.field.name(), &self.parent_type)
            .with_return_type(self.ty.to_string())
            .with_path(self.path.clone())
    }
}

/// Where execution currently stands: the selection set being executed, the
/// value it is executed against and the path of that value.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionStrategyParameters {
    pub fields: MergedSelectionSet,
    /// The field being executed, once narrowed to one.
    pub field: Option<MergedField>,
    /// Object type of `source`.
    pub parent_type: String,
    pub path: ResultPath,
    /// Step info of `field`, once it has been looked up.
    pub step_info: Option<ExecutionStepInfo>,
    pub source: Value,
}

impl ExecutionStrategyParameters {
    pub fn new(parent_type: impl Into<String>, fields: MergedSelectionSet, source: Value) -> Self {
        Self {
            fields,
            field: None,
            parent_type: parent_type.into(),
            path: ResultPath::root(),
            step_info: None,
            source,
        }
    }

    /// Parameters for the top-level selection set of the operation, executed
    /// against the context's root value.
    pub fn for_operation(ctx: &ExecutionContext) -> Result<Self, ExecutionError> {
        let root_type = ctx.subscription_type()?;
        let fields = ctx
            .field_collector()
            .collect_fields(root_type, &ctx.operation().selection_set);
        Ok(Self::new(root_type, fields, ctx.root().clone()))
    }

    /// Derives new parameters through a builder seeded with these.
    pub fn transform(
        &self,
        f: impl FnOnce(ExecutionStrategyParametersBuilder) -> ExecutionStrategyParametersBuilder,
    ) -> Self {
        f(ExecutionStrategyParametersBuilder {
            params: self.clone(),
        })
        .build()
    }

    /// Narrows to the first field of the selection set and extends the path
    /// with its response key.
    pub fn narrow_to_first_field(&self) -> Result<Self, ExecutionError> {
        let first = self
            .fields
            .first()
            .ok_or(ExecutionError::EmptySelectionSet)?
            .clone();
        let mut fields = MergedSelectionSet::new();
        for node in first.fields() {
            fields.insert(node.clone());
        }
        let path = self.path.segment(first.result_key());
        Ok(self.transform(|b| b.fields(fields).field(first).path(path).step_info(None)))
    }

    /// The field being executed.
    pub fn current_field(&self) -> Option<&MergedField> {
        self.field.as_ref()
    }

    /// Response key of the field being executed.
    pub fn response_key(&self) -> Option<&str> {
        self.field.as_ref().map(MergedField::result_key)
    }
}

/// Builder used by [`ExecutionStrategyParameters::transform`].
#[derive(Debug)]
pub struct ExecutionStrategyParametersBuilder {
    params: ExecutionStrategyParameters,
}

impl ExecutionStrategyParametersBuilder {
    pub fn fields(mut self, fields: MergedSelectionSet) -> Self {
        self.params.fields = fields;
        self
    }

    pub fn field(mut self, field: MergedField) -> Self {
        self.params.field = Some(field);
        self
    }

    pub fn parent_type(mut self, parent_type: impl Into<String>) -> Self {
        self.params.parent_type = parent_type.into();
        self
    }

    pub fn path(mut self, path: ResultPath) -> Self {
        self.params.path = path;
        self
    }

    pub fn step_info(mut self, step_info: Option<ExecutionStepInfo>) -> Self {
        self.params.step_info = step_info;
        self
    }

    pub fn source(mut self, source: Value) -> Self {
        self.params.source = source;
        self
    }

    pub fn build(self) -> ExecutionStrategyParameters {
        self.params
    }
}
