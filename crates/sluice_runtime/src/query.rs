//! Query documents.
//!
//! Documents are built programmatically; there is no parser in this crate.
//!
//! ```
//! use sluice_runtime::query::{Document, Field, OperationDefinition};
//!
//! let document = Document::new().with_operation(
//!     OperationDefinition::subscription()
//!         .named("OnPost")
//!         .select(Field::new("postAdded").select(Field::new("id"))),
//! );
//! assert!(document.operation(Some("OnPost")).is_ok());
//! ```

use crate::schema::TypeRef;
use indexmap::IndexMap;
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// The kind of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Query,
    Mutation,
    Subscription,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Mutation => write!(f, "mutation"),
            Self::Subscription => write!(f, "subscription"),
        }
    }
}

/// An argument or directive value as written in the document.
#[derive(Debug, Clone, PartialEq)]
pub enum InputValue {
    Variable(String),
    Literal(Value),
    List(Vec<InputValue>),
    Object(IndexMap<String, InputValue>),
}

impl InputValue {
    pub fn variable(name: impl Into<String>) -> Self {
        Self::Variable(name.into())
    }

    /// Substitutes variables. Unknown variables become `null`.
    pub fn resolve(&self, variables: &IndexMap<String, Value>) -> Value {
        match self {
            Self::Variable(name) => variables.get(name).cloned().unwrap_or(Value::Null),
            Self::Literal(value) => value.clone(),
            Self::List(items) => Value::Array(items.iter().map(|v| v.resolve(variables)).collect()),
            Self::Object(fields) => Value::Object(
                fields
                    .iter()
                    .map(|(k, v)| (k.clone(), v.resolve(variables)))
                    .collect(),
            ),
        }
    }
}

impl From<Value> for InputValue {
    fn from(value: Value) -> Self {
        Self::Literal(value)
    }
}

/// A directive applied to a selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub name: String,
    pub arguments: IndexMap<String, InputValue>,
}

impl Directive {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: IndexMap::new(),
        }
    }

    /// `@skip(if: ...)`.
    pub fn skip(condition: impl Into<InputValue>) -> Self {
        Self::new("skip").argument("if", condition)
    }

    /// `@include(if: ...)`.
    pub fn include(condition: impl Into<InputValue>) -> Self {
        Self::new("include").argument("if", condition)
    }

    pub fn argument(mut self, name: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }
}

/// A field selection.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub alias: Option<String>,
    pub name: String,
    pub arguments: IndexMap<String, InputValue>,
    pub directives: Vec<Directive>,
    pub selection_set: Vec<Selection>,
}

impl Field {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            alias: None,
            name: name.into(),
            arguments: IndexMap::new(),
            directives: Vec::new(),
            selection_set: Vec::new(),
        }
    }

    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    pub fn argument(mut self, name: impl Into<String>, value: impl Into<InputValue>) -> Self {
        self.arguments.insert(name.into(), value.into());
        self
    }

    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn select(mut self, selection: impl Into<Selection>) -> Self {
        self.selection_set.push(selection.into());
        self
    }

    /// The key under which this field appears in the result: the alias if
    /// present, else the name.
    pub fn result_key(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }
}

/// A named fragment spread.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentSpread {
    pub name: String,
    pub directives: Vec<Directive>,
}

impl FragmentSpread {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            directives: Vec::new(),
        }
    }

    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }
}

/// An inline fragment.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineFragment {
    pub type_condition: Option<String>,
    pub directives: Vec<Directive>,
    pub selection_set: Vec<Selection>,
}

impl InlineFragment {
    pub fn new() -> Self {
        Self {
            type_condition: None,
            directives: Vec::new(),
            selection_set: Vec::new(),
        }
    }

    pub fn on(type_condition: impl Into<String>) -> Self {
        Self {
            type_condition: Some(type_condition.into()),
            ..Self::new()
        }
    }

    pub fn directive(mut self, directive: Directive) -> Self {
        self.directives.push(directive);
        self
    }

    pub fn select(mut self, selection: impl Into<Selection>) -> Self {
        self.selection_set.push(selection.into());
        self
    }
}

impl Default for InlineFragment {
    fn default() -> Self {
        Self::new()
    }
}

/// A selection.
#[derive(Debug, Clone, PartialEq)]
pub enum Selection {
    Field(Field),
    FragmentSpread(FragmentSpread),
    InlineFragment(InlineFragment),
}

impl Selection {
    pub fn directives(&self) -> &[Directive] {
        match self {
            Self::Field(field) => &field.directives,
            Self::FragmentSpread(spread) => &spread.directives,
            Self::InlineFragment(fragment) => &fragment.directives,
        }
    }
}

impl From<Field> for Selection {
    fn from(field: Field) -> Self {
        Self::Field(field)
    }
}

impl From<FragmentSpread> for Selection {
    fn from(spread: FragmentSpread) -> Self {
        Self::FragmentSpread(spread)
    }
}

impl From<InlineFragment> for Selection {
    fn from(fragment: InlineFragment) -> Self {
        Self::InlineFragment(fragment)
    }
}

/// A named fragment definition.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentDefinition {
    pub name: String,
    pub type_condition: String,
    pub selection_set: Vec<Selection>,
}

impl FragmentDefinition {
    pub fn new(name: impl Into<String>, type_condition: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_condition: type_condition.into(),
            selection_set: Vec::new(),
        }
    }

    pub fn select(mut self, selection: impl Into<Selection>) -> Self {
        self.selection_set.push(selection.into());
        self
    }
}

/// A variable declared by an operation.
#[derive(Debug, Clone, PartialEq)]
pub struct VariableDefinition {
    pub name: String,
    pub ty: TypeRef,
    pub default_value: Option<Value>,
}

impl VariableDefinition {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            default_value: None,
        }
    }

    pub fn default_value(mut self, value: Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// An operation definition.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDefinition {
    pub kind: OperationKind,
    pub name: Option<String>,
    pub variable_definitions: Vec<VariableDefinition>,
    pub directives: Vec<Directive>,
    pub selection_set: Vec<Selection>,
}

impl OperationDefinition {
    pub fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            name: None,
            variable_definitions: Vec::new(),
            directives: Vec::new(),
            selection_set: Vec::new(),
        }
    }

    pub fn subscription() -> Self {
        Self::new(OperationKind::Subscription)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn variable(mut self, definition: VariableDefinition) -> Self {
        self.variable_definitions.push(definition);
        self
    }

    pub fn select(mut self, selection: impl Into<Selection>) -> Self {
        self.selection_set.push(selection.into());
        self
    }

    /// Applies declared defaults to the provided variables and checks that
    /// every non-null variable has a value.
    pub fn coerce_variables(
        &self,
        provided: &IndexMap<String, Value>,
    ) -> Result<IndexMap<String, Value>, DocumentError> {
        let mut coerced = IndexMap::with_capacity(self.variable_definitions.len());
        for definition in &self.variable_definitions {
            let value = match provided.get(&definition.name) {
                Some(value) => Some(value.clone()),
                None => definition.default_value.clone(),
            };
            match value {
                Some(Value::Null) | None if definition.ty.is_non_null() => {
                    return Err(DocumentError::MissingVariable {
                        name: definition.name.clone(),
                        ty: definition.ty.to_string(),
                    });
                }
                Some(value) => {
                    coerced.insert(definition.name.clone(), value);
                }
                None => {}
            }
        }
        Ok(coerced)
    }
}

/// A query document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    pub operations: Vec<OperationDefinition>,
    pub fragments: IndexMap<String, FragmentDefinition>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_operation(mut self, operation: OperationDefinition) -> Self {
        self.operations.push(operation);
        self
    }

    pub fn with_fragment(mut self, fragment: FragmentDefinition) -> Self {
        self.fragments.insert(fragment.name.clone(), fragment);
        self
    }

    /// Selects the operation to execute.
    ///
    /// With a name, the operation of that name; without one, the document
    /// must contain exactly one operation.
    pub fn operation(&self, name: Option<&str>) -> Result<&OperationDefinition, DocumentError> {
        match name {
            Some(name) => self
                .operations
                .iter()
                .find(|op| op.name.as_deref() == Some(name))
                .ok_or_else(|| DocumentError::UnknownOperation(name.to_string())),
            None => match self.operations.as_slice() {
                [] => Err(DocumentError::NoOperation),
                [op] => Ok(op),
                _ => Err(DocumentError::AmbiguousOperation),
            },
        }
    }
}

/// An error found while preparing a document for execution.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DocumentError {
    #[error("the document contains no operation")]
    NoOperation,

    #[error("unknown operation named `{0}`")]
    UnknownOperation(String),

    #[error("the document contains several operations, an operation name is required")]
    AmbiguousOperation,

    #[error("variable `${name}` of required type `{ty}` was not provided")]
    MissingVariable { name: String, ty: String },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_result_key_prefers_alias() {
        let field = Field::new("count");
        assert_eq!(field.result_key(), "count");

        let aliased = Field::new("count").alias("ticks");
        assert_eq!(aliased.result_key(), "ticks");
    }

    #[test]
    fn test_operation_selection() {
        let document = Document::new()
            .with_operation(OperationDefinition::subscription().named("A"))
            .with_operation(OperationDefinition::subscription().named("B"));

        assert_eq!(document.operation(Some("B")).unwrap().name.as_deref(), Some("B"));
        assert_eq!(
            document.operation(Some("C")),
            Err(DocumentError::UnknownOperation("C".to_string()))
        );
        assert_eq!(document.operation(None), Err(DocumentError::AmbiguousOperation));
        assert_eq!(Document::new().operation(None), Err(DocumentError::NoOperation));
    }

    #[test]
    fn test_input_value_resolution() {
        let mut variables = IndexMap::new();
        variables.insert("topic".to_string(), json!("news"));

        let mut object = IndexMap::new();
        object.insert("topic".to_string(), InputValue::variable("topic"));
        object.insert("limit".to_string(), InputValue::from(json!(3)));
        let value = InputValue::Object(object);

        assert_eq!(value.resolve(&variables), json!({"topic": "news", "limit": 3}));
        assert_eq!(InputValue::variable("missing").resolve(&variables), json!(null));
    }

    #[test]
    fn test_coerce_variables() {
        let op = OperationDefinition::subscription()
            .variable(VariableDefinition::new("limit", TypeRef::named("Int")).default_value(json!(10)))
            .variable(VariableDefinition::new("room", TypeRef::non_null(TypeRef::named("ID"))));

        let mut provided = IndexMap::new();
        provided.insert("room".to_string(), json!("lobby"));
        let coerced = op.coerce_variables(&provided).unwrap();
        assert_eq!(coerced["limit"], json!(10));
        assert_eq!(coerced["room"], json!("lobby"));

        let err = op.coerce_variables(&IndexMap::new()).unwrap_err();
        assert_eq!(
            err,
            DocumentError::MissingVariable {
                name: "room".to_string(),
                ty: "ID!".to_string()
            }
        );
    }
}
