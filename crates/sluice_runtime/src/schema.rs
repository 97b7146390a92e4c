//! Schema definition.
//!
//! The runtime only needs enough of the type system to look up field
//! definitions, to tell object types from abstract ones, and to know where a
//! value is declared non-null.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the introspection field every object type answers.
pub const TYPENAME_FIELD: &str = "__typename";

/// Built-in scalar names.
pub const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

/// A GraphQL schema.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    pub query_type: Option<String>,
    pub mutation_type: Option<String>,
    pub subscription_type: Option<String>,
    pub types: IndexMap<String, TypeDef>,
}

impl Schema {
    /// Creates a new empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Gets a type by name.
    pub fn get_type(&self, name: &str) -> Option<&TypeDef> {
        self.types.get(name)
    }

    /// Returns all types.
    pub fn types(&self) -> impl Iterator<Item = (&String, &TypeDef)> {
        self.types.iter()
    }

    /// Gets an object type by name.
    pub fn object_type(&self, name: &str) -> Option<&ObjectDef> {
        match self.types.get(name) {
            Some(TypeDef::Object(object)) => Some(object),
            _ => None,
        }
    }

    /// Looks up the definition of `field_name` on the object or interface
    /// type `parent_type`.
    pub fn field_definition(&self, parent_type: &str, field_name: &str) -> Option<FieldDef> {
        if field_name == TYPENAME_FIELD {
            return Some(FieldDef::new(
                TYPENAME_FIELD,
                TypeRef::non_null(TypeRef::named("String")),
            ));
        }
        match self.types.get(parent_type)? {
            TypeDef::Object(object) => object.fields.get(field_name).cloned(),
            TypeDef::Interface(iface) => iface.fields.get(field_name).cloned(),
            _ => None,
        }
    }

    /// Returns true if `object_type` is a possible runtime type of the
    /// abstract type `abstract_type`.
    pub fn is_possible_type(&self, abstract_type: &str, object_type: &str) -> bool {
        match self.types.get(abstract_type) {
            Some(TypeDef::Union(union_def)) => union_def.members.iter().any(|m| m == object_type),
            Some(TypeDef::Interface(_)) => self
                .object_type(object_type)
                .is_some_and(|o| o.implements.iter().any(|i| i == abstract_type)),
            _ => false,
        }
    }

    /// Returns true if a fragment with `type_condition` applies to values of
    /// `object_type`.
    pub fn fragment_applies(&self, type_condition: &str, object_type: &str) -> bool {
        type_condition == object_type || self.is_possible_type(type_condition, object_type)
    }
}

/// A type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TypeDef {
    Scalar(ScalarDef),
    Object(ObjectDef),
    Interface(InterfaceDef),
    Union(UnionDef),
    Enum(EnumDef),
    InputObject(InputObjectDef),
}

impl TypeDef {
    pub fn name(&self) -> &str {
        match self {
            Self::Scalar(s) => &s.name,
            Self::Object(o) => &o.name,
            Self::Interface(i) => &i.name,
            Self::Union(u) => &u.name,
            Self::Enum(e) => &e.name,
            Self::InputObject(i) => &i.name,
        }
    }

    /// Interfaces and unions.
    pub fn is_abstract(&self) -> bool {
        matches!(self, Self::Interface(_) | Self::Union(_))
    }
}

/// Scalar type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalarDef {
    pub name: String,
    pub description: Option<String>,
}

impl ScalarDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
        }
    }
}

/// Object type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, FieldDef>,
    pub implements: Vec<String>,
}

impl ObjectDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: IndexMap::new(),
            implements: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    pub fn implements(mut self, interface: impl Into<String>) -> Self {
        self.implements.push(interface.into());
        self
    }
}

/// Interface type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterfaceDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, FieldDef>,
}

impl InterfaceDef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            fields: IndexMap::new(),
        }
    }

    pub fn field(mut self, field: FieldDef) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }
}

/// Union type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnionDef {
    pub name: String,
    pub description: Option<String>,
    pub members: Vec<String>,
}

impl UnionDef {
    pub fn new(name: impl Into<String>, members: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            description: None,
            members: members.into_iter().map(Into::into).collect(),
        }
    }
}

/// Enum type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnumDef {
    pub name: String,
    pub description: Option<String>,
    pub values: Vec<String>,
}

impl EnumDef {
    pub fn new(name: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            name: name.into(),
            description: None,
            values: values.into_iter().map(Into::into).collect(),
        }
    }
}

/// Input object type definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputObjectDef {
    pub name: String,
    pub description: Option<String>,
    pub fields: IndexMap<String, InputValueDef>,
}

/// Field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub arguments: IndexMap<String, InputValueDef>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            description: None,
            ty,
            arguments: IndexMap::new(),
        }
    }

    pub fn argument(mut self, argument: InputValueDef) -> Self {
        self.arguments.insert(argument.name.clone(), argument);
        self
    }
}

/// Argument or input field definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputValueDef {
    pub name: String,
    pub description: Option<String>,
    pub ty: TypeRef,
    pub default_value: Option<serde_json::Value>,
}

impl InputValueDef {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Self {
            name: name.into(),
            description: None,
            ty,
            default_value: None,
        }
    }

    pub fn default_value(mut self, value: serde_json::Value) -> Self {
        self.default_value = Some(value);
        self
    }
}

/// Type reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    pub fn list(inner: TypeRef) -> Self {
        Self::List(Box::new(inner))
    }

    pub fn non_null(inner: TypeRef) -> Self {
        Self::NonNull(Box::new(inner))
    }

    pub fn is_non_null(&self) -> bool {
        matches!(self, Self::NonNull(_))
    }

    /// Strips one level of non-null wrapping.
    pub fn unwrap_non_null(&self) -> &TypeRef {
        match self {
            Self::NonNull(inner) => inner,
            other => other,
        }
    }

    /// The innermost named type.
    pub fn named_type(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::List(inner) | Self::NonNull(inner) => inner.named_type(),
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{}", name),
            Self::List(inner) => write!(f, "[{}]", inner),
            Self::NonNull(inner) => write!(f, "{}!", inner),
        }
    }
}

/// Schema builder.
#[derive(Debug, Default)]
pub struct SchemaBuilder {
    schema: Schema,
}

impl SchemaBuilder {
    /// Creates a new schema builder.
    pub fn new() -> Self {
        let mut builder = Self::default();
        // Add built-in scalars
        for name in BUILTIN_SCALARS {
            builder.schema.types.insert(
                name.to_string(),
                TypeDef::Scalar(ScalarDef {
                    name: name.to_string(),
                    description: Some(format!("Built-in {name} scalar")),
                }),
            );
        }
        builder
    }

    /// Sets the query type.
    pub fn query_type(mut self, name: impl Into<String>) -> Self {
        self.schema.query_type = Some(name.into());
        self
    }

    /// Sets the mutation type.
    pub fn mutation_type(mut self, name: impl Into<String>) -> Self {
        self.schema.mutation_type = Some(name.into());
        self
    }

    /// Sets the subscription type.
    pub fn subscription_type(mut self, name: impl Into<String>) -> Self {
        self.schema.subscription_type = Some(name.into());
        self
    }

    /// Adds a type.
    pub fn add_type(mut self, type_def: TypeDef) -> Self {
        self.schema
            .types
            .insert(type_def.name().to_string(), type_def);
        self
    }

    /// Adds an object type.
    pub fn object(self, object: ObjectDef) -> Self {
        self.add_type(TypeDef::Object(object))
    }

    /// Builds the schema.
    pub fn build(self) -> Schema {
        self.schema
    }
}
