//! Field collection.
//!
//! Turns a list of selections into a [`MergedSelectionSet`]: fields grouped
//! by response key in first-occurrence order, fragments flattened, and
//! `@skip`/`@include` applied.

use crate::query::{Directive, Field, FragmentDefinition, InputValue, Selection};
use crate::schema::Schema;
use indexmap::{IndexMap, IndexSet};
use serde_json::Value;

/// All field nodes sharing one response key.
///
/// Never empty: it is created from its first field.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedField {
    fields: Vec<Field>,
}

impl MergedField {
    pub fn new(field: Field) -> Self {
        Self {
            fields: vec![field],
        }
    }

    pub fn push(&mut self, field: Field) {
        self.fields.push(field);
    }

    /// The first field node. Arguments and name are taken from it.
    pub fn single_field(&self) -> &Field {
        &self.fields[0]
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn name(&self) -> &str {
        &self.single_field().name
    }

    pub fn result_key(&self) -> &str {
        self.single_field().result_key()
    }

    /// Sub-selections of every merged node, in document order.
    pub fn sub_selections(&self) -> Vec<Selection> {
        self.fields
            .iter()
            .flat_map(|f| f.selection_set.iter().cloned())
            .collect()
    }
}

/// Fields keyed by response key, in first-occurrence order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergedSelectionSet {
    fields: IndexMap<String, MergedField>,
}

impl MergedSelectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a field, merging it with earlier fields of the same response key.
    pub fn insert(&mut self, field: Field) {
        let key = field.result_key().to_string();
        match self.fields.get_mut(&key) {
            Some(merged) => merged.push(field),
            None => {
                self.fields.insert(key, MergedField::new(field));
            }
        }
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn get(&self, key: &str) -> Option<&MergedField> {
        self.fields.get(key)
    }

    /// The first field in insertion order.
    pub fn first(&self) -> Option<&MergedField> {
        self.fields.first().map(|(_, field)| field)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &MergedField)> {
        self.fields.iter()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Collects the fields of a selection set for a given object type.
#[derive(Debug, Clone, Copy)]
pub struct FieldCollector<'a> {
    schema: &'a Schema,
    fragments: &'a IndexMap<String, FragmentDefinition>,
    variables: &'a IndexMap<String, Value>,
}

impl<'a> FieldCollector<'a> {
    pub fn new(
        schema: &'a Schema,
        fragments: &'a IndexMap<String, FragmentDefinition>,
        variables: &'a IndexMap<String, Value>,
    ) -> Self {
        Self {
            schema,
            fragments,
            variables,
        }
    }

    /// Collects `selections` as seen from values of `object_type`.
    pub fn collect_fields(&self, object_type: &str, selections: &[Selection]) -> MergedSelectionSet {
        let mut merged = MergedSelectionSet::new();
        let mut visited = IndexSet::new();
        self.collect_into(object_type, selections, &mut merged, &mut visited);
        merged
    }

    fn collect_into(
        &self,
        object_type: &str,
        selections: &[Selection],
        merged: &mut MergedSelectionSet,
        visited: &mut IndexSet<String>,
    ) {
        for selection in selections {
            if !self.should_include(selection.directives()) {
                continue;
            }
            match selection {
                Selection::Field(field) => merged.insert(field.clone()),
                Selection::InlineFragment(fragment) => {
                    let applies = fragment
                        .type_condition
                        .as_deref()
                        .map_or(true, |cond| self.schema.fragment_applies(cond, object_type));
                    if applies {
                        self.collect_into(object_type, &fragment.selection_set, merged, visited);
                    }
                }
                Selection::FragmentSpread(spread) => {
                    if !visited.insert(spread.name.clone()) {
                        continue;
                    }
                    let Some(fragment) = self.fragments.get(&spread.name) else {
                        continue;
                    };
                    if self
                        .schema
                        .fragment_applies(&fragment.type_condition, object_type)
                    {
                        self.collect_into(object_type, &fragment.selection_set, merged, visited);
                    }
                }
            }
        }
    }

    /// Evaluates `@skip` and `@include`.
    fn should_include(&self, directives: &[Directive]) -> bool {
        let condition = |name: &str| {
            directives
                .iter()
                .find(|d| d.name == name)
                .and_then(|d| d.arguments.get("if"))
                .map(|value| self.condition_value(value))
        };
        if condition("skip") == Some(true) {
            return false;
        }
        condition("include") != Some(false)
    }

    fn condition_value(&self, value: &InputValue) -> bool {
        matches!(value.resolve(self.variables), Value::Bool(true))
    }
}
