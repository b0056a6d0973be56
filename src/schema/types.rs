//! Schema type taxonomy (spec §3): a structural description of a document
//! used for equality comparison, document validation, and native validator
//! synthesis.

use std::collections::{BTreeMap, BTreeSet};

/// Per-field constraints. Combination rules live in [`super::validate`] and
/// [`super::native_validator`]: `min*` takes the maximum across declarations,
/// `max*` takes the minimum, `pattern` combines via lookahead.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Constraints {
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub non_empty: bool,
    /// Index hints consumed by the live applier's index-sync step (spec
    /// §4.7): `unique` maps to a unique index, `indexed` to a plain one.
    pub unique: bool,
    pub indexed: bool,
}

impl Constraints {
    pub fn merge(&self, other: &Constraints) -> Constraints {
        Constraints {
            min_value: max_option(self.min_value, other.min_value),
            max_value: min_option(self.max_value, other.max_value),
            min_length: max_option_usize(self.min_length, other.min_length),
            max_length: min_option_usize(self.max_length, other.max_length),
            pattern: match (&self.pattern, &other.pattern) {
                (Some(a), Some(b)) if a != b => Some(format!("(?={a})(?={b})")),
                (Some(a), _) => Some(a.clone()),
                (None, b) => b.clone(),
            },
            non_empty: self.non_empty || other.non_empty,
            unique: self.unique || other.unique,
            indexed: self.indexed || other.indexed,
        }
    }
}

fn max_option(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.max(y)),
        (Some(x), None) => Some(x),
        (None, y) => y,
    }
}

fn min_option(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    match (a, b) {
        (Some(x), Some(y)) => Some(x.min(y)),
        (Some(x), None) => Some(x),
        (None, y) => y,
    }
}

fn max_option_usize(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    max_option(a.map(|v| v as f64), b.map(|v| v as f64)).map(|v| v as usize)
}

fn min_option_usize(a: Option<usize>, b: Option<usize>) -> Option<usize> {
    min_option(a.map(|v| v as f64), b.map(|v| v as f64)).map(|v| v as usize)
}

/// A field (or nested) schema. Recursive by `Box` for nested/array/record/union.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldSchema {
    String(Constraints),
    Number(Constraints),
    Boolean,
    Date,
    Null,
    Literal(LiteralValue),
    Enum(Vec<String>),
    Object(Schema),
    Array(Box<FieldSchema>),
    /// A map from keys matching `key_pattern` to a homogeneous value schema.
    Record { key_pattern: String, value: Box<FieldSchema> },
    Optional(Box<FieldSchema>),
    Nullable(Box<FieldSchema>),
    Union(Vec<FieldSchema>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    Str(String),
    Num(f64),
    Bool(bool),
}

/// An ordered field map. Field order is preserved for builder/IR purposes but
/// equality (`keys_of`) is order-independent, per spec §3.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Schema {
    fields: Vec<(String, FieldSchema)>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.fields.push((name.into(), schema));
        self
    }

    pub fn fields(&self) -> &[(String, FieldSchema)] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldSchema> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, s)| s)
    }

    /// Flattened dot-path ⇒ leaf-type-tag set, used for equality (spec §3,
    /// testable property 2).
    pub fn keys_of(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        collect_keys("", &self.fields, &mut out);
        out
    }

    pub fn key_set(&self) -> BTreeSet<String> {
        self.keys_of().into_keys().collect()
    }
}

fn collect_keys(prefix: &str, fields: &[(String, FieldSchema)], out: &mut BTreeMap<String, String>) {
    for (name, schema) in fields {
        let path = if prefix.is_empty() { name.clone() } else { format!("{prefix}.{name}") };
        collect_field_keys(&path, schema, out);
    }
}

fn collect_field_keys(path: &str, schema: &FieldSchema, out: &mut BTreeMap<String, String>) {
    match schema {
        FieldSchema::Object(inner) => collect_keys(path, &inner.fields, out),
        FieldSchema::Array(inner) => collect_field_keys(&format!("{path}[]"), inner, out),
        FieldSchema::Record { value, .. } => collect_field_keys(&format!("{path}.*"), value, out),
        FieldSchema::Optional(inner) | FieldSchema::Nullable(inner) => collect_field_keys(path, inner, out),
        FieldSchema::Union(variants) => {
            for (i, v) in variants.iter().enumerate() {
                collect_field_keys(&format!("{path}#{i}"), v, out);
            }
        }
        leaf => {
            out.insert(path.to_string(), leaf_tag(leaf).to_string());
        }
    }
}

fn leaf_tag(schema: &FieldSchema) -> &'static str {
    match schema {
        FieldSchema::String(_) => "string",
        FieldSchema::Number(_) => "number",
        FieldSchema::Boolean => "boolean",
        FieldSchema::Date => "date",
        FieldSchema::Null => "null",
        FieldSchema::Literal(_) => "literal",
        FieldSchema::Enum(_) => "enum",
        _ => "compound",
    }
}

/// Equality is flat-key equality, per spec §3 and testable property 2.
pub fn schema_equal(a: &Schema, b: &Schema) -> bool {
    a.keys_of() == b.keys_of()
}

/// Bundle of schemas declared by a single migration (spec §3).
#[derive(Debug, Clone, Default)]
pub struct SchemasDefinition {
    pub collections: BTreeMap<String, Schema>,
    pub multi_collections: BTreeMap<String, BTreeMap<String, Schema>>,
    pub multi_models: BTreeMap<String, BTreeMap<String, Schema>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn simple(name: &str) -> Schema {
        Schema::new().with_field(name, FieldSchema::String(Constraints::default()))
    }

    #[test]
    fn equal_schemas_have_same_keys() {
        let a = simple("name");
        let b = simple("name");
        assert!(schema_equal(&a, &b));
    }

    #[test]
    fn differing_field_changes_equality() {
        let a = simple("name");
        let b = Schema::new().with_field("age", FieldSchema::Number(Constraints::default()));
        assert!(!schema_equal(&a, &b));
    }

    #[test]
    fn nested_object_keys_are_flattened() {
        let inner = Schema::new().with_field("street", FieldSchema::String(Constraints::default()));
        let s = Schema::new().with_field("address", FieldSchema::Object(inner));
        let keys = s.key_set();
        assert!(keys.contains("address.street"));
    }

    #[test]
    fn constraint_merge_takes_most_restrictive() {
        let a = Constraints { min_length: Some(3), max_length: Some(10), ..Default::default() };
        let b = Constraints { min_length: Some(5), max_length: Some(8), ..Default::default() };
        let merged = a.merge(&b);
        assert_eq!(merged.min_length, Some(5));
        assert_eq!(merged.max_length, Some(8));
    }
}
