//! Schema adapter (spec §4.1): canonical schema types, document validation,
//! equality, and native (MongoDB JSON-Schema-like) validator synthesis.

mod native_validator;
mod types;
mod validate;

pub use native_validator::to_native_validator;
pub use types::{schema_equal, Constraints, FieldSchema, LiteralValue, Schema, SchemasDefinition};
pub use validate::{validate, ValidationIssue};

/// Dot-path index describing a field, used by the simulator's `mark_as_multimodel`
/// ambiguity check and by index-hint derivation in the applier.
pub fn keys_of(schema: &Schema) -> std::collections::BTreeSet<String> {
    schema.key_set()
}

/// An index the applier should ensure exists, derived from top-level field
/// constraints (spec §4.7 "derived from schema annotations: unique, sparse,
/// compound hints"). Only top-level fields are considered; compound indexes
/// are left to manual `update_indexes` authoring outside this derivation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedIndex {
    pub field: String,
    pub unique: bool,
}

pub fn derive_indexes(schema: &Schema) -> Vec<DerivedIndex> {
    let mut out = Vec::new();
    for (name, field) in schema.fields() {
        let constraints = top_level_constraints(field);
        if let Some(c) = constraints {
            if c.unique || c.indexed {
                out.push(DerivedIndex { field: name.clone(), unique: c.unique });
            }
        }
    }
    out
}

fn top_level_constraints(field: &FieldSchema) -> Option<&Constraints> {
    match field {
        FieldSchema::String(c) | FieldSchema::Number(c) => Some(c),
        FieldSchema::Optional(inner) | FieldSchema::Nullable(inner) => top_level_constraints(inner),
        _ => None,
    }
}
