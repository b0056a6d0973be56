//! Chain validator (spec §4.5): cross-migration schema-change detection,
//! orphaned-type detection, and post-simulation schema re-validation. Runs
//! alongside the simulator during `check`.

use bson::Document;

use crate::chain::MigrationDefinition;
use crate::error::{EngineError, EngineResult};
use crate::ir::Operation;
use crate::schema::{schema_equal, validate, Schema, SchemasDefinition};
use crate::simulator::{self, SimState};

/// Validates an entire chain: adjacent schema-change guards, orphaned types,
/// and (via the simulator) post-transform document validity. Returns the
/// final simulated state so callers can further check it against the
/// project's declared schemas with [`check_leaf_matches_project`].
pub fn validate_chain(chain: &[MigrationDefinition]) -> EngineResult<SimState> {
    let mut state = SimState::empty();
    let mut prev: Option<&MigrationDefinition> = None;

    for migration in chain {
        if let Some(prev) = prev {
            check_adjacent_schemas(prev, migration)?;
        }

        let state_before = state.clone();
        let outcome = simulator::validate_migration(migration, chain, Some(state))?;
        state = outcome.state_after;

        revalidate_against_schema(&state, &migration.schemas, &migration.id)?;
        simulator::prove_reversibility(migration, &state_before)?;

        prev = Some(migration);
    }

    Ok(state)
}

/// For every collection/multi-collection type declared in `curr`, if `prev`
/// declared a different schema for the same name, require a corresponding
/// transform operation in `curr`'s compiled migration (spec §4.5 rules 1-3).
fn check_adjacent_schemas(prev: &MigrationDefinition, curr: &MigrationDefinition) -> EngineResult<()> {
    let compiled = curr.compile()?;

    for (name, curr_schema) in &curr.schemas.collections {
        if let Some(prev_schema) = prev.schemas.collections.get(name) {
            if !schema_equal(prev_schema, curr_schema) && !has_transform_collection(&compiled, name) {
                return Err(EngineError::UnguardedSchemaChange {
                    name: name.clone(),
                    prev_id: prev.id.clone(),
                    curr_id: curr.id.clone(),
                    field_diff: diff_keys(prev_schema, curr_schema),
                });
            }
        }
    }

    for (mc_name, prev_types) in &prev.schemas.multi_collections {
        let curr_types = curr.schemas.multi_collections.get(mc_name);
        for (doc_type, prev_schema) in prev_types {
            match curr_types.and_then(|t| t.get(doc_type)) {
                None => {
                    return Err(EngineError::OrphanedType {
                        name: mc_name.clone(),
                        doc_type: doc_type.clone(),
                        curr_id: curr.id.clone(),
                    })
                }
                Some(curr_schema) => {
                    if !schema_equal(prev_schema, curr_schema) && !has_transform_multicollection(&compiled, mc_name, doc_type) {
                        return Err(EngineError::UnguardedSchemaChange {
                            name: format!("{mc_name}.{doc_type}"),
                            prev_id: prev.id.clone(),
                            curr_id: curr.id.clone(),
                            field_diff: diff_keys(prev_schema, curr_schema),
                        });
                    }
                }
            }
        }
    }

    Ok(())
}

fn has_transform_collection(compiled: &crate::ir::CompiledMigration, name: &str) -> bool {
    compiled
        .operations
        .iter()
        .any(|op| matches!(op, Operation::TransformCollection { name: n, .. } if n == name))
}

fn has_transform_multicollection(compiled: &crate::ir::CompiledMigration, name: &str, doc_type: &str) -> bool {
    compiled.operations.iter().any(|op| {
        matches!(op, Operation::TransformMulticollectionType { name: n, doc_type: t, .. } if n == name && t == doc_type)
    })
}

fn diff_keys(prev: &Schema, curr: &Schema) -> String {
    let prev_keys = prev.keys_of();
    let curr_keys = curr.keys_of();
    let added: Vec<_> = curr_keys.keys().filter(|k| !prev_keys.contains_key(*k)).cloned().collect();
    let removed: Vec<_> = prev_keys.keys().filter(|k| !curr_keys.contains_key(*k)).cloned().collect();
    format!("added: {added:?}, removed: {removed:?}")
}

/// Re-validates every document in `state` against `schemas`' declared
/// schemas: plain collections, multi-collection types (dispatched by `_type`
/// within `state.collections[name]`), and multi-model instance types
/// (dispatched by `_type` within `state.multi_instances[instance]`, instance
/// matched to its declaring model the same way
/// `src/simulator/forward.rs::instance_belongs_to_model` does) — spec §4.5
/// rule 4, testable property 6.
fn revalidate_against_schema(state: &SimState, schemas: &SchemasDefinition, migration_id: &str) -> EngineResult<()> {
    for (name, schema) in &schemas.collections {
        let Some(docs) = state.collections.get(name) else { continue };
        for doc in docs {
            validate_one(doc, schema, name, migration_id)?;
        }
    }

    for (name, types) in &schemas.multi_collections {
        let Some(docs) = state.collections.get(name) else { continue };
        for doc in docs {
            let Ok(doc_type) = doc.get_str("_type") else { continue };
            let Some(schema) = types.get(doc_type) else { continue };
            validate_one(doc, schema, &format!("{name}.{doc_type}"), migration_id)?;
        }
    }

    for (instance, docs) in &state.multi_instances {
        let Some((_, types)) = schemas.multi_models.iter().find(|(model, _)| instance_belongs_to_model(instance, model)) else {
            continue;
        };
        for doc in docs {
            let Ok(doc_type) = doc.get_str("_type") else { continue };
            let Some(schema) = types.get(doc_type) else { continue };
            validate_one(doc, schema, &format!("{instance}.{doc_type}"), migration_id)?;
        }
    }

    Ok(())
}

fn validate_one(doc: &Document, schema: &Schema, name: &str, migration_id: &str) -> EngineResult<()> {
    if let Err(issues) = validate(doc, schema) {
        return Err(EngineError::PostTransformValidation {
            migration_id: migration_id.to_string(),
            name: name.to_string(),
            issues: issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", "),
        });
    }
    Ok(())
}

/// Duplicated from `src/simulator/forward.rs` (`pub(super)` there, so not
/// reachable from here) rather than widened to `pub(crate)` — kept local
/// since `applier.rs`/`catchup.rs` each keep their own copy too.
fn instance_belongs_to_model(instance_name: &str, model: &str) -> bool {
    instance_name == model || instance_name.starts_with(&format!("{model}_"))
}

/// Validates the leaf migration's schemas against the project's declared
/// schemas (spec §4.5 tail check).
pub fn check_leaf_matches_project(chain: &[MigrationDefinition], project: &SchemasDefinition) -> EngineResult<()> {
    let Some(leaf) = chain.last() else { return Ok(()) };

    let mut missing = Vec::new();
    let mut extra = Vec::new();

    for name in project.collections.keys() {
        if !leaf.schemas.collections.contains_key(name) {
            missing.push(format!("collections.{name}"));
        }
    }
    for name in leaf.schemas.collections.keys() {
        if !project.collections.contains_key(name) {
            extra.push(format!("collections.{name}"));
        }
    }
    for (name, schema) in &project.collections {
        if let Some(leaf_schema) = leaf.schemas.collections.get(name) {
            if !schema_equal(schema, leaf_schema) {
                missing.push(format!("collections.{name} (schema differs)"));
            }
        }
    }

    if !missing.is_empty() || !extra.is_empty() {
        return Err(EngineError::LeafSchemaMismatch { detail: format!("missing: {missing:?}, extra: {extra:?}") });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::MigrationBuilder;
    use crate::schema::{Constraints, FieldSchema};
    use std::sync::Arc;

    fn schema_with(fields: &[(&str, FieldSchema)]) -> Schema {
        let mut s = Schema::new();
        for (name, f) in fields {
            s = s.with_field(*name, f.clone());
        }
        s
    }

    #[test]
    fn unguarded_schema_change_is_rejected() {
        let mut root_schemas = SchemasDefinition::default();
        root_schemas.collections.insert("users".into(), schema_with(&[("name", FieldSchema::String(Constraints::default()))]));
        let root = MigrationDefinition {
            id: "root".into(),
            name: "root".into(),
            parent: None,
            schemas: Arc::new(root_schemas),
            migrate: Arc::new(|b: &mut MigrationBuilder| {
                b.create_collection("users")?;
                Ok(())
            }),
        };

        let mut child_schemas = SchemasDefinition::default();
        child_schemas.collections.insert(
            "users".into(),
            schema_with(&[("name", FieldSchema::String(Constraints::default())), ("age", FieldSchema::Number(Constraints::default()))]),
        );
        let child = MigrationDefinition {
            id: "child".into(),
            name: "child".into(),
            parent: Some("root".into()),
            schemas: Arc::new(child_schemas),
            migrate: Arc::new(|_b: &mut MigrationBuilder| Ok(())),
        };

        let err = validate_chain(&[root, child]).unwrap_err();
        assert!(matches!(err, EngineError::UnguardedSchemaChange { .. }));
    }

    #[test]
    fn guarded_schema_change_passes() {
        let mut root_schemas = SchemasDefinition::default();
        root_schemas.collections.insert("users".into(), schema_with(&[("name", FieldSchema::String(Constraints::default()))]));
        let root = MigrationDefinition {
            id: "root".into(),
            name: "root".into(),
            parent: None,
            schemas: Arc::new(root_schemas),
            migrate: Arc::new(|b: &mut MigrationBuilder| {
                b.create_collection("users")?;
                Ok(())
            }),
        };

        let mut child_schemas = SchemasDefinition::default();
        child_schemas.collections.insert(
            "users".into(),
            schema_with(&[("name", FieldSchema::String(Constraints::default())), ("age", FieldSchema::Number(Constraints::default()))]),
        );
        let child = MigrationDefinition {
            id: "child".into(),
            name: "child".into(),
            parent: Some("root".into()),
            schemas: Arc::new(child_schemas),
            migrate: Arc::new(|b: &mut MigrationBuilder| {
                b.transform_collection(
                    "users",
                    |d| {
                        let mut d = d.clone();
                        d.insert("age", 0i32);
                        Ok(d)
                    },
                    |d| {
                        let mut d = d.clone();
                        d.remove("age");
                        Ok(d)
                    },
                    false,
                    false,
                )?;
                Ok(())
            }),
        };

        assert!(validate_chain(&[root, child]).is_ok());
    }

    #[test]
    fn invalid_multicollection_document_is_caught_after_transform() {
        let mut root_schemas = SchemasDefinition::default();
        root_schemas
            .multi_collections
            .entry("content".into())
            .or_default()
            .insert("article".into(), schema_with(&[("title", FieldSchema::String(Constraints::default()))]));
        let root = MigrationDefinition {
            id: "root".into(),
            name: "root".into(),
            parent: None,
            schemas: Arc::new(root_schemas.clone()),
            migrate: Arc::new(|b: &mut MigrationBuilder| {
                b.create_multicollection("content")?;
                b.seed_multicollection_type("content", "article", vec![bson::doc! { "title": "hello" }])?;
                Ok(())
            }),
        };

        let mut broken_schemas = root_schemas;
        broken_schemas
            .multi_collections
            .get_mut("content")
            .unwrap()
            .insert("article".into(), schema_with(&[("headline", FieldSchema::String(Constraints::default()))]));
        let broken = MigrationDefinition {
            id: "broken".into(),
            name: "broken transform".into(),
            parent: Some("root".into()),
            schemas: Arc::new(broken_schemas),
            migrate: Arc::new(|b: &mut MigrationBuilder| {
                // Renames the field to "heading", never matching the declared
                // "headline" — the transform is present so the adjacent-schema
                // guard passes, but the result is still invalid.
                b.transform_multicollection_type(
                    "content",
                    "article",
                    |d| {
                        let mut d = d.clone();
                        if let Some(title) = d.remove("title") {
                            d.insert("heading", title);
                        }
                        Ok(d)
                    },
                    |d| {
                        let mut d = d.clone();
                        if let Some(heading) = d.remove("heading") {
                            d.insert("title", heading);
                        }
                        Ok(d)
                    },
                    false,
                    false,
                )?;
                Ok(())
            }),
        };

        let err = validate_chain(&[root, broken]).unwrap_err();
        assert!(matches!(err, EngineError::PostTransformValidation { .. }));
    }
}
