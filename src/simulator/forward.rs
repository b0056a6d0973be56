//! Forward dispatch over the operation IR (spec §4.4).

use bson::{oid::ObjectId, Bson, Document};

use crate::error::{EngineError, EngineResult};
use crate::ir::Operation;
use crate::schema::{validate, Schema, SchemasDefinition};

use super::state::SimState;

pub struct ApplyContext<'a> {
    pub migration_id: &'a str,
    pub schemas: &'a SchemasDefinition,
    /// When false, per-document schema failures during seed/transform retain
    /// the original document instead of aborting (spec §4.4).
    pub strict: bool,
}

pub fn apply_operation(state: &mut SimState, op: &Operation, ctx: &ApplyContext) -> EngineResult<()> {
    match op {
        Operation::CreateCollection { name, .. } => {
            create_collection(state, name, ctx)?;
        }
        Operation::CreateMulticollection { name, .. } => {
            create_collection(state, name, ctx)?;
        }
        Operation::CreateMultimodelInstance { instance, .. } => {
            if ctx.strict && state.multi_instances.contains_key(instance) {
                return Err(EngineError::SimulationForward {
                    migration_id: ctx.migration_id.to_string(),
                    detail: format!("multi-model instance {instance} already exists"),
                });
            }
            state.multi_instances.entry(instance.clone()).or_default();
        }
        Operation::SeedCollection { name, documents, schema } => {
            let docs = state.collections.entry(name.clone()).or_default();
            for d in documents {
                docs.push(seed_doc(d, schema, ctx)?);
            }
        }
        Operation::SeedMulticollectionType { name, doc_type, documents, schema } => {
            let docs = state.collections.entry(name.clone()).or_default();
            for d in documents {
                let mut d = seed_doc(d, schema, ctx)?;
                d.insert("_type", doc_type.clone());
                docs.push(d);
            }
        }
        Operation::SeedMultimodelInstanceType { instance, doc_type, documents, schema, .. } => {
            let docs = state.multi_instances.entry(instance.clone()).or_default();
            for d in documents {
                let mut d = seed_doc(d, schema, ctx)?;
                d.insert("_type", doc_type.clone());
                docs.push(d);
            }
        }
        Operation::SeedMultimodelInstancesType { model, doc_type, documents, schema, .. } => {
            for (name, docs) in state.multi_instances.iter_mut() {
                if !instance_belongs_to_model(name, model) {
                    continue;
                }
                for d in documents {
                    let mut d = seed_doc(d, schema, ctx)?;
                    d.insert("_type", doc_type.clone());
                    docs.push(d);
                }
            }
        }
        Operation::TransformCollection { name, transform, .. } => {
            if let Some(docs) = state.collections.get_mut(name) {
                transform_all(docs, &transform.up, ctx)?;
            }
        }
        Operation::TransformMulticollectionType { name, doc_type, transform, .. } => {
            if let Some(docs) = state.collections.get_mut(name) {
                transform_matching(docs, doc_type, &transform.up, ctx)?;
            }
        }
        Operation::TransformMultimodelInstanceType { instance, doc_type, transform, .. } => {
            if let Some(docs) = state.multi_instances.get_mut(instance) {
                transform_matching(docs, doc_type, &transform.up, ctx)?;
            }
        }
        Operation::TransformMultimodelInstancesType { model, doc_type, transform, .. } => {
            for (name, docs) in state.multi_instances.iter_mut() {
                if !instance_belongs_to_model(name, model) {
                    continue;
                }
                transform_matching(docs, doc_type, &transform.up, ctx)?;
            }
        }
        Operation::UpdateIndexes { .. } => {
            // Indexes have no effect on simulated document state.
        }
        Operation::MarkAsMultimodel { name, model } => {
            mark_as_multimodel(state, name, model, ctx)?;
        }
    }
    Ok(())
}

/// Initializes an empty collection, failing if it already exists in strict
/// mode (spec §4.4). The idempotent "create if missing" behavior belongs to
/// the live applier, not the simulator.
fn create_collection(state: &mut SimState, name: &str, ctx: &ApplyContext) -> EngineResult<()> {
    if ctx.strict && state.collections.contains_key(name) {
        return Err(EngineError::SimulationForward {
            migration_id: ctx.migration_id.to_string(),
            detail: format!("collection {name} already exists"),
        });
    }
    state.collections.entry(name.to_string()).or_default();
    Ok(())
}

fn seed_doc(doc: &Document, schema: &Schema, ctx: &ApplyContext) -> EngineResult<Document> {
    let mut doc = doc.clone();
    if !doc.contains_key("_id") {
        doc.insert("_id", Bson::ObjectId(ObjectId::new()));
    }
    if let Err(issues) = validate(&doc, schema) {
        if ctx.strict {
            return Err(EngineError::SimulationForward {
                migration_id: ctx.migration_id.to_string(),
                detail: issues.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", "),
            });
        }
    }
    Ok(doc)
}

fn transform_all(
    docs: &mut [Document],
    up: &crate::ir::TransformFn,
    ctx: &ApplyContext,
) -> EngineResult<()> {
    for d in docs.iter_mut() {
        match up(d) {
            Ok(transformed) => *d = transformed,
            Err(e) => {
                if ctx.strict {
                    return Err(EngineError::SimulationForward {
                        migration_id: ctx.migration_id.to_string(),
                        detail: e.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

fn transform_matching(
    docs: &mut [Document],
    doc_type: &str,
    up: &crate::ir::TransformFn,
    ctx: &ApplyContext,
) -> EngineResult<()> {
    for d in docs.iter_mut() {
        if d.get_str("_type").ok() != Some(doc_type) {
            continue;
        }
        match up(d) {
            Ok(mut transformed) => {
                transformed.insert("_type", doc_type.to_string());
                *d = transformed;
            }
            Err(e) => {
                if ctx.strict {
                    return Err(EngineError::SimulationForward {
                        migration_id: ctx.migration_id.to_string(),
                        detail: e.to_string(),
                    });
                }
            }
        }
    }
    Ok(())
}

/// Instances are named `<model>_<suffix>` by convention (spec §4.8 example
/// `tenant_A`); catch-up and transform-instances dispatch use this to find
/// every instance of a model without a separate registry lookup in the
/// simulator (the live applier keeps an explicit model-membership index,
/// see `src/db/mongo.rs`).
pub(super) fn instance_belongs_to_model(instance_name: &str, model: &str) -> bool {
    instance_name == model || instance_name.starts_with(&format!("{model}_"))
}

fn mark_as_multimodel(state: &mut SimState, name: &str, model: &str, ctx: &ApplyContext) -> EngineResult<()> {
    let docs = state.collections.remove(name).unwrap_or_default();
    let types = ctx.schemas.multi_models.get(model).cloned().unwrap_or_default();
    let mut tagged = Vec::with_capacity(docs.len());
    for d in docs {
        let matches: Vec<&String> = types.iter().filter(|(_, schema)| validate(&d, schema).is_ok()).map(|(t, _)| t).collect();
        match matches.as_slice() {
            [one] => {
                let mut d = d;
                d.insert("_type", (*one).clone());
                tagged.push(d);
            }
            [] => {
                return Err(EngineError::SimulationForward {
                    migration_id: ctx.migration_id.to_string(),
                    detail: format!("document in {name} matches no type of model {model}"),
                })
            }
            many => {
                return Err(EngineError::SimulationForward {
                    migration_id: ctx.migration_id.to_string(),
                    detail: format!("document in {name} ambiguously matches types {many:?} of model {model}"),
                })
            }
        }
    }
    state.multi_instances.insert(name.to_string(), tagged);
    Ok(())
}
