//! Reverse dispatch over the operation IR (spec §4.4): the inverse of
//! [`super::forward::apply_operation`], used both for the reversibility
//! proof and for live rollback (`src/applier.rs`).

use bson::Document;

use crate::error::{EngineError, EngineResult};
use crate::ir::Operation;

use super::forward::ApplyContext;
use super::state::SimState;

pub fn reverse_operation(state: &mut SimState, op: &Operation, ctx: &ApplyContext) -> EngineResult<()> {
    match op {
        Operation::CreateCollection { name, .. } | Operation::CreateMulticollection { name, .. } => {
            state.collections.remove(name);
        }
        Operation::CreateMultimodelInstance { instance, .. } => {
            state.multi_instances.remove(instance);
        }
        Operation::SeedCollection { name, documents, .. } => {
            if let Some(docs) = state.collections.get_mut(name) {
                remove_matching(docs, documents, None);
            }
        }
        Operation::SeedMulticollectionType { name, doc_type, documents, .. } => {
            if let Some(docs) = state.collections.get_mut(name) {
                remove_matching(docs, documents, Some(doc_type));
            }
        }
        Operation::SeedMultimodelInstanceType { instance, doc_type, documents, .. } => {
            if let Some(docs) = state.multi_instances.get_mut(instance) {
                remove_matching(docs, documents, Some(doc_type));
            }
        }
        Operation::SeedMultimodelInstancesType { model, doc_type, documents, .. } => {
            for (name, docs) in state.multi_instances.iter_mut() {
                if super::forward::instance_belongs_to_model(name, model) {
                    remove_matching(docs, documents, Some(doc_type));
                }
            }
        }
        Operation::TransformCollection { name, transform, .. } => {
            if let Some(docs) = state.collections.get_mut(name) {
                apply_down_all(docs, &transform.down, ctx)?;
            }
        }
        Operation::TransformMulticollectionType { name, doc_type, transform, .. } => {
            if let Some(docs) = state.collections.get_mut(name) {
                apply_down_matching(docs, doc_type, &transform.down, ctx)?;
            }
        }
        Operation::TransformMultimodelInstanceType { instance, doc_type, transform, .. } => {
            if let Some(docs) = state.multi_instances.get_mut(instance) {
                apply_down_matching(docs, doc_type, &transform.down, ctx)?;
            }
        }
        Operation::TransformMultimodelInstancesType { model, doc_type, transform, .. } => {
            for (name, docs) in state.multi_instances.iter_mut() {
                if super::forward::instance_belongs_to_model(name, model) {
                    apply_down_matching(docs, doc_type, &transform.down, ctx)?;
                }
            }
        }
        Operation::UpdateIndexes { .. } => {}
        Operation::MarkAsMultimodel { name, .. } => {
            if let Some(docs) = state.multi_instances.remove(name) {
                let restored: Vec<Document> = docs
                    .into_iter()
                    .map(|mut d| {
                        d.remove("_type");
                        d
                    })
                    .collect();
                state.collections.insert(name.clone(), restored);
            }
        }
    }
    Ok(())
}

fn remove_matching(docs: &mut Vec<Document>, originals: &[Document], doc_type: Option<&str>) {
    for original in originals {
        if let Some(pos) = docs.iter().position(|d| content_matches(d, original, doc_type)) {
            docs.remove(pos);
        }
    }
}

fn content_matches(candidate: &Document, original: &Document, doc_type: Option<&str>) -> bool {
    if let Some(t) = doc_type {
        if candidate.get_str("_type").ok() != Some(t) {
            return false;
        }
    }
    original.iter().filter(|(k, _)| *k != "_id").all(|(k, v)| candidate.get(k) == Some(v))
}

fn apply_down_all(docs: &mut [Document], down: &crate::ir::TransformFn, ctx: &ApplyContext) -> EngineResult<()> {
    for d in docs.iter_mut() {
        *d = down(d).map_err(|e| EngineError::SimulationReverse {
            migration_id: ctx.migration_id.to_string(),
            detail: e.to_string(),
        })?;
    }
    Ok(())
}

fn apply_down_matching(
    docs: &mut [Document],
    doc_type: &str,
    down: &crate::ir::TransformFn,
    ctx: &ApplyContext,
) -> EngineResult<()> {
    for d in docs.iter_mut() {
        if d.get_str("_type").ok() != Some(doc_type) {
            continue;
        }
        let mut transformed = down(d).map_err(|e| EngineError::SimulationReverse {
            migration_id: ctx.migration_id.to_string(),
            detail: e.to_string(),
        })?;
        transformed.insert("_type", doc_type.to_string());
        *d = transformed;
    }
    Ok(())
}
