//! Live applier (spec §4.7): executes IR against a real [`DatabaseBackend`],
//! synchronizes validators and indexes, and brackets every migration with a
//! history record.
//!
//! Generalizes the teacher's `run_migrations` transaction-bracket-and-record
//! pattern (`examples/lacodda-kasl/src/db/migrations.rs`: begin transaction,
//! run each pending migration's `up`, insert a tracking row, commit) into a
//! per-operation dispatch table over the IR, with failure recorded via the
//! history store rather than a SQL transaction rollback.

use std::collections::BTreeMap;
use std::time::Instant;

use bson::{doc, Bson, Document};
use chrono::Utc;

use crate::chain::MigrationDefinition;
use crate::db::{DatabaseBackend, IndexSpec};
use crate::error::{EngineError, EngineResult};
use crate::history::{HistoryOperation, HistoryStatus, HistoryStore};
use crate::ir::Operation;
use crate::schema::{derive_indexes, to_native_validator, Schema, SchemasDefinition};

pub struct Applier<'a> {
    backend: &'a dyn DatabaseBackend,
}

struct ApplyCtx<'a> {
    schemas: &'a SchemasDefinition,
}

impl<'a> Applier<'a> {
    pub fn new(backend: &'a dyn DatabaseBackend) -> Self {
        Self { backend }
    }

    fn history(&self) -> HistoryStore<'a> {
        HistoryStore::new(self.backend)
    }

    /// Applies `migration`'s compiled operations in declaration order, then
    /// installs validators/indexes for every collection it touched. History
    /// is recorded on both success and failure (spec §4.7).
    pub async fn apply_migration(&self, migration: &MigrationDefinition) -> EngineResult<()> {
        let compiled = migration.compile()?;
        let ctx = ApplyCtx { schemas: migration.schemas.as_ref() };
        let started = Instant::now();

        let mut touched: BTreeMap<String, Schema> = BTreeMap::new();
        let result = async {
            for op in &compiled.operations {
                if let (Some(name), Some(schema)) = (target_collection_name(op), op.schema()) {
                    touched.insert(name, schema.clone());
                }
                self.dispatch_forward(op, &ctx).await?;
            }
            self.sync_validators(&touched).await?;
            self.sync_indexes(&touched).await?;
            Ok::<(), EngineError>(())
        }
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => {
                self.history()
                    .record(&migration.id, &migration.name, HistoryOperation::Applied, HistoryStatus::Success, Some(duration_ms), None, Utc::now())
                    .await?;
            }
            Err(e) => {
                self.history()
                    .record(
                        &migration.id,
                        &migration.name,
                        HistoryOperation::Applied,
                        HistoryStatus::Failure,
                        Some(duration_ms),
                        Some(e.to_string()),
                        Utc::now(),
                    )
                    .await?;
            }
        }
        result
    }

    /// Reverts `migration` by running its reverse dispatch table in reverse
    /// operation order. Refuses up front for `irreversible` migrations unless
    /// `force` is set (spec §4.7, scenario S4).
    pub async fn rollback_migration(&self, migration: &MigrationDefinition, force: bool) -> EngineResult<()> {
        let compiled = migration.compile()?;
        if compiled.is_irreversible() && !force {
            return Err(EngineError::SimulationReverse {
                migration_id: migration.id.clone(),
                detail: "migration is irreversible; pass --force to roll back anyway".to_string(),
            });
        }

        let ctx = ApplyCtx { schemas: migration.schemas.as_ref() };
        let started = Instant::now();
        let result = async {
            for op in compiled.operations.iter().rev() {
                if let Err(e) = self.dispatch_reverse(op, &ctx).await {
                    if is_non_restorable(op) {
                        tracing::warn!(migration_id = %migration.id, error = %e, "reverse handler cannot fully restore prior state");
                        continue;
                    }
                    return Err(e);
                }
            }
            Ok::<(), EngineError>(())
        }
        .await;

        let duration_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(()) => {
                self.history()
                    .record(&migration.id, &migration.name, HistoryOperation::Reverted, HistoryStatus::Success, Some(duration_ms), None, Utc::now())
                    .await?;
            }
            Err(e) => {
                self.history()
                    .record(
                        &migration.id,
                        &migration.name,
                        HistoryOperation::Reverted,
                        HistoryStatus::Failure,
                        Some(duration_ms),
                        Some(e.to_string()),
                        Utc::now(),
                    )
                    .await?;
            }
        }
        result
    }

    async fn dispatch_forward(&self, op: &Operation, ctx: &ApplyCtx<'_>) -> EngineResult<()> {
        match op {
            Operation::CreateCollection { name, .. } | Operation::CreateMulticollection { name, .. } => {
                self.backend.create_collection(name).await
            }
            Operation::CreateMultimodelInstance { instance, .. } => self.backend.create_collection(instance).await,

            Operation::SeedCollection { name, documents, .. } => self.backend.insert_many(name, stamp_ids(documents, None)).await,
            Operation::SeedMulticollectionType { name, doc_type, documents, .. } => {
                self.backend.insert_many(name, stamp_ids(documents, Some(doc_type))).await
            }
            Operation::SeedMultimodelInstanceType { instance, doc_type, documents, .. } => {
                self.backend.insert_many(instance, stamp_ids(documents, Some(doc_type))).await
            }
            Operation::SeedMultimodelInstancesType { model, doc_type, documents, .. } => {
                for instance in self.instances_of(model).await? {
                    self.backend.insert_many(&instance, stamp_ids(documents, Some(doc_type))).await?;
                }
                Ok(())
            }

            Operation::TransformCollection { name, transform, .. } => self.transform_in_place(name, None, &transform.up).await,
            Operation::TransformMulticollectionType { name, doc_type, transform, .. } => {
                self.transform_in_place(name, Some(doc_type), &transform.up).await
            }
            Operation::TransformMultimodelInstanceType { instance, doc_type, transform, .. } => {
                self.transform_in_place(instance, Some(doc_type), &transform.up).await
            }
            Operation::TransformMultimodelInstancesType { model, doc_type, transform, .. } => {
                for instance in self.instances_of(model).await? {
                    self.transform_in_place(&instance, Some(doc_type), &transform.up).await?;
                }
                Ok(())
            }

            Operation::UpdateIndexes { .. } => Ok(()), // handled by sync_indexes after the full operation list runs
            Operation::MarkAsMultimodel { name, model } => self.mark_as_multimodel(name, model, ctx).await,
        }
    }

    async fn dispatch_reverse(&self, op: &Operation, _ctx: &ApplyCtx<'_>) -> EngineResult<()> {
        match op {
            Operation::CreateCollection { name, .. } | Operation::CreateMulticollection { name, .. } => {
                self.backend.drop_collection(name).await
            }
            Operation::CreateMultimodelInstance { instance, .. } => self.backend.drop_collection(instance).await,

            Operation::SeedCollection { name, documents, .. } => self.delete_seeded(name, documents, None).await.map(|_| ()),
            Operation::SeedMulticollectionType { name, doc_type, documents, .. } => {
                self.delete_seeded(name, documents, Some(doc_type)).await.map(|_| ())
            }
            Operation::SeedMultimodelInstanceType { instance, doc_type, documents, .. } => {
                self.delete_seeded(instance, documents, Some(doc_type)).await.map(|_| ())
            }
            Operation::SeedMultimodelInstancesType { model, doc_type, documents, .. } => {
                for instance in self.instances_of(model).await? {
                    self.delete_seeded(&instance, documents, Some(doc_type)).await?;
                }
                Ok(())
            }

            Operation::TransformCollection { name, transform, .. } => self.transform_in_place(name, None, &transform.down).await,
            Operation::TransformMulticollectionType { name, doc_type, transform, .. } => {
                self.transform_in_place(name, Some(doc_type), &transform.down).await
            }
            Operation::TransformMultimodelInstanceType { instance, doc_type, transform, .. } => {
                self.transform_in_place(instance, Some(doc_type), &transform.down).await
            }
            Operation::TransformMultimodelInstancesType { model, doc_type, transform, .. } => {
                for instance in self.instances_of(model).await? {
                    self.transform_in_place(&instance, Some(doc_type), &transform.down).await?;
                }
                Ok(())
            }

            Operation::UpdateIndexes { .. } => Ok(()),
            Operation::MarkAsMultimodel { .. } => Ok(()), // cannot restore physical collection name split; logged as non-restorable
        }
    }

    async fn transform_in_place(&self, collection: &str, doc_type: Option<&str>, f: &crate::ir::TransformFn) -> EngineResult<()> {
        let filter = doc_type.map(|t| doc! { "_type": t }).unwrap_or_default();
        let docs = self.backend.find(collection, filter).await?;
        for doc in docs {
            let id = doc.get("_id").cloned();
            let transformed = f(&doc).map_err(|e| EngineError::Data { collection: collection.to_string(), detail: e.to_string() })?;
            if let Some(id) = id {
                let mut set = transformed;
                set.remove("_id");
                self.backend.update_many(collection, doc! { "_id": id }, doc! { "$set": set }).await?;
            }
        }
        Ok(())
    }

    async fn delete_seeded(&self, collection: &str, originals: &[Document], doc_type: Option<&str>) -> EngineResult<u64> {
        let mut total = 0;
        for original in originals {
            let mut filter = original.clone();
            filter.remove("_id");
            if let Some(t) = doc_type {
                filter.insert("_type", t);
            }
            total += self.backend.delete_many(collection, filter).await?;
        }
        Ok(total)
    }

    /// Physical instances of `model`, per the `<model>_<suffix>` naming
    /// convention used throughout this crate (see
    /// `src/simulator/forward.rs::instance_belongs_to_model`).
    async fn instances_of(&self, model: &str) -> EngineResult<Vec<String>> {
        let all = self.backend.list_collections().await?;
        Ok(all.into_iter().filter(|name| name == model || name.starts_with(&format!("{model}_"))).collect())
    }

    async fn mark_as_multimodel(&self, name: &str, model: &str, ctx: &ApplyCtx<'_>) -> EngineResult<()> {
        let types = ctx.schemas.multi_models.get(model).cloned().unwrap_or_default();
        let docs = self.backend.find(name, doc! {}).await?;
        for d in docs {
            let matches: Vec<&String> =
                types.iter().filter(|(_, schema)| crate::schema::validate(&d, schema).is_ok()).map(|(t, _)| t).collect();
            let doc_type = match matches.as_slice() {
                [one] => (*one).clone(),
                _ => {
                    return Err(EngineError::Data {
                        collection: name.to_string(),
                        detail: format!("document does not unambiguously match one type of model {model}"),
                    })
                }
            };
            if let Some(id) = d.get("_id").cloned() {
                self.backend.update_many(name, doc! { "_id": id }, doc! { "$set": { "_type": doc_type } }).await?;
            }
        }
        Ok(())
    }

    async fn sync_validators(&self, touched: &BTreeMap<String, Schema>) -> EngineResult<()> {
        for (name, schema) in touched {
            self.backend.modify_collection_validator(name, to_native_validator(schema)).await?;
        }
        Ok(())
    }

    async fn sync_indexes(&self, touched: &BTreeMap<String, Schema>) -> EngineResult<()> {
        for (name, schema) in touched {
            let desired = derive_indexes(schema);
            let current = self.backend.list_indexes(name).await?;
            for d in &desired {
                let index_name = format!("{}_1", d.field);
                if !current.iter().any(|c| c.name == index_name) {
                    let mut keys = Document::new();
                    keys.insert(d.field.clone(), 1);
                    self.backend.create_index(name, IndexSpec { name: index_name, keys, unique: d.unique, sparse: false }).await?;
                }
            }
            for c in &current {
                if c.name != "_id_" && !desired.iter().any(|d| format!("{}_1", d.field) == c.name) {
                    self.backend.drop_index(name, &c.name).await?;
                }
            }
        }
        Ok(())
    }
}

fn target_collection_name(op: &Operation) -> Option<String> {
    match op {
        Operation::CreateCollection { name, .. }
        | Operation::CreateMulticollection { name, .. }
        | Operation::SeedCollection { name, .. }
        | Operation::SeedMulticollectionType { name, .. }
        | Operation::TransformCollection { name, .. }
        | Operation::TransformMulticollectionType { name, .. }
        | Operation::UpdateIndexes { name, .. } => Some(name.clone()),
        Operation::CreateMultimodelInstance { instance, .. }
        | Operation::SeedMultimodelInstanceType { instance, .. }
        | Operation::TransformMultimodelInstanceType { instance, .. } => Some(instance.clone()),
        _ => None,
    }
}

fn is_non_restorable(op: &Operation) -> bool {
    matches!(
        op,
        Operation::CreateCollection { .. }
            | Operation::CreateMulticollection { .. }
            | Operation::CreateMultimodelInstance { .. }
            | Operation::MarkAsMultimodel { .. }
    )
}

fn stamp_ids(documents: &[Document], doc_type: Option<&str>) -> Vec<Document> {
    documents
        .iter()
        .map(|d| {
            let mut d = d.clone();
            if !d.contains_key("_id") {
                d.insert("_id", Bson::ObjectId(bson::oid::ObjectId::new()));
            }
            if let Some(t) = doc_type {
                d.insert("_type", t);
            }
            d
        })
        .collect()
}
