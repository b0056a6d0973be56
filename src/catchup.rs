//! Multi-model catch-up engine (spec §4.8): brings a multi-model instance
//! that was created before some chain migrations were applied up to date
//! with every `*_multimodel_instances_type` operation it missed.
//!
//! There is no teacher analogue for this — kasl has no notion of a
//! dynamically-created collection instance. Grounded instead on the
//! `MigrationDefinition`/`Chain` types already built for the rest of this
//! crate, dispatching the same two operation tags the live applier
//! (`src/applier.rs`) already knows how to run against "all instances of a
//! model", narrowed here to exactly one.

use std::collections::{BTreeMap, BTreeSet};

use bson::{doc, Bson, Document};
use chrono::Utc;

use crate::chain::{Chain, MigrationDefinition};
use crate::db::DatabaseBackend;
use crate::error::{EngineError, EngineResult};
use crate::ir::Operation;

const MIGRATIONS_SENTINEL_TYPE: &str = "_migrations";

/// One entry in an instance's `_migrations` sentinel document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMigrationRecord {
    pub id: String,
    pub status: String,
    pub applied_at: chrono::DateTime<Utc>,
}

/// The `_migrations` sentinel document read from (or synthesized for) a
/// multi-model instance collection (spec §3 "multi-collection info document").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMetadata {
    pub from_migration_id: String,
    pub applied_migrations: Vec<InstanceMigrationRecord>,
}

impl InstanceMetadata {
    fn orphan(root_id: &str) -> Self {
        Self { from_migration_id: root_id.to_string(), applied_migrations: Vec::new() }
    }

    fn has_applied(&self, migration_id: &str) -> bool {
        self.applied_migrations.iter().any(|r| r.id == migration_id)
    }

    fn to_document(&self) -> Document {
        let applied: Vec<Bson> = self
            .applied_migrations
            .iter()
            .map(|r| Bson::Document(doc! { "id": &r.id, "status": &r.status, "appliedAt": r.applied_at }))
            .collect();
        doc! {
            "_type": MIGRATIONS_SENTINEL_TYPE,
            "fromMigrationId": &self.from_migration_id,
            "appliedMigrations": applied,
        }
    }

    fn from_document(doc: &Document) -> Option<Self> {
        let from_migration_id = doc.get_str("fromMigrationId").ok()?.to_string();
        let applied_migrations = doc
            .get_array("appliedMigrations")
            .map(|arr| {
                arr.iter()
                    .filter_map(|b| b.as_document())
                    .filter_map(|d| {
                        Some(InstanceMigrationRecord {
                            id: d.get_str("id").ok()?.to_string(),
                            status: d.get_str("status").ok()?.to_string(),
                            applied_at: d.get_datetime("appliedAt").ok()?.to_chrono(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Some(Self { from_migration_id, applied_migrations })
    }
}

pub struct CatchupEngine<'a> {
    backend: &'a dyn DatabaseBackend,
}

impl<'a> CatchupEngine<'a> {
    pub fn new(backend: &'a dyn DatabaseBackend) -> Self {
        Self { backend }
    }

    /// Runs catch-up for every model referenced anywhere in `chain`, against
    /// every physical instance currently discoverable in the database.
    pub async fn run(&self, chain: &Chain, applied_ids: &[String]) -> EngineResult<()> {
        let applied: BTreeSet<&str> = applied_ids.iter().map(String::as_str).collect();
        for model in self.declared_models(chain)? {
            for instance in self.discover_instances(&model).await? {
                self.catch_up_instance(chain, &applied, &model, &instance).await?;
            }
        }
        Ok(())
    }

    /// Every model name appearing in any migration's compiled operations.
    fn declared_models(&self, chain: &Chain) -> EngineResult<BTreeSet<String>> {
        let mut models = BTreeSet::new();
        for migration in chain.migrations() {
            for op in &migration.compile()?.operations {
                if let Some(m) = model_of(op) {
                    models.insert(m.to_string());
                }
            }
        }
        Ok(models)
    }

    async fn discover_instances(&self, model: &str) -> EngineResult<Vec<String>> {
        let all = self.backend.list_collections().await?;
        Ok(all.into_iter().filter(|name| name == model || name.starts_with(&format!("{model}_"))).collect())
    }

    async fn read_metadata(&self, instance: &str, root_id: &str) -> EngineResult<InstanceMetadata> {
        let docs = self.backend.find(instance, doc! { "_type": MIGRATIONS_SENTINEL_TYPE }).await?;
        Ok(docs.first().and_then(InstanceMetadata::from_document).unwrap_or_else(|| InstanceMetadata::orphan(root_id)))
    }

    async fn write_metadata(&self, instance: &str, metadata: &InstanceMetadata) -> EngineResult<()> {
        self.backend.delete_many(instance, doc! { "_type": MIGRATIONS_SENTINEL_TYPE }).await?;
        self.backend.insert_many(instance, vec![metadata.to_document()]).await
    }

    async fn catch_up_instance(
        &self,
        chain: &Chain,
        applied: &BTreeSet<&str>,
        model: &str,
        instance: &str,
    ) -> EngineResult<()> {
        let root_id = chain.migrations().first().map(|m| m.id.clone()).unwrap_or_default();
        let mut metadata = self.read_metadata(instance, &root_id).await?;
        let from_index = chain.position_of(&metadata.from_migration_id).unwrap_or(0);

        for migration in chain.migrations().iter().skip(from_index) {
            if !applied.contains(migration.id.as_str()) || metadata.has_applied(&migration.id) {
                continue;
            }
            let compiled = migration.compile()?;
            let matching: Vec<&Operation> =
                compiled.operations.iter().filter(|op| op_targets_instances_of(op, model)).collect();
            if matching.is_empty() {
                // Migration doesn't touch this model's shared instances; still
                // record it so a later pass doesn't re-scan it.
                metadata.applied_migrations.push(InstanceMigrationRecord {
                    id: migration.id.clone(),
                    status: "skipped".to_string(),
                    applied_at: Utc::now(),
                });
                continue;
            }
            for op in matching {
                self.replay_on_instance(instance, op).await?;
            }
            metadata.applied_migrations.push(InstanceMigrationRecord {
                id: migration.id.clone(),
                status: "applied".to_string(),
                applied_at: Utc::now(),
            });
        }
        self.write_metadata(instance, &metadata).await
    }

    /// Replays a `*_multimodel_instances_type` operation against one named
    /// instance, rather than the applier's "every current instance" fan-out.
    async fn replay_on_instance(&self, instance: &str, op: &Operation) -> EngineResult<()> {
        match op {
            Operation::SeedMultimodelInstancesType { doc_type, documents, .. } => {
                let docs = documents
                    .iter()
                    .map(|d| {
                        let mut d = d.clone();
                        if !d.contains_key("_id") {
                            d.insert("_id", Bson::ObjectId(bson::oid::ObjectId::new()));
                        }
                        d.insert("_type", doc_type.clone());
                        d
                    })
                    .collect();
                self.backend.insert_many(instance, docs).await
            }
            Operation::TransformMultimodelInstancesType { doc_type, transform, .. } => {
                let docs = self.backend.find(instance, doc! { "_type": doc_type.clone() }).await?;
                for d in docs {
                    let id = d.get("_id").cloned();
                    let transformed = (transform.up)(&d)
                        .map_err(|e| EngineError::Data { collection: instance.to_string(), detail: e.to_string() })?;
                    if let Some(id) = id {
                        let mut set = transformed;
                        set.remove("_id");
                        self.backend.update_many(instance, doc! { "_id": id }, doc! { "$set": set }).await?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

fn model_of(op: &Operation) -> Option<&str> {
    match op {
        Operation::CreateMultimodelInstance { model, .. }
        | Operation::SeedMultimodelInstanceType { model, .. }
        | Operation::TransformMultimodelInstanceType { model, .. }
        | Operation::SeedMultimodelInstancesType { model, .. }
        | Operation::TransformMultimodelInstancesType { model, .. }
        | Operation::MarkAsMultimodel { model, .. } => Some(model),
        _ => None,
    }
}

/// Only the two `*_multimodel_instances_type` tags are catch-up eligible
/// (spec §4.8: named-instance operations are never replayed by catch-up).
fn op_targets_instances_of(op: &Operation, model: &str) -> bool {
    match op {
        Operation::SeedMultimodelInstancesType { model: m, .. } | Operation::TransformMultimodelInstancesType { model: m, .. } => m == model,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::builder::MigrationBuilder;
    use crate::chain::{MigrationRegistry, MigrateFn};
    use crate::db::MemoryBackend;
    use crate::schema::{FieldSchema, Schema, SchemasDefinition};

    fn schemas_with_model(doc_type: &str, schema: Schema) -> Arc<SchemasDefinition> {
        let mut def = SchemasDefinition::default();
        def.multi_models.entry("tenant".to_string()).or_default().insert(doc_type.to_string(), schema);
        Arc::new(def)
    }

    fn migrate_seed(doc_type: &'static str) -> MigrateFn {
        Arc::new(move |b: &mut MigrationBuilder| {
            b.seed_multimodel_instances_type("tenant", doc_type, vec![doc! { "name": "a" }])?;
            Ok(())
        })
    }

    #[tokio::test]
    async fn orphan_instance_catches_up_missed_seed() {
        let schema = Schema::new().with_field("name", FieldSchema::String(Default::default()));
        let schemas = schemas_with_model("user", schema);

        let mut registry = MigrationRegistry::new();
        registry.register(MigrationDefinition {
            id: "m1".into(),
            name: "root".into(),
            parent: None,
            schemas: schemas.clone(),
            migrate: Arc::new(|_| Ok(())),
        });
        registry.register(MigrationDefinition {
            id: "m2".into(),
            name: "seed-users".into(),
            parent: Some("m1".into()),
            schemas,
            migrate: migrate_seed("user"),
        });
        let chain = registry.build_chain().unwrap();

        let backend = MemoryBackend::new();
        backend.create_collection("tenant_acme").await.unwrap();

        let engine = CatchupEngine::new(&backend);
        engine.run(&chain, &["m1".to_string(), "m2".to_string()]).await.unwrap();

        let docs = backend.find("tenant_acme", doc! { "_type": "user" }).await.unwrap();
        assert_eq!(docs.len(), 1);

        let meta_docs = backend.find("tenant_acme", doc! { "_type": MIGRATIONS_SENTINEL_TYPE }).await.unwrap();
        assert_eq!(meta_docs.len(), 1);
        let meta = InstanceMetadata::from_document(&meta_docs[0]).unwrap();
        assert!(meta.has_applied("m2"));
    }

    #[tokio::test]
    async fn already_applied_migration_is_not_replayed_twice() {
        let schema = Schema::new().with_field("name", FieldSchema::String(Default::default()));
        let schemas = schemas_with_model("user", schema);

        let mut registry = MigrationRegistry::new();
        registry.register(MigrationDefinition {
            id: "m1".into(),
            name: "root".into(),
            parent: None,
            schemas: schemas.clone(),
            migrate: Arc::new(|_| Ok(())),
        });
        registry.register(MigrationDefinition {
            id: "m2".into(),
            name: "seed-users".into(),
            parent: Some("m1".into()),
            schemas,
            migrate: migrate_seed("user"),
        });
        let chain = registry.build_chain().unwrap();

        let backend = MemoryBackend::new();
        backend.create_collection("tenant_acme").await.unwrap();

        let engine = CatchupEngine::new(&backend);
        engine.run(&chain, &["m1".to_string(), "m2".to_string()]).await.unwrap();
        engine.run(&chain, &["m1".to_string(), "m2".to_string()]).await.unwrap();

        let docs = backend.find("tenant_acme", doc! { "_type": "user" }).await.unwrap();
        assert_eq!(docs.len(), 1, "second catch-up pass must not reseed");
    }
}
