//! Fluent builder producing [`CompiledMigration`] IR from user migration code
//! (spec §4.2). Every call resolves its schema reference against the
//! migration's declared [`SchemasDefinition`] at build time — a missing
//! reference fails immediately with [`EngineError::SchemaNotFound`], never at
//! simulate/apply time.

use std::collections::BTreeSet;

use bson::Document;

use crate::error::{EngineError, EngineResult};
use crate::ir::{CompiledMigration, MigrationProperty, Operation, Transform, TransformFn};
use crate::schema::{FieldSchema, Schema, SchemasDefinition};

/// Combines the per-type schemas of a multi-collection/multi-model into one
/// schema suitable for native-validator synthesis: the union of every type's
/// fields plus a required `_type` enum discriminator.
///
/// This is a deliberate simplification (no single IR operation carries a
/// per-type schema for `create_multicollection`/`create_multimodel_instance`);
/// see `DESIGN.md` Open Question decisions.
pub fn combine_types(types: &std::collections::BTreeMap<String, Schema>) -> Schema {
    let mut combined = Schema::new().with_field(
        "_type",
        FieldSchema::Enum(types.keys().cloned().collect()),
    );
    for schema in types.values() {
        for (name, field) in schema.fields() {
            if combined.field(name).is_none() {
                combined = combined.with_field(name.clone(), field.clone());
            }
        }
    }
    combined
}

#[derive(Debug)]
pub struct MigrationBuilder<'a> {
    migration_id: String,
    schemas: &'a SchemasDefinition,
    operations: Vec<Operation>,
    properties: BTreeSet<MigrationProperty>,
}

impl<'a> MigrationBuilder<'a> {
    pub fn new(migration_id: impl Into<String>, schemas: &'a SchemasDefinition) -> Self {
        Self { migration_id: migration_id.into(), schemas, operations: Vec::new(), properties: BTreeSet::new() }
    }

    fn collection_schema(&self, name: &str) -> EngineResult<Schema> {
        self.schemas.collections.get(name).cloned().ok_or_else(|| EngineError::SchemaNotFound {
            migration_id: self.migration_id.clone(),
            path: format!("collections.{name}"),
        })
    }

    fn multicollection_types(&self, name: &str) -> EngineResult<std::collections::BTreeMap<String, Schema>> {
        self.schemas.multi_collections.get(name).cloned().ok_or_else(|| EngineError::SchemaNotFound {
            migration_id: self.migration_id.clone(),
            path: format!("multiCollections.{name}"),
        })
    }

    fn multicollection_type_schema(&self, name: &str, doc_type: &str) -> EngineResult<Schema> {
        self.multicollection_types(name)?.get(doc_type).cloned().ok_or_else(|| EngineError::SchemaNotFound {
            migration_id: self.migration_id.clone(),
            path: format!("multiCollections.{name}.{doc_type}"),
        })
    }

    fn multimodel_types(&self, model: &str) -> EngineResult<std::collections::BTreeMap<String, Schema>> {
        self.schemas.multi_models.get(model).cloned().ok_or_else(|| EngineError::SchemaNotFound {
            migration_id: self.migration_id.clone(),
            path: format!("multiModels.{model}"),
        })
    }

    fn multimodel_type_schema(&self, model: &str, doc_type: &str) -> EngineResult<Schema> {
        self.multimodel_types(model)?.get(doc_type).cloned().ok_or_else(|| EngineError::SchemaNotFound {
            migration_id: self.migration_id.clone(),
            path: format!("multiModels.{model}.{doc_type}"),
        })
    }

    fn push(&mut self, op: Operation) -> &mut Self {
        self.operations.push(op);
        self
    }

    // --- create --------------------------------------------------------------

    pub fn create_collection(&mut self, name: impl Into<String>) -> EngineResult<&mut Self> {
        let name = name.into();
        let schema = self.collection_schema(&name)?;
        self.properties.insert(MigrationProperty::Lossy);
        Ok(self.push(Operation::CreateCollection { name, schema }))
    }

    pub fn create_multicollection(&mut self, name: impl Into<String>) -> EngineResult<&mut Self> {
        let name = name.into();
        let schema = combine_types(&self.multicollection_types(&name)?);
        self.properties.insert(MigrationProperty::Lossy);
        Ok(self.push(Operation::CreateMulticollection { name, schema }))
    }

    pub fn create_multimodel_instance(&mut self, instance: impl Into<String>, model: impl Into<String>) -> EngineResult<&mut Self> {
        let model = model.into();
        let schema = combine_types(&self.multimodel_types(&model)?);
        self.properties.insert(MigrationProperty::Lossy);
        Ok(self.push(Operation::CreateMultimodelInstance { instance: instance.into(), model, schema }))
    }

    // --- seed ------------------------------------------------------------------

    pub fn seed_collection(&mut self, name: impl Into<String>, documents: Vec<Document>) -> EngineResult<&mut Self> {
        let name = name.into();
        let schema = self.collection_schema(&name)?;
        Ok(self.push(Operation::SeedCollection { name, documents, schema }))
    }

    pub fn seed_multicollection_type(
        &mut self,
        name: impl Into<String>,
        doc_type: impl Into<String>,
        documents: Vec<Document>,
    ) -> EngineResult<&mut Self> {
        let name = name.into();
        let doc_type = doc_type.into();
        let schema = self.multicollection_type_schema(&name, &doc_type)?;
        Ok(self.push(Operation::SeedMulticollectionType { name, doc_type, documents, schema }))
    }

    pub fn seed_multimodel_instance_type(
        &mut self,
        instance: impl Into<String>,
        model: impl Into<String>,
        doc_type: impl Into<String>,
        documents: Vec<Document>,
    ) -> EngineResult<&mut Self> {
        let model = model.into();
        let doc_type = doc_type.into();
        let schema = self.multimodel_type_schema(&model, &doc_type)?;
        Ok(self.push(Operation::SeedMultimodelInstanceType { instance: instance.into(), model, doc_type, documents, schema }))
    }

    pub fn seed_multimodel_instances_type(
        &mut self,
        model: impl Into<String>,
        doc_type: impl Into<String>,
        documents: Vec<Document>,
    ) -> EngineResult<&mut Self> {
        let model = model.into();
        let doc_type = doc_type.into();
        let schema = self.multimodel_type_schema(&model, &doc_type)?;
        Ok(self.push(Operation::SeedMultimodelInstancesType { model, doc_type, documents, schema }))
    }

    // --- transform ------------------------------------------------------------

    #[allow(clippy::too_many_arguments)]
    pub fn transform_collection(
        &mut self,
        name: impl Into<String>,
        up: impl Fn(&Document) -> anyhow::Result<Document> + Send + Sync + 'static,
        down: impl Fn(&Document) -> anyhow::Result<Document> + Send + Sync + 'static,
        lossy: bool,
        irreversible: bool,
    ) -> EngineResult<&mut Self> {
        let name = name.into();
        let schema = self.collection_schema(&name)?;
        self.mark_properties(lossy, irreversible);
        Ok(self.push(Operation::TransformCollection {
            name,
            transform: make_transform(up, down),
            schema,
            parent_schema: None,
            lossy,
            irreversible,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn transform_multicollection_type(
        &mut self,
        name: impl Into<String>,
        doc_type: impl Into<String>,
        up: impl Fn(&Document) -> anyhow::Result<Document> + Send + Sync + 'static,
        down: impl Fn(&Document) -> anyhow::Result<Document> + Send + Sync + 'static,
        lossy: bool,
        irreversible: bool,
    ) -> EngineResult<&mut Self> {
        let name = name.into();
        let doc_type = doc_type.into();
        let schema = self.multicollection_type_schema(&name, &doc_type)?;
        self.mark_properties(lossy, irreversible);
        Ok(self.push(Operation::TransformMulticollectionType {
            name,
            doc_type,
            transform: make_transform(up, down),
            schema,
            parent_schema: None,
            lossy,
            irreversible,
        }))
    }

    #[allow(clippy::too_many_arguments)]
    pub fn transform_multimodel_instance_type(
        &mut self,
        instance: impl Into<String>,
        model: impl Into<String>,
        doc_type: impl Into<String>,
        up: impl Fn(&Document) -> anyhow::Result<Document> + Send + Sync + 'static,
        down: impl Fn(&Document) -> anyhow::Result<Document> + Send + Sync + 'static,
        lossy: bool,
        irreversible: bool,
    ) -> EngineResult<&mut Self> {
        let model = model.into();
        let doc_type = doc_type.into();
        let schema = self.multimodel_type_schema(&model, &doc_type)?;
        self.mark_properties(lossy, irreversible);
        Ok(self.push(Operation::TransformMultimodelInstanceType {
            instance: instance.into(),
            model,
            doc_type,
            transform: make_transform(up, down),
            schema,
            parent_schema: None,
            lossy,
            irreversible,
        }))
    }

    /// Targets *all* current and future instances of `model` — distinct IR
    /// tag from `transform_multimodel_instance_type` so applier and catch-up
    /// dispatch correctly (spec §4.2).
    #[allow(clippy::too_many_arguments)]
    pub fn transform_multimodel_instances_type(
        &mut self,
        model: impl Into<String>,
        doc_type: impl Into<String>,
        up: impl Fn(&Document) -> anyhow::Result<Document> + Send + Sync + 'static,
        down: impl Fn(&Document) -> anyhow::Result<Document> + Send + Sync + 'static,
        lossy: bool,
        irreversible: bool,
    ) -> EngineResult<&mut Self> {
        let model = model.into();
        let doc_type = doc_type.into();
        let schema = self.multimodel_type_schema(&model, &doc_type)?;
        self.mark_properties(lossy, irreversible);
        Ok(self.push(Operation::TransformMultimodelInstancesType {
            model,
            doc_type,
            transform: make_transform(up, down),
            schema,
            parent_schema: None,
            lossy,
            irreversible,
        }))
    }

    // --- misc --------------------------------------------------------------------

    pub fn update_indexes(&mut self, name: impl Into<String>) -> EngineResult<&mut Self> {
        let name = name.into();
        let schema = self.collection_schema(&name)?;
        self.properties.insert(MigrationProperty::Lossy);
        Ok(self.push(Operation::UpdateIndexes { name, schema }))
    }

    pub fn mark_as_multimodel(&mut self, name: impl Into<String>, model: impl Into<String>) -> &mut Self {
        self.push(Operation::MarkAsMultimodel { name: name.into(), model: model.into() })
    }

    fn mark_properties(&mut self, lossy: bool, irreversible: bool) {
        if lossy {
            self.properties.insert(MigrationProperty::Lossy);
        }
        if irreversible {
            self.properties.insert(MigrationProperty::Irreversible);
        }
    }

    /// Idempotent: may be called multiple times, always returns the same IR.
    pub fn compile(&self) -> CompiledMigration {
        CompiledMigration { operations: self.operations.clone(), properties: self.properties.clone() }
    }
}

fn make_transform(
    up: impl Fn(&Document) -> anyhow::Result<Document> + Send + Sync + 'static,
    down: impl Fn(&Document) -> anyhow::Result<Document> + Send + Sync + 'static,
) -> Transform {
    let up: TransformFn = std::sync::Arc::new(up);
    let down: TransformFn = std::sync::Arc::new(down);
    Transform { up, down }
}
