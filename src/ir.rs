//! The migration intermediate representation (spec §3): a closed, tagged
//! operation algebra consumed by both the simulator and the live applier.
//!
//! `up`/`down` transform functions are opaque callables in the source
//! specification (spec §9 design notes); Rust has first-class closures, so
//! they are represented directly as `Arc<dyn Fn(...) -> Result<Document> + Send + Sync>`
//! rather than a compiled DSL or plugin module.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use bson::Document;

use crate::schema::Schema;

pub type TransformFn = Arc<dyn Fn(&Document) -> anyhow::Result<Document> + Send + Sync>;

#[derive(Clone)]
pub struct Transform {
    pub up: TransformFn,
    pub down: TransformFn,
}

impl fmt::Debug for Transform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transform").finish_non_exhaustive()
    }
}

/// A migration-level property tracked as a set (spec §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MigrationProperty {
    Lossy,
    Irreversible,
}

/// The complete operation taxonomy from spec §3.
#[derive(Clone, Debug)]
pub enum Operation {
    CreateCollection { name: String, schema: Schema },
    CreateMulticollection { name: String, schema: Schema },
    CreateMultimodelInstance { instance: String, model: String, schema: Schema },

    SeedCollection { name: String, documents: Vec<Document>, schema: Schema },
    SeedMulticollectionType { name: String, doc_type: String, documents: Vec<Document>, schema: Schema },
    SeedMultimodelInstanceType { instance: String, model: String, doc_type: String, documents: Vec<Document>, schema: Schema },
    SeedMultimodelInstancesType { model: String, doc_type: String, documents: Vec<Document>, schema: Schema },

    TransformCollection { name: String, transform: Transform, schema: Schema, parent_schema: Option<Schema>, lossy: bool, irreversible: bool },
    TransformMulticollectionType { name: String, doc_type: String, transform: Transform, schema: Schema, parent_schema: Option<Schema>, lossy: bool, irreversible: bool },
    TransformMultimodelInstanceType { instance: String, model: String, doc_type: String, transform: Transform, schema: Schema, parent_schema: Option<Schema>, lossy: bool, irreversible: bool },
    TransformMultimodelInstancesType { model: String, doc_type: String, transform: Transform, schema: Schema, parent_schema: Option<Schema>, lossy: bool, irreversible: bool },

    UpdateIndexes { name: String, schema: Schema },
    MarkAsMultimodel { name: String, model: String },
}

impl Operation {
    pub fn tag(&self) -> &'static str {
        match self {
            Operation::CreateCollection { .. } => "create_collection",
            Operation::CreateMulticollection { .. } => "create_multicollection",
            Operation::CreateMultimodelInstance { .. } => "create_multimodel_instance",
            Operation::SeedCollection { .. } => "seed_collection",
            Operation::SeedMulticollectionType { .. } => "seed_multicollection_type",
            Operation::SeedMultimodelInstanceType { .. } => "seed_multimodel_instance_type",
            Operation::SeedMultimodelInstancesType { .. } => "seed_multimodel_instances_type",
            Operation::TransformCollection { .. } => "transform_collection",
            Operation::TransformMulticollectionType { .. } => "transform_multicollection_type",
            Operation::TransformMultimodelInstanceType { .. } => "transform_multimodel_instance_type",
            Operation::TransformMultimodelInstancesType { .. } => "transform_multimodel_instances_type",
            Operation::UpdateIndexes { .. } => "update_indexes",
            Operation::MarkAsMultimodel { .. } => "mark_as_multimodel",
        }
    }

    /// The schema this operation asserts the affected collection/type will
    /// have afterward, where applicable (spec testable property 3: every
    /// `create*`/`seed`/`transform`/`update_indexes` carries a non-null schema).
    pub fn schema(&self) -> Option<&Schema> {
        match self {
            Operation::CreateCollection { schema, .. }
            | Operation::CreateMulticollection { schema, .. }
            | Operation::CreateMultimodelInstance { schema, .. }
            | Operation::SeedCollection { schema, .. }
            | Operation::SeedMulticollectionType { schema, .. }
            | Operation::SeedMultimodelInstanceType { schema, .. }
            | Operation::SeedMultimodelInstancesType { schema, .. }
            | Operation::TransformCollection { schema, .. }
            | Operation::TransformMulticollectionType { schema, .. }
            | Operation::TransformMultimodelInstanceType { schema, .. }
            | Operation::TransformMultimodelInstancesType { schema, .. }
            | Operation::UpdateIndexes { schema, .. } => Some(schema),
            Operation::MarkAsMultimodel { .. } => None,
        }
    }
}

/// The output of [`crate::builder::MigrationBuilder::compile`] (spec §3).
#[derive(Debug, Clone)]
pub struct CompiledMigration {
    pub operations: Vec<Operation>,
    pub properties: BTreeSet<MigrationProperty>,
}

impl CompiledMigration {
    pub fn is_lossy(&self) -> bool {
        self.properties.contains(&MigrationProperty::Lossy)
    }

    pub fn is_irreversible(&self) -> bool {
        self.properties.contains(&MigrationProperty::Irreversible)
    }
}
