//! Discovery and chain resolution (spec §4.3).
//!
//! Rust has first-class closures, so `migrate` functions need no declarative
//! DSL; migrations are compiled Rust values registered with a
//! [`discovery::MigrationRegistry`] — the "plug-in module" option named in
//! spec §9's design notes, generalized from the teacher's
//! `MigrationManager::register_migrations` (`examples/lacodda-kasl/src/db/migrations.rs`).

mod discovery;
mod resolver;

pub use discovery::{generate_id, MigrationRegistry};
pub use resolver::{pending_migrations, Chain};

use std::sync::Arc;

use crate::builder::MigrationBuilder;
use crate::error::EngineResult;
use crate::schema::SchemasDefinition;

pub type MigrateFn = Arc<dyn Fn(&mut MigrationBuilder) -> EngineResult<()> + Send + Sync>;

/// A single migration's static definition (spec §3 `MigrationDefinition`).
/// `parent = None` marks the chain root.
#[derive(Clone)]
pub struct MigrationDefinition {
    pub id: String,
    pub name: String,
    pub parent: Option<String>,
    pub schemas: Arc<SchemasDefinition>,
    pub migrate: MigrateFn,
}

impl std::fmt::Debug for MigrationDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationDefinition")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .finish_non_exhaustive()
    }
}

impl MigrationDefinition {
    pub fn compile(&self) -> EngineResult<crate::ir::CompiledMigration> {
        let mut builder = MigrationBuilder::new(self.id.clone(), &self.schemas);
        (self.migrate)(&mut builder)?;
        Ok(builder.compile())
    }
}
