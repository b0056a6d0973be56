//! Migration registration (spec §4.3 "loads each migration file").
//!
//! Generalizes the teacher's `MigrationManager` (a `Vec<Migration>` built up
//! via `register_migrations`/`add_migration`,
//! `examples/lacodda-kasl/src/db/migrations.rs`) from a flat versioned list to
//! a parent-linked chain of [`super::MigrationDefinition`]s.

use std::path::Path;

use crate::error::{EngineError, EngineResult};

use super::resolver::Chain;
use super::MigrationDefinition;

#[derive(Default)]
pub struct MigrationRegistry {
    migrations: Vec<MigrationDefinition>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, definition: MigrationDefinition) -> &mut Self {
        self.migrations.push(definition);
        self
    }

    /// Verifies the configured migrations directory exists. Actual migration
    /// loading in this crate is via [`Self::register`] (migrations are
    /// compiled Rust values, not dynamically loaded files) — see module docs.
    pub fn verify_directory(path: impl AsRef<Path>) -> EngineResult<()> {
        let path = path.as_ref();
        if !path.is_dir() {
            return Err(EngineError::configuration(format!("migrations directory not found: {}", path.display())));
        }
        Ok(())
    }

    pub fn build_chain(&self) -> EngineResult<Chain> {
        Chain::build(self.migrations.clone())
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

/// Generates a collision-resistant migration id from a human-readable slug:
/// `<slug>_<8 hex chars>`. Convenience for callers that don't hand-author
/// sequential ids; two developers picking the same slug on separate branches
/// still land on distinct ids.
pub fn generate_id(slug: &str) -> String {
    let suffix: u32 = rand::random();
    format!("{slug}_{suffix:08x}")
}
