//! Structured error taxonomy for the migration engine.
//!
//! Every fallible boundary in this crate returns [`EngineError`] rather than
//! an opaque string, so callers can match on the failure kind (configuration,
//! chain, schema, simulation, runtime, data) instead of scraping messages.
//! The CLI binary is the only place that widens these into `anyhow::Error`.

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// A non-fatal condition surfaced to the caller instead of failing the
/// operation outright. `lossy`/`irreversible` migrations produce these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationWarning {
    pub migration_id: String,
    pub message: String,
}

impl MigrationWarning {
    pub fn new(migration_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self { migration_id: migration_id.into(), message: message.into() }
    }
}

#[derive(Debug, Error)]
pub enum EngineError {
    // --- Configuration errors -------------------------------------------------
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("failed to parse configuration at {path}: {source}")]
    ConfigParse { path: String, #[source] source: Box<dyn std::error::Error + Send + Sync> },

    // --- Chain errors -----------------------------------------------------------
    #[error("no root migration found in {dir} (a root must have parent = None)")]
    ChainNoRoot { dir: String },

    #[error("multiple root migrations found in {dir}: {ids:?}")]
    ChainMultipleRoots { dir: String, ids: Vec<String> },

    #[error("migration chain branches at {parent_id}: children {children:?}")]
    ChainBranching { parent_id: String, children: Vec<String> },

    #[error("migration {id} references unknown parent {parent_id}")]
    ChainUnknownParent { id: String, parent_id: String },

    #[error("applied migration {id} appears after a non-applied migration in the chain (hole)")]
    ChainHole { id: String },

    // --- Schema errors ------------------------------------------------------------
    #[error("schema not found for {path} (referenced by builder at migration {migration_id})")]
    SchemaNotFound { migration_id: String, path: String },

    #[error(
        "schema change for {name} between migrations {prev_id} and {curr_id} has no corresponding transform operation"
    )]
    UnguardedSchemaChange { name: String, prev_id: String, curr_id: String, field_diff: String },

    #[error("document type {doc_type} of {name} was removed in migration {curr_id} without an explicit transform")]
    OrphanedType { name: String, doc_type: String, curr_id: String },

    #[error("document in {name} fails schema validation after migration {migration_id}: {issues}")]
    PostTransformValidation { migration_id: String, name: String, issues: String },

    #[error("leaf migration schemas do not match project schemas: {detail}")]
    LeafSchemaMismatch { detail: String },

    // --- Simulation errors ----------------------------------------------------------
    #[error("forward operation failed in migration {migration_id}: {detail}")]
    SimulationForward { migration_id: String, detail: String },

    #[error("reverse operation failed in migration {migration_id}: {detail}")]
    SimulationReverse { migration_id: String, detail: String },

    #[error("reversibility proof failed for migration {migration_id}: {diff}")]
    ReversibilityMismatch { migration_id: String, diff: String },

    // --- Runtime errors -------------------------------------------------------------
    #[error("database operation failed: {0}")]
    Runtime(#[from] RuntimeError),

    // --- Data errors ------------------------------------------------------------------
    #[error("data error in collection {collection}: {detail}")]
    Data { collection: String, detail: String },
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("database I/O error: {0}")]
    Io(String),

    #[error("operation timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("failed to install validator on collection {collection}: {detail}")]
    ValidatorInstall { collection: String, detail: String },

    #[error("duplicate _id {id} while seeding {collection}")]
    DuplicateId { collection: String, id: String },
}

impl EngineError {
    pub fn configuration(msg: impl Into<String>) -> Self {
        EngineError::Configuration(msg.into())
    }

    pub fn is_chain_error(&self) -> bool {
        matches!(
            self,
            EngineError::ChainNoRoot { .. }
                | EngineError::ChainMultipleRoots { .. }
                | EngineError::ChainBranching { .. }
                | EngineError::ChainUnknownParent { .. }
                | EngineError::ChainHole { .. }
        )
    }
}
