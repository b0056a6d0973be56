//! # dbee-migrate
//!
//! A schema-aware migration engine for MongoDB-family databases: define
//! migrations as compiled Rust values, validate them offline against an
//! in-memory simulator before touching a live database, then apply or roll
//! them back with full history tracking.
//!
//! ## Pipeline
//!
//! A migration's user-written `migrate` closure is resolved by the
//! [`builder`] against its declared [`schema::SchemasDefinition`] into a
//! [`ir::CompiledMigration`]. Migrations are linked into a [`chain::Chain`]
//! by parent id. Before anything touches a real database, the [`simulator`]
//! replays a chain in memory and the [`validator`] checks schema-change
//! guards and reversibility. [`applier`] executes the real thing against a
//! [`db::DatabaseBackend`], [`history`] records what happened, and
//! [`catchup`] brings dynamically-created multi-model instances up to date.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use dbee_migrate::chain::MigrationRegistry;
//! use dbee_migrate::db::MongoBackend;
//! use dbee_migrate::config::EngineConfig;
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = EngineConfig::default();
//! let backend = MongoBackend::connect(&config).await?;
//! let registry = MigrationRegistry::new();
//! let chain = registry.build_chain()?;
//! dbee_migrate::validator::validate_chain(&chain)?;
//! # Ok(())
//! # }
//! ```

pub mod applier;
pub mod builder;
pub mod catchup;
pub mod chain;
pub mod config;
pub mod db;
pub mod error;
pub mod history;
pub mod ir;
pub mod schema;
pub mod simulator;
pub mod validator;
