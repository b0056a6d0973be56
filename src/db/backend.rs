//! Abstract database capabilities consumed by the engine (spec §6).
//!
//! Grounded in `examples/other_examples/*MoosicBox*switchy-schema*migration.rs*`'s
//! `#[async_trait] trait Migration<'a>` pattern: an object-safe async trait
//! so the same dispatch code in `src/applier.rs` and `src/simulator` runs
//! against either [`super::memory::MemoryBackend`] or
//! [`super::mongo::MongoBackend`].

use async_trait::async_trait;
use bson::Document;

use crate::error::EngineResult;

#[derive(Debug, Clone, Default)]
pub struct IndexSpec {
    pub name: String,
    pub keys: Document,
    pub unique: bool,
    pub sparse: bool,
}

#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    async fn list_collections(&self) -> EngineResult<Vec<String>>;
    async fn create_collection(&self, name: &str) -> EngineResult<()>;
    async fn drop_collection(&self, name: &str) -> EngineResult<()>;

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> EngineResult<()>;
    async fn delete_many(&self, collection: &str, filter: Document) -> EngineResult<u64>;
    async fn update_many(&self, collection: &str, filter: Document, update: Document) -> EngineResult<u64>;
    async fn find(&self, collection: &str, filter: Document) -> EngineResult<Vec<Document>>;

    async fn create_index(&self, collection: &str, index: IndexSpec) -> EngineResult<()>;
    async fn drop_index(&self, collection: &str, index_name: &str) -> EngineResult<()>;
    async fn list_indexes(&self, collection: &str) -> EngineResult<Vec<IndexSpec>>;

    async fn modify_collection_validator(&self, collection: &str, validator: Document) -> EngineResult<()>;

    /// `true` if the backend can run a migration's operations inside a
    /// transaction (spec §6 "optional transactions"). The in-memory backend
    /// reports `false`; the live MongoDB backend reports `true` when
    /// connected to a replica set.
    fn supports_transactions(&self) -> bool {
        false
    }
}
