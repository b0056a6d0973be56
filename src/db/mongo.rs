//! Live MongoDB implementation of [`DatabaseBackend`] (spec §6), wrapping the
//! official `mongodb` driver. Connection setup mirrors the teacher's
//! `Db::new()` (`examples/lacodda-kasl/src/db/db.rs`): resolve configuration,
//! open a client, return a ready-to-use handle — generalized here from a
//! `rusqlite::Connection` to an async `mongodb::Database`.

use async_trait::async_trait;
use bson::Document;
use futures::stream::TryStreamExt;
use mongodb::options::{ClientOptions, IndexOptions};
use mongodb::{Client, Database, IndexModel};

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, RuntimeError};

use super::backend::{DatabaseBackend, IndexSpec};

pub struct MongoBackend {
    db: Database,
    transactional: bool,
}

impl MongoBackend {
    pub async fn connect(config: &EngineConfig) -> EngineResult<Self> {
        let options = ClientOptions::parse(&config.database.connection.uri)
            .await
            .map_err(|e| EngineError::Runtime(RuntimeError::Io(e.to_string())))?;
        let client = Client::with_options(options).map_err(|e| EngineError::Runtime(RuntimeError::Io(e.to_string())))?;
        let db = client.database(&config.database.name);
        // Transaction support requires a replica set / mongos; this is a
        // best-effort capability probe, not a hard requirement.
        let transactional = client.start_session().await.is_ok();
        Ok(Self { db, transactional })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

#[async_trait]
impl DatabaseBackend for MongoBackend {
    async fn list_collections(&self) -> EngineResult<Vec<String>> {
        self.db.list_collection_names().await.map_err(|e| EngineError::Runtime(RuntimeError::Io(e.to_string())))
    }

    async fn create_collection(&self, name: &str) -> EngineResult<()> {
        let existing = self.list_collections().await?;
        if existing.iter().any(|c| c == name) {
            return Ok(());
        }
        self.db.create_collection(name).await.map_err(|e| EngineError::Runtime(RuntimeError::Io(e.to_string())))
    }

    async fn drop_collection(&self, name: &str) -> EngineResult<()> {
        self.db.collection::<Document>(name).drop().await.map_err(|e| EngineError::Runtime(RuntimeError::Io(e.to_string())))
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> EngineResult<()> {
        if docs.is_empty() {
            return Ok(());
        }
        self.db
            .collection::<Document>(collection)
            .insert_many(docs)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Runtime(RuntimeError::Io(e.to_string())))
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> EngineResult<u64> {
        let result = self
            .db
            .collection::<Document>(collection)
            .delete_many(filter)
            .await
            .map_err(|e| EngineError::Runtime(RuntimeError::Io(e.to_string())))?;
        Ok(result.deleted_count)
    }

    async fn update_many(&self, collection: &str, filter: Document, update: Document) -> EngineResult<u64> {
        let result = self
            .db
            .collection::<Document>(collection)
            .update_many(filter, update)
            .await
            .map_err(|e| EngineError::Runtime(RuntimeError::Io(e.to_string())))?;
        Ok(result.modified_count)
    }

    async fn find(&self, collection: &str, filter: Document) -> EngineResult<Vec<Document>> {
        let cursor = self
            .db
            .collection::<Document>(collection)
            .find(filter)
            .await
            .map_err(|e| EngineError::Runtime(RuntimeError::Io(e.to_string())))?;
        cursor.try_collect().await.map_err(|e| EngineError::Runtime(RuntimeError::Io(e.to_string())))
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> EngineResult<()> {
        let model = IndexModel::builder()
            .keys(index.keys)
            .options(
                IndexOptions::builder()
                    .name(Some(index.name))
                    .unique(Some(index.unique))
                    .sparse(Some(index.sparse))
                    .build(),
            )
            .build();
        self.db
            .collection::<Document>(collection)
            .create_index(model)
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Runtime(RuntimeError::Io(e.to_string())))
    }

    async fn drop_index(&self, collection: &str, index_name: &str) -> EngineResult<()> {
        self.db
            .collection::<Document>(collection)
            .drop_index(index_name)
            .await
            .map_err(|e| EngineError::Runtime(RuntimeError::Io(e.to_string())))
    }

    async fn list_indexes(&self, collection: &str) -> EngineResult<Vec<IndexSpec>> {
        let mut cursor = self
            .db
            .collection::<Document>(collection)
            .list_indexes()
            .await
            .map_err(|e| EngineError::Runtime(RuntimeError::Io(e.to_string())))?;
        let mut out = Vec::new();
        while let Some(model) = cursor.try_next().await.map_err(|e| EngineError::Runtime(RuntimeError::Io(e.to_string())))? {
            out.push(IndexSpec {
                name: model.options.as_ref().and_then(|o| o.name.clone()).unwrap_or_default(),
                keys: model.keys,
                unique: model.options.as_ref().and_then(|o| o.unique).unwrap_or(false),
                sparse: model.options.as_ref().and_then(|o| o.sparse).unwrap_or(false),
            });
        }
        Ok(out)
    }

    async fn modify_collection_validator(&self, collection: &str, validator: Document) -> EngineResult<()> {
        self.db
            .run_command(bson::doc! {
                "collMod": collection,
                "validator": { "$jsonSchema": validator },
            })
            .await
            .map(|_| ())
            .map_err(|e| EngineError::Runtime(RuntimeError::ValidatorInstall { collection: collection.to_string(), detail: e.to_string() }))
    }

    fn supports_transactions(&self) -> bool {
        self.transactional
    }
}
