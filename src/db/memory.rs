//! In-memory [`DatabaseBackend`] for tests and the simulator (spec §9 ambient
//! test-tooling note): a `HashMap`-backed stand-in requiring no live MongoDB
//! instance, used by the integration tests under `tests/`.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bson::Document;

use crate::error::{EngineError, EngineResult, RuntimeError};

use super::backend::{DatabaseBackend, IndexSpec};

#[derive(Default)]
struct Inner {
    collections: HashMap<String, Vec<Document>>,
    indexes: HashMap<String, Vec<IndexSpec>>,
    validators: HashMap<String, Document>,
}

pub struct MemoryBackend {
    inner: Mutex<Inner>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self { inner: Mutex::new(Inner::default()) }
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(k, v)| doc.get(k) == Some(v))
}

#[async_trait]
impl DatabaseBackend for MemoryBackend {
    async fn list_collections(&self) -> EngineResult<Vec<String>> {
        Ok(self.inner.lock().unwrap().collections.keys().cloned().collect())
    }

    async fn create_collection(&self, name: &str) -> EngineResult<()> {
        self.inner.lock().unwrap().collections.entry(name.to_string()).or_default();
        Ok(())
    }

    async fn drop_collection(&self, name: &str) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.collections.remove(name);
        inner.indexes.remove(name);
        inner.validators.remove(name);
        Ok(())
    }

    async fn insert_many(&self, collection: &str, docs: Vec<Document>) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();
        let existing = inner.collections.entry(collection.to_string()).or_default();
        for doc in docs {
            if let Ok(id) = doc.get_str("_id").map(str::to_string) {
                if existing.iter().any(|d| d.get_str("_id").ok() == Some(id.as_str())) {
                    return Err(EngineError::Runtime(RuntimeError::DuplicateId { collection: collection.to_string(), id }));
                }
            }
            existing.push(doc);
        }
        Ok(())
    }

    async fn delete_many(&self, collection: &str, filter: Document) -> EngineResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let Some(docs) = inner.collections.get_mut(collection) else { return Ok(0) };
        let before = docs.len();
        docs.retain(|d| !matches_filter(d, &filter));
        Ok((before - docs.len()) as u64)
    }

    async fn update_many(&self, collection: &str, filter: Document, update: Document) -> EngineResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        let Some(docs) = inner.collections.get_mut(collection) else { return Ok(0) };
        let mut count = 0;
        for doc in docs.iter_mut() {
            if matches_filter(doc, &filter) {
                if let Some(set) = update.get_document("$set").ok() {
                    for (k, v) in set.iter() {
                        doc.insert(k.clone(), v.clone());
                    }
                }
                count += 1;
            }
        }
        Ok(count)
    }

    async fn find(&self, collection: &str, filter: Document) -> EngineResult<Vec<Document>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .collections
            .get(collection)
            .map(|docs| docs.iter().filter(|d| matches_filter(d, &filter)).cloned().collect())
            .unwrap_or_default())
    }

    async fn create_index(&self, collection: &str, index: IndexSpec) -> EngineResult<()> {
        self.inner.lock().unwrap().indexes.entry(collection.to_string()).or_default().push(index);
        Ok(())
    }

    async fn drop_index(&self, collection: &str, index_name: &str) -> EngineResult<()> {
        if let Some(indexes) = self.inner.lock().unwrap().indexes.get_mut(collection) {
            indexes.retain(|i| i.name != index_name);
        }
        Ok(())
    }

    async fn list_indexes(&self, collection: &str) -> EngineResult<Vec<IndexSpec>> {
        Ok(self.inner.lock().unwrap().indexes.get(collection).cloned().unwrap_or_default())
    }

    async fn modify_collection_validator(&self, collection: &str, validator: Document) -> EngineResult<()> {
        self.inner.lock().unwrap().validators.insert(collection.to_string(), validator);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[tokio::test]
    async fn insert_and_find_round_trip() {
        let backend = MemoryBackend::new();
        backend.insert_many("users", vec![doc! { "_id": "1", "name": "Alice" }]).await.unwrap();
        let found = backend.find("users", doc! {}).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let backend = MemoryBackend::new();
        backend.insert_many("users", vec![doc! { "_id": "1" }]).await.unwrap();
        let err = backend.insert_many("users", vec![doc! { "_id": "1" }]).await.unwrap_err();
        assert!(matches!(err, EngineError::Runtime(RuntimeError::DuplicateId { .. })));
    }

    #[tokio::test]
    async fn delete_many_matches_filter() {
        let backend = MemoryBackend::new();
        backend.insert_many("users", vec![doc! { "_id": "1", "active": true }, doc! { "_id": "2", "active": false }]).await.unwrap();
        let deleted = backend.delete_many("users", doc! { "active": false }).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(backend.find("users", doc! {}).await.unwrap().len(), 1);
    }
}
