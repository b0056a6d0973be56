//! Event-sourced history store (spec §4.6): an append-only log of migration
//! operations, with current status derived rather than stored directly.
//!
//! Generalizes the teacher's migration-tracking table
//! (`examples/lacodda-kasl/src/db/migrations.rs`, which records one row per
//! applied version into a SQLite tracking table) into an append-only
//! multi-event log that also records reverts and failures, per spec §3/§4.6.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::DatabaseBackend;
use crate::error::{EngineError, EngineResult, RuntimeError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryOperation {
    Applied,
    Reverted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HistoryStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub migration_id: String,
    pub migration_name: String,
    pub operation: HistoryOperation,
    pub status: HistoryStatus,
    pub executed_at: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
    pub engine_version: String,
}

/// Derived current status of a migration (spec §3, testable property 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationStatus {
    Pending,
    Applied,
    Reverted,
    Failed,
}

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const HISTORY_COLLECTION: &str = "__dbee_migration__";

pub struct HistoryStore<'a> {
    backend: &'a dyn DatabaseBackend,
}

impl<'a> HistoryStore<'a> {
    pub fn new(backend: &'a dyn DatabaseBackend) -> Self {
        Self { backend }
    }

    pub async fn record(
        &self,
        migration_id: &str,
        migration_name: &str,
        operation: HistoryOperation,
        status: HistoryStatus,
        duration_ms: Option<u64>,
        error: Option<String>,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let record = HistoryRecord {
            migration_id: migration_id.to_string(),
            migration_name: migration_name.to_string(),
            operation,
            status,
            executed_at: now,
            duration_ms,
            error,
            engine_version: ENGINE_VERSION.to_string(),
        };
        let doc = bson::to_document(&record).map_err(|e| EngineError::Data { collection: HISTORY_COLLECTION.to_string(), detail: e.to_string() })?;
        self.backend.insert_many(HISTORY_COLLECTION, vec![doc]).await
    }

    async fn read_all(&self) -> EngineResult<Vec<HistoryRecord>> {
        let docs = self.backend.find(HISTORY_COLLECTION, bson::doc! {}).await?;
        docs.into_iter()
            .map(|d| bson::from_document(d).map_err(|e| EngineError::Runtime(RuntimeError::Io(e.to_string()))))
            .collect()
    }

    /// Every record in the log, oldest first. Used by the CLI's unfiltered
    /// `history` listing.
    pub async fn all(&self) -> EngineResult<Vec<HistoryRecord>> {
        let mut all = self.read_all().await?;
        all.sort_by_key(|r| r.executed_at);
        Ok(all)
    }

    pub async fn history_of(&self, migration_id: &str) -> EngineResult<Vec<HistoryRecord>> {
        let mut all = self.read_all().await?;
        all.retain(|r| r.migration_id == migration_id);
        all.sort_by_key(|r| r.executed_at);
        Ok(all)
    }

    pub async fn current_status_of(&self, migration_id: &str) -> EngineResult<MigrationStatus> {
        let records = self.history_of(migration_id).await?;
        Ok(derive_status(&records))
    }

    /// Ids whose current status is `Applied`, in the order they reached it
    /// (i.e. by the `executed_at` of the record that produced that status).
    pub async fn applied_ids(&self) -> EngineResult<Vec<String>> {
        let all = self.read_all().await?;
        let mut by_migration: std::collections::BTreeMap<String, Vec<HistoryRecord>> = Default::default();
        for r in all {
            by_migration.entry(r.migration_id.clone()).or_default().push(r);
        }
        let mut applied: Vec<(DateTime<Utc>, String)> = Vec::new();
        for (id, mut records) in by_migration {
            records.sort_by_key(|r| r.executed_at);
            if derive_status(&records) == MigrationStatus::Applied {
                let last_success_at = records
                    .iter()
                    .rev()
                    .find(|r| matches!((r.operation, r.status), (HistoryOperation::Applied, HistoryStatus::Success)))
                    .map(|r| r.executed_at)
                    .unwrap_or_else(Utc::now);
                applied.push((last_success_at, id));
            }
        }
        applied.sort_by_key(|(t, _)| *t);
        Ok(applied.into_iter().map(|(_, id)| id).collect())
    }

    pub async fn last_applied(&self) -> EngineResult<Option<HistoryRecord>> {
        let all = self.read_all().await?;
        Ok(all
            .into_iter()
            .filter(|r| matches!((r.operation, r.status), (HistoryOperation::Applied, HistoryStatus::Success)))
            .max_by_key(|r| r.executed_at))
    }
}

/// Current status is the operation of the last `status = success` record,
/// else `Failed` if any record exists, else `Pending` (spec §3).
pub fn derive_status(records: &[HistoryRecord]) -> MigrationStatus {
    if let Some(last_success) = records.iter().rev().find(|r| r.status == HistoryStatus::Success) {
        return match last_success.operation {
            HistoryOperation::Applied => MigrationStatus::Applied,
            HistoryOperation::Reverted => MigrationStatus::Reverted,
        };
    }
    if records.is_empty() {
        MigrationStatus::Pending
    } else {
        MigrationStatus::Failed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(op: HistoryOperation, status: HistoryStatus, t: i64) -> HistoryRecord {
        HistoryRecord {
            migration_id: "m1".into(),
            migration_name: "m1".into(),
            operation: op,
            status,
            executed_at: DateTime::from_timestamp(t, 0).unwrap(),
            duration_ms: None,
            error: None,
            engine_version: ENGINE_VERSION.to_string(),
        }
    }

    #[test]
    fn no_records_is_pending() {
        assert_eq!(derive_status(&[]), MigrationStatus::Pending);
    }

    #[test]
    fn only_failures_is_failed() {
        let records = vec![rec(HistoryOperation::Applied, HistoryStatus::Failure, 1)];
        assert_eq!(derive_status(&records), MigrationStatus::Failed);
    }

    #[test]
    fn sequence_per_spec_s6_scenario() {
        let records = vec![
            rec(HistoryOperation::Applied, HistoryStatus::Success, 1),
            rec(HistoryOperation::Reverted, HistoryStatus::Success, 2),
            rec(HistoryOperation::Applied, HistoryStatus::Failure, 3),
            rec(HistoryOperation::Applied, HistoryStatus::Success, 4),
        ];
        assert_eq!(derive_status(&records), MigrationStatus::Applied);
        assert_eq!(records.len(), 4);
    }
}
