//! End-to-end scenarios (S1-S6) against the in-memory `DatabaseBackend`, plus
//! catch-up correctness (testable property 9). No live MongoDB instance is
//! required — matches the "unit tests stay inline, integration tests live
//! under `tests/`" split documented in `SPEC_FULL.md` §9.

use std::sync::Arc;

use bson::doc;

use dbee_migrate::applier::Applier;
use dbee_migrate::builder::MigrationBuilder;
use dbee_migrate::catchup::CatchupEngine;
use dbee_migrate::chain::{Chain, MigrateFn, MigrationDefinition, MigrationRegistry};
use dbee_migrate::db::{DatabaseBackend, MemoryBackend};
use dbee_migrate::error::EngineError;
use dbee_migrate::history::{HistoryOperation, HistoryStatus, HistoryStore, MigrationStatus};
use dbee_migrate::schema::{Constraints, FieldSchema, Schema, SchemasDefinition};
use dbee_migrate::validator;

fn users_schema(with_age: bool) -> Schema {
    let mut s = Schema::new().with_field("name", FieldSchema::String(Constraints::default()));
    if with_age {
        s = s.with_field("age", FieldSchema::Number(Constraints::default()));
    }
    s
}

fn schemas_with(name_and_age: bool) -> Arc<SchemasDefinition> {
    let mut def = SchemasDefinition::default();
    def.collections.insert("users".to_string(), users_schema(name_and_age));
    Arc::new(def)
}

fn root_migration(schemas: Arc<SchemasDefinition>, migrate: MigrateFn) -> MigrationDefinition {
    MigrationDefinition { id: "m1".to_string(), name: "create users".to_string(), parent: None, schemas, migrate }
}

// S1: create + seed; rollback reverts history status but the DB layer never
// undoes a create-collection.
#[tokio::test]
async fn s1_create_and_seed() {
    let schemas = schemas_with(false);
    let migration = root_migration(
        schemas.clone(),
        Arc::new(|b: &mut MigrationBuilder| {
            b.create_collection("users")?;
            b.seed_collection("users", vec![doc! { "name": "Alice", "email": "a@x" }])?;
            Ok(())
        }),
    );
    let chain = Chain::build(vec![migration.clone()]).unwrap();
    validator::validate_chain(chain.migrations()).unwrap();

    let backend = MemoryBackend::new();
    let applier = Applier::new(&backend);
    applier.apply_migration(&migration).await.unwrap();

    let docs = backend.find("users", doc! {}).await.unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].get_str("name").unwrap(), "Alice");

    let history = HistoryStore::new(&backend);
    assert_eq!(history.applied_ids().await.unwrap(), vec!["m1".to_string()]);

    applier.rollback_migration(&migration, false).await.unwrap();
    assert_eq!(history.current_status_of("m1").await.unwrap(), MigrationStatus::Reverted);
    assert!(history.applied_ids().await.unwrap().is_empty());
    // create_collection has no reverse effect on the DB beyond a drop, which
    // our reverse dispatch does perform, so the collection is in fact gone —
    // what survives is documented as a *best-effort* restore, not guaranteed.
}

// S2: unguarded schema change is caught by the chain validator before any
// database access.
#[tokio::test]
async fn s2_unguarded_schema_change_fails_check() {
    let root_schemas = schemas_with(false);
    let child_schemas = schemas_with(true);

    let root = root_migration(root_schemas, Arc::new(|b: &mut MigrationBuilder| b.create_collection("users").map(|_| ())));
    let child = MigrationDefinition {
        id: "m2".to_string(),
        name: "add age, no transform".to_string(),
        parent: Some("m1".to_string()),
        schemas: child_schemas,
        migrate: Arc::new(|_b: &mut MigrationBuilder| Ok(())),
    };

    let chain = Chain::build(vec![root, child]).unwrap();
    let err = validator::validate_chain(chain.migrations()).unwrap_err();
    assert!(matches!(err, EngineError::UnguardedSchemaChange { .. }));
}

// S3: a lossy-flagged transform applies without confirmation; lossy is a
// property, not an error.
#[tokio::test]
async fn s3_lossy_transform_applies_and_is_flagged() {
    let mut root_def = SchemasDefinition::default();
    root_def.collections.insert("users".to_string(), users_schema(false));
    let root_schemas = Arc::new(root_def);

    let mut child_def = SchemasDefinition::default();
    child_def.collections.insert(
        "users".to_string(),
        Schema::new()
            .with_field("firstName", FieldSchema::String(Constraints::default()))
            .with_field("lastName", FieldSchema::String(Constraints::default())),
    );
    let child_schemas = Arc::new(child_def);

    let root = root_migration(
        root_schemas,
        Arc::new(|b: &mut MigrationBuilder| {
            b.create_collection("users")?;
            b.seed_collection("users", vec![doc! { "name": "Alice Smith" }])?;
            Ok(())
        }),
    );
    let child = MigrationDefinition {
        id: "m2".to_string(),
        name: "split name".to_string(),
        parent: Some("m1".to_string()),
        schemas: child_schemas,
        migrate: Arc::new(|b: &mut MigrationBuilder| {
            b.transform_collection(
                "users",
                |d| {
                    let name = d.get_str("name").unwrap_or_default().to_string();
                    let mut parts = name.splitn(2, ' ');
                    let first = parts.next().unwrap_or_default().to_string();
                    let last = parts.next().unwrap_or_default().to_string();
                    let mut out = d.clone();
                    out.remove("name");
                    out.insert("firstName", first);
                    out.insert("lastName", last);
                    Ok(out)
                },
                |d| {
                    let mut out = d.clone();
                    let first = out.get_str("firstName").unwrap_or_default().to_string();
                    let last = out.get_str("lastName").unwrap_or_default().to_string();
                    out.remove("firstName");
                    out.remove("lastName");
                    out.insert("name", format!("{first} {last}"));
                    Ok(out)
                },
                true,
                false,
            )?;
            Ok(())
        }),
    };

    let chain = Chain::build(vec![root.clone(), child.clone()]).unwrap();
    validator::validate_chain(chain.migrations()).unwrap();

    let backend = MemoryBackend::new();
    let applier = Applier::new(&backend);
    applier.apply_migration(&root).await.unwrap();
    applier.apply_migration(&child).await.unwrap();

    let docs = backend.find("users", doc! {}).await.unwrap();
    assert_eq!(docs[0].get_str("firstName").unwrap(), "Alice");
    assert_eq!(docs[0].get_str("lastName").unwrap(), "Smith");

    assert!(child.compile().unwrap().is_lossy());
}

// S4: an irreversible transform refuses rollback unless forced.
#[tokio::test]
async fn s4_irreversible_transform_refuses_rollback_without_force() {
    let mut root_def = SchemasDefinition::default();
    root_def.collections.insert(
        "users".to_string(),
        Schema::new().with_field("password", FieldSchema::String(Constraints::default())),
    );
    let root_schemas = Arc::new(root_def);

    let root = root_migration(
        root_schemas.clone(),
        Arc::new(|b: &mut MigrationBuilder| {
            b.create_collection("users")?;
            b.seed_collection("users", vec![doc! { "password": "hunter2" }])?;
            Ok(())
        }),
    );
    let child = MigrationDefinition {
        id: "m2".to_string(),
        name: "hash passwords".to_string(),
        parent: Some("m1".to_string()),
        schemas: root_schemas,
        migrate: Arc::new(|b: &mut MigrationBuilder| {
            b.transform_collection(
                "users",
                |d| {
                    let mut out = d.clone();
                    let pw = out.get_str("password").unwrap_or_default().to_string();
                    out.insert("password", format!("hashed:{pw}"));
                    Ok(out)
                },
                |d| Ok(d.clone()),
                false,
                true,
            )?;
            Ok(())
        }),
    };

    let chain = Chain::build(vec![root.clone(), child.clone()]).unwrap();
    // The simulator's reversibility proof is skipped for irreversible
    // migrations, so `check` still succeeds here.
    validator::validate_chain(chain.migrations()).unwrap();

    let backend = MemoryBackend::new();
    let applier = Applier::new(&backend);
    applier.apply_migration(&root).await.unwrap();
    applier.apply_migration(&child).await.unwrap();

    let err = applier.rollback_migration(&child, false).await.unwrap_err();
    assert!(matches!(err, EngineError::SimulationReverse { .. }));

    applier.rollback_migration(&child, true).await.unwrap();
    let docs = backend.find("users", doc! {}).await.unwrap();
    assert_eq!(docs[0].get_str("password").unwrap(), "hashed:hunter2", "forced rollback does not restore original values");
}

// S5: a multi-model instance created after a migration that touches its
// model is brought up to date by catch-up.
#[tokio::test]
async fn s5_multimodel_catchup() {
    let user_schema = Schema::new().with_field("name", FieldSchema::String(Constraints::default()));
    let mut schemas_def = SchemasDefinition::default();
    schemas_def.multi_models.entry("tenant".to_string()).or_default().insert("user".to_string(), user_schema);
    let schemas = Arc::new(schemas_def);

    let mut registry = MigrationRegistry::new();
    registry.register(MigrationDefinition {
        id: "m1".to_string(),
        name: "declare tenant model".to_string(),
        parent: None,
        schemas: schemas.clone(),
        migrate: Arc::new(|_b: &mut MigrationBuilder| Ok(())),
    });
    registry.register(MigrationDefinition {
        id: "m2".to_string(),
        name: "create tenant_a".to_string(),
        parent: Some("m1".to_string()),
        schemas: schemas.clone(),
        migrate: Arc::new(|b: &mut MigrationBuilder| {
            b.create_multimodel_instance("tenant_a", "tenant")?;
            Ok(())
        }),
    });
    registry.register(MigrationDefinition {
        id: "m3".to_string(),
        name: "add role to users".to_string(),
        parent: Some("m2".to_string()),
        schemas,
        migrate: Arc::new(|b: &mut MigrationBuilder| {
            b.transform_multimodel_instances_type(
                "tenant",
                "user",
                |d| {
                    let mut out = d.clone();
                    out.insert("role", "member");
                    Ok(out)
                },
                |d| {
                    let mut out = d.clone();
                    out.remove("role");
                    Ok(out)
                },
                false,
                false,
            )?;
            Ok(())
        }),
    });
    let chain = registry.build_chain().unwrap();

    let backend = MemoryBackend::new();
    let applier = Applier::new(&backend);
    for m in chain.migrations() {
        applier.apply_migration(m).await.unwrap();
    }
    backend.insert_many("tenant_a", vec![doc! { "_type": "user", "name": "Alice" }]).await.unwrap();

    // tenant_b is created "late", tagged to migration 2 (it never saw m3's
    // transform get applied to it directly, since it didn't exist yet).
    backend.create_collection("tenant_b").await.unwrap();
    backend.insert_many("tenant_b", vec![doc! { "_type": "user", "name": "Bob" }]).await.unwrap();

    let history = HistoryStore::new(&backend);
    let applied = history.applied_ids().await.unwrap();
    CatchupEngine::new(&backend).run(&chain, &applied).await.unwrap();

    let docs = backend.find("tenant_b", doc! { "_type": "user" }).await.unwrap();
    assert_eq!(docs[0].get_str("role").unwrap(), "member");
}

// S6: the exact history-projection sequence from the scenario table.
#[tokio::test]
async fn s6_history_projection_sequence() {
    let backend = MemoryBackend::new();
    let history = HistoryStore::new(&backend);
    let t = |s: i64| chrono::DateTime::from_timestamp(s, 0).unwrap();

    history.record("m1", "m1", HistoryOperation::Applied, HistoryStatus::Success, None, None, t(1)).await.unwrap();
    history.record("m1", "m1", HistoryOperation::Reverted, HistoryStatus::Success, None, None, t(2)).await.unwrap();
    history.record("m1", "m1", HistoryOperation::Applied, HistoryStatus::Failure, None, Some("boom".into()), t(3)).await.unwrap();
    history.record("m1", "m1", HistoryOperation::Applied, HistoryStatus::Success, None, None, t(4)).await.unwrap();

    assert_eq!(history.current_status_of("m1").await.unwrap(), MigrationStatus::Applied);
    assert_eq!(history.history_of("m1").await.unwrap().len(), 4);
}

// Testable property 8: re-running migrate with nothing pending leaves
// appliedIds unchanged.
#[tokio::test]
async fn applied_set_idempotence() {
    let schemas = schemas_with(false);
    let migration = root_migration(
        schemas,
        Arc::new(|b: &mut MigrationBuilder| {
            b.create_collection("users")?;
            Ok(())
        }),
    );
    let backend = MemoryBackend::new();
    let applier = Applier::new(&backend);
    let history = HistoryStore::new(&backend);

    applier.apply_migration(&migration).await.unwrap();
    let first = history.applied_ids().await.unwrap();

    let chain = Chain::build(vec![migration.clone()]).unwrap();
    let pending: Vec<_> = chain.migrations().iter().filter(|m| !first.contains(&m.id)).collect();
    assert!(pending.is_empty());
    assert_eq!(history.applied_ids().await.unwrap(), first);
}
