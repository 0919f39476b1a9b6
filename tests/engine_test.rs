use std::fs;

use serde_json::{Map, Value};
use stratum::config::ProjectConfig;
use stratum::errors::{GraphError, MigrationError};
use stratum::ir::schema::{NodeIR, PropertyIR, RelationshipIR, SchemaSnapshot};
use stratum::ledger::Ledger;
use stratum::migrate::engine::MigrationEngine;
use stratum::migrate::operations::{GraphClient, MigrationContext, NoClient};
use stratum::migrate::registry::{FnMigration, MigrationRegistry};

struct RecordingClient {
    queries: Vec<String>,
}

impl RecordingClient {
    fn new() -> Self {
        Self { queries: vec![] }
    }
}

impl GraphClient for RecordingClient {
    fn run(&mut self, query: &str, _params: &Map<String, Value>) -> Result<(), GraphError> {
        self.queries.push(query.to_string());
        Ok(())
    }
}

fn add_name_index(ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
    ctx.add_index("Person", "name")
}

fn drop_name_index(ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
    ctx.drop_index("Person", "name")
}

fn add_email_constraint(ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
    ctx.add_unique_constraint("Person", "email")
}

fn drop_email_constraint(ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
    ctx.drop_unique_constraint("Person", "email")
}

fn fail(_ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
    Err(MigrationError::Graph(GraphError::new("boom")))
}

fn noop(_ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
    Ok(())
}

fn three_step_registry() -> MigrationRegistry {
    let mut registry = MigrationRegistry::new();
    // Registered deliberately out of chain order.
    registry
        .register(Box::new(FnMigration::new(
            "0003_add_friendship",
            Some("0002_add_email"),
            "hash-c",
            true,
            noop,
            noop,
        )))
        .expect("register");
    registry
        .register(Box::new(FnMigration::new(
            "0001_init",
            None,
            "hash-a",
            true,
            add_name_index,
            drop_name_index,
        )))
        .expect("register");
    registry
        .register(Box::new(FnMigration::new(
            "0002_add_email",
            Some("0001_init"),
            "hash-b",
            true,
            add_email_constraint,
            drop_email_constraint,
        )))
        .expect("register");
    registry
}

async fn setup<'a>(
    config: &'a ProjectConfig,
    ledger: &'a Ledger,
    registry: &'a MigrationRegistry,
) -> MigrationEngine<'a> {
    MigrationEngine::new(config, ledger, registry)
}

#[tokio::test]
async fn chain_order_comes_from_parent_links_not_registration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ProjectConfig::new("test", dir.path());
    let ledger = Ledger::connect_url("sqlite::memory:").await.expect("ledger");
    let registry = three_step_registry();
    let engine = setup(&config, &ledger, &registry).await;

    let chain: Vec<&str> = engine.discover().iter().map(|m| m.revision_id()).collect();
    assert_eq!(
        chain,
        vec!["0001_init", "0002_add_email", "0003_add_friendship"]
    );
}

#[tokio::test]
async fn upgrade_applies_all_pending_and_records_them() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ProjectConfig::new("test", dir.path());
    let ledger = Ledger::connect_url("sqlite::memory:").await.expect("ledger");
    let registry = three_step_registry();
    let engine = setup(&config, &ledger, &registry).await;

    let mut client = RecordingClient::new();
    let applied = engine
        .upgrade(None, Some(&mut client), false)
        .await
        .expect("upgrade");
    assert_eq!(
        applied,
        vec!["0001_init", "0002_add_email", "0003_add_friendship"]
    );
    assert_eq!(client.queries.len(), 2);
    assert!(client.queries[0].contains("CREATE INDEX"));
    assert!(client.queries[1].contains("IS UNIQUE"));

    let head = ledger.get_head().await.expect("head").expect("head row");
    assert_eq!(head.revision_id, "0003_add_friendship");
    assert_eq!(head.schema_hash, "hash-c");

    // Second run finds nothing pending.
    let again = engine.upgrade(None, None::<&mut NoClient>, false).await.expect("upgrade");
    assert!(again.is_empty());
}

#[tokio::test]
async fn upgrade_stops_at_target_inclusive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ProjectConfig::new("test", dir.path());
    let ledger = Ledger::connect_url("sqlite::memory:").await.expect("ledger");
    let registry = three_step_registry();
    let engine = setup(&config, &ledger, &registry).await;

    let applied = engine
        .upgrade(Some("0002_add_email"), None::<&mut NoClient>, false)
        .await
        .expect("upgrade");
    assert_eq!(applied, vec!["0001_init", "0002_add_email"]);

    let status = engine.status().await.expect("status");
    assert_eq!(status.head.as_deref(), Some("0002_add_email"));
    assert_eq!(status.pending, vec!["0003_add_friendship"]);
}

#[tokio::test]
async fn dry_run_touches_neither_graph_nor_ledger() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ProjectConfig::new("test", dir.path());
    let ledger = Ledger::connect_url("sqlite::memory:").await.expect("ledger");
    let registry = three_step_registry();
    let engine = setup(&config, &ledger, &registry).await;

    let mut client = RecordingClient::new();
    let applied = engine
        .upgrade(None, Some(&mut client), true)
        .await
        .expect("dry run");
    assert_eq!(applied.len(), 3);
    assert!(client.queries.is_empty());
    assert!(ledger.get_head().await.expect("head").is_none());
}

#[tokio::test]
async fn failed_upgrade_stops_the_run_and_names_the_migration() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ProjectConfig::new("test", dir.path());
    let ledger = Ledger::connect_url("sqlite::memory:").await.expect("ledger");

    let mut registry = MigrationRegistry::new();
    registry
        .register(Box::new(FnMigration::new(
            "0001_init",
            None,
            "hash-a",
            true,
            add_name_index,
            drop_name_index,
        )))
        .expect("register");
    registry
        .register(Box::new(FnMigration::new(
            "0002_breaks",
            Some("0001_init"),
            "hash-b",
            true,
            fail,
            noop,
        )))
        .expect("register");
    let engine = setup(&config, &ledger, &registry).await;

    let err = engine.upgrade(None, None::<&mut NoClient>, false).await.expect_err("fails");
    match err {
        MigrationError::UpgradeFailed { revision_id, .. } => {
            assert_eq!(revision_id, "0002_breaks");
        }
        other => panic!("unexpected error: {other}"),
    }
    // The migration that succeeded before the failure stays recorded; the
    // failed one is not.
    assert!(ledger.is_applied("0001_init").await.expect("is_applied"));
    assert!(!ledger.is_applied("0002_breaks").await.expect("is_applied"));
}

#[tokio::test]
async fn downgrade_defaults_to_one_step() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ProjectConfig::new("test", dir.path());
    let ledger = Ledger::connect_url("sqlite::memory:").await.expect("ledger");
    let registry = three_step_registry();
    let engine = setup(&config, &ledger, &registry).await;

    engine.upgrade(None, None::<&mut NoClient>, false).await.expect("upgrade");
    let rolled_back = engine.downgrade(None, None::<&mut NoClient>, false).await.expect("downgrade");
    assert_eq!(rolled_back, vec!["0003_add_friendship"]);

    let status = engine.status().await.expect("status");
    assert_eq!(status.head.as_deref(), Some("0002_add_email"));
}

#[tokio::test]
async fn downgrade_target_is_exclusive() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ProjectConfig::new("test", dir.path());
    let ledger = Ledger::connect_url("sqlite::memory:").await.expect("ledger");
    let registry = three_step_registry();
    let engine = setup(&config, &ledger, &registry).await;

    engine.upgrade(None, None::<&mut NoClient>, false).await.expect("upgrade");
    let mut client = RecordingClient::new();
    let rolled_back = engine
        .downgrade(Some("0001_init"), Some(&mut client), false)
        .await
        .expect("downgrade");
    assert_eq!(rolled_back, vec!["0003_add_friendship", "0002_add_email"]);
    // 0003 has a noop downgrade; only 0002 sends a query.
    assert_eq!(client.queries.len(), 1);
    assert!(client.queries[0].contains("DROP CONSTRAINT"));

    let status = engine.status().await.expect("status");
    assert_eq!(status.head.as_deref(), Some("0001_init"));
}

#[tokio::test]
async fn rollback_unsafe_migration_refuses_before_running() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ProjectConfig::new("test", dir.path());
    let ledger = Ledger::connect_url("sqlite::memory:").await.expect("ledger");

    let mut registry = MigrationRegistry::new();
    registry
        .register(Box::new(FnMigration::new(
            "0001_destructive",
            None,
            "hash-a",
            false,
            noop,
            fail,
        )))
        .expect("register");
    let engine = setup(&config, &ledger, &registry).await;

    engine.upgrade(None, None::<&mut NoClient>, false).await.expect("upgrade");
    let mut client = RecordingClient::new();
    let err = engine
        .downgrade(None, Some(&mut client), false)
        .await
        .expect_err("refuses");
    assert!(matches!(err, MigrationError::RollbackUnsafe(id) if id == "0001_destructive"));
    // The check fires before the body; nothing reached the graph or the
    // ledger.
    assert!(client.queries.is_empty());
    assert!(ledger.is_applied("0001_destructive").await.expect("is_applied"));
}

#[tokio::test]
async fn create_migration_scaffolds_from_the_schema_diff() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ProjectConfig::new("test", dir.path());
    let ledger = Ledger::connect_url("sqlite::memory:").await.expect("ledger");
    let registry = MigrationRegistry::new();
    let engine = setup(&config, &ledger, &registry).await;

    let snapshot = SchemaSnapshot::new(
        vec![NodeIR {
            kgid: "person-0001".into(),
            label: "Person".into(),
            class_name: "Person".into(),
            module_path: "models/person.yaml".into(),
            properties: vec![PropertyIR::new("email", "string").unique()],
            relationship_defs: vec![],
        }],
        vec![RelationshipIR {
            kgid: "friends-0001".into(),
            rel_type: "FRIENDS_WITH".into(),
            class_name: "FriendsWith".into(),
            module_path: "models/friends_with.yaml".into(),
            properties: vec![],
        }],
    );
    let path = engine
        .create_migration("Add friendship", Some(snapshot), true)
        .await
        .expect("create");

    assert!(path.ends_with("m0001_add_friendship.rs"));
    let content = fs::read_to_string(&path).expect("read");
    assert!(content.contains("\"0001_add_friendship\""));
    assert!(content.contains("None,"));
    assert!(content.contains("ctx.add_unique_constraint(\"Person\", \"email\")?;"));
    assert!(content.contains("FRIENDS_WITH"));
    assert!(content.contains("fn downgrade"));

    let mod_rs = fs::read_to_string(config.migrations_dir().join("mod.rs")).expect("mod.rs");
    assert!(mod_rs.contains("pub mod m0001_add_friendship;"));
}

#[tokio::test]
async fn create_migration_diffs_against_the_parent_snapshot() {
    let dir = tempfile::tempdir().expect("tempdir");
    let config = ProjectConfig::new("test", dir.path());
    let ledger = Ledger::connect_url("sqlite::memory:").await.expect("ledger");

    // Chain tip with a stored snapshot containing a bare Person node.
    let base = SchemaSnapshot::new(
        vec![NodeIR {
            kgid: "person-0001".into(),
            label: "Person".into(),
            class_name: "Person".into(),
            module_path: "models/person.yaml".into(),
            properties: vec![],
            relationship_defs: vec![],
        }],
        vec![],
    );
    let base = stratum::ir::hash_snapshot(base).expect("hash");
    ledger
        .store_snapshot(&base.schema_hash, &base.to_json().expect("json"))
        .await
        .expect("store");

    let mut registry = MigrationRegistry::new();
    registry
        .register(Box::new(FnMigration::new(
            "0001_init",
            None,
            &base.schema_hash,
            true,
            noop,
            noop,
        )))
        .expect("register");
    let engine = setup(&config, &ledger, &registry).await;

    // Same node, one new property.
    let mut next = base.clone();
    next.schema_hash.clear();
    next.nodes[0].properties.push(PropertyIR::new("age", "integer"));
    let path = engine
        .create_migration("add age", Some(next), true)
        .await
        .expect("create");

    let content = fs::read_to_string(&path).expect("read");
    assert!(content.contains("Some(\"0001_init\")"));
    assert!(content.contains("ctx.add_node_property(\"Person\", \"age\", None)?;"));
    // The base node itself is unchanged, so no add/remove lines for it.
    assert!(!content.contains("New node model"));
}
