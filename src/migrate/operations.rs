//! Migration execution context and its operation vocabulary.
//!
//! Every operation appends an audit entry to the context's log before it is
//! executed, so a failed run still shows what was attempted. With no bound
//! client, or in dry-run mode, operations are recorded but never sent.

use serde_json::{json, Map, Value};
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{GraphError, MigrationError};

/// Node property used to tag ingested data with its batch id.
pub const BATCH_TAG_PROPERTY: &str = "_stratum_batch";
/// Batch tag applied when no batch was begun.
pub const UNTRACKED_BATCH: &str = "untracked";

/// Minimal query interface a live graph connection must provide.
pub trait GraphClient {
    fn run(&mut self, query: &str, params: &Map<String, Value>) -> Result<(), GraphError>;
}

/// Uninhabited client type for engine calls with no bound connection:
/// `engine.upgrade(None::<&mut NoClient>, ...)`.
pub enum NoClient {}

impl GraphClient for NoClient {
    fn run(&mut self, _query: &str, _params: &Map<String, Value>) -> Result<(), GraphError> {
        match *self {}
    }
}

/// One audited operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub kind: String,
    pub details: Value,
}

/// How bulk operations split large record sets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkStrategy {
    /// The client issues one query per chunk.
    ClientChunked,
    /// A single query using `CALL { ... } IN TRANSACTIONS`; the server
    /// commits in batches of the chunk size.
    ServerBatched,
}

fn sanitize_identifier(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}

/// Parameter key names for relationship record maps.
#[derive(Debug, Clone)]
pub struct RelKeys {
    pub source_key: String,
    pub target_key: String,
    pub properties_key: String,
}

impl Default for RelKeys {
    fn default() -> Self {
        Self {
            source_key: "source".to_string(),
            target_key: "target".to_string(),
            properties_key: "properties".to_string(),
        }
    }
}

/// Execution context handed to migration bodies.
pub struct MigrationContext<'a> {
    client: Option<&'a mut dyn GraphClient>,
    dry_run: bool,
    operations: Vec<Operation>,
    batch_id: Option<String>,
}

impl<'a> MigrationContext<'a> {
    pub fn new(client: Option<&'a mut dyn GraphClient>, dry_run: bool) -> Self {
        Self {
            client,
            dry_run,
            operations: Vec::new(),
            batch_id: None,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// All operations recorded so far, including ones that were never sent.
    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn current_batch(&self) -> &str {
        self.batch_id.as_deref().unwrap_or(UNTRACKED_BATCH)
    }

    /// Start a batch scope for subsequent data operations. Returns the
    /// batch id (a 12-hex-digit token when not supplied).
    pub fn begin_batch(&mut self, batch_id: Option<String>) -> String {
        let id = batch_id.unwrap_or_else(|| {
            let uuid = Uuid::new_v4().simple().to_string();
            uuid[..12].to_string()
        });
        info!("Beginning data batch '{}'", id);
        self.batch_id = Some(id.clone());
        id
    }

    /// Record then (unless dry-run or unbound) execute a query.
    fn record_and_run(
        &mut self,
        kind: &str,
        details: Value,
        query: &str,
        params: Map<String, Value>,
    ) -> Result<(), MigrationError> {
        debug!(operation = kind, "recording migration operation");
        self.operations.push(Operation {
            kind: kind.to_string(),
            details,
        });
        if self.dry_run {
            return Ok(());
        }
        if let Some(client) = self.client.as_deref_mut() {
            client.run(query, &params)?;
        }
        Ok(())
    }

    // -- schema operations --

    pub fn add_unique_constraint(
        &mut self,
        label: &str,
        property: &str,
    ) -> Result<(), MigrationError> {
        let name = format!(
            "stratum_uniq_{}_{}",
            sanitize_identifier(label),
            sanitize_identifier(property)
        );
        let query = format!(
            "CREATE CONSTRAINT {name} IF NOT EXISTS \
             FOR (n:{label}) REQUIRE n.{property} IS UNIQUE"
        );
        self.record_and_run(
            "add_unique_constraint",
            json!({ "label": label, "property": property, "constraint": name }),
            &query,
            Map::new(),
        )
    }

    pub fn drop_unique_constraint(
        &mut self,
        label: &str,
        property: &str,
    ) -> Result<(), MigrationError> {
        let name = format!(
            "stratum_uniq_{}_{}",
            sanitize_identifier(label),
            sanitize_identifier(property)
        );
        let query = format!("DROP CONSTRAINT {name} IF EXISTS");
        self.record_and_run(
            "drop_unique_constraint",
            json!({ "label": label, "property": property, "constraint": name }),
            &query,
            Map::new(),
        )
    }

    pub fn add_existence_constraint(
        &mut self,
        label: &str,
        property: &str,
    ) -> Result<(), MigrationError> {
        let name = format!(
            "stratum_exists_{}_{}",
            sanitize_identifier(label),
            sanitize_identifier(property)
        );
        let query = format!(
            "CREATE CONSTRAINT {name} IF NOT EXISTS \
             FOR (n:{label}) REQUIRE n.{property} IS NOT NULL"
        );
        self.record_and_run(
            "add_existence_constraint",
            json!({ "label": label, "property": property, "constraint": name }),
            &query,
            Map::new(),
        )
    }

    pub fn drop_existence_constraint(
        &mut self,
        label: &str,
        property: &str,
    ) -> Result<(), MigrationError> {
        let name = format!(
            "stratum_exists_{}_{}",
            sanitize_identifier(label),
            sanitize_identifier(property)
        );
        let query = format!("DROP CONSTRAINT {name} IF EXISTS");
        self.record_and_run(
            "drop_existence_constraint",
            json!({ "label": label, "property": property, "constraint": name }),
            &query,
            Map::new(),
        )
    }

    pub fn add_index(&mut self, label: &str, property: &str) -> Result<(), MigrationError> {
        let name = format!(
            "stratum_idx_{}_{}",
            sanitize_identifier(label),
            sanitize_identifier(property)
        );
        let query = format!(
            "CREATE INDEX {name} IF NOT EXISTS FOR (n:{label}) ON (n.{property})"
        );
        self.record_and_run(
            "add_index",
            json!({ "label": label, "property": property, "index": name }),
            &query,
            Map::new(),
        )
    }

    pub fn drop_index(&mut self, label: &str, property: &str) -> Result<(), MigrationError> {
        let name = format!(
            "stratum_idx_{}_{}",
            sanitize_identifier(label),
            sanitize_identifier(property)
        );
        let query = format!("DROP INDEX {name} IF EXISTS");
        self.record_and_run(
            "drop_index",
            json!({ "label": label, "property": property, "index": name }),
            &query,
            Map::new(),
        )
    }

    pub fn rename_label(&mut self, old: &str, new: &str) -> Result<(), MigrationError> {
        let query = format!("MATCH (n:{old}) SET n:{new} REMOVE n:{old}");
        self.record_and_run(
            "rename_label",
            json!({ "old": old, "new": new }),
            &query,
            Map::new(),
        )
    }

    pub fn rename_relationship_type(
        &mut self,
        old: &str,
        new: &str,
    ) -> Result<(), MigrationError> {
        let query = format!(
            "MATCH (a)-[r:{old}]->(b) \
             CREATE (a)-[r2:{new}]->(b) SET r2 = properties(r) DELETE r"
        );
        self.record_and_run(
            "rename_relationship_type",
            json!({ "old": old, "new": new }),
            &query,
            Map::new(),
        )
    }

    pub fn add_node_property(
        &mut self,
        label: &str,
        property: &str,
        default: Option<Value>,
    ) -> Result<(), MigrationError> {
        let query = format!(
            "MATCH (n:{label}) WHERE n.{property} IS NULL SET n.{property} = $default"
        );
        let mut params = Map::new();
        params.insert(
            "default".to_string(),
            default.clone().unwrap_or(Value::Null),
        );
        self.record_and_run(
            "add_node_property",
            json!({ "label": label, "property": property, "default": default }),
            &query,
            params,
        )
    }

    pub fn remove_node_property(
        &mut self,
        label: &str,
        property: &str,
    ) -> Result<(), MigrationError> {
        let query = format!("MATCH (n:{label}) REMOVE n.{property}");
        self.record_and_run(
            "remove_node_property",
            json!({ "label": label, "property": property }),
            &query,
            Map::new(),
        )
    }

    pub fn rename_node_property(
        &mut self,
        label: &str,
        old: &str,
        new: &str,
    ) -> Result<(), MigrationError> {
        let query = format!(
            "MATCH (n:{label}) WHERE n.{old} IS NOT NULL \
             SET n.{new} = n.{old} REMOVE n.{old}"
        );
        self.record_and_run(
            "rename_node_property",
            json!({ "label": label, "old": old, "new": new }),
            &query,
            Map::new(),
        )
    }

    /// Escape hatch for operations outside the vocabulary.
    pub fn run_query(
        &mut self,
        query: &str,
        params: Map<String, Value>,
    ) -> Result<(), MigrationError> {
        self.record_and_run(
            "run_query",
            json!({ "query": query }),
            query,
            params,
        )
    }

    // -- data operations --

    pub fn create_nodes(
        &mut self,
        label: &str,
        records: &[Map<String, Value>],
    ) -> Result<(), MigrationError> {
        let batch = self.current_batch().to_string();
        let query = format!(
            "UNWIND $records AS rec CREATE (n:{label}) \
             SET n = rec, n.{BATCH_TAG_PROPERTY} = $batch"
        );
        let mut params = Map::new();
        params.insert("records".to_string(), Value::Array(
            records.iter().cloned().map(Value::Object).collect(),
        ));
        params.insert("batch".to_string(), Value::String(batch.clone()));
        self.record_and_run(
            "create_nodes",
            json!({ "label": label, "count": records.len(), "batch": batch }),
            &query,
            params,
        )
    }

    pub fn upsert_nodes(
        &mut self,
        label: &str,
        merge_keys: &[&str],
        records: &[Map<String, Value>],
    ) -> Result<(), MigrationError> {
        let batch = self.current_batch().to_string();
        let merge_clause = merge_keys
            .iter()
            .map(|k| format!("{k}: rec.{k}"))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            "UNWIND $records AS rec MERGE (n:{label} {{{merge_clause}}}) \
             SET n += rec, n.{BATCH_TAG_PROPERTY} = $batch"
        );
        let mut params = Map::new();
        params.insert("records".to_string(), Value::Array(
            records.iter().cloned().map(Value::Object).collect(),
        ));
        params.insert("batch".to_string(), Value::String(batch.clone()));
        self.record_and_run(
            "upsert_nodes",
            json!({
                "label": label,
                "merge_keys": merge_keys,
                "count": records.len(),
                "batch": batch,
            }),
            &query,
            params,
        )
    }

    pub fn create_relationships(
        &mut self,
        rel_type: &str,
        source_label: &str,
        target_label: &str,
        match_key: &str,
        records: &[Map<String, Value>],
        keys: &RelKeys,
    ) -> Result<(), MigrationError> {
        let batch = self.current_batch().to_string();
        let query = format!(
            "UNWIND $records AS rec \
             MATCH (a:{source_label} {{{match_key}: rec.{source}}}) \
             MATCH (b:{target_label} {{{match_key}: rec.{target}}}) \
             CREATE (a)-[r:{rel_type}]->(b) \
             SET r = coalesce(rec.{props}, {{}}), r.{BATCH_TAG_PROPERTY} = $batch",
            source = keys.source_key,
            target = keys.target_key,
            props = keys.properties_key,
        );
        let mut params = Map::new();
        params.insert("records".to_string(), Value::Array(
            records.iter().cloned().map(Value::Object).collect(),
        ));
        params.insert("batch".to_string(), Value::String(batch.clone()));
        self.record_and_run(
            "create_relationships",
            json!({
                "rel_type": rel_type,
                "source_label": source_label,
                "target_label": target_label,
                "count": records.len(),
                "batch": batch,
            }),
            &query,
            params,
        )
    }

    pub fn upsert_relationships(
        &mut self,
        rel_type: &str,
        source_label: &str,
        target_label: &str,
        match_key: &str,
        records: &[Map<String, Value>],
        keys: &RelKeys,
    ) -> Result<(), MigrationError> {
        let batch = self.current_batch().to_string();
        let query = format!(
            "UNWIND $records AS rec \
             MATCH (a:{source_label} {{{match_key}: rec.{source}}}) \
             MATCH (b:{target_label} {{{match_key}: rec.{target}}}) \
             MERGE (a)-[r:{rel_type}]->(b) \
             SET r += coalesce(rec.{props}, {{}}), r.{BATCH_TAG_PROPERTY} = $batch",
            source = keys.source_key,
            target = keys.target_key,
            props = keys.properties_key,
        );
        let mut params = Map::new();
        params.insert("records".to_string(), Value::Array(
            records.iter().cloned().map(Value::Object).collect(),
        ));
        params.insert("batch".to_string(), Value::String(batch.clone()));
        self.record_and_run(
            "upsert_relationships",
            json!({
                "rel_type": rel_type,
                "source_label": source_label,
                "target_label": target_label,
                "count": records.len(),
                "batch": batch,
            }),
            &query,
            params,
        )
    }

    pub fn bulk_create_nodes(
        &mut self,
        label: &str,
        records: &[Map<String, Value>],
        chunk_size: usize,
        strategy: ChunkStrategy,
    ) -> Result<(), MigrationError> {
        match strategy {
            ChunkStrategy::ClientChunked => {
                for chunk in records.chunks(chunk_size.max(1)) {
                    self.create_nodes(label, chunk)?;
                }
                Ok(())
            }
            ChunkStrategy::ServerBatched => {
                let batch = self.current_batch().to_string();
                let query = format!(
                    "UNWIND $records AS rec \
                     CALL {{ WITH rec CREATE (n:{label}) \
                     SET n = rec, n.{BATCH_TAG_PROPERTY} = $batch }} \
                     IN TRANSACTIONS OF {chunk_size} ROWS"
                );
                let mut params = Map::new();
                params.insert("records".to_string(), Value::Array(
                    records.iter().cloned().map(Value::Object).collect(),
                ));
                params.insert("batch".to_string(), Value::String(batch.clone()));
                self.record_and_run(
                    "bulk_create_nodes",
                    json!({
                        "label": label,
                        "count": records.len(),
                        "chunk_size": chunk_size,
                        "strategy": "server_batched",
                        "batch": batch,
                    }),
                    &query,
                    params,
                )
            }
        }
    }

    pub fn bulk_upsert_nodes(
        &mut self,
        label: &str,
        merge_keys: &[&str],
        records: &[Map<String, Value>],
        chunk_size: usize,
        strategy: ChunkStrategy,
    ) -> Result<(), MigrationError> {
        match strategy {
            ChunkStrategy::ClientChunked => {
                for chunk in records.chunks(chunk_size.max(1)) {
                    self.upsert_nodes(label, merge_keys, chunk)?;
                }
                Ok(())
            }
            ChunkStrategy::ServerBatched => {
                let batch = self.current_batch().to_string();
                let merge_clause = merge_keys
                    .iter()
                    .map(|k| format!("{k}: rec.{k}"))
                    .collect::<Vec<_>>()
                    .join(", ");
                let query = format!(
                    "UNWIND $records AS rec \
                     CALL {{ WITH rec MERGE (n:{label} {{{merge_clause}}}) \
                     SET n += rec, n.{BATCH_TAG_PROPERTY} = $batch }} \
                     IN TRANSACTIONS OF {chunk_size} ROWS"
                );
                let mut params = Map::new();
                params.insert("records".to_string(), Value::Array(
                    records.iter().cloned().map(Value::Object).collect(),
                ));
                params.insert("batch".to_string(), Value::String(batch.clone()));
                self.record_and_run(
                    "bulk_upsert_nodes",
                    json!({
                        "label": label,
                        "merge_keys": merge_keys,
                        "count": records.len(),
                        "chunk_size": chunk_size,
                        "strategy": "server_batched",
                        "batch": batch,
                    }),
                    &query,
                    params,
                )
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn bulk_create_relationships(
        &mut self,
        rel_type: &str,
        source_label: &str,
        target_label: &str,
        match_key: &str,
        records: &[Map<String, Value>],
        keys: &RelKeys,
        chunk_size: usize,
        strategy: ChunkStrategy,
    ) -> Result<(), MigrationError> {
        match strategy {
            ChunkStrategy::ClientChunked => {
                for chunk in records.chunks(chunk_size.max(1)) {
                    self.create_relationships(
                        rel_type,
                        source_label,
                        target_label,
                        match_key,
                        chunk,
                        keys,
                    )?;
                }
                Ok(())
            }
            ChunkStrategy::ServerBatched => {
                let batch = self.current_batch().to_string();
                let query = format!(
                    "UNWIND $records AS rec \
                     CALL {{ WITH rec \
                     MATCH (a:{source_label} {{{match_key}: rec.{source}}}) \
                     MATCH (b:{target_label} {{{match_key}: rec.{target}}}) \
                     CREATE (a)-[r:{rel_type}]->(b) \
                     SET r = coalesce(rec.{props}, {{}}), \
                     r.{BATCH_TAG_PROPERTY} = $batch }} \
                     IN TRANSACTIONS OF {chunk_size} ROWS",
                    source = keys.source_key,
                    target = keys.target_key,
                    props = keys.properties_key,
                );
                let mut params = Map::new();
                params.insert("records".to_string(), Value::Array(
                    records.iter().cloned().map(Value::Object).collect(),
                ));
                params.insert("batch".to_string(), Value::String(batch.clone()));
                self.record_and_run(
                    "bulk_create_relationships",
                    json!({
                        "rel_type": rel_type,
                        "count": records.len(),
                        "chunk_size": chunk_size,
                        "strategy": "server_batched",
                        "batch": batch,
                    }),
                    &query,
                    params,
                )
            }
        }
    }

    pub fn delete_nodes_by_batch(&mut self, batch_id: &str) -> Result<(), MigrationError> {
        let query = format!(
            "MATCH (n) WHERE n.{BATCH_TAG_PROPERTY} = $batch DETACH DELETE n"
        );
        let mut params = Map::new();
        params.insert("batch".to_string(), Value::String(batch_id.to_string()));
        self.record_and_run(
            "delete_nodes_by_batch",
            json!({ "batch": batch_id }),
            &query,
            params,
        )
    }

    pub fn delete_relationships_by_batch(
        &mut self,
        batch_id: &str,
    ) -> Result<(), MigrationError> {
        let query = format!(
            "MATCH ()-[r]->() WHERE r.{BATCH_TAG_PROPERTY} = $batch DELETE r"
        );
        let mut params = Map::new();
        params.insert("batch".to_string(), Value::String(batch_id.to_string()));
        self.record_and_run(
            "delete_relationships_by_batch",
            json!({ "batch": batch_id }),
            &query,
            params,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RecordingClient {
        queries: Vec<String>,
    }

    impl GraphClient for RecordingClient {
        fn run(&mut self, query: &str, _params: &Map<String, Value>) -> Result<(), GraphError> {
            self.queries.push(query.to_string());
            Ok(())
        }
    }

    struct FailingClient;

    impl GraphClient for FailingClient {
        fn run(&mut self, _query: &str, _params: &Map<String, Value>) -> Result<(), GraphError> {
            Err(GraphError::new("connection reset"))
        }
    }

    #[test]
    fn operations_are_audited_before_execution() {
        let mut ctx = MigrationContext::new(None, false);
        ctx.add_unique_constraint("Person", "email").expect("op");
        ctx.add_index("Person", "name").expect("op");
        let kinds: Vec<&str> = ctx.operations().iter().map(|o| o.kind.as_str()).collect();
        assert_eq!(kinds, vec!["add_unique_constraint", "add_index"]);
    }

    #[test]
    fn failed_operation_still_appears_in_audit_log() {
        let mut client = FailingClient;
        let mut ctx = MigrationContext::new(Some(&mut client), false);
        let err = ctx.rename_label("Person", "Human").expect_err("should fail");
        assert!(matches!(err, MigrationError::Graph(_)));
        assert_eq!(ctx.operations().len(), 1);
        assert_eq!(ctx.operations()[0].kind, "rename_label");
    }

    #[test]
    fn dry_run_records_but_never_sends() {
        let mut client = RecordingClient { queries: vec![] };
        let mut ctx = MigrationContext::new(Some(&mut client), true);
        ctx.drop_index("Person", "name").expect("op");
        assert_eq!(ctx.operations().len(), 1);
        drop(ctx);
        assert!(client.queries.is_empty());
    }

    #[test]
    fn untracked_batch_is_the_default_tag() {
        let mut ctx = MigrationContext::new(None, false);
        assert_eq!(ctx.current_batch(), UNTRACKED_BATCH);
        ctx.create_nodes("Person", &[]).expect("op");
        assert_eq!(ctx.operations()[0].details["batch"], "untracked");
    }

    #[test]
    fn begin_batch_generates_twelve_hex_chars() {
        let mut ctx = MigrationContext::new(None, false);
        let id = ctx.begin_batch(None);
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(ctx.current_batch(), id);
    }

    #[test]
    fn client_chunking_emits_one_operation_per_chunk() {
        let mut ctx = MigrationContext::new(None, false);
        let records: Vec<Map<String, Value>> = (0..5)
            .map(|i| {
                let mut m = Map::new();
                m.insert("id".to_string(), json!(i));
                m
            })
            .collect();
        ctx.bulk_create_nodes("Person", &records, 2, ChunkStrategy::ClientChunked)
            .expect("op");
        assert_eq!(ctx.operations().len(), 3);
        assert_eq!(ctx.operations()[0].details["count"], 2);
        assert_eq!(ctx.operations()[2].details["count"], 1);
    }

    #[test]
    fn server_batching_emits_a_single_operation() {
        let mut client = RecordingClient { queries: vec![] };
        let mut ctx = MigrationContext::new(Some(&mut client), false);
        let records: Vec<Map<String, Value>> = (0..5).map(|_| Map::new()).collect();
        ctx.bulk_create_nodes("Person", &records, 2, ChunkStrategy::ServerBatched)
            .expect("op");
        assert_eq!(ctx.operations().len(), 1);
        drop(ctx);
        assert_eq!(client.queries.len(), 1);
        assert!(client.queries[0].contains("IN TRANSACTIONS OF 2 ROWS"));
    }

    #[test]
    fn merge_clause_uses_all_keys() {
        let mut client = RecordingClient { queries: vec![] };
        let mut ctx = MigrationContext::new(Some(&mut client), false);
        ctx.upsert_nodes("Person", &["id", "email"], &[]).expect("op");
        drop(ctx);
        assert!(client.queries[0].contains("MERGE (n:Person {id: rec.id, email: rec.email})"));
    }
}
