//! Deterministic hashing for schema snapshots.
//!
//! The canonical form excludes `created_at` and `schema_hash` so that two
//! snapshots with identical structure always produce the same digest
//! regardless of when they were captured. Entities are serialized sorted by
//! kgid and properties sorted by name; object keys are emitted in sorted
//! order with no whitespace.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::ir::schema::SchemaSnapshot;

/// Serialize a JSON value with sorted object keys and compact separators.
/// Key order must not depend on the in-memory map implementation.
fn canonical_json(value: &Value) -> Result<String, serde_json::Error> {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = String::from("{");
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                out.push_str(&canonical_json(&map[*key])?);
            }
            out.push('}');
            Ok(out)
        }
        Value::Array(items) => {
            let mut out = String::from("[");
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&canonical_json(item)?);
            }
            out.push(']');
            Ok(out)
        }
        scalar => serde_json::to_string(scalar),
    }
}

/// Return the SHA-256 hex digest of a snapshot's canonical form.
pub fn compute_hash(snapshot: &SchemaSnapshot) -> Result<String, serde_json::Error> {
    let mut value = serde_json::to_value(snapshot.sorted())?;
    if let Some(map) = value.as_object_mut() {
        map.remove("created_at");
        map.remove("schema_hash");
    }
    let canonical = canonical_json(&value)?;
    let digest = Sha256::digest(canonical.as_bytes());
    Ok(format!("{digest:x}"))
}

/// Return a copy of the snapshot with `schema_hash` populated.
pub fn hash_snapshot(snapshot: SchemaSnapshot) -> Result<SchemaSnapshot, serde_json::Error> {
    let hash = compute_hash(&snapshot)?;
    let mut snapshot = snapshot;
    snapshot.schema_hash = hash;
    Ok(snapshot)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::ir::schema::{NodeIR, PropertyIR, RelationshipIR, SchemaSnapshot};

    fn node(kgid: &str, label: &str, properties: Vec<PropertyIR>) -> NodeIR {
        NodeIR {
            kgid: kgid.into(),
            label: label.into(),
            class_name: label.into(),
            module_path: format!("models/{}.yaml", label.to_lowercase()),
            properties,
            relationship_defs: vec![],
        }
    }

    #[test]
    fn hash_ignores_created_at() {
        let a = SchemaSnapshot::new(vec![node("p1", "Person", vec![])], vec![]);
        let mut b = a.clone();
        b.created_at = Utc::now() + Duration::hours(4);
        assert_eq!(
            compute_hash(&a).expect("hash a"),
            compute_hash(&b).expect("hash b")
        );
    }

    #[test]
    fn hash_ignores_collection_order() {
        let a = SchemaSnapshot::new(
            vec![
                node("p1", "Person", vec![PropertyIR::new("age", "integer")]),
                node("c1", "City", vec![]),
            ],
            vec![],
        );
        let b = SchemaSnapshot::new(
            vec![
                node("c1", "City", vec![]),
                node("p1", "Person", vec![PropertyIR::new("age", "integer")]),
            ],
            vec![],
        );
        assert_eq!(
            compute_hash(&a).expect("hash a"),
            compute_hash(&b).expect("hash b")
        );
    }

    #[test]
    fn hash_changes_when_a_property_changes() {
        let a = SchemaSnapshot::new(
            vec![node("p1", "Person", vec![PropertyIR::new("age", "integer")])],
            vec![],
        );
        let b = SchemaSnapshot::new(
            vec![node(
                "p1",
                "Person",
                vec![PropertyIR::new("age", "integer").required()],
            )],
            vec![],
        );
        assert_ne!(
            compute_hash(&a).expect("hash a"),
            compute_hash(&b).expect("hash b")
        );
    }

    #[test]
    fn hash_changes_when_a_relationship_is_added() {
        let a = SchemaSnapshot::new(vec![], vec![]);
        let b = SchemaSnapshot::new(
            vec![],
            vec![RelationshipIR {
                kgid: "r1".into(),
                rel_type: "KNOWS".into(),
                class_name: "Knows".into(),
                module_path: "models/knows.yaml".into(),
                properties: vec![],
            }],
        );
        assert_ne!(
            compute_hash(&a).expect("hash a"),
            compute_hash(&b).expect("hash b")
        );
    }

    #[test]
    fn hash_snapshot_populates_field() {
        let snapshot = SchemaSnapshot::new(vec![node("p1", "Person", vec![])], vec![]);
        let hashed = hash_snapshot(snapshot.clone()).expect("hash");
        assert_eq!(hashed.schema_hash.len(), 64);
        assert_eq!(hashed.schema_hash, compute_hash(&snapshot).expect("hash"));
    }
}
