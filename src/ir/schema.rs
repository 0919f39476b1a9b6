//! Data structures for the schema intermediate representation.
//!
//! All types are plain immutable values. Entity identity is the `kgid`:
//! an opaque string that never changes across the life of a model, even
//! when its label or class name does. Nodes and relationships share one
//! kgid namespace.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// IR for a single property on a node or relationship.
///
/// Identity within its owning entity is `name`; equality covers every field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyIR {
    pub name: String,
    /// Property type name, e.g. "string", "integer".
    pub property_type: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub unique_index: bool,
    #[serde(default)]
    pub index: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<String>>,
}

impl PropertyIR {
    pub fn new(name: &str, property_type: &str) -> Self {
        Self {
            name: name.to_string(),
            property_type: property_type.to_string(),
            required: false,
            unique_index: false,
            index: false,
            default: None,
            choices: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique_index = true;
        self
    }

    pub fn indexed(mut self) -> Self {
        self.index = true;
        self
    }
}

/// Direction of a relationship definition on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    To,
    From,
    Either,
}

/// A typed edge declaration nested under a `NodeIR`. Not independently
/// identified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipDefIR {
    pub attr_name: String,
    /// Relationship type string, e.g. "FRIENDS_WITH".
    pub rel_type: String,
    pub target_label: String,
    pub direction: Direction,
    /// kgid of the relationship model carrying edge properties, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_kgid: Option<String>,
}

/// IR for a node model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeIR {
    pub kgid: String,
    pub label: String,
    pub class_name: String,
    pub module_path: String,
    #[serde(default)]
    pub properties: Vec<PropertyIR>,
    #[serde(default)]
    pub relationship_defs: Vec<RelationshipDefIR>,
}

impl NodeIR {
    /// Returns a copy with properties sorted by name. Serialization and
    /// hashing rely on this canonical order.
    pub fn sorted(&self) -> Self {
        let mut node = self.clone();
        node.properties.sort_by(|a, b| a.name.cmp(&b.name));
        node
    }
}

/// IR for a relationship model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationshipIR {
    pub kgid: String,
    pub rel_type: String,
    pub class_name: String,
    pub module_path: String,
    #[serde(default)]
    pub properties: Vec<PropertyIR>,
}

impl RelationshipIR {
    pub fn sorted(&self) -> Self {
        let mut rel = self.clone();
        rel.properties.sort_by(|a, b| a.name.cmp(&b.name));
        rel
    }
}

/// Immutable snapshot of the full schema IR at a point in time.
///
/// `schema_hash` is a pure function of `nodes` and `relationships`;
/// `created_at` never participates in the hash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    pub nodes: Vec<NodeIR>,
    pub relationships: Vec<RelationshipIR>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub schema_hash: String,
}

impl SchemaSnapshot {
    pub fn new(nodes: Vec<NodeIR>, relationships: Vec<RelationshipIR>) -> Self {
        Self {
            nodes,
            relationships,
            created_at: Utc::now(),
            schema_hash: String::new(),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), Vec::new())
    }

    /// Nodes keyed by kgid. Parsing guarantees no duplicates.
    pub fn nodes_by_kgid(&self) -> BTreeMap<&str, &NodeIR> {
        self.nodes.iter().map(|n| (n.kgid.as_str(), n)).collect()
    }

    /// Relationships keyed by kgid.
    pub fn relationships_by_kgid(&self) -> BTreeMap<&str, &RelationshipIR> {
        self.relationships
            .iter()
            .map(|r| (r.kgid.as_str(), r))
            .collect()
    }

    /// Returns a copy with entities sorted by kgid and their properties
    /// sorted by name.
    pub fn sorted(&self) -> Self {
        let mut nodes: Vec<NodeIR> = self.nodes.iter().map(NodeIR::sorted).collect();
        nodes.sort_by(|a, b| a.kgid.cmp(&b.kgid));
        let mut relationships: Vec<RelationshipIR> =
            self.relationships.iter().map(RelationshipIR::sorted).collect();
        relationships.sort_by(|a, b| a.kgid.cmp(&b.kgid));
        Self {
            nodes,
            relationships,
            created_at: self.created_at,
            schema_hash: self.schema_hash.clone(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.sorted())
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn by_kgid_maps_cover_all_entities() {
        let snapshot = SchemaSnapshot::new(
            vec![
                NodeIR {
                    kgid: "n2".into(),
                    label: "B".into(),
                    class_name: "B".into(),
                    module_path: "models/b.yaml".into(),
                    properties: vec![],
                    relationship_defs: vec![],
                },
                NodeIR {
                    kgid: "n1".into(),
                    label: "A".into(),
                    class_name: "A".into(),
                    module_path: "models/a.yaml".into(),
                    properties: vec![],
                    relationship_defs: vec![],
                },
            ],
            vec![],
        );
        let by_kgid = snapshot.nodes_by_kgid();
        assert_eq!(by_kgid.len(), 2);
        // BTreeMap iterates in kgid order.
        let keys: Vec<&str> = by_kgid.keys().copied().collect();
        assert_eq!(keys, vec!["n1", "n2"]);
    }

    #[test]
    fn json_round_trip_preserves_structure() {
        let snapshot = SchemaSnapshot::new(
            vec![NodeIR {
                kgid: "p1".into(),
                label: "Person".into(),
                class_name: "Person".into(),
                module_path: "models/person.yaml".into(),
                properties: vec![PropertyIR::new("name", "string").required()],
                relationship_defs: vec![RelationshipDefIR {
                    attr_name: "friends".into(),
                    rel_type: "FRIENDS_WITH".into(),
                    target_label: "Person".into(),
                    direction: Direction::Either,
                    model_kgid: None,
                }],
            }],
            vec![],
        );
        let json = snapshot.to_json().expect("to_json");
        let back = SchemaSnapshot::from_json(&json).expect("from_json");
        assert_eq!(back.nodes, snapshot.nodes);
        assert_eq!(back.relationships, snapshot.relationships);
    }
}
