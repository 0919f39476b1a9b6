//! Structural diff between two schema snapshots, keyed by kgid.
//!
//! `diff_snapshots` is a pure function with deterministic output order:
//! it iterates the union of kgids in sorted order, never insertion order,
//! so the same pair of snapshots always yields the same diff.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use crate::ir::schema::{NodeIR, PropertyIR, RelationshipIR, SchemaSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Removed,
    Modified,
}

/// A single property-level change.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub kind: ChangeKind,
    pub property_name: String,
    pub old: Option<PropertyIR>,
    pub new: Option<PropertyIR>,
}

impl PropertyChange {
    pub fn description(&self) -> String {
        match self.kind {
            ChangeKind::Added => {
                let type_name = self
                    .new
                    .as_ref()
                    .map(|p| p.property_type.as_str())
                    .unwrap_or("?");
                format!("  + property '{}' ({type_name})", self.property_name)
            }
            ChangeKind::Removed => format!("  - property '{}'", self.property_name),
            ChangeKind::Modified => {
                let mut changes = Vec::new();
                if let (Some(old), Some(new)) = (&self.old, &self.new) {
                    if old.property_type != new.property_type {
                        changes.push(format!(
                            "type {} -> {}",
                            old.property_type, new.property_type
                        ));
                    }
                    if old.required != new.required {
                        changes.push(format!("required={}", new.required));
                    }
                    if old.unique_index != new.unique_index {
                        changes.push(format!("unique_index={}", new.unique_index));
                    }
                    if old.index != new.index {
                        changes.push(format!("index={}", new.index));
                    }
                }
                let detail = if changes.is_empty() {
                    "modified".to_string()
                } else {
                    changes.join(", ")
                };
                format!("  ~ property '{}' ({detail})", self.property_name)
            }
        }
    }
}

/// Change descriptor for a node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeChange {
    pub kind: ChangeKind,
    pub kgid: String,
    pub old: Option<NodeIR>,
    pub new: Option<NodeIR>,
    pub property_changes: Vec<PropertyChange>,
    pub label_renamed: bool,
}

impl NodeChange {
    pub fn description(&self) -> String {
        match self.kind {
            ChangeKind::Added => {
                let label = self.new.as_ref().map(|n| n.label.as_str()).unwrap_or("?");
                format!("+ Node '{label}' (kgid={})", self.kgid)
            }
            ChangeKind::Removed => {
                let label = self.old.as_ref().map(|n| n.label.as_str()).unwrap_or("?");
                format!("- Node '{label}' (kgid={})", self.kgid)
            }
            ChangeKind::Modified => {
                let mut out = format!("~ Node kgid={}", self.kgid);
                if self.label_renamed {
                    if let (Some(old), Some(new)) = (&self.old, &self.new) {
                        let _ = write!(out, "\n  renamed '{}' -> '{}'", old.label, new.label);
                    }
                }
                for pc in &self.property_changes {
                    let _ = write!(out, "\n{}", pc.description());
                }
                out
            }
        }
    }
}

/// Change descriptor for a relationship model.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipChange {
    pub kind: ChangeKind,
    pub kgid: String,
    pub old: Option<RelationshipIR>,
    pub new: Option<RelationshipIR>,
    pub property_changes: Vec<PropertyChange>,
}

impl RelationshipChange {
    pub fn description(&self) -> String {
        match self.kind {
            ChangeKind::Added => {
                let rel_type = self.new.as_ref().map(|r| r.rel_type.as_str()).unwrap_or("?");
                format!("+ Relationship '{rel_type}' (kgid={})", self.kgid)
            }
            ChangeKind::Removed => {
                let rel_type = self.old.as_ref().map(|r| r.rel_type.as_str()).unwrap_or("?");
                format!("- Relationship '{rel_type}' (kgid={})", self.kgid)
            }
            ChangeKind::Modified => {
                let mut out = format!("~ Relationship kgid={}", self.kgid);
                for pc in &self.property_changes {
                    let _ = write!(out, "\n{}", pc.description());
                }
                out
            }
        }
    }
}

/// Full diff between two schema snapshots.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchemaDiff {
    pub node_changes: Vec<NodeChange>,
    pub relationship_changes: Vec<RelationshipChange>,
}

impl SchemaDiff {
    pub fn has_changes(&self) -> bool {
        !self.node_changes.is_empty() || !self.relationship_changes.is_empty()
    }

    pub fn summary(&self) -> String {
        if !self.has_changes() {
            return "No schema changes detected.".to_string();
        }
        let mut lines = Vec::new();
        for nc in &self.node_changes {
            lines.push(nc.description());
        }
        for rc in &self.relationship_changes {
            lines.push(rc.description());
        }
        lines.join("\n")
    }
}

/// Diff two property sets by name, iterating the sorted union of names.
fn diff_properties(old_props: &[PropertyIR], new_props: &[PropertyIR]) -> Vec<PropertyChange> {
    let old_map: std::collections::BTreeMap<&str, &PropertyIR> =
        old_props.iter().map(|p| (p.name.as_str(), p)).collect();
    let new_map: std::collections::BTreeMap<&str, &PropertyIR> =
        new_props.iter().map(|p| (p.name.as_str(), p)).collect();

    let names: BTreeSet<&str> = old_map.keys().chain(new_map.keys()).copied().collect();
    let mut changes = Vec::new();

    for name in names {
        match (old_map.get(name), new_map.get(name)) {
            (None, Some(new_p)) => changes.push(PropertyChange {
                kind: ChangeKind::Added,
                property_name: name.to_string(),
                old: None,
                new: Some((*new_p).clone()),
            }),
            (Some(old_p), None) => changes.push(PropertyChange {
                kind: ChangeKind::Removed,
                property_name: name.to_string(),
                old: Some((*old_p).clone()),
                new: None,
            }),
            (Some(old_p), Some(new_p)) if old_p != new_p => changes.push(PropertyChange {
                kind: ChangeKind::Modified,
                property_name: name.to_string(),
                old: Some((*old_p).clone()),
                new: Some((*new_p).clone()),
            }),
            _ => {}
        }
    }

    changes
}

/// Compute a `SchemaDiff` between two snapshots keyed by kgid.
///
/// A kgid that changes entity kind between snapshots surfaces as one
/// `Removed` under the old kind and one `Added` under the new kind; the
/// differ never cross-references the node and relationship maps.
pub fn diff_snapshots(old: &SchemaSnapshot, new: &SchemaSnapshot) -> SchemaDiff {
    let mut diff = SchemaDiff::default();

    let old_nodes = old.nodes_by_kgid();
    let new_nodes = new.nodes_by_kgid();
    let node_kgids: BTreeSet<&str> = old_nodes.keys().chain(new_nodes.keys()).copied().collect();

    for kgid in node_kgids {
        match (old_nodes.get(kgid), new_nodes.get(kgid)) {
            (None, Some(new_n)) => diff.node_changes.push(NodeChange {
                kind: ChangeKind::Added,
                kgid: kgid.to_string(),
                old: None,
                new: Some((*new_n).clone()),
                property_changes: vec![],
                label_renamed: false,
            }),
            (Some(old_n), None) => diff.node_changes.push(NodeChange {
                kind: ChangeKind::Removed,
                kgid: kgid.to_string(),
                old: Some((*old_n).clone()),
                new: None,
                property_changes: vec![],
                label_renamed: false,
            }),
            (Some(old_n), Some(new_n)) if old_n != new_n => {
                let property_changes = diff_properties(&old_n.properties, &new_n.properties);
                let label_renamed = old_n.label != new_n.label;
                if !property_changes.is_empty() || label_renamed {
                    diff.node_changes.push(NodeChange {
                        kind: ChangeKind::Modified,
                        kgid: kgid.to_string(),
                        old: Some((*old_n).clone()),
                        new: Some((*new_n).clone()),
                        property_changes,
                        label_renamed,
                    });
                }
            }
            _ => {}
        }
    }

    let old_rels = old.relationships_by_kgid();
    let new_rels = new.relationships_by_kgid();
    let rel_kgids: BTreeSet<&str> = old_rels.keys().chain(new_rels.keys()).copied().collect();

    for kgid in rel_kgids {
        match (old_rels.get(kgid), new_rels.get(kgid)) {
            (None, Some(new_r)) => diff.relationship_changes.push(RelationshipChange {
                kind: ChangeKind::Added,
                kgid: kgid.to_string(),
                old: None,
                new: Some((*new_r).clone()),
                property_changes: vec![],
            }),
            (Some(old_r), None) => diff.relationship_changes.push(RelationshipChange {
                kind: ChangeKind::Removed,
                kgid: kgid.to_string(),
                old: Some((*old_r).clone()),
                new: None,
                property_changes: vec![],
            }),
            (Some(old_r), Some(new_r)) if old_r != new_r => {
                let property_changes = diff_properties(&old_r.properties, &new_r.properties);
                if !property_changes.is_empty() {
                    diff.relationship_changes.push(RelationshipChange {
                        kind: ChangeKind::Modified,
                        kgid: kgid.to_string(),
                        old: Some((*old_r).clone()),
                        new: Some((*new_r).clone()),
                        property_changes,
                    });
                }
            }
            _ => {}
        }
    }

    diff
}
