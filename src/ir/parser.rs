//! Loads YAML model manifests from the models directory and builds a
//! `SchemaSnapshot`.
//!
//! Every call parses from scratch; nothing is cached between calls. Files
//! are visited in sorted path order so diagnostics are stable, and kgid
//! validation runs before the snapshot is returned.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::errors::SchemaError;
use crate::ir::schema::{NodeIR, PropertyIR, RelationshipDefIR, SchemaSnapshot};

#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
enum ModelManifest {
    Node(NodeManifest),
    Relationship(RelationshipManifest),
}

#[derive(Debug, Deserialize)]
struct NodeManifest {
    #[serde(default)]
    kgid: String,
    label: String,
    #[serde(default)]
    class_name: String,
    #[serde(default)]
    properties: Vec<PropertyIR>,
    #[serde(default)]
    relationship_defs: Vec<RelationshipDefIR>,
}

#[derive(Debug, Deserialize)]
struct RelationshipManifest {
    #[serde(default)]
    kgid: String,
    rel_type: String,
    #[serde(default)]
    class_name: String,
    #[serde(default)]
    properties: Vec<PropertyIR>,
}

fn manifest_files(dir: &Path) -> Result<Vec<PathBuf>, SchemaError> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_yaml = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
            .unwrap_or(false);
        if path.is_file() && is_yaml {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

fn relative_module_path(path: &Path, base: &Path) -> String {
    path.strip_prefix(base)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

/// Parse every model manifest under `dir` into a fresh snapshot.
///
/// The returned snapshot has `schema_hash` unset; callers hash it through
/// `ir::hash::hash_snapshot` when they need the digest.
pub fn parse_models(dir: &Path) -> Result<SchemaSnapshot, SchemaError> {
    let mut nodes = Vec::new();
    let mut relationships = Vec::new();
    // kgid -> declaration site, shared across both entity kinds.
    let mut seen: BTreeMap<String, String> = BTreeMap::new();

    for path in manifest_files(dir)? {
        let raw = fs::read_to_string(&path)?;
        let manifest: ModelManifest =
            serde_yaml::from_str(&raw).map_err(|source| SchemaError::Manifest {
                path: path.clone(),
                source,
            })?;
        let module_path = relative_module_path(&path, dir);

        match manifest {
            ModelManifest::Node(m) => {
                let class_name = if m.class_name.is_empty() {
                    m.label.clone()
                } else {
                    m.class_name
                };
                if m.kgid.trim().is_empty() {
                    return Err(SchemaError::MissingKgid { class_name, path });
                }
                if let Some(first) = seen.insert(m.kgid.clone(), class_name.clone()) {
                    return Err(SchemaError::DuplicateKgid {
                        kgid: m.kgid,
                        first,
                        second: class_name,
                    });
                }
                debug!(kgid = %m.kgid, label = %m.label, "parsed node model");
                nodes.push(
                    NodeIR {
                        kgid: m.kgid,
                        label: m.label,
                        class_name,
                        module_path,
                        properties: m.properties,
                        relationship_defs: m.relationship_defs,
                    }
                    .sorted(),
                );
            }
            ModelManifest::Relationship(m) => {
                let class_name = if m.class_name.is_empty() {
                    m.rel_type.clone()
                } else {
                    m.class_name
                };
                if m.kgid.trim().is_empty() {
                    return Err(SchemaError::MissingKgid { class_name, path });
                }
                if let Some(first) = seen.insert(m.kgid.clone(), class_name.clone()) {
                    return Err(SchemaError::DuplicateKgid {
                        kgid: m.kgid,
                        first,
                        second: class_name,
                    });
                }
                debug!(kgid = %m.kgid, rel_type = %m.rel_type, "parsed relationship model");
                relationships.push(
                    crate::ir::schema::RelationshipIR {
                        kgid: m.kgid,
                        rel_type: m.rel_type,
                        class_name,
                        module_path,
                        properties: m.properties,
                    }
                    .sorted(),
                );
            }
        }
    }

    nodes.sort_by(|a, b| a.kgid.cmp(&b.kgid));
    relationships.sort_by(|a, b| a.kgid.cmp(&b.kgid));
    Ok(SchemaSnapshot::new(nodes, relationships))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_model(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).expect("write model");
    }

    #[test]
    fn parses_nodes_and_relationships() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_model(
            dir.path(),
            "person.yaml",
            r#"
kind: node
kgid: person-0001
label: Person
properties:
  - { name: name, property_type: string, required: true }
  - { name: email, property_type: string, unique_index: true }
relationship_defs:
  - attr_name: friends
    rel_type: FRIENDS_WITH
    target_label: Person
    direction: either
"#,
        );
        write_model(
            dir.path(),
            "friends_with.yaml",
            r#"
kind: relationship
kgid: friends-0001
rel_type: FRIENDS_WITH
properties:
  - { name: since, property_type: integer }
"#,
        );

        let snapshot = parse_models(dir.path()).expect("parse");
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.relationships.len(), 1);
        let person = &snapshot.nodes[0];
        assert_eq!(person.kgid, "person-0001");
        assert_eq!(person.class_name, "Person");
        // Properties come back sorted by name.
        assert_eq!(person.properties[0].name, "email");
        assert_eq!(person.properties[1].name, "name");
        assert_eq!(person.relationship_defs[0].rel_type, "FRIENDS_WITH");
    }

    #[test]
    fn missing_kgid_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_model(
            dir.path(),
            "city.yaml",
            "kind: node\nlabel: City\nproperties: []\n",
        );
        let err = parse_models(dir.path()).expect_err("should fail");
        match err {
            SchemaError::MissingKgid { class_name, .. } => assert_eq!(class_name, "City"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn duplicate_kgid_across_kinds_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_model(
            dir.path(),
            "a_person.yaml",
            "kind: node\nkgid: shared-1\nlabel: Person\n",
        );
        write_model(
            dir.path(),
            "b_knows.yaml",
            "kind: relationship\nkgid: shared-1\nrel_type: KNOWS\n",
        );
        let err = parse_models(dir.path()).expect_err("should fail");
        match err {
            SchemaError::DuplicateKgid { kgid, first, second } => {
                assert_eq!(kgid, "shared-1");
                assert_eq!(first, "Person");
                assert_eq!(second, "KNOWS");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn non_yaml_files_are_ignored() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_model(
            dir.path(),
            "person.yml",
            "kind: node\nkgid: p1\nlabel: Person\n",
        );
        fs::write(dir.path().join("README.md"), "notes").expect("write");
        let snapshot = parse_models(dir.path()).expect("parse");
        assert_eq!(snapshot.nodes.len(), 1);
    }
}
