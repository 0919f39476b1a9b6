//! Model manifest scaffolding for `create-node` and `create-relationship`.

use std::fs;
use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::errors::SchemaError;
use crate::migrate::template::slugify;

const NODE_TEMPLATE: &str = r#"kind: node
kgid: "{{kgid}}"
label: {{label}}
class_name: {{class_name}}
properties: []
relationship_defs: []
"#;

const RELATIONSHIP_TEMPLATE: &str = r#"kind: relationship
kgid: "{{kgid}}"
rel_type: {{rel_type}}
class_name: {{class_name}}
properties: []
"#;

fn generate_kgid(name: &str) -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    format!("{}-{}", slugify(name), &uuid[..8])
}

fn shouty_snake(name: &str) -> String {
    let mut out = String::new();
    for (i, c) in name.chars().enumerate() {
        if c.is_uppercase() && i > 0 {
            out.push('_');
        }
        if c.is_alphanumeric() {
            out.push(c.to_ascii_uppercase());
        } else if !out.ends_with('_') && !out.is_empty() {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

fn render_to(
    models_dir: &Path,
    filename: &str,
    template: &str,
    data: serde_json::Value,
) -> Result<PathBuf, SchemaError> {
    let handlebars = Handlebars::new();
    let rendered = handlebars
        .render_template(template, &data)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    fs::create_dir_all(models_dir)?;
    let target = models_dir.join(filename);
    fs::write(&target, rendered)?;
    Ok(target)
}

/// Write a node manifest stub. The kgid defaults to `<slug>-<uuid8>` and
/// must never change afterwards.
pub fn scaffold_node(
    models_dir: &Path,
    class_name: &str,
    kgid: Option<&str>,
) -> Result<PathBuf, SchemaError> {
    let kgid = kgid
        .map(str::to_string)
        .unwrap_or_else(|| generate_kgid(class_name));
    let filename = format!("{}.yaml", slugify(class_name));
    let path = render_to(
        models_dir,
        &filename,
        NODE_TEMPLATE,
        json!({ "kgid": kgid, "label": class_name, "class_name": class_name }),
    )?;
    info!("Created node model {}", path.display());
    Ok(path)
}

/// Write a relationship manifest stub. The relationship type defaults to
/// the SHOUTY_SNAKE form of the class name.
pub fn scaffold_relationship(
    models_dir: &Path,
    class_name: &str,
    rel_type: Option<&str>,
    kgid: Option<&str>,
) -> Result<PathBuf, SchemaError> {
    let kgid = kgid
        .map(str::to_string)
        .unwrap_or_else(|| generate_kgid(class_name));
    let rel_type = rel_type
        .map(str::to_string)
        .unwrap_or_else(|| shouty_snake(class_name));
    let filename = format!("{}.yaml", slugify(class_name));
    let path = render_to(
        models_dir,
        &filename,
        RELATIONSHIP_TEMPLATE,
        json!({ "kgid": kgid, "rel_type": rel_type, "class_name": class_name }),
    )?;
    info!("Created relationship model {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::parse_models;

    #[test]
    fn shouty_snake_handles_camel_case() {
        assert_eq!(shouty_snake("FriendsWith"), "FRIENDS_WITH");
        assert_eq!(shouty_snake("Knows"), "KNOWS");
        assert_eq!(shouty_snake("has tag"), "HAS_TAG");
    }

    #[test]
    fn scaffolded_models_parse_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        scaffold_node(dir.path(), "Person", None).expect("node");
        scaffold_relationship(dir.path(), "FriendsWith", None, None).expect("rel");

        let snapshot = parse_models(dir.path()).expect("parse");
        assert_eq!(snapshot.nodes.len(), 1);
        assert_eq!(snapshot.nodes[0].label, "Person");
        assert!(snapshot.nodes[0].kgid.starts_with("person-"));
        assert_eq!(snapshot.relationships.len(), 1);
        assert_eq!(snapshot.relationships[0].rel_type, "FRIENDS_WITH");
    }

    #[test]
    fn explicit_kgid_is_kept_verbatim() {
        let dir = tempfile::tempdir().expect("tempdir");
        scaffold_node(dir.path(), "City", Some("city-0001")).expect("node");
        let snapshot = parse_models(dir.path()).expect("parse");
        assert_eq!(snapshot.nodes[0].kgid, "city-0001");
    }
}
