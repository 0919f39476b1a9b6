//! Migration file scaffolding.
//!
//! Turns a schema diff into a generated migration source file with an
//! upgrade body, its structural inverse as the downgrade body, and a
//! revision id derived from the chain position and description.

use std::fs;
use std::path::{Path, PathBuf};

use handlebars::Handlebars;
use serde_json::json;

use crate::errors::MigrationError;
use crate::ir::diff::{ChangeKind, SchemaDiff};

const SLUG_MAX_LEN: usize = 60;

const MIGRATION_TEMPLATE: &str = r#"//! {{description}}
//!
//! Generated migration. Review the body before applying; placeholder
//! comments mark changes that need a hand-written data step.

use stratum::errors::MigrationError;
use stratum::migrate::operations::MigrationContext;
use stratum::migrate::registry::FnMigration;

pub fn migration() -> FnMigration {
    FnMigration::new(
        "{{revision_id}}",
        {{#if parent_id}}Some("{{parent_id}}"){{else}}None{{/if}},
        "{{schema_hash}}",
        {{rollback_safe}},
        upgrade,
        downgrade,
    )
    .with_description("{{description}}")
}

fn upgrade(ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
{{#each upgrade_lines}}    {{{this}}}
{{/each}}    Ok(())
}

fn downgrade(ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
{{#each downgrade_lines}}    {{{this}}}
{{/each}}    Ok(())
}
"#;

/// Lowercase a description and squash every non-alphanumeric run to one
/// underscore, capped at 60 characters.
pub fn slugify(description: &str) -> String {
    let mut slug = String::new();
    for c in description.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if !slug.is_empty() && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    slug.trim_end_matches('_').chars().take(SLUG_MAX_LEN).collect()
}

/// Revision id: zero-padded sequence number plus description slug,
/// e.g. `0003_add_friendship`.
pub fn generate_revision_id(seq: usize, description: &str) -> String {
    format!("{seq:04}_{}", slugify(description))
}

fn quote(raw: &str) -> String {
    serde_json::Value::String(raw.to_string()).to_string()
}

/// Translate a diff into upgrade operation lines and their inverses.
///
/// The downgrade body is the structural inverse of each upgrade line,
/// emitted in reverse order. Changes with no mechanical inverse (entity
/// adds/removes, type changes, relationship property changes) become
/// placeholder comments on both sides.
pub fn operation_lines(diff: &SchemaDiff) -> (Vec<String>, Vec<String>) {
    let mut up: Vec<String> = Vec::new();
    // Downgrade lines are collected in upgrade order and reversed at the
    // end.
    let mut pairs: Vec<String> = Vec::new();

    let push = |up: &mut Vec<String>, pairs: &mut Vec<String>, u: String, d: String| {
        up.push(u);
        pairs.push(d);
    };

    for nc in &diff.node_changes {
        match nc.kind {
            ChangeKind::Added => {
                let label = nc.new.as_ref().map(|n| n.label.as_str()).unwrap_or("?");
                push(
                    &mut up,
                    &mut pairs,
                    format!("// New node model '{label}' (kgid={}); no data step required.", nc.kgid),
                    format!("// Node model '{label}' removed again; nothing to undo."),
                );
                if let Some(node) = &nc.new {
                    for prop in &node.properties {
                        if prop.unique_index {
                            push(
                                &mut up,
                                &mut pairs,
                                format!(
                                    "ctx.add_unique_constraint({}, {})?;",
                                    quote(&node.label),
                                    quote(&prop.name)
                                ),
                                format!(
                                    "ctx.drop_unique_constraint({}, {})?;",
                                    quote(&node.label),
                                    quote(&prop.name)
                                ),
                            );
                        }
                        if prop.index {
                            push(
                                &mut up,
                                &mut pairs,
                                format!(
                                    "ctx.add_index({}, {})?;",
                                    quote(&node.label),
                                    quote(&prop.name)
                                ),
                                format!(
                                    "ctx.drop_index({}, {})?;",
                                    quote(&node.label),
                                    quote(&prop.name)
                                ),
                            );
                        }
                        if prop.required {
                            push(
                                &mut up,
                                &mut pairs,
                                format!(
                                    "ctx.add_existence_constraint({}, {})?;",
                                    quote(&node.label),
                                    quote(&prop.name)
                                ),
                                format!(
                                    "ctx.drop_existence_constraint({}, {})?;",
                                    quote(&node.label),
                                    quote(&prop.name)
                                ),
                            );
                        }
                    }
                }
            }
            ChangeKind::Removed => {
                let label = nc.old.as_ref().map(|n| n.label.as_str()).unwrap_or("?");
                if let Some(node) = &nc.old {
                    for prop in &node.properties {
                        if prop.required {
                            push(
                                &mut up,
                                &mut pairs,
                                format!(
                                    "ctx.drop_existence_constraint({}, {})?;",
                                    quote(&node.label),
                                    quote(&prop.name)
                                ),
                                format!(
                                    "ctx.add_existence_constraint({}, {})?;",
                                    quote(&node.label),
                                    quote(&prop.name)
                                ),
                            );
                        }
                        if prop.index {
                            push(
                                &mut up,
                                &mut pairs,
                                format!(
                                    "ctx.drop_index({}, {})?;",
                                    quote(&node.label),
                                    quote(&prop.name)
                                ),
                                format!(
                                    "ctx.add_index({}, {})?;",
                                    quote(&node.label),
                                    quote(&prop.name)
                                ),
                            );
                        }
                        if prop.unique_index {
                            push(
                                &mut up,
                                &mut pairs,
                                format!(
                                    "ctx.drop_unique_constraint({}, {})?;",
                                    quote(&node.label),
                                    quote(&prop.name)
                                ),
                                format!(
                                    "ctx.add_unique_constraint({}, {})?;",
                                    quote(&node.label),
                                    quote(&prop.name)
                                ),
                            );
                        }
                    }
                }
                push(
                    &mut up,
                    &mut pairs,
                    format!(
                        "// Node model '{label}' (kgid={}) removed; \
                         delete or relabel its data by hand if needed.",
                        nc.kgid
                    ),
                    format!("// Node model '{label}' restored; reload its data by hand if needed."),
                );
            }
            ChangeKind::Modified => {
                let old_label = nc.old.as_ref().map(|n| n.label.as_str()).unwrap_or("?");
                let new_label = nc.new.as_ref().map(|n| n.label.as_str()).unwrap_or("?");
                if nc.label_renamed {
                    push(
                        &mut up,
                        &mut pairs,
                        format!(
                            "ctx.rename_label({}, {})?;",
                            quote(old_label),
                            quote(new_label)
                        ),
                        format!(
                            "ctx.rename_label({}, {})?;",
                            quote(new_label),
                            quote(old_label)
                        ),
                    );
                }
                // Constraints attach to the post-rename label on the way up.
                let label = new_label;
                for pc in &nc.property_changes {
                    match pc.kind {
                        ChangeKind::Added => {
                            let prop = pc.new.as_ref();
                            let default = prop
                                .and_then(|p| p.default.clone())
                                .map(|v| format!("Some(serde_json::json!({v}))"))
                                .unwrap_or_else(|| "None".to_string());
                            push(
                                &mut up,
                                &mut pairs,
                                format!(
                                    "ctx.add_node_property({}, {}, {default})?;",
                                    quote(label),
                                    quote(&pc.property_name)
                                ),
                                format!(
                                    "ctx.remove_node_property({}, {})?;",
                                    quote(label),
                                    quote(&pc.property_name)
                                ),
                            );
                            if let Some(p) = prop {
                                if p.unique_index {
                                    push(
                                        &mut up,
                                        &mut pairs,
                                        format!(
                                            "ctx.add_unique_constraint({}, {})?;",
                                            quote(label),
                                            quote(&pc.property_name)
                                        ),
                                        format!(
                                            "ctx.drop_unique_constraint({}, {})?;",
                                            quote(label),
                                            quote(&pc.property_name)
                                        ),
                                    );
                                }
                                if p.index {
                                    push(
                                        &mut up,
                                        &mut pairs,
                                        format!(
                                            "ctx.add_index({}, {})?;",
                                            quote(label),
                                            quote(&pc.property_name)
                                        ),
                                        format!(
                                            "ctx.drop_index({}, {})?;",
                                            quote(label),
                                            quote(&pc.property_name)
                                        ),
                                    );
                                }
                                if p.required {
                                    push(
                                        &mut up,
                                        &mut pairs,
                                        format!(
                                            "ctx.add_existence_constraint({}, {})?;",
                                            quote(label),
                                            quote(&pc.property_name)
                                        ),
                                        format!(
                                            "ctx.drop_existence_constraint({}, {})?;",
                                            quote(label),
                                            quote(&pc.property_name)
                                        ),
                                    );
                                }
                            }
                        }
                        ChangeKind::Removed => {
                            if let Some(p) = pc.old.as_ref() {
                                if p.required {
                                    push(
                                        &mut up,
                                        &mut pairs,
                                        format!(
                                            "ctx.drop_existence_constraint({}, {})?;",
                                            quote(label),
                                            quote(&pc.property_name)
                                        ),
                                        format!(
                                            "ctx.add_existence_constraint({}, {})?;",
                                            quote(label),
                                            quote(&pc.property_name)
                                        ),
                                    );
                                }
                                if p.index {
                                    push(
                                        &mut up,
                                        &mut pairs,
                                        format!(
                                            "ctx.drop_index({}, {})?;",
                                            quote(label),
                                            quote(&pc.property_name)
                                        ),
                                        format!(
                                            "ctx.add_index({}, {})?;",
                                            quote(label),
                                            quote(&pc.property_name)
                                        ),
                                    );
                                }
                                if p.unique_index {
                                    push(
                                        &mut up,
                                        &mut pairs,
                                        format!(
                                            "ctx.drop_unique_constraint({}, {})?;",
                                            quote(label),
                                            quote(&pc.property_name)
                                        ),
                                        format!(
                                            "ctx.add_unique_constraint({}, {})?;",
                                            quote(label),
                                            quote(&pc.property_name)
                                        ),
                                    );
                                }
                            }
                            push(
                                &mut up,
                                &mut pairs,
                                format!(
                                    "ctx.remove_node_property({}, {})?;",
                                    quote(label),
                                    quote(&pc.property_name)
                                ),
                                format!(
                                    "// Property '{}' cannot be restored with data; \
                                     reload it by hand if needed.",
                                    pc.property_name
                                ),
                            );
                        }
                        ChangeKind::Modified => {
                            let (old_p, new_p) = match (pc.old.as_ref(), pc.new.as_ref()) {
                                (Some(o), Some(n)) => (o, n),
                                _ => continue,
                            };
                            if old_p.property_type != new_p.property_type {
                                push(
                                    &mut up,
                                    &mut pairs,
                                    format!(
                                        "// Property '{}' changed type {} -> {}; \
                                         write a conversion step by hand.",
                                        pc.property_name,
                                        old_p.property_type,
                                        new_p.property_type
                                    ),
                                    format!(
                                        "// Property '{}' type reverted {} -> {}; \
                                         write a conversion step by hand.",
                                        pc.property_name,
                                        new_p.property_type,
                                        old_p.property_type
                                    ),
                                );
                            }
                            if !old_p.unique_index && new_p.unique_index {
                                push(
                                    &mut up,
                                    &mut pairs,
                                    format!(
                                        "ctx.add_unique_constraint({}, {})?;",
                                        quote(label),
                                        quote(&pc.property_name)
                                    ),
                                    format!(
                                        "ctx.drop_unique_constraint({}, {})?;",
                                        quote(label),
                                        quote(&pc.property_name)
                                    ),
                                );
                            } else if old_p.unique_index && !new_p.unique_index {
                                push(
                                    &mut up,
                                    &mut pairs,
                                    format!(
                                        "ctx.drop_unique_constraint({}, {})?;",
                                        quote(label),
                                        quote(&pc.property_name)
                                    ),
                                    format!(
                                        "ctx.add_unique_constraint({}, {})?;",
                                        quote(label),
                                        quote(&pc.property_name)
                                    ),
                                );
                            }
                            if !old_p.index && new_p.index {
                                push(
                                    &mut up,
                                    &mut pairs,
                                    format!(
                                        "ctx.add_index({}, {})?;",
                                        quote(label),
                                        quote(&pc.property_name)
                                    ),
                                    format!(
                                        "ctx.drop_index({}, {})?;",
                                        quote(label),
                                        quote(&pc.property_name)
                                    ),
                                );
                            } else if old_p.index && !new_p.index {
                                push(
                                    &mut up,
                                    &mut pairs,
                                    format!(
                                        "ctx.drop_index({}, {})?;",
                                        quote(label),
                                        quote(&pc.property_name)
                                    ),
                                    format!(
                                        "ctx.add_index({}, {})?;",
                                        quote(label),
                                        quote(&pc.property_name)
                                    ),
                                );
                            }
                            if !old_p.required && new_p.required {
                                push(
                                    &mut up,
                                    &mut pairs,
                                    format!(
                                        "ctx.add_existence_constraint({}, {})?;",
                                        quote(label),
                                        quote(&pc.property_name)
                                    ),
                                    format!(
                                        "ctx.drop_existence_constraint({}, {})?;",
                                        quote(label),
                                        quote(&pc.property_name)
                                    ),
                                );
                            } else if old_p.required && !new_p.required {
                                push(
                                    &mut up,
                                    &mut pairs,
                                    format!(
                                        "ctx.drop_existence_constraint({}, {})?;",
                                        quote(label),
                                        quote(&pc.property_name)
                                    ),
                                    format!(
                                        "ctx.add_existence_constraint({}, {})?;",
                                        quote(label),
                                        quote(&pc.property_name)
                                    ),
                                );
                            }
                        }
                    }
                }
            }
        }
    }

    for rc in &diff.relationship_changes {
        let name = match rc.kind {
            ChangeKind::Added => rc.new.as_ref().map(|r| r.rel_type.as_str()),
            _ => rc.old.as_ref().map(|r| r.rel_type.as_str()),
        }
        .unwrap_or("?");
        match rc.kind {
            ChangeKind::Added => push(
                &mut up,
                &mut pairs,
                format!("// New relationship model '{name}' (kgid={}); no data step required.", rc.kgid),
                format!("// Relationship model '{name}' removed again; nothing to undo."),
            ),
            ChangeKind::Removed => push(
                &mut up,
                &mut pairs,
                format!(
                    "// Relationship model '{name}' (kgid={}) removed; \
                     delete its edges by hand if needed.",
                    rc.kgid
                ),
                format!("// Relationship model '{name}' restored; reload its edges by hand if needed."),
            ),
            ChangeKind::Modified => push(
                &mut up,
                &mut pairs,
                format!(
                    "// Relationship '{name}' properties changed; \
                     write a data step by hand if existing edges need it."
                ),
                format!("// Relationship '{name}' property changes reverted; adjust edges by hand if needed."),
            ),
        }
    }

    let mut down = pairs;
    down.reverse();
    (up, down)
}

/// Input for rendering one migration file.
pub struct MigrationScaffold {
    pub revision_id: String,
    pub parent_id: Option<String>,
    pub description: String,
    pub schema_hash: String,
    pub rollback_safe: bool,
    pub upgrade_lines: Vec<String>,
    pub downgrade_lines: Vec<String>,
}

pub fn render_migration(scaffold: &MigrationScaffold) -> Result<String, MigrationError> {
    let handlebars = Handlebars::new();
    let rendered = handlebars.render_template(
        MIGRATION_TEMPLATE,
        &json!({
            "revision_id": scaffold.revision_id,
            "parent_id": scaffold.parent_id,
            "description": scaffold.description,
            "schema_hash": scaffold.schema_hash,
            "rollback_safe": scaffold.rollback_safe,
            "upgrade_lines": scaffold.upgrade_lines,
            "downgrade_lines": scaffold.downgrade_lines,
        }),
    )?;
    Ok(rendered)
}

/// Render the scaffold to `<migrations_dir>/m<revision_id>.rs` and keep the
/// directory's `mod.rs` index up to date.
pub fn write_migration_file(
    migrations_dir: &Path,
    scaffold: &MigrationScaffold,
) -> Result<PathBuf, MigrationError> {
    fs::create_dir_all(migrations_dir)?;
    let file_name = format!("m{}.rs", scaffold.revision_id);
    let target = migrations_dir.join(&file_name);
    fs::write(&target, render_migration(scaffold)?)?;

    let mod_path = migrations_dir.join("mod.rs");
    let mod_line = format!("pub mod m{};", scaffold.revision_id);
    let existing = if mod_path.exists() {
        fs::read_to_string(&mod_path)?
    } else {
        String::new()
    };
    if !existing.lines().any(|line| line.trim() == mod_line) {
        let mut updated = existing;
        if !updated.is_empty() && !updated.ends_with('\n') {
            updated.push('\n');
        }
        updated.push_str(&mod_line);
        updated.push('\n');
        fs::write(&mod_path, updated)?;
    }
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::diff::diff_snapshots;
    use crate::ir::schema::{NodeIR, PropertyIR, SchemaSnapshot};

    #[test]
    fn slugify_squashes_and_caps() {
        assert_eq!(slugify("Add Friendship!"), "add_friendship");
        assert_eq!(slugify("  --weird   input--  "), "weird_input");
        let long = "x".repeat(100);
        assert_eq!(slugify(&long).len(), 60);
    }

    #[test]
    fn revision_id_is_zero_padded() {
        assert_eq!(generate_revision_id(3, "Add friendship"), "0003_add_friendship");
        assert_eq!(generate_revision_id(42, "Init"), "0042_init");
    }

    fn person(props: Vec<PropertyIR>) -> SchemaSnapshot {
        SchemaSnapshot::new(
            vec![NodeIR {
                kgid: "p1".into(),
                label: "Person".into(),
                class_name: "Person".into(),
                module_path: "models/person.yaml".into(),
                properties: props,
                relationship_defs: vec![],
            }],
            vec![],
        )
    }

    #[test]
    fn added_unique_property_generates_add_then_constraint() {
        let old = person(vec![]);
        let new = person(vec![PropertyIR::new("email", "string").unique()]);
        let (up, down) = operation_lines(&diff_snapshots(&old, &new));
        assert_eq!(
            up,
            vec![
                "ctx.add_node_property(\"Person\", \"email\", None)?;",
                "ctx.add_unique_constraint(\"Person\", \"email\")?;",
            ]
        );
        // Downgrade inverts in reverse order.
        assert_eq!(
            down,
            vec![
                "ctx.drop_unique_constraint(\"Person\", \"email\")?;",
                "ctx.remove_node_property(\"Person\", \"email\")?;",
            ]
        );
    }

    #[test]
    fn type_change_becomes_a_placeholder_comment() {
        let old = person(vec![PropertyIR::new("age", "string")]);
        let new = person(vec![PropertyIR::new("age", "integer")]);
        let (up, _down) = operation_lines(&diff_snapshots(&old, &new));
        assert_eq!(up.len(), 1);
        assert!(up[0].starts_with("//"));
        assert!(up[0].contains("string -> integer"));
    }

    #[test]
    fn label_rename_generates_inverse_rename() {
        let old = person(vec![]);
        let mut renamed = person(vec![]);
        renamed.nodes[0].label = "Human".into();
        let (up, down) = operation_lines(&diff_snapshots(&old, &renamed));
        assert_eq!(up, vec!["ctx.rename_label(\"Person\", \"Human\")?;"]);
        assert_eq!(down, vec!["ctx.rename_label(\"Human\", \"Person\")?;"]);
    }

    #[test]
    fn rendered_file_contains_constructor_and_bodies() {
        let scaffold = MigrationScaffold {
            revision_id: "0002_add_email".into(),
            parent_id: Some("0001_init".into()),
            description: "add email".into(),
            schema_hash: "deadbeef".into(),
            rollback_safe: true,
            upgrade_lines: vec!["ctx.add_index(\"Person\", \"email\")?;".into()],
            downgrade_lines: vec!["ctx.drop_index(\"Person\", \"email\")?;".into()],
        };
        let rendered = render_migration(&scaffold).expect("render");
        assert!(rendered.contains("\"0002_add_email\""));
        assert!(rendered.contains("Some(\"0001_init\")"));
        assert!(rendered.contains("ctx.add_index(\"Person\", \"email\")?;"));
        assert!(rendered.contains("fn downgrade"));
    }

    #[test]
    fn write_migration_file_maintains_mod_index() {
        let dir = tempfile::tempdir().expect("tempdir");
        let scaffold = MigrationScaffold {
            revision_id: "0001_init".into(),
            parent_id: None,
            description: "init".into(),
            schema_hash: String::new(),
            rollback_safe: true,
            upgrade_lines: vec![],
            downgrade_lines: vec![],
        };
        let path = write_migration_file(dir.path(), &scaffold).expect("write");
        assert!(path.ends_with("m0001_init.rs"));
        let mod_rs = fs::read_to_string(dir.path().join("mod.rs")).expect("mod.rs");
        assert!(mod_rs.contains("pub mod m0001_init;"));

        // Writing again must not duplicate the index line.
        write_migration_file(dir.path(), &scaffold).expect("rewrite");
        let mod_rs = fs::read_to_string(dir.path().join("mod.rs")).expect("mod.rs");
        assert_eq!(mod_rs.matches("pub mod m0001_init;").count(), 1);
    }
}
