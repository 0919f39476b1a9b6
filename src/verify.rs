//! Project verification: reconcile the registry, the ledger, and the
//! model manifests, and optionally probe graph connectivity.

use serde_json::Map;

use crate::config::ProjectConfig;
use crate::errors::MigrationError;
use crate::ir::hash::compute_hash;
use crate::ir::parse_models;
use crate::ledger::Ledger;
use crate::migrate::engine::MigrationEngine;
use crate::migrate::operations::GraphClient;
use crate::migrate::registry::MigrationRegistry;

fn prefix(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

#[derive(Debug, Clone)]
pub struct CheckResult {
    pub name: String,
    pub passed: bool,
    pub details: String,
}

#[derive(Debug, Default)]
pub struct VerificationReport {
    pub checks: Vec<CheckResult>,
}

impl VerificationReport {
    fn add(&mut self, name: &str, passed: bool, details: String) {
        self.checks.push(CheckResult {
            name: name.to_string(),
            passed,
            details,
        });
    }

    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn summary(&self) -> String {
        let mut lines: Vec<String> = self
            .checks
            .iter()
            .map(|c| {
                format!(
                    "[{}] {}: {}",
                    if c.passed { "PASS" } else { "FAIL" },
                    c.name,
                    c.details
                )
            })
            .collect();
        lines.push(if self.passed() {
            "All checks passed.".to_string()
        } else {
            "Verification FAILED.".to_string()
        });
        lines.join("\n")
    }
}

/// Run every verification check. A missing or unreadable models directory
/// fails only the hash-consistency check, not the whole run.
pub async fn verify_project(
    config: &ProjectConfig,
    ledger: &Ledger,
    registry: &MigrationRegistry,
    mut client: Option<&mut dyn GraphClient>,
) -> Result<VerificationReport, MigrationError> {
    let engine = MigrationEngine::new(config, ledger, registry);
    let mut report = VerificationReport::default();

    // Ledger chain integrity.
    let issues = ledger.verify_chain().await?;
    report.add(
        "ledger chain",
        issues.is_empty(),
        if issues.is_empty() {
            "chain is consistent".to_string()
        } else {
            issues.join("; ")
        },
    );

    // Every ledger row has a registered migration.
    let applied = ledger.get_applied_migrations().await?;
    let unknown: Vec<&str> = applied
        .iter()
        .filter(|row| registry.get(&row.revision_id).is_none())
        .map(|row| row.revision_id.as_str())
        .collect();
    report.add(
        "registered migrations",
        unknown.is_empty(),
        if unknown.is_empty() {
            format!("{} applied migration(s) all registered", applied.len())
        } else {
            format!("not registered: {}", unknown.join(", "))
        },
    );

    // Nothing pending.
    let pending = engine.pending().await?;
    report.add(
        "pending migrations",
        pending.is_empty(),
        if pending.is_empty() {
            "none".to_string()
        } else {
            let ids: Vec<&str> = pending.iter().map(|m| m.revision_id()).collect();
            format!("{} pending: {}", ids.len(), ids.join(", "))
        },
    );

    // Current models hash matches the head's recorded hash.
    let head_hash = applied
        .last()
        .map(|row| row.schema_hash.clone())
        .unwrap_or_default();
    match parse_models(&config.models_dir()) {
        Ok(snapshot) => {
            let current = compute_hash(&snapshot)?;
            if head_hash.is_empty() {
                report.add(
                    "schema hash",
                    applied.is_empty(),
                    if applied.is_empty() {
                        format!("no migrations applied; models hash {}", prefix(&current))
                    } else {
                        "head migration has no schema hash recorded".to_string()
                    },
                );
            } else {
                let matches = current == head_hash;
                report.add(
                    "schema hash",
                    matches,
                    if matches {
                        format!("models match head ({})", prefix(&current))
                    } else {
                        format!(
                            "models hash {} but head records {}; create a migration",
                            prefix(&current),
                            prefix(&head_hash)
                        )
                    },
                );
            }
        }
        Err(err) => {
            report.add("schema hash", false, format!("cannot parse models: {err}"));
        }
    }

    // Optional connectivity probe.
    if let Some(client) = client.as_deref_mut() {
        let probe = client.run("RETURN 1", &Map::new());
        report.add(
            "graph connectivity",
            probe.is_ok(),
            match probe {
                Ok(()) => format!("connected to {}", config.graph.uri),
                Err(e) => e.to_string(),
            },
        );
    }

    Ok(report)
}
