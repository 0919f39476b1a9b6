//! Migration engine: chain ordering, status, scaffolding, and execution.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use tracing::{info, warn};

use crate::config::ProjectConfig;
use crate::errors::MigrationError;
use crate::ir::diff::diff_snapshots;
use crate::ir::hash::hash_snapshot;
use crate::ir::schema::SchemaSnapshot;
use crate::ledger::Ledger;
use crate::migrate::operations::{GraphClient, MigrationContext};
use crate::migrate::registry::{GraphMigration, MigrationRegistry};
use crate::migrate::template::{
    generate_revision_id, operation_lines, write_migration_file, MigrationScaffold,
};

/// A snapshot of chain state for `status` output.
pub struct MigrationStatus {
    pub head: Option<String>,
    pub applied: Vec<String>,
    pub pending: Vec<String>,
}

pub struct MigrationEngine<'a> {
    config: &'a ProjectConfig,
    ledger: &'a Ledger,
    registry: &'a MigrationRegistry,
}

impl<'a> MigrationEngine<'a> {
    pub fn new(
        config: &'a ProjectConfig,
        ledger: &'a Ledger,
        registry: &'a MigrationRegistry,
    ) -> Self {
        Self {
            config,
            ledger,
            registry,
        }
    }

    /// All registered migrations in chain order: roots first, then each
    /// parent's children. Migrations whose parent is not registered are
    /// appended at the end in revision order; a registry with no root at
    /// all falls back to plain revision ordering.
    pub fn discover(&self) -> Vec<&'a dyn GraphMigration> {
        let mut children: BTreeMap<&str, Vec<&'a dyn GraphMigration>> = BTreeMap::new();
        let mut roots: Vec<&'a dyn GraphMigration> = Vec::new();
        let known: HashSet<&str> = self.registry.iter().map(|m| m.revision_id()).collect();

        for migration in self.registry.iter() {
            match migration.parent_id() {
                None => roots.push(migration),
                Some(parent) if known.contains(parent) => {
                    children.entry(parent).or_default().push(migration);
                }
                Some(parent) => {
                    warn!(
                        "Migration '{}' references unregistered parent '{}'",
                        migration.revision_id(),
                        parent
                    );
                    children.entry("").or_default().push(migration);
                }
            }
        }

        if roots.is_empty() && !self.registry.is_empty() {
            warn!("No root migration found; falling back to revision-id ordering");
            let mut all: Vec<&'a dyn GraphMigration> = self.registry.iter().collect();
            all.sort_by(|a, b| a.revision_id().cmp(b.revision_id()));
            return all;
        }

        // The walk pops from the end, so order the stack descending to
        // visit smaller revision ids first.
        roots.sort_by(|a, b| b.revision_id().cmp(a.revision_id()));
        let mut chain = Vec::with_capacity(self.registry.len());
        let mut queue: Vec<&'a dyn GraphMigration> = roots;
        while let Some(migration) = queue.pop() {
            chain.push(migration);
            if let Some(mut next) = children.remove(migration.revision_id()) {
                next.sort_by(|a, b| b.revision_id().cmp(a.revision_id()));
                queue.extend(next);
            }
        }

        // Orphans (unregistered parents), in revision order.
        if let Some(mut orphans) = children.remove("") {
            orphans.sort_by(|a, b| a.revision_id().cmp(b.revision_id()));
            chain.extend(orphans);
        }
        // Children whose parent was never reached trail the chain too.
        let mut unreached: Vec<&'a dyn GraphMigration> =
            children.into_values().flatten().collect();
        unreached.sort_by(|a, b| a.revision_id().cmp(b.revision_id()));
        chain.extend(unreached);

        chain
    }

    pub async fn status(&self) -> Result<MigrationStatus, MigrationError> {
        let applied_rows = self.ledger.get_applied_migrations().await?;
        let applied: Vec<String> = applied_rows
            .iter()
            .map(|m| m.revision_id.clone())
            .collect();
        let applied_set: HashSet<&str> = applied.iter().map(String::as_str).collect();
        let pending: Vec<String> = self
            .discover()
            .into_iter()
            .filter(|m| !applied_set.contains(m.revision_id()))
            .map(|m| m.revision_id().to_string())
            .collect();
        Ok(MigrationStatus {
            head: applied.last().cloned(),
            applied,
            pending,
        })
    }

    /// Registered migrations not yet recorded in the ledger, chain order.
    pub async fn pending(&self) -> Result<Vec<&'a dyn GraphMigration>, MigrationError> {
        let applied = self.ledger.get_applied_migrations().await?;
        let applied_set: HashSet<String> =
            applied.into_iter().map(|m| m.revision_id).collect();
        Ok(self
            .discover()
            .into_iter()
            .filter(|m| !applied_set.contains(m.revision_id()))
            .collect())
    }

    /// Scaffold a new migration file from the diff between the chain tip's
    /// stored snapshot and `snapshot`. With no snapshot the bodies are
    /// left empty for hand-written steps.
    pub async fn create_migration(
        &self,
        description: &str,
        snapshot: Option<SchemaSnapshot>,
        rollback_safe: bool,
    ) -> Result<PathBuf, MigrationError> {
        let chain = self.discover();
        let seq = chain.len() + 1;
        let revision_id = generate_revision_id(seq, description);
        let parent_id = chain.last().map(|m| m.revision_id().to_string());

        let (schema_hash, upgrade_lines, downgrade_lines) = match snapshot {
            Some(snapshot) => {
                let hashed = hash_snapshot(snapshot)?;
                self.ledger
                    .store_snapshot(&hashed.schema_hash, &hashed.to_json()?)
                    .await?;

                let parent_snapshot = match chain.last() {
                    Some(parent) if !parent.schema_hash().is_empty() => self
                        .ledger
                        .get_snapshot(parent.schema_hash())
                        .await?
                        .map(|row| SchemaSnapshot::from_json(&row.snapshot_json))
                        .transpose()?,
                    _ => None,
                };
                let base = parent_snapshot.unwrap_or_else(SchemaSnapshot::empty);
                let diff = diff_snapshots(&base, &hashed);
                let (up, down) = operation_lines(&diff);
                (hashed.schema_hash, up, down)
            }
            None => (String::new(), Vec::new(), Vec::new()),
        };

        let scaffold = MigrationScaffold {
            revision_id: revision_id.clone(),
            parent_id,
            description: description.to_string(),
            schema_hash,
            rollback_safe,
            upgrade_lines,
            downgrade_lines,
        };
        let path = write_migration_file(&self.config.migrations_dir(), &scaffold)?;
        info!("Created migration '{}' at {}", revision_id, path.display());
        Ok(path)
    }

    /// Apply pending migrations up to and including `target` (all of them
    /// when no target is given). Returns the revision ids applied, in
    /// order. Each migration gets a fresh context; the ledger row is
    /// written only after the body succeeds.
    pub async fn upgrade<C: GraphClient>(
        &self,
        target: Option<&str>,
        mut client: Option<&mut C>,
        dry_run: bool,
    ) -> Result<Vec<String>, MigrationError> {
        let pending = self.pending().await?;
        let mut applied = Vec::new();

        for migration in pending {
            let revision_id = migration.revision_id().to_string();
            info!(
                "{} migration '{}'",
                if dry_run { "Would apply" } else { "Applying" },
                revision_id
            );

            let mut ctx = MigrationContext::new(
                client.as_mut().map(|c| &mut **c as &mut dyn GraphClient),
                dry_run,
            );
            migration
                .upgrade(&mut ctx)
                .map_err(|source| MigrationError::UpgradeFailed {
                    revision_id: revision_id.clone(),
                    source: Box::new(source),
                })?;

            if !dry_run {
                self.ledger
                    .record_migration(
                        &revision_id,
                        migration.parent_id(),
                        migration.description(),
                        migration.schema_hash(),
                        migration.rollback_safe(),
                    )
                    .await?;
            }
            applied.push(revision_id.clone());

            if Some(revision_id.as_str()) == target {
                break;
            }
        }
        Ok(applied)
    }

    /// Roll back applied migrations, newest first, stopping before
    /// `target` (exclusive: the target remains applied). Without a target
    /// exactly one migration is rolled back. Rollback-unsafe migrations
    /// abort before their body runs.
    pub async fn downgrade<C: GraphClient>(
        &self,
        target: Option<&str>,
        mut client: Option<&mut C>,
        dry_run: bool,
    ) -> Result<Vec<String>, MigrationError> {
        let applied_rows = self.ledger.get_applied_migrations().await?;
        let mut rolled_back = Vec::new();

        for row in applied_rows.iter().rev() {
            if Some(row.revision_id.as_str()) == target {
                break;
            }
            let migration = self
                .registry
                .get(&row.revision_id)
                .ok_or_else(|| MigrationError::NotRegistered(row.revision_id.clone()))?;
            if !migration.rollback_safe() {
                return Err(MigrationError::RollbackUnsafe(row.revision_id.clone()));
            }

            info!(
                "{} migration '{}'",
                if dry_run { "Would roll back" } else { "Rolling back" },
                row.revision_id
            );
            let mut ctx = MigrationContext::new(
                client.as_mut().map(|c| &mut **c as &mut dyn GraphClient),
                dry_run,
            );
            migration
                .downgrade(&mut ctx)
                .map_err(|source| MigrationError::DowngradeFailed {
                    revision_id: row.revision_id.clone(),
                    source: Box::new(source),
                })?;

            if !dry_run {
                self.ledger.remove_migration(&row.revision_id).await?;
            }
            rolled_back.push(row.revision_id.clone());

            if target.is_none() {
                break;
            }
        }
        Ok(rolled_back)
    }
}
