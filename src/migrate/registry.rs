//! Static migration registration.
//!
//! Migrations are compiled into the binary and registered explicitly on a
//! `MigrationRegistry`, in the same spirit as sea-orm's `MigratorTrait`
//! listing its migrations in code. There is no filesystem scanning or
//! runtime loading.

use crate::errors::MigrationError;
use crate::migrate::operations::MigrationContext;

/// A single graph migration.
///
/// Bodies must be idempotent: the engine records a migration only after its
/// body succeeds, so a crash between execution and recording replays the
/// body on the next run. Write `MERGE` and `IF NOT EXISTS` forms, not bare
/// `CREATE`.
pub trait GraphMigration: Send + Sync {
    /// Unique revision id, e.g. "0003_add_friendship".
    fn revision_id(&self) -> &str;

    /// Revision id of the parent migration; `None` for the chain root.
    fn parent_id(&self) -> Option<&str>;

    /// Hash of the schema snapshot this migration brings the graph to.
    fn schema_hash(&self) -> &str {
        ""
    }

    /// Human-readable description for `status` output.
    fn description(&self) -> &str {
        ""
    }

    /// Whether this migration may be rolled back. Destructive migrations
    /// set this to false and `downgrade` will refuse to run them.
    fn rollback_safe(&self) -> bool {
        true
    }

    fn upgrade(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError>;

    fn downgrade(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError>;
}

pub type MigrationFn = fn(&mut MigrationContext<'_>) -> Result<(), MigrationError>;

/// A `GraphMigration` built from plain functions. Generated migration files
/// expose a `migration()` constructor returning one of these.
pub struct FnMigration {
    revision_id: String,
    parent_id: Option<String>,
    schema_hash: String,
    description: String,
    rollback_safe: bool,
    upgrade: MigrationFn,
    downgrade: MigrationFn,
}

impl FnMigration {
    pub fn new(
        revision_id: &str,
        parent_id: Option<&str>,
        schema_hash: &str,
        rollback_safe: bool,
        upgrade: MigrationFn,
        downgrade: MigrationFn,
    ) -> Self {
        Self {
            revision_id: revision_id.to_string(),
            parent_id: parent_id.map(str::to_string),
            schema_hash: schema_hash.to_string(),
            description: String::new(),
            rollback_safe,
            upgrade,
            downgrade,
        }
    }

    pub fn with_description(mut self, description: &str) -> Self {
        self.description = description.to_string();
        self
    }
}

impl GraphMigration for FnMigration {
    fn revision_id(&self) -> &str {
        &self.revision_id
    }

    fn parent_id(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    fn schema_hash(&self) -> &str {
        &self.schema_hash
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn rollback_safe(&self) -> bool {
        self.rollback_safe
    }

    fn upgrade(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        (self.upgrade)(ctx)
    }

    fn downgrade(&self, ctx: &mut MigrationContext<'_>) -> Result<(), MigrationError> {
        (self.downgrade)(ctx)
    }
}

/// Holds all registered migrations, in registration order. Ordering for
/// execution is derived from parent links by the engine, not from
/// registration order.
#[derive(Default)]
pub struct MigrationRegistry {
    migrations: Vec<Box<dyn GraphMigration>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        migration: Box<dyn GraphMigration>,
    ) -> Result<(), MigrationError> {
        if self
            .migrations
            .iter()
            .any(|m| m.revision_id() == migration.revision_id())
        {
            return Err(MigrationError::DuplicateRevision(
                migration.revision_id().to_string(),
            ));
        }
        self.migrations.push(migration);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &dyn GraphMigration> {
        self.migrations.iter().map(|m| m.as_ref())
    }

    pub fn get(&self, revision_id: &str) -> Option<&dyn GraphMigration> {
        self.migrations
            .iter()
            .find(|m| m.revision_id() == revision_id)
            .map(|m| m.as_ref())
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}
