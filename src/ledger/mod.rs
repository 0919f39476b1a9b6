//! Durable migration ledger backed by SQLite through sea-orm.
//!
//! The ledger records applied migrations, ingest batches, and serialized
//! schema snapshots. Every write auto-commits; duplicate primary keys come
//! back as typed `LedgerError` variants instead of raw database errors.

pub mod connection;
pub mod entities;
pub mod migrations;

use std::path::Path;

use chrono::Utc;
use sea_orm::sea_query::OnConflict;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    Set, SqlErr,
};
use tracing::info;

use crate::errors::LedgerError;
use migrations::{Migrator, MigratorTrait};

pub use entities::{AppliedMigration, DatasetBatch, StoredSnapshot};

/// Ledger format version, stored in `ledger_meta` on creation.
pub const SCHEMA_VERSION: &str = "1";

pub struct Ledger {
    db: DatabaseConnection,
}

impl Ledger {
    /// Open (creating if necessary) the ledger at the given file path.
    pub async fn open(path: &Path) -> Result<Self, LedgerError> {
        let url = connection::ledger_url(path)?;
        Self::connect_url(&url).await
    }

    /// Connect to an explicit sqlite URL. Tests use `sqlite::memory:`.
    pub async fn connect_url(url: &str) -> Result<Self, LedgerError> {
        let db = connection::connect(url).await?;
        Migrator::up(&db, None).await?;
        let ledger = Self { db };
        ledger.ensure_schema_version().await?;
        Ok(ledger)
    }

    async fn ensure_schema_version(&self) -> Result<(), LedgerError> {
        let existing = entities::ledger_meta::Entity::find_by_id("schema_version")
            .one(&self.db)
            .await?;
        if existing.is_none() {
            entities::ledger_meta::ActiveModel {
                key: Set("schema_version".to_string()),
                value: Set(SCHEMA_VERSION.to_string()),
            }
            .insert(&self.db)
            .await?;
        }
        Ok(())
    }

    pub async fn schema_version(&self) -> Result<Option<String>, LedgerError> {
        Ok(entities::ledger_meta::Entity::find_by_id("schema_version")
            .one(&self.db)
            .await?
            .map(|row| row.value))
    }

    /// Record a migration as applied. A revision id that is already present
    /// raises `LedgerError::DuplicateMigration`.
    pub async fn record_migration(
        &self,
        revision_id: &str,
        parent_id: Option<&str>,
        description: &str,
        schema_hash: &str,
        rollback_safe: bool,
    ) -> Result<AppliedMigration, LedgerError> {
        let row = entities::applied_migrations::ActiveModel {
            revision_id: Set(revision_id.to_string()),
            parent_id: Set(parent_id.map(str::to_string)),
            description: Set(description.to_string()),
            schema_hash: Set(schema_hash.to_string()),
            applied_at: Set(Utc::now()),
            rollback_safe: Set(rollback_safe),
        };
        match row.insert(&self.db).await {
            Ok(model) => {
                info!("Recorded migration '{}' in ledger", revision_id);
                Ok(model)
            }
            Err(err) => match err.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => {
                    Err(LedgerError::DuplicateMigration(revision_id.to_string()))
                }
                _ => Err(err.into()),
            },
        }
    }

    /// Remove a migration row after a successful downgrade. Removing an
    /// unknown revision is a no-op.
    pub async fn remove_migration(&self, revision_id: &str) -> Result<(), LedgerError> {
        entities::applied_migrations::Entity::delete_by_id(revision_id)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// All applied migrations in application order.
    pub async fn get_applied_migrations(&self) -> Result<Vec<AppliedMigration>, LedgerError> {
        Ok(entities::applied_migrations::Entity::find()
            .order_by_asc(entities::applied_migrations::Column::AppliedAt)
            .order_by_asc(entities::applied_migrations::Column::RevisionId)
            .all(&self.db)
            .await?)
    }

    /// The most recently applied migration, if any.
    pub async fn get_head(&self) -> Result<Option<AppliedMigration>, LedgerError> {
        Ok(entities::applied_migrations::Entity::find()
            .order_by_desc(entities::applied_migrations::Column::AppliedAt)
            .order_by_desc(entities::applied_migrations::Column::RevisionId)
            .one(&self.db)
            .await?)
    }

    pub async fn is_applied(&self, revision_id: &str) -> Result<bool, LedgerError> {
        Ok(entities::applied_migrations::Entity::find_by_id(revision_id)
            .one(&self.db)
            .await?
            .is_some())
    }

    /// Record a dataset ingest batch. A duplicate batch id raises
    /// `LedgerError::DuplicateBatch`.
    #[allow(clippy::too_many_arguments)]
    pub async fn record_batch(
        &self,
        batch_id: &str,
        migration_id: Option<&str>,
        source_file: &str,
        file_checksum: &str,
        loader_version: &str,
        record_count: Option<i64>,
    ) -> Result<DatasetBatch, LedgerError> {
        let row = entities::dataset_batches::ActiveModel {
            batch_id: Set(batch_id.to_string()),
            migration_id: Set(migration_id.map(str::to_string)),
            source_file: Set(source_file.to_string()),
            file_checksum: Set(file_checksum.to_string()),
            loader_version: Set(loader_version.to_string()),
            record_count: Set(record_count),
            created_at: Set(Utc::now()),
        };
        match row.insert(&self.db).await {
            Ok(model) => {
                info!("Recorded batch '{}' in ledger", batch_id);
                Ok(model)
            }
            Err(err) => match err.sql_err() {
                Some(SqlErr::UniqueConstraintViolation(_)) => {
                    Err(LedgerError::DuplicateBatch(batch_id.to_string()))
                }
                _ => Err(err.into()),
            },
        }
    }

    /// Batches, optionally filtered to one migration, newest first.
    pub async fn get_batches(
        &self,
        migration_id: Option<&str>,
    ) -> Result<Vec<DatasetBatch>, LedgerError> {
        let mut query = entities::dataset_batches::Entity::find()
            .order_by_desc(entities::dataset_batches::Column::CreatedAt);
        if let Some(migration_id) = migration_id {
            query = query
                .filter(entities::dataset_batches::Column::MigrationId.eq(migration_id));
        }
        Ok(query.all(&self.db).await?)
    }

    pub async fn get_batch(&self, batch_id: &str) -> Result<Option<DatasetBatch>, LedgerError> {
        Ok(entities::dataset_batches::Entity::find_by_id(batch_id)
            .one(&self.db)
            .await?)
    }

    pub async fn remove_batch(&self, batch_id: &str) -> Result<(), LedgerError> {
        entities::dataset_batches::Entity::delete_by_id(batch_id)
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Store a serialized snapshot, keyed by its hash. Re-storing the same
    /// hash is an upsert, not an error; identical hashes imply identical
    /// canonical content.
    pub async fn store_snapshot(
        &self,
        schema_hash: &str,
        snapshot_json: &str,
    ) -> Result<(), LedgerError> {
        let row = entities::schema_snapshots::ActiveModel {
            schema_hash: Set(schema_hash.to_string()),
            snapshot_json: Set(snapshot_json.to_string()),
            created_at: Set(Utc::now()),
        };
        entities::schema_snapshots::Entity::insert(row)
            .on_conflict(
                OnConflict::column(entities::schema_snapshots::Column::SchemaHash)
                    .update_column(entities::schema_snapshots::Column::SnapshotJson)
                    .to_owned(),
            )
            .exec(&self.db)
            .await?;
        Ok(())
    }

    pub async fn get_snapshot(
        &self,
        schema_hash: &str,
    ) -> Result<Option<StoredSnapshot>, LedgerError> {
        Ok(entities::schema_snapshots::Entity::find_by_id(schema_hash)
            .one(&self.db)
            .await?)
    }

    /// Sanity-check the recorded chain. Returns human-readable issue
    /// strings; an empty vec means the chain is consistent.
    pub async fn verify_chain(&self) -> Result<Vec<String>, LedgerError> {
        let applied = self.get_applied_migrations().await?;
        let mut issues = Vec::new();
        let known: std::collections::HashSet<&str> =
            applied.iter().map(|m| m.revision_id.as_str()).collect();

        let mut roots = 0usize;
        for row in &applied {
            match &row.parent_id {
                None => roots += 1,
                Some(parent) => {
                    if !known.contains(parent.as_str()) {
                        issues.push(format!(
                            "Migration '{}' references unknown parent '{}'",
                            row.revision_id, parent
                        ));
                    }
                }
            }
            if row.schema_hash.is_empty() {
                issues.push(format!(
                    "Migration '{}' has no schema hash recorded",
                    row.revision_id
                ));
            }
        }
        if applied.len() > 1 && roots > 1 {
            issues.push(format!("Ledger has {roots} root migrations; expected 1"));
        }
        Ok(issues)
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }
}
