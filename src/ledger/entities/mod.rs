pub mod applied_migrations;
pub mod dataset_batches;
pub mod ledger_meta;
pub mod schema_snapshots;

pub use applied_migrations::Model as AppliedMigration;
pub use dataset_batches::Model as DatasetBatch;
pub use schema_snapshots::Model as StoredSnapshot;
