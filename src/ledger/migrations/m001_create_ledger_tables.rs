use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LedgerMeta::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LedgerMeta::Key)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(LedgerMeta::Value).string().not_null())
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(AppliedMigrations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AppliedMigrations::RevisionId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(AppliedMigrations::ParentId).string())
                    .col(
                        ColumnDef::new(AppliedMigrations::Description)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AppliedMigrations::SchemaHash)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AppliedMigrations::AppliedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AppliedMigrations::RollbackSafe)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(DatasetBatches::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(DatasetBatches::BatchId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(DatasetBatches::MigrationId).string())
                    .col(
                        ColumnDef::new(DatasetBatches::SourceFile)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DatasetBatches::FileChecksum)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(DatasetBatches::LoaderVersion)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(DatasetBatches::RecordCount).big_integer())
                    .col(
                        ColumnDef::new(DatasetBatches::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(SchemaSnapshots::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(SchemaSnapshots::SchemaHash)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(SchemaSnapshots::SnapshotJson)
                            .text()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(SchemaSnapshots::CreatedAt)
                            .timestamp()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_dataset_batches_migration_id")
                    .table(DatasetBatches::Table)
                    .col(DatasetBatches::MigrationId)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(SchemaSnapshots::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(DatasetBatches::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(AppliedMigrations::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LedgerMeta::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum LedgerMeta {
    Table,
    Key,
    Value,
}

#[derive(DeriveIden)]
enum AppliedMigrations {
    Table,
    RevisionId,
    ParentId,
    Description,
    SchemaHash,
    AppliedAt,
    RollbackSafe,
}

#[derive(DeriveIden)]
enum DatasetBatches {
    Table,
    BatchId,
    MigrationId,
    SourceFile,
    FileChecksum,
    LoaderVersion,
    RecordCount,
    CreatedAt,
}

#[derive(DeriveIden)]
enum SchemaSnapshots {
    Table,
    SchemaHash,
    SnapshotJson,
    CreatedAt,
}
