use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// One row per applied migration. `revision_id` is the primary key, so a
/// double apply surfaces as a unique-constraint violation rather than a
/// silent overwrite.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "applied_migrations")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub revision_id: String,
    pub parent_id: Option<String>,
    pub description: String,
    pub schema_hash: String,
    pub applied_at: ChronoDateTimeUtc,
    pub rollback_safe: bool,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
