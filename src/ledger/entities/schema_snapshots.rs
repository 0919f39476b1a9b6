use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Serialized schema snapshots, content-addressed by their hash.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "schema_snapshots")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub schema_hash: String,
    pub snapshot_json: String,
    pub created_at: ChronoDateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
