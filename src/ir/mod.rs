//! Schema intermediate representation: value types, canonical hashing,
//! structural diffing, and manifest parsing.

pub mod diff;
pub mod hash;
pub mod parser;
pub mod schema;

pub use diff::{diff_snapshots, SchemaDiff};
pub use hash::{compute_hash, hash_snapshot};
pub use parser::parse_models;
pub use schema::{
    Direction, NodeIR, PropertyIR, RelationshipDefIR, RelationshipIR, SchemaSnapshot,
};
