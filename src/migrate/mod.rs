//! Migration definition, registration, scaffolding, and execution.

pub mod engine;
pub mod operations;
pub mod registry;
pub mod template;

pub use engine::{MigrationEngine, MigrationStatus};
pub use operations::{ChunkStrategy, GraphClient, MigrationContext, NoClient, Operation, RelKeys};
pub use registry::{FnMigration, GraphMigration, MigrationRegistry};
