//! stratum: a schema migration manager for graph databases.
//!
//! Model manifests describe the desired schema; migrations form an
//! ordered, content-addressed chain that moves a live graph between
//! schema versions; a SQLite ledger records what has been applied and
//! which datasets were loaded.

pub mod cli;
pub mod config;
pub mod errors;
pub mod ingest;
pub mod ir;
pub mod ledger;
pub mod migrate;
pub mod scaffold;
pub mod verify;
