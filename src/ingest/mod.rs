//! Dataset ingest: fetching, parsing, validation, and batch tracking.

pub mod batch;
pub mod parsers;
pub mod remote;
pub mod validate;

pub use batch::{compute_file_checksum, IngestTracker};
pub use parsers::{parse_file, FileFormat, ParseResult};
pub use remote::{fetch_remote, FetchOptions, FetchResult, FetcherRegistry, FileCache, RemoteSource};
pub use validate::{validate, ColumnRule, DataSchema, DType, ValidationResult};
