//! Error types for stratum
//!
//! One enum per error domain: configuration, schema parsing, migration
//! execution, ledger persistence, and data ingest. Validation findings are
//! accumulated in `ingest::validate::ValidationResult` instead of being
//! raised; only `ValidationResult::raise_on_errors` converts them into an
//! `IngestError`.

use std::path::PathBuf;

use thiserror::Error;

/// Project configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// No stratum.toml was found at or above the given path
    #[error("No stratum project found at '{0}'. Run 'stratum init' first.")]
    NotInitialized(PathBuf),

    /// The configuration file exists but could not be parsed
    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// Configuration could not be serialized for writing
    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Schema model parsing errors
#[derive(Error, Debug)]
pub enum SchemaError {
    /// A model manifest declares no kgid
    #[error(
        "Model '{class_name}' in {path} is missing a kgid. \
         Every node and relationship model must declare an immutable kgid."
    )]
    MissingKgid { class_name: String, path: PathBuf },

    /// Two models share the same kgid (nodes and relationships share one namespace)
    #[error("Duplicate kgid '{kgid}' found on models '{first}' and '{second}'")]
    DuplicateKgid {
        kgid: String,
        first: String,
        second: String,
    },

    /// A model manifest file could not be parsed
    #[error("Failed to parse model manifest {path}: {source}")]
    Manifest {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Raised by a live graph connection when a query fails.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct GraphError {
    pub message: String,
}

impl GraphError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Migration registration and execution errors
#[derive(Error, Debug)]
pub enum MigrationError {
    /// Two migrations were registered with the same revision id
    #[error("Migration '{0}' is already registered")]
    DuplicateRevision(String),

    /// The ledger records a migration the registry does not know about
    #[error("Migration '{0}' is recorded in the ledger but not registered")]
    NotRegistered(String),

    /// A migration's upgrade body failed; the run is aborted
    #[error("Migration '{revision_id}' failed during upgrade: {source}")]
    UpgradeFailed {
        revision_id: String,
        #[source]
        source: Box<MigrationError>,
    },

    /// A migration's downgrade body failed; the run is aborted
    #[error("Migration '{revision_id}' failed during downgrade: {source}")]
    DowngradeFailed {
        revision_id: String,
        #[source]
        source: Box<MigrationError>,
    },

    /// Downgrade was requested for a migration marked rollback-unsafe
    #[error(
        "Migration '{0}' is marked as rollback-unsafe. Downgrade is not permitted."
    )]
    RollbackUnsafe(String),

    /// A query issued by a migration body failed
    #[error("Graph query failed: {0}")]
    Graph(#[from] GraphError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("Failed to render migration scaffold: {0}")]
    Render(#[from] handlebars::RenderError),

    #[error("Snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ledger persistence errors
#[derive(Error, Debug)]
pub enum LedgerError {
    /// The revision id is already recorded (primary-key violation)
    #[error("Migration '{0}' is already recorded in the ledger")]
    DuplicateMigration(String),

    /// The batch id is already recorded (primary-key violation)
    #[error("Batch '{0}' is already recorded in the ledger")]
    DuplicateBatch(String),

    #[error("Ledger database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn digest_prefix(digest: &str) -> &str {
    digest.get(..12).unwrap_or(digest)
}

/// Data ingest errors: fetching, parsing, and checksum verification
#[derive(Error, Debug)]
pub enum IngestError {
    /// A downloaded file's digest does not match the expected one. The full
    /// digests are carried on the error; display truncates them.
    #[error(
        "Checksum mismatch for '{uri}': expected {}…, got {}…",
        digest_prefix(.expected),
        digest_prefix(.actual)
    )]
    ChecksumMismatch {
        uri: String,
        expected: String,
        actual: String,
    },

    /// The remote source could not be fetched
    #[error("Failed to fetch {uri}: {source}")]
    Fetch {
        uri: String,
        #[source]
        source: reqwest::Error,
    },

    /// No fetcher is registered for the URI scheme
    #[error("No fetcher registered for scheme '{scheme}'. Supported schemes: {supported}")]
    UnsupportedScheme { scheme: String, supported: String },

    /// The URI could not be parsed at all
    #[error("Invalid URI '{uri}': {message}")]
    InvalidUri { uri: String, message: String },

    /// The file format is recognized but not supported by this build
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The compression codec is recognized but not supported by this build
    #[error("Unsupported compression: {0}")]
    UnsupportedCompression(String),

    /// Neither the extension nor an explicit hint identified the format
    #[error("{0}")]
    FormatDetection(String),

    /// A local source file referenced by a batch does not exist
    #[error("Source file not found: {0}")]
    SourceMissing(PathBuf),

    /// The file content could not be decoded into records
    #[error("Parse error: {0}")]
    Parse(String),

    /// Validation was asked to raise and found errors
    #[error("Validation failed with {0} error(s)")]
    ValidationFailed(usize),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
