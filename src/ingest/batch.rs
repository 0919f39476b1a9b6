//! Batch bookkeeping: file checksums and ledger-backed ingest tracking.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;

use crate::errors::IngestError;
use crate::ledger::{DatasetBatch, Ledger};

const CHECKSUM_CHUNK: usize = 8192;

/// Streaming SHA-256 of a file's content, as lowercase hex.
pub fn compute_file_checksum(path: &Path) -> Result<String, IngestError> {
    let mut file = File::open(path).map_err(|_| IngestError::SourceMissing(path.to_path_buf()))?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; CHECKSUM_CHUNK];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    let digest = hasher.finalize();
    Ok(format!("{digest:x}"))
}

pub fn new_batch_id() -> String {
    let uuid = Uuid::new_v4().simple().to_string();
    uuid[..12].to_string()
}

/// Registers ingest batches in the ledger and re-verifies them later.
pub struct IngestTracker<'a> {
    ledger: &'a Ledger,
    loader_version: String,
}

impl<'a> IngestTracker<'a> {
    pub fn new(ledger: &'a Ledger) -> Self {
        Self {
            ledger,
            loader_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_loader_version(mut self, version: &str) -> Self {
        self.loader_version = version.to_string();
        self
    }

    /// Checksum a local file and record it as a batch. Returns the batch id.
    pub async fn register_batch(
        &self,
        source: &Path,
        migration_id: Option<&str>,
        record_count: Option<i64>,
    ) -> Result<String, IngestError> {
        let checksum = compute_file_checksum(source)?;
        let batch_id = new_batch_id();
        self.ledger
            .record_batch(
                &batch_id,
                migration_id,
                &source.to_string_lossy(),
                &checksum,
                &self.loader_version,
                record_count,
            )
            .await?;
        info!("Registered batch '{}' for {}", batch_id, source.display());
        Ok(batch_id)
    }

    /// Record a batch for a remote source whose checksum is already known.
    pub async fn register_remote_batch(
        &self,
        uri: &str,
        checksum: &str,
        migration_id: Option<&str>,
        record_count: Option<i64>,
    ) -> Result<String, IngestError> {
        let batch_id = new_batch_id();
        self.ledger
            .record_batch(
                &batch_id,
                migration_id,
                uri,
                checksum,
                &self.loader_version,
                record_count,
            )
            .await?;
        Ok(batch_id)
    }

    /// Re-checksum a recorded batch's source file against the ledger row.
    /// Returns the batch row when the content still matches.
    pub async fn verify_batch(&self, batch_id: &str) -> Result<DatasetBatch, IngestError> {
        let batch = self
            .ledger
            .get_batch(batch_id)
            .await
            .map_err(IngestError::Ledger)?
            .ok_or_else(|| {
                IngestError::Parse(format!("No batch '{batch_id}' recorded in the ledger"))
            })?;
        let path = Path::new(&batch.source_file);
        let actual = compute_file_checksum(path)?;
        if actual != batch.file_checksum {
            return Err(IngestError::ChecksumMismatch {
                uri: batch.source_file.clone(),
                expected: batch.file_checksum.clone(),
                actual,
            });
        }
        Ok(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn checksum_matches_known_digest() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("data.csv");
        fs::write(&path, b"hello").expect("write");
        // sha256("hello")
        assert_eq!(
            compute_file_checksum(&path).expect("checksum"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn missing_file_reports_source_missing() {
        let err = compute_file_checksum(Path::new("/nonexistent/data.csv"))
            .expect_err("should fail");
        assert!(matches!(err, IngestError::SourceMissing(_)));
    }

    #[test]
    fn batch_ids_are_twelve_hex_chars() {
        let id = new_batch_id();
        assert_eq!(id.len(), 12);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
