//! Remote dataset fetching with a content-addressed local cache.
//!
//! Fetchers are dispatched by URI scheme. Downloads land in a `.part`
//! temp file and are renamed into place only when complete, so a killed
//! fetch never leaves a truncated file under the final name.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::errors::IngestError;
use crate::ingest::batch::compute_file_checksum;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// A remote dataset reference.
#[derive(Debug, Clone)]
pub struct RemoteSource {
    pub uri: String,
    /// Expected SHA-256 hex digest, verified after download when set.
    pub expected_checksum: Option<String>,
    /// Local filename override; defaults to the last URI path segment.
    pub filename: Option<String>,
}

impl RemoteSource {
    pub fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            expected_checksum: None,
            filename: None,
        }
    }

    pub fn with_checksum(mut self, checksum: &str) -> Self {
        self.expected_checksum = Some(checksum.to_string());
        self
    }

    pub fn with_filename(mut self, filename: &str) -> Self {
        self.filename = Some(filename.to_string());
        self
    }

    pub fn parsed(&self) -> Result<Url, IngestError> {
        Url::parse(&self.uri).map_err(|e| IngestError::InvalidUri {
            uri: self.uri.clone(),
            message: e.to_string(),
        })
    }

    pub fn scheme(&self) -> Result<String, IngestError> {
        Ok(self.parsed()?.scheme().to_string())
    }

    /// Filename to store the download under.
    pub fn local_filename(&self) -> Result<String, IngestError> {
        if let Some(name) = &self.filename {
            return Ok(name.clone());
        }
        let url = self.parsed()?;
        let last = url
            .path_segments()
            .and_then(|segments| segments.last().map(str::to_string))
            .filter(|s| !s.is_empty());
        Ok(last.unwrap_or_else(|| "download".to_string()))
    }
}

/// Outcome of a completed fetch.
#[derive(Debug, Clone)]
pub struct FetchResult {
    pub local_path: PathBuf,
    pub uri: String,
    pub checksum: String,
    pub size: u64,
    pub from_cache: bool,
}

/// One transport, e.g. HTTP. Implementations download to `dest` atomically.
#[async_trait]
pub trait Fetcher: Send + Sync {
    fn schemes(&self) -> &[&str];

    async fn fetch(&self, source: &RemoteSource, dest: &Path) -> Result<(), IngestError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    fn schemes(&self) -> &[&str] {
        &["http", "https"]
    }

    async fn fetch(&self, source: &RemoteSource, dest: &Path) -> Result<(), IngestError> {
        debug!("Fetching {} -> {}", source.uri, dest.display());
        let response = self
            .client
            .get(&source.uri)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| IngestError::Fetch {
                uri: source.uri.clone(),
                source: e,
            })?;
        let body = response.bytes().await.map_err(|e| IngestError::Fetch {
            uri: source.uri.clone(),
            source: e,
        })?;

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let part = dest.with_extension(format!(
            "part-{}",
            &Uuid::new_v4().simple().to_string()[..8]
        ));
        fs::write(&part, &body)?;
        fs::rename(&part, dest)?;
        Ok(())
    }
}

/// Scheme -> fetcher dispatch table. `s3`/`gs` and other schemes without a
/// registered fetcher report `UnsupportedScheme`.
pub struct FetcherRegistry {
    fetchers: HashMap<String, Arc<dyn Fetcher>>,
}

impl FetcherRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            fetchers: HashMap::new(),
        };
        registry.register(Arc::new(HttpFetcher::new()));
        registry
    }

    pub fn register(&mut self, fetcher: Arc<dyn Fetcher>) {
        for scheme in fetcher.schemes() {
            self.fetchers.insert(scheme.to_string(), fetcher.clone());
        }
    }

    pub fn get(&self, scheme: &str) -> Result<Arc<dyn Fetcher>, IngestError> {
        self.fetchers.get(scheme).cloned().ok_or_else(|| {
            let mut supported: Vec<&str> =
                self.fetchers.keys().map(String::as_str).collect();
            supported.sort_unstable();
            IngestError::UnsupportedScheme {
                scheme: scheme.to_string(),
                supported: supported.join(", "),
            }
        })
    }
}

impl Default for FetcherRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Content-addressed download cache: `<root>/<sha256>/<filename>`.
pub struct FileCache {
    root: PathBuf,
}

impl FileCache {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn entry_dir(&self, checksum: &str) -> PathBuf {
        self.root.join(checksum)
    }

    /// Look up a cached file by checksum. The content is re-hashed on every
    /// hit; a corrupted entry is evicted and reported as a miss.
    pub fn lookup(&self, checksum: &str, filename: &str) -> Result<Option<PathBuf>, IngestError> {
        let path = self.entry_dir(checksum).join(filename);
        if !path.exists() {
            return Ok(None);
        }
        let actual = compute_file_checksum(&path)?;
        if actual != checksum {
            warn!(
                "Cache entry {} is corrupted; evicting",
                path.display()
            );
            self.evict(checksum)?;
            return Ok(None);
        }
        Ok(Some(path))
    }

    /// Copy a verified file into the cache, returning the cached path.
    pub fn store(&self, source: &Path, checksum: &str) -> Result<PathBuf, IngestError> {
        let filename = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "download".to_string());
        let dir = self.entry_dir(checksum);
        fs::create_dir_all(&dir)?;
        let target = dir.join(&filename);
        let part = target.with_extension(format!(
            "part-{}",
            &Uuid::new_v4().simple().to_string()[..8]
        ));
        fs::copy(source, &part)?;
        fs::rename(&part, &target)?;
        Ok(target)
    }

    pub fn evict(&self, checksum: &str) -> Result<(), IngestError> {
        let dir = self.entry_dir(checksum);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
        }
        Ok(())
    }

    pub fn clear(&self) -> Result<(), IngestError> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }

    /// Re-verify every cache entry, evicting corrupted ones. Returns
    /// (kept, evicted) counts.
    pub fn verify_all(&self) -> Result<(usize, usize), IngestError> {
        let mut kept = 0usize;
        let mut evicted = 0usize;
        if !self.root.exists() {
            return Ok((0, 0));
        }
        for entry in fs::read_dir(&self.root)? {
            let dir = entry?.path();
            if !dir.is_dir() {
                continue;
            }
            let checksum = dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            let mut ok = false;
            for file in fs::read_dir(&dir)? {
                let path = file?.path();
                if path.is_file() && compute_file_checksum(&path)? == checksum {
                    ok = true;
                    break;
                }
            }
            if ok {
                kept += 1;
            } else {
                fs::remove_dir_all(&dir)?;
                evicted += 1;
            }
        }
        Ok((kept, evicted))
    }
}

/// Knobs for `fetch_remote`.
pub struct FetchOptions {
    pub dest_dir: PathBuf,
    pub cache_dir: Option<PathBuf>,
    pub use_cache: bool,
}

/// Fetch a remote source, going through the cache when an expected checksum
/// is known, and verifying the downloaded content against it.
pub async fn fetch_remote(
    source: &RemoteSource,
    registry: &FetcherRegistry,
    options: &FetchOptions,
) -> Result<FetchResult, IngestError> {
    let filename = source.local_filename()?;

    let cache = options
        .cache_dir
        .as_ref()
        .filter(|_| options.use_cache)
        .map(|dir| FileCache::new(dir));

    if let (Some(cache), Some(expected)) = (&cache, &source.expected_checksum) {
        if let Some(cached) = cache.lookup(expected, &filename)? {
            info!("Cache hit for {} ({})", source.uri, expected);
            let size = fs::metadata(&cached)?.len();
            return Ok(FetchResult {
                local_path: cached,
                uri: source.uri.clone(),
                checksum: expected.clone(),
                size,
                from_cache: true,
            });
        }
    }

    let fetcher = registry.get(&source.scheme()?)?;
    fs::create_dir_all(&options.dest_dir)?;
    let dest = options.dest_dir.join(&filename);
    fetcher.fetch(source, &dest).await?;

    let checksum = compute_file_checksum(&dest)?;
    if let Some(expected) = &source.expected_checksum {
        if &checksum != expected {
            fs::remove_file(&dest)?;
            return Err(IngestError::ChecksumMismatch {
                uri: source.uri.clone(),
                expected: expected.clone(),
                actual: checksum,
            });
        }
    }

    if let Some(cache) = &cache {
        cache.store(&dest, &checksum)?;
    }

    let size = fs::metadata(&dest)?.len();
    info!("Fetched {} ({size} bytes)", source.uri);
    Ok(FetchResult {
        local_path: dest,
        uri: source.uri.clone(),
        checksum,
        size,
        from_cache: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_filename_defaults_to_last_segment() {
        let source = RemoteSource::new("https://example.com/data/people.csv.gz");
        assert_eq!(source.local_filename().expect("filename"), "people.csv.gz");
    }

    #[test]
    fn filename_override_wins() {
        let source =
            RemoteSource::new("https://example.com/download?id=7").with_filename("people.csv");
        assert_eq!(source.local_filename().expect("filename"), "people.csv");
    }

    #[test]
    fn invalid_uri_is_rejected() {
        let source = RemoteSource::new("not a uri");
        assert!(matches!(
            source.scheme(),
            Err(IngestError::InvalidUri { .. })
        ));
    }

    #[test]
    fn unknown_scheme_lists_supported_ones() {
        let registry = FetcherRegistry::new();
        let err = registry.get("s3").err().expect("unsupported");
        match err {
            IngestError::UnsupportedScheme { scheme, supported } => {
                assert_eq!(scheme, "s3");
                assert_eq!(supported, "http, https");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn cache_store_lookup_and_corruption_eviction() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cache = FileCache::new(&dir.path().join("cache"));

        let source = dir.path().join("people.csv");
        fs::write(&source, b"a,b\n1,2\n").expect("write");
        let checksum = compute_file_checksum(&source).expect("checksum");

        let stored = cache.store(&source, &checksum).expect("store");
        assert!(stored.exists());
        let hit = cache.lookup(&checksum, "people.csv").expect("lookup");
        assert_eq!(hit, Some(stored.clone()));

        // Corrupt the entry; the next lookup must evict it.
        fs::write(&stored, b"tampered").expect("tamper");
        let miss = cache.lookup(&checksum, "people.csv").expect("lookup");
        assert!(miss.is_none());
        assert!(!stored.exists());
    }
}
