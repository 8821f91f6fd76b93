use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::fs as tokio_fs;
use tracing::{debug, info, warn};

/// Metadata for a single cached media file, keyed by the original URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    /// Original remote URL.
    pub original_url: String,

    /// Size of the file on disk in bytes.
    pub file_size: u64,

    /// Expected total size from the server Content-Length, 0 if unknown.
    pub expected_total_size: u64,

    /// Whether the download finished.
    pub is_complete: bool,

    /// MIME type reported by the origin.
    pub content_type: Option<String>,

    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub access_count: u64,
}

impl CacheMetadata {
    pub fn new(original_url: String) -> Self {
        let now = Utc::now();
        Self {
            original_url,
            file_size: 0,
            expected_total_size: 0,
            is_complete: false,
            content_type: None,
            created_at: now,
            last_accessed: now,
            access_count: 0,
        }
    }

    pub fn mark_accessed(&mut self) {
        self.last_accessed = Utc::now();
        self.access_count += 1;
    }
}

/// Entry handed out to the proxy for serving.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub metadata: CacheMetadata,
    pub file_path: PathBuf,
}

impl CacheEntry {
    pub fn exists(&self) -> bool {
        self.file_path.exists()
    }

    pub fn file_size(&self) -> Result<u64> {
        let metadata = std::fs::metadata(&self.file_path)
            .with_context(|| format!("Failed to get file metadata for {:?}", self.file_path))?;
        Ok(metadata.len())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct GlobalCacheMetadata {
    entries: HashMap<String, CacheMetadata>,
    total_size: u64,
}

impl GlobalCacheMetadata {
    fn insert(&mut self, key: String, metadata: CacheMetadata) {
        if let Some(old) = self.entries.insert(key, metadata.clone()) {
            self.total_size = self.total_size.saturating_sub(old.file_size);
        }
        self.total_size += metadata.file_size;
    }

    fn remove(&mut self, key: &str) -> Option<CacheMetadata> {
        let removed = self.entries.remove(key);
        if let Some(ref metadata) = removed {
            self.total_size = self.total_size.saturating_sub(metadata.file_size);
        }
        removed
    }
}

/// Disk storage for cached media files with JSON metadata persisted
/// beside them.
#[derive(Debug)]
pub struct CacheStorage {
    cache_dir: PathBuf,
    metadata_file: PathBuf,
    max_size_bytes: u64,
    global_metadata: GlobalCacheMetadata,
}

impl CacheStorage {
    pub async fn new(cache_dir: PathBuf, max_size_bytes: u64) -> Result<Self> {
        let metadata_file = cache_dir.join("metadata.json");

        tokio_fs::create_dir_all(&cache_dir)
            .await
            .with_context(|| format!("Failed to create cache directory {:?}", cache_dir))?;

        let global_metadata = if metadata_file.exists() {
            Self::load_metadata(&metadata_file)
                .await
                .unwrap_or_else(|e| {
                    warn!(
                        "Failed to load cache metadata: {}, starting with empty cache",
                        e
                    );
                    GlobalCacheMetadata::default()
                })
        } else {
            GlobalCacheMetadata::default()
        };

        let mut storage = Self {
            cache_dir,
            metadata_file,
            max_size_bytes,
            global_metadata,
        };

        storage.validate_cache().await?;

        info!(
            "Cache storage initialized at {:?} with {} entries ({} MB)",
            storage.cache_dir,
            storage.global_metadata.entries.len(),
            storage.global_metadata.total_size / 1024 / 1024
        );

        Ok(storage)
    }

    async fn load_metadata(metadata_file: &Path) -> Result<GlobalCacheMetadata> {
        let contents = tokio_fs::read_to_string(metadata_file)
            .await
            .with_context(|| format!("Failed to read metadata file {:?}", metadata_file))?;

        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse metadata file {:?}", metadata_file))
    }

    async fn save_metadata(&self) -> Result<()> {
        let contents = serde_json::to_string_pretty(&self.global_metadata)
            .context("Failed to serialize cache metadata")?;

        tokio_fs::write(&self.metadata_file, contents)
            .await
            .with_context(|| format!("Failed to write metadata file {:?}", self.metadata_file))
    }

    /// Drop entries whose files vanished or whose recorded size no longer
    /// matches the file on disk.
    async fn validate_cache(&mut self) -> Result<()> {
        let mut invalid_keys = Vec::new();

        for (key, metadata) in &self.global_metadata.entries {
            let file_path = self.file_path_for(key);

            if !file_path.exists() {
                warn!("Cache file missing for {:?}: {:?}", key, file_path);
                invalid_keys.push(key.clone());
                continue;
            }

            match tokio_fs::metadata(&file_path).await {
                Ok(actual) if actual.len() != metadata.file_size => {
                    warn!(
                        "Cache file size mismatch for {:?}: expected {}, actual {}",
                        key,
                        metadata.file_size,
                        actual.len()
                    );
                    invalid_keys.push(key.clone());
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("Failed to stat cache file for {:?}: {}", key, e);
                    invalid_keys.push(key.clone());
                }
            }
        }

        for key in &invalid_keys {
            self.global_metadata.remove(key);
        }

        if !invalid_keys.is_empty() {
            self.save_metadata().await?;
        }

        Ok(())
    }

    /// Stable, filesystem-safe cache file name for a URL. The same URL
    /// always maps to the same file.
    pub fn file_path_for(&self, url: &str) -> PathBuf {
        self.cache_dir
            .join(format!("{}.cache", url_to_filename(url)))
    }

    /// Path the downloader writes to before the entry is committed.
    pub fn partial_path_for(&self, url: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.part", url_to_filename(url)))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Get the entry for a URL, marking it accessed. Returns `None` when
    /// there is no entry or its file has gone missing.
    pub fn get_entry(&mut self, url: &str) -> Option<CacheEntry> {
        let file_path = self.file_path_for(url);

        let metadata = self.global_metadata.entries.get_mut(url)?;
        metadata.mark_accessed();

        let entry = CacheEntry {
            metadata: metadata.clone(),
            file_path,
        };

        if entry.exists() {
            Some(entry)
        } else {
            warn!(
                "Cache entry exists in metadata but file is missing: {}",
                url
            );
            self.global_metadata.remove(url);
            None
        }
    }

    /// Commit a finished download: rename the partial file into place and
    /// record its metadata. Evicts least-recently-accessed entries if the
    /// cache now exceeds its capacity.
    pub async fn commit_entry(
        &mut self,
        url: &str,
        expected_total_size: u64,
        content_type: Option<String>,
    ) -> Result<CacheEntry> {
        let partial_path = self.partial_path_for(url);
        let file_path = self.file_path_for(url);

        tokio_fs::rename(&partial_path, &file_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to move {:?} into place at {:?}",
                    partial_path, file_path
                )
            })?;

        let file_size = tokio_fs::metadata(&file_path)
            .await
            .with_context(|| format!("Failed to stat committed cache file {:?}", file_path))?
            .len();

        let mut metadata = CacheMetadata::new(url.to_string());
        metadata.file_size = file_size;
        metadata.expected_total_size = expected_total_size;
        metadata.is_complete = true;
        metadata.content_type = content_type;

        self.global_metadata
            .insert(url.to_string(), metadata.clone());

        self.cleanup_to_capacity().await;
        self.save_metadata().await?;

        debug!("Committed cache entry for {} ({} bytes)", url, file_size);

        Ok(CacheEntry {
            metadata,
            file_path,
        })
    }

    pub async fn remove_entry(&mut self, url: &str) -> Result<()> {
        let file_path = self.file_path_for(url);

        if file_path.exists() {
            tokio_fs::remove_file(&file_path)
                .await
                .with_context(|| format!("Failed to remove cache file {:?}", file_path))?;
        }

        self.global_metadata.remove(url);
        self.save_metadata().await?;

        debug!("Removed cache entry for {}", url);
        Ok(())
    }

    /// Drop ledger entries whose files no longer exist on disk, updating
    /// the running total. Called after a sweep of the cache directory so
    /// the bookkeeping catches up without waiting for a restart.
    pub async fn prune_missing(&mut self) -> Result<usize> {
        let gone: Vec<String> = self
            .global_metadata
            .entries
            .keys()
            .filter(|url| !self.file_path_for(url).exists())
            .cloned()
            .collect();

        if gone.is_empty() {
            return Ok(0);
        }

        for url in &gone {
            self.global_metadata.remove(url);
        }
        self.save_metadata().await?;

        debug!("Pruned {} swept entries from the cache ledger", gone.len());
        Ok(gone.len())
    }

    /// Complete in metadata and still present on disk. The cache files
    /// can be swept out from under us; presence wins over bookkeeping.
    pub fn is_complete(&self, url: &str) -> bool {
        self.global_metadata
            .entries
            .get(url)
            .map(|metadata| metadata.is_complete)
            .unwrap_or(false)
            && self.file_path_for(url).exists()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            total_size_bytes: self.global_metadata.total_size,
            file_count: self.global_metadata.entries.len() as u32,
            max_size_bytes: self.max_size_bytes,
            cache_dir: self.cache_dir.clone(),
        }
    }

    /// Evict least-recently-accessed entries until the total fits the
    /// configured capacity.
    async fn cleanup_to_capacity(&mut self) {
        if self.global_metadata.total_size <= self.max_size_bytes {
            return;
        }

        info!(
            "Cache over capacity ({} MB > {} MB), evicting oldest entries",
            self.global_metadata.total_size / 1024 / 1024,
            self.max_size_bytes / 1024 / 1024
        );

        let mut by_age: Vec<(String, DateTime<Utc>)> = self
            .global_metadata
            .entries
            .iter()
            .map(|(key, m)| (key.clone(), m.last_accessed))
            .collect();
        by_age.sort_by_key(|(_, last_accessed)| *last_accessed);

        for (key, _) in by_age {
            if self.global_metadata.total_size <= self.max_size_bytes {
                break;
            }
            if let Err(e) = self.remove_entry(&key).await {
                warn!("Failed to evict cache entry {}: {}", key, e);
            }
        }
    }
}

/// Cache statistics snapshot.
#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_size_bytes: u64,
    pub file_count: u32,
    pub max_size_bytes: u64,
    pub cache_dir: PathBuf,
}

impl CacheStats {
    pub fn usage_percentage(&self) -> f64 {
        if self.max_size_bytes == 0 {
            return 0.0;
        }
        (self.total_size_bytes as f64 / self.max_size_bytes as f64) * 100.0
    }
}

/// Sanitized tail of the URL plus a stable hash of the whole URL, so the
/// name stays readable while distinct URLs never collide on a shared tail.
fn url_to_filename(url: &str) -> String {
    let tail: String = url
        .rsplit('/')
        .next()
        .unwrap_or(url)
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .take(48)
        .collect();

    format!("{}__{:016x}", tail, fnv1a64(url.as_bytes()))
}

fn fnv1a64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}
