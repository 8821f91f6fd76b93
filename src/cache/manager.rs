use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use super::accounting::{self, SizeReport, SweepReport};
use super::proxy::CacheProxy;
use super::storage::{CacheStats, CacheStorage};
use crate::config::Config;
use crate::media::MediaSource;

/// Process-wide cache context: owns the disk storage and the loopback
/// proxy server, and translates remote media URLs into local proxy URLs.
///
/// Constructed once at startup and passed by reference to everything
/// that needs it; there is no global instance.
pub struct CacheProxyManager {
    cache_dir: PathBuf,
    user_agent: String,
    storage: Arc<RwLock<CacheStorage>>,
    proxy: Arc<CacheProxy>,
}

impl CacheProxyManager {
    /// Resolve the cache directory (creating it), initialize storage, and
    /// start the proxy server.
    pub async fn new(config: &Config) -> Result<Self> {
        let cache_dir = config.resolve_cache_directory();
        let user_agent = config.user_agent();

        let storage = Arc::new(RwLock::new(
            CacheStorage::new(cache_dir.clone(), config.cache.max_size_bytes)
                .await
                .context("Failed to initialize cache storage")?,
        ));

        let proxy = Arc::new(
            CacheProxy::new(storage.clone(), user_agent.clone())
                .context("Failed to create cache proxy server")?,
        );
        proxy
            .start()
            .await
            .context("Failed to start cache proxy server")?;
        info!("Cache proxy server started on port {}", proxy.port());

        Ok(Self {
            cache_dir,
            user_agent,
            storage,
            proxy,
        })
    }

    /// Translate a remote URL into the local proxy URL. Errors if the
    /// proxy server is not running rather than silently passing the
    /// remote URL through.
    pub fn resolve_proxy_url(&self, remote_url: &str) -> Result<String> {
        if !self.proxy.is_running() {
            bail!("Cache proxy server is not running; cannot resolve a proxy URL");
        }
        Ok(self.proxy.proxy_url(remote_url))
    }

    /// Whether the URL is fully cached on disk. False when the proxy
    /// server is absent.
    pub async fn is_cached(&self, url: &str) -> bool {
        if !self.proxy.is_running() {
            return false;
        }
        self.proxy.is_cached(url).await
    }

    /// Build a progressive media source pointed at the proxy URL,
    /// carrying the configured user-agent.
    pub fn build_media_source(&self, remote_url: &str) -> Result<MediaSource> {
        let proxy_url = self.resolve_proxy_url(remote_url)?;
        Ok(MediaSource::new(proxy_url, self.user_agent.clone()))
    }

    /// Aggregate size of everything under the cache directory, computed
    /// recursively. Per-file failures are reported alongside the total
    /// rather than aborting the walk.
    pub fn cache_size(&self) -> SizeReport {
        accounting::cache_size(&self.cache_dir)
    }

    /// Delete every regular file directly under the cache root, leaving
    /// subdirectories untouched, then drop the swept entries from the
    /// storage ledger so stats reflect the sweep immediately. Idempotent.
    pub async fn clear_cache(&self) -> Result<SweepReport> {
        let report = accounting::clear_top_level_files(&self.cache_dir)?;
        if !report.deleted.is_empty() {
            self.storage.write().await.prune_missing().await?;
        }
        Ok(report)
    }

    /// Bookkeeping snapshot from storage metadata.
    pub async fn storage_stats(&self) -> CacheStats {
        self.storage.read().await.stats()
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn user_agent(&self) -> &str {
        &self.user_agent
    }

    pub fn proxy_port(&self) -> u16 {
        self.proxy.port()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn create_test_manager() -> (CacheProxyManager, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let mut config = Config::default();
        config.cache.cache_directory = Some(temp_dir.path().to_path_buf());

        let manager = CacheProxyManager::new(&config).await.unwrap();
        (manager, temp_dir)
    }

    #[tokio::test]
    async fn test_resolve_proxy_url_is_loopback_and_idempotent() {
        let (manager, _temp_dir) = create_test_manager().await;
        let url = "http://example/video.mp4";

        let first = manager.resolve_proxy_url(url).unwrap();
        let second = manager.resolve_proxy_url(url).unwrap();

        assert!(first.starts_with("http://127.0.0.1:"));
        assert_ne!(first, url);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_build_media_source_carries_user_agent() {
        let (manager, _temp_dir) = create_test_manager().await;

        let source = manager
            .build_media_source("http://example/video.mp4")
            .unwrap();
        assert_eq!(source.user_agent, manager.user_agent());
        assert!(source.uri.starts_with("http://127.0.0.1:"));
    }

    #[tokio::test]
    async fn test_uncached_url_reports_not_cached() {
        let (manager, _temp_dir) = create_test_manager().await;
        assert!(!manager.is_cached("http://example/video.mp4").await);
    }

    #[tokio::test]
    async fn test_cache_size_of_fresh_cache() {
        let (manager, _temp_dir) = create_test_manager().await;
        let report = manager.cache_size();
        assert!(report.failures.is_empty());
    }

    #[tokio::test]
    async fn test_clear_cache_is_idempotent() {
        let (manager, _temp_dir) = create_test_manager().await;

        std::fs::write(manager.cache_dir().join("stale.cache"), b"junk").unwrap();

        let first = manager.clear_cache().await.unwrap();
        assert!(first.deleted_count() >= 1);

        let second = manager.clear_cache().await.unwrap();
        assert_eq!(second.deleted_count(), 0);
    }
}
