use anyhow::{Context, Result, anyhow};
use axum::{
    Router,
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, error, info, warn};

use super::stats::ProxyStats;
use super::storage::{CacheEntry, CacheStorage};

const DEFAULT_CONTENT_TYPE: &str = "video/mp4";

/// Loopback proxy server that serves remote media from the disk cache,
/// fetching and storing on a cache miss.
pub struct CacheProxy {
    port: u16,
    storage: Arc<RwLock<CacheStorage>>,
    client: reqwest::Client,
    user_agent: String,
    stats: ProxyStats,
    download_guards: RwLock<HashMap<String, Arc<Mutex<()>>>>,
    listener: std::sync::Mutex<Option<std::net::TcpListener>>,
    running: AtomicBool,
    enable_stats: bool,
    stats_interval_secs: u64,
}

impl CacheProxy {
    /// Bind an ephemeral loopback port immediately so the proxy URL is
    /// known (and stable) before the server starts accepting.
    pub fn new(storage: Arc<RwLock<CacheStorage>>, user_agent: String) -> Result<Self> {
        let listener = std::net::TcpListener::bind(("127.0.0.1", 0))
            .context("Failed to bind proxy server port")?;
        let port = listener.local_addr()?.port();

        Ok(Self {
            port,
            storage,
            client: reqwest::Client::new(),
            user_agent,
            stats: ProxyStats::new(),
            download_guards: RwLock::new(HashMap::new()),
            listener: std::sync::Mutex::new(Some(listener)),
            running: AtomicBool::new(false),
            enable_stats: true,
            stats_interval_secs: 30,
        })
    }

    /// Start serving. The proxy lives until the process exits.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        info!("Starting cache proxy server on 127.0.0.1:{}", self.port);

        if self.enable_stats {
            self.start_stats_reporting();
        }

        let app = self.create_router();

        let std_listener = self
            .listener
            .lock()
            .map_err(|_| anyhow!("Proxy listener lock poisoned"))?
            .take()
            .context("Proxy server already started")?;
        std_listener
            .set_nonblocking(true)
            .context("Failed to configure proxy listener")?;
        let listener =
            TcpListener::from_std(std_listener).context("Failed to adopt proxy listener")?;

        info!("Cache proxy server listening on {}", listener.local_addr()?);
        self.running.store(true, Ordering::Release);

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                error!("Proxy server error: {}", e);
            }
        });

        Ok(())
    }

    fn start_stats_reporting(self: &Arc<Self>) {
        let stats = self.stats.clone();
        let interval_secs = self.stats_interval_secs;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tokio::time::Duration::from_secs(interval_secs));
            ticker.tick().await; // Skip first immediate tick

            loop {
                ticker.tick().await;
                info!("{}", stats.format_report());
            }
        });
    }

    fn create_router(self: &Arc<Self>) -> Router {
        Router::new()
            .route(
                "/stream/:url",
                get(Self::serve_stream).head(Self::serve_stream_head),
            )
            .with_state(self.clone())
    }

    /// Whether the server has been started and is accepting requests.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Deterministic loopback URL for a remote URL. Same input, same
    /// output, for the life of the server.
    pub fn proxy_url(&self, remote_url: &str) -> String {
        let encoded = utf8_percent_encode(remote_url, NON_ALPHANUMERIC);
        format!("http://127.0.0.1:{}/stream/{}", self.port, encoded)
    }

    /// True iff a complete cache entry exists for the URL.
    pub async fn is_cached(&self, url: &str) -> bool {
        self.storage.read().await.is_complete(url)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn stats(&self) -> &ProxyStats {
        &self.stats
    }

    async fn serve_stream(
        Path(url): Path<String>,
        State(proxy): State<Arc<CacheProxy>>,
        headers: HeaderMap,
    ) -> impl IntoResponse {
        proxy.serve(&url, headers).await
    }

    async fn serve_stream_head(
        Path(url): Path<String>,
        State(proxy): State<Arc<CacheProxy>>,
    ) -> impl IntoResponse {
        proxy.serve_head(&url).await
    }

    /// Serve a URL from cache, fetching it from the origin first on a miss.
    async fn serve(&self, url: &str, headers: HeaderMap) -> Response {
        self.stats.increment_request();

        let cached = {
            let mut storage = self.storage.write().await;
            storage.get_entry(url)
        };

        let entry = match cached {
            Some(entry) if entry.metadata.is_complete => {
                self.stats.increment_cache_hit();
                entry
            }
            _ => {
                self.stats.increment_cache_miss();
                match self.ensure_cached(url).await {
                    Ok(entry) => entry,
                    Err(e) => {
                        error!("Failed to fetch {} from origin: {:#}", url, e);
                        return StatusCode::BAD_GATEWAY.into_response();
                    }
                }
            }
        };

        self.serve_entry(&entry, headers).await
    }

    /// Serve HEAD for a URL: from cache metadata when available, otherwise
    /// proxied upstream without caching anything.
    async fn serve_head(&self, url: &str) -> Response {
        self.stats.increment_request();

        let cached = {
            let mut storage = self.storage.write().await;
            storage.get_entry(url)
        };

        if let Some(entry) = cached {
            let content_type = entry
                .metadata
                .content_type
                .clone()
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

            return Response::builder()
                .status(StatusCode::OK)
                .header(header::CONTENT_TYPE, content_type)
                .header(header::CONTENT_LENGTH, entry.metadata.file_size.to_string())
                .header(header::ACCEPT_RANGES, "bytes")
                .body(Body::empty())
                .unwrap();
        }

        match self
            .client
            .head(url)
            .header(header::USER_AGENT, &self.user_agent)
            .send()
            .await
        {
            Ok(response) => {
                let mut builder = Response::builder()
                    .status(StatusCode::OK)
                    .header(header::ACCEPT_RANGES, "bytes");

                if let Some(length) = response.content_length() {
                    builder = builder.header(header::CONTENT_LENGTH, length.to_string());
                }
                if let Some(content_type) = response
                    .headers()
                    .get(header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                {
                    builder = builder.header(header::CONTENT_TYPE, content_type);
                }

                builder.body(Body::empty()).unwrap()
            }
            Err(e) => {
                warn!("HEAD request to origin failed for {}: {}", url, e);
                StatusCode::BAD_GATEWAY.into_response()
            }
        }
    }

    /// Fetch a URL into the cache unless another request already did.
    /// Concurrent first requests for the same URL share one download.
    async fn ensure_cached(&self, url: &str) -> Result<CacheEntry> {
        let guard = {
            let mut guards = self.download_guards.write().await;
            guards
                .entry(url.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };

        let _lock = guard.lock().await;

        // Another request may have finished the download while we waited.
        if let Some(entry) = self.storage.write().await.get_entry(url) {
            if entry.metadata.is_complete {
                return Ok(entry);
            }
        }

        let entry = self.download(url).await;

        let mut guards = self.download_guards.write().await;
        guards.remove(url);

        entry
    }

    async fn download(&self, url: &str) -> Result<CacheEntry> {
        info!("Cache miss, fetching {} from origin", url);

        let mut response = self
            .client
            .get(url)
            .header(header::USER_AGENT, &self.user_agent)
            .send()
            .await
            .with_context(|| format!("Request to origin failed for {}", url))?
            .error_for_status()
            .with_context(|| format!("Origin returned an error status for {}", url))?;

        let expected_total_size = response.content_length().unwrap_or(0);
        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        let partial_path = {
            let storage = self.storage.read().await;
            storage.partial_path_for(url)
        };

        let mut file = File::create(&partial_path)
            .await
            .with_context(|| format!("Failed to create partial file {:?}", partial_path))?;

        let mut downloaded: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .with_context(|| format!("Failed reading response body for {}", url))?
        {
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed writing to partial file {:?}", partial_path))?;
            downloaded += chunk.len() as u64;
        }

        file.flush()
            .await
            .with_context(|| format!("Failed to flush partial file {:?}", partial_path))?;
        drop(file);

        debug!("Downloaded {} bytes for {}", downloaded, url);

        let mut storage = self.storage.write().await;
        storage
            .commit_entry(url, expected_total_size, content_type)
            .await
    }

    /// Serve a complete cache entry, honoring byte-Range requests.
    async fn serve_entry(&self, entry: &CacheEntry, headers: HeaderMap) -> Response {
        let total_size = match entry.file_size() {
            Ok(size) => size,
            Err(e) => {
                error!("Failed to get file size: {}", e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        let content_type = entry
            .metadata
            .content_type
            .clone()
            .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        let range = headers
            .get(header::RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(|range_str| parse_range_header(range_str, total_size));

        if range.is_some() {
            self.stats.increment_range_request();
        } else {
            self.stats.increment_full_request();
        }

        let mut file = match File::open(&entry.file_path).await {
            Ok(f) => f,
            Err(e) => {
                error!("Failed to open cache file: {}", e);
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

        match range {
            Some((start, end)) => {
                if start >= total_size {
                    return Response::builder()
                        .status(StatusCode::RANGE_NOT_SATISFIABLE)
                        .header(header::CONTENT_RANGE, format!("bytes */{}", total_size))
                        .header(header::ACCEPT_RANGES, "bytes")
                        .body(Body::empty())
                        .unwrap();
                }

                let length = end - start + 1;

                if let Err(e) = file.seek(std::io::SeekFrom::Start(start)).await {
                    error!("Failed to seek in file: {}", e);
                    return StatusCode::INTERNAL_SERVER_ERROR.into_response();
                }

                let mut buffer = vec![0u8; length as usize];
                match file.read_exact(&mut buffer).await {
                    Ok(_) => {
                        debug!(
                            "Serving range {}-{}/{} ({} bytes)",
                            start, end, total_size, length
                        );
                        self.stats.add_bytes_served(length);
                        Response::builder()
                            .status(StatusCode::PARTIAL_CONTENT)
                            .header(header::CONTENT_TYPE, content_type)
                            .header(header::CONTENT_LENGTH, length.to_string())
                            .header(header::ACCEPT_RANGES, "bytes")
                            .header(
                                header::CONTENT_RANGE,
                                format!("bytes {}-{}/{}", start, end, total_size),
                            )
                            .body(Body::from(buffer))
                            .unwrap()
                    }
                    Err(e) => {
                        error!("Failed to read file: {}", e);
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    }
                }
            }
            None => {
                let mut buffer = Vec::new();
                match file.read_to_end(&mut buffer).await {
                    Ok(bytes_read) => {
                        debug!("Serving full file: {} bytes", bytes_read);
                        self.stats.add_bytes_served(bytes_read as u64);
                        Response::builder()
                            .status(StatusCode::OK)
                            .header(header::CONTENT_TYPE, content_type)
                            .header(header::CONTENT_LENGTH, bytes_read.to_string())
                            .header(header::ACCEPT_RANGES, "bytes")
                            .body(Body::from(buffer))
                            .unwrap()
                    }
                    Err(e) => {
                        error!("Failed to read file: {}", e);
                        StatusCode::INTERNAL_SERVER_ERROR.into_response()
                    }
                }
            }
        }
    }
}

/// Parse a Range header value against a known file size.
fn parse_range_header(range: &str, file_size: u64) -> Option<(u64, u64)> {
    if !range.starts_with("bytes=") {
        return None;
    }

    let range = &range[6..];
    let parts: Vec<&str> = range.split('-').collect();

    if parts.len() != 2 {
        return None;
    }

    let start = if parts[0].is_empty() {
        // Suffix range (e.g., "-500" means last 500 bytes)
        let suffix = parts[1].parse::<u64>().ok()?;
        if file_size > 0 {
            file_size.saturating_sub(suffix)
        } else {
            return None;
        }
    } else {
        parts[0].parse::<u64>().ok()?
    };

    let end = if parts[1].is_empty() || parts[0].is_empty() {
        // Open-ended or suffix range runs to the end of the file.
        file_size.checked_sub(1)?
    } else {
        parts[1].parse::<u64>().ok()?
    };

    if start > end {
        return None;
    }

    Some((start, end.min(file_size.saturating_sub(1))))
}
