use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Counters for the cache proxy server.
#[derive(Debug, Clone)]
pub struct ProxyStats {
    requests: Arc<AtomicU64>,
    cache_hits: Arc<AtomicU64>,
    cache_misses: Arc<AtomicU64>,
    range_requests: Arc<AtomicU64>,
    full_requests: Arc<AtomicU64>,
    bytes_served: Arc<AtomicU64>,
    start_time: Instant,
}

impl ProxyStats {
    pub fn new() -> Self {
        Self {
            requests: Arc::new(AtomicU64::new(0)),
            cache_hits: Arc::new(AtomicU64::new(0)),
            cache_misses: Arc::new(AtomicU64::new(0)),
            range_requests: Arc::new(AtomicU64::new(0)),
            full_requests: Arc::new(AtomicU64::new(0)),
            bytes_served: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn increment_request(&self) {
        self.requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_range_request(&self) {
        self.range_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_full_request(&self) {
        self.full_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_bytes_served(&self, bytes: u64) {
        self.bytes_served.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn requests(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    pub fn format_report(&self) -> String {
        let uptime_secs = self.start_time.elapsed().as_secs();
        let hours = uptime_secs / 3600;
        let minutes = (uptime_secs % 3600) / 60;
        let seconds = uptime_secs % 60;

        let served_mb = self.bytes_served.load(Ordering::Relaxed) as f64 / (1024.0 * 1024.0);
        let hits = self.cache_hits.load(Ordering::Relaxed);
        let misses = self.cache_misses.load(Ordering::Relaxed);
        let hit_rate = if hits + misses > 0 {
            hits as f64 / (hits + misses) as f64 * 100.0
        } else {
            0.0
        };

        format!(
            "Proxy Stats [{}h {}m {}s] | Requests: {} | Hits: {} | Misses: {} | Hit rate: {:.1}% | Range: {} | Full: {} | Served: {:.1} MB",
            hours,
            minutes,
            seconds,
            self.requests.load(Ordering::Relaxed),
            hits,
            misses,
            hit_rate,
            self.range_requests.load(Ordering::Relaxed),
            self.full_requests.load(Ordering::Relaxed),
            served_mb
        )
    }
}

impl Default for ProxyStats {
    fn default() -> Self {
        Self::new()
    }
}
