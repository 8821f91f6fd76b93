pub mod accounting;
pub mod manager;
pub mod proxy;
pub mod stats;
pub mod storage;

pub use accounting::{FileFailure, SizeReport, SweepReport};
pub use manager::CacheProxyManager;
pub use proxy::CacheProxy;
pub use stats::ProxyStats;
pub use storage::{CacheEntry, CacheMetadata, CacheStats, CacheStorage};
