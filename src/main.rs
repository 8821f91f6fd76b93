use anyhow::{Context, Result, bail};
use tracing::info;

use vidcache::{Config, infer_content_type};
use vidcache::cache::CacheProxyManager;
use vidcache::media::ContentType;

/// Resolve a remote media URL through the local cache proxy and keep the
/// proxy serving until Ctrl-C, so any player can stream through it.
#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vidcache=info".into()),
        )
        .init();

    let url = match std::env::args().nth(1) {
        Some(url) => url,
        None => {
            eprintln!("Usage: vidcache <remote-media-url>");
            std::process::exit(2);
        }
    };

    let content_type = infer_content_type(&url);
    if content_type != ContentType::Progressive {
        bail!(
            "Unsupported media type {}: only progressive (single-file) media can be proxied",
            content_type.as_str()
        );
    }

    let config = Config::load()?;
    let manager = CacheProxyManager::new(&config)
        .await
        .context("Failed to start cache proxy")?;

    let proxy_url = manager.resolve_proxy_url(&url)?;
    let size = manager.cache_size();

    info!("Cache directory: {:?}", manager.cache_dir());
    info!(
        "Cache size: {:.1} MB ({} unreadable entries)",
        size.total_bytes as f64 / 1024.0 / 1024.0,
        size.failures.len()
    );
    println!("{}", proxy_url);
    info!("Proxy running; point your player at the URL above. Ctrl-C to exit.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to wait for Ctrl-C")?;
    info!("Shutting down");

    Ok(())
}
