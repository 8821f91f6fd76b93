use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info, warn};

/// Name of the subdirectory holding cached media, appended to whichever
/// base directory the fallback chain settles on.
pub const DISK_CACHE_DIR_NAME: &str = "Video";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name, used for directory resolution and as the
    /// user-agent seed.
    #[serde(default = "default_app_name")]
    pub app_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum cache size in bytes.
    #[serde(default = "default_max_cache_size")]
    pub max_size_bytes: u64,

    /// Directory to store cached files. When unset, resolved via the
    /// platform fallback chain.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_directory: Option<PathBuf>,
}

impl Config {
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            debug!("Loading config from {:?}", config_path);
            let contents =
                fs::read_to_string(&config_path).context("Failed to read config file")?;
            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            info!("Config loaded successfully");
            Ok(config)
        } else {
            info!("No config file found, using defaults");
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(&config_path, contents).context("Failed to write config file")?;

        debug!("Config saved to {:?}", config_path);
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Failed to get config directory")?;
        Ok(config_dir.join("vidcache").join("config.toml"))
    }

    /// Canonical user-agent string sent on upstream fetches.
    pub fn user_agent(&self) -> String {
        format!(
            "{}/{}",
            self.general.app_name,
            env!("CARGO_PKG_VERSION")
        )
    }

    /// Resolve the disk cache directory.
    ///
    /// Three-tier fallback: the per-user cache directory if it can be
    /// created, then the per-user local data directory if it can be
    /// created, then a hardcoded `/tmp/<app>/cache/` path assumed to be
    /// writable. A fixed `Video` subdirectory is appended to the winner.
    pub fn resolve_cache_directory(&self) -> PathBuf {
        if let Some(ref dir) = self.cache.cache_directory {
            return dir.join(DISK_CACHE_DIR_NAME);
        }

        let base = creatable_app_dir(dirs::cache_dir(), &self.general.app_name)
            .or_else(|| creatable_app_dir(dirs::data_local_dir(), &self.general.app_name))
            .unwrap_or_else(|| {
                let fallback = PathBuf::from(format!("/tmp/{}/cache/", self.general.app_name));
                warn!(
                    "No platform cache directory available, falling back to {:?}",
                    fallback
                );
                fallback
            });

        base.join(DISK_CACHE_DIR_NAME)
    }
}

/// Append the app name to a platform base directory, keeping it only if
/// the directory exists or can be created.
fn creatable_app_dir(base: Option<PathBuf>, app_name: &str) -> Option<PathBuf> {
    let dir = base?.join(app_name);
    if dir.exists() {
        return Some(dir);
    }
    match fs::create_dir_all(&dir) {
        Ok(()) => Some(dir),
        Err(e) => {
            warn!("Failed to create directory {:?}: {}", dir, e);
            None
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size_bytes: default_max_cache_size(),
            cache_directory: None,
        }
    }
}

fn default_app_name() -> String {
    "vidcache".to_string()
}

fn default_max_cache_size() -> u64 {
    1024 * 1024 * 1024 // 1 GiB
}
