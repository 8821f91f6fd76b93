pub mod cache;
pub mod config;
pub mod media;
pub mod player;

pub use cache::CacheProxyManager;
pub use config::Config;
pub use media::{ContentType, MediaSource, infer_content_type};
pub use player::{MediaPlayer, Notice, PlaybackController, PlaybackHandle, PlayerEvent};
