use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;

use crate::media::MediaSource;

/// Seam between the playback controller and the actual playback
/// framework. Decode, render, and track selection live behind this trait.
#[async_trait]
pub trait MediaPlayer: Send + Sync {
    /// Hand the player a media source. `reset_position` discards any
    /// position the player itself remembers; the controller passes false
    /// when it has already issued a restoring seek.
    async fn prepare(&self, source: &MediaSource, reset_position: bool) -> Result<()>;

    async fn set_play_when_ready(&self, play: bool) -> Result<()>;

    async fn seek_to(&self, window: usize, position: Duration) -> Result<()>;

    /// Stop playback and release decode/render resources. Synchronous
    /// from the caller's perspective.
    async fn stop(&self) -> Result<()>;

    async fn current_window(&self) -> usize;

    /// Current position in milliseconds. May be negative when the player
    /// has no position (its "unset" value); callers clamp.
    async fn current_position_ms(&self) -> i64;
}
