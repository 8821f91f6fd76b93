use std::time::Duration;

/// Where to resume playback: window index plus offset into that window.
/// "No remembered position" is represented as `Option::None` by callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackPosition {
    pub window: usize,
    pub position: Duration,
}

impl PlaybackPosition {
    pub fn new(window: usize, position: Duration) -> Self {
        Self { window, position }
    }

    /// Snapshot from raw player readings. A negative position reading
    /// (the player's "unset" value) clamps to zero.
    pub fn from_player(window: usize, position_ms: i64) -> Self {
        Self {
            window,
            position: Duration::from_millis(position_ms.max(0) as u64),
        }
    }
}

/// Playback framework notification states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoreState {
    Idle,
    Buffering,
    Ready,
    Ended,
}

/// Discrete events emitted by the playback framework.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerEvent {
    StateChanged(CoreState),
    IsPlayingChanged(bool),
    Error(String),
}

/// User-visible notices produced by playback; the embedding UI decides
/// how to present them.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    Completed,
    Error(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_clamps_negative_position() {
        let pos = PlaybackPosition::from_player(0, -9223372036854775807);
        assert_eq!(pos.position, Duration::ZERO);
    }

    #[test]
    fn test_snapshot_preserves_positive_position() {
        let pos = PlaybackPosition::from_player(2, 5000);
        assert_eq!(pos.window, 2);
        assert_eq!(pos.position, Duration::from_millis(5000));
    }
}
