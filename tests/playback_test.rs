use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;

use vidcache::Config;
use vidcache::cache::CacheProxyManager;
use vidcache::media::MediaSource;
use vidcache::player::{
    CoreState, MediaPlayer, Notice, PlaybackController, PlaybackHandle, PlayerEvent,
};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Seek { window: usize, position: Duration },
    Prepare { uri: String, reset_position: bool },
    PlayWhenReady(bool),
    Stop,
}

/// Player double that records every call and reports a scriptable
/// position.
#[derive(Clone)]
struct RecordingPlayer {
    calls: Arc<Mutex<Vec<Call>>>,
    window: Arc<AtomicUsize>,
    position_ms: Arc<AtomicI64>,
}

impl RecordingPlayer {
    fn new() -> Self {
        Self {
            calls: Arc::new(Mutex::new(Vec::new())),
            window: Arc::new(AtomicUsize::new(0)),
            position_ms: Arc::new(AtomicI64::new(0)),
        }
    }

    fn set_position(&self, window: usize, position_ms: i64) {
        self.window.store(window, Ordering::SeqCst);
        self.position_ms.store(position_ms, Ordering::SeqCst);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl MediaPlayer for RecordingPlayer {
    async fn prepare(&self, source: &MediaSource, reset_position: bool) -> Result<()> {
        self.record(Call::Prepare {
            uri: source.uri.clone(),
            reset_position,
        });
        Ok(())
    }

    async fn set_play_when_ready(&self, play: bool) -> Result<()> {
        self.record(Call::PlayWhenReady(play));
        Ok(())
    }

    async fn seek_to(&self, window: usize, position: Duration) -> Result<()> {
        self.record(Call::Seek { window, position });
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.record(Call::Stop);
        Ok(())
    }

    async fn current_window(&self) -> usize {
        self.window.load(Ordering::SeqCst)
    }

    async fn current_position_ms(&self) -> i64 {
        self.position_ms.load(Ordering::SeqCst)
    }
}

async fn spawn_controller(
    media_url: &str,
) -> (
    RecordingPlayer,
    PlaybackHandle,
    mpsc::UnboundedReceiver<Notice>,
    TempDir,
) {
    let temp_dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.cache.cache_directory = Some(temp_dir.path().to_path_buf());
    let manager = Arc::new(CacheProxyManager::new(&config).await.unwrap());

    let player = RecordingPlayer::new();
    let (handle, notices, controller) =
        PlaybackController::new(Box::new(player.clone()), manager, media_url);
    tokio::spawn(controller.run());

    (player, handle, notices, temp_dir)
}

#[tokio::test]
async fn first_show_prepares_from_the_start() {
    let (player, handle, _notices, _temp_dir) =
        spawn_controller("http://example.com/video.mp4").await;

    handle.show().await.unwrap();

    let calls = player.calls();
    assert!(matches!(
        calls[0],
        Call::Prepare {
            reset_position: true,
            ..
        }
    ));
    assert_eq!(calls[1], Call::PlayWhenReady(true));
    // No seek without a remembered position.
    assert!(!calls.iter().any(|c| matches!(c, Call::Seek { .. })));
}

#[tokio::test]
async fn prepare_targets_the_proxy_not_the_origin() {
    let (player, handle, _notices, _temp_dir) =
        spawn_controller("http://example.com/video.mp4").await;

    handle.show().await.unwrap();

    let calls = player.calls();
    let Call::Prepare { ref uri, .. } = calls[0] else {
        panic!("expected a prepare call, got {:?}", calls[0]);
    };
    assert!(uri.starts_with("http://127.0.0.1:"));
    assert_ne!(uri, "http://example.com/video.mp4");
}

#[tokio::test]
async fn hide_then_show_restores_position_with_seek_before_prepare() {
    let (player, handle, _notices, _temp_dir) =
        spawn_controller("http://example.com/video.mp4").await;

    handle.show().await.unwrap();
    player.set_position(0, 5000);
    handle.hide().await.unwrap();

    let remembered = handle.remembered_position().await.unwrap().unwrap();
    assert_eq!(remembered.window, 0);
    assert_eq!(remembered.position, Duration::from_millis(5000));

    handle.show().await.unwrap();

    let calls = player.calls();
    let seek_index = calls
        .iter()
        .position(|c| {
            *c == Call::Seek {
                window: 0,
                position: Duration::from_millis(5000),
            }
        })
        .expect("restoring seek was never issued");
    let second_prepare_index = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, Call::Prepare { .. }))
        .map(|(i, _)| i)
        .nth(1)
        .expect("second prepare was never issued");

    assert!(seek_index < second_prepare_index);
    assert!(matches!(
        calls[second_prepare_index],
        Call::Prepare {
            reset_position: false,
            ..
        }
    ));
}

#[tokio::test]
async fn negative_position_snapshot_clamps_to_zero() {
    let (player, handle, _notices, _temp_dir) =
        spawn_controller("http://example.com/video.mp4").await;

    handle.show().await.unwrap();
    player.set_position(1, -42);
    handle.hide().await.unwrap();

    let remembered = handle.remembered_position().await.unwrap().unwrap();
    assert_eq!(remembered.window, 1);
    assert_eq!(remembered.position, Duration::ZERO);
}

#[tokio::test]
async fn ended_while_not_playing_clears_position_and_notifies_once() {
    let (player, handle, mut notices, _temp_dir) =
        spawn_controller("http://example.com/video.mp4").await;

    handle.show().await.unwrap();
    player.set_position(0, 9000);
    handle.hide().await.unwrap();
    handle.show().await.unwrap();

    handle
        .player_event(PlayerEvent::IsPlayingChanged(true))
        .unwrap();
    handle
        .player_event(PlayerEvent::StateChanged(CoreState::Ready))
        .unwrap();
    handle
        .player_event(PlayerEvent::IsPlayingChanged(false))
        .unwrap();
    handle
        .player_event(PlayerEvent::StateChanged(CoreState::Ended))
        .unwrap();
    // Duplicate terminal notification must not produce a second notice.
    handle
        .player_event(PlayerEvent::IsPlayingChanged(false))
        .unwrap();

    assert_eq!(notices.recv().await, Some(Notice::Completed));

    assert_eq!(handle.remembered_position().await.unwrap(), None);
    assert!(notices.try_recv().is_err());
}

#[tokio::test]
async fn player_error_clears_position_and_reports_message() {
    let (player, handle, mut notices, _temp_dir) =
        spawn_controller("http://example.com/video.mp4").await;

    handle.show().await.unwrap();
    player.set_position(0, 3000);
    handle.hide().await.unwrap();
    handle.show().await.unwrap();

    handle
        .player_event(PlayerEvent::StateChanged(CoreState::Buffering))
        .unwrap();
    assert!(handle.spinner_visible().await.unwrap());

    handle
        .player_event(PlayerEvent::Error("network dropped".to_string()))
        .unwrap();

    assert_eq!(
        notices.recv().await,
        Some(Notice::Error("network dropped".to_string()))
    );
    assert!(!handle.spinner_visible().await.unwrap());
    assert_eq!(handle.remembered_position().await.unwrap(), None);
}

#[tokio::test]
async fn buffering_toggles_the_spinner() {
    let (_player, handle, _notices, _temp_dir) =
        spawn_controller("http://example.com/video.mp4").await;

    handle.show().await.unwrap();

    handle
        .player_event(PlayerEvent::StateChanged(CoreState::Buffering))
        .unwrap();
    assert!(handle.spinner_visible().await.unwrap());

    handle
        .player_event(PlayerEvent::StateChanged(CoreState::Ready))
        .unwrap();
    assert!(!handle.spinner_visible().await.unwrap());
}

#[tokio::test]
async fn manifest_formats_are_rejected_before_any_source_is_built() {
    let (player, handle, _notices, _temp_dir) =
        spawn_controller("http://example.com/stream/manifest.mpd").await;

    let result = handle.show().await;
    assert!(result.is_err());
    assert!(
        result
            .unwrap_err()
            .to_string()
            .contains("Unsupported media type")
    );

    // The gate fires before any player interaction.
    assert!(player.calls().is_empty());
}
