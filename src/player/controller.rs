use anyhow::{Result, anyhow};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use super::state_machine::{Effect, PlaybackStateMachine};
use super::traits::MediaPlayer;
use super::types::{Notice, PlaybackPosition, PlayerEvent};
use crate::cache::CacheProxyManager;
use crate::media::{ContentType, infer_content_type};

/// Commands that can be sent to the playback controller.
#[derive(Debug)]
pub enum PlaybackCommand {
    /// The playback surface became visible; resume or start playback.
    Show {
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// The playback surface was hidden; snapshot position and stop.
    Hide {
        respond_to: oneshot::Sender<Result<()>>,
    },
    /// A notification arrived from the playback framework.
    PlayerEvent { event: PlayerEvent },
    /// Get the remembered resume position.
    GetRememberedPosition {
        respond_to: oneshot::Sender<Option<PlaybackPosition>>,
    },
    /// Whether the buffering indicator should currently be shown.
    GetSpinnerVisible { respond_to: oneshot::Sender<bool> },
    Shutdown,
}

/// Controller that owns the player and processes lifecycle commands.
///
/// Visibility transitions drive the player; framework events fold
/// through the state machine, whose effects surface as notices.
pub struct PlaybackController {
    player: Box<dyn MediaPlayer>,
    manager: Arc<CacheProxyManager>,
    media_url: String,
    remembered: Option<PlaybackPosition>,
    machine: PlaybackStateMachine,
    spinner_visible: bool,
    notice_sender: mpsc::UnboundedSender<Notice>,
    receiver: mpsc::UnboundedReceiver<PlaybackCommand>,
}

impl PlaybackController {
    /// Create a controller for one media URL. Returns the command handle,
    /// the notice stream, and the controller itself (spawn `run`).
    pub fn new(
        player: Box<dyn MediaPlayer>,
        manager: Arc<CacheProxyManager>,
        media_url: impl Into<String>,
    ) -> (
        PlaybackHandle,
        mpsc::UnboundedReceiver<Notice>,
        PlaybackController,
    ) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let (notice_sender, notice_receiver) = mpsc::unbounded_channel();

        let controller = PlaybackController {
            player,
            manager,
            media_url: media_url.into(),
            remembered: None,
            machine: PlaybackStateMachine::new(),
            spinner_visible: false,
            notice_sender,
            receiver,
        };
        let handle = PlaybackHandle { sender };

        (handle, notice_receiver, controller)
    }

    /// Run the controller event loop.
    pub async fn run(mut self) {
        debug!("PlaybackController event loop started");

        while let Some(command) = self.receiver.recv().await {
            match command {
                PlaybackCommand::Show { respond_to } => {
                    let result = self.on_show().await;
                    let _ = respond_to.send(result);
                }
                PlaybackCommand::Hide { respond_to } => {
                    let result = self.on_hide().await;
                    let _ = respond_to.send(result);
                }
                PlaybackCommand::PlayerEvent { event } => {
                    self.on_player_event(event).await;
                }
                PlaybackCommand::GetRememberedPosition { respond_to } => {
                    let _ = respond_to.send(self.remembered);
                }
                PlaybackCommand::GetSpinnerVisible { respond_to } => {
                    let _ = respond_to.send(self.spinner_visible);
                }
                PlaybackCommand::Shutdown => {
                    debug!("PlaybackController shutting down");
                    let _ = self.player.stop().await;
                    break;
                }
            }
        }
    }

    /// Resume playback: restore the remembered position, gate the media
    /// type, then hand the proxied source to the player.
    async fn on_show(&mut self) -> Result<()> {
        let content_type = infer_content_type(&self.media_url);
        if content_type != ContentType::Progressive {
            error!(
                "Unsupported media type {} for {}; refusing to prepare",
                content_type.as_str(),
                self.media_url
            );
            return Err(anyhow!(
                "Unsupported media type: {}",
                content_type.as_str()
            ));
        }

        let restored = self.remembered;
        if let Some(position) = restored {
            debug!(
                "Restoring playback position: window {} at {:?}",
                position.window, position.position
            );
            self.player.seek_to(position.window, position.position).await?;
        }

        let source = self.manager.build_media_source(&self.media_url)?;
        info!("Preparing media source {}", source.uri);

        self.player.prepare(&source, restored.is_none()).await?;
        self.player.set_play_when_ready(true).await?;
        self.machine.begin_preparing();

        Ok(())
    }

    /// Snapshot the current position, then stop the player. The snapshot
    /// survives the stop so the next `Show` resumes where we left off.
    async fn on_hide(&mut self) -> Result<()> {
        let window = self.player.current_window().await;
        let position_ms = self.player.current_position_ms().await;
        self.remembered = Some(PlaybackPosition::from_player(window, position_ms));

        debug!("Snapshotted playback position: {:?}", self.remembered);

        self.player.stop().await
    }

    async fn on_player_event(&mut self, event: PlayerEvent) {
        for effect in self.machine.transition(event) {
            match effect {
                Effect::ShowSpinner => self.spinner_visible = true,
                Effect::HideSpinner => self.spinner_visible = false,
                Effect::ClearPosition => self.remembered = None,
                Effect::NotifyCompleted => {
                    info!("Playback completed");
                    let _ = self.notice_sender.send(Notice::Completed);
                }
                Effect::NotifyError(message) => {
                    error!("Playback error: {}", message);
                    let _ = self.notice_sender.send(Notice::Error(message));
                }
            }
        }
    }
}

/// Handle for communicating with a running playback controller.
#[derive(Debug, Clone)]
pub struct PlaybackHandle {
    sender: mpsc::UnboundedSender<PlaybackCommand>,
}

impl PlaybackHandle {
    pub async fn show(&self) -> Result<()> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(PlaybackCommand::Show { respond_to: sender })
            .map_err(|_| anyhow!("Playback controller disconnected"))?;
        receiver
            .await
            .map_err(|_| anyhow!("No response from playback controller"))?
    }

    pub async fn hide(&self) -> Result<()> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(PlaybackCommand::Hide { respond_to: sender })
            .map_err(|_| anyhow!("Playback controller disconnected"))?;
        receiver
            .await
            .map_err(|_| anyhow!("No response from playback controller"))?
    }

    pub fn player_event(&self, event: PlayerEvent) -> Result<()> {
        self.sender
            .send(PlaybackCommand::PlayerEvent { event })
            .map_err(|_| anyhow!("Playback controller disconnected"))
    }

    pub async fn remembered_position(&self) -> Result<Option<PlaybackPosition>> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(PlaybackCommand::GetRememberedPosition { respond_to: sender })
            .map_err(|_| anyhow!("Playback controller disconnected"))?;
        receiver
            .await
            .map_err(|_| anyhow!("No response from playback controller"))
    }

    pub async fn spinner_visible(&self) -> Result<bool> {
        let (sender, receiver) = oneshot::channel();
        self.sender
            .send(PlaybackCommand::GetSpinnerVisible { respond_to: sender })
            .map_err(|_| anyhow!("Playback controller disconnected"))?;
        receiver
            .await
            .map_err(|_| anyhow!("No response from playback controller"))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.sender
            .send(PlaybackCommand::Shutdown)
            .map_err(|_| anyhow!("Playback controller disconnected"))
    }
}
