use tracing::debug;

use super::types::{CoreState, PlayerEvent};

/// Playback lifecycle state as tracked by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlaybackState {
    /// No media prepared.
    Idle,
    /// A source has been handed to the player, waiting for it to load.
    Preparing,
    /// Player is stalled filling its buffer.
    Buffering,
    /// Loaded and ready, not currently advancing.
    Ready,
    /// Actively playing.
    Playing,
    /// Paused with media loaded.
    Paused,
    /// Playback reached the end of the media.
    Ended,
    /// Playback failed.
    Errored,
}

impl PlaybackState {
    /// States a new prepare can legally start from again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, PlaybackState::Ended | PlaybackState::Errored)
    }
}

/// Side effects a transition asks the surrounding controller to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    ShowSpinner,
    HideSpinner,
    ClearPosition,
    NotifyCompleted,
    NotifyError(String),
}

/// Pure playback state machine: consumes discrete player events and
/// yields the effects the controller must apply. Holds no player handle,
/// so every transition is testable in isolation.
#[derive(Debug)]
pub struct PlaybackStateMachine {
    state: PlaybackState,
    is_playing: bool,
    completion_notified: bool,
}

impl PlaybackStateMachine {
    pub fn new() -> Self {
        Self {
            state: PlaybackState::Idle,
            is_playing: false,
            completion_notified: false,
        }
    }

    pub fn state(&self) -> &PlaybackState {
        &self.state
    }

    pub fn is_playing(&self) -> bool {
        self.is_playing
    }

    /// Called when the controller hands a new source to the player.
    /// Re-arms the one-shot completion notice.
    pub fn begin_preparing(&mut self) {
        debug!("Playback transition: {:?} -> Preparing", self.state);
        self.state = PlaybackState::Preparing;
        self.completion_notified = false;
    }

    /// Called when the player is stopped without a new source.
    pub fn reset(&mut self) {
        self.state = PlaybackState::Idle;
        self.is_playing = false;
    }

    /// Fold one player event into the machine, returning the effects to
    /// apply. The spinner is shown only while buffering; completion fires
    /// exactly once per prepared source.
    pub fn transition(&mut self, event: PlayerEvent) -> Vec<Effect> {
        let mut effects = Vec::new();

        match event {
            PlayerEvent::StateChanged(core) => {
                let next = match core {
                    CoreState::Buffering => {
                        effects.push(Effect::ShowSpinner);
                        PlaybackState::Buffering
                    }
                    CoreState::Ready => {
                        effects.push(Effect::HideSpinner);
                        if self.is_playing {
                            PlaybackState::Playing
                        } else {
                            PlaybackState::Ready
                        }
                    }
                    CoreState::Idle => {
                        effects.push(Effect::HideSpinner);
                        PlaybackState::Idle
                    }
                    CoreState::Ended => {
                        effects.push(Effect::HideSpinner);
                        PlaybackState::Ended
                    }
                };
                debug!("Playback transition: {:?} -> {:?}", self.state, next);
                self.state = next;

                if self.state == PlaybackState::Ended && !self.is_playing {
                    self.complete(&mut effects);
                }
            }
            PlayerEvent::IsPlayingChanged(playing) => {
                self.is_playing = playing;
                match (&self.state, playing) {
                    (PlaybackState::Ready, true)
                    | (PlaybackState::Paused, true)
                    | (PlaybackState::Buffering, true) => {
                        // Buffering keeps its spinner; state catches up on
                        // the next Ready notification.
                        if self.state != PlaybackState::Buffering {
                            self.state = PlaybackState::Playing;
                        }
                    }
                    (PlaybackState::Playing, false) => {
                        self.state = PlaybackState::Paused;
                    }
                    (PlaybackState::Ended, false) => {
                        self.complete(&mut effects);
                    }
                    _ => {}
                }
            }
            PlayerEvent::Error(message) => {
                debug!("Playback transition: {:?} -> Errored", self.state);
                self.state = PlaybackState::Errored;
                effects.push(Effect::HideSpinner);
                effects.push(Effect::ClearPosition);
                effects.push(Effect::NotifyError(message));
            }
        }

        effects
    }

    fn complete(&mut self, effects: &mut Vec<Effect>) {
        if self.completion_notified {
            return;
        }
        self.completion_notified = true;
        effects.push(Effect::ClearPosition);
        effects.push(Effect::NotifyCompleted);
    }
}

impl Default for PlaybackStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
