pub mod controller;
pub mod state_machine;
pub mod traits;
pub mod types;

pub use controller::{PlaybackCommand, PlaybackController, PlaybackHandle};
pub use state_machine::{Effect, PlaybackState, PlaybackStateMachine};
pub use traits::MediaPlayer;
pub use types::{CoreState, Notice, PlaybackPosition, PlayerEvent};
