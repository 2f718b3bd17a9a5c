//! Game simulation modules

pub mod collision;
pub mod constants;
pub mod r#match;
pub mod physics;
pub mod round;
pub mod snapshot;
pub mod spatial;
pub mod trail;
pub mod world;

pub use r#match::{GameMatch, MatchHandle, MatchRegistry, MatchTiming};
pub use round::{MatchPhase, RoundController, RoundState};
pub use world::{Competitor, World};

use tokio::sync::mpsc;
use uuid::Uuid;

use crate::ws::protocol::{ClientMsg, ServerMsg};

/// Everything a room task receives, applied strictly between ticks
#[derive(Debug)]
pub enum RoomEvent {
    /// A connection opened; outbound messages for it go to `outbound`
    Connected {
        player_id: Uuid,
        outbound: mpsc::Sender<ServerMsg>,
    },
    /// A parsed client message
    Input(PlayerInput),
    /// The connection closed
    Disconnected { player_id: Uuid },
}

/// Player message received from WebSocket
#[derive(Debug, Clone)]
pub struct PlayerInput {
    pub player_id: Uuid,
    pub msg: ClientMsg,
    pub received_at: u64,
}

/// Room-level failures
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    #[error("Room is full")]
    Full,

    #[error("Already joined this room")]
    AlreadyJoined,

    #[error("Room is no longer running")]
    Closed,
}
